//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::env;

use crate::crypto::AES_KEY_LEN;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub app_env: String,
    pub base_url: String,
    pub callback_base_url: String,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub dsn: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64, // seconds
}

/// Security configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// 32-byte AES key decoded from AES_256_KEY_BASE64.
    pub aes_key: Vec<u8>,
    /// Static admin token; empty disables all admin routes.
    pub admin_token: String,
    pub rate_limit_per_min: u32,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // TZ only affects presentation of provider timestamps; default to Nairobi.
        if env::var("TZ").is_err() {
            env::set_var("TZ", "Africa/Nairobi");
        }

        let cfg = AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            security: SecurityConfig::from_env()?,
            app_env: env::var("APP_ENV").unwrap_or_else(|_| "sandbox".to_string()),
            base_url: env::var("APP_BASE_URL").unwrap_or_default(),
            callback_base_url: env::var("CALLBACK_BASE_URL").unwrap_or_default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.security.validate()?;
        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("APP_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("APP_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "APP_PORT cannot be 0".to_string(),
            ));
        }
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "APP_HOST cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            dsn: env::var("DB_DSN")
                .map_err(|_| ConfigError::MissingVariable("DB_DSN".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dsn.is_empty() {
            return Err(ConfigError::MissingVariable("DB_DSN".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }
        Ok(())
    }
}

impl SecurityConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let key_b64 = env::var("AES_256_KEY_BASE64")
            .map_err(|_| ConfigError::MissingVariable("AES_256_KEY_BASE64".to_string()))?;
        let aes_key = BASE64
            .decode(key_b64.trim())
            .map_err(|_| ConfigError::InvalidValue("AES_256_KEY_BASE64".to_string()))?;

        Ok(SecurityConfig {
            aes_key,
            admin_token: env::var("ADMIN_TOKEN")
                .unwrap_or_default()
                .trim()
                .to_string(),
            rate_limit_per_min: env::var("RATE_LIMIT_PER_MIN")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("RATE_LIMIT_PER_MIN".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aes_key.len() != AES_KEY_LEN {
            return Err(ConfigError::InvalidValue(
                "AES_256_KEY_BASE64 must decode to a 32-byte key".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_key_must_be_32_bytes() {
        let cfg = SecurityConfig {
            aes_key: vec![0u8; 16],
            admin_token: String::new(),
            rate_limit_per_min: 300,
        };
        assert!(cfg.validate().is_err());

        let cfg = SecurityConfig {
            aes_key: vec![0u8; 32],
            admin_token: String::new(),
            rate_limit_per_min: 300,
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn server_config_rejects_port_zero() {
        let config = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn database_config_rejects_inverted_pool_bounds() {
        let config = DatabaseConfig {
            dsn: "postgres://localhost/paywatch".to_string(),
            max_connections: 5,
            min_connections: 10,
            connection_timeout: 30,
        };
        assert!(config.validate().is_err());
    }
}
