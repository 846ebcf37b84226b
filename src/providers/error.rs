use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("provider auth failed: {message}")]
    Auth { message: String },

    #[error("provider rejected request: {message}")]
    Rejected {
        code: Option<String>,
        message: String,
    },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("bad callback payload: {message}")]
    BadPayload { message: String },

    #[error("bad callback signature: {message}")]
    BadSignature { message: String },

    #[error("operation not supported: {operation}")]
    Unsupported { operation: String },

    #[error("credential decrypt failed: {message}")]
    Crypto { message: String },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network { .. } => true,
            ProviderError::Auth { .. } => true,
            ProviderError::Validation { .. }
            | ProviderError::Rejected { .. }
            | ProviderError::BadPayload { .. }
            | ProviderError::BadSignature { .. }
            | ProviderError::Unsupported { .. }
            | ProviderError::Crypto { .. } => false,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            ProviderError::Validation { .. } => 400,
            ProviderError::BadPayload { .. } => 400,
            ProviderError::Unsupported { .. } => 400,
            ProviderError::BadSignature { .. } => 401,
            ProviderError::Auth { .. } => 502,
            ProviderError::Rejected { .. } => 502,
            ProviderError::Network { .. } => 502,
            ProviderError::Crypto { .. } => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping_is_correct() {
        assert_eq!(
            ProviderError::Validation {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            ProviderError::BadSignature {
                message: "token mismatch".to_string()
            }
            .http_status_code(),
            401
        );
        assert_eq!(
            ProviderError::Rejected {
                code: Some("1032".to_string()),
                message: "cancelled by user".to_string()
            }
            .http_status_code(),
            502
        );
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(ProviderError::Network {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!ProviderError::BadPayload {
            message: "unrecognized shape".to_string()
        }
        .is_retryable());
    }
}
