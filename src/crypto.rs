//! Secret box and identity hashing.
//!
//! Provider secrets (Daraja passkey, consumer key/secret) are stored with
//! AES-256-GCM: a fresh 96-bit nonce per encryption, nonce prepended to the
//! ciphertext, the whole blob base64-encoded. API keys and MSISDNs are never
//! stored in plaintext; both use a deterministic SHA-256 hex digest so lookups
//! and de-duplication keep working.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const AES_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must be {AES_KEY_LEN} bytes")]
    InvalidKey,

    #[error("ciphertext corrupt: {0}")]
    Corrupt(String),
}

/// Authenticated symmetric encryption of provider secrets.
///
/// The key is loaded once at startup and immutable afterwards.
#[derive(Clone)]
pub struct SecretBox {
    key: Key<Aes256Gcm>,
}

impl SecretBox {
    pub fn new(key_bytes: &[u8]) -> Result<Self, CryptoError> {
        if key_bytes.len() != AES_KEY_LEN {
            return Err(CryptoError::InvalidKey);
        }
        Ok(Self {
            key: *Key::<Aes256Gcm>::from_slice(key_bytes),
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Corrupt("encryption failed".to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<String, CryptoError> {
        let blob = BASE64
            .decode(ciphertext_b64)
            .map_err(|e| CryptoError::Corrupt(format!("invalid base64: {}", e)))?;
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::Corrupt("ciphertext too short".to_string()));
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.key);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Corrupt("authentication tag mismatch".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Corrupt("plaintext is not valid UTF-8".to_string()))
    }
}

/// Stable one-way hash of a tenant API key (hex-lowercase SHA-256).
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Stable one-way hash of a subscriber number. Trimmed and lowercased first
/// so the same MSISDN always collapses to the same digest.
pub fn hash_msisdn(msisdn: &str) -> String {
    hex::encode(Sha256::digest(msisdn.trim().to_lowercase().as_bytes()))
}

/// `n_bytes` of OS randomness, hex-encoded. Used for API keys and webhook tokens.
pub fn random_hex(n_bytes: usize) -> String {
    let mut buf = vec![0u8; n_bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Constant-time byte comparison for tokens.
pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
