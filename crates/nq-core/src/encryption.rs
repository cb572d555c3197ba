//! # Encryption Gateway
//!
//! Symmetric authenticated encryption applied to every payload that crosses
//! the broker.
//!
//! The wire form is `base64(nonce || ciphertext || tag)` with a 12-byte
//! random nonce per message, so payloads stay printable and never repeat a
//! nonce under the same key.

use crate::secrets::SecretValue;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Invalid key: {message}")]
    InvalidKey { message: String },

    #[error("Encryption failed: {message}")]
    Encrypt { message: String },

    #[error("Decryption failed: {message}")]
    Decrypt { message: String },
}

// ============================================================================
// Interface Traits
// ============================================================================

/// Encrypts and decrypts broker payloads
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError>;
}

// ============================================================================
// Default Implementations
// ============================================================================

/// AES-256-GCM cipher
#[derive(Clone)]
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Create from raw key bytes (exactly 32)
    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        if key.len() != KEY_LEN {
            return Err(EncryptionError::InvalidKey {
                message: format!("expected {} bytes, got {}", KEY_LEN, key.len()),
            });
        }
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|e| EncryptionError::InvalidKey {
                message: e.to_string(),
            })?;
        Ok(Self { cipher })
    }

    /// Create from a base64 or hex encoded key
    pub fn from_encoded_key(encoded: &SecretValue) -> Result<Self, EncryptionError> {
        let text = encoded.expose_secret().trim();
        let decoded = if text.len() == KEY_LEN * 2 && text.chars().all(|c| c.is_ascii_hexdigit())
        {
            hex::decode(text).map_err(|e| EncryptionError::InvalidKey {
                message: format!("hex key: {}", e),
            })?
        } else {
            base64::engine::general_purpose::STANDARD
                .decode(text)
                .map_err(|e| EncryptionError::InvalidKey {
                    message: format!("base64 key: {}", e),
                })?
        };
        let key = zeroize::Zeroizing::new(decoded);
        Self::new(&key)
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed =
            self.cipher
                .encrypt(&nonce, plaintext)
                .map_err(|e| EncryptionError::Encrypt {
                    message: e.to_string(),
                })?;

        let mut framed = Vec::with_capacity(NONCE_LEN + sealed.len());
        framed.extend_from_slice(nonce.as_slice());
        framed.extend_from_slice(&sealed);
        Ok(base64::engine::general_purpose::STANDARD
            .encode(framed)
            .into_bytes())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let framed = base64::engine::general_purpose::STANDARD
            .decode(ciphertext.trim_ascii())
            .map_err(|e| EncryptionError::Decrypt {
                message: format!("payload is not base64: {}", e),
            })?;

        if framed.len() < NONCE_LEN + TAG_LEN {
            return Err(EncryptionError::Decrypt {
                message: format!("payload too short ({} bytes)", framed.len()),
            });
        }

        let (nonce, sealed) = framed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| EncryptionError::Decrypt {
                message: "authentication tag mismatch".to_string(),
            })
    }
}

#[cfg(test)]
#[path = "encryption_tests.rs"]
mod tests;
