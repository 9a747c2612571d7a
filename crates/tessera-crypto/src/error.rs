//! Error types for chunk decryption and key management

use thiserror::Error;

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Crypto error types
#[derive(Error, Debug)]
pub enum CryptoError {
    /// IO error while reading a key file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No key registered under the given name
    #[error("missing key: {0:#018x}")]
    KeyNotFound(u64),

    /// A key file line could not be parsed
    #[error("invalid key entry at line {line}: {reason}")]
    InvalidKeyEntry { line: usize, reason: String },

    /// Keystream application failed (buffer too long for the cipher)
    #[error("cipher error: {0}")]
    Cipher(String),
}

impl From<cipher::StreamCipherError> for CryptoError {
    fn from(e: cipher::StreamCipherError) -> Self {
        Self::Cipher(e.to_string())
    }
}
