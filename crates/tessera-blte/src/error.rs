//! Error types for BLTE parsing and decoding

use thiserror::Error;

/// Result type for BLTE operations
pub type Result<T> = std::result::Result<T, Error>;

/// BLTE error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid BLTE magic bytes
    #[error("invalid BLTE magic: {0:?}")]
    InvalidMagic([u8; 4]),

    /// Header size field does not match the chunk table
    #[error("invalid header size: {0}")]
    InvalidHeaderSize(u32),

    /// Chunk table flags byte is not a known table format
    #[error("unsupported chunk table format: {0:#04x}")]
    UnsupportedTableFormat(u8),

    /// Blob is shorter than its chunk table says
    #[error("truncated blob: chunk {chunk} needs {expected} bytes, {actual} remain")]
    Truncated {
        chunk: usize,
        expected: usize,
        actual: usize,
    },

    /// Unknown chunk mode byte
    #[error("unknown mode: {0:#04x}")]
    UnknownMode(u8),

    /// A chunk's digest does not match its table entry
    #[error("corrupt chunk {chunk}: expected {expected}, got {actual}")]
    CorruptChunk {
        chunk: usize,
        expected: String,
        actual: String,
    },

    /// Decoded output length differs from what the caller expected
    #[error("decoded size mismatch: expected {expected}, got {actual}")]
    DecodedSizeMismatch { expected: u64, actual: u64 },

    /// Zlib inflation failed
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// Encrypted chunk header is malformed
    #[error("invalid encrypted chunk: {0}")]
    InvalidEncryptedChunk(String),

    /// Encryption type byte is neither Salsa20 nor ARC4
    #[error("unsupported encryption type: {0:#04x}")]
    UnsupportedEncryptionType(u8),

    /// The named decryption key is not registered
    #[error("missing key: {0:#018x}")]
    KeyNotFound(u64),

    /// Cipher failure
    #[error("crypto error: {0}")]
    Crypto(#[from] tessera_crypto::CryptoError),
}

impl Error {
    /// `true` when the failure is an absent decryption key.
    ///
    /// Callers treat this as a soft error and fall back to an alternate
    /// encoding of the same content.
    pub fn is_missing_key(&self) -> bool {
        matches!(
            self,
            Self::KeyNotFound(_) | Self::Crypto(tessera_crypto::CryptoError::KeyNotFound(_))
        )
    }
}
