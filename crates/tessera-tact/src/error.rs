//! Error types for format parsing

use thiserror::Error;

/// Result type for format operations
pub type Result<T> = std::result::Result<T, Error>;

/// Format error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Magic bytes of a blob do not match its format
    #[error("bad magic for {0}")]
    BadMagic(&'static str),

    /// A format version this parser does not understand
    #[error("unsupported {format} version {version}")]
    UnsupportedVersion { format: &'static str, version: u32 },

    /// A digest stored in the file does not match the data it covers
    #[error("checksum mismatch in {context}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        context: &'static str,
        expected: String,
        actual: String,
    },

    /// The generated group index does not hash to the name the CDN
    /// configuration promised
    #[error("group-index checksum mismatch: expected {expected}, got {actual}")]
    GroupIndexNameMismatch { expected: String, actual: String },

    /// Structural parse failure
    #[error("corrupt {format}: {reason}")]
    Corrupt {
        format: &'static str,
        reason: String,
    },

    /// A delta-coded file ID walked out of the u32 range
    #[error("file ID delta overflow")]
    FileIdOverflow,

    /// An index key has a different width than the index declares
    #[error("key length {actual} does not match index key width {expected}")]
    KeyLength { expected: usize, actual: usize },
}

impl Error {
    pub(crate) fn corrupt(format: &'static str, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            format,
            reason: reason.into(),
        }
    }
}
