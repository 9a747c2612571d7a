//! Error types for mirror and cache operations

use thiserror::Error;

/// Result type for CDN operations
pub type Result<T> = std::result::Result<T, CdnError>;

/// CDN error types
#[derive(Error, Debug)]
pub enum CdnError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A pipe-delimited service table could not be parsed
    #[error("invalid manifest at line {line}: {reason}")]
    InvalidManifest { line: usize, reason: String },

    /// The requested region is missing from a service table
    #[error("region {0} not found")]
    RegionNotFound(String),

    /// Unknown region name
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    /// A downloaded file's length contradicts what was expected
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    /// A resource's digest does not match its encoding key
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The operation hit its deadline
    #[error("timed out: {0}")]
    Timeout(String),

    /// Local installation storage failure
    #[error(transparent)]
    Casc(#[from] tessera_casc::CascError),
}
