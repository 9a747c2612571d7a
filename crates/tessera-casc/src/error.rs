//! Error types for local storage access

use thiserror::Error;

/// Result type for local storage operations
pub type Result<T> = std::result::Result<T, CascError>;

/// Local storage error types
#[derive(Error, Debug)]
pub enum CascError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The installation has no data directory
    #[error("no local storage at {0}")]
    NoStorage(std::path::PathBuf),

    /// An index file is structurally invalid
    #[error("invalid index file: {0}")]
    InvalidIndex(String),
}
