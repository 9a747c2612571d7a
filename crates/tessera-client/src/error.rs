//! Error type for build orchestration

use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Orchestration error types
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Format parse failure
    #[error(transparent)]
    Tact(#[from] tessera_tact::Error),

    /// Container decode failure
    #[error(transparent)]
    Blte(#[from] tessera_blte::Error),

    /// Mirror or cache failure
    #[error(transparent)]
    Cdn(#[from] tessera_cdn::CdnError),

    /// Key management failure
    #[error(transparent)]
    Crypto(#[from] tessera_crypto::CryptoError),

    /// A configuration file misses a key this build needs
    #[error("configuration is missing {0:?}")]
    MissingConfigKey(&'static str),

    /// A resource the build depends on could not be fetched anywhere
    #[error("required resource {0} unavailable")]
    MissingResource(String),

    /// A key argument is not valid hex
    #[error("invalid hex key {0:?}")]
    InvalidHex(String),

    /// Unknown locale name
    #[error("unknown locale {0:?}")]
    InvalidLocale(String),
}
