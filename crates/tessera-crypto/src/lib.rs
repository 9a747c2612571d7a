//! Stream-cipher support for encrypted content chunks.
//!
//! Encrypted chunks name a 64-bit key and carry a short IV; the full
//! 64-bit IV is derived by folding the chunk index into the IV field.
//! Key material is never shipped with the content — hosts register keys
//! through [`KeyService`].

pub mod arc4;
mod error;
mod key_service;
pub mod salsa20;

pub use error::{CryptoError, Result};
pub use key_service::KeyService;
