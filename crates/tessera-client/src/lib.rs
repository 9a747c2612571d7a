//! Build orchestration: wires the configuration files, indices,
//! encoding table, root and install manifests into a [`Session`] that
//! resolves logical file identifiers to decoded bytes.

mod error;
pub mod session;

pub use error::{ClientError, Result};
pub use session::{Session, SessionOptions};
