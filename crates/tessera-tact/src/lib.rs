//! Parsers for the content-addressed formats of the distribution
//! pipeline: the encoding table, ordered archive indices (and the merged
//! group index), the root manifest, the install manifest, and the
//! key/value configuration files that tie a build together.
//!
//! All multi-byte fields in the index and encoding formats are
//! big-endian; the root manifest is little-endian.

pub mod archive;
pub mod config;
pub mod encoding;
mod error;
pub mod group_index;
pub mod install;
pub mod ioutils;
pub mod jenkins3;
pub mod root;

pub use error::{Error, Result};

/// Length of an MD5 digest / content key / encoding key.
pub const MD5_LENGTH: usize = 16;

/// An MD5 digest.
pub type Md5 = [u8; MD5_LENGTH];
