//! Block-table encoded (BLTE) container codec.
//!
//! Every content blob on the wire is wrapped in a BLTE envelope: a small
//! header, an optional chunk table, and a sequence of mode-prefixed
//! chunks (raw, zlib, nested BLTE, or encrypted). [`decode`] unwraps the
//! envelope back into the original bytes, verifying per-chunk digests
//! along the way.

mod decode;
mod error;
mod header;

pub use decode::decode;
pub use error::{Error, Result};
pub use header::{BlteHeader, ChunkInfo};

/// Magic bytes at the start of every BLTE blob.
pub const BLTE_MAGIC: [u8; 4] = *b"BLTE";

/// Length of an MD5 digest.
pub const MD5_LENGTH: usize = 16;

/// An MD5 digest.
pub type Md5 = [u8; MD5_LENGTH];
