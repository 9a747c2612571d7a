//! Read-only access to a locally installed game's content store.
//!
//! An installation keeps its blobs inside large `data.NNN` archives
//! under `Data/data/`, indexed by sixteen bucket index files (`.idx`).
//! The bucket for an encoding key is a nibble fold of its first nine
//! bytes; lookups parse that bucket's newest index and return the
//! archive, offset and size of the blob.

mod error;
mod index;
mod storage;

pub use error::{CascError, Result};
pub use index::{IdxFile, IdxEntry};
pub use storage::{LocalLocation, LocalStorage, bucket_for_ekey};
