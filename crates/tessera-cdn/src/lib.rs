//! Mirror discovery, ranked fetching, and the verified disk cache.
//!
//! Content is addressed by digest and served by interchangeable
//! mirrors; this crate finds the mirrors for a region, ranks them by
//! measured latency, and resolves fetch requests through a fixed
//! precedence: local installation, disk cache, then the mirror pool.

pub mod cache;
mod error;
pub mod manifest;
pub mod patch;
pub mod pool;
pub mod region;
pub mod resolver;

pub use cache::DiskCache;
pub use error::{CdnError, Result};
pub use manifest::{CdnsEntry, VersionsEntry};
pub use patch::PatchServer;
pub use pool::MirrorPool;
pub use region::Region;
pub use resolver::{Resolver, Resource, ResourceKind};
