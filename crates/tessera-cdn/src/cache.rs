//! Disk cache layout.
//!
//! Cached objects live at `<cache>/<product>/<kind>/<xx>/<yy>/<hex>`,
//! where `xx` and `yy` are the first two byte pairs of the hex name.
//! Generated and fetched indices sit at `<cache>/<product>/<hex>.index`.
//! Files are bit-exact copies of the mirror content.

use std::path::{Path, PathBuf};

use crate::Result;

/// Path authority for one product's cache tree.
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    /// Open (and create) the cache tree for a product.
    pub fn new(cache_root: &Path, product: &str) -> Result<Self> {
        let root = cache_root.join(product);
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The product's cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `<kind>/<xx>/<yy>/<hex>` lives.
    pub fn object_path(&self, kind: &str, hex: &str) -> PathBuf {
        let mut path = self.root.join(kind);
        if hex.len() >= 4 {
            path.push(&hex[..2]);
            path.push(&hex[2..4]);
        }
        path.push(hex);
        path
    }

    /// Where an index file lives.
    pub fn index_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.index"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path(), "wow").unwrap();

        assert_eq!(
            cache.object_path("data", "aabbccdd"),
            dir.path().join("wow/data/aa/bb/aabbccdd")
        );
        assert_eq!(
            cache.object_path("config", "e1e2f3f4"),
            dir.path().join("wow/config/e1/e2/e1e2f3f4")
        );
        assert_eq!(
            cache.index_path("0011"),
            dir.path().join("wow/0011.index")
        );
        assert!(cache.root().is_dir());
    }
}
