//! Local storage: bucket routing and blob location.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{CascError, Result};
use crate::index::IdxFile;

/// Bucket byte for an encoding key: XOR-fold the first nine bytes, then
/// fold the two nibbles.
pub fn bucket_for_ekey(ekey: &[u8]) -> u8 {
    let folded = ekey.iter().take(9).fold(0u8, |acc, &b| acc ^ b);
    (folded & 0x0F) ^ (folded >> 4)
}

/// Where a blob lives inside the local installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalLocation {
    /// The `data.NNN` archive file.
    pub data_file: PathBuf,
    pub offset: u64,
    pub size: u32,
}

/// A local game installation's content store, opened read-only.
///
/// All sixteen bucket indices are parsed once at open; lookups after
/// that never touch the index files again.
pub struct LocalStorage {
    data_dir: PathBuf,
    buckets: HashMap<u8, IdxFile>,
}

impl LocalStorage {
    /// Open the store under `<base>/Data/data`.
    ///
    /// Each bucket may have several index generations on disk; the
    /// newest (lexicographically last) file per bucket wins.
    pub fn open(base: &Path) -> Result<Self> {
        let data_dir = base.join("Data").join("data");
        if !data_dir.is_dir() {
            return Err(CascError::NoStorage(data_dir));
        }

        let mut newest: HashMap<u8, PathBuf> = HashMap::new();
        for entry in std::fs::read_dir(&data_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".idx") || name.len() < 6 {
                continue;
            }
            let Ok(bucket) = u8::from_str_radix(&name[..2], 16) else {
                continue;
            };

            match newest.get(&bucket) {
                Some(existing) if existing.file_name() >= path.file_name() => {}
                _ => {
                    newest.insert(bucket, path);
                }
            }
        }

        let mut buckets = HashMap::new();
        for (bucket, path) in newest {
            match IdxFile::open(&path) {
                Ok(idx) => {
                    buckets.insert(bucket, idx);
                }
                Err(e) => warn!("skipping index {}: {e}", path.display()),
            }
        }

        debug!(
            "local storage at {}: {} buckets",
            data_dir.display(),
            buckets.len()
        );
        Ok(Self { data_dir, buckets })
    }

    /// Look up an encoding key; returns where its blob lives, if stored
    /// locally.
    pub fn find(&self, ekey: &[u8]) -> Option<LocalLocation> {
        let bucket = bucket_for_ekey(ekey);
        let entry = self.buckets.get(&bucket)?.lookup(ekey)?;
        Some(LocalLocation {
            data_file: self.data_dir.join(format!("data.{:03}", entry.archive_id)),
            offset: entry.offset,
            size: entry.size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::test_support::write_idx;

    #[test]
    fn bucket_fold() {
        // Nine 0x11s XOR to 0x11, nibbles fold to 0x00.
        assert_eq!(bucket_for_ekey(&[0x11; 16]), 0x00);
        // 0xF0 folds to 0x0F.
        assert_eq!(bucket_for_ekey(&[0xF0, 0, 0, 0, 0, 0, 0, 0, 0]), 0x0F);
        // Only the first nine bytes participate.
        let mut a = [0x22u8; 16];
        a[15] = 0xFF;
        assert_eq!(bucket_for_ekey(&a), bucket_for_ekey(&[0x22; 16]));
    }

    #[test]
    fn open_and_find() {
        let base = tempfile::tempdir().unwrap();
        let data_dir = base.path().join("Data").join("data");
        std::fs::create_dir_all(&data_dir).unwrap();

        let ekey = [0x42u8; 16];
        let bucket = bucket_for_ekey(&ekey);
        let key9: [u8; 9] = ekey[..9].try_into().unwrap();

        let idx = write_idx(bucket, &[(key9, 3, 0x100, 64)]);
        std::fs::write(
            data_dir.join(format!("{bucket:02x}00000001.idx")),
            idx,
        )
        .unwrap();

        let storage = LocalStorage::open(base.path()).unwrap();
        let loc = storage.find(&ekey).unwrap();
        assert_eq!(loc.data_file, data_dir.join("data.003"));
        assert_eq!(loc.offset, 0x100);
        assert_eq!(loc.size, 64);

        assert!(storage.find(&[0x43; 16]).is_none());
    }

    #[test]
    fn newest_index_generation_wins() {
        let base = tempfile::tempdir().unwrap();
        let data_dir = base.path().join("Data").join("data");
        std::fs::create_dir_all(&data_dir).unwrap();

        let ekey = [0x42u8; 16];
        let bucket = bucket_for_ekey(&ekey);
        let key9: [u8; 9] = ekey[..9].try_into().unwrap();

        let old = write_idx(bucket, &[(key9, 1, 0, 1)]);
        let new = write_idx(bucket, &[(key9, 2, 8, 2)]);
        std::fs::write(data_dir.join(format!("{bucket:02x}00000001.idx")), old).unwrap();
        std::fs::write(data_dir.join(format!("{bucket:02x}00000002.idx")), new).unwrap();

        let storage = LocalStorage::open(base.path()).unwrap();
        let loc = storage.find(&ekey).unwrap();
        assert_eq!(loc.data_file, data_dir.join("data.002"));
    }

    #[test]
    fn missing_directory() {
        let base = tempfile::tempdir().unwrap();
        assert!(matches!(
            LocalStorage::open(base.path()),
            Err(CascError::NoStorage(_))
        ));
    }
}
