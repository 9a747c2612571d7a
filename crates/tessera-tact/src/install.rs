//! The install manifest: files that must land on disk for the game to
//! start, grouped by platform/locale tags.

use std::io::{Cursor, Read};
use tracing::debug;

use crate::ioutils::{ReadInt, read_cstring_from};
use crate::{Error, MD5_LENGTH, Md5, Result};

/// Magic bytes for the install manifest: `IN`.
const INSTALL_MAGIC: [u8; 2] = *b"IN";

/// Install manifest header.
#[derive(Debug, Clone)]
pub struct InstallHeader {
    pub version: u8,
    pub hash_size: u8,
    pub tag_count: u16,
    pub entry_count: u32,
}

/// A tag and the set of entries it applies to.
#[derive(Debug, Clone)]
pub struct InstallTag {
    pub name: String,
    pub tag_type: u16,
    /// One bit per entry, entry order.
    mask: Vec<u8>,
}

impl InstallTag {
    /// `true` if entry `index` carries this tag.
    pub fn applies_to(&self, index: usize) -> bool {
        self.mask
            .get(index / 8)
            .is_some_and(|byte| byte & (1 << (index % 8)) != 0)
    }
}

/// One file in the install manifest.
#[derive(Debug, Clone)]
pub struct InstallEntry {
    /// Path relative to the installation root.
    pub path: String,
    /// Content key of the file.
    pub ckey: Md5,
    pub size: u32,
}

/// A parsed install manifest.
pub struct InstallManifest {
    pub header: InstallHeader,
    pub tags: Vec<InstallTag>,
    pub entries: Vec<InstallEntry>,
}

impl InstallManifest {
    /// Parse an install manifest from its decoded bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut f = Cursor::new(data);

        let mut magic = [0u8; 2];
        f.read_exact(&mut magic)?;
        if magic != INSTALL_MAGIC {
            return Err(Error::BadMagic("install"));
        }

        let version = f.read_u8()?;
        if version != 1 {
            return Err(Error::UnsupportedVersion {
                format: "install",
                version: u32::from(version),
            });
        }

        let hash_size = f.read_u8()?;
        if usize::from(hash_size) != MD5_LENGTH {
            return Err(Error::corrupt("install", format!("hash size {hash_size}")));
        }
        let tag_count = f.read_u16be()?;
        let entry_count = f.read_u32be()?;

        let header = InstallHeader {
            version,
            hash_size,
            tag_count,
            entry_count,
        };

        let mask_len = (entry_count as usize).div_ceil(8);
        let mut tags = Vec::with_capacity(tag_count as usize);
        for _ in 0..tag_count {
            let name = read_cstring_from(&mut f)?;
            let tag_type = f.read_u16be()?;
            let mut mask = vec![0u8; mask_len];
            f.read_exact(&mut mask)?;
            tags.push(InstallTag {
                name,
                tag_type,
                mask,
            });
        }

        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let path = read_cstring_from(&mut f)?;
            let mut ckey = [0u8; MD5_LENGTH];
            f.read_exact(&mut ckey)?;
            let size = f.read_u32be()?;
            entries.push(InstallEntry { path, ckey, size });
        }

        debug!(
            "install manifest: {} entries, {} tags",
            entries.len(),
            tags.len()
        );

        Ok(Self {
            header,
            tags,
            entries,
        })
    }

    /// Find an entry by its path (case-insensitive, as installers are).
    pub fn find(&self, path: &str) -> Option<&InstallEntry> {
        self.entries
            .iter()
            .find(|e| e.path.eq_ignore_ascii_case(path))
    }

    /// Entries carrying the given tag.
    pub fn entries_with_tag<'a>(&'a self, tag: &str) -> impl Iterator<Item = &'a InstallEntry> {
        let tag = self.tags.iter().find(|t| t.name == tag);
        self.entries
            .iter()
            .enumerate()
            .filter(move |(i, _)| tag.is_some_and(|t| t.applies_to(*i)))
            .map(|(_, e)| e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(tags: &[(&str, &[bool])], entries: &[(&str, u8, u32)]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"IN");
        data.push(1);
        data.push(16);
        data.extend_from_slice(&(tags.len() as u16).to_be_bytes());
        data.extend_from_slice(&(entries.len() as u32).to_be_bytes());

        let mask_len = entries.len().div_ceil(8);
        for (name, bits) in tags {
            data.extend_from_slice(name.as_bytes());
            data.push(0);
            data.extend_from_slice(&0u16.to_be_bytes());
            let mut mask = vec![0u8; mask_len];
            for (i, &set) in bits.iter().enumerate() {
                if set {
                    mask[i / 8] |= 1 << (i % 8);
                }
            }
            data.extend_from_slice(&mask);
        }
        for (path, first, size) in entries {
            data.extend_from_slice(path.as_bytes());
            data.push(0);
            let mut ckey = [0u8; 16];
            ckey[0] = *first;
            data.extend_from_slice(&ckey);
            data.extend_from_slice(&size.to_be_bytes());
        }
        data
    }

    #[test]
    fn parse_and_find() {
        let data = manifest(
            &[("Windows", &[true, false]), ("OSX", &[false, true])],
            &[("game.exe", 0xAA, 1024), ("game.app", 0xBB, 2048)],
        );
        let m = InstallManifest::parse(&data).unwrap();

        assert_eq!(m.header.entry_count, 2);
        let e = m.find("GAME.EXE").unwrap();
        assert_eq!(e.ckey[0], 0xAA);
        assert_eq!(e.size, 1024);
        assert!(m.find("missing.dat").is_none());

        let windows: Vec<_> = m.entries_with_tag("Windows").collect();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].path, "game.exe");
        assert_eq!(m.entries_with_tag("Linux").count(), 0);
    }

    #[test]
    fn bad_magic() {
        assert!(matches!(
            InstallManifest::parse(b"XX\x01\x10"),
            Err(Error::BadMagic("install"))
        ));
    }
}
