//! The encoding table: content key → encoding keys + decoded size, and
//! encoding key → compression recipe (ESpec) + encoded size.
//!
//! The table is a single blob with a small header, the ESpec string
//! table, and two page families (content-keyed and espec-keyed), each
//! fronted by a directory of first keys. Lookups binary-search the
//! directory and then scan one page; the blob itself is never loaded
//! into secondary structures. All integers are big-endian.

use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ioutils::{ReadInt, read_cstring, read_u40be};
use crate::{Error, MD5_LENGTH, Md5, Result};

/// Magic bytes for the encoding table: `EN`.
const ENCODING_MAGIC: [u8; 2] = *b"EN";

/// Fixed header length.
const HEADER_LEN: usize = 22;

/// Encoding table header.
#[derive(Debug, Clone)]
pub struct EncodingHeader {
    /// Version, must be 1.
    pub version: u8,
    /// Content key width; must be 16.
    pub ckey_size: u8,
    /// Encoding key width; must be 16.
    pub ekey_size: u8,
    /// Content-key page size in KiB.
    pub ckey_page_size_kb: u16,
    /// ESpec page size in KiB.
    pub espec_page_size_kb: u16,
    /// Number of content-key pages.
    pub ckey_page_count: u32,
    /// Number of espec pages.
    pub espec_page_count: u32,
    /// Length of the ESpec string table in bytes.
    pub espec_block_size: u32,
}

/// One content-key entry: the encodings a content key resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingEntry {
    /// The content key.
    pub ckey: Md5,
    /// The encoding keys, in preference order. Never empty.
    pub ekeys: Vec<Md5>,
    /// Size of the decoded file.
    pub decoded_size: u64,
}

/// One espec entry: how an encoding key was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EspecEntry {
    /// The compression-recipe literal.
    pub espec: String,
    /// Size of the encoded blob.
    pub encoded_size: u64,
}

/// A parsed encoding table over its decoded bytes.
pub struct Encoding {
    data: Vec<u8>,
    header: EncodingHeader,
    ckey_dir: usize,
    ckey_pages: usize,
    espec_dir: usize,
    espec_pages: usize,
    /// Lazily-parsed ESpec string table; parsed at most once.
    espec_strings: Mutex<Option<Arc<Vec<String>>>>,
}

impl Encoding {
    /// Parse an encoding table from its decoded bytes.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let mut f = Cursor::new(&data);

        let mut magic = [0u8; 2];
        std::io::Read::read_exact(&mut f, &mut magic)?;
        if magic != ENCODING_MAGIC {
            return Err(Error::BadMagic("encoding"));
        }

        let version = f.read_u8()?;
        if version != 1 {
            return Err(Error::UnsupportedVersion {
                format: "encoding",
                version: u32::from(version),
            });
        }

        let ckey_size = f.read_u8()?;
        let ekey_size = f.read_u8()?;
        if usize::from(ckey_size) != MD5_LENGTH || usize::from(ekey_size) != MD5_LENGTH {
            return Err(Error::corrupt(
                "encoding",
                format!("unexpected key sizes {ckey_size}/{ekey_size}"),
            ));
        }

        let header = EncodingHeader {
            version,
            ckey_size,
            ekey_size,
            ckey_page_size_kb: f.read_u16be()?,
            espec_page_size_kb: f.read_u16be()?,
            ckey_page_count: f.read_u32be()?,
            espec_page_count: f.read_u32be()?,
            espec_block_size: {
                let _reserved = f.read_u8()?;
                f.read_u32be()?
            },
        };

        let ckey_dir = HEADER_LEN + header.espec_block_size as usize;
        let ckey_pages = ckey_dir + header.ckey_page_count as usize * (MD5_LENGTH + MD5_LENGTH);
        let espec_dir = ckey_pages + header.ckey_page_count as usize * header.ckey_page_size();
        let espec_pages = espec_dir + header.espec_page_count as usize * (MD5_LENGTH + MD5_LENGTH);
        let end = espec_pages + header.espec_page_count as usize * header.espec_page_size();

        if data.len() < end {
            return Err(Error::corrupt(
                "encoding",
                format!("blob is {} bytes, layout needs {end}", data.len()),
            ));
        }

        debug!(
            "encoding table: {} ckey pages, {} espec pages",
            header.ckey_page_count, header.espec_page_count
        );

        Ok(Self {
            data,
            header,
            ckey_dir,
            ckey_pages,
            espec_dir,
            espec_pages,
            espec_strings: Mutex::new(None),
        })
    }

    /// The table header.
    pub fn header(&self) -> &EncodingHeader {
        &self.header
    }

    /// Look up the encoding entry for a content key.
    pub fn find_by_ckey(&self, ckey: &[u8]) -> Option<EncodingEntry> {
        if ckey.len() != MD5_LENGTH {
            return None;
        }

        let page = self.candidate_page(
            ckey,
            self.ckey_dir,
            self.header.ckey_page_count as usize,
        )?;
        let start = self.ckey_pages + page * self.header.ckey_page_size();
        let page = &self.data[start..start + self.header.ckey_page_size()];

        // Entries are variable length, so the page is walked front to
        // back; keys ascend, which bounds the walk at the first key past
        // the target.
        let mut off = 0;
        while off < page.len() {
            let key_count = page[off] as usize;
            if key_count == 0 {
                break;
            }
            let entry_len = 1 + 5 + MD5_LENGTH + key_count * MD5_LENGTH;
            if off + entry_len > page.len() {
                break;
            }

            let entry_ckey = &page[off + 6..off + 6 + MD5_LENGTH];
            if entry_ckey == ckey {
                let decoded_size = read_u40be(&page[off + 1..off + 6]);
                let ekeys = (0..key_count)
                    .map(|i| {
                        let at = off + 6 + MD5_LENGTH + i * MD5_LENGTH;
                        to_md5(&page[at..at + MD5_LENGTH])
                    })
                    .collect();
                return Some(EncodingEntry {
                    ckey: to_md5(entry_ckey),
                    ekeys,
                    decoded_size,
                });
            }
            if entry_ckey > ckey {
                break;
            }
            off += entry_len;
        }

        None
    }

    /// Look up the compression recipe and encoded size of an encoding key.
    pub fn find_espec(&self, ekey: &[u8]) -> Option<EspecEntry> {
        if ekey.len() != MD5_LENGTH {
            return None;
        }

        let page = self.candidate_page(
            ekey,
            self.espec_dir,
            self.header.espec_page_count as usize,
        )?;
        let start = self.espec_pages + page * self.header.espec_page_size();
        let page = &self.data[start..start + self.header.espec_page_size()];

        const STRIDE: usize = MD5_LENGTH + 4 + 5;
        let mut off = 0;
        while off + STRIDE <= page.len() {
            let entry_ekey = &page[off..off + MD5_LENGTH];
            if entry_ekey.iter().all(|&b| b == 0) || entry_ekey > ekey {
                break;
            }
            if entry_ekey == ekey {
                let index = u32::from_be_bytes(
                    page[off + MD5_LENGTH..off + MD5_LENGTH + 4]
                        .try_into()
                        .ok()?,
                ) as usize;
                let encoded_size = read_u40be(&page[off + MD5_LENGTH + 4..off + STRIDE]);

                let strings = self.espec_strings();
                let Some(espec) = strings.get(index) else {
                    warn!("espec index {index} out of range ({})", strings.len());
                    return None;
                };
                return Some(EspecEntry {
                    espec: espec.clone(),
                    encoded_size,
                });
            }
            off += STRIDE;
        }

        None
    }

    /// First key of directory record `i`.
    fn dir_first_key(&self, dir_off: usize, i: usize) -> &[u8] {
        let at = dir_off + i * (MD5_LENGTH + MD5_LENGTH);
        &self.data[at..at + MD5_LENGTH]
    }

    /// Find the page whose first key is the greatest one at or below
    /// `target`. Returns `None` when every first key is above the target.
    fn candidate_page(&self, target: &[u8], dir_off: usize, count: usize) -> Option<usize> {
        let p = crate::ioutils::lower_bound(count, |i| {
            self.dir_first_key(dir_off, i).cmp(target)
        });
        if p < count && self.dir_first_key(dir_off, p) == target {
            Some(p)
        } else if p == 0 {
            None
        } else {
            Some(p - 1)
        }
    }

    /// The ESpec string table, parsed on first use.
    ///
    /// The mutex serialises concurrent first calls so the parse runs at
    /// most once per instance.
    fn espec_strings(&self) -> Arc<Vec<String>> {
        let mut guard = self.espec_strings.lock();
        if let Some(strings) = guard.as_ref() {
            return Arc::clone(strings);
        }

        let table = &self.data[HEADER_LEN..HEADER_LEN + self.header.espec_block_size as usize];
        let mut strings = Vec::new();
        let mut off = 0;
        while off < table.len() {
            match read_cstring(&table[off..]) {
                Ok((s, consumed)) => {
                    strings.push(s);
                    off += consumed;
                }
                Err(_) => break,
            }
        }
        debug!("parsed {} espec strings", strings.len());

        let strings = Arc::new(strings);
        *guard = Some(Arc::clone(&strings));
        strings
    }
}

impl EncodingHeader {
    fn ckey_page_size(&self) -> usize {
        usize::from(self.ckey_page_size_kb) * 1024
    }

    fn espec_page_size(&self) -> usize {
        usize::from(self.espec_page_size_kb) * 1024
    }
}

fn to_md5(slice: &[u8]) -> Md5 {
    let mut out = [0u8; MD5_LENGTH];
    out.copy_from_slice(slice);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Builder {
        especs: Vec<&'static str>,
        ckey_entries: Vec<(Md5, Vec<Md5>, u64)>,
        espec_entries: Vec<(Md5, u32, u64)>,
    }

    impl Builder {
        fn build(&self) -> Vec<u8> {
            let mut espec_block = Vec::new();
            for s in &self.especs {
                espec_block.extend_from_slice(s.as_bytes());
                espec_block.push(0);
            }

            let mut ckey_page = vec![0u8; 1024];
            let mut off = 0;
            for (ckey, ekeys, size) in &self.ckey_entries {
                ckey_page[off] = ekeys.len() as u8;
                ckey_page[off + 1..off + 6]
                    .copy_from_slice(&crate::ioutils::write_u40be(*size));
                ckey_page[off + 6..off + 22].copy_from_slice(ckey);
                off += 22;
                for ekey in ekeys {
                    ckey_page[off..off + 16].copy_from_slice(ekey);
                    off += 16;
                }
            }

            let mut espec_page = vec![0u8; 1024];
            let mut off = 0;
            for (ekey, index, size) in &self.espec_entries {
                espec_page[off..off + 16].copy_from_slice(ekey);
                espec_page[off + 16..off + 20].copy_from_slice(&index.to_be_bytes());
                espec_page[off + 20..off + 25]
                    .copy_from_slice(&crate::ioutils::write_u40be(*size));
                off += 25;
            }

            let ckey_pages = u32::from(!self.ckey_entries.is_empty());
            let espec_pages = u32::from(!self.espec_entries.is_empty());

            let mut data = Vec::new();
            data.extend_from_slice(b"EN");
            data.push(1); // version
            data.push(16);
            data.push(16);
            data.extend_from_slice(&1u16.to_be_bytes()); // ckey page KiB
            data.extend_from_slice(&1u16.to_be_bytes()); // espec page KiB
            data.extend_from_slice(&ckey_pages.to_be_bytes());
            data.extend_from_slice(&espec_pages.to_be_bytes());
            data.push(0);
            data.extend_from_slice(&(espec_block.len() as u32).to_be_bytes());
            data.extend_from_slice(&espec_block);

            if ckey_pages == 1 {
                data.extend_from_slice(&self.ckey_entries[0].0);
                data.extend_from_slice(&md5::compute(&ckey_page).0);
                data.extend_from_slice(&ckey_page);
            }
            if espec_pages == 1 {
                data.extend_from_slice(&self.espec_entries[0].0);
                data.extend_from_slice(&md5::compute(&espec_page).0);
                data.extend_from_slice(&espec_page);
            }
            data
        }
    }

    fn key(first: u8) -> Md5 {
        std::array::from_fn(|i| first + i as u8)
    }

    #[test]
    fn find_by_ckey_hit_and_miss() {
        let data = Builder {
            especs: vec!["z"],
            ckey_entries: vec![(key(0x00), vec![key(0x10)], 42)],
            espec_entries: vec![],
        }
        .build();
        let enc = Encoding::parse(data).unwrap();

        let entry = enc.find_by_ckey(&key(0x00)).unwrap();
        assert_eq!(entry.decoded_size, 42);
        assert_eq!(entry.ekeys, vec![key(0x10)]);

        assert!(enc.find_by_ckey(&[0xFF; 16]).is_none());
        assert!(enc.find_by_ckey(&[0x00; 16]).is_none());
    }

    #[test]
    fn multi_ekey_entry() {
        let data = Builder {
            especs: vec![],
            ckey_entries: vec![
                (key(0x20), vec![key(0x30), key(0x40)], 1000),
                (key(0x50), vec![key(0x60)], 7),
            ],
            espec_entries: vec![],
        }
        .build();
        let enc = Encoding::parse(data).unwrap();

        let entry = enc.find_by_ckey(&key(0x20)).unwrap();
        assert_eq!(entry.ekeys.len(), 2);
        assert_eq!(entry.ekeys[1], key(0x40));
        assert_eq!(enc.find_by_ckey(&key(0x50)).unwrap().decoded_size, 7);
    }

    #[test]
    fn find_espec() {
        let data = Builder {
            especs: vec!["n", "b:{164=z}", "z"],
            ckey_entries: vec![],
            espec_entries: vec![(key(0x10), 1, 555), (key(0x80), 2, 9)],
        }
        .build();
        let enc = Encoding::parse(data).unwrap();

        let entry = enc.find_espec(&key(0x10)).unwrap();
        assert_eq!(entry.espec, "b:{164=z}");
        assert_eq!(entry.encoded_size, 555);

        assert_eq!(enc.find_espec(&key(0x80)).unwrap().espec, "z");
        assert!(enc.find_espec(&key(0x33)).is_none());
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        assert!(matches!(
            Encoding::parse(b"XX\x01".to_vec()),
            Err(Error::BadMagic("encoding"))
        ));

        let mut data = Builder {
            especs: vec![],
            ckey_entries: vec![],
            espec_entries: vec![],
        }
        .build();
        data[2] = 9;
        assert!(matches!(
            Encoding::parse(data),
            Err(Error::UnsupportedVersion {
                format: "encoding",
                version: 9
            })
        ));
    }

    #[test]
    fn truncated_blob_is_corrupt() {
        let mut data = Builder {
            especs: vec![],
            ckey_entries: vec![(key(0x00), vec![key(0x10)], 1)],
            espec_entries: vec![],
        }
        .build();
        data.truncate(data.len() - 100);
        assert!(matches!(Encoding::parse(data), Err(Error::Corrupt { .. })));
    }
}
