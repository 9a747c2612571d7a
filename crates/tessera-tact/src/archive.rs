//! Ordered, block-paged archive indices.
//!
//! An index is a run of fixed-size blocks holding sorted fixed-stride
//! entries, a table of contents replicating each block's last key and a
//! truncated digest of its bytes, and a 28-byte footer describing the
//! geometry. Lookups binary-search the TOC, then the one candidate
//! block, without ever walking the file.
//!
//! Three flavors share the layout, told apart by `offset_bytes`:
//! `0` file index (no offsets), `6` group index (archive number + offset),
//! anything else a plain per-archive index.

use memmap2::Mmap;
use std::cmp::Ordering;
use std::fs::File;
use std::path::Path;
use tracing::trace;

use crate::ioutils::{lower_bound, read_uint_be};
use crate::{Error, Result};

/// Footer length; fixed because the truncated hashes are 8 bytes.
pub const FOOTER_LEN: usize = 28;

/// Truncated-hash width used throughout the index format.
pub const HASH_BYTES: usize = 8;

/// Index flavor, derived from the footer's `offset_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Standalone blobs; the size is the whole file, there is no offset.
    FileIndex,
    /// One archive's contents; the archive is implied by the file.
    ArchiveIndex,
    /// Every archive of a build; entries carry their archive number.
    GroupIndex,
}

/// Index footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFooter {
    /// Truncated digest of the TOC region.
    pub toc_hash: [u8; HASH_BYTES],
    /// Format revision; must be 1.
    pub format_revision: u8,
    /// Reserved flag bytes.
    pub flags: [u8; 2],
    /// Block size in bytes.
    pub block_size: usize,
    /// Width of the offset field.
    pub offset_bytes: u8,
    /// Width of the size field.
    pub size_bytes: u8,
    /// Width of the key field.
    pub key_bytes: u8,
    /// Width of the truncated hashes; must be 8.
    pub hash_bytes: u8,
    /// Number of entries in the file.
    pub num_elements: u32,
    /// Truncated digest of the 20 bytes above.
    pub footer_hash: [u8; HASH_BYTES],
}

impl IndexFooter {
    /// Parse and verify the footer from the last 28 bytes of an index.
    pub fn parse(tail: &[u8]) -> Result<Self> {
        if tail.len() != FOOTER_LEN {
            return Err(Error::corrupt("index footer", "not 28 bytes"));
        }

        let format_revision = tail[8];
        if format_revision != 1 {
            return Err(Error::UnsupportedVersion {
                format: "archive index",
                version: u32::from(format_revision),
            });
        }

        let hash_bytes = tail[15];
        if usize::from(hash_bytes) != HASH_BYTES {
            return Err(Error::corrupt(
                "index footer",
                format!("hash width {hash_bytes}"),
            ));
        }

        let footer_hash: [u8; HASH_BYTES] = tail[20..28].try_into().unwrap_or_default();
        let actual = md5::compute(&tail[..20]).0;
        if actual[..HASH_BYTES] != footer_hash {
            return Err(Error::ChecksumMismatch {
                context: "index footer",
                expected: hex::encode(footer_hash),
                actual: hex::encode(&actual[..HASH_BYTES]),
            });
        }

        let block_size = usize::from(tail[11]) << 10;
        if block_size == 0 {
            return Err(Error::corrupt("index footer", "zero block size"));
        }

        Ok(Self {
            toc_hash: tail[..8].try_into().unwrap_or_default(),
            format_revision,
            flags: [tail[9], tail[10]],
            block_size,
            offset_bytes: tail[12],
            size_bytes: tail[13],
            key_bytes: tail[14],
            hash_bytes,
            num_elements: u32::from_le_bytes(tail[16..20].try_into().unwrap_or_default()),
            footer_hash,
        })
    }
}

/// One index entry, decoded to its flavor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// The encoding key (at the index's key width).
    pub key: Vec<u8>,
    /// Encoded size of the blob.
    pub size: u64,
    /// Offset within the archive; 0 for file indices.
    pub offset: u64,
    /// Archive number; only present in group indices.
    pub archive_index: Option<u16>,
}

enum Buf {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl AsRef<[u8]> for Buf {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::Mapped(m) => m,
            Self::Owned(v) => v,
        }
    }
}

/// A read-only archive index.
///
/// Opened from a file the index is memory-mapped; the map lives as long
/// as the instance and all lookups are lock-free reads of it.
pub struct ArchiveIndex {
    buf: Buf,
    footer: IndexFooter,
    stride: usize,
    entries_per_block: usize,
    num_blocks: usize,
    toc_keys: usize,
    toc_hashes: usize,
}

impl ArchiveIndex {
    /// Open and memory-map an index file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let map = unsafe { Mmap::map(&file)? };
        Self::from_buf(Buf::Mapped(map))
    }

    /// Parse an index already held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_buf(Buf::Owned(bytes))
    }

    fn from_buf(buf: Buf) -> Result<Self> {
        let data = buf.as_ref();
        if data.len() < FOOTER_LEN {
            return Err(Error::corrupt("archive index", "shorter than its footer"));
        }
        let footer = IndexFooter::parse(&data[data.len() - FOOTER_LEN..])?;

        let stride = usize::from(footer.key_bytes)
            + usize::from(footer.size_bytes)
            + usize::from(footer.offset_bytes);
        if stride == 0 || stride > footer.block_size {
            return Err(Error::corrupt("archive index", "entry larger than a block"));
        }

        let entries_per_block = footer.block_size / stride;
        let num_blocks = (footer.num_elements as usize).div_ceil(entries_per_block);

        let toc_keys = num_blocks * footer.block_size;
        let toc_hashes = toc_keys + num_blocks * usize::from(footer.key_bytes);
        let footer_off = toc_hashes + num_blocks * HASH_BYTES;
        if footer_off + FOOTER_LEN != data.len() {
            return Err(Error::corrupt(
                "archive index",
                format!(
                    "layout needs {} bytes, file has {}",
                    footer_off + FOOTER_LEN,
                    data.len()
                ),
            ));
        }

        let toc_digest = md5::compute(&data[toc_keys..footer_off]).0;
        if toc_digest[..HASH_BYTES] != footer.toc_hash {
            return Err(Error::ChecksumMismatch {
                context: "index TOC",
                expected: hex::encode(footer.toc_hash),
                actual: hex::encode(&toc_digest[..HASH_BYTES]),
            });
        }

        trace!(
            "archive index: {} entries in {} blocks ({:?})",
            footer.num_elements,
            num_blocks,
            kind_of(&footer)
        );

        Ok(Self {
            footer,
            stride,
            entries_per_block,
            num_blocks,
            toc_keys,
            toc_hashes,
            buf,
        })
    }

    /// The index flavor.
    pub fn kind(&self) -> IndexKind {
        kind_of(&self.footer)
    }

    /// The index footer.
    pub fn footer(&self) -> &IndexFooter {
        &self.footer
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.footer.num_elements as usize
    }

    /// `true` when the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.footer.num_elements == 0
    }

    fn data(&self) -> &[u8] {
        self.buf.as_ref()
    }

    fn toc_key(&self, block: usize) -> &[u8] {
        let kb = usize::from(self.footer.key_bytes);
        let at = self.toc_keys + block * kb;
        &self.data()[at..at + kb]
    }

    /// Fetch block `block`, verifying its TOC digest.
    fn block_verified(&self, block: usize) -> Result<&[u8]> {
        let start = block * self.footer.block_size;
        let bytes = &self.data()[start..start + self.footer.block_size];

        let at = self.toc_hashes + block * HASH_BYTES;
        let expected = &self.data()[at..at + HASH_BYTES];
        let actual = md5::compute(bytes).0;
        if &actual[..HASH_BYTES] != expected {
            return Err(Error::ChecksumMismatch {
                context: "index block",
                expected: hex::encode(expected),
                actual: hex::encode(&actual[..HASH_BYTES]),
            });
        }
        Ok(bytes)
    }

    /// Look up a key.
    ///
    /// `key` must be at least as wide as the index's keys; extra trailing
    /// bytes are ignored, which lets full-width keys probe truncated
    /// indices.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<IndexEntry>> {
        let kb = usize::from(self.footer.key_bytes);
        if key.len() < kb {
            return Err(Error::KeyLength {
                expected: kb,
                actual: key.len(),
            });
        }
        let target = &key[..kb];

        // The TOC holds each block's last key, so the first block whose
        // last key is not below the target is the only candidate.
        let block_no = lower_bound(self.num_blocks, |i| self.toc_key(i).cmp(target));
        if block_no == self.num_blocks {
            return Ok(None);
        }
        let block = self.block_verified(block_no)?;

        // Trailing padding (all-zero keys) would break the ordering, so
        // bound the search to the populated prefix first.
        let populated = lower_bound(self.entries_per_block, |i| {
            if self.entry_key(block, i).iter().all(|&b| b == 0) {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        });

        let idx = lower_bound(populated, |i| self.entry_key(block, i).cmp(target));
        if idx < populated && self.entry_key(block, idx) == target {
            let at = idx * self.stride;
            Ok(Some(self.decode_entry(&block[at..at + self.stride])))
        } else {
            Ok(None)
        }
    }

    fn entry_key<'a>(&self, block: &'a [u8], i: usize) -> &'a [u8] {
        let at = i * self.stride;
        &block[at..at + usize::from(self.footer.key_bytes)]
    }

    fn decode_entry(&self, bytes: &[u8]) -> IndexEntry {
        let kb = usize::from(self.footer.key_bytes);
        let sb = usize::from(self.footer.size_bytes);

        let size = if sb == 0 {
            0
        } else {
            read_uint_be(&bytes[kb..kb + sb])
        };

        let (offset, archive_index) = match self.kind() {
            IndexKind::FileIndex => (0, None),
            IndexKind::GroupIndex => {
                let archive =
                    u16::from_be_bytes(bytes[kb + sb..kb + sb + 2].try_into().unwrap_or_default());
                let offset = u32::from_be_bytes(
                    bytes[kb + sb + 2..kb + sb + 6].try_into().unwrap_or_default(),
                );
                (u64::from(offset), Some(archive))
            }
            IndexKind::ArchiveIndex => (
                read_uint_be(&bytes[kb + sb..kb + sb + usize::from(self.footer.offset_bytes)]),
                None,
            ),
        };

        IndexEntry {
            key: bytes[..kb].to_vec(),
            size,
            offset,
            archive_index,
        }
    }

    /// Iterate over every entry, in key order per block.
    ///
    /// The iterator is finite and can be restarted by calling this
    /// again. Block digests are verified as each block is entered.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            index: self,
            block_no: 0,
            block: None,
            entry_no: 0,
            failed: false,
        }
    }
}

fn kind_of(footer: &IndexFooter) -> IndexKind {
    match footer.offset_bytes {
        0 => IndexKind::FileIndex,
        6 => IndexKind::GroupIndex,
        _ => IndexKind::ArchiveIndex,
    }
}

/// Iterator over all non-padding entries of an index.
pub struct Entries<'a> {
    index: &'a ArchiveIndex,
    block_no: usize,
    block: Option<&'a [u8]>,
    entry_no: usize,
    failed: bool,
}

impl Iterator for Entries<'_> {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }

            let block = match self.block {
                Some(block) => block,
                None => {
                    if self.block_no >= self.index.num_blocks {
                        return None;
                    }
                    match self.index.block_verified(self.block_no) {
                        Ok(block) => {
                            self.block = Some(block);
                            self.entry_no = 0;
                            block
                        }
                        Err(e) => {
                            self.failed = true;
                            return Some(Err(e));
                        }
                    }
                }
            };

            if self.entry_no >= self.index.entries_per_block {
                self.block = None;
                self.block_no += 1;
                continue;
            }

            let at = self.entry_no * self.index.stride;
            let bytes = &block[at..at + self.index.stride];
            self.entry_no += 1;

            if self.index.entry_key(block, self.entry_no - 1).iter().all(|&b| b == 0) {
                // Padding; the rest of this block is empty.
                self.block = None;
                self.block_no += 1;
                continue;
            }

            return Some(Ok(self.index.decode_entry(bytes)));
        }
    }
}

/// Streams sorted entries into the on-disk index layout.
///
/// Entries must be pushed in ascending key order; the writer slices them
/// into blocks, fills the TOC, and seals the footer.
pub struct IndexWriter {
    key_bytes: u8,
    size_bytes: u8,
    offset_bytes: u8,
    block_size: usize,
    stride: usize,
    out: Vec<u8>,
    block_start: usize,
    block_fill: usize,
    toc_keys: Vec<u8>,
    block_hashes: Vec<u8>,
    last_key: Vec<u8>,
    num_entries: u32,
}

impl IndexWriter {
    /// Create a writer for the given geometry.
    pub fn new(block_size_kb: u8, key_bytes: u8, size_bytes: u8, offset_bytes: u8) -> Self {
        let block_size = usize::from(block_size_kb) << 10;
        Self {
            key_bytes,
            size_bytes,
            offset_bytes,
            block_size,
            stride: usize::from(key_bytes) + usize::from(size_bytes) + usize::from(offset_bytes),
            out: Vec::new(),
            block_start: 0,
            block_fill: 0,
            toc_keys: Vec::new(),
            block_hashes: Vec::new(),
            last_key: Vec::new(),
            num_entries: 0,
        }
    }

    /// Append one entry. `offset_field` is the pre-encoded offset bytes
    /// (empty for file indices).
    pub fn push(&mut self, key: &[u8], size: u64, offset_field: &[u8]) -> Result<()> {
        if key.len() != usize::from(self.key_bytes) {
            return Err(Error::KeyLength {
                expected: usize::from(self.key_bytes),
                actual: key.len(),
            });
        }
        if offset_field.len() != usize::from(self.offset_bytes) {
            return Err(Error::corrupt("index writer", "offset field width"));
        }

        if self.block_fill + self.stride > self.block_size {
            self.seal_block();
        }

        self.out.extend_from_slice(key);
        self.out
            .extend_from_slice(&size.to_be_bytes()[8 - usize::from(self.size_bytes)..]);
        self.out.extend_from_slice(offset_field);
        self.block_fill += self.stride;
        self.last_key = key.to_vec();
        self.num_entries += 1;
        Ok(())
    }

    fn seal_block(&mut self) {
        self.out.resize(self.block_start + self.block_size, 0);
        let digest = md5::compute(&self.out[self.block_start..]).0;
        self.block_hashes.extend_from_slice(&digest[..HASH_BYTES]);
        self.toc_keys.extend_from_slice(&self.last_key);
        self.block_start = self.out.len();
        self.block_fill = 0;
    }

    /// Seal the index. Returns the file bytes and the index's name (the
    /// lowercase hex MD5 of its footer).
    pub fn finish(mut self) -> (Vec<u8>, String) {
        if self.block_fill > 0 {
            self.seal_block();
        }

        self.out.extend_from_slice(&self.toc_keys);
        self.out.extend_from_slice(&self.block_hashes);
        let toc_start = self.block_start;
        let toc_digest = md5::compute(&self.out[toc_start..]).0;

        let mut footer = Vec::with_capacity(FOOTER_LEN);
        footer.extend_from_slice(&toc_digest[..HASH_BYTES]);
        footer.push(1); // format revision
        footer.push(0); // flags0
        footer.push(0); // flags1
        footer.push((self.block_size >> 10) as u8);
        footer.push(self.offset_bytes);
        footer.push(self.size_bytes);
        footer.push(self.key_bytes);
        footer.push(HASH_BYTES as u8);
        footer.extend_from_slice(&self.num_entries.to_le_bytes());
        let footer_digest = md5::compute(&footer).0;
        footer.extend_from_slice(&footer_digest[..HASH_BYTES]);

        let name = hex::encode(md5::compute(&footer).0);
        self.out.extend_from_slice(&footer);
        (self.out, name)
    }
}
