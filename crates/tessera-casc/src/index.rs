//! Parser for `.idx` bucket index files.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

use crate::error::{CascError, Result};

/// Width of the truncated keys stored in bucket indices.
pub const IDX_KEY_LEN: usize = 9;

/// One entry of a bucket index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdxEntry {
    /// Archive number (`data.NNN`).
    pub archive_id: u16,
    /// Offset of the blob within the archive.
    pub offset: u64,
    /// Encoded size of the blob.
    pub size: u32,
}

/// A parsed bucket index.
pub struct IdxFile {
    bucket: u8,
    entries: BTreeMap<[u8; IDX_KEY_LEN], IdxEntry>,
}

impl IdxFile {
    /// Parse a `.idx` file from disk.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::parse(&mut reader)
    }

    /// Parse a `.idx` file from a reader.
    pub fn parse<R: Read + Seek>(f: &mut R) -> Result<Self> {
        // Header block: its own size/hash pair, then the field widths.
        let header_size = f.read_u32::<LittleEndian>()?;
        let _header_hash = f.read_u32::<LittleEndian>()?;

        let version = f.read_u16::<LittleEndian>()?;
        if version != 7 {
            return Err(CascError::InvalidIndex(format!("version {version}")));
        }
        let bucket = f.read_u8()?;
        let _unused = f.read_u8()?;
        let length_bytes = f.read_u8()?;
        let location_bytes = f.read_u8()?;
        let key_bytes = f.read_u8()?;
        let _segment_bits = f.read_u8()?;

        if (key_bytes as usize, location_bytes, length_bytes) != (IDX_KEY_LEN, 5, 4) {
            return Err(CascError::InvalidIndex(format!(
                "field widths key={key_bytes} location={location_bytes} length={length_bytes}"
            )));
        }

        // The header block may carry a segment table we have no use for.
        let table_len = header_size.saturating_sub(8);
        f.seek(SeekFrom::Current(i64::from(table_len)))?;

        // Pad to a 16-byte boundary before the entry block.
        let pos = f.stream_position()?;
        let padding = (16 - (pos % 16)) % 16;
        f.seek(SeekFrom::Current(padding as i64))?;

        let entries_size = f.read_u32::<LittleEndian>()?;
        let _entries_hash = f.read_u32::<LittleEndian>()?;
        let entry_len = u32::from(key_bytes) + u32::from(location_bytes) + u32::from(length_bytes);
        let count = entries_size / entry_len;

        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let mut key = [0u8; IDX_KEY_LEN];
            f.read_exact(&mut key)?;

            // The location field packs archive and offset: one high byte
            // plus a 30-bit offset word with the archive's low two bits
            // riding on top.
            let high = f.read_u8()?;
            let low = f.read_u32::<BigEndian>()?;
            let archive_id = (u16::from(high) << 2) | (low >> 30) as u16;
            let offset = u64::from(low & 0x3FFF_FFFF);

            let size = f.read_u32::<LittleEndian>()?;

            entries.insert(
                key,
                IdxEntry {
                    archive_id,
                    offset,
                    size,
                },
            );
        }

        debug!("bucket {bucket:02x}: {} index entries", entries.len());
        Ok(Self { bucket, entries })
    }

    /// The bucket this index covers.
    pub fn bucket(&self) -> u8 {
        self.bucket
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an encoding key (at least 9 bytes; extra bytes ignored).
    pub fn lookup(&self, ekey: &[u8]) -> Option<IdxEntry> {
        let key: [u8; IDX_KEY_LEN] = ekey.get(..IDX_KEY_LEN)?.try_into().ok()?;
        self.entries.get(&key).copied()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::IDX_KEY_LEN;

    /// Serialise a minimal `.idx` file.
    pub fn write_idx(bucket: u8, entries: &[([u8; IDX_KEY_LEN], u16, u32, u32)]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&8u32.to_le_bytes()); // header size, no segment table
        data.extend_from_slice(&0u32.to_le_bytes()); // header hash
        data.extend_from_slice(&7u16.to_le_bytes()); // version
        data.push(bucket);
        data.push(0);
        data.push(4); // length field
        data.push(5); // location field
        data.push(9); // key field
        data.push(30); // segment bits
        // 16 bytes so far, already aligned.
        data.extend_from_slice(&((entries.len() * 18) as u32).to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        for (key, archive, offset, size) in entries {
            data.extend_from_slice(key);
            data.push((archive >> 2) as u8);
            data.extend_from_slice(&(((u32::from(*archive) & 0x3) << 30) | offset).to_be_bytes());
            data.extend_from_slice(&size.to_le_bytes());
        }
        data
    }
}
