//! BLTE header and chunk-table parsing.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;
use tracing::trace;

use crate::{BLTE_MAGIC, Error, MD5_LENGTH, Md5, Result};

/// Chunk table format carrying one 24-byte record per chunk.
const TABLE_FORMAT: u8 = 0x0F;

/// Size of one chunk-table record.
const CHUNK_RECORD_LEN: u32 = 4 + 4 + MD5_LENGTH as u32;

/// Parsed BLTE header.
///
/// When `chunks` is empty the blob is a single unframed chunk whose
/// decoded size is only known to the caller.
#[derive(Debug, Clone)]
pub struct BlteHeader {
    /// Length of the header in bytes; chunk data starts here.
    header_size: u32,
    /// Per-chunk records, in file order. Empty for unframed blobs.
    chunks: Vec<ChunkInfo>,
}

/// One record of the chunk table.
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    /// Encoded chunk size, including the mode byte.
    pub encoded_size: u32,
    /// Decoded chunk size.
    pub decoded_size: u32,
    /// MD5 of the encoded chunk, including the mode byte.
    pub checksum: Md5,
}

impl BlteHeader {
    /// Parse a BLTE header from the start of a blob.
    pub fn parse<R: Read>(f: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        f.read_exact(&mut magic)?;
        if magic != BLTE_MAGIC {
            return Err(Error::InvalidMagic(magic));
        }

        let header_size = f.read_u32::<BigEndian>()?;
        if header_size == 0 {
            // Unframed single chunk; data follows immediately.
            return Ok(Self {
                header_size: 8,
                chunks: Vec::new(),
            });
        }

        let table_format = f.read_u8()?;
        if table_format != TABLE_FORMAT {
            return Err(Error::UnsupportedTableFormat(table_format));
        }
        let chunk_count = f.read_u24::<BigEndian>()?;
        trace!("chunk table: {chunk_count} chunks");

        // magic + headerSize + flags + count + records
        if header_size != 8 + 4 + chunk_count * CHUNK_RECORD_LEN {
            return Err(Error::InvalidHeaderSize(header_size));
        }

        let mut chunks = Vec::with_capacity(chunk_count as usize);
        for _ in 0..chunk_count {
            let encoded_size = f.read_u32::<BigEndian>()?;
            let decoded_size = f.read_u32::<BigEndian>()?;
            let mut checksum = [0u8; MD5_LENGTH];
            f.read_exact(&mut checksum)?;
            chunks.push(ChunkInfo {
                encoded_size,
                decoded_size,
                checksum,
            });
        }

        Ok(Self {
            header_size,
            chunks,
        })
    }

    /// Offset of the first chunk's data.
    pub fn data_offset(&self) -> usize {
        self.header_size as usize
    }

    /// `true` when the blob has no chunk table.
    pub fn is_unframed(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunk-table records, in file order.
    pub fn chunks(&self) -> &[ChunkInfo] {
        &self.chunks
    }

    /// Sum of the table's decoded chunk sizes, 0 when unframed.
    pub fn total_decoded_size(&self) -> u64 {
        self.chunks.iter().map(|c| u64::from(c.decoded_size)).sum()
    }
}
