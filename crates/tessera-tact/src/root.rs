//! The root manifest: file data ID (and path hash) → content key.
//!
//! A root blob is a sequence of pages, each sharing one
//! (content flags, locale flags) pair. File IDs inside a page are
//! delta-coded and strictly ascending once decoded; content keys and
//! (for named pages) path hashes follow as parallel arrays. Modern
//! blobs open with the `MFST` magic (stored little-endian, so the bytes
//! read `TSFM`); anything else is the legacy layout, which has no
//! header at all.

use modular_bitfield::{bitfield, prelude::*};
use std::collections::HashMap;
use std::io::{Cursor, ErrorKind, Read, Seek, SeekFrom};
use tracing::{debug, trace};

use crate::ioutils::ReadInt;
use crate::jenkins3::path_hash;
use crate::{Error, MD5_LENGTH, Md5, Result};

/// `MFST` as it appears on disk.
const ROOT_MAGIC: [u8; 4] = *b"TSFM";

/// Header sizes above this are not sizes at all but the first field of
/// the older, pre-counted header form.
const MAX_HEADER_SIZE: u32 = 1000;

/// Union of the shipped game locales.
const ALL_LOCALES: u32 = 0x1FFF6;

/// Bitmask of locales a page applies to.
#[bitfield(bytes = 4)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub struct LocaleFlags {
    #[skip]
    __: B1,
    pub en_us: bool, // 0x2
    pub ko_kr: bool, // 0x4
    #[skip]
    __: B1,
    pub fr_fr: bool, // 0x10
    pub de_de: bool, // 0x20
    pub zh_cn: bool, // 0x40
    pub es_es: bool, // 0x80
    pub zh_tw: bool, // 0x100
    pub en_gb: bool, // 0x200
    pub en_cn: bool, // 0x400
    pub en_tw: bool, // 0x800
    pub es_mx: bool, // 0x1000
    pub ru_ru: bool, // 0x2000
    pub pt_br: bool, // 0x4000
    pub it_it: bool, // 0x8000
    pub pt_pt: bool, // 0x10000
    #[skip]
    __: B15,
}

impl LocaleFlags {
    /// Flags with every locale bit set.
    pub fn any_locale() -> Self {
        Self::from(0xFFFF_FFFF)
    }

    /// `true` if any bit overlaps `other`.
    pub fn overlaps(self, other: Self) -> bool {
        u32::from(self) & u32::from(other) != 0
    }

    /// `true` if any bit overlaps the shipped game locales.
    pub fn overlaps_any_locale(self) -> bool {
        u32::from(self) & ALL_LOCALES != 0
    }

    /// Parse a locale name like `enUS`.
    pub fn from_name(name: &str) -> Option<Self> {
        let bit = match name {
            "enUS" => 0x2,
            "koKR" => 0x4,
            "frFR" => 0x10,
            "deDE" => 0x20,
            "zhCN" => 0x40,
            "esES" => 0x80,
            "zhTW" => 0x100,
            "enGB" => 0x200,
            "enCN" => 0x400,
            "enTW" => 0x800,
            "esMX" => 0x1000,
            "ruRU" => 0x2000,
            "ptBR" => 0x4000,
            "itIT" => 0x8000,
            "ptPT" => 0x10000,
            _ => return None,
        };
        Some(Self::from(bit))
    }
}

/// Content flags on a root page.
#[bitfield(bytes = 4)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub struct ContentFlags {
    #[skip]
    __: B3,
    pub load_on_windows: bool, // 0x8
    pub load_on_macos: bool, // 0x10
    #[skip]
    __: B2,
    pub low_violence: bool, // 0x80
    pub do_not_load: bool, // 0x100
    #[skip]
    __: B2,
    pub update_plugin: bool, // 0x800
    #[skip]
    __: B15,
    pub encrypted: bool, // 0x8000000
    pub no_names: bool, // 0x10000000
    pub uncommon_resolution: bool, // 0x20000000
    pub bundle: bool, // 0x40000000
    pub no_compression: bool, // 0x80000000
}

/// Root header, or its absence.
#[derive(Debug)]
pub struct RootHeader {
    /// `true` for blobs without the `MFST` magic.
    pub legacy: bool,
    pub version: u32,
    pub total_file_count: u32,
    pub named_file_count: u32,
    /// `true` when some pages omit the name-hash array.
    pub allow_unnamed: bool,
}

impl RootHeader {
    fn parse<R: Read + Seek>(f: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        f.read_exact(&mut magic)?;
        if magic != ROOT_MAGIC {
            // Legacy blob: there is no header, pages start at offset 0.
            f.seek_relative(-4)?;
            return Ok(Self {
                legacy: true,
                version: 0,
                total_file_count: 0,
                named_file_count: 0,
                allow_unnamed: false,
            });
        }

        let header_size = f.read_u32le()?;
        let second = f.read_u32le()?;

        if header_size > MAX_HEADER_SIZE {
            // Pre-counted form: the two fields are the file counts and
            // pages follow immediately, version 0 semantics.
            return Ok(Self {
                legacy: false,
                version: 0,
                total_file_count: header_size,
                named_file_count: second,
                allow_unnamed: header_size != second,
            });
        }

        let version = second;
        let total_file_count = f.read_u32le()?;
        let named_file_count = f.read_u32le()?;
        if u64::from(header_size) < f.stream_position()? {
            return Err(Error::corrupt("root", format!("header size {header_size}")));
        }
        f.seek(SeekFrom::Start(u64::from(header_size)))?;

        Ok(Self {
            legacy: false,
            version,
            total_file_count,
            named_file_count,
            allow_unnamed: total_file_count != named_file_count,
        })
    }
}

/// One kept page.
struct RootPage {
    content_flags: ContentFlags,
    locale_flags: LocaleFlags,
    /// Strictly ascending.
    fdids: Vec<u32>,
    ckeys: Vec<Md5>,
    name_hashes: Option<Vec<u64>>,
}

/// One resolved root record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootRecord {
    pub fdid: u32,
    pub ckey: Md5,
    /// 0 for records without a name hash.
    pub name_hash: u64,
    pub content_flags: ContentFlags,
    pub locale_flags: LocaleFlags,
}

/// A parsed root manifest, filtered to one locale.
pub struct Root {
    header: RootHeader,
    pages: Vec<RootPage>,
    /// Name hash → (page, index), built eagerly at load time.
    name_map: HashMap<u64, (usize, usize)>,
}

impl Root {
    /// Parse a root blob, keeping only pages relevant to `locale`.
    pub fn parse(data: &[u8], locale: LocaleFlags) -> Result<Self> {
        let mut f = Cursor::new(data);
        let header = RootHeader::parse(&mut f)?;
        trace!(?header, "parsing root");

        let mut pages = Vec::new();
        loop {
            match Self::parse_page(&mut f, &header, locale) {
                Ok(Some(page)) => pages.push(page),
                Ok(None) => {}
                Err(Error::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }

        let mut name_map = HashMap::new();
        for (page_no, page) in pages.iter().enumerate() {
            if let Some(hashes) = &page.name_hashes {
                for (i, &hash) in hashes.iter().enumerate() {
                    name_map.entry(hash).or_insert((page_no, i));
                }
            }
        }

        debug!(
            "root: kept {} pages, {} named records",
            pages.len(),
            name_map.len()
        );

        Ok(Self {
            header,
            pages,
            name_map,
        })
    }

    /// Parse one page; `Ok(None)` means the page was empty or filtered.
    fn parse_page<R: Read + Seek>(
        f: &mut R,
        header: &RootHeader,
        only_locale: LocaleFlags,
    ) -> Result<Option<RootPage>> {
        let record_count = f.read_u32le()? as usize;

        let (content_flags, locale_flags) = if header.version == 2 {
            let locale = LocaleFlags::from(f.read_u32le()?);
            let unk1 = f.read_u32le()?;
            let unk2 = f.read_u32le()?;
            let unk3 = f.read_u8()?;
            let content = ContentFlags::from(unk1 | unk2 | (u32::from(unk3) << 17));
            (content, locale)
        } else {
            let content = ContentFlags::from(f.read_u32le()?);
            let locale = LocaleFlags::from(f.read_u32le()?);
            let _reserved = (f.read_u32le()?, f.read_u32le()?);
            (content, locale)
        };

        if record_count == 0 {
            return Ok(None);
        }

        let has_names =
            header.legacy || !(header.allow_unnamed && content_flags.no_names());

        // Pages for other locales are dropped here, except the
        // format-sentinel pages outside the shipped-locale mask, which
        // are always kept. Low-violence variants are never kept.
        let keep = (locale_flags.overlaps(only_locale) || !locale_flags.overlaps_any_locale())
            && !content_flags.low_violence();
        if !keep {
            let record_len = 4 + MD5_LENGTH + if has_names { 8 } else { 0 };
            f.seek_relative((record_count * record_len) as i64)?;
            return Ok(None);
        }

        // Delta-coded file IDs: each entry is previous + delta + 1,
        // which makes the decoded sequence strictly ascending.
        let mut fdids = Vec::with_capacity(record_count);
        let mut fdid = 0u32;
        for i in 0..record_count {
            let delta = f.read_u32le()?;
            fdid = if i == 0 {
                delta
            } else {
                fdid
                    .checked_add(delta)
                    .and_then(|v| v.checked_add(1))
                    .ok_or(Error::FileIdOverflow)?
            };
            fdids.push(fdid);
        }

        let mut ckeys = Vec::with_capacity(record_count);
        for _ in 0..record_count {
            let mut ckey = [0u8; MD5_LENGTH];
            f.read_exact(&mut ckey)?;
            ckeys.push(ckey);
        }

        let name_hashes = if has_names {
            let mut hashes = Vec::with_capacity(record_count);
            for _ in 0..record_count {
                hashes.push(f.read_u64le()?);
            }
            Some(hashes)
        } else {
            None
        };

        Ok(Some(RootPage {
            content_flags,
            locale_flags,
            fdids,
            ckeys,
            name_hashes,
        }))
    }

    /// The parsed header.
    pub fn header(&self) -> &RootHeader {
        &self.header
    }

    /// Number of kept records.
    pub fn record_count(&self) -> usize {
        self.pages.iter().map(|p| p.fdids.len()).sum()
    }

    /// Find a record by file data ID.
    ///
    /// Page ID ranges may interleave, so every kept page is consulted;
    /// inside a page the IDs are strictly ascending and binary-searched.
    pub fn find_file_data_id(&self, fdid: u32) -> Option<RootRecord> {
        for (page_no, page) in self.pages.iter().enumerate() {
            if let Ok(i) = page.fdids.binary_search(&fdid) {
                return Some(self.record(page_no, i));
            }
        }
        None
    }

    /// Find a record by name hash. O(1) through the eager map.
    pub fn find_name_hash(&self, hash: u64) -> Option<RootRecord> {
        let &(page_no, i) = self.name_map.get(&hash)?;
        Some(self.record(page_no, i))
    }

    /// Find a record by file path.
    pub fn find_path(&self, path: &str) -> Option<RootRecord> {
        self.find_name_hash(path_hash(path))
    }

    fn record(&self, page_no: usize, i: usize) -> RootRecord {
        let page = &self.pages[page_no];
        RootRecord {
            fdid: page.fdids[i],
            ckey: page.ckeys[i],
            name_hash: page
                .name_hashes
                .as_ref()
                .map(|h| h[i])
                .unwrap_or_default(),
            content_flags: page.content_flags,
            locale_flags: page.locale_flags,
        }
    }
}
