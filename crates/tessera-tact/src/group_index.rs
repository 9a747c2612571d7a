//! Builds a group index: the merge of every per-archive index of a
//! build into one searchable index keyed by encoding key.
//!
//! Per-archive indices are enumerated in parallel, tagged with their
//! position in the configuration's archive list, merged, stable-sorted,
//! and written out in the standard index layout (offset field: archive
//! number + offset). The output file is named after the MD5 of its own
//! footer and written atomically.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing::{debug, info};

use crate::archive::{ArchiveIndex, IndexWriter};
use crate::{Error, MD5_LENGTH, Result};

/// Geometry of emitted group indices.
const BLOCK_SIZE_KB: u8 = 4;
const SIZE_BYTES: u8 = 4;
const OFFSET_BYTES: u8 = 6;

struct MergedEntry {
    key: [u8; MD5_LENGTH],
    size: u32,
    archive_index: u16,
    offset: u32,
}

/// Merge the given per-archive indices (in archive order) into a group
/// index file under `out_dir`.
///
/// When `expected_name` is given and the generated index hashes to a
/// different name, the build fails with a checksum mismatch. Returns the
/// written path and the index name. Building is deterministic: the same
/// inputs produce byte-identical output.
pub fn build_group_index(
    index_paths: &[PathBuf],
    expected_name: Option<&str>,
    out_dir: &Path,
) -> Result<(PathBuf, String)> {
    let merged = enumerate_all(index_paths)?;
    debug!(
        "merged {} entries from {} archive indices",
        merged.len(),
        index_paths.len()
    );

    let mut writer = IndexWriter::new(BLOCK_SIZE_KB, MD5_LENGTH as u8, SIZE_BYTES, OFFSET_BYTES);
    let mut offset_field = [0u8; OFFSET_BYTES as usize];
    for entry in &merged {
        offset_field[..2].copy_from_slice(&entry.archive_index.to_be_bytes());
        offset_field[2..].copy_from_slice(&entry.offset.to_be_bytes());
        writer.push(&entry.key, u64::from(entry.size), &offset_field)?;
    }
    let (bytes, name) = writer.finish();

    if let Some(expected) = expected_name {
        if !expected.eq_ignore_ascii_case(&name) {
            return Err(Error::GroupIndexNameMismatch {
                expected: expected.to_ascii_lowercase(),
                actual: name,
            });
        }
    }

    let path = out_dir.join(format!("{name}.index"));
    let tmp = tempfile::NamedTempFile::new_in(out_dir)?;
    std::fs::write(tmp.path(), &bytes)?;
    tmp.persist(&path)
        .map_err(|e| Error::Io(e.error))?;

    info!("group index {name} written ({} entries)", merged.len());
    Ok((path, name))
}

/// Enumerate every archive index in parallel and return the combined
/// entries, sorted ascending by key.
///
/// Workers pull archives off a shared counter and push their private
/// vectors into one mutex-guarded accumulator; the accumulator is
/// reassembled in archive order before sorting, so scheduling cannot
/// affect the result.
fn enumerate_all(index_paths: &[PathBuf]) -> Result<Vec<MergedEntry>> {
    let workers = thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
        .min(index_paths.len().max(1));

    let next = AtomicUsize::new(0);
    let collected: Mutex<Vec<(usize, Vec<MergedEntry>)>> = Mutex::new(Vec::new());
    let failure: Mutex<Option<Error>> = Mutex::new(None);

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if failure.lock().is_some() {
                    return;
                }
                let archive_index = next.fetch_add(1, Ordering::Relaxed);
                let Some(path) = index_paths.get(archive_index) else {
                    return;
                };

                match enumerate_one(path, archive_index as u16) {
                    Ok(entries) => collected.lock().push((archive_index, entries)),
                    Err(e) => {
                        let mut failure = failure.lock();
                        if failure.is_none() {
                            *failure = Some(e);
                        }
                        return;
                    }
                }
            });
        }
    });

    if let Some(e) = failure.into_inner() {
        return Err(e);
    }

    let mut per_archive = collected.into_inner();
    per_archive.sort_by_key(|(i, _)| *i);

    let mut merged: Vec<MergedEntry> = per_archive
        .into_iter()
        .flat_map(|(_, entries)| entries)
        .collect();
    merged.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(merged)
}

fn enumerate_one(path: &Path, archive_index: u16) -> Result<Vec<MergedEntry>> {
    let index = ArchiveIndex::open(path)?;
    if usize::from(index.footer().key_bytes) != MD5_LENGTH {
        return Err(Error::corrupt(
            "archive index",
            format!("group merge needs 16-byte keys, found {}", index.footer().key_bytes),
        ));
    }

    let mut entries = Vec::with_capacity(index.len());
    for entry in index.entries() {
        let entry = entry?;
        let mut key = [0u8; MD5_LENGTH];
        key.copy_from_slice(&entry.key);
        entries.push(MergedEntry {
            key,
            size: entry.size as u32,
            archive_index,
            offset: entry.offset as u32,
        });
    }
    Ok(entries)
}
