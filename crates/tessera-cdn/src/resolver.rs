//! The resource resolver: encoding key (or file name) → verified bytes.
//!
//! Sources are consulted in fixed precedence: the local game
//! installation, the disk cache, then the mirror pool. Downloads are
//! written to a temporary file in the destination directory and
//! renamed into place, so a partial file is never observable; a
//! process-wide per-path mutex makes concurrent requests for the same
//! object cost one network fetch.

use dashmap::DashMap;
use futures_util::StreamExt;
use memmap2::Mmap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use tessera_casc::LocalStorage;

use crate::cache::DiskCache;
use crate::pool::MirrorPool;
use crate::{CdnError, Result};

/// Default deadline for one remote fetch, body included.
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// What kind of object is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Build/CDN configuration files.
    Config,
    /// Content blobs and archives.
    Data,
    /// Archive index sidecars.
    Index,
}

impl ResourceKind {
    /// Remote directory component on the mirrors.
    fn remote_dir(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Data | Self::Index => "data",
        }
    }

    /// Suffix appended to the remote object name.
    fn remote_suffix(self) -> &'static str {
        match self {
            Self::Index => ".index",
            _ => "",
        }
    }
}

/// A handle to a byte range, possibly inside a larger archive file.
///
/// The resource does not own its backing file; [`read`](Self::read)
/// maps it for the duration of that one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Backing file.
    pub path: PathBuf,
    /// Start of the range within the file.
    pub offset: u64,
    /// Length of the range; 0 means "to the end of the file".
    pub length: u64,
    /// Whether the resource was found anywhere. Empty resources are
    /// how "missing" is reported.
    pub exists: bool,
}

impl Resource {
    fn missing(path: PathBuf) -> Self {
        Self {
            path,
            offset: 0,
            length: 0,
            exists: false,
        }
    }

    fn whole_file(path: PathBuf, length: u64) -> Self {
        Self {
            path,
            offset: 0,
            length,
            exists: true,
        }
    }

    /// Read the resource's bytes.
    ///
    /// Missing resources read as empty. The backing file is
    /// memory-mapped only for the duration of this call.
    pub fn read(&self) -> std::io::Result<Vec<u8>> {
        if !self.exists {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Vec::new());
        }
        let map = unsafe { Mmap::map(&file)? };

        let start = self.offset as usize;
        let end = if self.length == 0 {
            map.len()
        } else {
            start + self.length as usize
        };
        if start > end || end > map.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("range {start}..{end} outside {} bytes", map.len()),
            ));
        }

        Ok(map[start..end].to_vec())
    }
}

/// Resolves objects through local storage, the disk cache, and the
/// mirror pool.
pub struct Resolver {
    cache: DiskCache,
    pool: Arc<MirrorPool>,
    local: Option<LocalStorage>,
    fetch_timeout: Duration,
    /// One download at a time per cache path.
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl Resolver {
    /// Create a resolver for one (product, cache directory) pair.
    pub fn new(
        cache_root: &Path,
        product: &str,
        pool: Arc<MirrorPool>,
        local: Option<LocalStorage>,
    ) -> Result<Self> {
        Ok(Self {
            cache: DiskCache::new(cache_root, product)?,
            pool,
            local,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            locks: DashMap::new(),
        })
    }

    /// Override the per-fetch deadline.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// The product's cache tree.
    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// Fetch a configuration file.
    pub async fn fetch_config(&self, hash: &str) -> Result<Resource> {
        self.fetch(ResourceKind::Config, hash, hash, None, 0, false)
            .await
    }

    /// Fetch an index sidecar into `<cache>/<product>/<name>.index`.
    pub async fn fetch_index(&self, name: &str, expected_len: u64) -> Result<Resource> {
        self.fetch(ResourceKind::Index, name, name, None, expected_len, false)
            .await
    }

    /// Fetch a standalone blob by encoding key.
    pub async fn fetch_data(
        &self,
        ekey_hex: &str,
        expected_len: u64,
        validate: bool,
    ) -> Result<Resource> {
        self.fetch(ResourceKind::Data, ekey_hex, ekey_hex, None, expected_len, validate)
            .await
    }

    /// Fetch a blob that lives inside an archive, by range request
    /// against the archive. The blob is cached under its own key.
    pub async fn fetch_archive_range(
        &self,
        ekey_hex: &str,
        archive_hex: &str,
        offset: u64,
        length: u64,
    ) -> Result<Resource> {
        self.fetch(
            ResourceKind::Data,
            ekey_hex,
            archive_hex,
            Some((offset, length)),
            length,
            false,
        )
        .await
    }

    async fn fetch(
        &self,
        kind: ResourceKind,
        name: &str,
        remote_name: &str,
        range: Option<(u64, u64)>,
        expected_len: u64,
        validate: bool,
    ) -> Result<Resource> {
        // 1. Local installation, for data requests with an encoding key.
        if kind == ResourceKind::Data {
            if let (Some(local), Ok(ekey)) = (&self.local, hex::decode(name)) {
                if let Some(location) = local.find(&ekey) {
                    trace!("{name}: local storage hit");
                    return Ok(Resource {
                        path: location.data_file,
                        offset: location.offset,
                        length: u64::from(location.size),
                        exists: true,
                    });
                }
            }
        }

        // 2. Disk cache.
        let cache_path = match kind {
            ResourceKind::Index => self.cache.index_path(name),
            _ => self.cache.object_path(kind.remote_dir(), name),
        };
        if let Some(resource) = self.check_cached(&cache_path, expected_len, validate, name) {
            trace!("{name}: cache hit");
            return Ok(resource);
        }

        // 3. Remote, serialised per cache path so concurrent requests
        // for the same object download it once.
        let lock = {
            let entry = self.locks.entry(cache_path.clone()).or_default();
            Arc::clone(&entry)
        };
        let _guard = lock.lock().await;

        // A racing request may have finished the download while this
        // one waited on the lock.
        if let Some(resource) = self.check_cached(&cache_path, expected_len, validate, name) {
            return Ok(resource);
        }

        let remote_path = format!(
            "{}/{}/{}/{}{}",
            kind.remote_dir(),
            &remote_name[..2],
            &remote_name[2..4],
            remote_name,
            kind.remote_suffix(),
        );

        let download = self.download(&remote_path, &cache_path, range, expected_len, validate, name);
        tokio::time::timeout(self.fetch_timeout, download)
            .await
            .map_err(|_| CdnError::Timeout(format!("fetching {remote_path}")))?
    }

    /// Download into the cache path, checking length and digest before
    /// the file becomes visible.
    async fn download(
        &self,
        remote_path: &str,
        cache_path: &Path,
        range: Option<(u64, u64)>,
        expected_len: u64,
        validate: bool,
        name: &str,
    ) -> Result<Resource> {
        let response = match range {
            Some((offset, length)) => self.pool.download_range(remote_path, offset, length).await?,
            None => self.pool.download(remote_path, expected_len).await?,
        };
        let Some(response) = response else {
            debug!("{remote_path}: all mirrors exhausted");
            return Ok(Resource::missing(cache_path.to_path_buf()));
        };

        let parent = cache_path
            .parent()
            .ok_or_else(|| CdnError::Io(std::io::Error::other("cache path has no parent")))?;
        std::fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            tmp.as_file_mut().write_all(&chunk)?;
            written += chunk.len() as u64;
        }

        if expected_len > 0 && written != expected_len {
            return Err(CdnError::LengthMismatch {
                expected: expected_len,
                actual: written,
            });
        }
        if validate {
            verify_digest(tmp.path(), name)?;
        }

        // The temp file lives in the destination directory, so this
        // rename is atomic and a partial file is never visible.
        tmp.persist(cache_path).map_err(|e| CdnError::Io(e.error))?;
        debug!("{remote_path}: cached {written} bytes");
        Ok(Resource::whole_file(cache_path.to_path_buf(), written))
    }

    /// Use the cached file if it exists and passes the length (and,
    /// when requested, digest) checks; delete it otherwise.
    fn check_cached(
        &self,
        path: &Path,
        expected_len: u64,
        validate: bool,
        name: &str,
    ) -> Option<Resource> {
        let metadata = std::fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }

        if expected_len != 0 && metadata.len() != expected_len {
            warn!(
                "stale cache file {} ({} bytes, expected {expected_len})",
                path.display(),
                metadata.len()
            );
            let _ = std::fs::remove_file(path);
            return None;
        }

        if validate {
            if let Err(e) = verify_digest(path, name) {
                warn!("corrupt cache file {}: {e}", path.display());
                let _ = std::fs::remove_file(path);
                return None;
            }
        }

        Some(Resource::whole_file(path.to_path_buf(), metadata.len()))
    }
}

/// Compare a file's MD5 against its hex name.
fn verify_digest(path: &Path, expected_hex: &str) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let actual = hex::encode(md5::compute(&bytes).0);
    if actual.eq_ignore_ascii_case(expected_hex) {
        Ok(())
    } else {
        Err(CdnError::ChecksumMismatch {
            expected: expected_hex.to_ascii_lowercase(),
            actual,
        })
    }
}
