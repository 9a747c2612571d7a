//! A session over one build of one product.
//!
//! Opening a session performs the fixed bootstrap sequence: discover
//! the build and CDN configuration, rank the mirrors, obtain the group
//! and file indices, then the encoding table, the root manifest, and
//! the install manifest — each step failing fast. After that, files
//! are resolved by data ID, content key, encoding key or path.

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;
use tracing::{debug, info, warn};

use tessera_blte as blte;
use tessera_casc::LocalStorage;
use tessera_cdn::{MirrorPool, PatchServer, Region, Resolver, Resource};
use tessera_crypto::KeyService;
use tessera_tact::archive::ArchiveIndex;
use tessera_tact::config::ConfigFile;
use tessera_tact::encoding::Encoding;
use tessera_tact::group_index::build_group_index;
use tessera_tact::install::InstallManifest;
use tessera_tact::root::{LocaleFlags, Root};
use tessera_tact::Md5;

use crate::{ClientError, Result};

/// Everything needed to open a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub product: String,
    pub region: Region,
    pub locale: LocaleFlags,
    pub cache_dir: PathBuf,
    /// Local game installation to read before going to the network.
    pub base_dir: Option<PathBuf>,
    /// Build configuration hash; discovered from the version service
    /// when absent.
    pub build_config: Option<String>,
    /// CDN configuration hash; discovered when absent.
    pub cdn_config: Option<String>,
    /// Patch service base URL override (the well-known endpoint for
    /// the region otherwise).
    pub patch_base: Option<String>,
    /// Optional file of chunk-encryption keys.
    pub key_file: Option<PathBuf>,
}

impl SessionOptions {
    pub fn new(product: impl Into<String>, region: Region, locale: LocaleFlags) -> Self {
        Self {
            product: product.into(),
            region,
            locale,
            cache_dir: PathBuf::from("cache"),
            base_dir: None,
            build_config: None,
            cdn_config: None,
            patch_base: None,
            key_file: None,
        }
    }
}

/// An open build.
pub struct Session {
    resolver: Resolver,
    /// Archive hashes in configuration order; positions match the
    /// group index's archive numbers.
    archives: Vec<String>,
    group_index: ArchiveIndex,
    file_index: ArchiveIndex,
    encoding: Encoding,
    root: Root,
    install: InstallManifest,
    keys: KeyService,
}

impl Session {
    /// Open a build.
    pub async fn open(options: SessionOptions) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(tessera_cdn::CdnError::Http)?;

        let patch = match &options.patch_base {
            Some(base) => PatchServer::with_base(client.clone(), base.clone()),
            None => PatchServer::new(client.clone(), options.region),
        };

        // Configuration hashes: explicit overrides, or the version
        // service's row for our region.
        let (build_hash, cdn_hash) = match (&options.build_config, &options.cdn_config) {
            (Some(build), Some(cdn)) => (build.clone(), cdn.clone()),
            _ => {
                let version = patch.version_for(&options.product, options.region).await?;
                info!(
                    "{} {}: build {}, cdn {}",
                    options.product, options.region, version.build_config, version.cdn_config
                );
                (
                    options.build_config.clone().unwrap_or(version.build_config),
                    options.cdn_config.clone().unwrap_or(version.cdn_config),
                )
            }
        };

        let cdns = patch.cdns_for(&options.product, options.region).await?;
        let pool = Arc::new(MirrorPool::from_cdns_entry(client, &cdns).await);

        let local = match &options.base_dir {
            Some(base) => match LocalStorage::open(base) {
                Ok(local) => Some(local),
                Err(e) => {
                    warn!("ignoring local storage at {}: {e}", base.display());
                    None
                }
            },
            None => None,
        };

        let resolver = Resolver::new(&options.cache_dir, &options.product, pool, local)?;

        let build_config = read_config(&resolver, &build_hash).await?;
        let cdn_config = read_config(&resolver, &cdn_hash).await?;

        let mut keys = KeyService::new();
        if let Some(path) = &options.key_file {
            keys.load_key_file(path)?;
        }

        let archives: Vec<String> = cdn_config
            .values("archives")
            .unwrap_or_default()
            .to_vec();

        // 1. Group index: resolve the published one, or merge the
        // per-archive indices ourselves.
        let group_index = open_group_index(&resolver, &cdn_config, &archives).await?;

        // 2. File index, for blobs stored outside the archives.
        let file_index_hash = cdn_config
            .first("file-index")
            .ok_or(ClientError::MissingConfigKey("file-index"))?;
        let resource = resolver.fetch_index(file_index_hash, 0).await?;
        if !resource.exists {
            return Err(ClientError::MissingResource(format!(
                "{file_index_hash}.index"
            )));
        }
        let file_index = ArchiveIndex::open(&resource.path)?;

        // 3. Encoding table, named by its encoding key so it can be
        // fetched before any table exists.
        let encoding_ekey = build_config
            .value("encoding", 1)
            .ok_or(ClientError::MissingConfigKey("encoding"))?
            .to_string();
        let decoded_size = build_config
            .size("encoding-size", 0)
            .ok_or(ClientError::MissingConfigKey("encoding-size"))?;
        let encoded_size = build_config.size("encoding-size", 1).unwrap_or(0);

        let resource = fetch_by_ekey(
            &resolver,
            &group_index,
            &file_index,
            &archives,
            &encoding_ekey,
            encoded_size,
        )
        .await?;
        if !resource.exists {
            return Err(ClientError::MissingResource("encoding".into()));
        }
        let encoding = Encoding::parse(blte::decode(&resource.read()?, decoded_size, Some(&keys))?)?;
        debug!("encoding table open");

        // 4 & 5. Root and install, named by content key.
        let root_ckey = build_config
            .first("root")
            .ok_or(ClientError::MissingConfigKey("root"))?;
        let root_bytes = decode_by_ckey(
            &resolver,
            &group_index,
            &file_index,
            &archives,
            &encoding,
            &keys,
            &decode_hex16(root_ckey)?,
        )
        .await?
        .ok_or_else(|| ClientError::MissingResource("root".into()))?;
        let root = Root::parse(&root_bytes, options.locale)?;
        debug!("root open: {} records", root.record_count());

        let install_ckey = build_config
            .first("install")
            .ok_or(ClientError::MissingConfigKey("install"))?;
        let install_bytes = decode_by_ckey(
            &resolver,
            &group_index,
            &file_index,
            &archives,
            &encoding,
            &keys,
            &decode_hex16(install_ckey)?,
        )
        .await?
        .ok_or_else(|| ClientError::MissingResource("install".into()))?;
        let install = InstallManifest::parse(&install_bytes)?;
        debug!("install open: {} entries", install.entries.len());

        Ok(Self {
            resolver,
            archives,
            group_index,
            file_index,
            encoding,
            root,
            install,
            keys,
        })
    }

    /// The install manifest of this build.
    pub fn install(&self) -> &InstallManifest {
        &self.install
    }

    /// The root manifest of this build.
    pub fn root(&self) -> &Root {
        &self.root
    }

    /// Decoded bytes of a file, by its data ID.
    pub async fn file_by_fdid(&self, fdid: u32) -> Result<Option<Vec<u8>>> {
        match self.root.find_file_data_id(fdid) {
            Some(record) => self.file_by_ckey(&record.ckey).await,
            None => Ok(None),
        }
    }

    /// Decoded bytes of a file, by its path. Consults the root's name
    /// hashes first and the install manifest second.
    pub async fn file_by_name(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if let Some(record) = self.root.find_path(name) {
            return self.file_by_ckey(&record.ckey).await;
        }
        match self.install.find(name) {
            Some(entry) => {
                let ckey = entry.ckey;
                self.file_by_ckey(&ckey).await
            }
            None => Ok(None),
        }
    }

    /// Decoded bytes of a file, by content key.
    ///
    /// Alternate encodings are tried in order; an encoding whose
    /// decryption key is missing is skipped rather than fatal.
    pub async fn file_by_ckey(&self, ckey: &Md5) -> Result<Option<Vec<u8>>> {
        decode_by_ckey(
            &self.resolver,
            &self.group_index,
            &self.file_index,
            &self.archives,
            &self.encoding,
            &self.keys,
            ckey,
        )
        .await
    }

    /// Decoded bytes of a blob, by encoding key.
    pub async fn file_by_ekey(&self, ekey_hex: &str) -> Result<Option<Vec<u8>>> {
        let ekey = decode_hex16(ekey_hex)?;
        let size_hint = self
            .encoding
            .find_espec(&ekey)
            .map(|e| e.encoded_size)
            .unwrap_or(0);

        let resource = self.fetch_encoded(ekey_hex, size_hint).await?;
        if !resource.exists {
            return Ok(None);
        }
        Ok(Some(blte::decode(
            &resource.read()?,
            0,
            Some(&self.keys),
        )?))
    }

    /// Decoded bytes of a file, by the hex form of its content key.
    pub async fn file_by_ckey_hex(&self, ckey_hex: &str) -> Result<Option<Vec<u8>>> {
        let ckey = decode_hex16(ckey_hex)?;
        self.file_by_ckey(&ckey).await
    }

    /// Encoded (still BLTE-wrapped) bytes for an encoding key.
    async fn fetch_encoded(&self, ekey_hex: &str, size_hint: u64) -> Result<Resource> {
        fetch_by_ekey(
            &self.resolver,
            &self.group_index,
            &self.file_index,
            &self.archives,
            ekey_hex,
            size_hint,
        )
        .await
    }
}

/// Resolve a content key to decoded bytes through the encoding table,
/// trying each alternate encoding until one decodes. A missing
/// decryption key moves on to the next encoding and is only surfaced
/// when no encoding worked.
#[allow(clippy::too_many_arguments)]
async fn decode_by_ckey(
    resolver: &Resolver,
    group_index: &ArchiveIndex,
    file_index: &ArchiveIndex,
    archives: &[String],
    encoding: &Encoding,
    keys: &KeyService,
    ckey: &Md5,
) -> Result<Option<Vec<u8>>> {
    let Some(entry) = encoding.find_by_ckey(ckey) else {
        return Ok(None);
    };

    let mut last_missing_key = None;
    for ekey in &entry.ekeys {
        let ekey_hex = hex::encode(ekey);
        let resource = fetch_by_ekey(resolver, group_index, file_index, archives, &ekey_hex, 0)
            .await?;
        if !resource.exists {
            continue;
        }
        match blte::decode(&resource.read()?, entry.decoded_size, Some(keys)) {
            Ok(bytes) => return Ok(Some(bytes)),
            Err(e) if e.is_missing_key() => {
                warn!("encoding {ekey_hex} needs an absent key, trying the next one");
                last_missing_key = Some(e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    match last_missing_key {
        Some(e) => Err(e.into()),
        None => Ok(None),
    }
}

/// Fetch an encoded blob: archived (group index), standalone
/// (file index), or by a bare whole-file request as the last resort.
async fn fetch_by_ekey(
    resolver: &Resolver,
    group_index: &ArchiveIndex,
    file_index: &ArchiveIndex,
    archives: &[String],
    ekey_hex: &str,
    size_hint: u64,
) -> Result<Resource> {
    let ekey = decode_hex16(ekey_hex)?;

    if let Some(entry) = group_index.lookup(&ekey)? {
        if let Some(archive_hex) = entry
            .archive_index
            .and_then(|i| archives.get(usize::from(i)))
        {
            return Ok(resolver
                .fetch_archive_range(ekey_hex, archive_hex, entry.offset, entry.size)
                .await?);
        }
        warn!("group index names archive {:?}, not in configuration", entry.archive_index);
    }

    if let Some(entry) = file_index.lookup(&ekey)? {
        return Ok(resolver.fetch_data(ekey_hex, entry.size, false).await?);
    }

    Ok(resolver.fetch_data(ekey_hex, size_hint, false).await?)
}

/// Resolve the group index: the published file when the configuration
/// names one and it is fetchable, a local merge otherwise.
async fn open_group_index(
    resolver: &Resolver,
    cdn_config: &ConfigFile,
    archives: &[String],
) -> Result<ArchiveIndex> {
    let expected = cdn_config.first("archive-group").map(str::to_string);

    if let Some(name) = &expected {
        let resource = resolver.fetch_index(name, 0).await?;
        if resource.exists {
            return Ok(ArchiveIndex::open(&resource.path)?);
        }
        warn!("published group index {name} unavailable, merging locally");
    }

    let mut paths = Vec::with_capacity(archives.len());
    for archive in archives {
        let resource = resolver.fetch_index(archive, 0).await?;
        if !resource.exists {
            return Err(ClientError::MissingResource(format!("{archive}.index")));
        }
        paths.push(resource.path);
    }

    let out_dir = resolver.cache().root().to_path_buf();
    let (path, name) = tokio::task::spawn_blocking(move || {
        build_group_index(&paths, expected.as_deref(), &out_dir)
    })
    .await
    .map_err(|e| ClientError::Io(std::io::Error::other(e)))??;

    debug!("group index ready: {name}");
    Ok(ArchiveIndex::open(&path)?)
}

async fn read_config(resolver: &Resolver, hash: &str) -> Result<ConfigFile> {
    let resource = resolver.fetch_config(hash).await?;
    if !resource.exists {
        return Err(ClientError::MissingResource(format!("config {hash}")));
    }
    let text = String::from_utf8(resource.read()?)
        .map_err(|e| ClientError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    Ok(ConfigFile::parse(&text)?)
}

fn decode_hex16(hex_str: &str) -> Result<Md5> {
    hex::decode(hex_str)
        .ok()
        .and_then(|v| <Md5>::try_from(v).ok())
        .ok_or_else(|| ClientError::InvalidHex(hex_str.to_string()))
}
