//! Key registry for encrypted chunks.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::{CryptoError, Result};

/// Registry of chunk-encryption keys, indexed by their 64-bit key name.
///
/// The codec is usable without any keys at all; a chunk naming an
/// unregistered key fails with [`CryptoError::KeyNotFound`], which callers
/// treat as a soft error.
#[derive(Default)]
pub struct KeyService {
    keys: HashMap<u64, [u8; 16]>,
}

impl KeyService {
    /// Create an empty key service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a key by name.
    pub fn get_key(&self, key_name: u64) -> Option<&[u8; 16]> {
        self.keys.get(&key_name)
    }

    /// Register a key.
    pub fn add_key(&mut self, key_name: u64, key: [u8; 16]) {
        self.keys.insert(key_name, key);
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// `true` if no keys are registered.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Load keys from a text file of `keyname keyhex` lines.
    ///
    /// Key names are 16 hex digits, keys 32. Fields may be separated by
    /// whitespace, commas or semicolons; `#` starts a comment. Malformed
    /// lines are skipped with a warning so community key lists with odd
    /// rows still load. Returns the number of keys added.
    pub fn load_key_file(&mut self, path: &Path) -> Result<usize> {
        let content = fs::read_to_string(path)?;
        let mut loaded = 0;

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split(|c: char| c.is_whitespace() || c == ',' || c == ';');
            let name = fields.next().unwrap_or_default();
            let Some(hexkey) = fields.find(|f| !f.is_empty()) else {
                warn!("key file line {}: no key field", line_no + 1);
                continue;
            };

            match (parse_key_name(name), parse_key_hex(hexkey)) {
                (Ok(name), Ok(key)) => {
                    self.keys.insert(name, key);
                    loaded += 1;
                }
                _ => warn!("key file line {}: unparseable entry", line_no + 1),
            }
        }

        debug!("loaded {} keys from {}", loaded, path.display());
        Ok(loaded)
    }
}

/// Parse a 16-hex-digit key name into its `u64` form.
pub fn parse_key_name(s: &str) -> Result<u64> {
    u64::from_str_radix(s, 16).map_err(|e| CryptoError::InvalidKeyEntry {
        line: 0,
        reason: format!("bad key name {s:?}: {e}"),
    })
}

/// Parse a 32-hex-digit key into its 16-byte form.
pub fn parse_key_hex(s: &str) -> Result<[u8; 16]> {
    let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKeyEntry {
        line: 0,
        reason: format!("bad key hex {s:?}: {e}"),
    })?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyEntry {
            line: 0,
            reason: format!("key {s:?} is not 16 bytes"),
        })
}
