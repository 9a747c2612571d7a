//! Key/value configuration files (build and CDN configuration).
//!
//! One assignment per line, either `key = v1 v2 ...` or `key v1 v2 ...`.
//! `#` starts a comment. Values are whitespace-separated; empty values
//! are dropped.

use std::collections::HashMap;
use tracing::{debug, trace};

use crate::Result;

/// A parsed configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    entries: HashMap<String, Vec<String>>,
}

impl ConfigFile {
    /// Parse a configuration file from text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = HashMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, rest) = match line.split_once('=') {
                Some((key, rest)) => (key.trim(), rest),
                // Bare form: the first token is the key.
                None => match line.split_once(char::is_whitespace) {
                    Some((key, rest)) => (key, rest),
                    None => (line, ""),
                },
            };

            if key.is_empty() {
                continue;
            }

            let values: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
            trace!("config entry: {key} = {values:?}");
            entries.insert(key.to_string(), values);
        }

        debug!("parsed config with {} entries", entries.len());
        Ok(Self { entries })
    }

    /// All values of a key.
    pub fn values(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// The first value of a key, if the key has any.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// The `idx`-th value of a key.
    pub fn value(&self, key: &str, idx: usize) -> Option<&str> {
        self.entries
            .get(key)
            .and_then(|v| v.get(idx))
            .map(String::as_str)
    }

    /// The `idx`-th value of a key, parsed as a decimal size.
    pub fn size(&self, key: &str, idx: usize) -> Option<u64> {
        self.value(key, idx).and_then(|v| v.parse().ok())
    }

    /// `true` if the key is present (even with no values).
    pub fn has_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}
