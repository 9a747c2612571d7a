//! Pipe-delimited service tables (versions and CDN listings).
//!
//! The first line is a header of `Name!TYPE:hint` tokens; each later
//! line is one record. Lines starting with `##` and empty lines are
//! ignored.

use tracing::trace;

use crate::{CdnError, Result};

/// One row of the `/versions` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionsEntry {
    pub region: String,
    /// Hash of the build configuration.
    pub build_config: String,
    /// Hash of the CDN configuration.
    pub cdn_config: String,
}

/// One row of the `/cdns` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnsEntry {
    /// Region the row applies to.
    pub name: String,
    /// CDN path stem, e.g. `tpr/wow`.
    pub path: String,
    /// Mirror host names.
    pub hosts: Vec<String>,
}

/// A parsed pipe-delimited table.
struct PipeTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl PipeTable {
    fn parse(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty() && !l.starts_with("##"));

        let (line_no, header) = lines.next().ok_or(CdnError::InvalidManifest {
            line: 0,
            reason: "empty table".into(),
        })?;
        if !header.contains('!') {
            return Err(CdnError::InvalidManifest {
                line: line_no + 1,
                reason: "missing typed header".into(),
            });
        }

        let columns: Vec<String> = header
            .split('|')
            .map(|field| field.split('!').next().unwrap_or_default().to_string())
            .collect();

        let mut rows = Vec::new();
        for (line_no, line) in lines {
            let fields: Vec<String> = line.split('|').map(|f| f.trim().to_string()).collect();
            if fields.len() != columns.len() {
                return Err(CdnError::InvalidManifest {
                    line: line_no + 1,
                    reason: format!(
                        "{} fields in a {}-column table",
                        fields.len(),
                        columns.len()
                    ),
                });
            }
            rows.push(fields);
        }

        trace!("parsed table: {} columns, {} rows", columns.len(), rows.len());
        Ok(Self { columns, rows })
    }

    /// Column index by header name, falling back to a fixed position.
    fn col(&self, name: &str, fallback: usize) -> usize {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .unwrap_or(fallback)
    }
}

/// Parse a `/versions` response.
pub fn parse_versions(text: &str) -> Result<Vec<VersionsEntry>> {
    let table = PipeTable::parse(text)?;
    let region = table.col("Region", 0);
    let build = table.col("BuildConfig", 1);
    let cdn = table.col("CDNConfig", 2);

    Ok(table
        .rows
        .iter()
        .filter_map(|row| {
            Some(VersionsEntry {
                region: row.get(region)?.clone(),
                build_config: row.get(build)?.clone(),
                cdn_config: row.get(cdn)?.clone(),
            })
        })
        .collect())
}

/// Parse a `/cdns` response.
pub fn parse_cdns(text: &str) -> Result<Vec<CdnsEntry>> {
    let table = PipeTable::parse(text)?;
    let name = table.col("Name", 0);
    let path = table.col("Path", 1);
    let hosts = table.col("Hosts", 2);

    Ok(table
        .rows
        .iter()
        .filter_map(|row| {
            Some(CdnsEntry {
                name: row.get(name)?.clone(),
                path: row.get(path)?.clone(),
                hosts: row
                    .get(hosts)?
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
            })
        })
        .collect())
}
