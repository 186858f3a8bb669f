//! The JSON mirror of the catalog, regenerated in full after every commit.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{CuratorError, Result};
use crate::model::SourceRecord;
use crate::store::{CatalogStore, CommitBatch};

/// Write `content` to a sibling temp file and rename it over `path`, so
/// readers never observe a half-written file.
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let io_err = |source: std::io::Error| CuratorError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

/// Serialize records ordered by `source_id`, pretty-printed with a trailing
/// newline. Tags are already sorted, so equal catalogs render identically.
pub fn render(records: &[SourceRecord]) -> std::result::Result<String, serde_json::Error> {
    let mut ordered: Vec<&SourceRecord> = records.iter().collect();
    ordered.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    let mut rendered = serde_json::to_string_pretty(&ordered)?;
    rendered.push('\n');
    Ok(rendered)
}

/// Records readers may consume: everything except retired sources.
pub fn active_sources(records: &[SourceRecord]) -> Vec<&SourceRecord> {
    records.iter().filter(|r| r.is_consumable()).collect()
}

/// Upsert every record of a snapshot into the store in one commit. Returns
/// how many records were written.
pub async fn seed<S: CatalogStore + ?Sized>(store: &S, records: Vec<SourceRecord>) -> Result<usize> {
    let count = records.len();
    if count == 0 {
        return Ok(0);
    }
    store
        .commit(
            CommitBatch {
                records,
                ledger: Vec::new(),
            },
            Utc::now(),
        )
        .await?;
    info!("Seeded {} sources into the catalog", count);
    Ok(count)
}

#[derive(Debug, Clone)]
pub struct SnapshotMirror {
    path: PathBuf,
}

impl SnapshotMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, records: &[SourceRecord]) -> Result<()> {
        let rendered = render(records).map_err(|source| CuratorError::Json {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &rendered)?;
        debug!(
            "Wrote snapshot of {} sources to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }

    pub fn load(&self) -> Result<Vec<SourceRecord>> {
        let content = fs::read_to_string(&self.path).map_err(|source| CuratorError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| CuratorError::Json {
            path: self.path.clone(),
            source,
        })
    }
}
