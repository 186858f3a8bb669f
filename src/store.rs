//! The catalog store seam and an in-memory implementation.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{CuratorError, Result};
use crate::feedback::Outcome;
use crate::model::SourceRecord;

/// How a feedback entry was processed, kept by the store so the outcome
/// survives a lost feedback archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub idempotence_key: String,
    pub outcome: Outcome,
    pub reason: Option<String>,
}

/// Everything a cycle commits at once: mutated records plus the ledger
/// entries of the feedback it archived.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub records: Vec<SourceRecord>,
    pub ledger: Vec<LedgerEntry>,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.ledger.is_empty()
    }
}

/// Keyed record storage. Every write stamps `last_modified` with the
/// operation time and registers the identifier as issued.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get(&self, source_id: &str) -> Result<Option<SourceRecord>>;

    /// Insert or replace. Returns the record as stored.
    async fn put(&self, record: SourceRecord) -> Result<SourceRecord>;

    /// All records ordered by `source_id`.
    async fn list(&self) -> Result<Vec<SourceRecord>>;

    /// Returns whether a record was removed. The identifier stays issued.
    async fn delete(&self, source_id: &str) -> Result<bool>;

    /// Whether the identifier was ever assigned, including deleted records.
    async fn is_issued(&self, source_id: &str) -> Result<bool>;

    /// The committed ledger entry for this idempotence key, if any.
    async fn ledger_entry(&self, key: &str) -> Result<Option<LedgerEntry>>;

    /// Whether a feedback entry with this idempotence key was committed.
    async fn was_applied(&self, key: &str) -> Result<bool> {
        Ok(self.ledger_entry(key).await?.is_some())
    }

    /// Write the batch in a single transaction: all or nothing.
    async fn commit(&self, batch: CommitBatch, at: DateTime<Utc>) -> Result<()>;
}

pub(crate) fn check_record(record: &SourceRecord) -> Result<()> {
    record
        .validate()
        .map_err(|reason| CuratorError::InvalidRecord {
            source_id: record.source_id.clone(),
            reason,
        })
}

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<String, SourceRecord>,
    issued: BTreeSet<String>,
    ledger: BTreeMap<String, LedgerEntry>,
}

/// A `CatalogStore` backed by ordered maps. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<MemoryState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn get(&self, source_id: &str) -> Result<Option<SourceRecord>> {
        Ok(self.state.read().await.records.get(source_id).cloned())
    }

    async fn put(&self, mut record: SourceRecord) -> Result<SourceRecord> {
        check_record(&record)?;
        record.last_modified = Utc::now();
        let mut state = self.state.write().await;
        state.issued.insert(record.source_id.clone());
        state
            .records
            .insert(record.source_id.clone(), record.clone());
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<SourceRecord>> {
        Ok(self.state.read().await.records.values().cloned().collect())
    }

    async fn delete(&self, source_id: &str) -> Result<bool> {
        Ok(self.state.write().await.records.remove(source_id).is_some())
    }

    async fn is_issued(&self, source_id: &str) -> Result<bool> {
        Ok(self.state.read().await.issued.contains(source_id))
    }

    async fn ledger_entry(&self, key: &str) -> Result<Option<LedgerEntry>> {
        Ok(self.state.read().await.ledger.get(key).cloned())
    }

    async fn commit(&self, batch: CommitBatch, at: DateTime<Utc>) -> Result<()> {
        for record in &batch.records {
            check_record(record)?;
        }
        let mut state = self.state.write().await;
        for mut record in batch.records {
            record.last_modified = at;
            state.issued.insert(record.source_id.clone());
            state.records.insert(record.source_id.clone(), record);
        }
        for entry in batch.ledger {
            // The first recorded outcome wins.
            state
                .ledger
                .entry(entry.idempotence_key.clone())
                .or_insert(entry);
        }
        Ok(())
    }
}
