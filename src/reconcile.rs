//! The reconciliation cycle: apply editor feedback and candidate sources to
//! the catalog, commit once, then regenerate the derived outputs.
//!
//! All mutations are staged in memory and committed in one store
//! transaction. The feedback document is only touched after that commit, so
//! a store failure leaves both the catalog and the pending queue as they were.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::action::{validate, FeedbackAction, ValidatedEntry};
use crate::config::Config;
use crate::error::{CuratorError, EntryError, Result};
use crate::feedback::{ArchivedEntry, FeedbackEntry, FeedbackQueue, Outcome};
use crate::model::{
    normalize_topics, slugify, url_key, SourceDefinition, SourceRecord, SourceStatus,
};
use crate::requests::{plan_asks, write_editor_notes, GapPolicy, RequestDecision};
use crate::snapshot::SnapshotMirror;
use crate::store::{CatalogStore, CommitBatch, LedgerEntry};

#[derive(Debug, Clone)]
pub struct CurationSettings {
    pub minimum_score: f64,
    pub boost_delta: f64,
    pub max_boost_delta: f64,
    pub request_interval: Duration,
    pub gaps: GapPolicy,
}

impl Default for CurationSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for CurationSettings {
    fn from(config: &Config) -> Self {
        Self {
            minimum_score: config.minimum_score,
            boost_delta: config.boost_delta,
            max_boost_delta: config.max_boost_delta,
            request_interval: Duration::days(config.request_interval_days),
            gaps: GapPolicy {
                expected_topics: config.expected_topics.clone(),
                min_sources_per_topic: config.min_sources_per_topic,
                minimum_score: config.minimum_score,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub idempotence_key: String,
    pub reason: String,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub applied: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub ingested: usize,
    pub skipped_candidates: usize,
    pub catalog_size: usize,
    pub active_sources: usize,
    pub rejections: Vec<Rejection>,
    pub request_issued: bool,
}

impl fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "feedback: {} applied, {} rejected, {} duplicate",
            self.applied, self.rejected, self.duplicates
        )?;
        writeln!(
            f,
            "candidates: {} ingested, {} below minimum score",
            self.ingested, self.skipped_candidates
        )?;
        write!(
            f,
            "catalog: {} sources ({} active)",
            self.catalog_size, self.active_sources
        )?;
        for rejection in &self.rejections {
            write!(
                f,
                "\n  rejected {}: {}",
                rejection.idempotence_key, rejection.reason
            )?;
        }
        Ok(())
    }
}

/// Working copy of the catalog for one cycle.
struct StagedCatalog {
    records: BTreeMap<String, SourceRecord>,
    dirty: BTreeSet<String>,
}

impl StagedCatalog {
    fn new(records: Vec<SourceRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.source_id.clone(), r))
                .collect(),
            dirty: BTreeSet::new(),
        }
    }

    fn contains(&self, source_id: &str) -> bool {
        self.records.contains_key(source_id)
    }

    fn find_by_url(&self, url: &str) -> Option<&SourceRecord> {
        let key = url_key(url);
        self.records.values().find(|r| url_key(&r.url) == key)
    }

    fn insert(&mut self, record: SourceRecord) {
        self.dirty.insert(record.source_id.clone());
        self.records.insert(record.source_id.clone(), record);
    }

    /// Mutable access that marks the record as changed at `now`.
    fn touch(&mut self, source_id: &str, now: DateTime<Utc>) -> Option<&mut SourceRecord> {
        let record = self.records.get_mut(source_id)?;
        self.dirty.insert(source_id.to_string());
        record.last_modified = now;
        Some(record)
    }

    fn changed_records(&self) -> Vec<SourceRecord> {
        self.dirty
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect()
    }
}

/// The sole writer to the catalog store.
pub struct Reconciler<S> {
    store: S,
    settings: CurationSettings,
    snapshot: Option<SnapshotMirror>,
    editor_notes: Option<PathBuf>,
    cycle: Mutex<()>,
}

impl<S: CatalogStore> Reconciler<S> {
    pub fn new(store: S, settings: CurationSettings) -> Self {
        Self {
            store,
            settings,
            snapshot: None,
            editor_notes: None,
            cycle: Mutex::new(()),
        }
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotMirror) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_editor_notes(mut self, path: impl Into<PathBuf>) -> Self {
        self.editor_notes = Some(path.into());
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn run_cycle(
        &self,
        queue: &mut FeedbackQueue,
        candidates: &[SourceDefinition],
        extra_feedback: Vec<FeedbackEntry>,
    ) -> Result<CycleSummary> {
        self.run_cycle_at(queue, candidates, extra_feedback, Utc::now())
            .await
    }

    /// Run one cycle as of `now`. Either everything is committed or nothing
    /// is: on error the store and the queue are left as they were.
    pub async fn run_cycle_at(
        &self,
        queue: &mut FeedbackQueue,
        candidates: &[SourceDefinition],
        extra_feedback: Vec<FeedbackEntry>,
        now: DateTime<Utc>,
    ) -> Result<CycleSummary> {
        let _guard = self
            .cycle
            .try_lock()
            .map_err(|_| CuratorError::CycleInProgress)?;

        let mut staged = StagedCatalog::new(self.store.list().await?);
        let mut summary = CycleSummary::default();

        let mut pending = queue.drain();
        pending.extend(extra_feedback);
        // Stable: ties keep queue order, extra entries after queued ones.
        pending.sort_by_key(|entry| entry.submitted_at());
        info!(
            "Starting reconciliation: {} sources, {} feedback entries, {} candidates",
            staged.records.len(),
            pending.len(),
            candidates.len()
        );

        let mut archived = Vec::with_capacity(pending.len());
        let mut seen: HashSet<String> = HashSet::new();
        for entry in pending {
            let key = entry.idempotence_key().to_string();
            let mut restored = false;
            let (outcome, reason) = match validate(&entry, self.settings.max_boost_delta) {
                Err(e) => (Outcome::Rejected, Some(e.to_string())),
                Ok(validated) => {
                    if seen.contains(&key) || queue.was_applied(&key) {
                        (Outcome::Duplicate, None)
                    } else if let Some(recorded) = self.store.ledger_entry(&key).await? {
                        // Committed by an earlier cycle whose archive was lost.
                        restored = true;
                        (recorded.outcome, recorded.reason)
                    } else {
                        match self.apply(&mut staged, validated, now).await? {
                            Ok(source_id) => {
                                info!("Applied feedback {} to '{}'", key, source_id);
                                (Outcome::Applied, None)
                            }
                            Err(e) => (Outcome::Rejected, Some(e.to_string())),
                        }
                    }
                }
            };

            match outcome {
                _ if restored => {
                    info!(
                        "Restoring recorded outcome of feedback {}: {}",
                        key,
                        outcome.as_str()
                    );
                    summary.duplicates += 1;
                }
                Outcome::Applied => summary.applied += 1,
                Outcome::Duplicate => {
                    info!("Skipping already applied feedback {}", key);
                    summary.duplicates += 1;
                }
                Outcome::Rejected => {
                    let reason = reason.clone().unwrap_or_default();
                    warn!("Rejected feedback {}: {}", key, reason);
                    summary.rejected += 1;
                    summary.rejections.push(Rejection {
                        idempotence_key: key.clone(),
                        reason,
                    });
                }
            }

            seen.insert(key.clone());
            archived.push(ArchivedEntry {
                entry,
                idempotence_key: key,
                applied_at: now,
                outcome,
                reason,
            });
        }

        self.ingest_candidates(&mut staged, candidates, now, &mut summary)
            .await?;

        let batch = CommitBatch {
            records: staged.changed_records(),
            ledger: archived
                .iter()
                .filter(|a| a.outcome != Outcome::Duplicate)
                .map(|a| LedgerEntry {
                    idempotence_key: a.idempotence_key.clone(),
                    outcome: a.outcome,
                    reason: a.reason.clone(),
                })
                .collect(),
        };
        if !batch.is_empty() {
            let changed = batch.records.len();
            if let Err(e) = self.store.commit(batch, now).await {
                error!("Catalog commit failed, cycle aborted: {}", e);
                return Err(e);
            }
            debug!("Committed {} changed sources", changed);
        }

        let catalog = self.store.list().await?;
        if let Some(snapshot) = &self.snapshot {
            snapshot.write(&catalog)?;
        }

        for entry in archived {
            queue.archive(entry);
        }

        let asks = plan_asks(&catalog, &self.settings.gaps, now);
        let answered = summary.applied + summary.rejected > 0;
        let decision = queue.issue_request(asks, answered, self.settings.request_interval, now);
        summary.request_issued = decision == RequestDecision::Issued;
        if summary.request_issued {
            if let (Some(notes), Some(feedback_path)) = (&self.editor_notes, queue.path()) {
                write_editor_notes(notes, feedback_path)?;
            }
        }
        queue.save()?;

        summary.catalog_size = catalog.len();
        summary.active_sources = catalog.iter().filter(|r| r.is_consumable()).count();
        info!(
            "Reconciliation complete: {} applied, {} rejected, {} duplicate, {} ingested, {} sources",
            summary.applied,
            summary.rejected,
            summary.duplicates,
            summary.ingested,
            summary.catalog_size
        );
        Ok(summary)
    }

    /// Pick an unused identifier derived from `name`. Identifiers that were
    /// ever issued are never handed out again.
    async fn allocate_id(&self, staged: &StagedCatalog, name: &str) -> Result<String> {
        let base = slugify(name);
        let mut candidate = base.clone();
        let mut suffix = 1;
        while staged.contains(&candidate) || self.store.is_issued(&candidate).await? {
            suffix += 1;
            candidate = format!("{}_{}", base, suffix);
        }
        Ok(candidate)
    }

    async fn id_taken(&self, staged: &StagedCatalog, source_id: &str) -> Result<bool> {
        Ok(staged.contains(source_id) || self.store.is_issued(source_id).await?)
    }

    /// Apply one validated entry to the staged catalog. The outer error is a
    /// store failure; the inner one rejects just this entry.
    async fn apply(
        &self,
        staged: &mut StagedCatalog,
        entry: ValidatedEntry,
        now: DateTime<Utc>,
    ) -> Result<std::result::Result<String, EntryError>> {
        let ValidatedEntry { target, action } = entry;

        if let FeedbackAction::Add(definition) = &action {
            if let Some(existing) = staged.find_by_url(&definition.url) {
                return Ok(Err(EntryError::Validation(format!(
                    "url '{}' is already in the catalog as '{}'",
                    definition.url, existing.source_id
                ))));
            }
            let source_id = match target {
                Some(id) => {
                    if self.id_taken(staged, &id).await? {
                        return Ok(Err(EntryError::Validation(format!(
                            "source_id '{}' already exists",
                            id
                        ))));
                    }
                    id
                }
                None => self.allocate_id(staged, &definition.name).await?,
            };
            staged.insert(SourceRecord::from_definition(
                source_id.clone(),
                definition,
                now,
            ));
            return Ok(Ok(source_id));
        }

        // Every other action is validated to carry a target.
        let Some(source_id) = target else {
            return Ok(Err(EntryError::Validation(format!(
                "{} requires a source_id",
                action.name()
            ))));
        };
        if !staged.contains(&source_id) {
            return Ok(Err(EntryError::TargetNotFound(source_id)));
        }

        if let FeedbackAction::Adjust(payload) = &action {
            if let Some(url) = &payload.url {
                if let Some(other) = staged.find_by_url(url) {
                    if other.source_id != source_id {
                        return Ok(Err(EntryError::Validation(format!(
                            "url '{}' is already in the catalog as '{}'",
                            url, other.source_id
                        ))));
                    }
                }
            }
        }

        let boost_delta = self.settings.boost_delta;
        let Some(record) = staged.touch(&source_id, now) else {
            return Ok(Err(EntryError::TargetNotFound(source_id)));
        };
        match action {
            FeedbackAction::Boost(payload) => {
                let delta = payload.delta.unwrap_or(boost_delta);
                record.credibility_score = record.credibility_score.saturating_add(delta);
                record.visitor_score = record.visitor_score.saturating_add(delta);
                record.business_alignment = record.business_alignment.saturating_add(delta);
                record.status = SourceStatus::Boosted;
            }
            FeedbackAction::Retire(_) => {
                record.status = SourceStatus::Retired;
            }
            FeedbackAction::Retag(payload) => {
                record.topics = normalize_topics(&payload.topics);
            }
            FeedbackAction::Adjust(payload) => {
                if let Some(name) = payload.name {
                    record.name = name.trim().to_string();
                }
                if let Some(url) = payload.url {
                    record.url = url.trim().to_string();
                }
                if let Some(ingestion_type) = payload.ingestion_type {
                    record.ingestion_type = ingestion_type;
                }
                if let Some(cadence) = payload.cadence {
                    record.cadence = cadence;
                }
                if let Some(score) = payload.credibility_score {
                    record.credibility_score = score;
                }
                if let Some(score) = payload.visitor_score {
                    record.visitor_score = score;
                }
                if let Some(score) = payload.business_alignment {
                    record.business_alignment = score;
                }
                if let Some(topics) = payload.topics {
                    record.topics = normalize_topics(&topics);
                }
            }
            FeedbackAction::Add(_) => {
                return Ok(Err(EntryError::Validation(format!(
                    "source_id '{}' already exists",
                    source_id
                ))));
            }
        }
        Ok(Ok(source_id))
    }

    /// Add candidates that are not yet in the catalog, matched by URL or
    /// declared identifier. Existing records are never modified.
    async fn ingest_candidates(
        &self,
        staged: &mut StagedCatalog,
        candidates: &[SourceDefinition],
        now: DateTime<Utc>,
        summary: &mut CycleSummary,
    ) -> Result<()> {
        for candidate in candidates {
            if let Err(e) = candidate.validate() {
                warn!("Skipping invalid candidate '{}': {}", candidate.name, e);
                summary.skipped_candidates += 1;
                continue;
            }
            if candidate.mean_score() < self.settings.minimum_score {
                warn!(
                    "Skipping {} due to low aggregate score ({:.2})",
                    candidate.name,
                    candidate.mean_score()
                );
                summary.skipped_candidates += 1;
                continue;
            }
            if let Some(existing) = staged.find_by_url(&candidate.url) {
                debug!(
                    "Candidate {} already present as '{}'",
                    candidate.name, existing.source_id
                );
                continue;
            }
            let source_id = match &candidate.source_id {
                Some(id) => {
                    let id = id.trim();
                    if self.id_taken(staged, id).await? {
                        debug!("Candidate {} already present as '{}'", candidate.name, id);
                        continue;
                    }
                    id.to_string()
                }
                None => self.allocate_id(staged, &candidate.name).await?,
            };

            info!("Ingesting candidate {} as '{}'", candidate.name, source_id);
            staged.insert(SourceRecord::from_definition(source_id, candidate, now));
            summary.ingested += 1;
        }
        Ok(())
    }
}
