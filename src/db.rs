use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqliteConnection, SqlitePool};

use crate::error::{CuratorError, Result};
use crate::model::{Score, SourceRecord};
use crate::store::{check_record, CatalogStore, CommitBatch, LedgerEntry};

#[derive(Debug, Clone, FromRow)]
struct SourceRow {
    source_id: String,
    name: String,
    url: String,
    ingestion_type: String,
    cadence: String,
    credibility_score: f64,
    visitor_score: f64,
    business_alignment: f64,
    topics: String,
    status: String,
    last_modified: String,
}

impl TryFrom<SourceRow> for SourceRecord {
    type Error = CuratorError;

    fn try_from(row: SourceRow) -> Result<Self> {
        let corrupt = |reason: String| CuratorError::CorruptRow {
            source_id: row.source_id.clone(),
            reason,
        };
        let score = |value: f64| Score::new(value).map_err(|e| corrupt(e.to_string()));

        let topics: BTreeSet<String> =
            serde_json::from_str(&row.topics).map_err(|e| corrupt(e.to_string()))?;
        let last_modified = DateTime::parse_from_rfc3339(&row.last_modified)
            .map_err(|e| corrupt(e.to_string()))?
            .with_timezone(&Utc);

        Ok(SourceRecord {
            ingestion_type: row.ingestion_type.parse().map_err(corrupt)?,
            cadence: row.cadence.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            credibility_score: score(row.credibility_score)?,
            visitor_score: score(row.visitor_score)?,
            business_alignment: score(row.business_alignment)?,
            topics,
            last_modified,
            source_id: row.source_id.clone(),
            name: row.name.clone(),
            url: row.url.clone(),
        })
    }
}

/// The relational catalog, kept in SQLite.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to `:memory:` opens a separate database.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(database_url)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?
        };

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                source_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                ingestion_type TEXT NOT NULL,
                cadence TEXT NOT NULL,
                credibility_score REAL NOT NULL,
                visitor_score REAL NOT NULL,
                business_alignment REAL NOT NULL,
                topics TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                last_modified TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS issued_ids (
                source_id TEXT PRIMARY KEY,
                issued_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS applied_feedback (
                idempotence_key TEXT PRIMARY KEY,
                outcome TEXT NOT NULL DEFAULT 'applied',
                reason TEXT,
                applied_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_url ON sources(url)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Close the pool. Later operations fail with `StoreUnavailable`.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Counts of records per status, for reporting.
    pub async fn status_counts(&self) -> Result<Vec<(String, i64)>> {
        let counts = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM sources GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }

    async fn write_record(
        conn: &mut SqliteConnection,
        record: &SourceRecord,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let topics = serde_json::to_string(&record.topics).map_err(|e| {
            CuratorError::InvalidRecord {
                source_id: record.source_id.clone(),
                reason: e.to_string(),
            }
        })?;
        let at = at.to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO sources (
                source_id, name, url, ingestion_type, cadence, credibility_score,
                visitor_score, business_alignment, topics, status, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                name = excluded.name,
                url = excluded.url,
                ingestion_type = excluded.ingestion_type,
                cadence = excluded.cadence,
                credibility_score = excluded.credibility_score,
                visitor_score = excluded.visitor_score,
                business_alignment = excluded.business_alignment,
                topics = excluded.topics,
                status = excluded.status,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(&record.source_id)
        .bind(&record.name)
        .bind(&record.url)
        .bind(record.ingestion_type.as_str())
        .bind(record.cadence.as_str())
        .bind(record.credibility_score.value())
        .bind(record.visitor_score.value())
        .bind(record.business_alignment.value())
        .bind(&topics)
        .bind(record.status.as_str())
        .bind(&at)
        .execute(&mut *conn)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO issued_ids (source_id, issued_at) VALUES (?, ?)")
            .bind(&record.source_id)
            .bind(&at)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl CatalogStore for Database {
    async fn get(&self, source_id: &str) -> Result<Option<SourceRecord>> {
        let row = sqlx::query_as::<_, SourceRow>("SELECT * FROM sources WHERE source_id = ?")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SourceRecord::try_from).transpose()
    }

    async fn put(&self, mut record: SourceRecord) -> Result<SourceRecord> {
        check_record(&record)?;
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        Self::write_record(&mut tx, &record, now).await?;
        tx.commit().await?;
        record.last_modified = now;
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<SourceRecord>> {
        let rows = sqlx::query_as::<_, SourceRow>("SELECT * FROM sources ORDER BY source_id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SourceRecord::try_from).collect()
    }

    async fn delete(&self, source_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sources WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_issued(&self, source_id: &str) -> Result<bool> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM issued_ids WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    async fn ledger_entry(&self, key: &str) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query_as::<_, (String, Option<String>)>(
            "SELECT outcome, reason FROM applied_feedback WHERE idempotence_key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(outcome, reason)| -> Result<LedgerEntry> {
            let outcome = outcome.parse().map_err(|e| CuratorError::CorruptRow {
                source_id: key.to_string(),
                reason: e,
            })?;
            Ok(LedgerEntry {
                idempotence_key: key.to_string(),
                outcome,
                reason,
            })
        })
        .transpose()
    }

    async fn commit(&self, batch: CommitBatch, at: DateTime<Utc>) -> Result<()> {
        for record in &batch.records {
            check_record(record)?;
        }

        let mut tx = self.pool.begin().await?;
        for record in &batch.records {
            Self::write_record(&mut tx, record, at).await?;
        }
        for entry in &batch.ledger {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO applied_feedback (idempotence_key, outcome, reason, applied_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&entry.idempotence_key)
            .bind(entry.outcome.as_str())
            .bind(&entry.reason)
            .bind(at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        // Dropping `tx` on an early return rolls everything back.
        tx.commit().await?;
        Ok(())
    }
}
