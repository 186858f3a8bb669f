//! Source records and the definitions they are built from.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ScoreOutOfRange;

/// A score bounded to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Score(f64);

impl Score {
    pub const MIN: Score = Score(0.0);
    pub const MAX: Score = Score(1.0);

    pub fn new(value: f64) -> Result<Self, ScoreOutOfRange> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ScoreOutOfRange(value))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Add `delta` and clamp the result into range.
    pub fn saturating_add(self, delta: f64) -> Self {
        if !delta.is_finite() {
            return self;
        }
        Self((self.0 + delta).clamp(0.0, 1.0))
    }
}

impl TryFrom<f64> for Score {
    type Error = ScoreOutOfRange;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Score::new(value)
    }
}

impl From<Score> for f64 {
    fn from(score: Score) -> Self {
        score.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IngestionType {
    #[serde(alias = "rss", alias = "feed_pull")]
    FeedPull,
    #[serde(alias = "html", alias = "page_scrape")]
    PageScrape,
    Manual,
}

impl IngestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionType::FeedPull => "feed-pull",
            IngestionType::PageScrape => "page-scrape",
            IngestionType::Manual => "manual",
        }
    }
}

impl FromStr for IngestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feed-pull" | "feed_pull" | "rss" => Ok(IngestionType::FeedPull),
            "page-scrape" | "page_scrape" | "html" => Ok(IngestionType::PageScrape),
            "manual" => Ok(IngestionType::Manual),
            other => Err(format!("unknown ingestion type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cadence {
    Daily,
    Weekly,
    #[serde(alias = "adhoc", alias = "ad_hoc")]
    AdHoc,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::AdHoc => "ad-hoc",
        }
    }

    /// How long a source may go unchanged before editors are asked about it.
    /// Ad-hoc sources never go stale.
    pub fn stale_after(&self) -> Option<Duration> {
        match self {
            Cadence::Daily => Some(Duration::days(14)),
            Cadence::Weekly => Some(Duration::days(60)),
            Cadence::AdHoc => None,
        }
    }
}

impl FromStr for Cadence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Cadence::Daily),
            "weekly" => Ok(Cadence::Weekly),
            "ad-hoc" | "adhoc" | "ad_hoc" => Ok(Cadence::AdHoc),
            other => Err(format!("unknown cadence '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Boosted,
    Retired,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Boosted => "boosted",
            SourceStatus::Retired => "retired",
        }
    }

    /// Retired sources stay in the catalog for audit but are not read.
    pub fn is_consumable(&self) -> bool {
        !matches!(self, SourceStatus::Retired)
    }
}

impl FromStr for SourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SourceStatus::Active),
            "boosted" => Ok(SourceStatus::Boosted),
            "retired" => Ok(SourceStatus::Retired),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_status() -> SourceStatus {
    SourceStatus::Active
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Snapshots written before a source was ever checked carry `null` here.
fn last_modified_or_now<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<DateTime<Utc>>::deserialize(deserializer)?.unwrap_or_else(Utc::now))
}

/// One vetted news source in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_id: String,
    pub name: String,
    pub url: String,
    pub ingestion_type: IngestionType,
    pub cadence: Cadence,
    pub credibility_score: Score,
    pub visitor_score: Score,
    pub business_alignment: Score,
    pub topics: BTreeSet<String>,
    #[serde(default = "default_status")]
    pub status: SourceStatus,
    #[serde(
        default = "now",
        alias = "last_checked",
        deserialize_with = "last_modified_or_now"
    )]
    pub last_modified: DateTime<Utc>,
}

impl SourceRecord {
    /// Build an active record from a definition.
    pub fn from_definition(
        source_id: impl Into<String>,
        definition: &SourceDefinition,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            name: definition.name.trim().to_string(),
            url: definition.url.trim().to_string(),
            ingestion_type: definition.ingestion_type,
            cadence: definition.cadence,
            credibility_score: definition.credibility_score,
            visitor_score: definition.visitor_score,
            business_alignment: definition.business_alignment,
            topics: normalize_topics(&definition.topics),
            status: SourceStatus::Active,
            last_modified: at,
        }
    }

    pub fn mean_score(&self) -> f64 {
        mean(
            self.credibility_score,
            self.visitor_score,
            self.business_alignment,
        )
    }

    pub fn is_consumable(&self) -> bool {
        self.status.is_consumable()
    }

    /// Check everything the store requires before a write.
    pub fn validate(&self) -> Result<(), String> {
        if self.source_id.trim().is_empty() {
            return Err("source_id must not be empty".to_string());
        }
        validate_name(&self.name)?;
        validate_url(&self.url)?;
        validate_topics(&self.topics)
    }
}

/// A source as supplied by the candidate list or an `add` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub name: String,
    pub url: String,
    pub ingestion_type: IngestionType,
    pub cadence: Cadence,
    #[serde(alias = "credibility")]
    pub credibility_score: Score,
    #[serde(alias = "visitor")]
    pub visitor_score: Score,
    #[serde(alias = "alignment")]
    pub business_alignment: Score,
    pub topics: BTreeSet<String>,
}

impl SourceDefinition {
    pub fn mean_score(&self) -> f64 {
        mean(
            self.credibility_score,
            self.visitor_score,
            self.business_alignment,
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(id) = &self.source_id {
            if id.trim().is_empty() {
                return Err("source_id must not be blank".to_string());
            }
        }
        validate_name(&self.name)?;
        validate_url(&self.url)?;
        validate_topics(&self.topics)
    }
}

fn mean(a: Score, b: Score, c: Score) -> f64 {
    (a.value() + b.value() + c.value()) / 3.0
}

pub(crate) fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("name must not be empty".to_string());
    }
    Ok(())
}

pub(crate) fn validate_url(url: &str) -> Result<(), String> {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(format!("url '{}' must be an absolute http(s) URL", url)),
    }
}

pub(crate) fn validate_topics(topics: &BTreeSet<String>) -> Result<(), String> {
    if topics.is_empty() {
        return Err("at least one topic tag is required".to_string());
    }
    if topics.iter().any(|t| t.trim().is_empty()) {
        return Err("topic tags must not be empty".to_string());
    }
    Ok(())
}

/// Tags with surrounding whitespace removed, so `" business"` and
/// `"business"` are the same tag.
pub fn normalize_topics(topics: &BTreeSet<String>) -> BTreeSet<String> {
    topics.iter().map(|t| t.trim().to_string()).collect()
}

/// Derive an identifier from a display name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "source".to_string()
    } else {
        slug.to_string()
    }
}

/// Normalize URLs for matching (case of scheme/host and trailing slash ignored).
pub fn url_key(url: &str) -> String {
    url.trim().trim_end_matches('/').to_lowercase()
}
