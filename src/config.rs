use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::model::SourceDefinition;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Candidates whose mean score falls below this are not ingested
    #[serde(default = "default_minimum_score")]
    pub minimum_score: f64,
    /// Score increase applied by a boost without an explicit delta
    #[serde(default = "default_boost_delta")]
    pub boost_delta: f64,
    #[serde(default = "default_max_boost_delta")]
    pub max_boost_delta: f64,
    #[serde(default = "default_min_sources_per_topic")]
    pub min_sources_per_topic: usize,
    #[serde(default = "default_expected_topics")]
    pub expected_topics: Vec<String>,
    /// Minimum age in days of an unchanged open request before it is reissued
    #[serde(default = "default_request_interval_days")]
    pub request_interval_days: i64,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub candidates: Vec<SourceDefinition>,
}

fn default_minimum_score() -> f64 {
    0.6
}

fn default_boost_delta() -> f64 {
    0.05
}

fn default_max_boost_delta() -> f64 {
    0.25
}

fn default_min_sources_per_topic() -> usize {
    2
}

fn default_expected_topics() -> Vec<String> {
    ["business", "markets", "policy", "society"]
        .into_iter()
        .map(String::from)
        .collect()
}

const MAX_REQUEST_INTERVAL_DAYS: i64 = 3650;

fn default_request_interval_days() -> i64 {
    7
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_feedback_path")]
    pub feedback: PathBuf,
    #[serde(default = "default_snapshot_path")]
    pub snapshot: PathBuf,
    /// Editor guide written whenever a new request is issued
    #[serde(default)]
    pub notes: Option<PathBuf>,
}

fn default_feedback_path() -> PathBuf {
    PathBuf::from("data/feedback.json")
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/source_catalog.json")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            feedback: default_feedback_path(),
            snapshot: default_snapshot_path(),
            notes: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            minimum_score: default_minimum_score(),
            boost_delta: default_boost_delta(),
            max_boost_delta: default_max_boost_delta(),
            min_sources_per_topic: default_min_sources_per_topic(),
            expected_topics: default_expected_topics(),
            request_interval_days: default_request_interval_days(),
            paths: PathsConfig::default(),
            candidates: Vec::new(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.minimum_score) {
            anyhow::bail!("minimum_score must be within [0, 1], got {}", self.minimum_score);
        }
        if !(self.max_boost_delta > 0.0 && self.max_boost_delta <= 1.0) {
            anyhow::bail!("max_boost_delta must be within (0, 1], got {}", self.max_boost_delta);
        }
        if !(self.boost_delta > 0.0 && self.boost_delta <= self.max_boost_delta) {
            anyhow::bail!(
                "boost_delta must be within (0, {}], got {}",
                self.max_boost_delta,
                self.boost_delta
            );
        }
        if !(0..=MAX_REQUEST_INTERVAL_DAYS).contains(&self.request_interval_days) {
            anyhow::bail!(
                "request_interval_days must be within [0, {}], got {}",
                MAX_REQUEST_INTERVAL_DAYS,
                self.request_interval_days
            );
        }
        for candidate in &self.candidates {
            candidate
                .validate()
                .map_err(|e| anyhow::anyhow!("candidate '{}': {}", candidate.name, e))?;
        }
        Ok(())
    }
}
