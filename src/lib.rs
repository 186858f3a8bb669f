//! News Curator - a catalog of vetted news sources kept in step with editor feedback
//!
//! The catalog lives in a relational store. Each reconciliation cycle applies
//! queued editor feedback and new candidate sources in one commit, regenerates
//! a JSON snapshot for readers, and asks editors about gaps in coverage.

pub mod action;
pub mod config;
pub mod db;
pub mod error;
pub mod feedback;
pub mod model;
pub mod reconcile;
pub mod requests;
pub mod snapshot;
pub mod store;

pub use error::{CuratorError, EntryError, Result};
pub use model::{Cadence, IngestionType, Score, SourceDefinition, SourceRecord, SourceStatus};
pub use reconcile::{CurationSettings, CycleSummary, Reconciler};
pub use store::{CatalogStore, InMemoryCatalog};
