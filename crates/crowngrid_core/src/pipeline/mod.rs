//! Batch pipeline stages over the crowngrid store.
//!
//! # Responsibility
//! - Orchestrate repositories and raster operations into the curation
//!   stages: ingest, altitude capture, observation build, level
//!   assignment, scale normalization, synthesis and export.
//! - Keep per-item failures non-fatal: damaged evidence is skipped with a
//!   recorded reason, never silently dropped.
//!
//! # Invariants
//! - Every stage runs its store mutations inside one transaction and
//!   commits once at the end.
//! - Fatal errors (config, schema, I/O on required directories) abort
//!   before any partial commit.

pub mod altitude;
pub mod assign;
pub mod export;
pub mod ingest;
pub mod normalize;
pub mod observe;
pub mod synthesize;

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

use log::warn;

use crate::config::ConfigError;
use crate::db::DbError;
use crate::repo::RepoError;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Fatal pipeline failure; aborts the whole stage.
#[derive(Debug)]
pub enum PipelineError {
    Config(ConfigError),
    Db(DbError),
    Repo(RepoError),
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
    Manifest {
        path: PathBuf,
        source: csv::Error,
    },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Config(err) => write!(f, "{err}"),
            PipelineError::Db(err) => write!(f, "{err}"),
            PipelineError::Repo(err) => write!(f, "{err}"),
            PipelineError::OutputDir { path, source } => {
                write!(
                    f,
                    "failed to create output directory {}: {source}",
                    path.display()
                )
            }
            PipelineError::Manifest { path, source } => {
                write!(f, "failed to write manifest {}: {source}", path.display())
            }
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PipelineError::Config(err) => Some(err),
            PipelineError::Db(err) => Some(err),
            PipelineError::Repo(err) => Some(err),
            PipelineError::OutputDir { source, .. } => Some(source),
            PipelineError::Manifest { source, .. } => Some(source),
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DbError> for PipelineError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<RepoError> for PipelineError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Why one input item was left out of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    EvidenceUnavailable(String),
    DimensionMismatch(String),
    EncodingFailure(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EvidenceUnavailable(detail) => {
                write!(f, "evidence unavailable: {detail}")
            }
            SkipReason::DimensionMismatch(detail) => write!(f, "dimension mismatch: {detail}"),
            SkipReason::EncodingFailure(detail) => write!(f, "encoding failure: {detail}"),
        }
    }
}

/// One skipped batch item together with its reason.
#[derive(Debug, Clone, PartialEq)]
pub struct Skip {
    pub item: String,
    pub reason: SkipReason,
}

/// Result of a batch stage: how many items landed, and which were skipped.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub processed: usize,
    pub skipped: Vec<Skip>,
}

impl BatchOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub(crate) fn record_skip(
        &mut self,
        event: &'static str,
        item: impl Into<String>,
        reason: SkipReason,
    ) {
        let item = item.into();
        warn!("event={event} module=pipeline status=skip item={item} reason={reason}");
        self.skipped.push(Skip { item, reason });
    }
}
