//! Repository contracts and SQLite implementations.
//!
//! # Responsibility
//! - Provide stable persistence APIs over the canonical survey, observation
//!   and level tables.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Write paths validate records before SQL mutations.
//! - Repositories borrow a connection or transaction; the caller owns the
//!   transaction boundary.

pub mod level_repo;
pub mod observation_repo;
pub mod survey_repo;

pub use level_repo::{LevelRepository, SqliteLevelRepository};
pub use observation_repo::{ObservationRepository, SqliteObservationRepository};
pub use survey_repo::{SurveyRepository, SqliteSurveyRepository};

use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::db::DbError;
use crate::model::level::LevelValidationError;

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(LevelValidationError),
    Db(DbError),
    NotFound { entity: &'static str, id: String },
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<LevelValidationError> for RepoError {
    fn from(value: LevelValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
