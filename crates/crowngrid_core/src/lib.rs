//! Core domain logic for crowngrid.
//! This crate is the single source of truth for curation invariants.

pub mod config;
pub mod db;
pub mod grid;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod raster;
pub mod repo;

pub use config::{ConfigError, ProjectConfig, SplitRatios};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use grid::{AltitudeGrid, GridError};
pub use logging::{default_log_level, init_logging};
pub use model::level::{LevelDataType, LevelRecord, LevelValidationError, SynthMethod};
pub use model::observation::{CrownFeatures, Observation, ObservationHeight};
pub use model::survey::{EllipseAnnotation, SurveyImage};
pub use pipeline::altitude::{
    altitude_from_filename, backfill_observation_heights, fill_flight_altitudes,
};
pub use pipeline::assign::{assign_levels, AssignOptions, AssignOutcome};
pub use pipeline::export::{export_dataset_pairs, ExportOptions, ExportOutcome, SplitKind};
pub use pipeline::ingest::import_survey_images;
pub use pipeline::normalize::{normalize_scale, NormalizeOptions};
pub use pipeline::observe::{build_observations, ObserveOptions};
pub use pipeline::synthesize::{synthesize_missing, SynthesizeOptions};
pub use pipeline::{BatchOutcome, PipelineError, PipelineResult, Skip, SkipReason};
pub use repo::{
    LevelRepository, ObservationRepository, RepoError, RepoResult, SqliteLevelRepository,
    SqliteObservationRepository, SqliteSurveyRepository, SurveyRepository,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
