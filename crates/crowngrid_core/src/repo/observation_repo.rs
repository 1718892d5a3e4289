//! Observation repository: cropped crown ROIs and their altitudes.

use rusqlite::{params, Connection, Row};

use crate::model::observation::{CrownFeatures, Observation, ObservationHeight, ObservationId};
use crate::model::survey::AnnotationId;
use crate::repo::survey_repo::parse_uuid;
use crate::repo::{RepoError, RepoResult};

const OBSERVATION_SELECT_SQL: &str = "SELECT
    obs_id,
    annotation_id,
    image_id,
    tree_id,
    roi_raw_path,
    obs_height,
    features_json
FROM crown_observations";

/// One observation joined with the flight altitude of its source image,
/// used by the altitude consistency report.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightCheckRow {
    pub obs_id: ObservationId,
    pub tree_id: String,
    pub obs_height: Option<f64>,
    pub flight_altitude: Option<f64>,
}

/// Repository interface for crown observations.
pub trait ObservationRepository {
    fn create_observation(&self, observation: &Observation) -> RepoResult<ObservationId>;
    fn exists_for_annotation(&self, annotation_id: AnnotationId) -> RepoResult<bool>;
    /// Every observation with a known altitude, oldest first. The order is
    /// what makes equal-error candidate ties deterministic downstream.
    fn list_with_height(&self) -> RepoResult<Vec<ObservationHeight>>;
    fn raw_path(&self, obs_id: ObservationId) -> RepoResult<Option<String>>;
    /// Copies `flight_altitude` onto observations that still lack a height.
    /// Returns the number of updated rows.
    fn backfill_heights_from_images(&self) -> RepoResult<usize>;
    fn list_recent(&self, limit: u32) -> RepoResult<Vec<Observation>>;
    fn list_recent_height_checks(&self, limit: u32) -> RepoResult<Vec<HeightCheckRow>>;
}

/// SQLite-backed observation repository.
pub struct SqliteObservationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteObservationRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ObservationRepository for SqliteObservationRepository<'_> {
    fn create_observation(&self, observation: &Observation) -> RepoResult<ObservationId> {
        let features_json = match &observation.features {
            Some(features) => Some(encode_features(features)?),
            None => None,
        };

        self.conn.execute(
            "INSERT INTO crown_observations (
                obs_id,
                annotation_id,
                image_id,
                tree_id,
                roi_raw_path,
                obs_height,
                features_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                observation.obs_id.to_string(),
                observation.annotation_id.to_string(),
                observation.image_id.to_string(),
                observation.tree_id.as_str(),
                observation.roi_raw_path.as_str(),
                observation.obs_height,
                features_json,
            ],
        )?;

        Ok(observation.obs_id)
    }

    fn exists_for_annotation(&self, annotation_id: AnnotationId) -> RepoResult<bool> {
        let mut stmt = self.conn.prepare(
            "SELECT 1 FROM crown_observations WHERE annotation_id = ?1 LIMIT 1;",
        )?;
        Ok(stmt.exists(params![annotation_id.to_string()])?)
    }

    fn list_with_height(&self) -> RepoResult<Vec<ObservationHeight>> {
        let mut stmt = self.conn.prepare(
            "SELECT obs_id, tree_id, obs_height
             FROM crown_observations
             WHERE obs_height IS NOT NULL
             ORDER BY created_at ASC, obs_id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut heights = Vec::new();

        while let Some(row) = rows.next()? {
            heights.push(ObservationHeight {
                obs_id: parse_uuid(row, "obs_id")?,
                tree_id: row.get("tree_id")?,
                obs_height: row.get("obs_height")?,
            });
        }

        Ok(heights)
    }

    fn raw_path(&self, obs_id: ObservationId) -> RepoResult<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT roi_raw_path FROM crown_observations WHERE obs_id = ?1;")?;
        let mut rows = stmt.query(params![obs_id.to_string()])?;

        if let Some(row) = rows.next()? {
            return Ok(Some(row.get(0)?));
        }

        Ok(None)
    }

    fn backfill_heights_from_images(&self) -> RepoResult<usize> {
        let updated = self.conn.execute(
            "UPDATE crown_observations
             SET obs_height = (
                 SELECT flight_altitude FROM images
                 WHERE images.image_id = crown_observations.image_id
             )
             WHERE obs_height IS NULL
               AND image_id IN (
                   SELECT image_id FROM images WHERE flight_altitude IS NOT NULL
               );",
            [],
        )?;
        Ok(updated)
    }

    fn list_recent(&self, limit: u32) -> RepoResult<Vec<Observation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{OBSERVATION_SELECT_SQL}
             ORDER BY created_at DESC, obs_id ASC
             LIMIT ?1;"
        ))?;
        let mut rows = stmt.query(params![limit])?;
        let mut observations = Vec::new();

        while let Some(row) = rows.next()? {
            observations.push(parse_observation_row(row)?);
        }

        Ok(observations)
    }

    fn list_recent_height_checks(&self, limit: u32) -> RepoResult<Vec<HeightCheckRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT o.obs_id, o.tree_id, o.obs_height, i.flight_altitude
             FROM crown_observations o
             JOIN images i ON i.image_id = o.image_id
             ORDER BY o.created_at DESC, o.obs_id ASC
             LIMIT ?1;",
        )?;
        let mut rows = stmt.query(params![limit])?;
        let mut checks = Vec::new();

        while let Some(row) = rows.next()? {
            checks.push(HeightCheckRow {
                obs_id: parse_uuid(row, "obs_id")?,
                tree_id: row.get("tree_id")?,
                obs_height: row.get("obs_height")?,
                flight_altitude: row.get("flight_altitude")?,
            });
        }

        Ok(checks)
    }
}

fn parse_observation_row(row: &Row<'_>) -> RepoResult<Observation> {
    let features = match row.get::<_, Option<String>>("features_json")? {
        Some(json) => Some(decode_features(&json)?),
        None => None,
    };

    Ok(Observation {
        obs_id: parse_uuid(row, "obs_id")?,
        annotation_id: parse_uuid(row, "annotation_id")?,
        image_id: parse_uuid(row, "image_id")?,
        tree_id: row.get("tree_id")?,
        roi_raw_path: row.get("roi_raw_path")?,
        obs_height: row.get("obs_height")?,
        features,
    })
}

fn encode_features(features: &CrownFeatures) -> RepoResult<String> {
    serde_json::to_string(features)
        .map_err(|err| RepoError::InvalidData(format!("unencodable crown features: {err}")))
}

fn decode_features(json: &str) -> RepoResult<CrownFeatures> {
    serde_json::from_str(json).map_err(|err| {
        RepoError::InvalidData(format!("invalid features_json payload: {err}"))
    })
}
