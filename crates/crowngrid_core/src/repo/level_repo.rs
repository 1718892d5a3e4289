//! Level repository: the per-tree altitude grid cells.
//!
//! # Responsibility
//! - Persist canonical `(tree, level)` records with their provenance.
//! - Keep the real/synth transitions in one place so pipeline code cannot
//!   produce mixed provenance.
//!
//! # Invariants
//! - At most one record per `(tree_id, h_level)`, enforced by a unique
//!   index; writers upsert through `get_by_tree_and_level` first.
//! - Every mutation refreshes `updated_at`.

use rusqlite::{params, Connection, Row};

use crate::model::level::{LevelDataType, LevelId, LevelRecord, SynthMethod};
use crate::model::observation::ObservationId;
use crate::repo::survey_repo::parse_uuid;
use crate::repo::{RepoError, RepoResult};

const LEVEL_SELECT_SQL: &str = "SELECT
    level_id,
    tree_id,
    h_level,
    data_type,
    source_obs_id,
    mapping_error,
    roi_norm_path,
    synth_method
FROM crown_levels";

/// One normalized real level, the unit of evidence consumed by synthesis
/// and export.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedLevel {
    pub tree_id: String,
    pub h_level: f64,
    pub roi_norm_path: String,
}

/// Repository interface for level records.
pub trait LevelRepository {
    fn create_level(&self, record: &LevelRecord) -> RepoResult<LevelId>;
    fn get_by_tree_and_level(&self, tree_id: &str, h_level: f64)
        -> RepoResult<Option<LevelRecord>>;
    /// Refreshes the winning observation of an existing `real` record. The
    /// normalized raster path is left alone; rerun the scale normalizer with
    /// overwrite to regenerate it.
    fn update_real_source(
        &self,
        id: LevelId,
        source_obs_id: ObservationId,
        mapping_error: f64,
    ) -> RepoResult<()>;
    /// Converts a `synth` record to `real`, clearing the synthesis fields
    /// and the synthesized raster path.
    fn convert_synth_to_real(
        &self,
        id: LevelId,
        source_obs_id: ObservationId,
        mapping_error: f64,
    ) -> RepoResult<()>;
    /// Re-points a record at a freshly synthesized raster, clearing any
    /// real provenance.
    fn update_synth(&self, id: LevelId, roi_norm_path: &str, method: SynthMethod)
        -> RepoResult<()>;
    fn set_norm_path(&self, id: LevelId, roi_norm_path: &str) -> RepoResult<()>;
    /// All `real` records ordered by tree and level.
    fn list_real(&self) -> RepoResult<Vec<LevelRecord>>;
    fn levels_for_tree(&self, tree_id: &str) -> RepoResult<Vec<LevelRecord>>;
    fn distinct_tree_ids(&self) -> RepoResult<Vec<String>>;
    /// Real records that already carry a normalized raster, optionally
    /// restricted to one tree, ordered by tree and level.
    fn normalized_real_levels(&self, only_tree: Option<&str>)
        -> RepoResult<Vec<NormalizedLevel>>;
}

/// SQLite-backed level repository.
pub struct SqliteLevelRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLevelRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl LevelRepository for SqliteLevelRepository<'_> {
    fn create_level(&self, record: &LevelRecord) -> RepoResult<LevelId> {
        record.validate()?;

        self.conn.execute(
            "INSERT INTO crown_levels (
                level_id,
                tree_id,
                h_level,
                data_type,
                source_obs_id,
                mapping_error,
                roi_norm_path,
                synth_method
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                record.level_id.to_string(),
                record.tree_id.as_str(),
                record.h_level,
                record.data_type.as_db_str(),
                record.source_obs_id.map(|id| id.to_string()),
                record.mapping_error,
                record.roi_norm_path.as_deref(),
                record.synth_method.map(|m| m.as_db_str()),
            ],
        )?;

        Ok(record.level_id)
    }

    fn get_by_tree_and_level(
        &self,
        tree_id: &str,
        h_level: f64,
    ) -> RepoResult<Option<LevelRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{LEVEL_SELECT_SQL}
             WHERE tree_id = ?1 AND h_level = ?2;"
        ))?;
        let mut rows = stmt.query(params![tree_id, h_level])?;

        if let Some(row) = rows.next()? {
            return Ok(Some(parse_level_row(row)?));
        }

        Ok(None)
    }

    fn update_real_source(
        &self,
        id: LevelId,
        source_obs_id: ObservationId,
        mapping_error: f64,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE crown_levels
             SET
                source_obs_id = ?1,
                mapping_error = ?2,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE level_id = ?3 AND data_type = 'real';",
            params![source_obs_id.to_string(), mapping_error, id.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "real level record",
                id: id.to_string(),
            });
        }

        Ok(())
    }

    fn convert_synth_to_real(
        &self,
        id: LevelId,
        source_obs_id: ObservationId,
        mapping_error: f64,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE crown_levels
             SET
                data_type = 'real',
                source_obs_id = ?1,
                mapping_error = ?2,
                roi_norm_path = NULL,
                synth_method = NULL,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE level_id = ?3 AND data_type = 'synth';",
            params![source_obs_id.to_string(), mapping_error, id.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "synth level record",
                id: id.to_string(),
            });
        }

        Ok(())
    }

    fn update_synth(
        &self,
        id: LevelId,
        roi_norm_path: &str,
        method: SynthMethod,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE crown_levels
             SET
                data_type = 'synth',
                source_obs_id = NULL,
                mapping_error = NULL,
                roi_norm_path = ?1,
                synth_method = ?2,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE level_id = ?3;",
            params![roi_norm_path, method.as_db_str(), id.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "level record",
                id: id.to_string(),
            });
        }

        Ok(())
    }

    fn set_norm_path(&self, id: LevelId, roi_norm_path: &str) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE crown_levels
             SET
                roi_norm_path = ?1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE level_id = ?2;",
            params![roi_norm_path, id.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "level record",
                id: id.to_string(),
            });
        }

        Ok(())
    }

    fn list_real(&self) -> RepoResult<Vec<LevelRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{LEVEL_SELECT_SQL}
             WHERE data_type = 'real'
             ORDER BY tree_id ASC, h_level ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();

        while let Some(row) = rows.next()? {
            records.push(parse_level_row(row)?);
        }

        Ok(records)
    }

    fn levels_for_tree(&self, tree_id: &str) -> RepoResult<Vec<LevelRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{LEVEL_SELECT_SQL}
             WHERE tree_id = ?1
             ORDER BY h_level ASC;"
        ))?;
        let mut rows = stmt.query(params![tree_id])?;
        let mut records = Vec::new();

        while let Some(row) = rows.next()? {
            records.push(parse_level_row(row)?);
        }

        Ok(records)
    }

    fn distinct_tree_ids(&self) -> RepoResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT tree_id FROM crown_levels ORDER BY tree_id ASC;")?;
        let mut rows = stmt.query([])?;
        let mut tree_ids = Vec::new();

        while let Some(row) = rows.next()? {
            tree_ids.push(row.get(0)?);
        }

        Ok(tree_ids)
    }

    fn normalized_real_levels(
        &self,
        only_tree: Option<&str>,
    ) -> RepoResult<Vec<NormalizedLevel>> {
        let mut stmt = self.conn.prepare(
            "SELECT tree_id, h_level, roi_norm_path
             FROM crown_levels
             WHERE data_type = 'real'
               AND roi_norm_path IS NOT NULL
               AND (?1 IS NULL OR tree_id = ?1)
             ORDER BY tree_id ASC, h_level ASC;",
        )?;
        let mut rows = stmt.query(params![only_tree])?;
        let mut levels = Vec::new();

        while let Some(row) = rows.next()? {
            levels.push(NormalizedLevel {
                tree_id: row.get("tree_id")?,
                h_level: row.get("h_level")?,
                roi_norm_path: row.get("roi_norm_path")?,
            });
        }

        Ok(levels)
    }
}

fn parse_level_row(row: &Row<'_>) -> RepoResult<LevelRecord> {
    let type_text: String = row.get("data_type")?;
    let data_type = LevelDataType::from_db_str(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid data type `{type_text}` in crown_levels.data_type"
        ))
    })?;

    let source_obs_id = match row.get::<_, Option<String>>("source_obs_id")? {
        Some(_) => Some(parse_uuid(row, "source_obs_id")?),
        None => None,
    };

    let synth_method = match row.get::<_, Option<String>>("synth_method")? {
        Some(value) => Some(SynthMethod::from_db_str(&value).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid synth method `{value}` in crown_levels.synth_method"
            ))
        })?),
        None => None,
    };

    Ok(LevelRecord {
        level_id: parse_uuid(row, "level_id")?,
        tree_id: row.get("tree_id")?,
        h_level: row.get("h_level")?,
        data_type,
        source_obs_id,
        mapping_error: row.get("mapping_error")?,
        roi_norm_path: row.get("roi_norm_path")?,
        synth_method,
    })
}
