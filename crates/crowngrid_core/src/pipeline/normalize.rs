//! Scale normalization: bring each real level's raw crop to the canonical
//! size and record where the normalized raster lives.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rusqlite::Connection;

use crate::grid::level_tag;
use crate::pipeline::{BatchOutcome, PipelineError, PipelineResult, SkipReason};
use crate::raster::{normalize_size, read_rgb, write_png};
use crate::repo::level_repo::{LevelRepository, SqliteLevelRepository};
use crate::repo::observation_repo::{ObservationRepository, SqliteObservationRepository};

/// Options for the scale normalization stage.
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub roi_norm_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Regenerate rasters for records that already carry a normalized path.
    pub overwrite: bool,
}

/// Normalizes the raw crop behind every `real` level record to the
/// canonical size, writing `{tree}_{level}.png` under the normalized ROI
/// directory and recording the path on the record.
pub fn normalize_scale(
    conn: &mut Connection,
    options: &NormalizeOptions,
) -> PipelineResult<BatchOutcome> {
    fs::create_dir_all(&options.roi_norm_dir).map_err(|err| PipelineError::OutputDir {
        path: options.roi_norm_dir.clone(),
        source: err,
    })?;

    let tx = conn.transaction()?;
    let mut outcome = BatchOutcome::new();
    {
        let obs_repo = SqliteObservationRepository::new(&tx);
        let level_repo = SqliteLevelRepository::new(&tx);

        let records = level_repo.list_real()?;
        if records.is_empty() {
            warn!("event=normalize_scale module=pipeline status=ok processed=0 reason=no_real_levels");
            return Ok(outcome);
        }

        for record in records {
            let item = format!("{}_{}", record.tree_id, level_tag(record.h_level));
            if record.roi_norm_path.is_some() && !options.overwrite {
                debug!(
                    "event=normalize_scale module=pipeline status=skip reason=already_normalized item={item}"
                );
                continue;
            }

            let Some(source_obs_id) = record.source_obs_id else {
                outcome.record_skip(
                    "normalize_scale",
                    item,
                    SkipReason::EvidenceUnavailable("real record has no source observation".into()),
                );
                continue;
            };

            let Some(raw_path) = obs_repo.raw_path(source_obs_id)? else {
                outcome.record_skip(
                    "normalize_scale",
                    item,
                    SkipReason::EvidenceUnavailable(format!(
                        "source observation {source_obs_id} not found"
                    )),
                );
                continue;
            };

            let raw = match read_rgb(Path::new(&raw_path)) {
                Ok(image) => image,
                Err(err) => {
                    outcome.record_skip(
                        "normalize_scale",
                        item,
                        SkipReason::EvidenceUnavailable(err.to_string()),
                    );
                    continue;
                }
            };

            let normalized = normalize_size(&raw, options.width, options.height);
            let out_path = options
                .roi_norm_dir
                .join(format!("{}_{}.png", record.tree_id, level_tag(record.h_level)));
            if let Err(err) = write_png(&out_path, &normalized) {
                outcome.record_skip(
                    "normalize_scale",
                    item,
                    SkipReason::EncodingFailure(err.to_string()),
                );
                continue;
            }

            level_repo.set_norm_path(record.level_id, &out_path.to_string_lossy())?;
            outcome.processed += 1;
            info!(
                "event=normalize_scale module=pipeline status=ok tree_id={} h_level={} path={}",
                record.tree_id,
                level_tag(record.h_level),
                out_path.display()
            );
        }
    }
    tx.commit()?;

    info!(
        "event=normalize_scale module=pipeline status=ok processed={} skipped={}",
        outcome.processed,
        outcome.skipped_count()
    );
    Ok(outcome)
}
