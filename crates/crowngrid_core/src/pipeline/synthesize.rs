//! Level synthesis: manufacture rasters for grid cells real evidence
//! never reached.
//!
//! # Invariants
//! - A `real` record is never replaced by synthesis.
//! - Synthesis only consumes normalized real rasters of the same tree.
//! - Interpolation requires real levels strictly below and above the
//!   target; otherwise the nearest real raster is duplicated.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rusqlite::Connection;

use crate::grid::{bracketing_of, level_tag, nearest_of, AltitudeGrid};
use crate::model::level::{LevelRecord, SynthMethod};
use crate::pipeline::{BatchOutcome, PipelineError, PipelineResult, SkipReason};
use crate::raster::{blend, read_rgb, write_png};
use crate::repo::level_repo::{LevelRepository, SqliteLevelRepository};

/// Options for the synthesis stage.
#[derive(Debug, Clone, Default)]
pub struct SynthesizeOptions {
    pub roi_norm_dir: PathBuf,
    /// Restrict the pass to one tree.
    pub only_tree: Option<String>,
    /// Target these altitudes instead of the whole grid; values off the
    /// grid are allowed.
    pub only_levels: Option<Vec<f64>>,
    /// Regenerate cells already holding a synthesized record.
    pub overwrite_synth: bool,
}

/// Fills missing `(tree, level)` cells with synthesized rasters: linear
/// interpolation between the bracketing real levels when both sides exist,
/// a copy of the nearest real raster otherwise.
pub fn synthesize_missing(
    conn: &mut Connection,
    grid: &AltitudeGrid,
    options: &SynthesizeOptions,
) -> PipelineResult<BatchOutcome> {
    fs::create_dir_all(&options.roi_norm_dir).map_err(|err| PipelineError::OutputDir {
        path: options.roi_norm_dir.clone(),
        source: err,
    })?;

    let targets = resolve_targets(grid, options);

    let tx = conn.transaction()?;
    let mut outcome = BatchOutcome::new();
    {
        let level_repo = SqliteLevelRepository::new(&tx);

        let tree_ids = match &options.only_tree {
            Some(tree_id) => vec![tree_id.clone()],
            None => level_repo.distinct_tree_ids()?,
        };
        if tree_ids.is_empty() {
            warn!("event=synthesize module=pipeline status=ok processed=0 reason=no_trees");
            return Ok(outcome);
        }

        for tree_id in &tree_ids {
            let records = level_repo.levels_for_tree(tree_id)?;
            let by_level: HashMap<u64, &LevelRecord> = records
                .iter()
                .map(|record| (record.h_level.to_bits(), record))
                .collect();

            let mut real_norm: Vec<(f64, &str)> = records
                .iter()
                .filter(|record| record.is_real())
                .filter_map(|record| {
                    record
                        .roi_norm_path
                        .as_deref()
                        .map(|path| (record.h_level, path))
                })
                .collect();
            real_norm.sort_by(|a, b| a.0.total_cmp(&b.0));

            if real_norm.is_empty() {
                outcome.record_skip(
                    "synthesize",
                    tree_id.clone(),
                    SkipReason::EvidenceUnavailable("no normalized real levels".into()),
                );
                continue;
            }
            let real_levels: Vec<f64> = real_norm.iter().map(|(level, _)| *level).collect();

            for &target in &targets {
                if let Some(existing) = by_level.get(&target.to_bits()) {
                    let replace = existing.is_synth() && options.overwrite_synth;
                    if !replace {
                        debug!(
                            "event=synthesize module=pipeline status=skip reason=occupied tree_id={tree_id} h_level={} data_type={}",
                            level_tag(target),
                            existing.data_type
                        );
                        continue;
                    }
                }

                let item = format!("{}_{}", tree_id, level_tag(target));
                let (raster, method) = match bracketing_of(&real_levels, target) {
                    Some((low, high)) => {
                        let (Some(low_path), Some(high_path)) =
                            (path_at(&real_norm, low), path_at(&real_norm, high))
                        else {
                            outcome.record_skip(
                                "synthesize",
                                item,
                                SkipReason::EvidenceUnavailable(
                                    "bracketing rasters not recorded".into(),
                                ),
                            );
                            continue;
                        };
                        let low_img = match read_rgb(Path::new(low_path)) {
                            Ok(image) => image,
                            Err(err) => {
                                outcome.record_skip(
                                    "synthesize",
                                    item,
                                    SkipReason::EvidenceUnavailable(err.to_string()),
                                );
                                continue;
                            }
                        };
                        let high_img = match read_rgb(Path::new(high_path)) {
                            Ok(image) => image,
                            Err(err) => {
                                outcome.record_skip(
                                    "synthesize",
                                    item,
                                    SkipReason::EvidenceUnavailable(err.to_string()),
                                );
                                continue;
                            }
                        };
                        let alpha = (target - low) / (high - low);
                        match blend(&low_img, &high_img, alpha) {
                            Ok(image) => (image, SynthMethod::LinearBlend),
                            Err(err) => {
                                outcome.record_skip(
                                    "synthesize",
                                    item,
                                    SkipReason::DimensionMismatch(err.to_string()),
                                );
                                continue;
                            }
                        }
                    }
                    None => {
                        let Some(source_level) = nearest_of(&real_levels, target) else {
                            outcome.record_skip(
                                "synthesize",
                                item,
                                SkipReason::EvidenceUnavailable(
                                    "no real level to copy from".into(),
                                ),
                            );
                            continue;
                        };
                        let Some(source_path) = path_at(&real_norm, source_level) else {
                            outcome.record_skip(
                                "synthesize",
                                item,
                                SkipReason::EvidenceUnavailable(
                                    "nearest raster not recorded".into(),
                                ),
                            );
                            continue;
                        };
                        match read_rgb(Path::new(source_path)) {
                            Ok(image) => (image, SynthMethod::NearestCopy),
                            Err(err) => {
                                outcome.record_skip(
                                    "synthesize",
                                    item,
                                    SkipReason::EvidenceUnavailable(err.to_string()),
                                );
                                continue;
                            }
                        }
                    }
                };

                let out_path = options
                    .roi_norm_dir
                    .join(format!("{}_{}_synth.png", tree_id, level_tag(target)));
                if let Err(err) = write_png(&out_path, &raster) {
                    outcome.record_skip(
                        "synthesize",
                        item,
                        SkipReason::EncodingFailure(err.to_string()),
                    );
                    continue;
                }

                let path_str = out_path.to_string_lossy();
                match by_level.get(&target.to_bits()) {
                    Some(existing) => {
                        level_repo.update_synth(existing.level_id, &path_str, method)?;
                    }
                    None => {
                        let record = LevelRecord::new_synth(
                            tree_id.clone(),
                            target,
                            path_str.as_ref(),
                            method,
                        );
                        level_repo.create_level(&record)?;
                    }
                }
                outcome.processed += 1;
                info!(
                    "event=synthesize module=pipeline status=ok tree_id={tree_id} h_level={} method={}",
                    level_tag(target),
                    method
                );
            }
        }
    }
    tx.commit()?;

    info!(
        "event=synthesize module=pipeline status=ok processed={} skipped={}",
        outcome.processed,
        outcome.skipped_count()
    );
    Ok(outcome)
}

/// Requested targets in ascending order, deduplicated, non-finite values
/// dropped.
fn resolve_targets(grid: &AltitudeGrid, options: &SynthesizeOptions) -> Vec<f64> {
    match &options.only_levels {
        Some(levels) => {
            let mut targets: Vec<f64> = levels.iter().copied().filter(|l| l.is_finite()).collect();
            if targets.len() < levels.len() {
                warn!("event=synthesize module=pipeline status=skip reason=non_finite_target");
            }
            targets.sort_by(f64::total_cmp);
            targets.dedup();
            targets
        }
        None => grid.levels().to_vec(),
    }
}

fn path_at<'a>(pairs: &[(f64, &'a str)], level: f64) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(candidate, _)| *candidate == level)
        .map(|(_, path)| *path)
}
