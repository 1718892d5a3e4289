//! Dataset pair export: adjacent-level training pairs plus a manifest.
//!
//! # Invariants
//! - Pairs come only from normalized `real` rasters of the same tree at
//!   adjacent grid levels.
//! - The train/val/test partition is by tree, so no tree leaks across
//!   splits, and only trees contributing at least one pair are
//!   partitioned.
//! - The same seed over the same eligible trees reproduces the same
//!   partition.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rusqlite::Connection;

use crate::config::SplitRatios;
use crate::grid::{level_tag, AltitudeGrid};
use crate::pipeline::{BatchOutcome, PipelineError, PipelineResult, Skip, SkipReason};
use crate::raster::{read_rgb, write_png};
use crate::repo::level_repo::{LevelRepository, SqliteLevelRepository};

const MANIFEST_FILE_NAME: &str = "manifest.csv";
const MANIFEST_HEADER: [&str; 8] = [
    "split", "tree_id", "h_in", "h_out", "A_path", "B_path", "src_A", "src_B",
];

/// Options for the dataset export stage.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub out_dir: PathBuf,
    pub ratios: SplitRatios,
    pub seed: u64,
    /// Restrict the export to one tree.
    pub only_tree: Option<String>,
}

/// What one export pass produced.
#[derive(Debug, Default)]
pub struct ExportOutcome {
    pub pairs_written: usize,
    pub skipped: Vec<Skip>,
    pub train_trees: usize,
    pub val_trees: usize,
    pub test_trees: usize,
}

/// Which split a tree landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitKind {
    Train,
    Val,
    Test,
}

impl SplitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitKind::Train => "train",
            SplitKind::Val => "val",
            SplitKind::Test => "test",
        }
    }
}

/// Tree-level train/val/test partition.
#[derive(Debug, Default)]
pub struct TreeSplit {
    pub train: HashSet<String>,
    pub val: HashSet<String>,
    pub test: HashSet<String>,
}

impl TreeSplit {
    pub fn kind_of(&self, tree_id: &str) -> SplitKind {
        if self.train.contains(tree_id) {
            SplitKind::Train
        } else if self.val.contains(tree_id) {
            SplitKind::Val
        } else {
            SplitKind::Test
        }
    }
}

/// Shuffles `tree_ids` and cuts them into train/val/test by the configured
/// ratios. Counts are rounded, then clamped so they never exceed what is
/// left; the test split takes the remainder.
pub fn split_trees(
    mut tree_ids: Vec<String>,
    ratios: &SplitRatios,
    rng: &mut impl Rng,
) -> TreeSplit {
    tree_ids.shuffle(rng);

    let total = tree_ids.len();
    let train_count = (((total as f64) * ratios.train()).round() as usize).min(total);
    let val_count = (((total as f64) * ratios.val()).round() as usize).min(total - train_count);

    let mut split = TreeSplit::default();
    for (index, tree_id) in tree_ids.into_iter().enumerate() {
        if index < train_count {
            split.train.insert(tree_id);
        } else if index < train_count + val_count {
            split.val.insert(tree_id);
        } else {
            split.test.insert(tree_id);
        }
    }
    split
}

struct PairCandidate {
    tree_id: String,
    h_in: f64,
    h_out: f64,
    src_a: String,
    src_b: String,
}

/// Exports adjacent-level pairs of normalized real rasters into
/// `<out_dir>/<split>/{A,B}/` and writes one manifest row per exported
/// pair.
pub fn export_dataset_pairs(
    conn: &mut Connection,
    grid: &AltitudeGrid,
    options: &ExportOptions,
) -> PipelineResult<ExportOutcome> {
    let out_dir = prepare_out_dir(&options.out_dir)?;

    let tx = conn.transaction()?;
    let mut batch = BatchOutcome::new();
    let mut split_sizes = (0usize, 0usize, 0usize);
    {
        let level_repo = SqliteLevelRepository::new(&tx);
        let rows = level_repo.normalized_real_levels(options.only_tree.as_deref())?;
        if rows.is_empty() {
            warn!("event=export_pairs module=pipeline status=ok pairs=0 reason=no_normalized_real_levels");
            return Ok(ExportOutcome::default());
        }

        let mut by_tree: BTreeMap<String, HashMap<u64, String>> = BTreeMap::new();
        for row in rows {
            by_tree
                .entry(row.tree_id)
                .or_default()
                .insert(row.h_level.to_bits(), row.roi_norm_path);
        }

        let neighbor_pairs = grid.neighbor_pairs();
        let mut candidates: Vec<PairCandidate> = Vec::new();
        let mut eligible: Vec<String> = Vec::new();
        for (tree_id, levels) in &by_tree {
            let mut has_pair = false;
            for &(low, high) in &neighbor_pairs {
                let (Some(src_a), Some(src_b)) =
                    (levels.get(&low.to_bits()), levels.get(&high.to_bits()))
                else {
                    continue;
                };
                candidates.push(PairCandidate {
                    tree_id: tree_id.clone(),
                    h_in: low,
                    h_out: high,
                    src_a: src_a.clone(),
                    src_b: src_b.clone(),
                });
                has_pair = true;
            }
            if has_pair {
                eligible.push(tree_id.clone());
            }
        }

        if candidates.is_empty() {
            warn!("event=export_pairs module=pipeline status=ok pairs=0 reason=no_adjacent_pairs");
            return Ok(ExportOutcome::default());
        }

        let mut rng = StdRng::seed_from_u64(options.seed);
        let split = split_trees(eligible, &options.ratios, &mut rng);
        split_sizes = (split.train.len(), split.val.len(), split.test.len());

        let manifest_path = out_dir.join(MANIFEST_FILE_NAME);
        let mut manifest =
            csv::Writer::from_path(&manifest_path).map_err(|err| PipelineError::Manifest {
                path: manifest_path.clone(),
                source: err,
            })?;
        manifest
            .write_record(MANIFEST_HEADER)
            .map_err(|err| PipelineError::Manifest {
                path: manifest_path.clone(),
                source: err,
            })?;

        for candidate in &candidates {
            let kind = split.kind_of(&candidate.tree_id);
            let h_in_tag = level_tag(candidate.h_in);
            let h_out_tag = level_tag(candidate.h_out);
            let file_name = format!("{}_{}_to_{}.png", candidate.tree_id, h_in_tag, h_out_tag);
            let item = file_name.clone();

            let image_a = match read_rgb(Path::new(&candidate.src_a)) {
                Ok(image) => image,
                Err(err) => {
                    batch.record_skip(
                        "export_pairs",
                        item,
                        SkipReason::EvidenceUnavailable(err.to_string()),
                    );
                    continue;
                }
            };
            let image_b = match read_rgb(Path::new(&candidate.src_b)) {
                Ok(image) => image,
                Err(err) => {
                    batch.record_skip(
                        "export_pairs",
                        item,
                        SkipReason::EvidenceUnavailable(err.to_string()),
                    );
                    continue;
                }
            };
            if image_a.dimensions() != image_b.dimensions() {
                batch.record_skip(
                    "export_pairs",
                    item,
                    SkipReason::DimensionMismatch(format!(
                        "{}x{} vs {}x{}",
                        image_a.width(),
                        image_a.height(),
                        image_b.width(),
                        image_b.height()
                    )),
                );
                continue;
            }

            let a_path = out_dir.join(kind.as_str()).join("A").join(&file_name);
            let b_path = out_dir.join(kind.as_str()).join("B").join(&file_name);
            if let Err(err) = write_png(&a_path, &image_a) {
                batch.record_skip(
                    "export_pairs",
                    item,
                    SkipReason::EncodingFailure(err.to_string()),
                );
                continue;
            }
            if let Err(err) = write_png(&b_path, &image_b) {
                batch.record_skip(
                    "export_pairs",
                    item,
                    SkipReason::EncodingFailure(err.to_string()),
                );
                continue;
            }

            let a_str = a_path.to_string_lossy();
            let b_str = b_path.to_string_lossy();
            manifest
                .write_record([
                    kind.as_str(),
                    candidate.tree_id.as_str(),
                    h_in_tag.as_str(),
                    h_out_tag.as_str(),
                    a_str.as_ref(),
                    b_str.as_ref(),
                    candidate.src_a.as_str(),
                    candidate.src_b.as_str(),
                ])
                .map_err(|err| PipelineError::Manifest {
                    path: manifest_path.clone(),
                    source: err,
                })?;
            batch.processed += 1;
        }

        manifest.flush().map_err(|err| PipelineError::Manifest {
            path: manifest_path.clone(),
            source: csv::Error::from(err),
        })?;
    }
    tx.commit()?;

    let outcome = ExportOutcome {
        pairs_written: batch.processed,
        skipped: batch.skipped,
        train_trees: split_sizes.0,
        val_trees: split_sizes.1,
        test_trees: split_sizes.2,
    };
    info!(
        "event=export_pairs module=pipeline status=ok pairs={} skipped={} train_trees={} val_trees={} test_trees={}",
        outcome.pairs_written,
        outcome.skipped.len(),
        outcome.train_trees,
        outcome.val_trees,
        outcome.test_trees
    );
    Ok(outcome)
}

fn prepare_out_dir(out_dir: &Path) -> PipelineResult<PathBuf> {
    let mkdir = |path: PathBuf| -> PipelineResult<()> {
        fs::create_dir_all(&path).map_err(|err| PipelineError::OutputDir { path, source: err })
    };
    mkdir(out_dir.to_path_buf())?;
    let out_dir = out_dir
        .canonicalize()
        .map_err(|err| PipelineError::OutputDir {
            path: out_dir.to_path_buf(),
            source: err,
        })?;
    for split in [SplitKind::Train, SplitKind::Val, SplitKind::Test] {
        for side in ["A", "B"] {
            mkdir(out_dir.join(split.as_str()).join(side))?;
        }
    }
    Ok(out_dir)
}
