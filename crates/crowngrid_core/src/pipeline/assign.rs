//! Level assignment: snap observations onto the canonical altitude grid.
//!
//! # Invariants
//! - At most one `real` record per `(tree, level)` cell survives a pass;
//!   the candidate with the smallest mapping error wins, equal errors keep
//!   the earlier observation.
//! - A `synth` record is never overwritten unless promotion is enabled.

use std::collections::HashMap;

use log::{debug, info, warn};
use rusqlite::Connection;

use crate::grid::AltitudeGrid;
use crate::model::level::LevelRecord;
use crate::model::observation::ObservationId;
use crate::pipeline::PipelineResult;
use crate::repo::level_repo::{LevelRepository, SqliteLevelRepository};
use crate::repo::observation_repo::{ObservationRepository, SqliteObservationRepository};

/// Options for level assignment.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignOptions {
    /// Allow a real observation to take over a cell currently held by a
    /// synthesized record.
    pub promote_synth: bool,
}

/// What one assignment pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AssignOutcome {
    /// Inserted or refreshed `real` records.
    pub upserted: usize,
    /// Cells left alone because a synthesized record occupies them.
    pub synth_conflicts: usize,
}

struct Candidate {
    obs_id: ObservationId,
    h_level: f64,
    mapping_error: f64,
}

/// Maps every observation with a known altitude to its nearest grid level
/// and upserts one `real` record per `(tree, level)` cell.
pub fn assign_levels(
    conn: &mut Connection,
    grid: &AltitudeGrid,
    options: &AssignOptions,
) -> PipelineResult<AssignOutcome> {
    let tx = conn.transaction()?;
    let mut outcome = AssignOutcome::default();
    {
        let obs_repo = SqliteObservationRepository::new(&tx);
        let level_repo = SqliteLevelRepository::new(&tx);

        let observations = obs_repo.list_with_height()?;
        if observations.is_empty() {
            warn!(
                "event=assign_levels module=pipeline status=ok upserted=0 reason=no_observations_with_height"
            );
            return Ok(outcome);
        }

        let mut best: HashMap<(String, u64), Candidate> = HashMap::new();
        for obs in &observations {
            let h_level = grid.nearest(obs.obs_height);
            let mapping_error = (obs.obs_height - h_level).abs();
            let key = (obs.tree_id.clone(), h_level.to_bits());
            match best.get(&key) {
                // Earlier candidate with an error at least as small stays.
                Some(current) if current.mapping_error <= mapping_error => {}
                _ => {
                    best.insert(
                        key,
                        Candidate {
                            obs_id: obs.obs_id,
                            h_level,
                            mapping_error,
                        },
                    );
                }
            }
        }

        let mut winners: Vec<((String, u64), Candidate)> = best.into_iter().collect();
        winners.sort_by(|((tree_a, _), cand_a), ((tree_b, _), cand_b)| {
            tree_a
                .cmp(tree_b)
                .then(cand_a.h_level.total_cmp(&cand_b.h_level))
        });

        for ((tree_id, _), candidate) in winners {
            match level_repo.get_by_tree_and_level(&tree_id, candidate.h_level)? {
                None => {
                    let record = LevelRecord::new_real(
                        tree_id.clone(),
                        candidate.h_level,
                        candidate.obs_id,
                        candidate.mapping_error,
                    );
                    level_repo.create_level(&record)?;
                    outcome.upserted += 1;
                }
                Some(existing) if existing.is_real() => {
                    level_repo.update_real_source(
                        existing.level_id,
                        candidate.obs_id,
                        candidate.mapping_error,
                    )?;
                    outcome.upserted += 1;
                }
                Some(existing) => {
                    if options.promote_synth {
                        level_repo.convert_synth_to_real(
                            existing.level_id,
                            candidate.obs_id,
                            candidate.mapping_error,
                        )?;
                        outcome.upserted += 1;
                    } else {
                        debug!(
                            "event=assign_levels module=pipeline status=skip reason=synth_occupies tree_id={tree_id} h_level={}",
                            candidate.h_level
                        );
                        outcome.synth_conflicts += 1;
                    }
                }
            }
        }
    }
    tx.commit()?;

    info!(
        "event=assign_levels module=pipeline status=ok upserted={} synth_conflicts={}",
        outcome.upserted, outcome.synth_conflicts
    );
    Ok(outcome)
}
