//! Batch driver for the crowngrid curation pipeline.
//!
//! Every subcommand loads the project config, initializes logging, opens
//! the store and runs exactly one batch operation end to end.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;

use crowngrid_core::db::maintenance::{dedup_annotations_keep_latest, remove_orphan_observations};
use crowngrid_core::grid::level_tag;
use crowngrid_core::repo::level_repo::LevelRepository;
use crowngrid_core::{
    assign_levels, backfill_observation_heights, build_observations, export_dataset_pairs,
    fill_flight_altitudes, import_survey_images, init_logging, normalize_scale,
    synthesize_missing, AssignOptions, ExportOptions, NormalizeOptions, ObservationRepository,
    ObserveOptions, ProjectConfig, SqliteLevelRepository, SqliteObservationRepository,
    SynthesizeOptions,
};

#[derive(Parser, Debug)]
#[command(name = "crowngrid", about = "Multi-altitude tree crown dataset curation")]
struct Cli {
    /// Path to the project configuration file.
    #[arg(short, long, default_value = "crowngrid.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register raster files found under the raw images directory.
    ImportImages,
    /// Parse flight altitudes out of image file names.
    FillAltitude,
    /// Crop one ROI per annotation and record its features.
    BuildObservations,
    /// Copy image flight altitudes onto observations lacking a height.
    BackfillHeights,
    /// Delete duplicate annotations, keeping the newest per (image, tree).
    DedupAnnotations,
    /// Delete observations whose annotation no longer exists.
    CleanupObservations,
    /// Snap observations onto the altitude grid as real level records.
    AssignLevels {
        /// Let a real observation take over a cell held by a synth record.
        #[arg(long)]
        promote_synth: bool,
    },
    /// Resample raw crops of real level records to the canonical size.
    NormalizeScale {
        /// Regenerate rasters for records already normalized.
        #[arg(long)]
        overwrite: bool,
    },
    /// Fill grid cells without real data with synthesized rasters.
    Synthesize {
        /// Restrict the pass to one tree.
        #[arg(long)]
        tree: Option<String>,
        /// Target these altitudes instead of the whole grid.
        #[arg(long, value_delimiter = ',')]
        levels: Option<Vec<f64>>,
        /// Regenerate cells already holding a synthesized record.
        #[arg(long)]
        overwrite: bool,
    },
    /// Export adjacent-level training pairs with a train/val/test split.
    ExportPairs {
        /// Restrict the export to one tree.
        #[arg(long)]
        tree: Option<String>,
        /// Override the partitioning seed from the config.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Show recent observations next to their image flight altitudes.
    CheckHeights {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show the real/synth/empty level profile of one tree.
    ShowLevels { tree: String },
    /// List recent observations with their features.
    ListObservations {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli module=cli status=error error={err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = ProjectConfig::load(&cli.config)?;
    init_logging(&config.logging.level, &config.paths.log_dir.to_string_lossy())?;
    let mut conn = crowngrid_core::open_db(&config.paths.db_path)?;

    match cli.command {
        Command::ImportImages => {
            let added = import_survey_images(&mut conn, &config.paths.raw_images_dir)?;
            println!("imported {added} image(s)");
        }
        Command::FillAltitude => {
            let updated = fill_flight_altitudes(&mut conn)?;
            println!("updated flight altitude on {updated} image(s)");
        }
        Command::BuildObservations => {
            let outcome = build_observations(
                &mut conn,
                &ObserveOptions {
                    roi_raw_dir: config.paths.roi_raw_dir.clone(),
                    padding_px: config.roi.padding_px,
                },
            )?;
            println!(
                "built {} observation(s), skipped {}",
                outcome.processed,
                outcome.skipped_count()
            );
        }
        Command::BackfillHeights => {
            let updated = backfill_observation_heights(&mut conn)?;
            println!("backfilled obs_height on {updated} observation(s)");
        }
        Command::DedupAnnotations => {
            let deleted = dedup_annotations_keep_latest(&conn)?;
            println!("deleted {deleted} duplicate annotation(s)");
        }
        Command::CleanupObservations => {
            let deleted = remove_orphan_observations(&conn)?;
            println!("deleted {deleted} orphan observation(s)");
        }
        Command::AssignLevels { promote_synth } => {
            let grid = config.altitude_grid()?;
            let outcome = assign_levels(&mut conn, &grid, &AssignOptions { promote_synth })?;
            println!(
                "upserted {} real level record(s), {} synth conflict(s) left alone",
                outcome.upserted, outcome.synth_conflicts
            );
        }
        Command::NormalizeScale { overwrite } => {
            let outcome = normalize_scale(
                &mut conn,
                &NormalizeOptions {
                    roi_norm_dir: config.paths.roi_norm_dir.clone(),
                    width: config.roi.norm_width,
                    height: config.roi.norm_height,
                    overwrite,
                },
            )?;
            println!(
                "normalized {} record(s), skipped {}",
                outcome.processed,
                outcome.skipped_count()
            );
        }
        Command::Synthesize {
            tree,
            levels,
            overwrite,
        } => {
            let grid = config.altitude_grid()?;
            let outcome = synthesize_missing(
                &mut conn,
                &grid,
                &SynthesizeOptions {
                    roi_norm_dir: config.paths.roi_norm_dir.clone(),
                    only_tree: tree,
                    only_levels: levels,
                    overwrite_synth: overwrite,
                },
            )?;
            println!(
                "synthesized {} record(s), skipped {}",
                outcome.processed,
                outcome.skipped_count()
            );
        }
        Command::ExportPairs { tree, seed } => {
            let grid = config.altitude_grid()?;
            let outcome = export_dataset_pairs(
                &mut conn,
                &grid,
                &ExportOptions {
                    out_dir: config.paths.export_dir.clone(),
                    ratios: config.split_ratios()?,
                    seed: seed.unwrap_or(config.export.seed),
                    only_tree: tree,
                },
            )?;
            println!(
                "exported {} pair(s) (trees: {} train / {} val / {} test), skipped {}",
                outcome.pairs_written,
                outcome.train_trees,
                outcome.val_trees,
                outcome.test_trees,
                outcome.skipped.len()
            );
        }
        Command::CheckHeights { limit } => {
            let repo = SqliteObservationRepository::new(&conn);
            for check in repo.list_recent_height_checks(limit)? {
                let obs = format_altitude(check.obs_height);
                let img = format_altitude(check.flight_altitude);
                let marker = if check.obs_height == check.flight_altitude {
                    ""
                } else {
                    "  <- differs"
                };
                println!(
                    "{}  tree={}  obs_height={obs}  flight_altitude={img}{marker}",
                    check.obs_id, check.tree_id
                );
            }
        }
        Command::ShowLevels { tree } => {
            let grid = config.altitude_grid()?;
            let repo = SqliteLevelRepository::new(&conn);
            let records = repo.levels_for_tree(&tree)?;
            for &level in grid.levels() {
                let slot = records.iter().find(|record| record.h_level == level);
                let state = match slot {
                    None => "EMPTY".to_string(),
                    Some(record) if record.is_real() => format!(
                        "REAL  mapping_error={}",
                        record
                            .mapping_error
                            .map_or_else(|| "?".to_string(), |e| format!("{e:.2}"))
                    ),
                    Some(record) => format!(
                        "SYNTH method={}",
                        record
                            .synth_method
                            .map_or("?", |method| method.as_db_str())
                    ),
                };
                println!("{tree} @ {}m: {state}", level_tag(level));
            }
        }
        Command::ListObservations { limit } => {
            let repo = SqliteObservationRepository::new(&conn);
            for obs in repo.list_recent(limit)? {
                let height = format_altitude(obs.obs_height);
                let features = obs
                    .features
                    .map(|f| {
                        format!(
                            "area={:.1} mean_gray={:.1}",
                            f.ellipse_area, f.roi_mean_gray
                        )
                    })
                    .unwrap_or_else(|| "no features".to_string());
                println!(
                    "{}  tree={}  height={height}  {features}  {}",
                    obs.obs_id, obs.tree_id, obs.roi_raw_path
                );
            }
        }
    }

    Ok(())
}

fn format_altitude(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| level_tag(v))
}
