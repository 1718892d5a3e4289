use std::path::{Path, PathBuf};

use crowngrid_core::db::open_db_in_memory;
use crowngrid_core::model::level::{LevelRecord, SynthMethod};
use crowngrid_core::repo::level_repo::{LevelRepository, SqliteLevelRepository};
use crowngrid_core::repo::survey_repo::{SqliteSurveyRepository, SurveyRepository};
use crowngrid_core::{synthesize_missing, AltitudeGrid, SynthesizeOptions};
use image::{Rgb, RgbImage};
use rusqlite::Connection;
use tempfile::TempDir;
use uuid::Uuid;

fn setup() -> (Connection, TempDir) {
    (open_db_in_memory().unwrap(), tempfile::tempdir().unwrap())
}

fn grid(levels: &[f64]) -> AltitudeGrid {
    AltitudeGrid::new(levels.to_vec()).unwrap()
}

fn options(dir: &TempDir) -> SynthesizeOptions {
    SynthesizeOptions {
        roi_norm_dir: dir.path().join("roi_norm"),
        only_tree: None,
        only_levels: None,
        overwrite_synth: false,
    }
}

fn write_norm_png(dir: &Path, name: &str, value: u8) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(16, 16, Rgb([value, value, value]))
        .save(&path)
        .unwrap();
    path
}

/// A real level record whose normalized raster is a solid 16x16 image of
/// `value`, or a record without a raster when `value` is `None`.
fn add_real_level(conn: &Connection, dir: &Path, tree_id: &str, height: f64, value: Option<u8>) {
    SqliteSurveyRepository::new(conn)
        .upsert_tree(tree_id, None)
        .unwrap();

    let mut record = LevelRecord::new_real(tree_id, height, Uuid::new_v4(), 0.0);
    if let Some(value) = value {
        let name = format!("{tree_id}_{height}.png");
        let path = write_norm_png(dir, &name, value);
        record.roi_norm_path = Some(path.to_string_lossy().into_owned());
    }
    SqliteLevelRepository::new(conn)
        .create_level(&record)
        .unwrap();
}

fn record_at(conn: &Connection, tree_id: &str, level: f64) -> Option<LevelRecord> {
    SqliteLevelRepository::new(conn)
        .get_by_tree_and_level(tree_id, level)
        .unwrap()
}

#[test]
fn bracketed_target_gets_a_linear_blend() {
    let (mut conn, dir) = setup();
    add_real_level(&conn, dir.path(), "t1", 0.0, Some(10));
    add_real_level(&conn, dir.path(), "t1", 5.0, Some(100));
    add_real_level(&conn, dir.path(), "t1", 15.0, Some(200));

    let outcome =
        synthesize_missing(&mut conn, &grid(&[0.0, 5.0, 10.0, 15.0]), &options(&dir)).unwrap();

    assert_eq!(outcome.processed, 1);
    let record = record_at(&conn, "t1", 10.0).unwrap();
    assert!(record.is_synth());
    assert_eq!(record.synth_method, Some(SynthMethod::LinearBlend));
    assert_eq!(record.source_obs_id, None);
    assert_eq!(record.mapping_error, None);

    // alpha = (10 - 5) / (15 - 5) = 0.5, so the blend of 100 and 200 is 150.
    let path = record.roi_norm_path.unwrap();
    assert!(path.ends_with("t1_10_synth.png"));
    let raster = image::open(&path).unwrap().to_rgb8();
    assert_eq!(raster.get_pixel(0, 0), &Rgb([150, 150, 150]));
}

#[test]
fn unbracketed_target_copies_the_nearest_level() {
    let (mut conn, dir) = setup();
    add_real_level(&conn, dir.path(), "t1", 5.0, Some(100));
    add_real_level(&conn, dir.path(), "t1", 15.0, Some(200));

    let synth_options = SynthesizeOptions {
        only_levels: Some(vec![20.0]),
        ..options(&dir)
    };
    let outcome =
        synthesize_missing(&mut conn, &grid(&[5.0, 10.0, 15.0]), &synth_options).unwrap();

    assert_eq!(outcome.processed, 1);
    let record = record_at(&conn, "t1", 20.0).unwrap();
    assert_eq!(record.synth_method, Some(SynthMethod::NearestCopy));
    let raster = image::open(record.roi_norm_path.unwrap()).unwrap().to_rgb8();
    assert_eq!(raster.get_pixel(0, 0), &Rgb([200, 200, 200]));
}

#[test]
fn target_below_all_real_levels_copies_the_lowest() {
    let (mut conn, dir) = setup();
    add_real_level(&conn, dir.path(), "t1", 10.0, Some(40));
    add_real_level(&conn, dir.path(), "t1", 15.0, Some(220));

    let outcome =
        synthesize_missing(&mut conn, &grid(&[5.0, 10.0, 15.0]), &options(&dir)).unwrap();

    assert_eq!(outcome.processed, 1);
    let record = record_at(&conn, "t1", 5.0).unwrap();
    assert_eq!(record.synth_method, Some(SynthMethod::NearestCopy));
    let raster = image::open(record.roi_norm_path.unwrap()).unwrap().to_rgb8();
    assert_eq!(raster.get_pixel(0, 0), &Rgb([40, 40, 40]));
}

#[test]
fn tree_without_normalized_evidence_is_skipped() {
    let (mut conn, dir) = setup();
    add_real_level(&conn, dir.path(), "t1", 5.0, None);

    let outcome = synthesize_missing(&mut conn, &grid(&[5.0, 10.0]), &options(&dir)).unwrap();

    assert_eq!(outcome.processed, 0);
    assert_eq!(outcome.skipped_count(), 1);
    assert_eq!(outcome.skipped[0].item, "t1");
    assert!(record_at(&conn, "t1", 10.0).is_none());
}

#[test]
fn real_cells_are_never_replaced() {
    let (mut conn, dir) = setup();
    add_real_level(&conn, dir.path(), "t1", 5.0, Some(100));
    add_real_level(&conn, dir.path(), "t1", 10.0, Some(150));

    let outcome = synthesize_missing(&mut conn, &grid(&[5.0, 10.0]), &options(&dir)).unwrap();

    assert_eq!(outcome.processed, 0);
    let record = record_at(&conn, "t1", 10.0).unwrap();
    assert!(record.is_real());
}

#[test]
fn existing_synth_cell_is_kept_unless_overwrite_is_requested() {
    let (mut conn, dir) = setup();
    add_real_level(&conn, dir.path(), "t1", 5.0, Some(100));
    add_real_level(&conn, dir.path(), "t1", 15.0, Some(200));
    let grid = grid(&[5.0, 10.0, 15.0]);

    let first = synthesize_missing(&mut conn, &grid, &options(&dir)).unwrap();
    assert_eq!(first.processed, 1);
    let created = record_at(&conn, "t1", 10.0).unwrap();

    let second = synthesize_missing(&mut conn, &grid, &options(&dir)).unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(
        record_at(&conn, "t1", 10.0).unwrap().level_id,
        created.level_id
    );

    let overwrite = SynthesizeOptions {
        overwrite_synth: true,
        ..options(&dir)
    };
    let third = synthesize_missing(&mut conn, &grid, &overwrite).unwrap();
    assert_eq!(third.processed, 1);
    // The slot is refreshed in place, never duplicated.
    assert_eq!(
        record_at(&conn, "t1", 10.0).unwrap().level_id,
        created.level_id
    );
    assert_eq!(
        SqliteLevelRepository::new(&conn)
            .levels_for_tree("t1")
            .unwrap()
            .len(),
        3
    );
}

#[test]
fn unreadable_evidence_skips_the_target_not_the_run() {
    let (mut conn, dir) = setup();
    // t1 evidence raster is recorded but missing on disk.
    SqliteSurveyRepository::new(&conn).upsert_tree("t1", None).unwrap();
    let mut broken = LevelRecord::new_real("t1", 5.0, Uuid::new_v4(), 0.0);
    broken.roi_norm_path = Some(dir.path().join("missing.png").to_string_lossy().into_owned());
    SqliteLevelRepository::new(&conn).create_level(&broken).unwrap();

    add_real_level(&conn, dir.path(), "t2", 5.0, Some(60));

    let outcome = synthesize_missing(&mut conn, &grid(&[5.0, 10.0]), &options(&dir)).unwrap();

    // t1's target 10 is skipped; t2's target 10 is synthesized.
    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.skipped_count(), 1);
    assert!(record_at(&conn, "t1", 10.0).is_none());
    assert!(record_at(&conn, "t2", 10.0).is_some());
}

#[test]
fn only_tree_restriction_leaves_other_trees_alone() {
    let (mut conn, dir) = setup();
    add_real_level(&conn, dir.path(), "t1", 5.0, Some(100));
    add_real_level(&conn, dir.path(), "t2", 5.0, Some(100));

    let restricted = SynthesizeOptions {
        only_tree: Some("t1".into()),
        ..options(&dir)
    };
    let outcome = synthesize_missing(&mut conn, &grid(&[5.0, 10.0]), &restricted).unwrap();

    assert_eq!(outcome.processed, 1);
    assert!(record_at(&conn, "t1", 10.0).is_some());
    assert!(record_at(&conn, "t2", 10.0).is_none());
}
