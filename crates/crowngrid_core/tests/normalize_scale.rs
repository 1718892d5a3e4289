use std::path::{Path, PathBuf};

use crowngrid_core::db::open_db_in_memory;
use crowngrid_core::model::observation::Observation;
use crowngrid_core::repo::level_repo::{LevelRepository, SqliteLevelRepository};
use crowngrid_core::repo::observation_repo::{ObservationRepository, SqliteObservationRepository};
use crowngrid_core::repo::survey_repo::{SqliteSurveyRepository, SurveyRepository};
use crowngrid_core::{assign_levels, normalize_scale, AltitudeGrid, AssignOptions, NormalizeOptions};
use image::{Rgb, RgbImage};
use rusqlite::Connection;
use tempfile::TempDir;
use uuid::Uuid;

fn setup() -> (Connection, TempDir) {
    (open_db_in_memory().unwrap(), tempfile::tempdir().unwrap())
}

fn write_raw_png(dir: &Path, name: &str, width: u32, height: u32, value: u8) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(width, height, Rgb([value, value, value]))
        .save(&path)
        .unwrap();
    path
}

/// One assigned real level backed by a raw crop at `raw_path`.
fn add_real_level(conn: &mut Connection, tree_id: &str, height: f64, raw_path: &Path) {
    let survey_repo = SqliteSurveyRepository::new(conn);
    survey_repo.upsert_tree(tree_id, None).unwrap();
    let image_id = survey_repo
        .insert_image_if_new(&format!("raw/{tree_id}_{height}.png"))
        .unwrap()
        .unwrap();

    let mut observation = Observation::new(
        Uuid::new_v4(),
        image_id,
        tree_id,
        raw_path.to_string_lossy().into_owned(),
        None,
    );
    observation.obs_height = Some(height);
    SqliteObservationRepository::new(conn)
        .create_observation(&observation)
        .unwrap();

    let grid = AltitudeGrid::new(vec![height]).unwrap();
    assign_levels(conn, &grid, &AssignOptions::default()).unwrap();
}

fn options(dir: &TempDir, overwrite: bool) -> NormalizeOptions {
    NormalizeOptions {
        roi_norm_dir: dir.path().join("roi_norm"),
        width: 64,
        height: 64,
        overwrite,
    }
}

#[test]
fn normalizes_raw_crop_to_canonical_size() {
    let (mut conn, dir) = setup();
    let raw = write_raw_png(dir.path(), "raw.png", 400, 300, 90);
    add_real_level(&mut conn, "t1", 10.0, &raw);

    let outcome = normalize_scale(&mut conn, &options(&dir, false)).unwrap();

    assert_eq!(outcome.processed, 1);
    assert!(outcome.skipped.is_empty());

    let record = &SqliteLevelRepository::new(&conn)
        .levels_for_tree("t1")
        .unwrap()[0];
    let norm_path = record.roi_norm_path.as_deref().unwrap();
    assert!(norm_path.ends_with("t1_10.png"));

    let normalized = image::open(norm_path).unwrap().to_rgb8();
    assert_eq!(normalized.dimensions(), (64, 64));
}

#[test]
fn already_normalized_records_are_skipped_without_overwrite() {
    let (mut conn, dir) = setup();
    let raw = write_raw_png(dir.path(), "raw.png", 200, 200, 50);
    add_real_level(&mut conn, "t1", 10.0, &raw);

    let first = normalize_scale(&mut conn, &options(&dir, false)).unwrap();
    let second = normalize_scale(&mut conn, &options(&dir, false)).unwrap();

    assert_eq!(first.processed, 1);
    assert_eq!(second.processed, 0);
    assert!(second.skipped.is_empty());
}

#[test]
fn overwrite_regenerates_the_raster() {
    let (mut conn, dir) = setup();
    let raw = write_raw_png(dir.path(), "raw.png", 200, 200, 50);
    add_real_level(&mut conn, "t1", 10.0, &raw);

    normalize_scale(&mut conn, &options(&dir, false)).unwrap();
    let overwritten = normalize_scale(&mut conn, &options(&dir, true)).unwrap();

    assert_eq!(overwritten.processed, 1);
}

#[test]
fn unreadable_raw_crop_is_skipped_and_batch_continues() {
    let (mut conn, dir) = setup();
    add_real_level(&mut conn, "t1", 10.0, Path::new("/nonexistent/raw.png"));
    let good = write_raw_png(dir.path(), "good.png", 128, 128, 70);
    add_real_level(&mut conn, "t2", 10.0, &good);

    let outcome = normalize_scale(&mut conn, &options(&dir, false)).unwrap();

    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.skipped_count(), 1);
    assert_eq!(outcome.skipped[0].item, "t1_10");

    let records = SqliteLevelRepository::new(&conn).levels_for_tree("t1").unwrap();
    assert_eq!(records[0].roi_norm_path, None);
}

#[test]
fn empty_store_returns_zero_outcome() {
    let (mut conn, dir) = setup();

    let outcome = normalize_scale(&mut conn, &options(&dir, false)).unwrap();

    assert_eq!(outcome.processed, 0);
    assert!(outcome.skipped.is_empty());
}
