use std::path::Path;

use crowngrid_core::db::maintenance::{dedup_annotations_keep_latest, remove_orphan_observations};
use crowngrid_core::db::open_db_in_memory;
use crowngrid_core::model::survey::EllipseAnnotation;
use crowngrid_core::repo::observation_repo::{ObservationRepository, SqliteObservationRepository};
use crowngrid_core::repo::survey_repo::{SqliteSurveyRepository, SurveyRepository};
use crowngrid_core::{build_observations, ObserveOptions};
use image::{Rgb, RgbImage};
use rusqlite::{params, Connection};
use tempfile::TempDir;
use uuid::Uuid;

fn setup() -> (Connection, TempDir) {
    (open_db_in_memory().unwrap(), tempfile::tempdir().unwrap())
}

fn options(dir: &TempDir) -> ObserveOptions {
    ObserveOptions {
        roi_raw_dir: dir.path().join("roi_raw"),
        padding_px: 4,
    }
}

/// Registers a photograph on disk plus one annotation of `tree_id` on it.
fn add_annotated_image(
    conn: &Connection,
    dir: &Path,
    name: &str,
    tree_id: &str,
    x0: f64,
    y0: f64,
) -> Uuid {
    let path = dir.join(name);
    RgbImage::from_pixel(120, 100, Rgb([60, 90, 30]))
        .save(&path)
        .unwrap();

    let survey_repo = SqliteSurveyRepository::new(conn);
    let image_id = survey_repo
        .insert_image_if_new(&path.to_string_lossy())
        .unwrap()
        .unwrap();
    survey_repo.upsert_tree(tree_id, None).unwrap();
    let annotation = EllipseAnnotation::new(image_id, tree_id, x0, y0, 10.0, 8.0, 0.0);
    survey_repo.insert_annotation(&annotation).unwrap()
}

fn observation_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM crown_observations;", [], |row| {
        row.get(0)
    })
    .unwrap()
}

#[test]
fn builds_one_observation_per_annotation() {
    let (mut conn, dir) = setup();
    add_annotated_image(&conn, dir.path(), "scan_a.png", "t1", 50.0, 40.0);
    add_annotated_image(&conn, dir.path(), "scan_b.png", "t2", 60.0, 50.0);

    let outcome = build_observations(&mut conn, &options(&dir)).unwrap();

    assert_eq!(outcome.processed, 2);
    assert!(outcome.skipped.is_empty());

    let observations = SqliteObservationRepository::new(&conn)
        .list_recent(10)
        .unwrap();
    assert_eq!(observations.len(), 2);
    for obs in &observations {
        assert!(Path::new(&obs.roi_raw_path).exists());
        assert_eq!(obs.obs_height, None);
        let features = obs.features.as_ref().unwrap();
        assert!(features.ellipse_area > 0.0);
        assert_eq!(features.axis_ratio, Some(10.0 / 8.0));
        // Solid-color source, so the crop has zero grayscale spread.
        assert_eq!(features.roi_std_gray, 0.0);
    }
}

#[test]
fn crop_respects_padding_and_image_bounds() {
    let (mut conn, dir) = setup();
    add_annotated_image(&conn, dir.path(), "scan.png", "t1", 50.0, 40.0);

    build_observations(&mut conn, &options(&dir)).unwrap();

    let obs = &SqliteObservationRepository::new(&conn)
        .list_recent(1)
        .unwrap()[0];
    let roi = image::open(&obs.roi_raw_path).unwrap().to_rgb8();
    // Ellipse semi-axes (10, 8) plus 4px padding on each side.
    assert_eq!(roi.dimensions(), (28, 24));
}

#[test]
fn second_run_is_idempotent_per_annotation() {
    let (mut conn, dir) = setup();
    add_annotated_image(&conn, dir.path(), "scan.png", "t1", 50.0, 40.0);

    let first = build_observations(&mut conn, &options(&dir)).unwrap();
    let second = build_observations(&mut conn, &options(&dir)).unwrap();

    assert_eq!(first.processed, 1);
    assert_eq!(second.processed, 0);
    assert_eq!(observation_count(&conn), 1);
}

#[test]
fn unreadable_photograph_is_skipped_and_batch_continues() {
    let (mut conn, dir) = setup();
    // Register an image path with no file behind it.
    let survey_repo = SqliteSurveyRepository::new(&conn);
    let missing_id = survey_repo
        .insert_image_if_new(&dir.path().join("missing.png").to_string_lossy())
        .unwrap()
        .unwrap();
    survey_repo.upsert_tree("t1", None).unwrap();
    let annotation = EllipseAnnotation::new(missing_id, "t1", 50.0, 40.0, 10.0, 8.0, 0.0);
    survey_repo.insert_annotation(&annotation).unwrap();

    add_annotated_image(&conn, dir.path(), "good.png", "t2", 60.0, 50.0);

    let outcome = build_observations(&mut conn, &options(&dir)).unwrap();

    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.skipped_count(), 1);
    assert_eq!(observation_count(&conn), 1);
}

#[test]
fn annotation_outside_the_image_is_skipped() {
    let (mut conn, dir) = setup();
    add_annotated_image(&conn, dir.path(), "scan.png", "t1", 500.0, 400.0);

    let outcome = build_observations(&mut conn, &options(&dir)).unwrap();

    assert_eq!(outcome.processed, 0);
    assert_eq!(outcome.skipped_count(), 1);
}

#[test]
fn dedup_keeps_the_newest_annotation_per_image_and_tree() {
    let (conn, dir) = setup();
    let older = add_annotated_image(&conn, dir.path(), "scan.png", "t1", 50.0, 40.0);

    let survey_repo = SqliteSurveyRepository::new(&conn);
    let image_id: String = conn
        .query_row("SELECT image_id FROM images LIMIT 1;", [], |row| row.get(0))
        .unwrap();
    let newer = EllipseAnnotation::new(Uuid::parse_str(&image_id).unwrap(), "t1", 55.0, 45.0, 9.0, 7.0, 0.0);
    survey_repo.insert_annotation(&newer).unwrap();

    // created_at has second granularity; force a visible ordering.
    conn.execute(
        "UPDATE annotations SET created_at = created_at - 1000 WHERE annotation_id = ?1;",
        params![older.to_string()],
    )
    .unwrap();

    let deleted = dedup_annotations_keep_latest(&conn).unwrap();

    assert_eq!(deleted, 1);
    let survivor: String = conn
        .query_row("SELECT annotation_id FROM annotations;", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(survivor, newer.annotation_id.to_string());
}

#[test]
fn orphan_observations_are_removed_after_dedup() {
    let (mut conn, dir) = setup();
    let annotation_id = add_annotated_image(&conn, dir.path(), "scan.png", "t1", 50.0, 40.0);
    build_observations(&mut conn, &options(&dir)).unwrap();
    assert_eq!(observation_count(&conn), 1);

    conn.execute(
        "DELETE FROM annotations WHERE annotation_id = ?1;",
        params![annotation_id.to_string()],
    )
    .unwrap();

    let removed = remove_orphan_observations(&conn).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(observation_count(&conn), 0);
}
