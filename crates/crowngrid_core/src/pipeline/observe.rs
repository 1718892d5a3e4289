//! Observation build: crop one ROI per annotation and record its features.

use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

use image::imageops;
use log::{debug, info, warn};
use rusqlite::Connection;

use crate::model::observation::{CrownFeatures, Observation};
use crate::pipeline::{BatchOutcome, PipelineError, PipelineResult, SkipReason};
use crate::raster::{gray_stats, read_rgb, write_png};
use crate::repo::observation_repo::{ObservationRepository, SqliteObservationRepository};
use crate::repo::survey_repo::{SqliteSurveyRepository, SurveyRepository};

/// Options for the observation build stage.
#[derive(Debug, Clone)]
pub struct ObserveOptions {
    pub roi_raw_dir: PathBuf,
    pub padding_px: u32,
}

/// Crops a padded ROI for every annotation that does not have an
/// observation yet, writes the raw crop to disk and records the
/// observation with its descriptive features.
///
/// Already-covered annotations are left untouched; unreadable images and
/// degenerate crops are skipped per item.
pub fn build_observations(
    conn: &mut Connection,
    options: &ObserveOptions,
) -> PipelineResult<BatchOutcome> {
    fs::create_dir_all(&options.roi_raw_dir).map_err(|err| PipelineError::OutputDir {
        path: options.roi_raw_dir.clone(),
        source: err,
    })?;

    let tx = conn.transaction()?;
    let mut outcome = BatchOutcome::new();
    {
        let survey_repo = SqliteSurveyRepository::new(&tx);
        let obs_repo = SqliteObservationRepository::new(&tx);

        let crops = survey_repo.list_annotation_crops()?;
        if crops.is_empty() {
            warn!("event=build_observations module=pipeline status=ok processed=0 reason=no_annotations");
            return Ok(outcome);
        }

        for crop in crops {
            let annotation = &crop.annotation;
            if obs_repo.exists_for_annotation(annotation.annotation_id)? {
                debug!(
                    "event=build_observations module=pipeline status=skip reason=exists annotation_id={}",
                    annotation.annotation_id
                );
                continue;
            }

            let item = annotation.annotation_id.to_string();
            let image = match read_rgb(Path::new(&crop.image_path)) {
                Ok(image) => image,
                Err(err) => {
                    outcome.record_skip(
                        "build_observations",
                        item,
                        SkipReason::EvidenceUnavailable(err.to_string()),
                    );
                    continue;
                }
            };

            let Some(bbox) =
                annotation.padded_crop_box(options.padding_px, image.width(), image.height())
            else {
                outcome.record_skip(
                    "build_observations",
                    item,
                    SkipReason::EvidenceUnavailable("annotation lies outside the image".into()),
                );
                continue;
            };

            let roi = imageops::crop_imm(&image, bbox.xmin, bbox.ymin, bbox.width(), bbox.height())
                .to_image();
            let (roi_mean_gray, roi_std_gray) = gray_stats(&roi);
            let features = CrownFeatures {
                ellipse_area: PI * annotation.a * annotation.b,
                axis_ratio: if annotation.b != 0.0 {
                    Some(annotation.a / annotation.b)
                } else {
                    None
                },
                roi_mean_gray,
                roi_std_gray,
                bbox,
            };

            let mut observation = Observation::new(
                annotation.annotation_id,
                annotation.image_id,
                annotation.tree_id.clone(),
                "",
                Some(features),
            );
            let out_path = options
                .roi_raw_dir
                .join(format!("{}.png", observation.obs_id));
            observation.roi_raw_path = out_path.to_string_lossy().into_owned();

            if let Err(err) = write_png(&out_path, &roi) {
                outcome.record_skip(
                    "build_observations",
                    item,
                    SkipReason::EncodingFailure(err.to_string()),
                );
                continue;
            }

            obs_repo.create_observation(&observation)?;
            outcome.processed += 1;
            info!(
                "event=build_observations module=pipeline status=ok annotation_id={} obs_id={} tree_id={}",
                annotation.annotation_id, observation.obs_id, observation.tree_id
            );
        }
    }
    tx.commit()?;

    info!(
        "event=build_observations module=pipeline status=ok processed={} skipped={}",
        outcome.processed,
        outcome.skipped_count()
    );
    Ok(outcome)
}
