//! Crown observations: one cropped ROI of one tree seen from one altitude.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::survey::{AnnotationId, CropBox, ImageId};

/// Stable identifier of a crown observation.
pub type ObservationId = Uuid;

/// Descriptive statistics computed from a raw ROI at crop time.
///
/// Serialized to JSON alongside the observation so reporting does not have
/// to re-open the raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrownFeatures {
    pub ellipse_area: f64,
    pub axis_ratio: Option<f64>,
    pub roi_mean_gray: f64,
    pub roi_std_gray: f64,
    pub bbox: CropBox,
}

/// One crown observation derived from a single annotation.
///
/// `obs_height` mirrors the flight altitude of the source image and stays
/// `None` until backfilled.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub obs_id: ObservationId,
    pub annotation_id: AnnotationId,
    pub image_id: ImageId,
    pub tree_id: String,
    pub roi_raw_path: String,
    pub obs_height: Option<f64>,
    pub features: Option<CrownFeatures>,
}

impl Observation {
    pub fn new(
        annotation_id: AnnotationId,
        image_id: ImageId,
        tree_id: impl Into<String>,
        roi_raw_path: impl Into<String>,
        features: Option<CrownFeatures>,
    ) -> Self {
        Self {
            obs_id: Uuid::new_v4(),
            annotation_id,
            image_id,
            tree_id: tree_id.into(),
            roi_raw_path: roi_raw_path.into(),
            obs_height: None,
            features,
        }
    }
}

/// Minimal projection used by level assignment: every observation that
/// carries a known altitude.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationHeight {
    pub obs_id: ObservationId,
    pub tree_id: String,
    pub obs_height: f64,
}
