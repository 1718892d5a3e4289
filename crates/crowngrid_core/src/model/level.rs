//! Canonical per-tree altitude-level records.
//!
//! # Responsibility
//! - Model the `(tree, altitude level)` cell of the dataset grid.
//! - Enforce the provenance rules that keep real and synthesized cells
//!   distinguishable.
//!
//! # Invariants
//! - A `real` record always names its source observation and the mapping
//!   error of that observation; it never carries a synthesis method.
//! - A `synth` record always names its synthesis method and normalized
//!   raster; it never points at a source observation.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::observation::ObservationId;

/// Stable identifier of a level record.
pub type LevelId = Uuid;

/// Provenance of a level record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelDataType {
    Real,
    Synth,
}

impl LevelDataType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            LevelDataType::Real => "real",
            LevelDataType::Synth => "synth",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "real" => Some(LevelDataType::Real),
            "synth" => Some(LevelDataType::Synth),
            _ => None,
        }
    }
}

impl fmt::Display for LevelDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// How a synthesized raster was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthMethod {
    LinearBlend,
    NearestCopy,
}

impl SynthMethod {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SynthMethod::LinearBlend => "linear_blend",
            SynthMethod::NearestCopy => "nearest_copy",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "linear_blend" => Some(SynthMethod::LinearBlend),
            "nearest_copy" => Some(SynthMethod::NearestCopy),
            _ => None,
        }
    }
}

impl fmt::Display for SynthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// One `(tree, altitude level)` cell.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelRecord {
    pub level_id: LevelId,
    pub tree_id: String,
    pub h_level: f64,
    pub data_type: LevelDataType,
    pub source_obs_id: Option<ObservationId>,
    pub mapping_error: Option<f64>,
    pub roi_norm_path: Option<String>,
    pub synth_method: Option<SynthMethod>,
}

impl LevelRecord {
    /// A fresh `real` record backed by a winning observation. The normalized
    /// raster path stays empty until the scale normalizer fills it.
    pub fn new_real(
        tree_id: impl Into<String>,
        h_level: f64,
        source_obs_id: ObservationId,
        mapping_error: f64,
    ) -> Self {
        Self {
            level_id: Uuid::new_v4(),
            tree_id: tree_id.into(),
            h_level,
            data_type: LevelDataType::Real,
            source_obs_id: Some(source_obs_id),
            mapping_error: Some(mapping_error),
            roi_norm_path: None,
            synth_method: None,
        }
    }

    /// A fresh `synth` record pointing at an already-written raster.
    pub fn new_synth(
        tree_id: impl Into<String>,
        h_level: f64,
        roi_norm_path: impl Into<String>,
        synth_method: SynthMethod,
    ) -> Self {
        Self {
            level_id: Uuid::new_v4(),
            tree_id: tree_id.into(),
            h_level,
            data_type: LevelDataType::Synth,
            source_obs_id: None,
            mapping_error: None,
            roi_norm_path: Some(roi_norm_path.into()),
            synth_method: Some(synth_method),
        }
    }

    pub fn is_real(&self) -> bool {
        self.data_type == LevelDataType::Real
    }

    pub fn is_synth(&self) -> bool {
        self.data_type == LevelDataType::Synth
    }

    /// Checks the cross-field provenance rules. Called on every write path.
    pub fn validate(&self) -> Result<(), LevelValidationError> {
        if !self.h_level.is_finite() {
            return Err(LevelValidationError::NonFiniteLevel(self.h_level));
        }
        if self.tree_id.trim().is_empty() {
            return Err(LevelValidationError::EmptyTreeId);
        }
        match self.data_type {
            LevelDataType::Real => {
                if self.source_obs_id.is_none() {
                    return Err(LevelValidationError::RealWithoutSource);
                }
                if self.synth_method.is_some() {
                    return Err(LevelValidationError::RealWithSynthMethod);
                }
                match self.mapping_error {
                    None => return Err(LevelValidationError::RealWithoutMappingError),
                    Some(err) if !err.is_finite() || err < 0.0 => {
                        return Err(LevelValidationError::InvalidMappingError(err));
                    }
                    Some(_) => {}
                }
            }
            LevelDataType::Synth => {
                if self.source_obs_id.is_some() {
                    return Err(LevelValidationError::SynthWithSource);
                }
                if self.synth_method.is_none() {
                    return Err(LevelValidationError::SynthWithoutMethod);
                }
                if self.mapping_error.is_some() {
                    return Err(LevelValidationError::SynthWithMappingError);
                }
            }
        }
        Ok(())
    }
}

/// Violation of the level provenance rules.
#[derive(Debug, Clone, PartialEq)]
pub enum LevelValidationError {
    NonFiniteLevel(f64),
    EmptyTreeId,
    RealWithoutSource,
    RealWithoutMappingError,
    RealWithSynthMethod,
    InvalidMappingError(f64),
    SynthWithSource,
    SynthWithoutMethod,
    SynthWithMappingError,
}

impl fmt::Display for LevelValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelValidationError::NonFiniteLevel(v) => {
                write!(f, "altitude level must be finite, got {v}")
            }
            LevelValidationError::EmptyTreeId => write!(f, "tree id must not be empty"),
            LevelValidationError::RealWithoutSource => {
                write!(f, "real level record requires a source observation")
            }
            LevelValidationError::RealWithoutMappingError => {
                write!(f, "real level record requires a mapping error")
            }
            LevelValidationError::RealWithSynthMethod => {
                write!(f, "real level record must not carry a synthesis method")
            }
            LevelValidationError::InvalidMappingError(v) => {
                write!(f, "mapping error must be finite and non-negative, got {v}")
            }
            LevelValidationError::SynthWithSource => {
                write!(f, "synth level record must not point at a source observation")
            }
            LevelValidationError::SynthWithoutMethod => {
                write!(f, "synth level record requires a synthesis method")
            }
            LevelValidationError::SynthWithMappingError => {
                write!(f, "synth level record must not carry a mapping error")
            }
        }
    }
}

impl Error for LevelValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_record_validates() {
        let record = LevelRecord::new_real("t1", 10.0, Uuid::new_v4(), 0.5);
        assert!(record.validate().is_ok());
        assert!(record.is_real());
    }

    #[test]
    fn synth_record_validates() {
        let record =
            LevelRecord::new_synth("t1", 12.5, "norm/t1_12.5_synth.png", SynthMethod::LinearBlend);
        assert!(record.validate().is_ok());
        assert!(record.is_synth());
        assert_eq!(record.synth_method, Some(SynthMethod::LinearBlend));
    }

    #[test]
    fn real_without_source_is_rejected() {
        let mut record = LevelRecord::new_real("t1", 10.0, Uuid::new_v4(), 0.5);
        record.source_obs_id = None;
        assert_eq!(
            record.validate(),
            Err(LevelValidationError::RealWithoutSource)
        );
    }

    #[test]
    fn synth_with_source_is_rejected() {
        let mut record =
            LevelRecord::new_synth("t1", 10.0, "norm/t1_10_synth.png", SynthMethod::NearestCopy);
        record.source_obs_id = Some(Uuid::new_v4());
        assert_eq!(record.validate(), Err(LevelValidationError::SynthWithSource));
    }

    #[test]
    fn negative_mapping_error_is_rejected() {
        let mut record = LevelRecord::new_real("t1", 10.0, Uuid::new_v4(), 0.5);
        record.mapping_error = Some(-0.1);
        assert!(matches!(
            record.validate(),
            Err(LevelValidationError::InvalidMappingError(_))
        ));
    }

    #[test]
    fn db_strings_round_trip() {
        assert_eq!(LevelDataType::from_db_str("real"), Some(LevelDataType::Real));
        assert_eq!(
            SynthMethod::from_db_str(SynthMethod::NearestCopy.as_db_str()),
            Some(SynthMethod::NearestCopy)
        );
        assert_eq!(SynthMethod::from_db_str("identity"), None);
    }
}
