//! Project configuration loaded from a JSON file.
//!
//! # Responsibility
//! - Describe where the store, rasters and exports live and how the
//!   pipeline stages are parameterized.
//! - Validate everything up front so batch runs fail before touching data.
//!
//! # Invariants
//! - A loaded `ProjectConfig` always carries a valid altitude grid, valid
//!   split ratios and a non-degenerate ROI size.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::grid::{AltitudeGrid, GridError};
use crate::logging::default_log_level;

const RATIO_SUM_TOLERANCE: f64 = 1e-6;

/// Invalid or unreadable project configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Grid(GridError),
    InvalidSplitRatios {
        train: f64,
        val: f64,
        test: f64,
    },
    InvalidRoiSize {
        width: u32,
        height: u32,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Grid(err) => write!(f, "{err}"),
            ConfigError::InvalidSplitRatios { train, val, test } => write!(
                f,
                "split ratios must be non-negative and sum to 1, got {train}/{val}/{test}"
            ),
            ConfigError::InvalidRoiSize { width, height } => {
                write!(f, "normalized ROI size must be positive, got {width}x{height}")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Grid(err) => Some(err),
            ConfigError::InvalidSplitRatios { .. } => None,
            ConfigError::InvalidRoiSize { .. } => None,
        }
    }
}

impl From<GridError> for ConfigError {
    fn from(value: GridError) -> Self {
        Self::Grid(value)
    }
}

/// Validated train/val/test fractions summing to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitRatios {
    train: f64,
    val: f64,
    test: f64,
}

impl SplitRatios {
    pub fn new(train: f64, val: f64, test: f64) -> Result<Self, ConfigError> {
        let invalid = [train, val, test]
            .iter()
            .any(|r| !r.is_finite() || *r < 0.0);
        if invalid || (train + val + test - 1.0).abs() > RATIO_SUM_TOLERANCE {
            return Err(ConfigError::InvalidSplitRatios { train, val, test });
        }
        Ok(Self { train, val, test })
    }

    pub fn train(&self) -> f64 {
        self.train
    }

    pub fn val(&self) -> f64 {
        self.val
    }

    pub fn test(&self) -> f64 {
        self.test
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub paths: PathsConfig,
    pub roi: RoiConfig,
    pub grid: GridConfig,
    pub export: ExportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Filesystem layout of the project.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub db_path: PathBuf,
    pub raw_images_dir: PathBuf,
    pub roi_raw_dir: PathBuf,
    pub roi_norm_dir: PathBuf,
    pub export_dir: PathBuf,
    pub log_dir: PathBuf,
}

/// Crop and normalization geometry.
#[derive(Debug, Clone, Deserialize)]
pub struct RoiConfig {
    pub padding_px: u32,
    pub norm_width: u32,
    pub norm_height: u32,
}

/// Canonical altitude levels in metres.
#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    pub levels_m: Vec<f64>,
}

/// Dataset export parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    pub train_ratio: f64,
    pub val_ratio: f64,
    pub test_ratio: f64,
    pub seed: u64,
}

/// Logging parameters; optional in the document.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level_string")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level_string(),
        }
    }
}

fn default_level_string() -> String {
    default_log_level().to_string()
}

impl ProjectConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.to_path_buf(),
            source: err,
        })?;
        let config: ProjectConfig =
            serde_json::from_str(&text).map_err(|err| ConfigError::Parse {
                path: path.to_path_buf(),
                source: err,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// The validated altitude grid.
    pub fn altitude_grid(&self) -> Result<AltitudeGrid, ConfigError> {
        Ok(AltitudeGrid::new(self.grid.levels_m.clone())?)
    }

    /// The validated split ratios.
    pub fn split_ratios(&self) -> Result<SplitRatios, ConfigError> {
        SplitRatios::new(
            self.export.train_ratio,
            self.export.val_ratio,
            self.export.test_ratio,
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.altitude_grid()?;
        self.split_ratios()?;
        if self.roi.norm_width == 0 || self.roi.norm_height == 0 {
            return Err(ConfigError::InvalidRoiSize {
                width: self.roi.norm_width,
                height: self.roi.norm_height,
            });
        }
        Ok(())
    }
}
