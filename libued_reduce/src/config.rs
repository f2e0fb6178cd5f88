use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::constants::{DEFAULT_BORDER_SIZE, DEFAULT_CONFIDENCE_THRESHOLD};
use super::error::ConfigError;
use super::slicing::Roi;

/// Structure representing a processing-run configuration. Contains pathing,
/// reduction parameters and the ROI set.
/// Configs are serializable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the raw `scan_*/pumpon_*.h5` files.
    pub raw_path: PathBuf,
    /// Directory the intermediate results are mirrored into.
    pub processed_path: PathBuf,
    /// Destination of the merged dataset; must not exist yet.
    pub merged_path: PathBuf,
    /// Optional mask file (`mask` dataset, frame-shaped, 0/1 in u16).
    pub mask_path: Option<PathBuf>,
    /// Optional merge checkpoint file; defaults next to the destination.
    pub temp_path: Option<PathBuf>,
    /// Optional experiment log; when set, files are taken from it in
    /// acquisition order instead of scanning the raw directory.
    pub logfile_path: Option<PathBuf>,
    pub border_size: usize,
    pub discard_first_last: bool,
    pub confidence_threshold: f64,
    /// Worker override; computed from available memory when absent.
    pub n_workers: Option<usize>,
    pub rois: BTreeMap<String, Roi>,
}

impl Default for Config {
    /// Generate a new Config object. Path fields will be empty/invalid
    fn default() -> Self {
        Self {
            raw_path: PathBuf::from("None"),
            processed_path: PathBuf::from("None"),
            merged_path: PathBuf::from("None"),
            mask_path: None,
            temp_path: None,
            logfile_path: None,
            border_size: DEFAULT_BORDER_SIZE,
            discard_first_last: true,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            n_workers: None,
            rois: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }
}
