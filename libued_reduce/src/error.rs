use std::path::PathBuf;
use thiserror::Error;

use super::disambiguate::Condition;
use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum MaskError {
    #[error("Could not open mask because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Mask failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Mask shape {mask:?} does not match frame shape {frame:?}")]
    ShapeMismatch {
        mask: (usize, usize),
        frame: (usize, usize),
    },
}

#[derive(Debug, Error)]
pub enum StackFileError {
    #[error("Could not open raw stack because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Raw stack dataset in {0:?} has shape {1:?}; expected 3 dimensions")]
    NotAStack(PathBuf, Vec<usize>),
    #[error("Could not parse a delay value from file name {0:?}")]
    BadFileName(PathBuf),
    #[error("Raw stack failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Raw stack failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum HDF5WriterError {
    #[error("HDF5Writer failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("HDF5Writer failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to raw stack error: {0}")]
    StackError(#[from] StackFileError),
    #[error("Processor failed due to mask error: {0}")]
    MaskError(#[from] MaskError),
    #[error("Processor failed due to HDF5Writer error: {0}")]
    WriterError(#[from] HDF5WriterError),
    #[error("Processor failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Processor failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Collector destination {0:?} already exists")]
    DestinationExists(PathBuf),
    #[error("Collector did not find any intermediate files under {0:?}")]
    NoIntermediateFiles(PathBuf),
    #[error("Intermediate files carry ROI {0:?} which is not in the configured ROI set")]
    UnknownRoi(String),
    #[error("Collector could not read any intermediate file under {0:?}")]
    NoReadableFiles(PathBuf),
    #[error("Intermediate file {0:?} has mismatched array shapes")]
    SourceShapeMismatch(PathBuf),
    #[error("Collector failed due to raw stack error: {0}")]
    StackError(#[from] StackFileError),
    #[error("Collector failed due to HDF5Writer error: {0}")]
    WriterError(#[from] HDF5WriterError),
    #[error("Collector failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Collector failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum LogParseError {
    #[error("Could not open logfile because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Logfile line {0:?} does not contain a timestamp")]
    MissingTimestamp(String),
    #[error("Logfile line {0:?} is missing a scan number or delay value")]
    MalformedLine(String),
    #[error("Logfile failed to parse a timestamp: {0}")]
    TimestampError(#[from] time::error::Parse),
    #[error("Logfile failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Driver did not find any raw stack files under {0:?}")]
    NoInputFiles(PathBuf),
    #[error("Driver failed due to raw stack error: {0}")]
    StackError(#[from] StackFileError),
    #[error("Driver failed due to mask error: {0}")]
    MaskError(#[from] MaskError),
    #[error("Driver failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Driver failed due to logfile error: {0}")]
    LogError(#[from] LogParseError),
    #[error("Driver failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Driver failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

/// Advisory and per-file-recoverable conditions.
///
/// These are collected and returned to the caller instead of being raised;
/// a batch run keeps going when it encounters them.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingWarning {
    /// The destination of a processed file already exists; processing was a no-op.
    AlreadyProcessed(PathBuf),
    /// Pump on/off disambiguation fell below the confidence threshold.
    Undistinguishable { path: PathBuf, confidence: f64 },
    /// The integrity check failed; the file was dropped without output.
    BrokenImage { path: PathBuf, condition: Condition },
    /// The computed worker capacity collapsed to zero and was forced to one.
    ResourcePressure,
}

impl std::fmt::Display for ProcessingWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyProcessed(path) => {
                write!(f, "{} already exists", path.display())
            }
            Self::Undistinguishable { path, confidence } => {
                write!(
                    f,
                    "low confidence in distinguishing pump on/off: {} frac={confidence}",
                    path.display()
                )
            }
            Self::BrokenImage { path, condition } => {
                write!(
                    f,
                    "found broken image in {} ({condition}); skipping...",
                    path.display()
                )
            }
            Self::ResourcePressure => {
                write!(
                    f,
                    "you might want to free up some system memory; you can't fit a whole raw stack into it"
                )
            }
        }
    }
}
