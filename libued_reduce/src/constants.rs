//! Shared constants of the reduction pipeline.

/// Path of the image stack dataset inside a raw detector file.
pub const RAW_DATA_PATH: &str = "entry/data/data";

/// Path of the mask dataset inside an externally supplied mask file.
pub const MASK_DATA_PATH: &str = "mask";

/// Suffix appended to the stem of a raw file to name its intermediate result.
pub const PROCESSED_SUFFIX: &str = "_processed";

/// Byte offset of the delay field in a raw file basename (`pumpon_<delay>ps.h5`).
pub const DELAY_OFFSET: usize = 7;

/// Width of the detector border band used for pump on/off detection.
pub const DEFAULT_BORDER_SIZE: usize = 8;

/// Number of frames sampled when detecting the pump on/off phase.
pub const SAMPLE_WINDOW_SIZE: usize = 100;

/// Confidence ratios below this value are flagged as unreliable.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 100.0;

/// Floor for the confidence denominator, guards the division for dark borders.
pub const CONFIDENCE_EPSILON: f64 = 1e-10;

/// Column checked for the saturated-stripe hardware failure.
pub const DIAGNOSTIC_COLUMN: usize = 150;

/// Pixel value written by the detector when a column saturates.
pub const SATURATED_VALUE: u16 = u16::MAX;

/// More saturated pixels than this in the diagnostic column fails the batch.
pub const BROKEN_PIXEL_LIMIT: u64 = 3;

/// Number of histogram bins, one per representable pixel value.
pub const HISTOGRAM_BINS: usize = 1 << 16;

/// Number of intermediate files accumulated between merge checkpoints.
pub const CHECKPOINT_INTERVAL: usize = 25;
