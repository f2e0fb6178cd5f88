//! Per-file reduction of one raw stack into an intermediate result.
//!
//! One call reads a raw file, splits it into its pump-on and pump-off
//! sub-sequences, validates each side, reduces both to compact aggregates
//! and persists them next to the other intermediate results. Advisory
//! conditions come back as warnings; the run carries on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};

use super::constants::PROCESSED_SUFFIX;
use super::disambiguate::{classify, sample_window, Condition};
use super::error::{MaskError, ProcessingWarning, ProcessorError};
use super::hdf_writer::IntermediateWriter;
use super::integrity::stack_is_intact;
use super::kernels::{indexed_masked_sum, masked_histogram, masked_sum, normed_sum};
use super::mask::border_mask;
use super::slicing::{Roi, SliceRange};
use super::stack_file::StackFile;

/// Read-only settings shared by every file of a processing run.
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub mask: Array2<u16>,
    pub border_size: usize,
    pub discard_first_last: bool,
    pub confidence_threshold: f64,
    pub rois: BTreeMap<String, Roi>,
}

/// Aggregates of one condition's retained frames.
#[derive(Debug, Clone)]
pub struct ConditionResult {
    pub avg_intensities: Array2<f64>,
    pub sum_intensities: Array1<f64>,
    pub histogram: Array1<u64>,
    pub rois: BTreeMap<String, Array1<f64>>,
}

/// Everything persisted for one processed raw file.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub confidence: f64,
    pub delay: f64,
    pub pump_on: ConditionResult,
    pub pump_off: ConditionResult,
}

/// Destination of the intermediate result for `src`, mirroring the relative
/// directory structure of the raw data under the processed root.
pub fn processed_path(src: &Path, raw_root: &Path, processed_root: &Path) -> PathBuf {
    let relative = src
        .strip_prefix(raw_root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| src.file_name().map(PathBuf::from).unwrap_or_default());
    let mut dest = processed_root.join(relative);
    let stem = dest
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string();
    dest.set_file_name(format!("{stem}{PROCESSED_SUFFIX}.h5"));
    dest
}

/// Process one raw stack file into an intermediate result file.
///
/// An existing destination makes this a no-op, so re-running a directory
/// after a partial failure is safe. A failed integrity check drops the
/// whole file without writing anything. Both cases are reported through
/// the returned warning list, not as errors.
pub fn process(
    src: &Path,
    raw_root: &Path,
    processed_root: &Path,
    settings: &ProcessSettings,
) -> Result<Vec<ProcessingWarning>, ProcessorError> {
    let mut warnings = Vec::new();

    let dest = processed_path(src, raw_root, processed_root);
    if dest.exists() {
        spdlog::info!("{} already exists, skipping...", dest.display());
        warnings.push(ProcessingWarning::AlreadyProcessed(dest));
        return Ok(warnings);
    }

    let stack = StackFile::open(src)?;
    let delay = stack.delay()?;
    let frame_shape = stack.frame_shape();
    if settings.mask.dim() != frame_shape {
        return Err(ProcessorError::MaskError(MaskError::ShapeMismatch {
            mask: settings.mask.dim(),
            frame: frame_shape,
        }));
    }

    // Only the sampling window is read for detection; the full condition
    // slices follow one at a time to keep peak memory at one slice.
    let (window_start, window_stop) = sample_window(stack.n_frames(), None);
    let window = stack.read_window(window_start, window_stop)?;
    let border = border_mask(frame_shape, settings.border_size);
    let split = classify(window.view(), border.view(), settings.discard_first_last);
    drop(window);

    if split.confidence < settings.confidence_threshold {
        spdlog::warn!(
            "low confidence in distinguishing pump on/off: {} frac={}",
            src.display(),
            split.confidence
        );
        warnings.push(ProcessingWarning::Undistinguishable {
            path: src.to_path_buf(),
            confidence: split.confidence,
        });
    }

    let pump_on = match reduce_condition(&stack, &split.pump_on, settings)? {
        Some(block) => block,
        None => {
            warnings.push(broken_image(src, Condition::PumpOn));
            return Ok(warnings);
        }
    };
    let pump_off = match reduce_condition(&stack, &split.pump_off, settings)? {
        Some(block) => block,
        None => {
            warnings.push(broken_image(src, Condition::PumpOff));
            return Ok(warnings);
        }
    };

    let result = FileResult {
        confidence: split.confidence,
        delay,
        pump_on,
        pump_off,
    };
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    IntermediateWriter::create(&dest)?.write(&result, settings.mask.view())?;
    Ok(warnings)
}

/// Read one condition slice, check it, reduce it. `None` means the batch is
/// corrupted and the whole file must be abandoned.
fn reduce_condition(
    stack: &StackFile,
    range: &SliceRange,
    settings: &ProcessSettings,
) -> Result<Option<ConditionResult>, ProcessorError> {
    let images = stack.read_condition(range)?;
    if !stack_is_intact(images.view(), settings.mask.view()) {
        return Ok(None);
    }
    let mask = settings.mask.view();
    let sum_intensities = masked_sum(images.view(), mask);
    let avg_intensities = normed_sum(images.view(), sum_intensities.view());
    let histogram = masked_histogram(images.view(), mask);
    let mut rois = BTreeMap::new();
    for (key, roi) in &settings.rois {
        rois.insert(
            key.clone(),
            indexed_masked_sum(
                images.view(),
                roi.rows.to_ndarray(),
                roi.cols.to_ndarray(),
                mask,
            ),
        );
    }
    Ok(Some(ConditionResult {
        avg_intensities,
        sum_intensities,
        histogram,
        rois,
    }))
}

fn broken_image(src: &Path, condition: Condition) -> ProcessingWarning {
    spdlog::warn!("found broken image in {} ({condition}); skipping...", src.display());
    ProcessingWarning::BrokenImage {
        path: src.to_path_buf(),
        condition,
    }
}
