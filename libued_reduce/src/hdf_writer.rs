use hdf5::File;
use ndarray::ArrayView2;
use std::path::{Path, PathBuf};

use super::collector::{MergedData, MergedGroup};
use super::error::HDF5WriterError;
use super::processor::{ConditionResult, FileResult};

const CONFIDENCE_NAME: &str = "confidence";
const DELAY_NAME: &str = "delay";
const MASK_NAME: &str = "mask";
const DELAYS_NAME: &str = "delays";
const FILES_PER_DELAY_NAME: &str = "files_per_delay";
const AVG_INTENSITIES_NAME: &str = "avg_intensities";
const SUM_INTENSITIES_NAME: &str = "sum_intensities";
const HISTOGRAM_NAME: &str = "histogram";
const ROIS_NAME: &str = "rois";
const PROGRESS_NAME: &str = "progress";

// Intermediate result structure
// /confidence               scalar
// /delay                    scalar
// /mask                     (H, W)
// |---- pump_on | pump_off
// |    |---- avg_intensities   (H, W)
// |    |---- sum_intensities   (n_retained,)
// |    |---- histogram         (65536,)
// |    |---- rois
// |    |    |---- <key>        (n_retained,)

/// Writes one intermediate result file.
///
/// The destination is opened in exclusive-create mode, and removed again on
/// any mid-write failure, so a reader can never observe a partially written
/// file: it either exists complete or not at all.
#[derive(Debug)]
pub struct IntermediateWriter {
    file_handle: File,
    path: PathBuf,
}

impl IntermediateWriter {
    /// Create the writer, failing if the destination already exists.
    pub fn create(path: &Path) -> Result<Self, HDF5WriterError> {
        Ok(Self {
            file_handle: File::create_excl(path)?,
            path: path.to_path_buf(),
        })
    }

    /// Write the full result and consume the writer.
    pub fn write(
        self,
        result: &FileResult,
        mask: ArrayView2<'_, u16>,
    ) -> Result<(), HDF5WriterError> {
        match self.write_inner(result, mask) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = std::fs::remove_file(&self.path);
                Err(e)
            }
        }
    }

    fn write_inner(
        &self,
        result: &FileResult,
        mask: ArrayView2<'_, u16>,
    ) -> Result<(), HDF5WriterError> {
        self.file_handle
            .new_dataset::<f64>()
            .create(CONFIDENCE_NAME)?
            .write_scalar(&result.confidence)?;
        self.file_handle
            .new_dataset::<f64>()
            .create(DELAY_NAME)?
            .write_scalar(&result.delay)?;
        self.file_handle
            .new_dataset_builder()
            .with_data(mask)
            .create(MASK_NAME)?;
        write_condition(&self.file_handle, "pump_on", &result.pump_on)?;
        write_condition(&self.file_handle, "pump_off", &result.pump_off)?;
        Ok(())
    }
}

fn write_condition(
    file: &File,
    name: &str,
    block: &ConditionResult,
) -> Result<(), HDF5WriterError> {
    let group = file.create_group(name)?;
    group
        .new_dataset_builder()
        .with_data(&block.avg_intensities)
        .create(AVG_INTENSITIES_NAME)?;
    group
        .new_dataset_builder()
        .with_data(&block.sum_intensities)
        .create(SUM_INTENSITIES_NAME)?;
    group
        .new_dataset_builder()
        .with_data(&block.histogram)
        .create(HISTOGRAM_NAME)?;
    if !block.rois.is_empty() {
        let roi_group = group.create_group(ROIS_NAME)?;
        for (key, sums) in &block.rois {
            roi_group
                .new_dataset_builder()
                .with_data(sums)
                .create(key.as_str())?;
        }
    }
    Ok(())
}

// Merged dataset structure
// /confidence               (n_files,)
// /mask                     (H, W)
// /delays                   (n_delays,)
// /files_per_delay          (n_delays,)
// |---- pump_on | pump_off
// |    |---- avg_intensities   (n_delays, H, W)
// |    |---- sum_intensities   (n_files * n_retained,)
// |    |---- histogram         (n_delays, 65536)
// |    |---- rois
// |    |    |---- <key>        (n_files * n_retained,)

/// Write the merged dataset.
///
/// Checkpoint saves pass `overwrite` together with a progress fraction and
/// replace the temp file in place; the final save is exclusive-create, so a
/// completed merge is never silently confused with a partial one.
pub fn write_merged(
    path: &Path,
    data: &MergedData,
    overwrite: bool,
    progress: Option<f64>,
) -> Result<(), HDF5WriterError> {
    if overwrite && path.exists() {
        std::fs::remove_file(path)?;
    }
    let file = File::create_excl(path)?;
    file.new_dataset_builder()
        .with_data(&data.confidence)
        .create(CONFIDENCE_NAME)?;
    file.new_dataset_builder()
        .with_data(&data.mask)
        .create(MASK_NAME)?;
    file.new_dataset_builder()
        .with_data(&data.delays)
        .create(DELAYS_NAME)?;
    file.new_dataset_builder()
        .with_data(&data.files_per_delay)
        .create(FILES_PER_DELAY_NAME)?;
    write_merged_group(&file, "pump_on", &data.pump_on)?;
    write_merged_group(&file, "pump_off", &data.pump_off)?;
    if let Some(fraction) = progress {
        file.new_dataset::<f64>()
            .create(PROGRESS_NAME)?
            .write_scalar(&fraction)?;
    }
    Ok(())
}

fn write_merged_group(file: &File, name: &str, group: &MergedGroup) -> Result<(), HDF5WriterError> {
    let h5_group = file.create_group(name)?;
    h5_group
        .new_dataset_builder()
        .with_data(&group.avg_intensities)
        .create(AVG_INTENSITIES_NAME)?;
    h5_group
        .new_dataset_builder()
        .with_data(&group.sum_intensities)
        .create(SUM_INTENSITIES_NAME)?;
    h5_group
        .new_dataset_builder()
        .with_data(&group.histogram)
        .create(HISTOGRAM_NAME)?;
    if !group.rois.is_empty() {
        let roi_group = h5_group.create_group(ROIS_NAME)?;
        for (key, sums) in &group.rois {
            roi_group
                .new_dataset_builder()
                .with_data(sums)
                .create(key.as_str())?;
        }
    }
    Ok(())
}
