//! Read access to raw detector frame-stack files.
//!
//! A raw file holds one HDF5 dataset of shape `(N, H, W)` in `u16`, written
//! by the acquisition system and never mutated afterwards. The time delay of
//! the scan point is carried in the file name, starting at a fixed offset
//! after the `pumpon_` prefix and terminated by the `ps` unit marker, as
//! emitted by the acquisition's `{delay:+010.3f}` formatting.

use std::path::{Path, PathBuf};

use ndarray::{s, Array3};

use super::constants::{DELAY_OFFSET, RAW_DATA_PATH};
use super::error::StackFileError;
use super::slicing::SliceRange;

/// One raw frame-stack file, opened read-only.
#[derive(Debug)]
pub struct StackFile {
    dataset: hdf5::Dataset,
    path: PathBuf,
    shape: (usize, usize, usize),
}

impl StackFile {
    pub fn open(path: &Path) -> Result<Self, StackFileError> {
        if !path.exists() {
            return Err(StackFileError::BadFilePath(path.to_path_buf()));
        }
        let file = hdf5::File::open(path)?;
        let dataset = file.dataset(RAW_DATA_PATH)?;
        let shape = dataset.shape();
        if shape.len() != 3 {
            return Err(StackFileError::NotAStack(path.to_path_buf(), shape));
        }
        Ok(Self {
            dataset,
            path: path.to_path_buf(),
            shape: (shape[0], shape[1], shape[2]),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of frames along the stack axis.
    pub fn n_frames(&self) -> usize {
        self.shape.0
    }

    pub fn frame_shape(&self) -> (usize, usize) {
        (self.shape.1, self.shape.2)
    }

    /// In-memory size of the full stack, used to bound worker counts.
    pub fn stack_size_bytes(&self) -> Result<u64, StackFileError> {
        let item_size = self.dataset.dtype()?.size() as u64;
        Ok(item_size * self.shape.0 as u64 * self.shape.1 as u64 * self.shape.2 as u64)
    }

    /// Read a contiguous window of frames, `start..stop`.
    pub fn read_window(&self, start: usize, stop: usize) -> Result<Array3<u16>, StackFileError> {
        Ok(self.dataset.read_slice(s![start..stop, .., ..])?)
    }

    /// Read the frames selected by a condition slice.
    pub fn read_condition(&self, range: &SliceRange) -> Result<Array3<u16>, StackFileError> {
        let r = range.resolve(self.n_frames());
        Ok(self
            .dataset
            .read_slice(s![r.start..r.stop;r.step as isize, .., ..])?)
    }

    /// The time delay parsed from this file's name.
    pub fn delay(&self) -> Result<f64, StackFileError> {
        delay_from_path(&self.path)
    }
}

/// Extract the delay value embedded in a raw or processed file name.
///
/// The delay field starts right after the `pumpon_` prefix and runs up to
/// the `ps` unit marker, e.g. `pumpon_+003.500ps.h5` carries `3.5`.
pub fn delay_from_path(path: &Path) -> Result<f64, StackFileError> {
    let bad_name = || StackFileError::BadFileName(path.to_path_buf());
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(bad_name)?;
    let field = name.get(DELAY_OFFSET..).ok_or_else(bad_name)?;
    let unit = field.find("ps").ok_or_else(bad_name)?;
    field[..unit].parse::<f64>().map_err(|_| bad_name())
}
