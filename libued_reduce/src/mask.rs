//! Pixel masks shared across a processing run.

use std::path::Path;

use ndarray::{s, Array2};

use super::constants::MASK_DATA_PATH;
use super::error::MaskError;

/// Load the externally supplied 0/1 pixel mask and check it against the
/// frame shape of the run.
pub fn load_mask(path: &Path, frame_shape: (usize, usize)) -> Result<Array2<u16>, MaskError> {
    if !path.exists() {
        return Err(MaskError::BadFilePath(path.to_path_buf()));
    }
    let file = hdf5::File::open(path)?;
    let mask = file.dataset(MASK_DATA_PATH)?.read_2d::<u16>()?;
    if mask.dim() != frame_shape {
        return Err(MaskError::ShapeMismatch {
            mask: mask.dim(),
            frame: frame_shape,
        });
    }
    Ok(mask)
}

/// The all-ones mask used when no mask file is configured.
pub fn ones_mask(frame_shape: (usize, usize)) -> Array2<u16> {
    Array2::ones(frame_shape)
}

/// Mask selecting a frame-edge band of `border_size` pixels, zero in the
/// interior. Frames too small to have an interior stay all ones.
pub fn border_mask(frame_shape: (usize, usize), border_size: usize) -> Array2<u16> {
    let (rows, cols) = frame_shape;
    let mut mask = Array2::ones(frame_shape);
    if 2 * border_size < rows && 2 * border_size < cols {
        mask.slice_mut(s![
            border_size..rows - border_size,
            border_size..cols - border_size
        ])
        .fill(0);
    }
    mask
}
