//! Saturated-column integrity check.
//!
//! A known hardware failure mode saturates whole detector columns at 65535.
//! Checking a single diagnostic column of every frame catches it without
//! scanning every pixel.

use ndarray::{s, ArrayView2, ArrayView3};

use super::constants::{BROKEN_PIXEL_LIMIT, DIAGNOSTIC_COLUMN, SATURATED_VALUE};

/// Whether a condition sub-stack is free of the saturated-stripe signature.
///
/// Counts saturated pixels in the diagnostic column over all frames,
/// restricted to the masked region. Batches with more than
/// [`BROKEN_PIXEL_LIMIT`] hits are corrupted and must be dropped whole.
pub fn stack_is_intact(images: ArrayView3<'_, u16>, mask: ArrayView2<'_, u16>) -> bool {
    let (_, rows, cols) = images.dim();
    assert_eq!((rows, cols), mask.dim(), "mask and image sizes do not match");
    assert!(
        DIAGNOSTIC_COLUMN < cols,
        "frames are too narrow for the diagnostic column"
    );
    let column = images.slice(s![.., .., DIAGNOSTIC_COLUMN]);
    let mask_column = mask.slice(s![.., DIAGNOSTIC_COLUMN]);
    let mut saturated: u64 = 0;
    for frame_column in column.outer_iter() {
        for (&px, &weight) in frame_column.iter().zip(mask_column.iter()) {
            if weight != 0 && px == SATURATED_VALUE {
                saturated += 1;
            }
        }
    }
    saturated <= BROKEN_PIXEL_LIMIT
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    fn stack_with_saturated_frames(n_saturated: usize) -> Array3<u16> {
        let mut images = Array3::<u16>::zeros((10, 4, 200));
        for i in 0..n_saturated {
            images[[i, 1, DIAGNOSTIC_COLUMN]] = SATURATED_VALUE;
        }
        images
    }

    #[test]
    fn test_three_saturated_frames_pass() {
        let images = stack_with_saturated_frames(3);
        let mask = Array2::<u16>::ones((4, 200));
        assert!(stack_is_intact(images.view(), mask.view()));
    }

    #[test]
    fn test_four_saturated_frames_fail() {
        let images = stack_with_saturated_frames(4);
        let mask = Array2::<u16>::ones((4, 200));
        assert!(!stack_is_intact(images.view(), mask.view()));
    }

    #[test]
    fn test_masked_out_saturation_is_ignored() {
        let images = stack_with_saturated_frames(8);
        let mut mask = Array2::<u16>::ones((4, 200));
        mask.column_mut(DIAGNOSTIC_COLUMN).fill(0);
        assert!(stack_is_intact(images.view(), mask.view()));
    }

    #[test]
    fn test_saturation_off_diagnostic_column_is_ignored() {
        let mut images = Array3::<u16>::zeros((10, 4, 200));
        for i in 0..10 {
            images[[i, 2, DIAGNOSTIC_COLUMN + 1]] = SATURATED_VALUE;
        }
        let mask = Array2::<u16>::ones((4, 200));
        assert!(stack_is_intact(images.view(), mask.view()));
    }
}
