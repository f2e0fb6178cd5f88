//! Masked reduction kernels.
//!
//! These run over every pixel of every frame of every raw file, so they are
//! written as tight loops over the pixel buffers. All of them are pure and
//! deterministic; exact equivalence with naive reference implementations is
//! pinned down by the tests at the bottom of this module.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, ArrayView3, Slice, Zip};

use super::constants::HISTOGRAM_BINS;

/// Per-frame sum of `image * mask` over all pixels.
///
/// The per-frame totals also serve as the normalization weights for
/// [`normed_sum`]. Accumulation happens in `u64`, which is exact for any
/// stack the detector can produce.
pub fn masked_sum(images: ArrayView3<'_, u16>, mask: ArrayView2<'_, u16>) -> Array1<f64> {
    let (n_imgs, rows, cols) = images.dim();
    assert_eq!((rows, cols), mask.dim(), "mask and image sizes do not match");
    let mut sums = Array1::<f64>::zeros(n_imgs);
    for (frame, out) in images.outer_iter().zip(sums.iter_mut()) {
        let mut acc: u64 = 0;
        for (&px, &weight) in frame.iter().zip(mask.iter()) {
            acc += px as u64 * weight as u64;
        }
        *out = acc as f64;
    }
    sums
}

/// Histogram of pixel values across all frames, counting only pixels where
/// the mask is nonzero.
///
/// The histogram always has one bin per representable `u16` value; saturated
/// pixels from broken columns land in the last bin.
pub fn masked_histogram(images: ArrayView3<'_, u16>, mask: ArrayView2<'_, u16>) -> Array1<u64> {
    let (_, rows, cols) = images.dim();
    assert_eq!((rows, cols), mask.dim(), "mask and image sizes do not match");
    let mut hist = Array1::<u64>::zeros(HISTOGRAM_BINS);
    let bins = hist.as_slice_mut().expect("freshly allocated histogram is contiguous");
    for frame in images.outer_iter() {
        for (&px, &weight) in frame.iter().zip(mask.iter()) {
            if weight != 0 {
                bins[px as usize] += 1;
            }
        }
    }
    hist
}

/// Normalization-weighted stacking sum: `sum_i images[i] / norm_values[i]`.
///
/// A zero norm value is a caller error; the caller screens batches through
/// the integrity check before computing weights, so the division is never
/// guarded here.
pub fn normed_sum(images: ArrayView3<'_, u16>, norm_values: ArrayView1<'_, f64>) -> Array2<f64> {
    let (n_imgs, rows, cols) = images.dim();
    assert_eq!(n_imgs, norm_values.len(), "one norm value per frame required");
    let mut out = Array2::<f64>::zeros((rows, cols));
    for (frame, &norm) in images.outer_iter().zip(norm_values.iter()) {
        Zip::from(&mut out).and(&frame).for_each(|acc, &px| {
            *acc += px as f64 / norm;
        });
    }
    out
}

/// Per-frame masked sum restricted to a rectangular window of each frame.
pub fn indexed_masked_sum(
    images: ArrayView3<'_, u16>,
    rows: Slice,
    cols: Slice,
    mask: ArrayView2<'_, u16>,
) -> Array1<f64> {
    let windows = images.slice(s![.., rows, cols]);
    let mask_window = mask.slice(s![rows, cols]);
    masked_sum(windows, mask_window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Axis};

    // Small deterministic generator so the equivalence checks run on
    // irregular data without pulling in a rand dependency.
    fn lcg_fill(seed: u64, modulus: u64) -> impl FnMut() -> u16 {
        let mut state = seed;
        move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) % modulus) as u16
        }
    }

    fn test_stack(n: usize, rows: usize, cols: usize) -> (Array3<u16>, Array2<u16>) {
        let mut next_px = lcg_fill(17, 400);
        let mut next_m = lcg_fill(99, 2);
        let images = Array3::from_shape_simple_fn((n, rows, cols), move || next_px());
        let mask = Array2::from_shape_simple_fn((rows, cols), move || next_m());
        (images, mask)
    }

    fn masked_sum_reference(images: &Array3<u16>, mask: &Array2<u16>) -> Array1<f64> {
        let mut sums = Array1::<f64>::zeros(images.len_of(Axis(0)));
        for (i, frame) in images.outer_iter().enumerate() {
            for ((r, c), &px) in frame.indexed_iter() {
                sums[i] += (px as u64 * mask[[r, c]] as u64) as f64;
            }
        }
        sums
    }

    fn masked_histogram_reference(images: &Array3<u16>, mask: &Array2<u16>) -> Array1<u64> {
        let mut hist = Array1::<u64>::zeros(HISTOGRAM_BINS);
        for frame in images.outer_iter() {
            for ((r, c), &px) in frame.indexed_iter() {
                if mask[[r, c]] != 0 {
                    hist[px as usize] += 1;
                }
            }
        }
        hist
    }

    fn normed_sum_reference(images: &Array3<u16>, norms: &Array1<f64>) -> Array2<f64> {
        let (_, rows, cols) = images.dim();
        let mut out = Array2::<f64>::zeros((rows, cols));
        for (i, frame) in images.outer_iter().enumerate() {
            for ((r, c), &px) in frame.indexed_iter() {
                out[[r, c]] += px as f64 / norms[i];
            }
        }
        out
    }

    #[test]
    fn test_masked_sum_matches_reference() {
        let (images, mask) = test_stack(12, 9, 14);
        assert_eq!(masked_sum(images.view(), mask.view()), masked_sum_reference(&images, &mask));
    }

    #[test]
    fn test_masked_sum_empty_stack() {
        let images = Array3::<u16>::zeros((0, 9, 14));
        let mask = Array2::<u16>::ones((9, 14));
        assert_eq!(masked_sum(images.view(), mask.view()).len(), 0);
    }

    #[test]
    fn test_masked_histogram_matches_reference() {
        let (images, mask) = test_stack(7, 11, 13);
        assert_eq!(
            masked_histogram(images.view(), mask.view()),
            masked_histogram_reference(&images, &mask)
        );
    }

    #[test]
    fn test_masked_histogram_zero_mask() {
        let (images, _) = test_stack(5, 8, 8);
        let mask = Array2::<u16>::zeros((8, 8));
        let hist = masked_histogram(images.view(), mask.view());
        assert_eq!(hist.len(), HISTOGRAM_BINS);
        assert_eq!(hist.sum(), 0);
    }

    #[test]
    fn test_masked_histogram_total_count() {
        let (images, mask) = test_stack(6, 10, 10);
        let hist = masked_histogram(images.view(), mask.view());
        let masked_pixels = mask.iter().filter(|&&m| m != 0).count() as u64;
        assert_eq!(hist.len(), HISTOGRAM_BINS);
        assert_eq!(hist.sum(), 6 * masked_pixels);
    }

    #[test]
    fn test_masked_histogram_counts_saturated_values() {
        let mut images = Array3::<u16>::zeros((2, 4, 4));
        images[[0, 1, 1]] = u16::MAX;
        images[[1, 2, 3]] = u16::MAX;
        let mask = Array2::<u16>::ones((4, 4));
        let hist = masked_histogram(images.view(), mask.view());
        assert_eq!(hist[HISTOGRAM_BINS - 1], 2);
    }

    #[test]
    fn test_normed_sum_matches_reference() {
        let (images, mask) = test_stack(9, 6, 7);
        let norms = masked_sum(images.view(), mask.view());
        let result = normed_sum(images.view(), norms.view());
        let reference = normed_sum_reference(&images, &norms);
        for (a, b) in result.iter().zip(reference.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_normed_sum_empty_stack() {
        let images = Array3::<u16>::zeros((0, 6, 7));
        let norms = Array1::<f64>::zeros(0);
        assert_eq!(normed_sum(images.view(), norms.view()), Array2::<f64>::zeros((6, 7)));
    }

    #[test]
    fn test_indexed_masked_sum_matches_windowed_reference() {
        let (images, mask) = test_stack(8, 12, 12);
        let rows = Slice::new(3, Some(9), 1);
        let cols = Slice::new(2, Some(11), 1);
        let result = indexed_masked_sum(images.view(), rows, cols, mask.view());
        let windows = images.slice(s![.., 3..9, 2..11]).to_owned();
        let mask_window = mask.slice(s![3..9, 2..11]).to_owned();
        assert_eq!(result, masked_sum_reference(&windows, &mask_window));
    }
}
