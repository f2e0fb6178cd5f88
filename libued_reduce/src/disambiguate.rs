//! Pump on/off frame disambiguation.
//!
//! Raw stacks interleave frames taken with the pump laser active and
//! inactive, starting with an unknown phase. The pump reflections elevate
//! the intensity in a band along the detector border, so summing a sample
//! window of frames per parity and comparing the border totals tells the
//! two sub-sequences apart.

use ndarray::{s, Array2, ArrayView2, ArrayView3, Zip};

use super::constants::{CONFIDENCE_EPSILON, SAMPLE_WINDOW_SIZE};
use super::slicing::SliceRange;

/// One of the two physical conditions a frame can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    PumpOn,
    PumpOff,
}

impl Condition {
    /// Group name of this condition in result files.
    pub fn group_name(&self) -> &'static str {
        match self {
            Self::PumpOn => "pump_on",
            Self::PumpOff => "pump_off",
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PumpOn => write!(f, "pump on"),
            Self::PumpOff => write!(f, "pump off"),
        }
    }
}

/// Result of disambiguating one raw stack.
///
/// The slices select the two conditions over the FULL stack; they are lazy
/// descriptors, so nothing is materialized until the caller reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct Disambiguation {
    pub pump_on: SliceRange,
    pub pump_off: SliceRange,
    pub confidence: f64,
}

/// Bounds of the sampling window used for detection.
///
/// Defaults to a 100-frame window starting one tenth into the stack, which
/// skips any warm-up transient at the very start. The window start is
/// rounded down to an even index so window parity equals stack parity.
/// Stacks too short for the window are sampled whole.
pub fn sample_window(n_frames: usize, offset: Option<usize>) -> (usize, usize) {
    let start = offset.unwrap_or(n_frames / 10) & !1;
    if start + SAMPLE_WINDOW_SIZE <= n_frames {
        (start, start + SAMPLE_WINDOW_SIZE)
    } else {
        (0, n_frames)
    }
}

/// Decide which interleaved sub-sequence is pump-on.
///
/// `window` must start at an even stack index (see [`sample_window`]).
/// Frames are summed first and masked after, so a single pass over the
/// border pixels suffices. The confidence is the ratio of the larger to
/// the smaller border total, floored against division by zero; whether it
/// is good enough is the caller's policy.
pub fn classify(
    window: ArrayView3<'_, u16>,
    border_mask: ArrayView2<'_, u16>,
    discard_first_last: bool,
) -> Disambiguation {
    let border_1 = summed_border_intensity(window.slice(s![..;2, .., ..]), border_mask);
    let border_2 = summed_border_intensity(window.slice(s![1..;2, .., ..]), border_mask);

    let (pump_on, pump_off) = if border_1 > border_2 {
        (even_slice(discard_first_last), odd_slice(discard_first_last))
    } else {
        (odd_slice(discard_first_last), even_slice(discard_first_last))
    };
    let confidence =
        border_1.max(border_2) / border_1.min(border_2).max(CONFIDENCE_EPSILON);
    Disambiguation {
        pump_on,
        pump_off,
        confidence,
    }
}

/// All even-indexed frames, optionally excluding the first and last frame
/// of the stack (frequently degenerate dark frames).
fn even_slice(discard_first_last: bool) -> SliceRange {
    if discard_first_last {
        SliceRange::new(2, -1, 2)
    } else {
        SliceRange::new(0, None, 2)
    }
}

fn odd_slice(discard_first_last: bool) -> SliceRange {
    if discard_first_last {
        SliceRange::new(1, -2, 2)
    } else {
        SliceRange::new(1, None, 2)
    }
}

fn summed_border_intensity(frames: ArrayView3<'_, u16>, border_mask: ArrayView2<'_, u16>) -> f64 {
    let mut summed = Array2::<u64>::zeros(border_mask.dim());
    for frame in frames.outer_iter() {
        Zip::from(&mut summed).and(&frame).for_each(|acc, &px| {
            *acc += px as u64;
        });
    }
    let mut total: u64 = 0;
    for (&px, &weight) in summed.iter().zip(border_mask.iter()) {
        total += px * weight as u64;
    }
    total as f64
}
