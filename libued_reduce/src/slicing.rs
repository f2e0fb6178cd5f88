use ndarray::Slice;
use serde::{Deserialize, Serialize};

/// A stack- or image-axis range with optional bounds, `start..stop` by `step`.
///
/// Negative bounds count from the end of the axis, a `None` bound means
/// "unbounded on that side". Ranges are serialized as three nullable integers,
/// so they can cross file and config boundaries without a sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SliceRange {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

/// A `SliceRange` resolved against a concrete axis length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: usize,
    pub stop: usize,
    pub step: usize,
}

impl SliceRange {
    pub fn new(
        start: impl Into<Option<i64>>,
        stop: impl Into<Option<i64>>,
        step: impl Into<Option<i64>>,
    ) -> Self {
        Self {
            start: start.into(),
            stop: stop.into(),
            step: step.into(),
        }
    }

    /// The full axis in steps of one.
    pub fn full() -> Self {
        Self::new(None, None, None)
    }

    /// Resolve the bounds against an axis of length `len`.
    ///
    /// Only forward iteration is supported; a zero or negative step panics.
    pub fn resolve(&self, len: usize) -> ResolvedRange {
        let step = self.step.unwrap_or(1);
        assert!(step > 0, "slice step must be positive, got {step}");
        let clamp = |bound: i64| -> usize {
            let idx = if bound < 0 { bound + len as i64 } else { bound };
            idx.clamp(0, len as i64) as usize
        };
        let start = self.start.map_or(0, clamp);
        let stop = self.stop.map_or(len, clamp);
        ResolvedRange {
            start,
            stop: stop.max(start),
            step: step as usize,
        }
    }

    /// Number of indices selected on an axis of length `len`.
    pub fn index_count(&self, len: usize) -> usize {
        self.resolve(len).index_count()
    }

    /// The equivalent `ndarray` slice for in-memory arrays.
    pub fn to_ndarray(&self) -> Slice {
        Slice::new(
            self.start.unwrap_or(0) as isize,
            self.stop.map(|s| s as isize),
            self.step.unwrap_or(1) as isize,
        )
    }
}

impl ResolvedRange {
    pub fn index_count(&self) -> usize {
        (self.stop - self.start).div_ceil(self.step)
    }
}

/// A named rectangular sub-window of a frame, tracked separately in the
/// aggregate statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub rows: SliceRange,
    pub cols: SliceRange,
}

impl Roi {
    pub fn new(rows: SliceRange, cols: SliceRange) -> Self {
        Self { rows, cols }
    }
}
