//! Merging of intermediate results into one experiment-wide dataset.
//!
//! The collector scans the processed directory, groups intermediate files
//! by their delay value and accumulates them into preallocated per-delay
//! arrays. Averages are accumulated undivided and divided once by the
//! per-delay file count at the end. Unreadable intermediate files are
//! skipped and reported, never fatal; a delay whose files were all dropped
//! keeps an all-zero average row and a zero file count.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{s, Array1, Array2, Array3, Axis};

use super::constants::{CHECKPOINT_INTERVAL, HISTOGRAM_BINS, PROCESSED_SUFFIX};
use super::error::CollectorError;
use super::hdf_writer::write_merged;
use super::slicing::Roi;
use super::stack_file::delay_from_path;

/// Accumulated per-condition arrays of the merged dataset.
#[derive(Debug, Clone)]
pub struct MergedGroup {
    pub avg_intensities: Array3<f64>,
    pub sum_intensities: Array1<f64>,
    pub histogram: Array2<u64>,
    pub rois: BTreeMap<String, Array1<f64>>,
}

/// The full merged dataset as held in memory during collection.
#[derive(Debug, Clone)]
pub struct MergedData {
    pub confidence: Array1<f64>,
    pub mask: Array2<u16>,
    pub delays: Array1<f64>,
    pub files_per_delay: Array1<u64>,
    pub pump_on: MergedGroup,
    pub pump_off: MergedGroup,
}

/// What happened during one collection run.
#[derive(Debug, Clone)]
pub struct CollectReport {
    /// Intermediate files found on disk.
    pub n_files: usize,
    /// Files actually merged into the dataset.
    pub n_merged: usize,
    /// Files that could not be read, with the reason they were dropped.
    pub dropped: Vec<(PathBuf, String)>,
}

/// Array layout discovered from the first readable intermediate file.
#[derive(Debug, Clone)]
struct Layout {
    frame_shape: (usize, usize),
    frames_on: usize,
    frames_off: usize,
    roi_keys: Vec<String>,
}

/// One intermediate file's condition block, fully read before any of it is
/// applied, so a torn source never half-accumulates.
struct ConditionRead {
    avg_intensities: Array2<f64>,
    sum_intensities: Array1<f64>,
    histogram: Array1<u64>,
    rois: Vec<(String, Array1<f64>)>,
}

#[derive(Debug)]
pub struct Collector {
    processed_dir: PathBuf,
    dest_path: PathBuf,
    temp_path: PathBuf,
    rois: BTreeMap<String, Roi>,
}

impl Collector {
    /// Create a collector writing to `dest_path`.
    ///
    /// The destination must not exist: a merge is write-once, so a full
    /// dataset can never be silently confused with a partial one.
    pub fn new(
        processed_dir: &Path,
        dest_path: &Path,
        rois: BTreeMap<String, Roi>,
        temp_path: Option<PathBuf>,
    ) -> Result<Self, CollectorError> {
        if dest_path.exists() {
            return Err(CollectorError::DestinationExists(dest_path.to_path_buf()));
        }
        let temp_path = temp_path.unwrap_or_else(|| default_temp_path(dest_path));
        Ok(Self {
            processed_dir: processed_dir.to_path_buf(),
            dest_path: dest_path.to_path_buf(),
            temp_path,
            rois,
        })
    }

    /// Merge every readable intermediate file under the processed directory.
    pub fn collect(&self) -> Result<CollectReport, CollectorError> {
        let files = find_intermediate_files(&self.processed_dir)?;
        if files.is_empty() {
            return Err(CollectorError::NoIntermediateFiles(self.processed_dir.clone()));
        }
        spdlog::info!(
            "collecting {} intermediate files into {}",
            files.len(),
            self.dest_path.display()
        );

        let mut delays: Vec<f64> = Vec::with_capacity(files.len());
        for path in &files {
            delays.push(delay_from_path(path)?);
        }
        delays.sort_by(f64::total_cmp);
        delays.dedup();

        let (layout, mask) = self.probe_layout(&files)?;
        let mut data = MergedData::allocate(&delays, &layout, mask, files.len());
        let mut dropped = Vec::new();

        for (index, path) in files.iter().enumerate() {
            match accumulate_file(&mut data, &layout, index, path) {
                Ok(()) => {}
                Err(e) => {
                    spdlog::warn!("could not merge {}: {e}", path.display());
                    dropped.push((path.clone(), e.to_string()));
                }
            }
            if (index + 1) % CHECKPOINT_INTERVAL == 0 && index + 1 < files.len() {
                let progress = (index + 1) as f64 / files.len() as f64;
                write_merged(&self.temp_path, &data, true, Some(progress))?;
                spdlog::info!(
                    "merge checkpoint at {:.0}% saved to {}",
                    progress * 100.0,
                    self.temp_path.display()
                );
            }
        }

        data.finalize();
        write_merged(&self.dest_path, &data, false, None)?;
        if self.temp_path.exists() {
            std::fs::remove_file(&self.temp_path)?;
        }
        for (path, reason) in &dropped {
            spdlog::warn!("dropped {}: {reason}", path.display());
        }
        spdlog::info!(
            "merged {} of {} files into {}",
            files.len() - dropped.len(),
            files.len(),
            self.dest_path.display()
        );
        Ok(CollectReport {
            n_files: files.len(),
            n_merged: files.len() - dropped.len(),
            dropped,
        })
    }

    /// Learn image shape, retained frame counts and the present ROI keys
    /// from the first intermediate file that opens.
    fn probe_layout(&self, files: &[PathBuf]) -> Result<(Layout, Array2<u16>), CollectorError> {
        for path in files {
            if let Ok(result) = read_layout(path) {
                let (layout, mask) = result;
                for key in &layout.roi_keys {
                    if !self.rois.contains_key(key) {
                        return Err(CollectorError::UnknownRoi(key.clone()));
                    }
                }
                return Ok((layout, mask));
            }
        }
        Err(CollectorError::NoReadableFiles(self.processed_dir.clone()))
    }
}

impl MergedData {
    fn allocate(delays: &[f64], layout: &Layout, mask: Array2<u16>, n_files: usize) -> Self {
        let n_delays = delays.len();
        Self {
            // NaN marks the slots of files that never merged
            confidence: Array1::from_elem(n_files, f64::NAN),
            mask,
            delays: Array1::from_vec(delays.to_vec()),
            files_per_delay: Array1::zeros(n_delays),
            pump_on: MergedGroup::allocate(n_delays, layout, layout.frames_on, n_files),
            pump_off: MergedGroup::allocate(n_delays, layout, layout.frames_off, n_files),
        }
    }

    /// Divide every accumulated average row by its file count. Rows without
    /// contributing files stay all-zero.
    fn finalize(&mut self) {
        for (row, &count) in self.files_per_delay.clone().iter().enumerate() {
            if count == 0 {
                continue;
            }
            self.pump_on
                .avg_intensities
                .index_axis_mut(Axis(0), row)
                .mapv_inplace(|v| v / count as f64);
            self.pump_off
                .avg_intensities
                .index_axis_mut(Axis(0), row)
                .mapv_inplace(|v| v / count as f64);
        }
    }

    fn delay_row(&self, delay: f64) -> usize {
        self.delays
            .iter()
            .position(|&d| d == delay)
            .expect("delay axis was built from the same file list")
    }
}

impl MergedGroup {
    fn allocate(n_delays: usize, layout: &Layout, frames_per_file: usize, n_files: usize) -> Self {
        let (rows, cols) = layout.frame_shape;
        let rois = layout
            .roi_keys
            .iter()
            .map(|key| {
                (
                    key.clone(),
                    Array1::from_elem(n_files * frames_per_file, f64::NAN),
                )
            })
            .collect();
        Self {
            avg_intensities: Array3::zeros((n_delays, rows, cols)),
            sum_intensities: Array1::from_elem(n_files * frames_per_file, f64::NAN),
            histogram: Array2::zeros((n_delays, HISTOGRAM_BINS)),
            rois,
        }
    }

    fn apply(&mut self, block: ConditionRead, row: usize, slot: std::ops::Range<usize>) {
        let mut avg_row = self.avg_intensities.index_axis_mut(Axis(0), row);
        avg_row += &block.avg_intensities;
        self.sum_intensities
            .slice_mut(s![slot.clone()])
            .assign(&block.sum_intensities);
        let mut hist_row = self.histogram.index_axis_mut(Axis(0), row);
        hist_row += &block.histogram;
        for (key, sums) in block.rois {
            self.rois
                .get_mut(&key)
                .expect("ROI keys validated against the probe layout")
                .slice_mut(s![slot.clone()])
                .assign(&sums);
        }
    }
}

fn default_temp_path(dest_path: &Path) -> PathBuf {
    let stem = dest_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("merged");
    dest_path.with_file_name(format!("{stem}_tmp.h5"))
}

/// All intermediate result files under `dir`, recursively, in sorted order.
fn find_intermediate_files(dir: &Path) -> Result<Vec<PathBuf>, CollectorError> {
    let mut files = Vec::new();
    collect_files(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), CollectorError> {
    let suffix = format!("{PROCESSED_SUFFIX}.h5");
    for entry in dir.read_dir()? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(&suffix))
        {
            out.push(path);
        }
    }
    Ok(())
}

fn read_layout(path: &Path) -> Result<(Layout, Array2<u16>), CollectorError> {
    let file = hdf5::File::open(path)?;
    let mask = file.dataset("mask")?.read_2d::<u16>()?;
    let avg_shape = file.dataset("pump_on/avg_intensities")?.shape();
    let frames_on = file.dataset("pump_on/sum_intensities")?.shape()[0];
    let frames_off = file.dataset("pump_off/sum_intensities")?.shape()[0];
    let mut roi_keys = match file.group("pump_on/rois") {
        Ok(group) => group.member_names()?,
        Err(_) => Vec::new(),
    };
    roi_keys.sort();
    Ok((
        Layout {
            frame_shape: (avg_shape[0], avg_shape[1]),
            frames_on,
            frames_off,
            roi_keys,
        },
        mask,
    ))
}

fn accumulate_file(
    data: &mut MergedData,
    layout: &Layout,
    index: usize,
    path: &Path,
) -> Result<(), CollectorError> {
    let delay = delay_from_path(path)?;
    let file = hdf5::File::open(path)?;
    let confidence = file.dataset("confidence")?.read_scalar::<f64>()?;
    let pump_on = read_condition(&file, "pump_on", layout, layout.frames_on, path)?;
    let pump_off = read_condition(&file, "pump_off", layout, layout.frames_off, path)?;

    let row = data.delay_row(delay);
    data.confidence[index] = confidence;
    data.files_per_delay[row] += 1;
    data.pump_on.apply(
        pump_on,
        row,
        index * layout.frames_on..(index + 1) * layout.frames_on,
    );
    data.pump_off.apply(
        pump_off,
        row,
        index * layout.frames_off..(index + 1) * layout.frames_off,
    );
    Ok(())
}

fn read_condition(
    file: &hdf5::File,
    name: &str,
    layout: &Layout,
    frames_per_file: usize,
    path: &Path,
) -> Result<ConditionRead, CollectorError> {
    let avg_intensities = file
        .dataset(&format!("{name}/avg_intensities"))?
        .read_2d::<f64>()?;
    let sum_intensities = file
        .dataset(&format!("{name}/sum_intensities"))?
        .read_1d::<f64>()?;
    let histogram = file.dataset(&format!("{name}/histogram"))?.read_1d::<u64>()?;
    if avg_intensities.dim() != layout.frame_shape
        || sum_intensities.len() != frames_per_file
        || histogram.len() != HISTOGRAM_BINS
    {
        return Err(CollectorError::SourceShapeMismatch(path.to_path_buf()));
    }
    let mut rois = Vec::with_capacity(layout.roi_keys.len());
    for key in &layout.roi_keys {
        let sums = file.dataset(&format!("{name}/rois/{key}"))?.read_1d::<f64>()?;
        if sums.len() != frames_per_file {
            return Err(CollectorError::SourceShapeMismatch(path.to_path_buf()));
        }
        rois.push((key.clone(), sums));
    }
    Ok(ConditionRead {
        avg_intensities,
        sum_intensities,
        histogram,
        rois,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::HISTOGRAM_BINS;
    use crate::hdf_writer::IntermediateWriter;
    use crate::processor::{ConditionResult, FileResult};
    use crate::slicing::SliceRange;
    use ndarray::Array2;

    const ROWS: usize = 4;
    const COLS: usize = 5;
    const FRAMES: usize = 6;

    /// Intermediate file with every array filled from a single seed value.
    fn write_intermediate(path: &Path, delay: f64, seed: f64, roi_keys: &[&str]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let block = |offset: f64| {
            let mut histogram = Array1::<u64>::zeros(HISTOGRAM_BINS);
            histogram[7] = 42;
            ConditionResult {
                avg_intensities: Array2::from_elem((ROWS, COLS), seed + offset),
                sum_intensities: Array1::from_elem(FRAMES, 10.0 * (seed + offset)),
                histogram,
                rois: roi_keys
                    .iter()
                    .map(|&key| (key.to_string(), Array1::from_elem(FRAMES, seed + offset)))
                    .collect(),
            }
        };
        let result = FileResult {
            confidence: 500.0 + seed,
            delay,
            pump_on: block(0.0),
            pump_off: block(0.5),
        };
        let mask = Array2::<u16>::ones((ROWS, COLS));
        IntermediateWriter::create(path)
            .unwrap()
            .write(&result, mask.view())
            .unwrap();
    }

    fn intermediate_name(delay: f64) -> String {
        format!("pumpon_{delay:+010.3}ps_processed.h5")
    }

    #[test]
    fn test_merge_completeness_over_two_delays() {
        let dir = tempfile::tempdir().unwrap();
        let processed = dir.path().join("processed");
        // 2 delays x 3 files with seeds 1,2,3 and 4,5,6
        for (scan, (delay, seed)) in [
            (-1.0, 1.0),
            (-1.0, 2.0),
            (-1.0, 3.0),
            (2.0, 4.0),
            (2.0, 5.0),
            (2.0, 6.0),
        ]
        .into_iter()
        .enumerate()
        {
            let path = processed
                .join(format!("scan_{:04}", scan + 1))
                .join(intermediate_name(delay));
            write_intermediate(&path, delay, seed, &[]);
        }

        let dest = dir.path().join("merged.h5");
        let report = Collector::new(&processed, &dest, BTreeMap::new(), None)
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(report.n_files, 6);
        assert_eq!(report.n_merged, 6);
        assert!(report.dropped.is_empty());

        let file = hdf5::File::open(&dest).unwrap();
        let delays = file.dataset("delays").unwrap().read_1d::<f64>().unwrap();
        assert_eq!(delays.to_vec(), vec![-1.0, 2.0]);
        let counts = file.dataset("files_per_delay").unwrap().read_1d::<u64>().unwrap();
        assert_eq!(counts.to_vec(), vec![3, 3]);

        let avg = file
            .dataset("pump_on/avg_intensities")
            .unwrap()
            .read::<f64, ndarray::Ix3>()
            .unwrap();
        // hand-computed means of the three contributing seed planes
        assert!((avg[[0, 2, 2]] - 2.0).abs() < 1e-12);
        assert!((avg[[1, 2, 2]] - 5.0).abs() < 1e-12);
        let avg_off = file
            .dataset("pump_off/avg_intensities")
            .unwrap()
            .read::<f64, ndarray::Ix3>()
            .unwrap();
        assert!((avg_off[[0, 0, 0]] - 2.5).abs() < 1e-12);

        let hist = file
            .dataset("pump_on/histogram")
            .unwrap()
            .read::<u64, ndarray::Ix2>()
            .unwrap();
        assert_eq!(hist[[0, 7]], 3 * 42);
        assert_eq!(hist[[1, 7]], 3 * 42);
    }

    #[test]
    fn test_merge_skips_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let processed = dir.path().join("processed");
        for (scan, delay) in [(1, -1.0), (2, -1.0), (3, 2.0)] {
            let path = processed
                .join(format!("scan_{scan:04}"))
                .join(intermediate_name(delay));
            write_intermediate(&path, delay, scan as f64, &[]);
        }
        // one intermediate is garbage on disk
        let corrupt = processed.join("scan_0004").join(intermediate_name(2.0));
        std::fs::create_dir_all(corrupt.parent().unwrap()).unwrap();
        std::fs::write(&corrupt, b"not an hdf5 file").unwrap();

        let dest = dir.path().join("merged.h5");
        let report = Collector::new(&processed, &dest, BTreeMap::new(), None)
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(report.n_files, 4);
        assert_eq!(report.n_merged, 3);
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].0, corrupt);

        let file = hdf5::File::open(&dest).unwrap();
        let counts = file.dataset("files_per_delay").unwrap().read_1d::<u64>().unwrap();
        assert_eq!(counts.to_vec(), vec![2, 1]);
        // the dropped file's slots stay NaN
        let sums = file
            .dataset("pump_on/sum_intensities")
            .unwrap()
            .read_1d::<f64>()
            .unwrap();
        let dropped_index = 3; // sorted order puts scan_0004 last
        assert!(sums
            .slice(s![dropped_index * FRAMES..(dropped_index + 1) * FRAMES])
            .iter()
            .all(|v| v.is_nan()));
        let confidence = file.dataset("confidence").unwrap().read_1d::<f64>().unwrap();
        assert!(confidence[dropped_index].is_nan());
    }

    #[test]
    fn test_delay_without_readable_files_stays_zero() {
        let dir = tempfile::tempdir().unwrap();
        let processed = dir.path().join("processed");
        write_intermediate(
            &processed.join("scan_0001").join(intermediate_name(-1.0)),
            -1.0,
            3.0,
            &[],
        );
        let corrupt = processed.join("scan_0002").join(intermediate_name(5.0));
        std::fs::create_dir_all(corrupt.parent().unwrap()).unwrap();
        std::fs::write(&corrupt, b"garbage").unwrap();

        let dest = dir.path().join("merged.h5");
        let report = Collector::new(&processed, &dest, BTreeMap::new(), None)
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(report.n_merged, 1);

        let file = hdf5::File::open(&dest).unwrap();
        let counts = file.dataset("files_per_delay").unwrap().read_1d::<u64>().unwrap();
        assert_eq!(counts.to_vec(), vec![1, 0]);
        let avg = file
            .dataset("pump_on/avg_intensities")
            .unwrap()
            .read::<f64, ndarray::Ix3>()
            .unwrap();
        assert!(avg.index_axis(Axis(0), 1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_merge_fails_on_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("merged.h5");
        std::fs::write(&dest, b"occupied").unwrap();
        let result = Collector::new(dir.path(), &dest, BTreeMap::new(), None);
        assert!(matches!(result, Err(CollectorError::DestinationExists(_))));
    }

    #[test]
    fn test_merge_requires_configured_rois() {
        let dir = tempfile::tempdir().unwrap();
        let processed = dir.path().join("processed");
        write_intermediate(
            &processed.join(intermediate_name(0.0)),
            0.0,
            1.0,
            &["bragg_1"],
        );
        let dest = dir.path().join("merged.h5");
        let result = Collector::new(&processed, &dest, BTreeMap::new(), None)
            .unwrap()
            .collect();
        assert!(matches!(result, Err(CollectorError::UnknownRoi(_))));
    }

    #[test]
    fn test_merge_carries_roi_groups() {
        let dir = tempfile::tempdir().unwrap();
        let processed = dir.path().join("processed");
        for (scan, seed) in [(1, 1.0), (2, 3.0)] {
            write_intermediate(
                &processed.join(format!("scan_{scan:04}")).join(intermediate_name(0.0)),
                0.0,
                seed,
                &["bragg_1"],
            );
        }
        let mut rois = BTreeMap::new();
        rois.insert(
            String::from("bragg_1"),
            Roi::new(SliceRange::new(0, 2, None), SliceRange::new(0, 2, None)),
        );
        let dest = dir.path().join("merged.h5");
        let report = Collector::new(&processed, &dest, rois, None)
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(report.n_merged, 2);

        let file = hdf5::File::open(&dest).unwrap();
        let roi_sums = file
            .dataset("pump_on/rois/bragg_1")
            .unwrap()
            .read_1d::<f64>()
            .unwrap();
        assert_eq!(roi_sums.len(), 2 * FRAMES);
        assert!((roi_sums[0] - 1.0).abs() < 1e-12);
        assert!((roi_sums[FRAMES] - 3.0).abs() < 1e-12);
    }
}
