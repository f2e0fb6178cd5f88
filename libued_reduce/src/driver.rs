//! Parallel scheduling of per-file processing.
//!
//! Files are split round-robin into per-worker subsets and each subset runs
//! on its own OS thread. The worker count is bounded by available system
//! memory so that simultaneous workers never hold more raw stacks than fit
//! into it. Per-file failures are caught inside the worker loop and turned
//! into file reports; one bad file never cancels its siblings.

use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use super::config::Config;
use super::constants::PROCESSED_SUFFIX;
use super::error::{DriverError, ProcessingWarning};
use super::logfile::filenames_from_logfile;
use super::mask::{load_mask, ones_mask};
use super::processor::{process, ProcessSettings};
use super::stack_file::StackFile;
use super::worker_status::{BarColor, WorkerStatus};

/// Outcome of processing one raw file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub warnings: Vec<ProcessingWarning>,
    /// Set when processing failed outright; the run continued regardless.
    pub error: Option<String>,
}

/// Outcome of a whole processing run.
#[derive(Debug, Clone)]
pub struct DriverReport {
    /// One report per submitted file, in file order.
    pub files: Vec<FileReport>,
    /// Run-level advisories, e.g. resource pressure.
    pub run_warnings: Vec<ProcessingWarning>,
}

impl DriverReport {
    /// Files that produced no intermediate result, with the reason. These
    /// are the gaps a re-run should target.
    pub fn dropped_files(&self) -> Vec<(&Path, String)> {
        self.files
            .iter()
            .filter_map(|report| {
                if let Some(error) = &report.error {
                    return Some((report.path.as_path(), error.clone()));
                }
                report.warnings.iter().find_map(|warning| match warning {
                    ProcessingWarning::BrokenImage { .. } => {
                        Some((report.path.as_path(), warning.to_string()))
                    }
                    _ => None,
                })
            })
            .collect()
    }
}

/// Determine the worker count from free memory and the size of one raw
/// stack, unless the configuration pins it explicitly.
pub fn compute_worker_count(
    stack_size_bytes: u64,
    explicit: Option<usize>,
) -> (usize, Option<ProcessingWarning>) {
    if let Some(n_workers) = explicit {
        return (n_workers.max(1), None);
    }
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let stacks_in_memory = (system.available_memory() / stack_size_bytes.max(1)) as usize;
    if stacks_in_memory == 0 {
        spdlog::warn!(
            "you might want to free up some system memory; you can't fit a whole raw stack into it"
        );
        (1, Some(ProcessingWarning::ResourcePressure))
    } else {
        (stacks_in_memory, None)
    }
}

/// Divide the file list into a set of per-worker subsets
pub fn create_subsets(files: &[PathBuf], n_workers: usize) -> Vec<Vec<PathBuf>> {
    let mut subsets: Vec<Vec<PathBuf>> = vec![Vec::new(); n_workers];
    let n_subsets = subsets.len();

    for (idx, file) in files.iter().enumerate() {
        subsets[idx % n_subsets].push(file.clone())
    }

    subsets
}

/// The main loop of a processing run.
///
/// Enumerates the raw files, sizes the worker pool, runs every file through
/// the per-file processor and reports per-file outcomes after the join
/// barrier. Files are submitted in enumeration order but may complete out
/// of order; the reports are re-sorted by path before returning.
pub fn process_run(config: Config, tx: Sender<WorkerStatus>) -> Result<DriverReport, DriverError> {
    let files = find_raw_files(&config)?;
    if files.is_empty() {
        return Err(DriverError::NoInputFiles(config.raw_path.clone()));
    }

    let sample = StackFile::open(&files[0])?;
    let frame_shape = sample.frame_shape();
    let stack_size_bytes = sample.stack_size_bytes()?;
    drop(sample);
    spdlog::info!(
        "Processing {} raw files of {} each",
        files.len(),
        human_bytes::human_bytes(stack_size_bytes as f64)
    );

    let mask = match &config.mask_path {
        Some(path) => load_mask(path, frame_shape)?,
        None => ones_mask(frame_shape),
    };
    let settings = Arc::new(ProcessSettings {
        mask,
        border_size: config.border_size,
        discard_first_last: config.discard_first_last,
        confidence_threshold: config.confidence_threshold,
        rois: config.rois.clone(),
    });

    let mut run_warnings = Vec::new();
    let (capacity, pressure) = compute_worker_count(stack_size_bytes, config.n_workers);
    if let Some(warning) = pressure {
        run_warnings.push(warning);
    }
    let n_workers = capacity.min(files.len());
    spdlog::info!("Using {} workers", n_workers);

    let mut workers = Vec::new();
    for (worker_id, subset) in create_subsets(&files, n_workers).into_iter().enumerate() {
        // Dont make empty workers
        if subset.is_empty() {
            continue;
        }
        let settings = settings.clone();
        let tx = tx.clone();
        let raw_root = config.raw_path.clone();
        let processed_root = config.processed_path.clone();
        workers.push(std::thread::spawn(move || {
            worker_loop(subset, raw_root, processed_root, settings, tx, worker_id)
        }));
    }

    let mut reports = Vec::new();
    for worker in workers {
        match worker.join() {
            Ok(Ok(worker_reports)) => reports.extend(worker_reports),
            Ok(Err(e)) => spdlog::error!("Worker failed: {e}"),
            Err(_) => spdlog::error!("A worker panicked; its remaining files were not processed"),
        }
    }
    reports.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(DriverReport {
        files: reports,
        run_warnings,
    })
}

fn worker_loop(
    subset: Vec<PathBuf>,
    raw_root: PathBuf,
    processed_root: PathBuf,
    settings: Arc<ProcessSettings>,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<Vec<FileReport>, DriverError> {
    let total = subset.len();
    let mut reports = Vec::with_capacity(total);
    tx.send(WorkerStatus::new(0.0, 0, worker_id, BarColor::CYAN))?;
    for (done, path) in subset.into_iter().enumerate() {
        let report = match process(&path, &raw_root, &processed_root, &settings) {
            Ok(warnings) => FileReport {
                path,
                warnings,
                error: None,
            },
            Err(e) => {
                spdlog::error!("Failed to process {}: {e}", path.display());
                FileReport {
                    path,
                    warnings: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };
        reports.push(report);
        tx.send(WorkerStatus::new(
            (done + 1) as f32 / total as f32,
            done + 1,
            worker_id,
            BarColor::CYAN,
        ))?;
    }
    tx.send(WorkerStatus::new(1.0, total, worker_id, BarColor::GREEN))?;
    Ok(reports)
}

/// Enumerate the raw files of a run, from the experiment log when one is
/// configured, otherwise by scanning the raw directory.
fn find_raw_files(config: &Config) -> Result<Vec<PathBuf>, DriverError> {
    if let Some(logfile) = &config.logfile_path {
        let mut existing = Vec::new();
        for path in filenames_from_logfile(logfile, &config.raw_path)? {
            if path.exists() {
                existing.push(path);
            } else {
                spdlog::warn!("{} is named in the log but missing on disk", path.display());
            }
        }
        return Ok(existing);
    }
    let mut files = Vec::new();
    scan_raw_directory(&config.raw_path, &mut files)?;
    files.sort();
    Ok(files)
}

fn scan_raw_directory(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), DriverError> {
    let processed_suffix = format!("{PROCESSED_SUFFIX}.h5");
    for entry in dir.read_dir()? {
        let path = entry?.path();
        if path.is_dir() {
            scan_raw_directory(&path, out)?;
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.starts_with("pumpon_") && name.ends_with(".h5") && !name.ends_with(&processed_suffix)
        {
            out.push(path);
        }
    }
    Ok(())
}
