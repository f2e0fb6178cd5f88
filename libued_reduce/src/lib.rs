//! # ued_reduce
//!
//! ued_reduce is the single-shot data-reduction pipeline for our ultrafast
//! electron diffraction experiments, written in Rust. It takes the raw
//! per-delay image stacks written by the detector acquisition system,
//! separates the interleaved pump-on and pump-off frames, reduces every
//! stack to compact aggregate statistics, and merges everything into a
//! single experiment-wide HDF5 dataset for downstream physics analysis.
//!
//! ## Installation
//!
//! In the future we may deploy to crates.io, but currently the only method
//! of install is from source, which is laid out below.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install
//! the Rust tool chain. See the
//! [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### HDF5
//!
//! Before building and running ued_reduce, HDF5 must be installed.
//! Typically this will be installed using a package manager (homebrew, apt,
//! etc), and the Rust libraries will auto detect the location of the HDF
//! install. However, this is not always possible. Sometimes a newer version
//! will need to be installed to a custom location. If this is the case,
//! write the following snippet into the file `.cargo/config.toml` in the
//! ued_reduce repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! Replace `/path/to/my/hdf5/install/` with the path to your HDF5
//! installation.
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./ued_reduce_cli`
//! from the top level ued_reduce repository.
//!
//! ## Configuration
//!
//! A processing run is driven by a YAML configuration file. A template can
//! be generated with the CLI `new` subcommand. The format is as follows:
//!
//! ```yml
//! raw_path: /data/TiSe2_run_0010
//! processed_path: /data/TiSe2_run_0010_processed
//! merged_path: /data/TiSe2_run_0010.h5
//! mask_path: null
//! temp_path: null
//! logfile_path: null
//! border_size: 8
//! discard_first_last: true
//! confidence_threshold: 100.0
//! n_workers: null
//! rois:
//!   bragg_1:
//!     rows: { start: 172, stop: 186, step: null }
//!     cols: { start: 126, stop: 140, step: null }
//! ```
//!
//! When `n_workers` is `null`, the worker count is computed from available
//! system memory and the byte size of one raw stack, so simultaneous
//! workers never exceed physical memory. When `logfile_path` is set, the
//! raw files are taken from the experiment log in acquisition order.
//!
//! ## Output
//!
//! Each raw file yields one intermediate result file, mirrored under the
//! processed directory:
//!
//! ```text
//! pumpon_+003.500ps_processed.h5
//! confidence - scalar
//! delay - scalar
//! mask - (H, W)
//! |---- pump_on | pump_off
//! |    |---- avg_intensities(dset) - (H, W)
//! |    |---- sum_intensities(dset) - (n_retained,)
//! |    |---- histogram(dset) - (65536,)
//! |    |---- rois
//! |    |    |---- <name>(dset) - (n_retained,)
//! ```
//!
//! Collection merges every intermediate file into one write-once dataset:
//!
//! ```text
//! merged.h5
//! confidence - (n_files,)
//! mask - (H, W)
//! delays - (n_delays,)
//! files_per_delay - (n_delays,)
//! |---- pump_on | pump_off
//! |    |---- avg_intensities(dset) - (n_delays, H, W)
//! |    |---- sum_intensities(dset) - (n_files * n_retained,)
//! |    |---- histogram(dset) - (n_delays, 65536)
//! |    |---- rois
//! |    |    |---- <name>(dset) - (n_files * n_retained,)
//! ```
//!
//! Intermediate files that already exist are skipped, so a directory can be
//! re-run safely after a partial failure; broken raw files are dropped with
//! a warning and reported at the end of the run so a later re-run can
//! target just the gaps.
pub mod collector;
pub mod config;
pub mod constants;
pub mod disambiguate;
pub mod driver;
pub mod error;
pub mod hdf_writer;
pub mod integrity;
pub mod kernels;
pub mod logfile;
pub mod mask;
pub mod processor;
pub mod slicing;
pub mod stack_file;
pub mod worker_status;
