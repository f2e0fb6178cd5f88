use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use libued_reduce::collector::Collector;
use libued_reduce::config::Config;
use libued_reduce::driver::process_run;

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn main() {
    // Create a cli
    let matches = Command::new("ued_reduce_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    match matches.subcommand() {
        Some(("new", _)) => {
            log::info!(
                "Making a template config at {}...",
                config_path.to_string_lossy()
            );

            make_template_config(&config_path);
            log::info!("Done.");
            return;
        }
        _ => (),
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Raw Path: {}", config.raw_path.to_string_lossy());
    log::info!("Processed Path: {}", config.processed_path.to_string_lossy());
    log::info!("Merged Path: {}", config.merged_path.to_string_lossy());
    log::info!(
        "Border Size: {} Discard First/Last: {}",
        config.border_size,
        config.discard_first_last
    );
    log::info!("Configured ROIs: {}", config.rois.len());

    // Spawn the processing run
    let (tx, rx) = mpsc::channel();
    let driver_config = config.clone();
    let handle = std::thread::spawn(move || process_run(driver_config, tx));

    // One progress bar per worker; workers announce themselves on the channel
    let mut bars: HashMap<usize, ProgressBar> = HashMap::new();
    loop {
        match rx.recv_timeout(std::time::Duration::from_millis(250)) {
            Ok(status) => {
                let bar = bars
                    .entry(status.worker_id)
                    .or_insert_with(|| pb_manager.add(ProgressBar::new(100)));
                bar.set_position((status.progress * 100.0) as u64);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if handle.is_finished() {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    for bar in bars.values() {
        bar.finish();
    }

    match handle.join() {
        Ok(Ok(report)) => {
            for file_report in &report.files {
                for warning in &file_report.warnings {
                    log::warn!("{warning}");
                }
            }
            for warning in &report.run_warnings {
                log::warn!("{warning}");
            }
            let dropped = report.dropped_files();
            if !dropped.is_empty() {
                log::warn!("{} raw files produced no output:", dropped.len());
                for (path, reason) in dropped {
                    log::warn!("  {}: {reason}", path.display());
                }
            }
            log::info!("Successfully processed raw data!");
        }
        Ok(Err(e)) => {
            log::error!("Processing failed with error: {e}");
            return;
        }
        Err(_) => {
            log::error!("Failed to join processing task!");
            return;
        }
    }

    // Merge the intermediate results
    log::info!(
        "Collecting intermediate results into {}...",
        config.merged_path.to_string_lossy()
    );
    let collector = match Collector::new(
        &config.processed_path,
        &config.merged_path,
        config.rois.clone(),
        config.temp_path.clone(),
    ) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    match collector.collect() {
        Ok(report) => {
            for (path, reason) in &report.dropped {
                log::warn!("Dropped {}: {reason}", path.display());
            }
            log::info!(
                "Merged {} of {} intermediate files.",
                report.n_merged,
                report.n_files
            );
        }
        Err(e) => {
            log::error!("Collection failed with error: {e}");
            return;
        }
    }

    log::info!("Done.");
}
