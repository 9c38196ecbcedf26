use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn, LevelFilter};

use io_monitor::logging::init_logging_with_level;
use io_monitor::{Monitor, MonitorConfig};

/// Наблюдение за созданием и удалением исполняемых файлов.
#[derive(Parser, Debug)]
#[command(name = "iomonitor", version, about = "Watch directories for created and removed files")]
struct Cli {
    /// Flush interval (e.g. 5s, 1m)
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// Root directories to watch, comma separated (default: filesystem root)
    #[arg(long, value_delimiter = ',')]
    device: Vec<String>,

    /// File extensions to record, comma separated
    #[arg(long, value_delimiter = ',', default_value = ".exe,.dll")]
    filters: Vec<String>,

    /// SQLite database path
    #[arg(long, default_value = "monitor.db")]
    db: PathBuf,

    /// Drop the oldest buffered events beyond this many while the store is failing
    #[arg(long)]
    max_buffered: Option<usize>,

    /// Generate dummy .exe/.dll files under ./test_files
    #[arg(long)]
    test: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let debug_mode = std::env::var("DEBUG_MONITOR").is_ok_and(|v| v == "true");

    init_logging_with_level(if cli.verbose || debug_mode {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    if debug_mode {
        info!("Debug mode enabled");
    }

    let mut config = MonitorConfig::new(cli.interval)
        .set_database_path(&cli.db)
        .set_file_filters(&cli.filters)
        .set_max_buffered_events(cli.max_buffered);

    let devices: Vec<&str> = cli.device.iter().map(|d| d.trim()).filter(|d| !d.is_empty()).collect();
    if devices.is_empty() {
        config = config.add_device(MonitorConfig::default_device());
    } else {
        for device in devices {
            config = config.add_device(device);
        }
    }

    if cli.test || debug_mode {
        thread::spawn(|| generate_test_files(Path::new("test_files")));
    }

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("Failed to set signal handler")?;

    let mut monitor = Monitor::new(config);
    monitor.start().context("Failed to start monitoring")?;

    let devices: Vec<String> = monitor.devices().iter().map(|d| d.display().to_string()).collect();
    println!("File monitoring started. Press Ctrl+C to stop.");
    println!("Devices: {}", devices.join(", "));
    println!("File filters: {}", monitor.file_filters().join(", "));
    println!("Database: {}", cli.db.display());
    println!("Flush interval: {}", humantime::format_duration(cli.interval));

    let _ = stop_rx.recv();
    info!("Shutdown signal received");

    if let Err(err) = monitor.stop() {
        warn!("Stop failed: {err}");
    }
    monitor.print_stats();

    println!("Program terminated.");
    Ok(())
}

/// Пять раз создаёт и удаляет `test_{i}.exe` и `test_{i}.dll`.
fn generate_test_files(dir: &Path) {
    info!("Test file generation started");
    if let Err(err) = fs::create_dir_all(dir) {
        warn!("Failed to create test directory {}: {err}", dir.display());
        return;
    }

    for i in 0..5 {
        thread::sleep(Duration::from_secs(2));

        let files = [dir.join(format!("test_{i}.exe")), dir.join(format!("test_{i}.dll"))];
        for file in &files {
            match fs::write(file, b"test file") {
                Ok(()) => info!("Test file created: {}", file.display()),
                Err(err) => warn!("Failed to create test file {}: {err}", file.display()),
            }
        }

        thread::sleep(Duration::from_secs(3));

        for file in &files {
            match fs::remove_file(file) {
                Ok(()) => info!("Test file removed: {}", file.display()),
                Err(err) => warn!("Failed to remove test file {}: {err}", file.display()),
            }
        }
    }

    info!("Test file generation finished");
}
