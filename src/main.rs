//! Console viewer: capture the machine-wide debug-output broadcast and
//! print every record.
//!
//! 1. Load `default.toml` next to the executable (missing file = defaults)
//! 2. Set up structured logging on stderr (and optionally a file)
//! 3. Start the monitor and subscribe a printer
//! 4. Wait for Ctrl-C, then stop cleanly

use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;

use dbgmon::config::{self, AppConfig};
use dbgmon::{DebugEvent, DebugEventMonitor, OutputMode};

/// Directory that contains the running executable, falling back to the
/// working directory.
fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configure global logging as requested in `[logging]`. Log lines go to
/// stderr so captured records own stdout.
fn setup_logging(exe_dir: &Path, cfg: &AppConfig) -> Result<(), fern::InitError> {
    let level = match cfg.logging.level.to_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let log_path = cfg
        .logging
        .enable
        .then(|| exe_dir.join(cfg.logging.file.as_deref().unwrap_or("dbgmon.log")));

    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                process::id(),
                msg
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Some(path) = log_path {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

fn print_record(mode: OutputMode, pid: u32, text: &str) {
    match mode {
        OutputMode::Text => println!("[{pid:5}] {text}"),
        OutputMode::Json => {
            let record = DebugEvent {
                pid,
                text: text.to_owned(),
            };
            match serde_json::to_string(&record) {
                Ok(line) => println!("{line}"),
                Err(e) => log::error!("cannot serialize record: {e}"),
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    let exe_dir = exe_dir();
    let cfg = config::load(&exe_dir.join("default.toml")).context("loading default.toml")?;
    setup_logging(&exe_dir, &cfg).context("logging setup failed")?;

    let monitor = DebugEventMonitor::new(cfg.monitor_config());
    let mode = cfg.output;
    monitor.subscribe(move |pid, text| print_record(mode, pid, text));

    monitor.start().context("failed to start capture")?;
    log::info!("capturing debug output, Ctrl-C to stop");

    let (stop_tx, stop_rx) = crossbeam::channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("cannot install Ctrl-C handler")?;
    let _ = stop_rx.recv();

    log::info!("stopping");
    monitor.stop().context("failed to stop capture")?;
    Ok(())
}
