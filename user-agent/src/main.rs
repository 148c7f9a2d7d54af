// src/main.rs

//! user-logger entry point.
//!
//! 1. Parse `[REQUEST_COUNT] [THREAD_COUNT]` (usage errors exit before anything exists)
//! 2. Load `logger.toml` next to the executable & set up structured logging
//! 3. Connect to `\LOGGERPort`, bind the completion port, seed the receives
//! 4. Let the workers log every notification until the filter goes away
//! 5. Report the final status as the process exit code

// ───── std / 3rd-party imports ──────────────────────────────────────────────
use anyhow::Context;
use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::{
    env,
    path::{Path, PathBuf},
    process::{self, ExitCode},
    sync::Arc,
    thread,
};

// ───── local imports ────────────────────────────────────────────────────────
use user_logger::app::{self, Settings};
use user_logger::cli::{self, ParseOutcome};
use user_logger::config::{self, LoggerConfig, LoggingConfig, CONFIG_FILE};
use user_logger::sink::ProcessLogFile;
use user_logger::ExitStatus;

// ───── helpers ──────────────────────────────────────────────────────────────

/// Directory that contains the running executable.
fn exe_dir() -> anyhow::Result<PathBuf> {
    let exe = env::current_exe().context("cannot determine exe path")?;
    exe.parent()
        .map(Path::to_path_buf)
        .context("executable must live in some directory")
}

/// Configure global logging as requested in `[logging]`.
fn setup_logging(exe_dir: &Path, logging: &LoggingConfig) -> Result<(), fern::InitError> {
    let level = match logging.level.to_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        "OFF" => LevelFilter::Off,
        _ => LevelFilter::Info,
    };

    let log_path = logging
        .enable
        .then(|| exe_dir.join(logging.file.as_deref().unwrap_or("user-logger.log")));

    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                process::id(),
                thread::current().id(),
                msg
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(path) = log_path {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

/// Config file + logging; any failure here is a configuration error.
fn bootstrap() -> anyhow::Result<LoggerConfig> {
    let exe_dir = exe_dir()?;
    let cfg_path = exe_dir.join(CONFIG_FILE);
    let cfg = config::load(&cfg_path).with_context(|| format!("loading {}", cfg_path.display()))?;
    setup_logging(&exe_dir, &cfg.logging).context("logging setup failed")?;
    Ok(cfg)
}

#[cfg(windows)]
fn provider() -> user_logger::comms::fltmsg::FilterManagerProvider {
    user_logger::comms::fltmsg::FilterManagerProvider
}

#[cfg(not(windows))]
fn provider() -> user_logger::comms::UnsupportedProvider {
    user_logger::comms::UnsupportedProvider
}

fn main() -> ExitCode {
    // 1 ─ Arguments
    let cli = match cli::parse(env::args_os()) {
        ParseOutcome::Run(cli) => cli,
        ParseOutcome::Exit(status) => return status.into(),
    };

    // 2 ─ Config & logging
    let cfg = match bootstrap() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("[{}][ERROR][main] {:#}", Local::now().to_rfc3339(), e);
            return ExitStatus::Usage.into();
        }
    };
    log::info!("user-logger starting");

    // 3 ─ Pipeline
    let settings = Settings::from_cli(&cli, &cfg);
    let sink = Arc::new(ProcessLogFile::new(cfg.sink.path));
    let mut provider = provider();

    // 4 ─ Run until the port goes away
    app::run(&settings, &mut provider, sink).into()
}
