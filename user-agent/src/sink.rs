//! Append-only process log.
//!
//! One line per received notification:
//! ` Process ID: <pid>, open at : <YYYY-MM-DD HH:MM:SS>`.
//! The file is opened in append mode for every record so that external
//! rotation or deletion between records is harmless.

use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use log::Level;
use thiserror::Error;

use crate::logger_log;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Unable to open log file. ({path}): {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("write to {path} failed: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Destination for `(process id, timestamp)` pairs.
pub trait LogSink: Send + Sync {
    fn record(&self, process_id: u64, timestamp: &str) -> Result<(), SinkError>;
}

pub struct ProcessLogFile {
    path: PathBuf,
    // Serializes appends from concurrent workers so lines never interleave.
    guard: Mutex<()>,
}

impl ProcessLogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), guard: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn format_line(process_id: u64, timestamp: &str) -> String {
    format!(" Process ID: {process_id}, open at : {timestamp}\n")
}

impl LogSink for ProcessLogFile {
    fn record(&self, process_id: u64, timestamp: &str) -> Result<(), SinkError> {
        let line = format_line(process_id, timestamp);
        let _held = self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| {
                logger_log!(Level::Error, "sink", "Unable to open log file. {:?}", self.path);
                SinkError::Open { path: self.path.clone(), source }
            })?;

        file.write_all(line.as_bytes())
            .map_err(|source| SinkError::Write { path: self.path.clone(), source })
    }
}
