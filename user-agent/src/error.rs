//! Process-level failures and the exit codes they map to.

use std::{io, process::ExitCode};

use thiserror::Error;

use crate::comms::{ChannelError, ReceiveError};
use crate::config::ConfigError;
use crate::pipeline::AllocError;

/// Exit status of `user-logger`. Codes are stable; scripts depend on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    Success = 0,
    Usage = 1,
    Connect = 2,
    CompletionQueue = 3,
    OutOfMemory = 4,
    ThreadSpawn = 5,
    ReceiveFailed = 6,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// Everything that can abort startup before the workers own the pipeline.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("could not connect to {port}: {source}")]
    Connect {
        port: String,
        #[source]
        source: ChannelError,
    },

    #[error("could not create completion port: {0}")]
    CompletionQueue(#[source] ChannelError),

    #[error(transparent)]
    OutOfMemory(#[from] AllocError),

    #[error("couldn't create thread {index}: {source}")]
    ThreadSpawn {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("initial receive {index} was not queued: {source}")]
    Seed {
        index: usize,
        #[source]
        source: ReceiveError,
    },
}

impl StartupError {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            StartupError::Config(_) => ExitStatus::Usage,
            StartupError::Connect { .. } => ExitStatus::Connect,
            StartupError::CompletionQueue(_) => ExitStatus::CompletionQueue,
            StartupError::OutOfMemory(_) => ExitStatus::OutOfMemory,
            StartupError::ThreadSpawn { .. } => ExitStatus::ThreadSpawn,
            StartupError::Seed { .. } => ExitStatus::ReceiveFailed,
        }
    }
}
