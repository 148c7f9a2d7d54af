//! Startup and shutdown of the consumer.
//!
//! Order matters for cleanup and exit codes:
//! 1. validate counts (nothing created yet)
//! 2. connect to the port
//! 3. create the completion queue bound to it
//! 4. allocate and seed the slots, spawn the workers
//! 5. join the workers and report

use std::sync::Arc;

use log::Level;
use shared::constants::{LOGGER_PORT_NAME, MAX_THREAD_COUNT};

use crate::cli::Cli;
use crate::comms::{ChannelProvider, CompletionQueue, MessagePort};
use crate::config::{ConfigError, LoggerConfig};
use crate::error::{ExitStatus, StartupError};
use crate::logger_log;
use crate::pipeline::DispatchEngine;
use crate::sink::LogSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub request_count: u32,
    pub thread_count: u32,
    pub port_name: String,
}

impl Settings {
    pub fn new(request_count: u32, thread_count: u32) -> Self {
        Self { request_count, thread_count, port_name: LOGGER_PORT_NAME.into() }
    }

    pub fn from_cli(cli: &Cli, cfg: &LoggerConfig) -> Self {
        Self {
            request_count: cli.request_count,
            thread_count: cli.thread_count,
            port_name: cfg.port.name.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_count == 0 {
            return Err(ConfigError::OutOfRange {
                name: "request count",
                value: self.request_count,
                min: 1,
                max: u32::MAX,
            });
        }
        if !(1..=MAX_THREAD_COUNT).contains(&self.thread_count) {
            return Err(ConfigError::OutOfRange {
                name: "thread count",
                value: self.thread_count,
                min: 1,
                max: MAX_THREAD_COUNT,
            });
        }
        Ok(())
    }
}

/// Bring the pipeline up. On success the workers are running and own it.
pub fn start<P, S>(
    settings: &Settings,
    provider: &mut P,
    sink: Arc<S>,
) -> Result<DispatchEngine<P::Port>, StartupError>
where
    P: ChannelProvider,
    S: LogSink + ?Sized + 'static,
{
    settings.validate()?;

    println!("LOGGER: Connecting to the filter...");
    let port = provider
        .connect(&settings.port_name)
        .map_err(|source| StartupError::Connect { port: settings.port_name.clone(), source })?;

    let queue = match provider.create_completion_queue(&port, settings.thread_count) {
        Ok(queue) => queue,
        Err(source) => {
            port.close();
            return Err(StartupError::CompletionQueue(source));
        }
    };

    println!("LOGGER: Port = {} Completion = {}", port.describe(), queue.describe());
    logger_log!(
        Level::Info,
        "app",
        "{} worker(s) x {} request(s) on {}",
        settings.thread_count,
        settings.request_count,
        settings.port_name
    );

    DispatchEngine::start(port, queue, sink, settings.thread_count, settings.request_count)
}

/// Run until every worker has ended; returns the process exit status.
pub fn run<P, S>(settings: &Settings, provider: &mut P, sink: Arc<S>) -> ExitStatus
where
    P: ChannelProvider,
    S: LogSink + ?Sized + 'static,
{
    let status = match start(settings, provider, sink) {
        Ok(engine) => engine.join().status(),
        Err(e) => {
            logger_log!(Level::Error, "app", "{}", e);
            eprintln!("ERROR: {e}");
            e.exit_status()
        }
    };
    println!("LOGGER: All done. Result = 0x{:X}", status.code());
    status
}
