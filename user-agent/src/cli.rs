//! Command line: `user-logger [REQUEST_COUNT] [THREAD_COUNT]`.

use std::ffi::OsString;

use clap::{error::ErrorKind, Parser};
use shared::constants::{DEFAULT_REQUEST_COUNT, DEFAULT_THREAD_COUNT, MAX_THREAD_COUNT};

use crate::error::ExitStatus;

#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "user-logger", version, about = "Logs every open of the file watched by LoggerFilter", long_about = None)]
pub struct Cli {
    /// Receive requests kept outstanding per worker thread
    #[arg(
        value_name = "REQUEST_COUNT",
        default_value_t = DEFAULT_REQUEST_COUNT,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub request_count: u32,

    /// Worker threads waiting on the completion port
    #[arg(
        value_name = "THREAD_COUNT",
        default_value_t = DEFAULT_THREAD_COUNT,
        value_parser = clap::value_parser!(u32).range(1..=MAX_THREAD_COUNT as i64)
    )]
    pub thread_count: u32,
}

#[derive(Debug)]
pub enum ParseOutcome {
    Run(Cli),
    /// Help, version or a usage error was already printed.
    Exit(ExitStatus),
}

/// Parse `args` (program name first). Nothing is created on failure.
pub fn parse<I, T>(args: I) -> ParseOutcome
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => ParseOutcome::Run(cli),
        Err(e) => {
            let _ = e.print();
            match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ParseOutcome::Exit(ExitStatus::Success),
                _ => ParseOutcome::Exit(ExitStatus::Usage),
            }
        }
    }
}
