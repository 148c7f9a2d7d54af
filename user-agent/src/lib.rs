// src/lib.rs
// ────────────────────────────────────────────────────────────────────────────
// Public library entry point.  Re-export everything for both `main.rs` and
// integration tests.

pub mod macros;

pub mod app;
pub mod cli;
pub mod comms;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod sink;

pub use error::{ExitStatus, StartupError};
