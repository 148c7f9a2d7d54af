//! Consumer half of the logger port.
//!
//! The worker pipeline only sees three seams:
//! - [`MessagePort`]: queue an asynchronous receive into a slot.
//! - [`CompletionQueue`]: block until any queued receive finishes.
//! - [`ChannelProvider`]: open both at startup.
//!
//! Backends: [`fltmsg`] talks to the real minifilter through the Filter
//! Manager (Windows only); [`loopback`] wires an in-process
//! `logger_filter::FilterPort` to the same seams for tests and demos.

#[cfg(windows)]
pub mod fltmsg;
pub mod loopback;

use std::io;

use thiserror::Error;

use crate::pipeline::SlotLease;

/*────────────────────────── errors ──────────────────────────*/

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("port refused the connection (status {0:#010X})")]
    Refused(u32),

    #[error("{0}")]
    Os(#[from] io::Error),

    #[error("filter communication ports are not available on this platform")]
    Unsupported,
}

/// Why a receive could not be queued.
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("port is disconnected")]
    Disconnected,

    #[error("receive failed: {0}")]
    Os(#[source] io::Error),
}

/// Why waiting on the completion queue failed.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The producer tore the channel down; expected at filter unload.
    #[error("port is disconnected")]
    Disconnected,

    #[error("completion wait failed: {0}")]
    Os(#[source] io::Error),
}

/*────────────────────────── results ─────────────────────────*/

/// A receive that could not be queued. The slot comes back to the caller.
#[derive(Debug)]
pub struct Rejected {
    pub slot: SlotLease,
    pub error: ReceiveError,
}

/// One finished receive: the very slot that was submitted, now holding
/// `bytes_transferred` bytes of envelope.
#[derive(Debug)]
pub struct Completion {
    pub slot: SlotLease,
    pub bytes_transferred: u32,
}

/*────────────────────────── seams ───────────────────────────*/

pub trait MessagePort: Send + Sync {
    /// Queue an asynchronous receive into `slot` and return at once.
    /// The slot is handed back either by [`CompletionQueue::wait`] or,
    /// if it could not be queued, inside [`Rejected`].
    fn begin_receive(&self, slot: SlotLease) -> Result<(), Rejected>;

    /// Close our end of the connection. Outstanding receives fail with
    /// "disconnected". Idempotent.
    fn close(&self);

    /// Handle description for the startup banner.
    fn describe(&self) -> String;
}

pub trait CompletionQueue: Send + Sync {
    /// Block (without timeout) until one outstanding receive finishes.
    fn wait(&self) -> Result<Completion, CompletionError>;

    fn describe(&self) -> String;
}

/// Opens the port and its completion queue at startup.
pub trait ChannelProvider {
    type Port: MessagePort + 'static;
    type Queue: CompletionQueue + 'static;

    fn connect(&mut self, port_name: &str) -> Result<Self::Port, ChannelError>;

    /// Create the completion queue bound to `port`. `concurrency` is the
    /// number of worker threads that will wait on it.
    fn create_completion_queue(
        &mut self,
        port: &Self::Port,
        concurrency: u32,
    ) -> Result<Self::Queue, ChannelError>;
}

/// Stand-in where no Filter Manager exists: every connect fails.
#[cfg(not(windows))]
#[derive(Debug, Default)]
pub struct UnsupportedProvider;

#[cfg(not(windows))]
impl ChannelProvider for UnsupportedProvider {
    type Port = loopback::LoopbackPort;
    type Queue = loopback::LoopbackQueue;

    fn connect(&mut self, _port_name: &str) -> Result<Self::Port, ChannelError> {
        Err(ChannelError::Unsupported)
    }

    fn create_completion_queue(
        &mut self,
        _port: &Self::Port,
        _concurrency: u32,
    ) -> Result<Self::Queue, ChannelError> {
        Err(ChannelError::Unsupported)
    }
}
