//! File I/O minifilter subsystem for the file-open logger.
//!
//! [`LoggerFilter`] is the one long-lived service object the host glue
//! registers with the Filter Manager. It owns the server port (and with it
//! the single client connection), the interception rule and the clock;
//! every Filter Manager callback is a method on it.
//!
//! Key responsibilities:
//! - Attach to every volume except network file systems.
//! - Route `IRP_MJ_CREATE` pre-operations through [`InterceptionFilter`].
//! - Forward matching opens to user space via the port, best-effort.
//! - Close the port on unload.

pub mod precreate;
pub mod sendmsg;

use alloc::sync::Arc;

use log::debug;
use shared::constants::{LOGGER_PORT_NAME, TARGET_FILE_PATH};

use crate::communications::{ClientChannel, FilterPort};
use crate::consts::{NTSTATUS, FILE_DEVICE_NETWORK_FILE_SYSTEM, STATUS_FLT_DO_NOT_ATTACH, STATUS_SUCCESS};

pub use precreate::{FilterDecision, InterceptionFilter, LocalClock, PreCreateOperation};

/// `FLT_PREOP_CALLBACK_STATUS` values the filter can return.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreOpCallbackStatus {
    SuccessWithCallback = 0,
    SuccessNoCallback = 1,
}

/// Instance setup policy: we don't attach to network volumes.
pub fn should_attach(volume_device_type: u32) -> NTSTATUS {
    if volume_device_type == FILE_DEVICE_NETWORK_FILE_SYSTEM {
        STATUS_FLT_DO_NOT_ATTACH
    } else {
        STATUS_SUCCESS
    }
}

pub struct LoggerFilter<C, K> {
    port: Arc<FilterPort<C>>,
    filter: InterceptionFilter,
    clock: K,
}

impl<C: ClientChannel, K: LocalClock> LoggerFilter<C, K> {
    pub fn new(port: Arc<FilterPort<C>>, target: &str, clock: K) -> Self {
        Self { port, filter: InterceptionFilter::new(target), clock }
    }

    /// `\LOGGERPort` watching the built-in target path.
    pub fn with_defaults(clock: K) -> Self {
        Self::new(Arc::new(FilterPort::new(LOGGER_PORT_NAME)), TARGET_FILE_PATH, clock)
    }

    pub fn port(&self) -> &Arc<FilterPort<C>> {
        &self.port
    }

    pub fn filter(&self) -> &InterceptionFilter {
        &self.filter
    }

    pub fn instance_setup(&self, volume_device_type: u32) -> NTSTATUS {
        debug!("[LoggerFilter] instance_setup: VolumeDeviceType {:#x}", volume_device_type);
        should_attach(volume_device_type)
    }

    /// Manual detach is always allowed.
    pub fn query_teardown(&self) -> NTSTATUS {
        STATUS_SUCCESS
    }

    /// Pre-create callback. Never fails or delays the open it observes.
    pub fn pre_create<O: PreCreateOperation + ?Sized>(&self, op: &O) -> PreOpCallbackStatus {
        match self.filter.decide(op, self.port.is_connected(), &self.clock) {
            FilterDecision::Notify(record) => {
                // Outcome already traced; the open proceeds either way.
                let _ = sendmsg::send_to_user_mode(&self.port, &record);
            }
            FilterDecision::NoClient | FilterDecision::Ignore => {}
        }
        PreOpCallbackStatus::SuccessNoCallback
    }

    /// Filter unload: close the server port, dropping any consumer.
    pub fn unload(&self) -> NTSTATUS {
        self.port.close();
        STATUS_SUCCESS
    }
}
