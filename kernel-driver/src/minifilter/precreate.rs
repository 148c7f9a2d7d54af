//! Pre-create operation filter for file access events.
//!
//! Decides, for every `IRP_MJ_CREATE`, whether the open concerns the watched
//! file and a notification should be built. The decision is a pure function
//! of the operation, the connection state and the clock, so it runs the same
//! under the Filter Manager and in user-mode tests.
//!
//! Key responsibilities:
//! - Resolve the normalized name; on failure, let the open through silently.
//! - Compare case-insensitively against the single watched path.
//! - Skip when no consumer is connected or the requestor is the idle process.
//! - Build the record: requestor pid, local time, fixed classification text.

use alloc::string::String;

use log::debug;
use shared::constants::FILE_ACCESSED;
use shared::{format_timestamp, NotificationRecord, TimeFields};

use crate::consts::NTSTATUS;

/// What the host framework exposes about an in-flight create.
pub trait PreCreateOperation {
    /// `PsGetCurrentProcessId` of the requesting thread.
    fn requestor_process_id(&self) -> u64;

    /// `FltGetFileNameInformation(NORMALIZED)` + `FltParseFileNameInformation`.
    fn normalized_name(&self) -> Result<String, NTSTATUS>;
}

/// `KeQuerySystemTime` + `ExSystemTimeToLocalTime` + `RtlTimeToTimeFields`.
pub trait LocalClock {
    fn local_time(&self) -> TimeFields;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// Not the watched file, unresolvable name, or system requestor.
    Ignore,
    /// Watched file, but nobody is listening.
    NoClient,
    Notify(NotificationRecord),
}

pub struct InterceptionFilter {
    target: String,
}

impl InterceptionFilter {
    pub fn new(target: &str) -> Self {
        Self { target: String::from(target) }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Case-insensitive comparison, like `RtlCompareUnicodeString(.., TRUE)`.
    pub fn matches(&self, path: &str) -> bool {
        path.chars()
            .flat_map(char::to_uppercase)
            .eq(self.target.chars().flat_map(char::to_uppercase))
    }

    pub fn decide<O, K>(&self, op: &O, client_connected: bool, clock: &K) -> FilterDecision
    where
        O: PreCreateOperation + ?Sized,
        K: LocalClock + ?Sized,
    {
        let name = match op.normalized_name() {
            Ok(name) => name,
            Err(status) => {
                debug!("[LoggerFilter] name query failed, status {:#010X}", status as u32);
                return FilterDecision::Ignore;
            }
        };
        if !self.matches(&name) {
            return FilterDecision::Ignore;
        }

        let pid = op.requestor_process_id();
        debug!("[LoggerFilter] pre_create [{}] open of ({})", pid, name);

        if !client_connected {
            return FilterDecision::NoClient;
        }
        if pid == 0 {
            return FilterDecision::Ignore;
        }

        let stamp = format_timestamp(&clock.local_time());
        debug!(
            "[LoggerFilter] current time: {}",
            core::str::from_utf8(&stamp[..stamp.len() - 1]).unwrap_or("?")
        );
        FilterDecision::Notify(NotificationRecord::new(pid, stamp, FILE_ACCESSED))
    }
}
