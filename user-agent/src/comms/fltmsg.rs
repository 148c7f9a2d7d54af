//! Kernel-to-user communication using Filter Manager messaging.
//!
//! This module implements the receiver side of `FltSendMessage`: it connects
//! to the minifilter's `\LOGGERPort`, binds an I/O completion port to it and
//! submits `FilterGetMessage` requests straight into pool slots.
//!
//! Key responsibilities:
//! - Connect to the filter port established by the kernel driver.
//! - Submit each receive with the slot's own OVERLAPPED and envelope buffer.
//! - Map a dequeued OVERLAPPED back to the lease that owns it.
//! - Classify handle teardown as "disconnected".
//!
//! A submitted lease is parked in a table keyed by its OVERLAPPED address
//! before the call is made, so the completion can never outrun the lookup.

use std::{
    collections::HashMap,
    ffi::OsStr,
    io, mem,
    os::windows::prelude::OsStrExt,
    ptr,
    sync::{
        atomic::{AtomicPtr, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use log::Level;
use shared::wire::ENVELOPE_WIRE_LEN;
use windows_sys::{
    core::HRESULT,
    Win32::{
        Foundation::{
            CloseHandle, GetLastError, ERROR_ABANDONED_WAIT_0, ERROR_INVALID_HANDLE,
            ERROR_IO_PENDING, ERROR_OPERATION_ABORTED, HANDLE, S_OK,
        },
        Storage::InstallableFileSystems::{
            FilterConnectCommunicationPort, FilterGetMessage, FILTER_MESSAGE_HEADER,
        },
        System::{
            IO::{CreateIoCompletionPort, GetQueuedCompletionStatus, OVERLAPPED},
            Threading::INFINITE,
        },
    },
};

use crate::comms::{
    ChannelError, ChannelProvider, Completion, CompletionError, CompletionQueue, MessagePort,
    ReceiveError, Rejected,
};
use crate::logger_log;
use crate::pipeline::SlotLease;

/// Rust equivalent of `HRESULT_FROM_WIN32`.
const fn hresult_from_win32(code: u32) -> HRESULT {
    if code as i32 <= 0 {
        code as i32
    } else {
        ((code & 0x0000_FFFF) | (7 << 16) | 0x8000_0000) as i32
    }
}

const HR_IO_PENDING: HRESULT = hresult_from_win32(ERROR_IO_PENDING);
const HR_INVALID_HANDLE: HRESULT = hresult_from_win32(ERROR_INVALID_HANDLE);

fn is_disconnect(code: u32) -> bool {
    matches!(code, ERROR_INVALID_HANDLE | ERROR_OPERATION_ABORTED | ERROR_ABANDONED_WAIT_0)
}

/*────────────────────────── parked slots ────────────────────*/

/// Leases whose receive is in flight, keyed by OVERLAPPED address.
struct ParkedSlots(Mutex<HashMap<usize, SlotLease>>);

impl ParkedSlots {
    fn lock(&self) -> MutexGuard<'_, HashMap<usize, SlotLease>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ParkedSlots {
    fn drop(&mut self) {
        // The I/O manager may still write into requests whose cancellation
        // has not completed; their memory has to outlive us.
        for (_, lease) in self.lock().drain() {
            mem::forget(lease);
        }
    }
}

/*────────────────────────── handles ─────────────────────────*/

/// Completion port handle, closed on drop.
struct OwnedHandle(HANDLE);

// Safe because a completion port handle may be used from any thread.
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { CloseHandle(self.0) };
        }
    }
}

/*────────────────────────── port ────────────────────────────*/

pub struct FilterMessagePort {
    // Swapped to null by `close`; a null handle means disconnected.
    handle: AtomicPtr<core::ffi::c_void>,
    parked: Arc<ParkedSlots>,
}

impl FilterMessagePort {
    fn raw(&self) -> HANDLE {
        self.handle.load(Ordering::Acquire)
    }
}

impl MessagePort for FilterMessagePort {
    fn begin_receive(&self, mut slot: SlotLease) -> Result<(), Rejected> {
        let handle = self.raw();
        if handle.is_null() {
            return Err(Rejected { slot, error: ReceiveError::Disconnected });
        }

        let (buffer, overlapped) = slot.raw_parts();
        let key = overlapped as usize;
        self.parked.lock().insert(key, slot);

        // SAFETY: both pointers address the slot's storage inside the pool,
        // which stays allocated while the lease is parked (and after, see
        // `ParkedSlots::drop`). The buffer is `ENVELOPE_WIRE_LEN` bytes.
        let hr = unsafe {
            FilterGetMessage(
                handle,
                buffer as *mut FILTER_MESSAGE_HEADER,
                ENVELOPE_WIRE_LEN as u32,
                overlapped as *mut OVERLAPPED,
            )
        };
        if hr == HR_IO_PENDING || hr == S_OK {
            return Ok(());
        }

        // Failed synchronously: no completion packet will be queued.
        let Some(slot) = self.parked.lock().remove(&key) else {
            logger_log!(Level::Error, "comms:fltmsg", "request {:#x} vanished after failed submit", key);
            return Ok(());
        };
        let error = if hr == HR_INVALID_HANDLE {
            ReceiveError::Disconnected
        } else {
            ReceiveError::Os(io::Error::from_raw_os_error(hr))
        };
        Err(Rejected { slot, error })
    }

    fn close(&self) {
        let handle = self.handle.swap(ptr::null_mut(), Ordering::AcqRel);
        if !handle.is_null() {
            // Cancels every pending FilterGetMessage (ERROR_OPERATION_ABORTED).
            unsafe { CloseHandle(handle) };
        }
    }

    fn describe(&self) -> String {
        format!("{:p}", self.raw())
    }
}

impl Drop for FilterMessagePort {
    fn drop(&mut self) {
        self.close();
    }
}

/*────────────────────────── completion port ─────────────────*/

pub struct FilterCompletionQueue {
    handle: OwnedHandle,
    parked: Arc<ParkedSlots>,
}

impl CompletionQueue for FilterCompletionQueue {
    fn wait(&self) -> Result<Completion, CompletionError> {
        let mut bytes = 0u32;
        let mut key = 0usize;
        let mut overlapped: *mut OVERLAPPED = ptr::null_mut();

        // SAFETY: out-pointers are valid locals; the handle is owned.
        let ok = unsafe {
            GetQueuedCompletionStatus(self.handle.0, &mut bytes, &mut key, &mut overlapped, INFINITE)
        };
        let failure = (ok == 0).then(|| unsafe { GetLastError() });

        let classify = |code: u32| {
            if is_disconnect(code) {
                CompletionError::Disconnected
            } else {
                CompletionError::Os(io::Error::from_raw_os_error(code as i32))
            }
        };

        if overlapped.is_null() {
            // The wait itself failed; no request was dequeued.
            return Err(classify(failure.unwrap_or(ERROR_INVALID_HANDLE)));
        }

        let Some(mut slot) = self.parked.lock().remove(&(overlapped as usize)) else {
            return Err(CompletionError::Os(io::Error::new(
                io::ErrorKind::InvalidData,
                "completion for a request that was never submitted",
            )));
        };

        match failure {
            None => Ok(Completion { slot, bytes_transferred: bytes }),
            Some(code) => {
                slot.mark_idle();
                Err(classify(code))
            }
        }
    }

    fn describe(&self) -> String {
        format!("{:p}", self.handle.0)
    }
}

/*────────────────────────── provider ────────────────────────*/

/// Opens the real minifilter port through `fltlib`.
#[derive(Debug, Default)]
pub struct FilterManagerProvider;

impl ChannelProvider for FilterManagerProvider {
    type Port = FilterMessagePort;
    type Queue = FilterCompletionQueue;

    fn connect(&mut self, port_name: &str) -> Result<FilterMessagePort, ChannelError> {
        let wide: Vec<u16> = OsStr::new(port_name).encode_wide().chain(Some(0)).collect();
        let mut handle: HANDLE = ptr::null_mut();

        // SAFETY: `wide` is NUL-terminated and outlives the call.
        let hr = unsafe {
            FilterConnectCommunicationPort(wide.as_ptr(), 0, ptr::null(), 0, ptr::null(), &mut handle)
        };
        if hr != S_OK {
            return Err(ChannelError::Os(io::Error::from_raw_os_error(hr)));
        }

        Ok(FilterMessagePort {
            handle: AtomicPtr::new(handle),
            parked: Arc::new(ParkedSlots(Mutex::new(HashMap::new()))),
        })
    }

    fn create_completion_queue(
        &mut self,
        port: &FilterMessagePort,
        concurrency: u32,
    ) -> Result<FilterCompletionQueue, ChannelError> {
        // SAFETY: the port handle is open; a null existing port creates one.
        let cq = unsafe { CreateIoCompletionPort(port.raw(), ptr::null_mut(), 0, concurrency) };
        if cq.is_null() {
            return Err(ChannelError::Os(io::Error::last_os_error()));
        }
        Ok(FilterCompletionQueue { handle: OwnedHandle(cq), parked: Arc::clone(&port.parked) })
    }
}
