//! NTSTATUS values and Filter Manager constants the filter returns.
//!
//! Only the handful the logger actually produces; the host glue passes them
//! straight through to the Filter Manager.

#[allow(clippy::upper_case_acronyms)]
pub type NTSTATUS = i32;

/*────────── status codes ─────────*/

pub const STATUS_SUCCESS: NTSTATUS = 0;
pub const STATUS_OBJECT_NAME_INVALID: NTSTATUS = 0xC000_0033_u32 as i32;
pub const STATUS_OBJECT_NAME_NOT_FOUND: NTSTATUS = 0xC000_0034_u32 as i32;
pub const STATUS_PORT_DISCONNECTED: NTSTATUS = 0xC000_0037_u32 as i32;
pub const STATUS_INSUFFICIENT_RESOURCES: NTSTATUS = 0xC000_009A_u32 as i32;
pub const STATUS_CONNECTION_COUNT_LIMIT: NTSTATUS = 0xC000_0246_u32 as i32;
pub const STATUS_FLT_DELETING_OBJECT: NTSTATUS = 0xC01C_000B_u32 as i32;
pub const STATUS_FLT_DO_NOT_ATTACH: NTSTATUS = 0xC01C_000F_u32 as i32;

/*────────── volume device types ─────────*/

pub const FILE_DEVICE_CD_ROM_FILE_SYSTEM: u32 = 0x0000_0003;
pub const FILE_DEVICE_DISK_FILE_SYSTEM: u32 = 0x0000_0008;
pub const FILE_DEVICE_NETWORK_FILE_SYSTEM: u32 = 0x0000_0014;

/// Only one consumer may hold the port at a time.
pub const MAX_CONNECTIONS: u32 = 1;

/// Rust equivalent of `NT_SUCCESS`.
#[inline]
pub const fn nt_success(status: NTSTATUS) -> bool {
    status >= 0
}
