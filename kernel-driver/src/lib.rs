//! LoggerFilter: a minifilter that reports every open of one watched file
//! to a user-mode logger.
//!
//! The crate holds the driver's logic only. Registration with the Filter
//! Manager (`FltRegisterFilter`, `FltCreateCommunicationPort`, the callback
//! table) is thin host glue that forwards into [`LoggerFilter`]; everything
//! here is `no_std` + `alloc` and runs unchanged in user-mode tests.
//!
//! ```text
//!   IRP_MJ_CREATE ─▶ LoggerFilter::pre_create ─▶ InterceptionFilter::decide
//!                                                   │ Notify(record)
//!                                                   ▼
//!                     FilterPort::send ─▶ ClientChannel::post ─▶ user mode
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod communications;
pub mod consts;
pub mod minifilter;

pub use communications::{ClientChannel, ConnectionCookie, FilterPort};
pub use consts::NTSTATUS;
pub use minifilter::{
    FilterDecision, InterceptionFilter, LocalClock, LoggerFilter, PreCreateOperation,
    PreOpCallbackStatus,
};
