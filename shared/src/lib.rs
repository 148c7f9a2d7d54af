//! Types both sides of the logger port agree on.
//!
//! The kernel filter and the user-mode consumer exchange one fixed-size
//! message per observed open. Everything that has to match bit-for-bit on
//! both sides of the privilege boundary lives here.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod constants;
pub mod time;
pub mod wire;

pub use time::{format_timestamp, TimeFields};
pub use wire::{MessageEnvelope, MessageHeader, NotificationRecord, WireError};
