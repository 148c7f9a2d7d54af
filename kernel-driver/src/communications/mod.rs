//! Producer half of the logger port.
//!
//! The filter owns one server port. A single consumer connects to it; every
//! notification is posted to that consumer's channel without waiting for it
//! to be read.

pub mod port;

pub use port::{ClientChannel, ConnectionCookie, FilterPort};
