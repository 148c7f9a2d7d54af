//! Local-time stamping for notifications.
//!
//! The producer formats the time itself so the consumer never has to know
//! the producer's time zone: `YYYY-MM-DD HH:MM:SS`, local time, 19 characters
//! plus a terminating NUL inside a 20-byte field.

use core::fmt::{self, Write};

use crate::wire::TIMESTAMP_LEN;

/// Broken-down calendar time (the subset of `TIME_FIELDS` we print).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeFields {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Writes into a fixed byte buffer, silently dropping whatever does not fit.
/// The last byte is reserved for the terminator.
struct Truncating<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len().saturating_sub(1).saturating_sub(self.len);
        let take = s.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

/// Format `t` as `YYYY-MM-DD HH:MM:SS` into a NUL-padded 20-byte field.
pub fn format_timestamp(t: &TimeFields) -> [u8; TIMESTAMP_LEN] {
    let mut out = [0u8; TIMESTAMP_LEN];
    let mut w = Truncating { buf: &mut out, len: 0 };
    // Truncating never reports an error.
    let _ = write!(
        w,
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        t.year, t.month, t.day, t.hour, t.minute, t.second
    );
    out
}
