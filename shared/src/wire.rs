//! Fixed wire layout of one logger message.
//!
//! ```text
//!   MessageEnvelope (304 bytes)
//!   ┌──── header (16) ─────────────────┬──── record (288) ─────────────────────────────┐
//!   │ reply_len u32 │ pad │ msg_id u64 │ pid u64 │ time [20] │ message [256] │ pad [4] │
//!   └─ 0            4     8            16        24          44              300      304
//! ```
//!
//! All integers are little-endian. Padding bytes are written as zero and
//! ignored on read. A record decodes from its first 284 bytes, so senders
//! that omit the tail padding are still accepted.

use thiserror::Error;

pub const PROCESS_ID_LEN: usize = 8;
pub const TIMESTAMP_LEN: usize = 20;
pub const MESSAGE_DATA_LEN: usize = 256;

const PID_OFF: usize = 0;
const TIME_OFF: usize = PID_OFF + PROCESS_ID_LEN;
const DATA_OFF: usize = TIME_OFF + TIMESTAMP_LEN;

/// Bytes of a record that carry data.
pub const RECORD_PAYLOAD_LEN: usize = DATA_OFF + MESSAGE_DATA_LEN;
/// Record size including the tail padding up to 8-byte alignment.
pub const RECORD_WIRE_LEN: usize = (RECORD_PAYLOAD_LEN + 7) & !7;

const REPLY_LEN_OFF: usize = 0;
const MSG_ID_OFF: usize = 8;

/// Transport header size (`FILTER_MESSAGE_HEADER`).
pub const HEADER_WIRE_LEN: usize = 16;
pub const ENVELOPE_WIRE_LEN: usize = HEADER_WIRE_LEN + RECORD_WIRE_LEN;
/// Smallest envelope a consumer accepts.
pub const ENVELOPE_MIN_LEN: usize = HEADER_WIRE_LEN + RECORD_PAYLOAD_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("buffer too short: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("{0} field is not valid UTF-8")]
    NotUtf8(&'static str),
}

fn check_len(bytes: &[u8], needed: usize) -> Result<(), WireError> {
    if bytes.len() < needed {
        return Err(WireError::Truncated { needed, got: bytes.len() });
    }
    Ok(())
}

/// Text up to the first NUL (or the whole field when there is none).
fn c_str<'a>(field: &'a [u8], name: &'static str) -> Result<&'a str, WireError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    core::str::from_utf8(&field[..end]).map_err(|_| WireError::NotUtf8(name))
}

/*────────────────────────── record ──────────────────────────*/

/// One observed open of the watched file.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NotificationRecord {
    pub process_id: u64,
    /// `YYYY-MM-DD HH:MM:SS`, NUL-padded.
    pub timestamp: [u8; TIMESTAMP_LEN],
    /// Short classification string, NUL-padded.
    pub message_data: [u8; MESSAGE_DATA_LEN],
}

impl NotificationRecord {
    pub const fn zeroed() -> Self {
        Self {
            process_id: 0,
            timestamp: [0; TIMESTAMP_LEN],
            message_data: [0; MESSAGE_DATA_LEN],
        }
    }

    /// Build a record; `message` is cut to at most 255 bytes, on a char
    /// boundary, so the field stays NUL-terminated UTF-8.
    pub fn new(process_id: u64, timestamp: [u8; TIMESTAMP_LEN], message: &str) -> Self {
        let mut message_data = [0u8; MESSAGE_DATA_LEN];
        let mut take = message.len().min(MESSAGE_DATA_LEN - 1);
        while !message.is_char_boundary(take) {
            take -= 1;
        }
        message_data[..take].copy_from_slice(&message.as_bytes()[..take]);
        Self { process_id, timestamp, message_data }
    }

    pub fn timestamp_str(&self) -> Result<&str, WireError> {
        c_str(&self.timestamp, "timestamp")
    }

    pub fn message_str(&self) -> Result<&str, WireError> {
        c_str(&self.message_data, "message")
    }

    /// Serialize into `out[..RECORD_WIRE_LEN]`, padding included.
    ///
    /// # Panics
    /// If `out` is shorter than [`RECORD_WIRE_LEN`].
    pub fn encode_into(&self, out: &mut [u8]) {
        let out = &mut out[..RECORD_WIRE_LEN];
        out[PID_OFF..TIME_OFF].copy_from_slice(&self.process_id.to_le_bytes());
        out[TIME_OFF..DATA_OFF].copy_from_slice(&self.timestamp);
        out[DATA_OFF..RECORD_PAYLOAD_LEN].copy_from_slice(&self.message_data);
        out[RECORD_PAYLOAD_LEN..].fill(0);
    }

    pub fn encode(&self) -> [u8; RECORD_WIRE_LEN] {
        let mut out = [0u8; RECORD_WIRE_LEN];
        self.encode_into(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        check_len(bytes, RECORD_PAYLOAD_LEN)?;
        let mut pid = [0u8; PROCESS_ID_LEN];
        pid.copy_from_slice(&bytes[PID_OFF..TIME_OFF]);
        let mut timestamp = [0u8; TIMESTAMP_LEN];
        timestamp.copy_from_slice(&bytes[TIME_OFF..DATA_OFF]);
        let mut message_data = [0u8; MESSAGE_DATA_LEN];
        message_data.copy_from_slice(&bytes[DATA_OFF..RECORD_PAYLOAD_LEN]);
        Ok(Self { process_id: u64::from_le_bytes(pid), timestamp, message_data })
    }
}

impl core::fmt::Debug for NotificationRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotificationRecord")
            .field("process_id", &self.process_id)
            .field("timestamp", &self.timestamp_str())
            .field("message_data", &self.message_str())
            .finish()
    }
}

/*────────────────────────── header ──────────────────────────*/

/// Transport-owned correlation header. Filter and dispatcher only pass it
/// through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub reply_length: u32,
    pub message_id: u64,
}

impl MessageHeader {
    pub fn encode_into(&self, out: &mut [u8]) {
        let out = &mut out[..HEADER_WIRE_LEN];
        out.fill(0);
        out[REPLY_LEN_OFF..REPLY_LEN_OFF + 4].copy_from_slice(&self.reply_length.to_le_bytes());
        out[MSG_ID_OFF..MSG_ID_OFF + 8].copy_from_slice(&self.message_id.to_le_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        check_len(bytes, HEADER_WIRE_LEN)?;
        let mut reply = [0u8; 4];
        reply.copy_from_slice(&bytes[REPLY_LEN_OFF..REPLY_LEN_OFF + 4]);
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[MSG_ID_OFF..MSG_ID_OFF + 8]);
        Ok(Self {
            reply_length: u32::from_le_bytes(reply),
            message_id: u64::from_le_bytes(id),
        })
    }
}

/*───────────────────────── envelope ─────────────────────────*/

/// Header followed by exactly one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub header: MessageHeader,
    pub record: NotificationRecord,
}

impl MessageEnvelope {
    pub fn encode_into(&self, out: &mut [u8; ENVELOPE_WIRE_LEN]) {
        let (head, body) = out.split_at_mut(HEADER_WIRE_LEN);
        self.header.encode_into(head);
        self.record.encode_into(body);
    }

    pub fn encode(&self) -> [u8; ENVELOPE_WIRE_LEN] {
        let mut out = [0u8; ENVELOPE_WIRE_LEN];
        self.encode_into(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        check_len(bytes, ENVELOPE_MIN_LEN)?;
        Ok(Self {
            header: MessageHeader::decode(&bytes[..HEADER_WIRE_LEN])?,
            record: NotificationRecord::decode(&bytes[HEADER_WIRE_LEN..])?,
        })
    }
}
