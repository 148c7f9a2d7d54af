//! Kernel-to-user delivery of file-open notifications.
//!
//! Packages a [`NotificationRecord`] into the fixed 304-byte envelope and
//! hands it to the port. Delivery is best-effort: the outcome is traced and
//! returned, never escalated into the I/O path.

use log::debug;
use shared::wire::{ENVELOPE_WIRE_LEN, MessageEnvelope, MessageHeader};
use shared::NotificationRecord;

use crate::communications::{ClientChannel, FilterPort};
use crate::consts::NTSTATUS;

/// Build the on-wire envelope. No reply is expected, so `reply_length` is 0.
pub fn package(message_id: u64, record: &NotificationRecord) -> [u8; ENVELOPE_WIRE_LEN] {
    MessageEnvelope {
        header: MessageHeader { reply_length: 0, message_id },
        record: *record,
    }
    .encode()
}

/// Send one record to user mode and trace the outcome.
pub fn send_to_user_mode<C: ClientChannel>(
    port: &FilterPort<C>,
    record: &NotificationRecord,
) -> Result<(), NTSTATUS> {
    let result = port.send(record);
    match result {
        Ok(()) => debug!("[LoggerFilter] sent message to user-mode"),
        Err(status) => debug!(
            "[LoggerFilter] couldn't send message to user-mode, status {:#010X}",
            status as u32
        ),
    }
    result
}
