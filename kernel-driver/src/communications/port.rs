//! Server port and the single client connection it admits.
//!
//! Key responsibilities:
//! - Accept at most one consumer; reject a second connect outright.
//! - Clear the consumer identity and channel together on disconnect.
//! - Stamp each outgoing envelope with a fresh message id and post it
//!   fire-and-forget; with nobody connected, drop it.
//! - Refuse new connections once the port is closed (filter unload).

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::debug;
use shared::NotificationRecord;
use spin::Mutex;

use crate::consts::{
    NTSTATUS, STATUS_CONNECTION_COUNT_LIMIT, STATUS_FLT_DELETING_OBJECT, STATUS_PORT_DISCONNECTED,
};
use crate::minifilter::sendmsg;

/// The per-connection delivery primitive the Filter Manager hands us
/// (`PFLT_PORT` + `FltSendMessage` with a zero timeout).
pub trait ClientChannel: Send + Sync {
    /// One-shot, non-blocking delivery of a complete envelope.
    fn post(&self, envelope: &[u8]) -> Result<(), NTSTATUS>;

    /// Tear the channel down from the producer side. Every receive still
    /// pending on the consumer side completes with "disconnected".
    fn close(&self);
}

/// Opaque token returned by [`FilterPort::connect`]; identifies the
/// connection in the disconnect notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionCookie(u64);

/// Singleton connection state: channel handle plus consumer identity.
struct TransportConnection<C> {
    client: Arc<C>,
    consumer: u64,
    cookie: ConnectionCookie,
}

pub struct FilterPort<C> {
    name: &'static str,
    connection: Mutex<Option<TransportConnection<C>>>,
    accepting: AtomicBool,
    next_cookie: AtomicU64,
    next_message_id: AtomicU64,
}

impl<C: ClientChannel> FilterPort<C> {
    /// Create the server port (`FltCreateCommunicationPort`, max 1 connection).
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            connection: Mutex::new(None),
            accepting: AtomicBool::new(true),
            next_cookie: AtomicU64::new(1),
            next_message_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Connect notification. `consumer_pid` is the connecting process.
    pub fn connect(&self, client: C, consumer_pid: u64) -> Result<ConnectionCookie, NTSTATUS> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(STATUS_FLT_DELETING_OBJECT);
        }

        let mut slot = self.connection.lock();
        // `close` flips the flag under this lock; a connect that raced it
        // must not install a client after the port was emptied.
        if !self.accepting.load(Ordering::Acquire) {
            return Err(STATUS_FLT_DELETING_OBJECT);
        }
        if let Some(active) = slot.as_ref() {
            debug!(
                "[LoggerFilter] {}: connect from pid {} refused, pid {} already connected",
                self.name, consumer_pid, active.consumer
            );
            return Err(STATUS_CONNECTION_COUNT_LIMIT);
        }

        let cookie = ConnectionCookie(self.next_cookie.fetch_add(1, Ordering::Relaxed));
        *slot = Some(TransportConnection { client: Arc::new(client), consumer: consumer_pid, cookie });
        debug!("[LoggerFilter] {}: connected, consumer pid {}", self.name, consumer_pid);
        Ok(cookie)
    }

    /// Drop the active connection, if any. Returns whether there was one;
    /// calling it again is a no-op.
    pub fn disconnect(&self) -> bool {
        let taken = self.connection.lock().take();
        self.finish_disconnect(taken)
    }

    /// Disconnect notification for a specific connection. Stale cookies
    /// (a connection that is already gone) are ignored.
    pub fn disconnect_connection(&self, cookie: ConnectionCookie) -> bool {
        let taken = {
            let mut slot = self.connection.lock();
            match slot.as_ref() {
                Some(active) if active.cookie == cookie => slot.take(),
                _ => None,
            }
        };
        self.finish_disconnect(taken)
    }

    // The channel is closed outside the lock; `close` may wake consumer threads.
    fn finish_disconnect(&self, taken: Option<TransportConnection<C>>) -> bool {
        match taken {
            Some(conn) => {
                conn.client.close();
                debug!("[LoggerFilter] {}: disconnected pid {}", self.name, conn.consumer);
                true
            }
            None => false,
        }
    }

    /// Server shutdown (`FltCloseCommunicationPort` on unload).
    pub fn close(&self) {
        let taken = {
            let mut slot = self.connection.lock();
            self.accepting.store(false, Ordering::Release);
            slot.take()
        };
        self.finish_disconnect(taken);
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    /// Process id of the connected consumer.
    pub fn connected_consumer(&self) -> Option<u64> {
        self.connection.lock().as_ref().map(|c| c.consumer)
    }

    /// Package `record` and post it to the connected consumer.
    ///
    /// Never blocks waiting for the consumer. Without a connection the
    /// record is dropped and `STATUS_PORT_DISCONNECTED` is returned.
    pub fn send(&self, record: &NotificationRecord) -> Result<(), NTSTATUS> {
        let client = match self.connection.lock().as_ref() {
            Some(conn) => Arc::clone(&conn.client),
            None => return Err(STATUS_PORT_DISCONNECTED),
        };
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let envelope = sendmsg::package(id, record);
        client.post(&envelope)
    }
}
