//! In-process channel between a `FilterPort` and the receive pipeline.
//!
//! Plays the Filter Manager's part without a kernel: the producer posts
//! envelopes through [`LoopbackClient`], the consumer queues slots through
//! [`LoopbackPort`], and every match of envelope and slot is reported on a
//! crossbeam channel that backs [`LoopbackQueue`].
//!
//! Key responsibilities:
//! - Copy each posted envelope into the oldest pending slot.
//! - Hold envelopes in a bounded backlog while no slot is pending.
//! - On close, fail every pending receive with "disconnected" and reject
//!   later ones.

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{Datelike, Local, Timelike};
use crossbeam::channel::{self, Receiver, Sender};
use log::Level;
use logger_filter::consts::{
    NTSTATUS, STATUS_INSUFFICIENT_RESOURCES, STATUS_OBJECT_NAME_NOT_FOUND, STATUS_PORT_DISCONNECTED,
};
use logger_filter::{ClientChannel, ConnectionCookie, FilterPort, LocalClock};
use shared::TimeFields;

use crate::comms::{
    ChannelError, ChannelProvider, Completion, CompletionError, CompletionQueue, MessagePort,
    ReceiveError, Rejected,
};
use crate::logger_log;
use crate::pipeline::SlotLease;

/// Envelopes held while no receive is pending.
pub const DEFAULT_BACKLOG: usize = 1024;

type CompletionResult = Result<Completion, CompletionError>;

/*────────────────────────── channel ─────────────────────────*/

struct ChannelState {
    open: bool,
    pending: VecDeque<SlotLease>,
    backlog: VecDeque<Vec<u8>>,
}

struct LoopbackChannel {
    state: Mutex<ChannelState>,
    completions: Sender<CompletionResult>,
    backlog_limit: usize,
}

impl LoopbackChannel {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn complete(&self, mut slot: SlotLease, envelope: &[u8]) {
        let buf = slot.envelope_bytes_mut();
        let n = envelope.len().min(buf.len());
        buf[..n].copy_from_slice(&envelope[..n]);
        // A dropped receiver means nobody waits any more; nothing to report to.
        let _ = self.completions.send(Ok(Completion { slot, bytes_transferred: n as u32 }));
    }

    fn post(&self, envelope: &[u8]) -> Result<(), NTSTATUS> {
        let mut st = self.lock();
        if !st.open {
            return Err(STATUS_PORT_DISCONNECTED);
        }
        if let Some(slot) = st.pending.pop_front() {
            self.complete(slot, envelope);
            return Ok(());
        }
        if st.backlog.len() >= self.backlog_limit {
            return Err(STATUS_INSUFFICIENT_RESOURCES);
        }
        st.backlog.push_back(envelope.to_vec());
        Ok(())
    }

    fn receive(&self, slot: SlotLease) -> Result<(), Rejected> {
        let mut st = self.lock();
        if !st.open {
            return Err(Rejected { slot, error: ReceiveError::Disconnected });
        }
        match st.backlog.pop_front() {
            Some(envelope) => self.complete(slot, &envelope),
            None => st.pending.push_back(slot),
        }
        Ok(())
    }

    fn close(&self) {
        let mut st = self.lock();
        if !st.open {
            return;
        }
        st.open = false;
        st.backlog.clear();
        for mut slot in st.pending.drain(..) {
            slot.mark_idle();
            let _ = self.completions.send(Err(CompletionError::Disconnected));
        }
    }

    fn pending(&self) -> usize {
        self.lock().pending.len()
    }
}

/*────────────────────────── producer side ───────────────────*/

/// The client handle `FilterPort` posts to.
#[derive(Clone)]
pub struct LoopbackClient(Arc<LoopbackChannel>);

impl ClientChannel for LoopbackClient {
    fn post(&self, envelope: &[u8]) -> Result<(), NTSTATUS> {
        self.0.post(envelope)
    }

    fn close(&self) {
        self.0.close();
    }
}

/*────────────────────────── consumer side ───────────────────*/

pub struct LoopbackPort {
    channel: Arc<LoopbackChannel>,
    completions: Receiver<CompletionResult>,
    server: Arc<FilterPort<LoopbackClient>>,
    cookie: ConnectionCookie,
}

impl LoopbackPort {
    /// Receives currently queued and waiting for a post.
    pub fn pending(&self) -> usize {
        self.channel.pending()
    }
}

impl MessagePort for LoopbackPort {
    fn begin_receive(&self, slot: SlotLease) -> Result<(), Rejected> {
        self.channel.receive(slot)
    }

    fn close(&self) {
        self.server.disconnect_connection(self.cookie);
        // The server may already have dropped us; close our side regardless.
        self.channel.close();
    }

    fn describe(&self) -> String {
        format!("{}#{:?}", self.server.name(), self.cookie)
    }
}

impl Drop for LoopbackPort {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct LoopbackQueue {
    completions: Receiver<CompletionResult>,
    concurrency: u32,
}

impl CompletionQueue for LoopbackQueue {
    fn wait(&self) -> Result<Completion, CompletionError> {
        self.completions.recv().unwrap_or(Err(CompletionError::Disconnected))
    }

    fn describe(&self) -> String {
        format!("loopback-cq(concurrency={})", self.concurrency)
    }
}

/// Connects to an in-process `FilterPort` as consumer `consumer_pid`.
pub struct LoopbackProvider {
    server: Arc<FilterPort<LoopbackClient>>,
    consumer_pid: u64,
    backlog_limit: usize,
}

impl LoopbackProvider {
    pub fn new(server: Arc<FilterPort<LoopbackClient>>, consumer_pid: u64) -> Self {
        Self { server, consumer_pid, backlog_limit: DEFAULT_BACKLOG }
    }

    pub fn with_backlog(mut self, limit: usize) -> Self {
        self.backlog_limit = limit;
        self
    }
}

impl ChannelProvider for LoopbackProvider {
    type Port = LoopbackPort;
    type Queue = LoopbackQueue;

    fn connect(&mut self, port_name: &str) -> Result<LoopbackPort, ChannelError> {
        if !port_name.eq_ignore_ascii_case(self.server.name()) {
            return Err(ChannelError::Refused(STATUS_OBJECT_NAME_NOT_FOUND as u32));
        }

        let (tx, rx) = channel::unbounded();
        let channel = Arc::new(LoopbackChannel {
            state: Mutex::new(ChannelState {
                open: true,
                pending: VecDeque::new(),
                backlog: VecDeque::new(),
            }),
            completions: tx,
            backlog_limit: self.backlog_limit,
        });

        let cookie = self
            .server
            .connect(LoopbackClient(Arc::clone(&channel)), self.consumer_pid)
            .map_err(|status| ChannelError::Refused(status as u32))?;
        logger_log!(Level::Debug, "comms:loopback", "connected to {} as pid {}", port_name, self.consumer_pid);

        Ok(LoopbackPort { channel, completions: rx, server: Arc::clone(&self.server), cookie })
    }

    fn create_completion_queue(
        &mut self,
        port: &LoopbackPort,
        concurrency: u32,
    ) -> Result<LoopbackQueue, ChannelError> {
        if concurrency == 0 {
            return Err(ChannelError::Os(io::Error::from(io::ErrorKind::InvalidInput)));
        }
        Ok(LoopbackQueue { completions: port.completions.clone(), concurrency })
    }
}

/*────────────────────────── clock ───────────────────────────*/

/// Local wall-clock time for a filter hosted in user mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl LocalClock for SystemClock {
    fn local_time(&self) -> TimeFields {
        let now = Local::now();
        TimeFields {
            year: u16::try_from(now.year()).unwrap_or(0),
            month: now.month() as u8,
            day: now.day() as u8,
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            second: now.second() as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ReceiveSlotPool;
    use shared::{MessageEnvelope, NotificationRecord};

    fn setup(backlog: usize) -> (Arc<FilterPort<LoopbackClient>>, LoopbackPort, LoopbackQueue) {
        let server = Arc::new(FilterPort::new(r"\LOGGERPort"));
        let mut provider = LoopbackProvider::new(Arc::clone(&server), 77).with_backlog(backlog);
        let port = provider.connect(r"\LOGGERPort").unwrap();
        let queue = provider.create_completion_queue(&port, 1).unwrap();
        (server, port, queue)
    }

    fn record(pid: u64) -> NotificationRecord {
        NotificationRecord::new(pid, *b"2024-05-05 05:05:05\0", "File accessed")
    }

    #[test]
    fn post_fills_the_submitted_slot() {
        let (server, port, queue) = setup(4);
        let mut sets = ReceiveSlotPool::acquire_initial_slots(1, 1).unwrap();
        let mut slot = sets.per_worker[0].pop().unwrap();
        let key = slot.descriptor_key();
        slot.prepare_for_receive();
        port.begin_receive(slot).unwrap();

        server.send(&record(321)).unwrap();

        let done = queue.wait().unwrap();
        assert_eq!(done.slot.descriptor_key(), key);
        assert_eq!(done.bytes_transferred, 304);
        let env = MessageEnvelope::decode(done.slot.envelope_bytes()).unwrap();
        assert_eq!(env.record.process_id, 321);
    }

    #[test]
    fn backlog_is_bounded_and_drained_in_order() {
        let (server, port, queue) = setup(2);
        server.send(&record(1)).unwrap();
        server.send(&record(2)).unwrap();
        assert_eq!(server.send(&record(3)), Err(STATUS_INSUFFICIENT_RESOURCES));

        let mut sets = ReceiveSlotPool::acquire_initial_slots(1, 2).unwrap();
        for mut slot in sets.per_worker.pop().unwrap() {
            slot.prepare_for_receive();
            port.begin_receive(slot).unwrap();
        }
        let a = queue.wait().unwrap();
        let b = queue.wait().unwrap();
        let pid = |c: &Completion| MessageEnvelope::decode(c.slot.envelope_bytes()).unwrap().record.process_id;
        assert_eq!((pid(&a), pid(&b)), (1, 2));
    }

    #[test]
    fn server_disconnect_fails_pending_and_later_receives() {
        let (server, port, queue) = setup(4);
        let mut sets = ReceiveSlotPool::acquire_initial_slots(1, 2).unwrap();
        let mut first = sets.per_worker[0].pop().unwrap();
        first.prepare_for_receive();
        port.begin_receive(first).unwrap();
        assert_eq!(port.pending(), 1);

        assert!(server.disconnect());
        assert!(matches!(queue.wait(), Err(CompletionError::Disconnected)));
        assert_eq!(sets.pool.outstanding(), 0);

        let mut second = sets.per_worker[0].pop().unwrap();
        second.prepare_for_receive();
        let rejected = port.begin_receive(second).unwrap_err();
        assert!(matches!(rejected.error, ReceiveError::Disconnected));
    }

    #[test]
    fn consumer_close_releases_the_server() {
        let (server, port, _queue) = setup(4);
        assert_eq!(server.connected_consumer(), Some(77));
        port.close();
        port.close();
        assert!(!server.is_connected());
    }

    #[test]
    fn unknown_port_name_is_refused() {
        let server = Arc::new(FilterPort::new(r"\LOGGERPort"));
        let mut provider = LoopbackProvider::new(server, 1);
        assert!(matches!(provider.connect(r"\OtherPort"), Err(ChannelError::Refused(_))));
    }

    #[test]
    fn system_clock_formats_as_local_timestamp() {
        let stamp = shared::format_timestamp(&SystemClock.local_time());
        let text = std::str::from_utf8(&stamp[..19]).unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").is_ok(), "{text}");
        assert_eq!(stamp[19], 0);
    }
}
