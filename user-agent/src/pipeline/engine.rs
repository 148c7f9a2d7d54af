//! Worker pool draining the completion queue.
//!
//! Startup seeds `requests_per_thread` receives per worker before any worker
//! runs, so the queue has capacity from the first completion on. Each worker
//! then loops: wait, log the record, resubmit the same slot. A completion
//! goes to whichever worker is idle; only the per-slot order is preserved.
//!
//! A worker ends on the first failure and is not restarted. "Disconnected"
//! is the normal way out (filter unloaded or port closed); anything else is
//! reported as a failure once all workers have joined.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use log::Level;
use shared::MessageEnvelope;

use crate::comms::{Completion, CompletionError, CompletionQueue, MessagePort, ReceiveError, Rejected};
use crate::error::{ExitStatus, StartupError};
use crate::logger_log;
use crate::pipeline::slots::{ReceiveSlotPool, SlotLease};
use crate::sink::LogSink;

/// How a worker left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The port went away; expected shutdown.
    Disconnected,
    /// Unclassified wait or resubmission error.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineReport {
    pub workers: Vec<WorkerExit>,
}

impl EngineReport {
    pub fn status(&self) -> ExitStatus {
        if self.workers.iter().any(|w| *w == WorkerExit::Failed) {
            ExitStatus::ReceiveFailed
        } else {
            ExitStatus::Success
        }
    }
}

pub struct DispatchEngine<P> {
    port: Arc<P>,
    pool: Arc<ReceiveSlotPool>,
    workers: Vec<JoinHandle<WorkerExit>>,
}

impl<P: MessagePort + 'static> DispatchEngine<P> {
    /// Allocate the slots, seed every receive, then spawn the workers.
    ///
    /// On failure everything already created is torn down: the port is
    /// closed (failing any seeded receive) and spawned workers are joined.
    pub fn start<Q, S>(
        port: P,
        queue: Q,
        sink: Arc<S>,
        thread_count: u32,
        requests_per_thread: u32,
    ) -> Result<Self, StartupError>
    where
        Q: CompletionQueue + 'static,
        S: LogSink + ?Sized + 'static,
    {
        let port = Arc::new(port);
        let queue = Arc::new(queue);

        /* 1 ▸ slots */
        let sets = ReceiveSlotPool::acquire_initial_slots(thread_count, requests_per_thread)?;
        let pool = sets.pool;

        /* 2 ▸ seed */
        for (index, mut slot) in sets.per_worker.into_iter().flatten().enumerate() {
            slot.prepare_for_receive();
            if let Err(Rejected { mut slot, error }) = port.begin_receive(slot) {
                slot.mark_idle();
                port.close();
                return Err(StartupError::Seed { index, source: error });
            }
        }
        logger_log!(Level::Debug, "engine", "{} receive(s) outstanding", pool.outstanding());

        /* 3 ▸ workers */
        let mut workers = Vec::with_capacity(thread_count as usize);
        for index in 0..thread_count as usize {
            let (p, q, s) = (Arc::clone(&port), Arc::clone(&queue), Arc::clone(&sink));
            let spawned = thread::Builder::new()
                .name(format!("logger-worker-{index}"))
                .spawn(move || run_worker(index, &*p, &*q, &*s));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    logger_log!(Level::Error, "engine", "couldn't create thread {}: {}", index, source);
                    port.close();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(StartupError::ThreadSpawn { index, source });
                }
            }
        }

        Ok(Self { port, pool, workers })
    }

    pub fn port(&self) -> &Arc<P> {
        &self.port
    }

    pub fn pool(&self) -> &Arc<ReceiveSlotPool> {
        &self.pool
    }

    /// Wait for every worker to end.
    pub fn join(self) -> EngineReport {
        let workers = self
            .workers
            .into_iter()
            .map(|h| h.join().unwrap_or(WorkerExit::Failed))
            .collect();
        EngineReport { workers }
    }
}

/*────────────────────────── worker ──────────────────────────*/

fn run_worker<P, Q, S>(id: usize, port: &P, queue: &Q, sink: &S) -> WorkerExit
where
    P: MessagePort + ?Sized,
    Q: CompletionQueue + ?Sized,
    S: LogSink + ?Sized,
{
    logger_log!(Level::Debug, "engine:worker", "worker {} waiting", id);
    loop {
        let Completion { mut slot, bytes_transferred } = match queue.wait() {
            Ok(completion) => completion,
            Err(CompletionError::Disconnected) => {
                logger_log!(
                    Level::Info,
                    "engine:worker",
                    "Port is disconnected, probably due to LoggerFilter unloading."
                );
                return WorkerExit::Disconnected;
            }
            Err(e) => {
                logger_log!(Level::Error, "engine:worker", "Unknown error occured. {}", e);
                return WorkerExit::Failed;
            }
        };

        slot.mark_completed(bytes_transferred);
        deliver(&slot, sink);

        slot.prepare_for_receive();
        if let Err(Rejected { mut slot, error }) = port.begin_receive(slot) {
            slot.mark_idle();
            return match error {
                ReceiveError::Disconnected => {
                    logger_log!(
                        Level::Info,
                        "engine:worker",
                        "Port is disconnected, probably due to LoggerFilter unloading."
                    );
                    WorkerExit::Disconnected
                }
                ReceiveError::Os(e) => {
                    logger_log!(Level::Error, "engine:worker", "Unknown error occured. {}", e);
                    WorkerExit::Failed
                }
            };
        }
    }
}

/// Decode the completed envelope and hand it to the sink. Malformed
/// messages and sink failures are logged and skipped.
fn deliver<S: LogSink + ?Sized>(slot: &SlotLease, sink: &S) {
    let envelope = match MessageEnvelope::decode(slot.received()) {
        Ok(envelope) => envelope,
        Err(e) => {
            logger_log!(Level::Warn, "engine:worker", "dropping malformed message: {}", e);
            return;
        }
    };
    let record = envelope.record;
    let time = match record.timestamp_str() {
        Ok(time) => time,
        Err(e) => {
            logger_log!(Level::Warn, "engine:worker", "dropping message from pid {}: {}", record.process_id, e);
            return;
        }
    };

    println!(
        "Received message, size {}, ProcessId {}",
        slot.bytes_transferred(),
        record.process_id
    );
    println!("time: {time}");

    if let Err(e) = sink.record(record.process_id, time) {
        logger_log!(Level::Error, "sink", "{}", e);
    }
}
