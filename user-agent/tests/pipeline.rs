//! End-to-end runs of the consumer against an in-process LoggerFilter.
//!
//! The filter, its port and the loopback channel all live in the test
//! process; opens are simulated by calling `pre_create` directly.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::{self, Receiver, Sender};
use logger_filter::consts::{NTSTATUS, STATUS_CONNECTION_COUNT_LIMIT};
use logger_filter::{LocalClock, LoggerFilter, PreCreateOperation};
use shared::constants::TARGET_FILE_PATH;
use shared::TimeFields;
use user_logger::app::{self, Settings};
use user_logger::comms::loopback::{LoopbackClient, LoopbackPort, LoopbackProvider, LoopbackQueue};
use user_logger::comms::{ChannelError, ChannelProvider, MessagePort};
use user_logger::pipeline::{DispatchEngine, EngineReport, WorkerExit};
use user_logger::sink::{LogSink, ProcessLogFile, SinkError};
use user_logger::ExitStatus;

const CONSUMER_PID: u64 = 500;
const TIMEOUT: Duration = Duration::from_secs(5);

/*────────────────── fixtures ─────────────────*/

struct Open {
    pid: u64,
    path: &'static str,
}

impl PreCreateOperation for Open {
    fn requestor_process_id(&self) -> u64 {
        self.pid
    }
    fn normalized_name(&self) -> Result<String, NTSTATUS> {
        Ok(self.path.to_owned())
    }
}

fn open_target(pid: u64) -> Open {
    Open { pid, path: TARGET_FILE_PATH }
}

struct FixedClock;

impl LocalClock for FixedClock {
    fn local_time(&self) -> TimeFields {
        TimeFields { year: 2024, month: 2, day: 29, hour: 23, minute: 59, second: 58 }
    }
}

type Filter = LoggerFilter<LoopbackClient, FixedClock>;

fn filter() -> Filter {
    LoggerFilter::with_defaults(FixedClock)
}

fn provider(f: &Filter) -> LoopbackProvider {
    LoopbackProvider::new(Arc::clone(f.port()), CONSUMER_PID)
}

/// Forwards every record to a channel, optionally writing it to a file first.
struct NotifyingSink {
    file: Option<ProcessLogFile>,
    tx: Sender<(u64, String)>,
}

impl LogSink for NotifyingSink {
    fn record(&self, process_id: u64, timestamp: &str) -> Result<(), SinkError> {
        let result = match &self.file {
            Some(file) => file.record(process_id, timestamp),
            None => Ok(()),
        };
        let _ = self.tx.send((process_id, timestamp.to_owned()));
        result
    }
}

fn sink() -> (Arc<NotifyingSink>, Receiver<(u64, String)>) {
    let (tx, rx) = channel::unbounded();
    (Arc::new(NotifyingSink { file: None, tx }), rx)
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

fn start(
    settings: &Settings,
    provider: &mut LoopbackProvider,
    sink: Arc<NotifyingSink>,
) -> DispatchEngine<LoopbackPort> {
    app::start(settings, provider, sink).expect("pipeline starts")
}

/*────────────────── scenarios ─────────────────*/

#[test]
fn one_worker_one_request_logs_until_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let log_path: PathBuf = dir.path().join("process_log.txt");
    let (tx, rx) = channel::unbounded();
    let sink = Arc::new(NotifyingSink { file: Some(ProcessLogFile::new(&log_path)), tx });

    let f = filter();
    let mut p = provider(&f);
    let engine = app::start(&Settings::new(1, 1), &mut p, sink).unwrap();
    assert_eq!(f.port().connected_consumer(), Some(CONSUMER_PID));

    f.pre_create(&open_target(1234));
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), (1234, "2024-02-29 23:59:58".to_owned()));
    wait_until("resubmission", || engine.pool().outstanding() == 1);

    f.port().disconnect();
    let report = engine.join();
    assert_eq!(report.workers, vec![WorkerExit::Disconnected]);
    assert_eq!(report.status(), ExitStatus::Success);

    f.pre_create(&open_target(1234));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    let text = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(text, " Process ID: 1234, open at : 2024-02-29 23:59:58\n");
}

#[test]
fn queue_depth_is_restored_after_every_batch() {
    let (sink, rx) = sink();
    let f = filter();
    let mut p = provider(&f);
    let engine = start(&Settings::new(3, 2), &mut p, sink);

    assert_eq!(engine.pool().len(), 6);
    assert_eq!(engine.pool().outstanding(), 6);
    assert_eq!(engine.port().pending(), 6);

    for round in 0..3u64 {
        for i in 0..10 {
            f.pre_create(&open_target(1000 + round * 10 + i));
        }
        let mut pids: Vec<u64> = (0..10).map(|_| rx.recv_timeout(TIMEOUT).unwrap().0).collect();
        pids.sort_unstable();
        assert_eq!(pids, (1000 + round * 10..1010 + round * 10).collect::<Vec<_>>());
        wait_until("steady-state depth", || engine.port().pending() == 6);
        assert_eq!(engine.pool().outstanding(), 6);
    }

    let pool = Arc::clone(engine.pool());
    f.unload();
    let report = engine.join();
    assert_eq!(report.workers, vec![WorkerExit::Disconnected; 2]);
    assert_eq!(report.status(), ExitStatus::Success);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn second_consumer_is_rejected_and_first_keeps_working() {
    let (sink_a, rx_a) = sink();
    let f = filter();
    let mut first = provider(&f);
    let engine = start(&Settings::new(2, 1), &mut first, sink_a);

    let mut second = LoopbackProvider::new(Arc::clone(f.port()), 600);
    match second.connect(r"\LOGGERPort") {
        Err(ChannelError::Refused(status)) => assert_eq!(status, STATUS_CONNECTION_COUNT_LIMIT as u32),
        other => panic!("second connect should be refused, got {:?}", other.map(|_| ())),
    }
    let (sink_b, rx_b) = sink();
    assert_eq!(app::run(&Settings::new(2, 1), &mut second, sink_b), ExitStatus::Connect);

    assert_eq!(f.port().connected_consumer(), Some(CONSUMER_PID));
    f.pre_create(&open_target(42));
    assert_eq!(rx_a.recv_timeout(TIMEOUT).unwrap().0, 42);
    assert!(rx_b.try_recv().is_err());

    f.port().disconnect();
    assert_eq!(engine.join().status(), ExitStatus::Success);
}

#[test]
fn pid_and_timestamp_survive_the_trip() {
    let (sink, rx) = sink();
    let f = filter();
    let mut p = provider(&f);
    let engine = start(&Settings::new(1, 2), &mut p, sink);

    for pid in [1, 0xFFFF_FFFF, u64::MAX] {
        f.pre_create(&open_target(pid));
        let (got, time) = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(got, pid);
        assert_eq!(time, "2024-02-29 23:59:58");
    }

    f.port().disconnect();
    engine.join();
}

#[test]
fn non_target_opens_are_never_logged() {
    let (sink, rx) = sink();
    let f = filter();
    let mut p = provider(&f);
    let engine = start(&Settings::new(1, 1), &mut p, sink);

    f.pre_create(&Open { pid: 7, path: r"\Device\HarddiskVolume3\Temp\file.txt.tmp" });
    f.pre_create(&Open { pid: 7, path: r"\Device\HarddiskVolume3\Temp\other.txt" });
    f.pre_create(&Open { pid: 7, path: r"\DEVICE\HARDDISKVOLUME3\TEMP\FILE.TXT" });

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().0, 7);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    f.port().disconnect();
    engine.join();
}

#[test]
fn consumer_side_close_ends_workers_and_frees_the_port() {
    let (sink, _rx) = sink();
    let f = filter();
    let mut p = provider(&f);
    let engine = start(&Settings::new(2, 3), &mut p, sink);

    engine.port().close();
    assert!(!f.port().is_connected());
    assert_eq!(engine.join().workers, vec![WorkerExit::Disconnected; 3]);

    // The port is free again for the next consumer.
    let mut again = provider(&f);
    assert!(again.connect(r"\LOGGERPort").is_ok());
}

#[test]
fn sink_failures_do_not_stop_the_worker() {
    struct Flaky {
        calls: AtomicUsize,
        tx: Sender<u64>,
    }
    impl LogSink for Flaky {
        fn record(&self, process_id: u64, _timestamp: &str) -> Result<(), SinkError> {
            let _ = self.tx.send(process_id);
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(SinkError::Open {
                    path: PathBuf::from("process_log.txt"),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            Ok(())
        }
    }

    let (tx, rx) = channel::unbounded();
    let f = filter();
    let mut p = provider(&f);
    let engine = app::start(&Settings::new(1, 1), &mut p, Arc::new(Flaky { calls: AtomicUsize::new(0), tx }))
        .unwrap();

    f.pre_create(&open_target(1));
    f.pre_create(&open_target(2));
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 1);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 2);

    f.port().disconnect();
    assert_eq!(engine.join().status(), ExitStatus::Success);
}

/*────────────────── startup failures ─────────────────*/

/// Wraps the loopback provider and records what startup asked for.
struct Probe {
    inner: LoopbackProvider,
    connects: Arc<AtomicUsize>,
    fail_queue: bool,
}

impl ChannelProvider for Probe {
    type Port = LoopbackPort;
    type Queue = LoopbackQueue;

    fn connect(&mut self, port_name: &str) -> Result<LoopbackPort, ChannelError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.inner.connect(port_name)
    }

    fn create_completion_queue(
        &mut self,
        port: &LoopbackPort,
        concurrency: u32,
    ) -> Result<LoopbackQueue, ChannelError> {
        if self.fail_queue {
            return Err(ChannelError::Os(std::io::Error::from(std::io::ErrorKind::OutOfMemory)));
        }
        self.inner.create_completion_queue(port, concurrency)
    }
}

fn probe(f: &Filter, fail_queue: bool) -> (Probe, Arc<AtomicUsize>) {
    let connects = Arc::new(AtomicUsize::new(0));
    (Probe { inner: provider(f), connects: Arc::clone(&connects), fail_queue }, connects)
}

#[test]
fn bad_thread_count_creates_nothing() {
    let f = filter();
    for threads in [0, 65] {
        let (mut p, connects) = probe(&f, false);
        let (sink, _rx) = sink();
        assert_eq!(app::run(&Settings::new(5, threads), &mut p, sink), ExitStatus::Usage);
        assert_eq!(connects.load(Ordering::SeqCst), 0);
        assert!(!f.port().is_connected());
    }

    for args in [["user-logger", "5", "0"], ["user-logger", "5", "65"]] {
        assert!(matches!(
            user_logger::cli::parse(args),
            user_logger::cli::ParseOutcome::Exit(ExitStatus::Usage)
        ));
    }
}

#[test]
fn unknown_port_is_a_connect_failure() {
    let f = filter();
    let (mut p, _) = probe(&f, false);
    let (sink, _rx) = sink();
    let mut settings = Settings::new(1, 1);
    settings.port_name = r"\NoSuchPort".into();
    assert_eq!(app::run(&settings, &mut p, sink), ExitStatus::Connect);
}

#[test]
fn completion_queue_failure_closes_the_port() {
    let f = filter();
    let (mut p, connects) = probe(&f, true);
    let (sink, _rx) = sink();
    assert_eq!(app::run(&Settings::new(1, 1), &mut p, sink), ExitStatus::CompletionQueue);
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert!(!f.port().is_connected());
}

#[test]
fn unallocatable_pool_is_out_of_memory() {
    let f = filter();
    let mut p = provider(&f);
    let port = p.connect(r"\LOGGERPort").unwrap();
    let queue = p.create_completion_queue(&port, 1).unwrap();
    let (sink, _rx) = sink();

    let err = DispatchEngine::start(port, queue, sink, u32::MAX, u32::MAX).err().expect("allocation fails");
    assert_eq!(err.exit_status(), ExitStatus::OutOfMemory);
    assert!(!f.port().is_connected());
}

/*────────────────── worker failures ─────────────────*/

mod scripted {
    //! A port/queue pair whose failures are chosen by the test.

    use super::*;
    use user_logger::comms::{
        Completion, CompletionError, CompletionQueue, MessagePort, ReceiveError, Rejected,
    };
    use shared::wire::{MessageEnvelope, MessageHeader, NotificationRecord, ENVELOPE_WIRE_LEN};
    use user_logger::pipeline::SlotLease;

    #[derive(Default)]
    pub struct Script {
        pub reject_after: Option<usize>,
        /// Rejections report "disconnected" instead of an OS error.
        pub reject_disconnected: bool,
        pub wait_error: bool,
        /// The first wait completes one parked receive with this pid.
        pub complete_once: Option<u64>,
        pub accepted: AtomicUsize,
        pub closed: AtomicBool,
        pub parked: Mutex<Vec<SlotLease>>,
    }

    pub struct Port(pub Arc<Script>);
    pub struct Queue(pub Arc<Script>);

    impl MessagePort for Port {
        fn begin_receive(&self, slot: SlotLease) -> Result<(), Rejected> {
            let n = self.0.accepted.fetch_add(1, Ordering::SeqCst);
            if self.0.reject_after.is_some_and(|limit| n >= limit) {
                let error = if self.0.reject_disconnected {
                    ReceiveError::Disconnected
                } else {
                    ReceiveError::Os(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
                };
                return Err(Rejected { slot, error });
            }
            self.0.parked.lock().unwrap().push(slot);
            Ok(())
        }
        fn close(&self) {
            self.0.closed.store(true, Ordering::SeqCst);
        }
        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    impl CompletionQueue for Queue {
        fn wait(&self) -> Result<Completion, CompletionError> {
            if let Some(pid) = self.0.complete_once {
                if let Some(mut slot) = self.0.parked.lock().unwrap().pop() {
                    let envelope = MessageEnvelope {
                        header: MessageHeader { reply_length: 0, message_id: 1 },
                        record: NotificationRecord::new(pid, *b"2024-05-06 07:08:09\0", "File accessed"),
                    };
                    envelope.encode_into(
                        (&mut slot.envelope_bytes_mut()[..ENVELOPE_WIRE_LEN]).try_into().unwrap(),
                    );
                    return Ok(Completion { slot, bytes_transferred: ENVELOPE_WIRE_LEN as u32 });
                }
            }
            if self.0.wait_error {
                return Err(CompletionError::Os(std::io::Error::from(std::io::ErrorKind::Other)));
            }
            Err(CompletionError::Disconnected)
        }
        fn describe(&self) -> String {
            "scripted-cq".into()
        }
    }

    pub struct Provider(pub Arc<Script>);

    impl ChannelProvider for Provider {
        type Port = Port;
        type Queue = Queue;

        fn connect(&mut self, _port_name: &str) -> Result<Port, ChannelError> {
            Ok(Port(Arc::clone(&self.0)))
        }
        fn create_completion_queue(&mut self, _port: &Port, _n: u32) -> Result<Queue, ChannelError> {
            Ok(Queue(Arc::clone(&self.0)))
        }
    }
}

#[test]
fn unexpected_wait_error_is_a_receive_failure() {
    let script = Arc::new(scripted::Script { wait_error: true, ..Default::default() });
    let (sink, _rx) = sink();
    let status = app::run(&Settings::new(2, 2), &mut scripted::Provider(Arc::clone(&script)), sink);
    assert_eq!(status, ExitStatus::ReceiveFailed);
    assert_eq!(script.parked.lock().unwrap().len(), 4);
}

#[test]
fn failed_seeding_closes_the_port() {
    let script = Arc::new(scripted::Script { reject_after: Some(3), ..Default::default() });
    let (sink, _rx) = sink();
    let status = app::run(&Settings::new(2, 2), &mut scripted::Provider(Arc::clone(&script)), sink);
    assert_eq!(status, ExitStatus::ReceiveFailed);
    assert!(script.closed.load(Ordering::SeqCst));
    assert_eq!(script.accepted.load(Ordering::SeqCst), 4);
}

#[test]
fn disconnect_during_wait_is_a_clean_exit() {
    let script = Arc::new(scripted::Script::default());
    let (sink, _rx) = sink();
    let status = app::run(&Settings::new(1, 3), &mut scripted::Provider(script), sink);
    assert_eq!(status, ExitStatus::Success);
}

/// One worker, one slot: a single completion arrives, then the resubmission
/// of that slot is rejected.
fn run_one_completion_then_reject(disconnected: bool) -> (EngineReport, Vec<(u64, String)>) {
    let script = Arc::new(scripted::Script {
        reject_after: Some(1),
        reject_disconnected: disconnected,
        complete_once: Some(4321),
        ..Default::default()
    });
    let (sink, rx) = sink();
    let engine = DispatchEngine::start(
        scripted::Port(Arc::clone(&script)),
        scripted::Queue(Arc::clone(&script)),
        sink,
        1,
        1,
    )
    .unwrap();
    let report = engine.join();
    assert_eq!(script.accepted.load(Ordering::SeqCst), 2, "seed plus one resubmission");
    (report, rx.try_iter().collect())
}

#[test]
fn failed_resubmission_ends_the_worker_as_a_failure() {
    let (report, logged) = run_one_completion_then_reject(false);
    assert_eq!(logged, vec![(4321, "2024-05-06 07:08:09".to_owned())]);
    assert_eq!(report.workers, vec![WorkerExit::Failed]);
    assert_eq!(report.status(), ExitStatus::ReceiveFailed);
}

#[test]
fn resubmission_after_disconnect_is_a_clean_exit() {
    let (report, logged) = run_one_completion_then_reject(true);
    assert_eq!(logged, vec![(4321, "2024-05-06 07:08:09".to_owned())]);
    assert_eq!(report.workers, vec![WorkerExit::Disconnected]);
    assert_eq!(report.status(), ExitStatus::Success);
}
