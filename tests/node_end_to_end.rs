//! End-to-end tests: supervisor, retrieval and link running together on a
//! paused tokio clock.

use biosense_node::config::{SensorConfig, TimingConfig};
use biosense_node::events::{Event, EventSender};
use biosense_node::flash::RamFlash;
use biosense_node::sensor::mock::{MockAdc, MockLeads};
use biosense_node::sensor::{FixedClock, SampleProducer};
use biosense_node::transport::{spawn_rx_watcher, Link};
use biosense_node::{
    AppResult, FlashLog, LogHandle, LogStatus, Supervisor, SupervisorStats, Timestamp,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio::time::sleep;

const ECG_RECORD: &[u8] = b"\r$ec,1.233,4,10,0,0\n";

fn clock() -> FixedClock {
    FixedClock::new(Timestamp::new(4, 10, 0, 0).expect("valid timestamp"))
}

fn ecg_producer() -> SampleProducer {
    // 1531 * 3.3 / 4096 = 1.2335 V
    SampleProducer::new(clock(), &SensorConfig::default())
        .with_ecg(MockAdc::constant(1531), MockLeads::attached())
}

fn idle_producer() -> SampleProducer {
    SampleProducer::new(clock(), &SensorConfig::default())
}

fn log_with(records: usize) -> LogHandle<RamFlash> {
    let mut log =
        FlashLog::mount(RamFlash::new(8192, 1024, 4), 4096, 4096).expect("Failed to mount log");
    for _ in 0..records {
        log.append(ECG_RECORD).expect("append");
    }
    LogHandle::new(log)
}

struct Node {
    host: DuplexStream,
    events: EventSender,
    task: JoinHandle<AppResult<SupervisorStats>>,
}

impl Node {
    fn start(log: LogHandle<RamFlash>, producer: SampleProducer, link_buffer: usize) -> Self {
        let (host, node) = tokio::io::duplex(link_buffer);
        let link = Link::from_io(node);
        let supervisor = Supervisor::new(log, producer, link.writer, &TimingConfig::default());
        let events = supervisor.events();
        spawn_rx_watcher(link.reader, events.clone());
        let task = tokio::spawn(supervisor.run());
        Self { host, events, task }
    }

    async fn stop(self) -> SupervisorStats {
        self.events.post(Event::Shutdown);
        self.task
            .await
            .expect("supervisor task panicked")
            .expect("supervisor failed")
    }
}

async fn wait_for(log: &LogHandle<RamFlash>, status: LogStatus) {
    while log.status() != status {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn retrieval_sends_every_record_then_cleanup_erases() {
    let log = log_with(3);
    let mut node = Node::start(log.clone(), idle_producer(), 4096);

    node.host.write_all(b"?").await.expect("request");
    let mut received = vec![0u8; 3 * ECG_RECORD.len()];
    node.host.read_exact(&mut received).await.expect("records");
    assert_eq!(received, ECG_RECORD.repeat(3));

    wait_for(&log, LogStatus::ReadDone).await;
    // the first cleanup tick fires at 1000 ms
    sleep(Duration::from_millis(1010)).await;
    assert_eq!(log.status(), LogStatus::Idle);
    assert!(log.snapshot().is_empty());

    let stats = node.stop().await;
    assert_eq!(stats.retrievals_completed, 1);
    assert_eq!(stats.cleanups, 1);
}

#[tokio::test(start_paused = true)]
async fn sample_after_completed_read_is_not_erased_unsent() {
    let log = log_with(2);
    let mut node = Node::start(log.clone(), ecg_producer(), 4096);

    node.host.write_all(b"?").await.expect("request");
    let mut received = vec![0u8; 2 * ECG_RECORD.len()];
    node.host.read_exact(&mut received).await.expect("records");
    wait_for(&log, LogStatus::ReadDone).await;

    // the 200 ms sample services the pending clean before appending
    sleep(Duration::from_millis(250)).await;
    assert_eq!(log.status(), LogStatus::Idle);
    let tokens: Vec<Vec<u8>> = log.snapshot().records().map(<[u8]>::to_vec).collect();
    assert_eq!(tokens, vec![ECG_RECORD.to_vec()]);

    let stats = node.stop().await;
    assert_eq!(stats.cleanups, 1);
    assert_eq!(stats.records_appended, 1);
}

#[tokio::test(start_paused = true)]
async fn request_while_read_done_is_ignored() {
    let log = log_with(1);
    let mut node = Node::start(log.clone(), idle_producer(), 4096);

    node.host.write_all(b"?").await.expect("request");
    let mut received = vec![0u8; ECG_RECORD.len()];
    node.host.read_exact(&mut received).await.expect("record");
    wait_for(&log, LogStatus::ReadDone).await;

    node.host.write_all(b"?").await.expect("second request");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(log.status(), LogStatus::ReadDone);

    let stats = node.stop().await;
    assert_eq!(stats.retrievals_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn append_halts_stalled_retrieval_before_writing() {
    let log = log_with(50);
    // the host never reads: the link blocks after a few records
    let mut node = Node::start(log.clone(), ecg_producer(), 64);

    node.host.write_all(b"?").await.expect("request");
    wait_for(&log, LogStatus::Reading).await;

    sleep(Duration::from_millis(210)).await;
    assert_eq!(log.status(), LogStatus::Idle);
    assert_eq!(log.snapshot().records().count(), 51);

    let stats = node.stop().await;
    assert_eq!(stats.retrievals_halted, 1);
    assert_eq!(stats.retrievals_completed, 0);
    assert_eq!(stats.records_appended, 1);
}

#[tokio::test(start_paused = true)]
async fn new_request_restarts_retrieval_from_the_first_record() {
    let log = log_with(10);
    let mut node = Node::start(log.clone(), idle_producer(), 2 * ECG_RECORD.len());

    node.host.write_all(b"?").await.expect("first request");
    wait_for(&log, LogStatus::Reading).await;
    let mut partial = vec![0u8; ECG_RECORD.len()];
    node.host.read_exact(&mut partial).await.expect("first record");

    node.host.write_all(b"?").await.expect("second request");
    sleep(Duration::from_millis(10)).await;
    assert_eq!(log.status(), LogStatus::Reading);

    // drain everything the link carries until the restarted read completes
    let mut seen = Vec::new();
    let mut buf = [0u8; 64];
    while log.status() != LogStatus::ReadDone {
        tokio::select! {
            n = node.host.read(&mut buf) => seen.extend_from_slice(&buf[..n.expect("read")]),
            _ = sleep(Duration::from_millis(1)) => {}
        }
    }
    while let Ok(Ok(n)) =
        tokio::time::timeout(Duration::from_millis(5), node.host.read(&mut buf)).await
    {
        if n == 0 {
            break;
        }
        seen.extend_from_slice(&buf[..n]);
    }
    // the last ten complete records are one full pass over the log
    let tail = &seen[seen.len().saturating_sub(10 * ECG_RECORD.len())..];
    assert_eq!(tail, ECG_RECORD.repeat(10).as_slice());

    let stats = node.stop().await;
    assert!(stats.retrievals_halted >= 1);
}
