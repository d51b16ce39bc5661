//! The primary context: periodic triggers and the event loop.
//!
//! Two interval tasks stand in for the hardware timers. The sampling timer
//! posts [`Event::SampleTick`] every sample period; the cleanup timer posts
//! [`Event::CleanupTick`] only while a finished read waits to be erased. The
//! link watcher posts [`Event::RetrievalRequested`]. The [`Supervisor`] waits on
//! the queue and is the only place where the log region is mutated.
//!
//! Before every erase or program the supervisor halts the retrieval task and
//! waits for it to let go of the log.

use crate::config::TimingConfig;
use crate::error::{AppResult, NodeError};
use crate::events::{self, Event, EventSender};
use crate::flash::FlashDevice;
use crate::retrieval::{RetrievalOutcome, RetrievalTask};
use crate::sensor::SampleProducer;
use crate::storage::{LogHandle, LogStatus, StatusCell};
use crate::transport::SharedWriter;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Counters reported when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    /// Records appended to the log
    pub records_appended: u64,
    /// Records dropped because the log was full
    pub records_dropped: u64,
    /// Retrievals that transmitted the whole log
    pub retrievals_completed: u64,
    /// Retrievals halted before completion
    pub retrievals_halted: u64,
    /// Erase-after-read cycles
    pub cleanups: u64,
}

/// Owner of the sampling loop and the retrieval lifecycle
pub struct Supervisor<F: FlashDevice + 'static> {
    log: LogHandle<F>,
    producer: SampleProducer,
    retrieval: RetrievalTask<F>,
    events: EventSender,
    rx: mpsc::Receiver<Event>,
    sample_period: Duration,
    cleanup_period: Duration,
    erase_on_boot: bool,
    stats: SupervisorStats,
}

impl<F: FlashDevice + 'static> Supervisor<F> {
    /// Wire the supervisor to a log, a sample source and the link transmit half
    pub fn new(
        log: LogHandle<F>,
        producer: SampleProducer,
        writer: SharedWriter,
        timing: &TimingConfig,
    ) -> Self {
        let (events, rx) = events::channel();
        let retrieval = RetrievalTask::new(log.clone(), writer, events.clone());
        Self {
            log,
            producer,
            retrieval,
            events,
            rx,
            sample_period: timing.sample_period(),
            cleanup_period: timing.cleanup_period(),
            erase_on_boot: false,
            stats: SupervisorStats::default(),
        }
    }

    /// Erase the whole region before the loop starts
    pub fn erase_on_boot(mut self, erase: bool) -> Self {
        self.erase_on_boot = erase;
        self
    }

    /// Handle for posting events (link watcher, shutdown)
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    /// Run until [`Event::Shutdown`] or a fatal error
    ///
    /// Recoverable conditions are logged and the loop continues. A hardware
    /// fault stops the loop and is returned.
    pub async fn run(mut self) -> AppResult<SupervisorStats> {
        if self.erase_on_boot {
            self.log.lock().erase()?;
            info!("Log region erased on boot");
        }

        let timers = self.spawn_timers();
        info!(
            sample_ms = self.sample_period.as_millis() as u64,
            cleanup_ms = self.cleanup_period.as_millis() as u64,
            "Supervisor running"
        );

        let result = self.event_loop().await;
        for timer in &timers {
            timer.abort();
        }
        let outcome = self.retrieval.halt().await;
        self.note(outcome);

        match result {
            Ok(()) => {
                info!(stats = ?self.stats, "Supervisor stopped");
                Ok(self.stats)
            }
            Err(e) => {
                error!(error = %e, "Supervisor stopped on fatal error");
                Err(e)
            }
        }
    }

    async fn event_loop(&mut self) -> AppResult<()> {
        while let Some(event) = self.rx.recv().await {
            trace!(?event, "Event received");
            match event {
                Event::SampleTick => self.on_sample().await?,
                Event::CleanupTick => self.on_cleanup().await?,
                Event::RetrievalRequested => {
                    let outcome = self.retrieval.restart().await;
                    self.note(outcome);
                }
                Event::RetrievalFinished => {
                    let outcome = self.retrieval.reap().await;
                    self.note(outcome);
                }
                Event::Shutdown => break,
            }
        }
        Ok(())
    }

    async fn on_sample(&mut self) -> AppResult<()> {
        let records = self.producer.produce()?;
        if records.is_empty() {
            return Ok(());
        }

        let outcome = self.retrieval.halt().await;
        self.note(outcome);
        // records appended now would be erased unsent by the pending clean
        if self.log.status() == LogStatus::ReadDone {
            self.clean()?;
        }

        let mut log = self.log.lock();
        for record in &records {
            match log.append_record(record) {
                Ok(()) => {
                    self.stats.records_appended += 1;
                    debug!(record = %record.to_string().trim(), "Record stored");
                }
                Err(NodeError::LogFull(full)) => {
                    self.stats.records_dropped += 1;
                    warn!(
                        needed = full.needed,
                        capacity = full.capacity,
                        "Log full, record dropped"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn on_cleanup(&mut self) -> AppResult<()> {
        let outcome = self.retrieval.halt().await;
        self.note(outcome);
        if self.log.status() == LogStatus::ReadDone {
            self.clean()?;
        } else {
            debug!("Cleanup tick with nothing to erase");
        }
        Ok(())
    }

    fn clean(&mut self) -> AppResult<()> {
        self.log.lock().erase_after_read()?;
        self.stats.cleanups += 1;
        info!("Delivered records erased");
        Ok(())
    }

    fn note(&mut self, outcome: Option<RetrievalOutcome>) {
        match outcome {
            Some(RetrievalOutcome::Completed { sent }) => {
                self.stats.retrievals_completed += 1;
                debug!(sent, "Retrieval reaped");
            }
            Some(RetrievalOutcome::Halted { sent }) => {
                self.stats.retrievals_halted += 1;
                info!(sent, "Retrieval interrupted");
            }
            Some(RetrievalOutcome::Skipped { status }) => {
                debug!(?status, "Retrieval skipped");
            }
            None => {}
        }
    }

    fn spawn_timers(&self) -> [JoinHandle<()>; 2] {
        let sample = spawn_periodic(self.sample_period, self.events.clone(), None);
        let cleanup = spawn_periodic(
            self.cleanup_period,
            self.events.clone(),
            Some(self.log.status_cell().clone()),
        );
        [sample, cleanup]
    }
}

/// Post `SampleTick` (no status) or `CleanupTick` (when `status` reads `ReadDone`)
/// every `period`, starting one period from now.
fn spawn_periodic(
    period: Duration,
    events: EventSender,
    status: Option<StatusCell>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let posted = match &status {
                None => events.post(Event::SampleTick),
                Some(status) if status.load() == LogStatus::ReadDone => {
                    events.post(Event::CleanupTick)
                }
                Some(_) => !events.is_closed(),
            };
            if !posted {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorConfig;
    use crate::flash::RamFlash;
    use crate::record::Timestamp;
    use crate::sensor::mock::{MockAdc, MockLeads, MockOximeter};
    use crate::sensor::FixedClock;
    use crate::storage::FlashLog;
    use crate::transport::Link;
    use tracing_test::traced_test;

    fn producer() -> SampleProducer {
        let clock = FixedClock::new(Timestamp::new(4, 10, 0, 0).unwrap());
        SampleProducer::new(clock, &SensorConfig::default())
            .with_ecg(MockAdc::constant(1531), MockLeads::attached())
    }

    fn log(capacity: usize) -> LogHandle<RamFlash> {
        let flash = RamFlash::new(2 * capacity, capacity.min(256), 4);
        LogHandle::new(FlashLog::mount(flash, capacity, capacity).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_on_cadence() {
        let log = log(1024);
        let (_host, node) = tokio::io::duplex(1024);
        let supervisor = Supervisor::new(
            log.clone(),
            producer(),
            Link::from_io(node).writer,
            &TimingConfig::default(),
        );
        let events = supervisor.events();
        let task = tokio::spawn(supervisor.run());

        tokio::time::sleep(Duration::from_millis(1010)).await;
        events.post(Event::Shutdown);
        let stats = task.await.unwrap().unwrap();

        assert_eq!(stats.records_appended, 5);
        assert_eq!(log.snapshot().records().count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_log_keeps_running() {
        let log = log(40);
        let (_host, node) = tokio::io::duplex(1024);
        let supervisor = Supervisor::new(
            log.clone(),
            producer(),
            Link::from_io(node).writer,
            &TimingConfig::default(),
        );
        let events = supervisor.events();
        let task = tokio::spawn(supervisor.run());

        tokio::time::sleep(Duration::from_millis(610)).await;
        events.post(Event::Shutdown);
        let stats = task.await.unwrap().unwrap();

        // 20-byte records: only one fits with the reserved byte
        assert_eq!(stats.records_appended, 1);
        assert_eq!(stats.records_dropped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hardware_fault_stops_loop() {
        let log = log(1024);
        let (_host, node) = tokio::io::duplex(1024);
        let oximeter = MockOximeter::constant(0, 0);
        oximeter.fail_next_read();
        let clock = FixedClock::new(Timestamp::new(4, 10, 0, 0).unwrap());
        let producer = SampleProducer::new(clock, &SensorConfig::default()).with_spo2(oximeter);
        let supervisor = Supervisor::new(
            log,
            producer,
            Link::from_io(node).writer,
            &TimingConfig::default(),
        );

        let result = supervisor.run().await;
        assert!(matches!(result, Err(NodeError::HardwareFault(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_erase_clears_previous_content() {
        let log = log(1024);
        log.lock().append(b"\r$ec,0.100,1,1,1,1\n").unwrap();
        let (_host, node) = tokio::io::duplex(1024);
        let supervisor = Supervisor::new(
            log.clone(),
            SampleProducer::new(
                FixedClock::new(Timestamp::new(0, 0, 0, 0).unwrap()),
                &SensorConfig::default(),
            ),
            Link::from_io(node).writer,
            &TimingConfig::default(),
        )
        .erase_on_boot(true);
        let events = supervisor.events();
        events.post(Event::Shutdown);
        supervisor.run().await.unwrap();
        assert!(log.snapshot().is_empty());
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_log_full_is_reported() {
        let log = log(40);
        let (_host, node) = tokio::io::duplex(1024);
        let supervisor = Supervisor::new(
            log,
            producer(),
            Link::from_io(node).writer,
            &TimingConfig::default(),
        );
        let events = supervisor.events();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(450)).await;
            events.post(Event::Shutdown);
        });

        let stats = supervisor.run().await.unwrap();
        assert_eq!(stats.records_dropped, 1);
        assert!(logs_contain("Log full, record dropped"));
    }
}
