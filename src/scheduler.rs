// src/scheduler.rs - Periodic acquisition of the top-level signals
use crate::error::{Result, VigilError};
use crate::report::{OutcomeReport, OutcomeReporter};
use crate::stage::ValueSource;
use crate::value::OutcomeKind;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct SchedulerStats {
    pub running: bool,
    pub tick_count: u64,
    pub available: u64,
    pub not_available: u64,
    pub failed: u64,
    /// Requests refused synchronously (unknown identifier)
    pub rejected: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    available: AtomicU64,
    not_available: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn record(&self, kind: OutcomeKind) {
        let counter = match kind {
            OutcomeKind::Available => &self.available,
            OutcomeKind::NotAvailable => &self.not_available,
            OutcomeKind::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, running: bool, uptime: Duration) -> SchedulerStats {
        SchedulerStats {
            running,
            tick_count: self.ticks.load(Ordering::Relaxed),
            available: self.available.load(Ordering::Relaxed),
            not_available: self.not_available.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            uptime_secs: uptime.as_secs(),
        }
    }
}

/// Fixed-interval timer that requests every configured signal once per tick
///
/// Ticks never wait for the previous tick's requests: reads are idempotent,
/// so overlapping evaluations are harmless. Missed ticks are skipped rather
/// than fired in a burst.
pub struct AcquisitionScheduler {
    source: Arc<dyn ValueSource>,
    reporter: Arc<dyn OutcomeReporter>,
    period: Duration,
    signals: Vec<String>,
    counters: Arc<Counters>,
}

impl AcquisitionScheduler {
    pub fn new(
        source: Arc<dyn ValueSource>,
        reporter: Arc<dyn OutcomeReporter>,
        period: Duration,
        signals: Vec<String>,
    ) -> Result<Self> {
        if period.is_zero() {
            return Err(VigilError::Config(
                "acquisition interval must be greater than zero".into(),
            ));
        }
        Ok(Self {
            source,
            reporter,
            period,
            signals,
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn signals(&self) -> &[String] {
        &self.signals
    }

    /// Issue one round of requests; outcomes are reported as they complete
    pub fn tick(&self, tick: u64) {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);
        debug!("Tick {}: requesting {} signals", tick, self.signals.len());

        for signal in &self.signals {
            let counters = Arc::clone(&self.counters);
            let reporter = Arc::clone(&self.reporter);
            let id = signal.clone();
            let requested = self.source.get_value(
                signal,
                Box::new(move |outcome| {
                    counters.record(outcome.kind());
                    reporter.report(OutcomeReport::from_outcome(tick, id, &outcome));
                }),
            );

            if let Err(e) = requested {
                warn!("Tick {}: request for '{}' rejected: {}", tick, signal, e);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                self.reporter.report(OutcomeReport::rejected(tick, signal.as_str(), &e));
            }
        }
    }

    /// Start the timer on the current runtime
    ///
    /// The first tick fires one full period after this call.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::clone(&self.counters);
        let task_running = Arc::clone(&running);

        info!(
            "Starting acquisition every {}ms for {} signals",
            self.period.as_millis(),
            self.signals.len()
        );

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.period;
            let mut ticker = interval_at(start, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut tick = 0u64;

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        tick += 1;
                        self.tick(tick);
                    }
                }
            }

            task_running.store(false, Ordering::Relaxed);
            info!("Acquisition stopped after {} ticks", tick);
        });

        SchedulerHandle {
            shutdown_tx: Some(shutdown_tx),
            task,
            counters,
            running,
            started: Instant::now(),
        }
    }
}

/// Handle to a running scheduler; dropping it also stops the timer
pub struct SchedulerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
    started: Instant,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot(self.is_running(), self.started.elapsed())
    }

    /// Prevent the next tick and wait for the timer task to finish
    ///
    /// Requests already issued are not cancelled; they complete and report on
    /// their own.
    pub async fn stop(mut self) -> SchedulerStats {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            error!("Acquisition task ended abnormally: {}", e);
        }
        self.running.store(false, Ordering::Relaxed);
        self.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ChannelReporter;
    use crate::value::{Outcome, PendingValue};

    const PERIOD: Duration = Duration::from_secs(2);

    /// Answers every `sid:*` request with a fixed outcome after `delay`
    struct ScriptedSource {
        outcome: Outcome,
        delay: Duration,
    }

    impl ValueSource for ScriptedSource {
        fn stage_name(&self) -> &'static str {
            "scripted"
        }

        fn contains(&self, id: &str) -> bool {
            id.starts_with("sid:")
        }

        fn request(&self, id: &str) -> Result<PendingValue> {
            if !self.contains(id) {
                return Err(VigilError::UnknownSignal(id.to_string()));
            }
            let outcome = self.outcome.clone();
            let delay = self.delay;
            Ok(Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                outcome
            }))
        }
    }

    fn scheduler(
        outcome: Outcome,
        delay: Duration,
        signals: &[&str],
    ) -> (AcquisitionScheduler, tokio::sync::mpsc::UnboundedReceiver<OutcomeReport>) {
        let (reporter, rx) = ChannelReporter::channel();
        let scheduler = AcquisitionScheduler::new(
            Arc::new(ScriptedSource { outcome, delay }),
            Arc::new(reporter),
            PERIOD,
            signals.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        (scheduler, rx)
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<OutcomeReport>) -> Vec<OutcomeReport> {
        let mut reports = Vec::new();
        while let Ok(report) = rx.try_recv() {
            reports.push(report);
        }
        reports
    }

    #[test]
    fn test_zero_period_rejected() {
        let (reporter, _rx) = ChannelReporter::channel();
        let result = AcquisitionScheduler::new(
            Arc::new(ScriptedSource {
                outcome: Outcome::Failed("x".into()),
                delay: Duration::ZERO,
            }),
            Arc::new(reporter),
            Duration::ZERO,
            vec![],
        );
        assert!(matches!(result, Err(VigilError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ticks_keep_rearming() {
        let (scheduler, mut rx) = scheduler(
            Outcome::Failed("bus fault".into()),
            Duration::ZERO,
            &["sid:5", "sid:6", "sid:7", "sid:8"],
        );
        let handle = scheduler.spawn();

        tokio::time::sleep(PERIOD - Duration::from_millis(1)).await;
        assert_eq!(handle.stats().tick_count, 0);

        tokio::time::sleep(PERIOD * 2 + Duration::from_millis(10)).await;
        let stats = handle.stats();
        assert_eq!(stats.tick_count, 3);
        assert_eq!(stats.failed, 12);

        let reports = drain(&mut rx);
        assert_eq!(reports.len(), 12);
        assert!(reports.iter().all(|r| r.kind == OutcomeKind::Failed));
        assert_eq!(reports.last().map(|r| r.tick), Some(3));

        let stats = handle.stop().await;
        assert!(!stats.running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_next_tick() {
        let (scheduler, mut rx) = scheduler(
            Outcome::NotAvailable("not polled".into()),
            Duration::ZERO,
            &["sid:5"],
        );
        let handle = scheduler.spawn();
        tokio::time::sleep(PERIOD + Duration::from_millis(10)).await;
        let stats = handle.stop().await;
        assert_eq!(stats.tick_count, 1);
        assert_eq!(stats.not_available, 1);

        tokio::time::sleep(PERIOD * 5).await;
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_requests_do_not_hold_back_ticks() {
        let (scheduler, mut rx) = scheduler(
            Outcome::NotAvailable("slow".into()),
            PERIOD * 5,
            &["sid:5"],
        );
        let handle = scheduler.spawn();

        tokio::time::sleep(PERIOD * 3 + Duration::from_millis(10)).await;
        assert_eq!(handle.stats().tick_count, 3);
        assert!(drain(&mut rx).is_empty());

        // First tick's request completes at 2s + 10s
        tokio::time::sleep(PERIOD * 3).await;
        let reports = drain(&mut rx);
        assert!(!reports.is_empty());
        assert_eq!(reports[0].tick, 1);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_request_is_reported() {
        let (scheduler, mut rx) = scheduler(
            Outcome::NotAvailable("x".into()),
            Duration::ZERO,
            &["bogus", "sid:1"],
        );
        let handle = scheduler.spawn();
        tokio::time::sleep(PERIOD * 2 + Duration::from_millis(10)).await;

        let stats = handle.stop().await;
        assert_eq!(stats.tick_count, 2);
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.not_available, 2);

        let reports = drain(&mut rx);
        let rejected: Vec<_> = reports.iter().filter(|r| r.signal == "bogus").collect();
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].kind, OutcomeKind::Failed);
        assert_eq!(rejected[0].reason.as_deref(), Some("Unknown signal: bogus"));
    }
}
