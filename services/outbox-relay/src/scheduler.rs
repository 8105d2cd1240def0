//! Fixed-interval driver for [`OutboxPublishingJob`].
//!
//! At most one tick is ever in flight: [`Scheduler::trigger`] skips (returns
//! `None`) while another tick holds the guard, whether that tick came from the
//! timer or from a manual trigger. Stopping lets the running tick finish; the
//! job itself stops between modules once shutdown is requested.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use clinic_core::shutdown::ShutdownSignal;

use crate::domain::types::TickReport;
use crate::usecase::publish_outbox::OutboxPublishingJob;

/// Default time between ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Scheduler {
    job: Arc<OutboxPublishingJob>,
    interval: Duration,
    shutdown: ShutdownSignal,
    in_flight: Arc<Mutex<()>>,
    completed_ticks: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new(job: Arc<OutboxPublishingJob>, interval: Duration, shutdown: ShutdownSignal) -> Self {
        Self {
            job,
            interval,
            shutdown,
            in_flight: Arc::new(Mutex::new(())),
            completed_ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks that ran to completion (skipped triggers are not counted).
    pub fn completed_ticks(&self) -> u64 {
        self.completed_ticks.load(Ordering::SeqCst)
    }

    pub fn is_tick_in_flight(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Run one tick now, unless one is already running.
    pub async fn trigger(&self) -> Option<TickReport> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("previous outbox tick still running, skipping");
            return None;
        };

        let started = Instant::now();
        let report = self.job.execute(&self.shutdown).await;
        let tick = self.completed_ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let failed = report.failed_modules().count();
        if report.published() > 0 || report.quarantined() > 0 || failed > 0 {
            info!(
                tick,
                elapsed_ms,
                published = report.published(),
                quarantined = report.quarantined(),
                failed_modules = failed,
                "outbox tick finished"
            );
        } else {
            debug!(tick, elapsed_ms, "outbox tick finished, nothing to publish");
        }

        Some(report)
    }

    /// Spawn the timer loop. The first tick fires immediately.
    pub fn start(&self) -> SchedulerHandle {
        let scheduler = self.clone();
        let join = tokio::spawn(async move { scheduler.run().await });
        SchedulerHandle {
            join,
            shutdown: self.shutdown.clone(),
        }
    }

    async fn run(self) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            modules = ?self.job.modules().collect::<Vec<_>>(),
            max_batch_size = self.job.max_batch_size(),
            max_attempts = self.job.max_attempts(),
            "outbox scheduler started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                // The arm body is not raced against shutdown: a started tick always completes.
                _ = ticker.tick() => {
                    self.trigger().await;
                }
            }
        }

        // A manual trigger may still be running.
        let _drained = self.in_flight.lock().await;
        info!(
            completed_ticks = self.completed_ticks(),
            "outbox scheduler stopped"
        );
    }
}

/// Owner of a running scheduler loop.
pub struct SchedulerHandle {
    join: JoinHandle<()>,
    shutdown: ShutdownSignal,
}

impl SchedulerHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request shutdown and wait for the in-flight tick to finish.
    pub async fn stop(self) -> Result<(), JoinError> {
        self.shutdown.trigger();
        self.join.await
    }

    /// Wait for the loop to exit after shutdown was triggered elsewhere.
    pub async fn join(self) -> Result<(), JoinError> {
        self.join.await
    }
}
