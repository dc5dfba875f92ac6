//! Runs ingestion cycles forever: one straight away, then one every `interval` plus a random jitter
//! after the previous one has finished.

use crate::donations::Donations;
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The most random delay added to the interval, so that several deployments do not hit TonAPI in
/// lockstep.
pub const MAX_JITTER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Scheduler {
    donations: Donations,
    interval: Duration,
    max_jitter: Duration,
}

impl Scheduler {
    pub fn new(donations: Donations, interval: Duration) -> Self {
        Self {
            donations,
            interval,
            max_jitter: MAX_JITTER,
        }
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Starts the scheduler on its own task.
    pub fn spawn(self) -> SchedulerHandle {
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(self.run_until(shutdown));
        SchedulerHandle { stop, task }
    }

    /// Runs cycles until `shutdown` becomes `true` or its sender is dropped. A cycle that is running
    /// when that happens is allowed to finish, but no new one is started.
    ///
    /// Each cycle runs on its own task, so an error or even a panic in a cycle is logged and the
    /// schedule carries on.
    pub async fn run_until(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Polling for donations every {:?} plus up to {:?}",
            self.interval, self.max_jitter
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.run_cycle().await;

            let delay = self.interval + jitter(self.max_jitter);
            debug!("Next cycle in {delay:?}");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Polling stopped");
    }

    async fn run_cycle(&self) {
        let donations = self.donations.clone();
        match tokio::spawn(async move { donations.poll_once().await }).await {
            Ok(Ok(report)) if report.is_aborted() => {
                debug!("The next cycle will retry where this one stopped")
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("Cycle failed: {e}"),
            Err(e) => error!("Cycle task ended abnormally: {e}"),
        }
    }
}

/// A random delay in `[0, max)`.
fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
}

/// Controls a scheduler started with `Scheduler::spawn`.
#[derive(Debug)]
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops the scheduler and waits for it to wind down, including any cycle in flight.
    pub async fn stop(self) {
        if self.stop.send(true).is_err() {
            warn!("The scheduler had already stopped");
        }
        if let Err(e) = self.task.await {
            error!("The scheduler ended abnormally: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
