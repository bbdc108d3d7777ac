//! Fixed-interval driver for the publication cycle.

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::SessionStateHandle;

/// Work the scheduler runs on every tick.
#[async_trait::async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    async fn run_once(&self);
}

/// What a finished scheduler did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerReport {
    pub runs: u64,
    /// Ticks dropped because the previous cycle was still running.
    pub skipped: u64,
}

pub struct Scheduler {
    interval: Duration,
    state: SessionStateHandle,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(interval: Duration, state: SessionStateHandle, cancel: CancellationToken) -> Self {
        Self {
            interval,
            state,
            cancel,
        }
    }

    /// Waits for the first connection, then runs `job` immediately and on
    /// every tick until cancelled. At most one run is in flight; on
    /// cancellation the in-flight run is awaited, never aborted.
    pub async fn run(self, job: Arc<dyn ScheduledJob>) -> SchedulerReport {
        let mut report = SchedulerReport::default();

        if !self.state.wait_until_connected(&self.cancel).await {
            debug!("Scheduler stopped before the first connection");
            return report;
        }
        info!("Publishing state every {}s", self.interval.as_secs_f64());

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if in_flight.as_ref().is_some_and(|cycle| !cycle.is_finished()) {
                        report.skipped += 1;
                        warn!("Previous publication cycle is still running, skipping tick");
                        continue;
                    }
                    if let Some(cycle) = in_flight.take() {
                        reap(cycle).await;
                    }
                    let job = job.clone();
                    in_flight = Some(tokio::spawn(async move { job.run_once().await }));
                    report.runs += 1;
                }
            }
        }

        if let Some(cycle) = in_flight.take() {
            if !cycle.is_finished() {
                debug!("Waiting for the running publication cycle to finish");
            }
            reap(cycle).await;
        }
        info!(
            "Scheduler stopped after {} cycles ({} skipped)",
            report.runs, report.skipped
        );
        report
    }
}

async fn reap(cycle: JoinHandle<()>) {
    if let Err(e) = cycle.await {
        error!("Publication cycle panicked: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::sync::Notify;

    use super::*;
    use crate::core::state::SessionState;

    #[derive(Default)]
    struct TimedJob {
        delay: Duration,
        started: AtomicU32,
        finished: AtomicU32,
        active: AtomicU32,
        max_active: AtomicU32,
        notify: Notify,
    }

    impl TimedJob {
        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                ..Self::default()
            })
        }

        async fn wait_started(&self, n: u32) {
            loop {
                let notified = self.notify.notified();
                if self.started.load(Ordering::SeqCst) >= n {
                    return;
                }
                notified.await;
            }
        }
    }

    #[async_trait::async_trait]
    impl ScheduledJob for TimedJob {
        async fn run_once(&self) {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.started.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_waiters();
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn spawn(
        job: Arc<TimedJob>,
        interval: Duration,
        state: &SessionStateHandle,
        cancel: &CancellationToken,
    ) -> JoinHandle<SchedulerReport> {
        let scheduler = Scheduler::new(interval, state.clone(), cancel.clone());
        tokio::spawn(scheduler.run(job))
    }

    async fn within<T>(fut: impl std::future::Future<Output = T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), fut)
            .await
            .expect("timed out")
    }

    #[tokio::test]
    async fn waits_for_first_connection() {
        let state = SessionStateHandle::new();
        let cancel = CancellationToken::new();
        let job = TimedJob::with_delay(Duration::ZERO);
        let handle = spawn(job.clone(), Duration::from_secs(60), &state, &cancel);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(job.started.load(Ordering::SeqCst), 0);

        state.set(SessionState::Connecting);
        state.set(SessionState::Connected);
        within(job.wait_started(1)).await;

        cancel.cancel();
        let report = within(handle).await.unwrap();
        assert_eq!(report.runs, 1);
    }

    #[tokio::test]
    async fn fires_repeatedly_on_interval() {
        let state = SessionStateHandle::new();
        state.set(SessionState::Connected);
        let cancel = CancellationToken::new();
        let job = TimedJob::with_delay(Duration::ZERO);
        let handle = spawn(job.clone(), Duration::from_millis(30), &state, &cancel);

        within(job.wait_started(3)).await;
        cancel.cancel();
        let report = within(handle).await.unwrap();
        assert!(report.runs >= 3);
        assert_eq!(report.skipped, 0);
    }

    #[tokio::test]
    async fn overlapping_ticks_are_skipped() {
        let state = SessionStateHandle::new();
        state.set(SessionState::Connected);
        let cancel = CancellationToken::new();
        let job = TimedJob::with_delay(Duration::from_millis(300));
        let handle = spawn(job.clone(), Duration::from_millis(40), &state, &cancel);

        within(job.wait_started(1)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        let report = within(handle).await.unwrap();

        assert_eq!(job.max_active.load(Ordering::SeqCst), 1);
        assert!(report.skipped >= 1, "report: {report:?}");
    }

    #[tokio::test]
    async fn cancellation_awaits_running_cycle() {
        let state = SessionStateHandle::new();
        state.set(SessionState::Connected);
        let cancel = CancellationToken::new();
        let job = TimedJob::with_delay(Duration::from_millis(200));
        let handle = spawn(job.clone(), Duration::from_secs(60), &state, &cancel);

        within(job.wait_started(1)).await;
        cancel.cancel();
        within(handle).await.unwrap();
        assert_eq!(job.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_before_connection_runs_nothing() {
        let state = SessionStateHandle::new();
        let cancel = CancellationToken::new();
        let job = TimedJob::with_delay(Duration::ZERO);
        let handle = spawn(job.clone(), Duration::from_millis(10), &state, &cancel);

        cancel.cancel();
        let report = within(handle).await.unwrap();
        assert_eq!(report, SchedulerReport::default());
        assert_eq!(job.started.load(Ordering::SeqCst), 0);
    }
}
