//! Runs the sweeper passes on independent timers.
//!
//! Each pass is its own tokio task: a slow, failing or panicking pass does not
//! hold up the others. All tasks stop when the shared token is cancelled.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::services::error::BookingError;
use crate::services::metrics::record_sweep_run;
use crate::services::sweeper::{CompletionScope, ExpirySweeper};

pub struct Scheduler {
    config: SchedulerConfig,
    sweeper: Arc<ExpirySweeper>,
    shutdown_token: CancellationToken,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, sweeper: Arc<ExpirySweeper>) -> Self {
        Self {
            config,
            sweeper,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn start(&self) -> Vec<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Scheduled sweeps disabled by configuration");
            return Vec::new();
        }

        tracing::info!("Starting scheduled sweeps");
        let mut handles = Vec::new();

        let sweeper = self.sweeper.clone();
        handles.push(self.spawn("complete_expired", self.config.completion_interval(), move || {
            let sweeper = sweeper.clone();
            async move {
                sweeper
                    .complete_expired(CompletionScope::All)
                    .await
                    .map(|report| report.completed)
            }
        }));

        let sweeper = self.sweeper.clone();
        handles.push(self.spawn("fail_stale_transactions", self.config.stale_sweep_interval(), move || {
            let sweeper = sweeper.clone();
            async move { sweeper.fail_stale_transactions().await }
        }));

        let sweeper = self.sweeper.clone();
        handles.push(self.spawn("activate_in_progress", self.config.activation_interval(), move || {
            let sweeper = sweeper.clone();
            async move { sweeper.activate_in_progress().await }
        }));

        let sweeper = self.sweeper.clone();
        handles.push(self.spawn("release_unpaid_holds", self.config.unpaid_release_interval(), move || {
            let sweeper = sweeper.clone();
            async move { sweeper.release_unpaid_holds().await }
        }));

        let sweeper = self.sweeper.clone();
        handles.push(self.spawn("send_reminders", self.config.reminder_interval(), move || {
            let sweeper = sweeper.clone();
            async move { sweeper.send_reminders().await }
        }));

        handles
    }

    pub fn shutdown(&self) {
        tracing::info!("Stopping scheduled sweeps");
        self.shutdown_token.cancel();
    }

    fn spawn<F, Fut>(&self, task: &'static str, period: Duration, job: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<u64, BookingError>> + Send + 'static,
    {
        tokio::spawn(run_periodic(task, period, self.shutdown_token.clone(), job))
    }
}

async fn run_periodic<F, Fut>(task: &'static str, period: Duration, shutdown: CancellationToken, job: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<u64, BookingError>>,
{
    let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(task = task, period_secs = period.as_secs(), "Sweep task started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(task = task, "Sweep task shutting down");
                break;
            }
            _ = ticker.tick() => {
                let started = Instant::now();
                match job().await {
                    Ok(items) => {
                        record_sweep_run(task, true, items);
                        tracing::debug!(
                            task = task,
                            items = items,
                            duration_ms = started.elapsed().as_millis(),
                            "Sweep run finished"
                        );
                    }
                    Err(e) => {
                        record_sweep_run(task, false, 0);
                        tracing::error!(task = task, error = %e, "Sweep run failed");
                    }
                }
            }
        }
    }
}
