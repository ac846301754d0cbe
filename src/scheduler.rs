//! Periodic trigger for the scheduling cycle.
//!
//! A [`CadenceScheduler`] owns its job and interval. [`CadenceScheduler::start`]
//! spawns the ticking task and hands back a [`SchedulerHandle`]; the first
//! tick fires immediately. A failing tick is logged and the next one still
//! runs.

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, error, info};

use crate::pipeline::Pipeline;

/// Work run on every tick.
#[async_trait]
pub trait CycleJob: Send + Sync + 'static {
    async fn run(&self) -> Result<()>;
}

#[async_trait]
impl CycleJob for Pipeline {
    async fn run(&self) -> Result<()> {
        let report = self.run_cycle(Utc::now()).await?;
        if report.failed > 0 {
            info!(failed = report.failed, routes = report.routes, "Cycle finished with failed routes");
        }
        Ok(())
    }
}

pub struct CadenceScheduler {
    job: Arc<dyn CycleJob>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl CadenceScheduler {
    pub fn new(job: Arc<dyn CycleJob>, interval: Duration) -> Self {
        Self {
            job,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the ticking task on the current runtime.
    ///
    /// # Errors
    ///
    /// If the interval is zero, or a previous handle from this scheduler has
    /// not been stopped yet.
    pub fn start(&self) -> Result<SchedulerHandle> {
        if self.interval.is_zero() {
            bail!("scheduler interval must be greater than zero");
        }
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("scheduler is already running");
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let ticks = Arc::new(AtomicU64::new(0));
        let job = self.job.clone();
        let period = self.interval;
        let tick_count = ticks.clone();

        let span = tracing::info_span!("cadence", interval_secs = period.as_secs());
        let task = tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                info!("Scheduler started");

                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        _ = interval.tick() => {
                            let tick = tick_count.fetch_add(1, Ordering::SeqCst) + 1;
                            if let Err(e) = job.run().await {
                                error!(tick, error = %e, "Scheduled job failed");
                            }
                        }
                    }
                }

                info!("Scheduler stopped");
            }
            .instrument(span),
        );

        Ok(SchedulerHandle {
            shutdown: Some(shutdown_tx),
            task,
            ticks,
            running: self.running.clone(),
        })
    }
}

/// Running scheduler. Dropping it also ends the task, but without waiting
/// for it and without clearing the scheduler's running flag.
pub struct SchedulerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    ticks: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl SchedulerHandle {
    /// Ticks started so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Signals the task and waits for it to exit. A tick already in progress
    /// runs to completion first.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let joined = (&mut self.task).await;
        self.running.store(false, Ordering::SeqCst);
        joined?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct CountingJob {
        tx: mpsc::UnboundedSender<u32>,
        calls: std::sync::atomic::AtomicU32,
        fail_first: bool,
    }

    #[async_trait]
    impl CycleJob for CountingJob {
        async fn run(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self.tx.send(n);
            if self.fail_first && n == 1 {
                bail!("boom");
            }
            Ok(())
        }
    }

    fn counting_job(fail_first: bool) -> (Arc<CountingJob>, mpsc::UnboundedReceiver<u32>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let p = Arc::new(CountingJob {
            tx,
            calls: Default::default(),
            fail_first,
        });
        (p, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<u32>) -> u32 {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("tick did not arrive")
            .expect("job dropped")
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let (job, _rx) = counting_job(false);
        let scheduler = CadenceScheduler::new(job, Duration::ZERO);
        assert!(scheduler.start().is_err());
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_first_tick_is_immediate() {
        let (job, mut rx) = counting_job(false);
        let scheduler = CadenceScheduler::new(job, Duration::from_secs(3600));
        let handle = scheduler.start().unwrap();

        assert_eq!(next(&mut rx).await, 1);
        assert_eq!(handle.ticks(), 1);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_start_rejected_until_stopped() {
        let (job, mut rx) = counting_job(false);
        let scheduler = CadenceScheduler::new(job, Duration::from_secs(3600));

        let handle = scheduler.start().unwrap();
        let err = scheduler.start().err().unwrap();
        assert!(err.to_string().contains("already running"));

        next(&mut rx).await;
        handle.stop().await.unwrap();
        assert!(!scheduler.is_running());

        let again = scheduler.start().unwrap();
        again.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_tick_keeps_ticking() {
        let (job, mut rx) = counting_job(true);
        let scheduler = CadenceScheduler::new(job.clone(), Duration::from_millis(10));
        let handle = scheduler.start().unwrap();

        assert_eq!(next(&mut rx).await, 1);
        assert_eq!(next(&mut rx).await, 2);
        handle.stop().await.unwrap();

        let after_stop = job.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(job.calls.load(Ordering::SeqCst), after_stop);
    }
}
