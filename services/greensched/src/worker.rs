//! Periodic scheduling worker.
//!
//! Runs [`CycleRunner::run_cycle`] once per period for a fixed number of
//! cycles, then stops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument};

use crate::cycle::{CyclePhase, CycleRunner};
use crate::error::CycleError;

/// What to do when a cycle is still running at the next tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Finish the running cycle before waiting for the next tick.
    #[default]
    Wait,
    /// Start cycles on schedule, with at most `max_in_flight` running.
    Allow { max_in_flight: usize },
}

/// Counts reported when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub started: u32,
    pub succeeded: u32,
    pub failed: u32,
}

impl WorkerSummary {
    fn record(&mut self, sequence: u32, result: Result<(), CycleError>) {
        match result {
            Ok(()) => self.succeeded += 1,
            Err(e) => {
                error!(sequence, error = %e, "Scheduling cycle failed");
                self.failed += 1;
            }
        }
    }

    fn record_joined(&mut self, joined: Result<(u32, Result<(), CycleError>), JoinError>) {
        match joined {
            Ok((sequence, result)) => self.record(sequence, result),
            Err(e) => {
                error!(error = %e, "Scheduling cycle task panicked");
                self.failed += 1;
            }
        }
    }
}

/// Drives scheduling cycles on a fixed period.
pub struct SchedulerWorker {
    runner: Arc<CycleRunner>,
    period: Duration,
    total_runs: u32,
    overlap: OverlapPolicy,
}

impl SchedulerWorker {
    pub fn new(
        runner: Arc<CycleRunner>,
        period: Duration,
        total_runs: u32,
        overlap: OverlapPolicy,
    ) -> Self {
        Self {
            runner,
            period,
            total_runs,
            overlap,
        }
    }

    /// Run cycles `1..=total_runs` until done or shutdown is signaled.
    ///
    /// The first cycle starts immediately. Shutdown stops new cycles from
    /// being started; cycles already running are awaited.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerSummary {
        info!(
            period_secs = self.period.as_secs_f64(),
            total_runs = self.total_runs,
            overlap = ?self.overlap,
            "Started scheduling workloads"
        );

        let permits = match self.overlap {
            OverlapPolicy::Wait => None,
            OverlapPolicy::Allow { max_in_flight } => Some(Arc::new(Semaphore::new(max_in_flight))),
        };
        let mut in_flight = JoinSet::new();
        let mut summary = WorkerSummary::default();

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for sequence in 1..=self.total_runs {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    info!(sequence, "Shutdown requested, no further cycles");
                    break;
                }
                _ = interval.tick() => {}
            }

            match &permits {
                None => {
                    summary.started += 1;
                    let result = self.runner.run_cycle(sequence).await.map(|_| ());
                    summary.record(sequence, result);
                }
                Some(permits) => {
                    let permit = tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => {
                            info!(sequence, "Shutdown requested, no further cycles");
                            break;
                        }
                        permit = permits.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };

                    summary.started += 1;
                    let runner = self.runner.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        (sequence, runner.run_cycle(sequence).await.map(|_| ()))
                    });
                }
            }

            while let Some(joined) = in_flight.try_join_next() {
                summary.record_joined(joined);
            }

            if sequence < self.total_runs {
                info!(sequence, phase = %CyclePhase::Sleep, in_flight = in_flight.len(), "Cycle phase");
            }
        }

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "Waiting for running cycles");
        }
        while let Some(joined) = in_flight.join_next().await {
            summary.record_joined(joined);
        }

        info!(
            phase = %CyclePhase::Terminal,
            started = summary.started,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Finished scheduling workloads"
        );
        summary
    }
}

/// Resolves once shutdown has been signaled. Never resolves if the sender
/// is gone without signaling.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use greensched_carbon::ClusterNode;

    use super::*;
    use crate::cluster::MockCluster;
    use crate::cycle::CycleSettings;
    use crate::error::SubmissionError;
    use crate::feed::MockCarbonFeed;
    use crate::labeler::{NodeLabeler, NodeOrder};
    use crate::submit::ManifestSubmitter;

    const TEMPLATE: &str = "metadata:\n  name: x\nspec:\n  containers:\n    - args: [\"--time=1\"]\n";

    /// Tracks how many submissions run at once.
    #[derive(Default)]
    struct SlowSubmitter {
        delay: Duration,
        fail: bool,
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ManifestSubmitter for SlowSubmitter {
        async fn submit(&self, _manifest: &Path) -> Result<(), SubmissionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                Err(SubmissionError::Failed {
                    code: Some(1),
                    stderr: String::new(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn runner(dir: &Path, submitter: Arc<SlowSubmitter>) -> Arc<CycleRunner> {
        let template_path: PathBuf = dir.join("workload.yaml");
        std::fs::write(&template_path, TEMPLATE).unwrap();
        let cluster = Arc::new(MockCluster::new(vec![ClusterNode::new("n1")]));
        let feed = MockCarbonFeed::new([("eu", 50.0)].into_iter().collect());
        Arc::new(CycleRunner::new(
            NodeLabeler::new(Arc::new(feed), cluster, NodeOrder::Listing),
            submitter,
            CycleSettings {
                template_path,
                manifest_dir: dir.to_path_buf(),
                carbon_aware: true,
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_exactly_total_runs_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let submitter = Arc::new(SlowSubmitter::default());
        let worker = SchedulerWorker::new(
            runner(dir.path(), submitter.clone()),
            Duration::from_secs(30),
            3,
            OverlapPolicy::Wait,
        );
        let (_tx, rx) = watch::channel(false);
        let started = tokio::time::Instant::now();

        let summary = worker.run(rx).await;

        // First cycle is immediate, then one per period, no sleep after the last.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60) && elapsed < Duration::from_secs(61));

        assert_eq!(
            summary,
            WorkerSummary {
                started: 3,
                succeeded: 3,
                failed: 0
            }
        );
        assert_eq!(submitter.calls.load(Ordering::SeqCst), 3);
        assert_eq!(submitter.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycles_do_not_stop_worker() {
        let dir = tempfile::tempdir().unwrap();
        let submitter = Arc::new(SlowSubmitter {
            fail: true,
            ..SlowSubmitter::default()
        });
        let worker = SchedulerWorker::new(
            runner(dir.path(), submitter.clone()),
            Duration::from_secs(30),
            2,
            OverlapPolicy::Wait,
        );
        let (_tx, rx) = watch::channel(false);

        let summary = worker.run(rx).await;

        assert_eq!(summary.started, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(submitter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allow_bounds_in_flight_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let submitter = Arc::new(SlowSubmitter {
            delay: Duration::from_secs(50),
            ..SlowSubmitter::default()
        });
        let worker = SchedulerWorker::new(
            runner(dir.path(), submitter.clone()),
            Duration::from_secs(1),
            6,
            OverlapPolicy::Allow { max_in_flight: 2 },
        );
        let (_tx, rx) = watch::channel(false);

        let summary = worker.run(rx).await;

        assert_eq!(summary.started, 6);
        assert_eq!(summary.succeeded, 6);
        assert_eq!(submitter.peak.load(Ordering::SeqCst), 2);
        assert_eq!(submitter.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_tick_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let submitter = Arc::new(SlowSubmitter::default());
        let worker = SchedulerWorker::new(
            runner(dir.path(), submitter.clone()),
            Duration::from_secs(60),
            5,
            OverlapPolicy::Wait,
        );
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let summary = worker.run(rx).await;

        assert_eq!(summary, WorkerSummary::default());
        assert_eq!(submitter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_dispatch_between_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let submitter = Arc::new(SlowSubmitter::default());
        let worker = SchedulerWorker::new(
            runner(dir.path(), submitter.clone()),
            Duration::from_secs(3600),
            5,
            OverlapPolicy::Wait,
        );
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { worker.run(rx).await });
        while submitter.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        let summary = handle.await.unwrap();

        assert_eq!(summary.started, 1);
        assert_eq!(summary.succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_delays_next_cycle_after_overrun() {
        let dir = tempfile::tempdir().unwrap();
        let submitter = Arc::new(SlowSubmitter {
            delay: Duration::from_secs(45),
            ..SlowSubmitter::default()
        });
        let worker = SchedulerWorker::new(
            runner(dir.path(), submitter.clone()),
            Duration::from_secs(30),
            2,
            OverlapPolicy::Wait,
        );
        let (_tx, rx) = watch::channel(false);
        let started = tokio::time::Instant::now();

        let summary = worker.run(rx).await;

        // The overrunning first cycle pushes the second one back instead of
        // starting two at once.
        assert_eq!(summary.succeeded, 2);
        assert_eq!(submitter.peak.load(Ordering::SeqCst), 1);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(90) && elapsed < Duration::from_secs(91));
    }
}
