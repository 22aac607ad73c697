use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use grantwarden_core::{AppError, AppResult};
use grantwarden_domain::JobKind;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::grant_ports::GrantRepository;
use crate::job_runner::JobRunner;
use crate::lifecycle_jobs::LifecycleJob;
use crate::scheduler_ports::{Clock, JobLeaseCoordinator, JobRunReport, JobRunRepository};

/// Collaborators injected into the scheduler.
#[derive(Clone)]
pub struct SchedulerDependencies {
    /// Grant store.
    pub grants: Arc<dyn GrantRepository>,
    /// Durable run history.
    pub job_runs: Arc<dyn JobRunRepository>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Optional cross-process lease.
    pub lease_coordinator: Option<Arc<dyn JobLeaseCoordinator>>,
}

/// Scheduler runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSchedulerConfig {
    /// How often due-ness is checked.
    pub tick_interval: Duration,
    /// Lease holder identifier for this process.
    pub holder_id: String,
    /// Lease time-to-live.
    pub lease_seconds: u32,
}

/// Snapshot returned by [`LifecycleScheduler::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStatus {
    /// Whether the background loop is running.
    pub running: bool,
    /// Start time of the last completed run per job.
    pub last_run_per_job: BTreeMap<JobKind, DateTime<Utc>>,
    /// When each job runs next: now for a due job, otherwise its next daily slot.
    pub next_run_per_job: BTreeMap<JobKind, DateTime<Utc>>,
}

/// Runs the lifecycle jobs on their daily cadences.
///
/// Jobs run one after another inside a single task. A tick that arrives while
/// a run is still in progress is skipped.
#[derive(Clone)]
pub struct LifecycleScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    jobs: Vec<Arc<dyn LifecycleJob>>,
    runner: JobRunner,
    job_runs: Arc<dyn JobRunRepository>,
    clock: Arc<dyn Clock>,
    lease_coordinator: Option<Arc<dyn JobLeaseCoordinator>>,
    config: LifecycleSchedulerConfig,
    run_lock: Mutex<()>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleScheduler {
    /// Creates a stopped scheduler.
    #[must_use]
    pub fn new(
        jobs: Vec<Arc<dyn LifecycleJob>>,
        dependencies: SchedulerDependencies,
        config: LifecycleSchedulerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(SchedulerInner {
                jobs,
                runner: JobRunner::new(dependencies.grants, dependencies.clock.clone()),
                job_runs: dependencies.job_runs,
                clock: dependencies.clock,
                lease_coordinator: dependencies.lease_coordinator,
                config,
                run_lock: Mutex::new(()),
                shutdown,
                handle: Mutex::new(None),
            }),
        }
    }

    /// Starts the background loop.
    pub async fn start(&self) -> AppResult<()> {
        let mut handle = self.inner.handle.lock().await;
        if handle.as_ref().is_some_and(|running| !running.is_finished()) {
            return Err(AppError::Conflict(
                "lifecycle scheduler is already running".to_owned(),
            ));
        }

        self.inner.shutdown.send_replace(false);
        let scheduler = self.clone();
        *handle = Some(tokio::spawn(async move { scheduler.run_loop().await }));

        info!(
            holder_id = %self.inner.config.holder_id,
            tick_seconds = self.inner.config.tick_interval.as_secs(),
            jobs = self.inner.jobs.len(),
            "lifecycle scheduler started"
        );

        Ok(())
    }

    /// Signals shutdown and waits for the in-flight item to finish.
    pub async fn stop(&self) -> AppResult<()> {
        self.inner.shutdown.send_replace(true);

        let handle = self.inner.handle.lock().await.take();
        if let Some(handle) = handle {
            handle.await.map_err(|error| {
                AppError::Internal(format!("lifecycle scheduler task failed: {error}"))
            })?;
        }

        info!("lifecycle scheduler stopped");
        Ok(())
    }

    /// Returns whether the loop runs, when each job last completed and when it runs next.
    pub async fn status(&self) -> AppResult<SchedulerStatus> {
        let running = self
            .inner
            .handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());

        let now = self.inner.clock.now();
        let mut last_run_per_job = BTreeMap::new();
        let mut next_run_per_job = BTreeMap::new();
        for job in &self.inner.jobs {
            let last_started_at = self
                .inner
                .job_runs
                .last_completed_run(job.kind())
                .await?
                .map(|report| report.started_at);

            let cadence = job.cadence();
            let next_run = if cadence.is_due(now, last_started_at) {
                now
            } else {
                cadence.next_slot(now)
            };
            next_run_per_job.insert(job.kind(), next_run);

            if let Some(started_at) = last_started_at {
                last_run_per_job.insert(job.kind(), started_at);
            }
        }

        Ok(SchedulerStatus {
            running,
            last_run_per_job,
            next_run_per_job,
        })
    }

    /// Runs every job that is due now and returns the reports of the runs made.
    ///
    /// Returns no reports when another run holds the local run lock.
    pub async fn run_due_jobs(&self) -> Vec<JobRunReport> {
        let Ok(_guard) = self.inner.run_lock.try_lock() else {
            info!("lifecycle run already in progress; tick skipped");
            return Vec::new();
        };

        let now = self.inner.clock.now();
        let mut reports = Vec::new();

        for job in &self.inner.jobs {
            if *self.inner.shutdown.borrow() {
                break;
            }

            let last_started_at = match self.inner.job_runs.last_completed_run(job.kind()).await {
                Ok(report) => report.map(|report| report.started_at),
                Err(error) => {
                    warn!(job = %job.kind(), error = %error, "failed to load last job run");
                    continue;
                }
            };

            if !job.cadence().is_due(now, last_started_at) {
                continue;
            }

            match self.run_with_lease(job.as_ref()).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(error) => {
                    warn!(job = %job.kind(), error = %error, "lifecycle job run failed");
                }
            }
        }

        reports
    }

    /// Runs one job immediately, regardless of its cadence.
    pub async fn run_job_now(&self, job_kind: JobKind) -> AppResult<JobRunReport> {
        let job = self
            .inner
            .jobs
            .iter()
            .find(|job| job.kind() == job_kind)
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!("lifecycle job '{job_kind}' is not registered"))
            })?;

        let _guard = self.inner.run_lock.lock().await;
        self.run_with_lease(job.as_ref()).await?.ok_or_else(|| {
            AppError::Conflict(format!(
                "lifecycle job '{job_kind}' is running in another process"
            ))
        })
    }

    async fn run_loop(&self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.inner.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_due_jobs().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn run_with_lease(&self, job: &dyn LifecycleJob) -> AppResult<Option<JobRunReport>> {
        let job_kind = job.kind();
        let lease = match &self.inner.lease_coordinator {
            Some(coordinator) => {
                let scope_key = format!("grantwarden:lifecycle:{job_kind}");
                match coordinator
                    .try_acquire_lease(
                        scope_key.as_str(),
                        self.inner.config.holder_id.as_str(),
                        self.inner.config.lease_seconds,
                    )
                    .await?
                {
                    Some(lease) => Some(lease),
                    None => {
                        info!(job = %job_kind, "lifecycle job lease held elsewhere; run skipped");
                        return Ok(None);
                    }
                }
            }
            None => None,
        };

        let shutdown = self.inner.shutdown.subscribe();
        let outcome = match self.inner.runner.run(job, &shutdown).await {
            Ok(report) => self
                .inner
                .job_runs
                .record_run(report.clone())
                .await
                .map(|()| Some(report)),
            Err(error) => Err(error),
        };

        if let (Some(coordinator), Some(lease)) = (&self.inner.lease_coordinator, lease)
            && let Err(error) = coordinator.release_lease(&lease).await
        {
            warn!(job = %job_kind, error = %error, "failed to release lifecycle job lease");
        }

        outcome
    }
}
