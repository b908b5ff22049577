//! The cron scheduler interface and tick-loop implementation.
//!
//! [`TickScheduler`] sleeps until the next minute boundary (or a fixed
//! check interval when configured), then fires every job whose expression
//! matches the current minute and which has not already run in that minute.
//! Handlers within a tick run concurrently; the next tick is not scheduled
//! until all of them finish. Handler errors go to an injected sink and
//! never stop the loop.

use crate::cron::{CronExpression, truncate_to_minute};
use crate::error::SchedulerError;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, Timelike};
use futures::future::{BoxFuture, join_all};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard_core::{BoxError, JobId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Async handler invoked when a job fires.
pub type JobHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Sink receiving job handler failures, keyed by job name.
pub type JobErrorSink = Arc<dyn Fn(&str, &BoxError) + Send + Sync>;

/// Minimal scheduler interface consumed by the orchestrator and wrapped by
/// the leader scheduler.
#[async_trait]
pub trait CronScheduler: Send + Sync {
    /// Starts the tick loop. Idempotent.
    async fn start(&self);

    /// Stops the loop, waiting for the in-flight tick to finish.
    async fn stop(&self);

    /// Registers a job.
    ///
    /// # Errors
    ///
    /// Fails for an invalid cron expression or an empty name.
    fn add_job(
        &self,
        expression: &str,
        name: &str,
        handler: JobHandler,
    ) -> Result<JobId, SchedulerError>;

    /// Removes a job. Returns whether it existed.
    fn remove_job(&self, job_id: JobId) -> bool;

    /// Returns whether a job is registered.
    fn is_job_scheduled(&self, job_id: JobId) -> bool;
}

/// Summary of a registered job.
#[derive(Debug, Clone)]
pub struct JobInfo {
    /// The job id.
    pub id: JobId,
    /// The job name.
    pub name: String,
    /// The cron expression text.
    pub expression: String,
    /// The next time the job would fire, if one exists.
    pub next_execution: Option<NaiveDateTime>,
}

struct CronJob {
    name: String,
    expression: CronExpression,
    handler: JobHandler,
    /// Minute of the most recent firing, for within-minute dedupe.
    last_run: Option<NaiveDateTime>,
}

struct SchedulerCore {
    check_interval: Option<Duration>,
    jobs: Mutex<HashMap<JobId, CronJob>>,
    on_job_error: JobErrorSink,
    run_state: tokio::sync::Mutex<LoopState>,
}

#[derive(Default)]
struct LoopState {
    running: bool,
    shutdown: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

/// Minute-aligned cron scheduler.
#[derive(Clone)]
pub struct TickScheduler {
    core: Arc<SchedulerCore>,
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TickScheduler {
    /// Creates a scheduler that aligns ticks to minute boundaries.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(None, default_error_sink())
    }

    /// Creates a scheduler that ticks on a fixed interval instead of
    /// aligning to minute boundaries.
    #[must_use]
    pub fn with_check_interval(check_interval: Duration) -> Self {
        Self::with_options(Some(check_interval), default_error_sink())
    }

    /// Creates a scheduler with an explicit error sink.
    #[must_use]
    pub fn with_options(check_interval: Option<Duration>, on_job_error: JobErrorSink) -> Self {
        Self {
            core: Arc::new(SchedulerCore {
                check_interval,
                jobs: Mutex::new(HashMap::new()),
                on_job_error,
                run_state: tokio::sync::Mutex::new(LoopState::default()),
            }),
        }
    }

    /// Returns the next time a job would fire, if it is registered and has
    /// a future occurrence.
    #[must_use]
    pub fn get_next_execution_time(&self, job_id: JobId) -> Option<NaiveDateTime> {
        let jobs = self.core.jobs.lock().expect("jobs lock poisoned");
        let job = jobs.get(&job_id)?;
        job.expression.next_execution(Local::now().naive_local()).ok()
    }

    /// Lists all registered jobs.
    #[must_use]
    pub fn get_all_jobs(&self) -> Vec<JobInfo> {
        let now = Local::now().naive_local();
        let jobs = self.core.jobs.lock().expect("jobs lock poisoned");
        let mut infos: Vec<JobInfo> = jobs
            .iter()
            .map(|(id, job)| JobInfo {
                id: *id,
                name: job.name.clone(),
                expression: job.expression.expression().to_string(),
                next_execution: job.expression.next_execution(now).ok(),
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }
}

#[async_trait]
impl CronScheduler for TickScheduler {
    async fn start(&self) {
        let mut state = self.core.run_state.lock().await;
        if state.running {
            return;
        }
        state.running = true;
        let shutdown = CancellationToken::new();
        state.shutdown = Some(shutdown.clone());
        state.task = Some(tokio::spawn(run_loop(Arc::clone(&self.core), shutdown)));
        tracing::debug!("cron scheduler started");
    }

    async fn stop(&self) {
        let (shutdown, task) = {
            let mut state = self.core.run_state.lock().await;
            if !state.running {
                return;
            }
            state.running = false;
            (state.shutdown.take(), state.task.take())
        };
        if let Some(shutdown) = shutdown {
            shutdown.cancel();
        }
        if let Some(task) = task {
            // The loop only exits between ticks, so this waits for the
            // in-flight tick to finish.
            let _ = task.await;
        }
        tracing::debug!("cron scheduler stopped");
    }

    fn add_job(
        &self,
        expression: &str,
        name: &str,
        handler: JobHandler,
    ) -> Result<JobId, SchedulerError> {
        if name.trim().is_empty() {
            return Err(SchedulerError::EmptyJobName);
        }
        let expression = CronExpression::parse(expression)?;
        let job_id = JobId::new();
        let mut jobs = self.core.jobs.lock().expect("jobs lock poisoned");
        jobs.insert(
            job_id,
            CronJob {
                name: name.to_string(),
                expression,
                handler,
                last_run: None,
            },
        );
        Ok(job_id)
    }

    fn remove_job(&self, job_id: JobId) -> bool {
        let mut jobs = self.core.jobs.lock().expect("jobs lock poisoned");
        jobs.remove(&job_id).is_some()
    }

    fn is_job_scheduled(&self, job_id: JobId) -> bool {
        let jobs = self.core.jobs.lock().expect("jobs lock poisoned");
        jobs.contains_key(&job_id)
    }
}

fn default_error_sink() -> JobErrorSink {
    Arc::new(|name, error| {
        tracing::error!(job = name, %error, "cron job failed");
    })
}

async fn run_loop(core: Arc<SchedulerCore>, shutdown: CancellationToken) {
    loop {
        let delay = core
            .check_interval
            .unwrap_or_else(time_until_next_minute);
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        tick(&core).await;
    }
}

/// Fires every due job once and waits for all handlers.
async fn tick(core: &Arc<SchedulerCore>) {
    let now = truncate_to_minute(Local::now().naive_local());

    let due: Vec<(String, JobHandler)> = {
        let mut jobs = core.jobs.lock().expect("jobs lock poisoned");
        jobs.values_mut()
            .filter(|job| job.expression.matches(now) && job.last_run != Some(now))
            .map(|job| {
                job.last_run = Some(now);
                (job.name.clone(), Arc::clone(&job.handler))
            })
            .collect()
    };

    let outcomes = join_all(due.into_iter().map(|(name, handler)| async move {
        (name, handler().await)
    }))
    .await;

    for (name, outcome) in outcomes {
        if let Err(error) = outcome {
            (core.on_job_error)(&name, &error);
        }
    }
}

/// Duration until the start of the next local minute.
fn time_until_next_minute() -> Duration {
    let now = Local::now();
    let into_minute =
        u64::from(now.second()) * 1_000 + u64::from(now.timestamp_subsec_millis());
    Duration::from_millis(60_000u64.saturating_sub(into_minute).max(1))
}
