//! Leader-elected scheduling.
//!
//! Wraps an inner [`CronScheduler`] so that only the holder of a named
//! distributed lock runs it. An instance contends for the lock, starts the
//! inner scheduler while it leads, refreshes the lease periodically, and on
//! refresh failure demotes itself: scheduler stopped, lease released, back
//! to contending.

use crate::error::SchedulerError;
use crate::lock::{DistributedLock, LockHandle};
use crate::scheduler::{CronScheduler, JobHandler};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::JobId;
use tokio::task::JoinHandle;

/// Default lease TTL.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);

/// Default interval between lease refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(20);

/// Default interval between acquisition attempts while contending.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

struct LeaderState {
    running: bool,
    handle: Option<LockHandle>,
    scheduler_started: bool,
    refresh_task: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,
}

struct LeaderCore<S> {
    scheduler: Arc<S>,
    lock: Arc<dyn DistributedLock>,
    lock_key: String,
    lock_ttl: Duration,
    refresh_interval: Duration,
    retry_interval: Duration,
    state: tokio::sync::Mutex<LeaderState>,
}

/// A scheduler gated on leadership of a distributed lock.
pub struct LeaderScheduler<S> {
    core: Arc<LeaderCore<S>>,
}

impl<S> Clone for LeaderScheduler<S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<S: CronScheduler + 'static> LeaderScheduler<S> {
    /// Creates a leader scheduler contending on the given lock key.
    #[must_use]
    pub fn new(
        scheduler: Arc<S>,
        lock: Arc<dyn DistributedLock>,
        lock_key: impl Into<String>,
    ) -> Self {
        Self {
            core: Arc::new(LeaderCore {
                scheduler,
                lock,
                lock_key: lock_key.into(),
                lock_ttl: DEFAULT_LOCK_TTL,
                refresh_interval: DEFAULT_REFRESH_INTERVAL,
                retry_interval: DEFAULT_RETRY_INTERVAL,
                state: tokio::sync::Mutex::new(LeaderState {
                    running: false,
                    handle: None,
                    scheduler_started: false,
                    refresh_task: None,
                    retry_task: None,
                }),
            }),
        }
    }

    /// Sets the lease TTL.
    #[must_use]
    pub fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.core_mut().lock_ttl = lock_ttl;
        self
    }

    /// Sets the refresh interval. Zero disables refreshing.
    #[must_use]
    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.core_mut().refresh_interval = refresh_interval;
        self
    }

    /// Sets the contention retry interval.
    #[must_use]
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.core_mut().retry_interval = retry_interval;
        self
    }

    fn core_mut(&mut self) -> &mut LeaderCore<S> {
        Arc::get_mut(&mut self.core).expect("configure before sharing")
    }

    /// Returns whether this instance currently holds the lock.
    pub async fn is_leader(&self) -> bool {
        self.core.state.lock().await.handle.is_some()
    }

    /// The wrapped scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<S> {
        &self.core.scheduler
    }
}

impl<S: CronScheduler + 'static> LeaderCore<S> {
    /// One acquisition attempt; on failure schedules a retry.
    fn try_acquire(core: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let mut state = core.state.lock().await;
            if !state.running || state.handle.is_some() {
                return;
            }

            match core.lock.acquire(&core.lock_key, core.lock_ttl).await {
                Ok(Some(handle)) => {
                    tracing::info!(key = %core.lock_key, "acquired leadership");
                    state.handle = Some(handle.clone());
                    if !state.scheduler_started {
                        core.scheduler.start().await;
                        state.scheduler_started = true;
                    }
                    if core.lock.supports_refresh() && core.refresh_interval > Duration::ZERO {
                        state.refresh_task =
                            Some(tokio::spawn(Self::refresh_loop(Arc::clone(&core), handle)));
                    }
                }
                Ok(None) => {
                    drop(state);
                    Self::schedule_retry(core).await;
                }
                Err(error) => {
                    tracing::warn!(key = %core.lock_key, %error, "lock acquire failed");
                    drop(state);
                    Self::schedule_retry(core).await;
                }
            }
        })
    }

    /// Periodically extends the lease; a failed refresh demotes.
    async fn refresh_loop(core: Arc<Self>, handle: LockHandle) {
        loop {
            tokio::time::sleep(core.refresh_interval).await;
            match core.lock.refresh(&handle, core.lock_ttl).await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    tracing::warn!(key = %core.lock_key, "lost leadership lease");
                    // Demote from a fresh task: demotion aborts this one.
                    tokio::spawn(Self::demote(core));
                    return;
                }
            }
        }
    }

    /// Stops leading: refresh timer gone, inner scheduler stopped, lease
    /// released. Schedules reacquisition while still running.
    async fn demote(core: Arc<Self>) {
        let reschedule = {
            let mut state = core.state.lock().await;
            if let Some(task) = state.refresh_task.take() {
                task.abort();
            }
            if state.scheduler_started {
                core.scheduler.stop().await;
                state.scheduler_started = false;
            }
            if let Some(handle) = state.handle.take() {
                let _ = core.lock.release(&handle).await;
            }
            state.running
        };
        if reschedule {
            tracing::info!(key = %core.lock_key, "contending for leadership");
            Self::schedule_retry(core).await;
        }
    }

    async fn schedule_retry(core: Arc<Self>) {
        let mut state = core.state.lock().await;
        if !state.running {
            return;
        }
        let retry = {
            let core = Arc::clone(&core);
            tokio::spawn(async move {
                tokio::time::sleep(core.retry_interval).await;
                Self::try_acquire(Arc::clone(&core)).await;
            })
        };
        state.retry_task = Some(retry);
    }
}

#[async_trait]
impl<S: CronScheduler + 'static> CronScheduler for LeaderScheduler<S> {
    async fn start(&self) {
        {
            let mut state = self.core.state.lock().await;
            if state.running {
                return;
            }
            state.running = true;
        }
        tracing::info!(key = %self.core.lock_key, "contending for leadership");
        LeaderCore::try_acquire(Arc::clone(&self.core)).await;
    }

    async fn stop(&self) {
        {
            let mut state = self.core.state.lock().await;
            if !state.running {
                return;
            }
            state.running = false;
            if let Some(task) = state.retry_task.take() {
                task.abort();
            }
        }
        LeaderCore::demote(Arc::clone(&self.core)).await;
        tracing::info!(key = %self.core.lock_key, "leader scheduler stopped");
    }

    fn add_job(
        &self,
        expression: &str,
        name: &str,
        handler: JobHandler,
    ) -> Result<JobId, SchedulerError> {
        self.core.scheduler.add_job(expression, name, handler)
    }

    fn remove_job(&self, job_id: JobId) -> bool {
        self.core.scheduler.remove_job(job_id)
    }

    fn is_job_scheduled(&self, job_id: JobId) -> bool {
        self.core.scheduler.is_job_scheduled(job_id)
    }
}
