//! Cron scheduling for the switchyard orchestration suite.
//!
//! This crate provides:
//!
//! - **Cron expressions**: Five-field parse, match, and next-occurrence search
//! - **Scheduler**: The [`CronScheduler`] interface and a tick-loop
//!   implementation that fires due jobs once per minute
//! - **Leader election**: A wrapper that gates a scheduler on a refreshable
//!   distributed lock, with demotion and reacquisition
//! - **Locks**: The [`DistributedLock`] interface and a TTL-aware in-memory
//!   implementation

pub mod cron;
pub mod error;
pub mod leader;
pub mod lock;
pub mod scheduler;

pub use cron::CronExpression;
pub use error::{LockError, SchedulerError};
pub use leader::LeaderScheduler;
pub use lock::{DistributedLock, InMemoryDistributedLock, LockHandle};
pub use scheduler::{CronScheduler, JobErrorSink, JobHandler, JobInfo, TickScheduler};
