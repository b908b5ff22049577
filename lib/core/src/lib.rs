//! Core domain types and utilities for the switchyard orchestration suite.
//!
//! This crate provides the foundational types shared by every other crate:
//! strongly-typed entity ids and the serializable error report shape used
//! in run records and dispatch results.

pub mod error;
pub mod id;

pub use error::{BoxError, ErrorInfo};
pub use id::{EventId, JobId, RunId, SubscriberId, WorkflowId};
