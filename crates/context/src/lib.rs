//! Job Execution Tracking
//!
//! The execution context tree of one job: timeline record lifecycle, log
//! fan-out, issue aggregation, linked cancellation, throttling accounting
//! and the detail timeline.

#![warn(missing_docs)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod detail;
pub mod error;
pub mod job;
pub mod log;
pub mod throttling;

#[cfg(test)]
mod testing;

pub use cancellation::CancellationScope;
pub use config::{ProxyConfig, WorkerConfig};
pub use context::{ExecutionContext, JobScope, JobServices};
pub use detail::DetailTimeline;
pub use error::{ContextError, Result};
pub use job::JOB_RECORD_ORDER;
pub use log::{tags, LogArena, NodeLog};
pub use throttling::{ThrottlingMonitor, THROTTLING_WARNING};
