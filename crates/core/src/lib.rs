//! Worker core data models.
//!
//! This crate defines the data structures shared by the job execution
//! tracking layers: timeline records, issues, job messages and variables.

#![warn(missing_docs)]

// Identities
mod id;

// Timeline
mod timeline;
mod issue;

// Job input
mod job;
mod variables;

// Re-exports
pub use id::*;

pub use timeline::{
    TimelineRecord, TimelineRecordState, RecordType, TaskResult, TimelineReference, LogReference,
};
pub use issue::{Issue, IssueType, MAX_ISSUE_COUNT};
pub use job::{
    JobMessage, JobEnvironment, ServiceEndpoint, EndpointAuthorization, MaskHint, MaskType,
    SYSTEM_CONNECTION_NAME,
};
pub use variables::{
    Variable, Variables, SYSTEM_DEBUG, AGENT_PROXY_URL, AGENT_PROXY_USERNAME, AGENT_PROXY_PASSWORD,
};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
