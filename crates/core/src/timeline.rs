//! Timeline record model - the remote service's view of one node's progress.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::id::{RecordId, TimelineId};
use crate::issue::Issue;
use crate::Time;

/// Kind of node a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    /// The job root.
    Job,
    /// One step within a job.
    Task,
}

/// Lifecycle state of a record. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimelineRecordState {
    /// Created, not yet started.
    Pending,
    /// Started and running.
    InProgress,
    /// Finished; terminal.
    Completed,
}

/// Outcome of a job or task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskResult {
    /// Finished without problems.
    Succeeded,
    /// Finished, but reported warnings or tolerated errors.
    SucceededWithIssues,
    /// Finished unsuccessfully.
    Failed,
    /// Stopped by cancellation or timeout.
    Cancelled,
    /// Never ran.
    Skipped,
    /// Lost before it could report a result.
    Abandoned,
}

impl std::fmt::Display for TaskResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskResult::Succeeded => write!(f, "Succeeded"),
            TaskResult::SucceededWithIssues => write!(f, "SucceededWithIssues"),
            TaskResult::Failed => write!(f, "Failed"),
            TaskResult::Cancelled => write!(f, "Cancelled"),
            TaskResult::Skipped => write!(f, "Skipped"),
            TaskResult::Abandoned => write!(f, "Abandoned"),
        }
    }
}

/// Reference from a record to another timeline (its "Details").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineReference {
    /// Referenced timeline
    pub id: TimelineId,
}

/// Reference from a record to an uploaded log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogReference {
    /// Server-side log id
    pub id: i64,

    /// Where the log can be fetched from
    pub location: Option<String>,
}

/// One node's record on a timeline.
///
/// Most fields are optional because detail records arrive as partial
/// updates; see [`TimelineRecord::merge_from`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineRecord {
    /// Unique identifier, immutable after creation
    pub id: RecordId,

    /// Parent record (none for the job root)
    pub parent_id: Option<RecordId>,

    /// Position among siblings; 1 is the job root
    pub order: Option<u32>,

    /// Display name
    pub name: Option<String>,

    /// Reference name used by expressions and outputs
    pub ref_name: Option<String>,

    /// Record type
    #[serde(rename = "type")]
    pub record_type: Option<RecordType>,

    /// Identity of the worker running this node
    pub worker_name: Option<String>,

    /// Lifecycle state
    pub state: Option<TimelineRecordState>,

    /// When the node started
    pub start_time: Option<Time>,

    /// When the node finished
    pub finish_time: Option<Time>,

    /// 0-100, never decreases while in progress
    pub percent_complete: Option<u8>,

    /// Free text describing what is happening now
    pub current_operation: Option<String>,

    /// Outcome
    pub result: Option<TaskResult>,

    /// Opaque result code
    pub result_code: Option<String>,

    /// Exact number of errors reported
    pub error_count: u32,

    /// Exact number of warnings reported
    pub warning_count: u32,

    /// Stored issues (bounded, see [`crate::MAX_ISSUE_COUNT`])
    pub issues: Vec<Issue>,

    /// Record-scoped variables
    pub variables: HashMap<String, String>,

    /// Uploaded log
    pub log: Option<LogReference>,

    /// Secondary timeline holding sub-records
    pub details: Option<TimelineReference>,
}

impl TimelineRecord {
    /// Create an empty record carrying only its id.
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            parent_id: None,
            order: None,
            name: None,
            ref_name: None,
            record_type: None,
            worker_name: None,
            state: None,
            start_time: None,
            finish_time: None,
            percent_complete: None,
            current_operation: None,
            result: None,
            result_code: None,
            error_count: 0,
            warning_count: 0,
            issues: Vec::new(),
            variables: HashMap::new(),
            log: None,
            details: None,
        }
    }

    /// Create a pending record for a node of the main timeline.
    pub fn pending(
        id: RecordId,
        record_type: RecordType,
        name: impl Into<String>,
        order: u32,
    ) -> Self {
        Self {
            order: Some(order),
            name: Some(name.into()),
            record_type: Some(record_type),
            state: Some(TimelineRecordState::Pending),
            percent_complete: Some(0),
            ..Self::new(id)
        }
    }

    /// Set the parent record.
    pub fn with_parent(mut self, parent_id: Option<RecordId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Set the worker identity.
    pub fn with_worker_name(mut self, worker_name: impl Into<String>) -> Self {
        self.worker_name = Some(worker_name.into());
        self
    }

    /// Whether the record reached its terminal state.
    pub fn is_completed(&self) -> bool {
        self.state == Some(TimelineRecordState::Completed)
    }

    /// Raise percent-complete to `percentage` unless it is already higher.
    pub fn advance_progress(&mut self, percentage: u8) {
        let current = self.percent_complete.unwrap_or(0);
        self.percent_complete = Some(current.max(percentage.min(100)));
    }

    /// Move the record to Completed.
    ///
    /// The result is `result`, else the already-set result, else
    /// `Succeeded`. An existing finish time is kept. Returns the resolved
    /// result.
    pub fn complete(&mut self, result: Option<TaskResult>, now: Time) -> TaskResult {
        let resolved = result.or(self.result).unwrap_or(TaskResult::Succeeded);
        self.finish_time = Some(self.finish_time.unwrap_or(now));
        self.percent_complete = Some(100);
        self.result = Some(resolved);
        self.state = Some(TimelineRecordState::Completed);
        resolved
    }

    /// Merge a partial update into this record.
    ///
    /// Only fields the update actually carries are applied: `None` and
    /// empty strings never clear a value, counters apply only when
    /// non-zero, issues replace the stored list only when non-empty, and
    /// variables merge key by key.
    pub fn merge_from(&mut self, update: &TimelineRecord) {
        merge_text(&mut self.name, &update.name);
        merge_text(&mut self.ref_name, &update.ref_name);
        merge_text(&mut self.worker_name, &update.worker_name);
        merge_text(&mut self.current_operation, &update.current_operation);
        merge_text(&mut self.result_code, &update.result_code);

        merge_value(&mut self.parent_id, &update.parent_id);
        merge_value(&mut self.order, &update.order);
        merge_value(&mut self.record_type, &update.record_type);
        merge_value(&mut self.state, &update.state);
        merge_value(&mut self.start_time, &update.start_time);
        merge_value(&mut self.finish_time, &update.finish_time);
        merge_value(&mut self.percent_complete, &update.percent_complete);
        merge_value(&mut self.result, &update.result);
        merge_value(&mut self.log, &update.log);
        merge_value(&mut self.details, &update.details);

        if update.error_count > 0 {
            self.error_count = update.error_count;
        }
        if update.warning_count > 0 {
            self.warning_count = update.warning_count;
        }
        if !update.issues.is_empty() {
            self.issues = update.issues.clone();
        }
        for (key, value) in &update.variables {
            self.variables.insert(key.clone(), value.clone());
        }
    }
}

fn merge_text(target: &mut Option<String>, incoming: &Option<String>) {
    if let Some(value) = incoming.as_deref().filter(|v| !v.is_empty()) {
        *target = Some(value.to_string());
    }
}

fn merge_value<T: Clone>(target: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *target = Some(value.clone());
    }
}
