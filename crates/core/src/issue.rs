//! Issues reported against a timeline record.

use serde::{Deserialize, Serialize};

use crate::timeline::TimelineRecord;

/// Maximum number of issues of one type stored on a record.
///
/// Counters keep counting past the cap.
pub const MAX_ISSUE_COUNT: usize = 10;

/// Severity of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueType {
    /// Counted in the record's error count.
    Error,
    /// Counted in the record's warning count.
    Warning,
}

/// An error or warning attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Severity
    #[serde(rename = "type")]
    pub issue_type: IssueType,

    /// Redacted message
    pub message: String,
}

impl Issue {
    /// Create a new issue.
    pub fn new(issue_type: IssueType, message: impl Into<String>) -> Self {
        Self {
            issue_type,
            message: message.into(),
        }
    }

    /// Create an error issue.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(IssueType::Error, message)
    }

    /// Create a warning issue.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(IssueType::Warning, message)
    }
}

impl TimelineRecord {
    /// Record an issue.
    ///
    /// The issue is stored only while fewer than [`MAX_ISSUE_COUNT`] issues
    /// of its type are stored; the matching counter always increments.
    /// The caller is responsible for redacting the message first.
    pub fn add_issue(&mut self, issue: Issue) {
        let stored = self.stored_issue_count(issue.issue_type);
        let below_cap = stored < MAX_ISSUE_COUNT;

        match issue.issue_type {
            IssueType::Error => self.error_count += 1,
            IssueType::Warning => self.warning_count += 1,
        }

        if below_cap {
            self.issues.push(issue);
        }
    }

    /// Number of stored issues of a type.
    pub fn stored_issue_count(&self, issue_type: IssueType) -> usize {
        self.issues
            .iter()
            .filter(|i| i.issue_type == issue_type)
            .count()
    }
}
