use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkEntry {
    pub user_id: i64,
    pub nick: String,
    pub hours: f64,
}

/// A task record in the local store. `id == 0` means the task has not been
/// persisted yet; `save_task` assigns the real id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub notes: String,
    pub client: String,
    pub contact: String,
    pub project: String,
    pub budget: String,
    pub due: String,
    pub kind: Option<i64>,
    pub priority: i64,
    pub progress: i64,
    pub done: bool,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub period_id: Option<i64>,
    pub work: Vec<WorkEntry>,
}

impl Task {
    pub fn is_persisted(&self) -> bool {
        self.id != 0
    }

    /// Too little content to be worth an issue, and too generic to tell
    /// copies apart by checksum.
    pub fn is_too_empty(&self) -> bool {
        self.description.trim().is_empty()
            && self.notes.trim().is_empty()
            && self.name.chars().count() < 8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub nick: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Period {
    pub id: i64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub closed: bool,
}

impl Period {
    pub fn is_current(&self, today: NaiveDate) -> bool {
        !self.closed && self.start <= today && today <= self.end
    }

    pub fn is_future(&self, today: NaiveDate) -> bool {
        !self.closed && self.start > today
    }

    pub fn has_ended(&self, today: NaiveDate) -> bool {
        self.closed || self.end < today
    }
}

/// Sync record pairing one task with one remote issue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    pub id: i64,
    pub task_id: Option<i64>,
    pub issue: Option<u64>,
    pub checksum: String,
    pub done: bool,
    pub modified: Option<DateTime<Utc>>,
}

impl Link {
    pub fn new(task_id: i64, issue: u64, checksum: String) -> Self {
        Self {
            id: 0,
            task_id: Some(task_id),
            issue: Some(issue),
            checksum,
            done: false,
            modified: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An issue as read back from the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteIssue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub assignee: Option<String>,
    pub author: Option<String>,
    pub state: IssueState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full issue content generated from a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssuePayload {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub assignee: Option<String>,
}

/// Partial issue update; `None` fields are left untouched on the remote side.
/// `assignees: Some(vec![])` clears the assignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IssuePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignees: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<IssueState>,
}

impl IssuePatch {
    pub fn state(state: IssueState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Title, body and labels only. Used for the one-time back-link fix after
    /// a task was created from an issue, where the remote assignment stays.
    pub fn content(payload: &IssuePayload) -> Self {
        Self {
            title: Some(payload.title.clone()),
            body: Some(payload.body.clone()),
            labels: Some(payload.labels.clone()),
            ..Self::default()
        }
    }
}

impl From<&IssuePayload> for IssuePatch {
    fn from(payload: &IssuePayload) -> Self {
        Self {
            assignees: Some(payload.assignee.iter().cloned().collect()),
            ..Self::content(payload)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Closed,
    Deleted,
    Orphaned,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Deleted => "deleted",
            Self::Orphaned => "orphaned",
        }
    }

    pub fn comment(self, number: u64) -> Comment {
        let body = match self {
            Self::Orphaned => {
                format!("Closing issue (#{number}), because it could not be linked to a task.")
            }
            _ => format!(
                "Closing issue (#{number}), because the task was {}.",
                self.as_str()
            ),
        };
        Comment {
            title: capitalize(self.as_str()),
            body,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub title: String,
    pub body: String,
}

impl Comment {
    pub fn reopened(number: u64) -> Self {
        Self {
            title: "Reopened".into(),
            body: format!("Reopening issue (#{number}), because the task was reopened."),
        }
    }

    /// Markdown rendering; the tracker has no separate comment title.
    pub fn to_markdown(&self) -> String {
        format!("**{}**\n\n{}", self.title, self.body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: u64,
    pub limit: u64,
    pub reset_at: DateTime<Utc>,
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
