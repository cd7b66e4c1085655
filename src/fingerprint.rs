//! Content hashes that decide whether a task and its issue are in sync.
//!
//! `task(t) == payload(issue_from_task(t))` for every task: both sides hash
//! the rendered task block, the title and the type that survives the label
//! mapping.

use sha2::{Digest, Sha256};

use crate::config::SyncConfig;
use crate::model::{IssuePayload, RemoteIssue, Task};
use crate::translate::{effective_kind, kind_from_labels, render_block, strip_backlink};

fn digest(block: &str, title: &str, kind: Option<i64>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(block.as_bytes());
    hasher.update(b"\0");
    hasher.update(title.as_bytes());
    hasher.update(b"\0");
    if let Some(kind) = kind {
        hasher.update(kind.to_string().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

pub fn task(config: &SyncConfig, task: &Task) -> String {
    digest(
        &render_block(task),
        &task.name,
        effective_kind(config, task.kind),
    )
}

pub fn issue(config: &SyncConfig, title: &str, body: &str, labels: &[String]) -> String {
    digest(&strip_backlink(body), title, kind_from_labels(config, labels))
}

pub fn remote(config: &SyncConfig, issue: &RemoteIssue) -> String {
    self::issue(config, &issue.title, &issue.body, &issue.labels)
}

pub fn payload(config: &SyncConfig, payload: &IssuePayload) -> String {
    issue(config, &payload.title, &payload.body, &payload.labels)
}
