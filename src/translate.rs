//! Pure mappings between tasks and issues.
//!
//! An issue body carries a fixed-template "task block" followed by a back-link
//! to the task. The block is what both fingerprints hash; the back-link is
//! stripped first because it embeds the task id and would otherwise make
//! copies of a task in different periods look different.

use std::sync::OnceLock;

use log::warn;
use regex::Regex;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::{IssuePayload, RemoteIssue, Task, User, WorkEntry};

const BACKLINK_TEXT: &str = "Open task";

/// Field values parsed out of a task block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockFields {
    pub description: String,
    pub notes: String,
    pub client: String,
    pub contact: String,
    pub project: String,
    pub budget: String,
    pub due: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Block(BlockFields),
    /// No block marker at all: a free-form issue written on the tracker.
    Absent,
    /// A block marker is present but the template does not match.
    Garbled,
}

/// Where a task built from an issue goes, resolved by the caller.
#[derive(Debug, Clone)]
pub struct Placement {
    pub period_id: i64,
    pub assignee: Option<User>,
}

fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?is)\*\*Description:\*\*\n(?P<description>.*)\n\n",
            r"\*\*Notes:\*\*\n(?P<notes>.*)\n\n",
            r"\*\*Client:\*\*\s+_(?P<client>.*)_\n",
            r"\*\*Contact:\*\*\s+_(?P<contact>.*)_\n",
            r"\*\*Project:\*\*\s+_(?P<project>.*)_\n",
            r"\*\*Budget:\*\*\s+_(?P<budget>.*)_\n",
            r"\*\*Due:\*\*\s+_(?P<due>.*)_\n*",
        ))
        .expect("valid regex")
    })
}

fn backlink_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\n\[Open task\]\([^)\s]*\)").expect("valid regex"))
}

pub fn render_block(task: &Task) -> String {
    format!(
        "**Description:**\n{}\n\n**Notes:**\n{}\n\n**Client:** _{}_\n**Contact:** _{}_\n**Project:** _{}_\n**Budget:** _{}_\n**Due:** _{}_",
        task.description, task.notes, task.client, task.contact, task.project, task.budget, task.due
    )
}

pub fn backlink(config: &SyncConfig, task_id: i64) -> String {
    format!("\n\n[{BACKLINK_TEXT}]({})", config.task_url(task_id))
}

/// Issue body with CRLF folded to LF and every back-link removed.
pub fn strip_backlink(body: &str) -> String {
    let body = body.replace("\r\n", "\n");
    backlink_re().replace_all(&body, "").into_owned()
}

pub fn extract_block(body: &str) -> Extraction {
    let body = strip_backlink(body);
    if let Some(caps) = block_re().captures(&body) {
        let field = |name: &str| {
            caps.name(name)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        };
        return Extraction::Block(BlockFields {
            description: field("description"),
            notes: field("notes"),
            client: field("client"),
            contact: field("contact"),
            project: field("project"),
            budget: field("budget"),
            due: field("due"),
        });
    }
    if body.to_lowercase().contains("**description:**") {
        Extraction::Garbled
    } else {
        Extraction::Absent
    }
}

/// The task type as it survives a trip through issue labels: only types with
/// a configured label, and only while type labels are enabled.
pub fn effective_kind(config: &SyncConfig, kind: Option<i64>) -> Option<i64> {
    kind.filter(|&k| config.type_labels && config.label_for_type(k).is_some())
}

pub fn kind_from_labels(config: &SyncConfig, labels: &[String]) -> Option<i64> {
    if !config.type_labels {
        return None;
    }
    labels.iter().find_map(|l| config.type_for_label(l))
}

pub fn issue_labels(config: &SyncConfig, task: &Task) -> Vec<String> {
    let mut labels = Vec::new();
    if let Some(label) = config.static_label.as_deref().filter(|l| !l.is_empty()) {
        labels.push(label.to_string());
    }
    match task.kind {
        Some(kind) if config.type_labels => match config.label_for_type(kind) {
            Some(label) => labels.push(label.to_string()),
            None => warn!("Unknown task type {kind} on task ({}), update sync.types", task.id),
        },
        Some(_) => {}
        None => warn!("Task type not set on task ({}) {}", task.id, task.name),
    }
    labels
}

/// The remote login of whoever booked the most hours, if they are mapped.
pub fn assignee_for_task(config: &SyncConfig, task: &Task) -> Option<String> {
    let mut top: Option<&WorkEntry> = None;
    for entry in &task.work {
        if entry.hours > top.map_or(0.0, |t| t.hours) {
            top = Some(entry);
        }
    }
    top.and_then(|entry| config.login_for_nick(&entry.nick))
        .map(str::to_owned)
}

pub fn issue_from_task(config: &SyncConfig, task: &Task) -> IssuePayload {
    IssuePayload {
        title: task.name.clone(),
        body: format!("{}{}", render_block(task), backlink(config, task.id)),
        labels: issue_labels(config, task),
        assignee: assignee_for_task(config, task),
    }
}

/// The local nick of the issue's assignee, if mapped.
pub fn assignee_nick<'a>(config: &'a SyncConfig, issue: &RemoteIssue) -> Option<&'a str> {
    issue
        .assignee
        .as_deref()
        .and_then(|login| config.nick_for_login(login))
}

/// Build (or refresh `existing`) a task from an issue.
///
/// Fails with [`SyncError::GarbledBody`] when the body looks like a task
/// block but does not parse: importing the fragments as free text would
/// corrupt the task on every following sync.
pub fn task_from_issue(
    config: &SyncConfig,
    issue: &RemoteIssue,
    existing: Option<Task>,
    placement: &Placement,
) -> Result<Task, SyncError> {
    let mut task = existing.unwrap_or_default();

    match extract_block(&issue.body) {
        Extraction::Block(fields) => {
            task.description = fields.description;
            task.notes = fields.notes;
            task.client = fields.client;
            task.contact = fields.contact;
            task.project = fields.project;
            task.budget = fields.budget;
            task.due = fields.due;
        }
        Extraction::Absent => {
            task.description = strip_backlink(&issue.body);
            // Best guess at the contact: whoever opened the issue.
            if let Some(author) = &issue.author {
                task.contact = config
                    .nick_for_login(author)
                    .map(str::to_owned)
                    .unwrap_or_default();
            }
        }
        Extraction::Garbled => {
            return Err(SyncError::GarbledBody {
                number: issue.number,
            })
        }
    }

    task.name = issue.title.clone();
    task.kind = kind_from_labels(config, &issue.labels);
    if task.kind.is_none() {
        warn!(
            "No known task type for issue (#{}), update sync.types or label the issue",
            issue.number
        );
    }
    task.priority = config.default_priority;
    task.period_id = Some(placement.period_id);

    task.work.retain(|w| w.hours > 0.0);
    if let Some(user) = &placement.assignee {
        if !task.work.iter().any(|w| w.user_id == user.id) {
            task.work.push(WorkEntry {
                user_id: user.id,
                nick: user.nick.clone(),
                hours: config.default_hours,
            });
        }
    }

    task.start = Some(issue.created_at.date_naive());
    task.end = Some(issue.updated_at.date_naive());

    Ok(task)
}
