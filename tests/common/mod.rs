#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::Connection;

use tasksync::config::SyncConfig;
use tasksync::db;
use tasksync::engine::{Engine, RunSummary};
use tasksync::error::{GatewayError, SyncError};
use tasksync::gateway::IssueGateway;
use tasksync::model::{
    Comment, IssuePatch, IssuePayload, IssueState, Link, RateLimit, RemoteIssue, Task,
};
use tasksync::store;

/// A mutating call the engine made against the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(u64),
    Update(u64, IssuePatch),
    Comment(u64, Comment),
}

/// In-memory issue tracker recording every mutating call.
pub struct FakeGateway {
    pub issues: RefCell<BTreeMap<u64, RemoteIssue>>,
    pub calls: RefCell<Vec<Call>>,
    pub remaining: Cell<u64>,
    /// Status to fail the next `create` with.
    pub fail_create: Cell<Option<u16>>,
    /// Status to fail the next `update` with.
    pub fail_update: Cell<Option<u16>>,
    next_number: Cell<u64>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            issues: RefCell::new(BTreeMap::new()),
            calls: RefCell::new(Vec::new()),
            remaining: Cell::new(5000),
            fail_create: Cell::new(None),
            fail_update: Cell::new(None),
            next_number: Cell::new(1),
        }
    }

    /// Make the next created issue get `number`.
    pub fn set_next_number(&self, number: u64) {
        self.next_number.set(number);
    }

    pub fn issue(&self, number: u64) -> RemoteIssue {
        self.issues.borrow()[&number].clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn creates(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::Create(_)))
            .count()
    }

    pub fn comments_on(&self, number: u64) -> Vec<Comment> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Comment(n, comment) if *n == number => Some(comment.clone()),
                _ => None,
            })
            .collect()
    }

    /// Someone opens an issue directly on the tracker.
    pub fn open_issue(&self, title: &str, body: &str, labels: &[&str], author: &str) -> u64 {
        let number = self.take_number();
        let now = Utc::now();
        self.issues.borrow_mut().insert(
            number,
            RemoteIssue {
                number,
                title: title.into(),
                body: body.into(),
                labels: labels.iter().map(|l| l.to_string()).collect(),
                assignee: None,
                author: Some(author.into()),
                state: IssueState::Open,
                created_at: now,
                updated_at: now,
            },
        );
        number
    }

    /// Someone edits an issue directly on the tracker.
    pub fn edit(&self, number: u64, f: impl FnOnce(&mut RemoteIssue)) {
        let mut issues = self.issues.borrow_mut();
        let issue = issues.get_mut(&number).expect("no such issue");
        f(issue);
        issue.updated_at = Utc::now();
    }

    fn take_number(&self) -> u64 {
        let mut number = self.next_number.get();
        while self.issues.borrow().contains_key(&number) {
            number += 1;
        }
        self.next_number.set(number + 1);
        number
    }
}

impl IssueGateway for FakeGateway {
    fn rate_limit(&self) -> Result<RateLimit, GatewayError> {
        Ok(RateLimit {
            remaining: self.remaining.get(),
            limit: 5000,
            reset_at: Utc::now() + Duration::hours(1),
        })
    }

    fn create(&self, payload: &IssuePayload) -> Result<u64, GatewayError> {
        if let Some(status) = self.fail_create.take() {
            return Err(GatewayError::Api {
                status,
                message: "create refused".into(),
            });
        }
        // A requested number may collide with an issue created elsewhere;
        // the tracker hands it out anyway so collisions can be staged.
        let number = self.next_number.get();
        self.next_number.set(number + 1);
        let now = Utc::now();
        self.issues.borrow_mut().insert(
            number,
            RemoteIssue {
                number,
                title: payload.title.clone(),
                body: payload.body.clone(),
                labels: payload.labels.clone(),
                assignee: payload.assignee.clone(),
                author: Some("tasksync-bot".into()),
                state: IssueState::Open,
                created_at: now,
                updated_at: now,
            },
        );
        self.calls.borrow_mut().push(Call::Create(number));
        Ok(number)
    }

    fn update(&self, number: u64, patch: &IssuePatch) -> Result<(), GatewayError> {
        if let Some(status) = self.fail_update.take() {
            return Err(GatewayError::Api {
                status,
                message: "update refused".into(),
            });
        }
        let mut issues = self.issues.borrow_mut();
        let issue = issues.get_mut(&number).ok_or(GatewayError::Api {
            status: 404,
            message: "Not Found".into(),
        })?;
        if let Some(title) = &patch.title {
            issue.title = title.clone();
        }
        if let Some(body) = &patch.body {
            issue.body = body.clone();
        }
        if let Some(labels) = &patch.labels {
            issue.labels = labels.clone();
        }
        if let Some(assignees) = &patch.assignees {
            issue.assignee = assignees.first().cloned();
        }
        if let Some(state) = patch.state {
            issue.state = state;
        }
        issue.updated_at = Utc::now();
        self.calls
            .borrow_mut()
            .push(Call::Update(number, patch.clone()));
        Ok(())
    }

    fn comment(&self, number: u64, comment: &Comment) -> Result<(), GatewayError> {
        self.calls
            .borrow_mut()
            .push(Call::Comment(number, comment.clone()));
        Ok(())
    }

    fn list_issues(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RemoteIssue>, GatewayError> {
        Ok(self
            .issues
            .borrow()
            .values()
            .filter(|i| since.map_or(true, |s| i.updated_at >= s))
            .cloned()
            .collect())
    }
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn today() -> NaiveDate {
    date("2026-10-17")
}

pub fn config() -> SyncConfig {
    let mut config = SyncConfig {
        task_url: "https://pm.test/?c=edittask&id={id}".into(),
        ..SyncConfig::default()
    };
    config.types.insert("bug".into(), 1);
    config.types.insert("feature".into(), 2);
    config.users.insert("alice".into(), "alice-gh".into());
    config.users.insert("bob".into(), "bob-gh".into());
    config
}

pub struct World {
    pub conn: Connection,
    pub gateway: FakeGateway,
    pub config: SyncConfig,
}

impl World {
    pub fn new() -> Self {
        Self {
            conn: db::open_memory().unwrap(),
            gateway: FakeGateway::new(),
            config: config(),
        }
    }

    pub fn try_sync(&self) -> Result<RunSummary, SyncError> {
        Engine::with_today(&self.conn, &self.gateway, &self.config, today()).run(false)
    }

    pub fn sync(&self) -> RunSummary {
        self.try_sync().unwrap()
    }

    pub fn period(&self, start: &str, end: &str) -> i64 {
        store::insert_period(&self.conn, date(start), date(end), false).unwrap()
    }

    pub fn close_period(&self, id: i64) {
        self.conn
            .execute("UPDATE periods SET closed = 1 WHERE id = ?1", [id])
            .unwrap();
    }

    pub fn user(&self, nick: &str) -> i64 {
        store::insert_user(&self.conn, nick).unwrap()
    }

    pub fn task(&self, name: &str, description: &str, period: Option<i64>) -> Task {
        let mut task = Task {
            name: name.into(),
            description: description.into(),
            client: "Acme".into(),
            kind: Some(1),
            priority: 2,
            period_id: period,
            ..Task::default()
        };
        store::save_task(&self.conn, &mut task).unwrap();
        task
    }

    pub fn save(&self, task: &mut Task) {
        store::save_task(&self.conn, task).unwrap();
    }

    pub fn find_task(&self, id: i64) -> Option<Task> {
        store::find_task(&self.conn, id).unwrap()
    }

    /// Point a task at a period row that does not exist.
    pub fn dangle_period(&self, task_id: i64) {
        self.conn
            .execute_batch("PRAGMA foreign_keys = OFF")
            .unwrap();
        self.conn
            .execute("UPDATE tasks SET period_id = 999 WHERE id = ?1", [task_id])
            .unwrap();
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON")
            .unwrap();
    }

    pub fn delete_task(&self, id: i64) {
        self.conn
            .execute("DELETE FROM tasks WHERE id = ?1", [id])
            .unwrap();
    }

    pub fn task_count(&self) -> i64 {
        self.conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
            .unwrap()
    }

    pub fn links(&self) -> Vec<Link> {
        store::list_links(&self.conn, false).unwrap()
    }

    pub fn link_for_issue(&self, number: u64) -> Link {
        store::link_by_issue(&self.conn, number).unwrap().unwrap()
    }

    pub fn link_for_task(&self, task_id: i64) -> Link {
        self.links()
            .into_iter()
            .find(|l| l.task_id == Some(task_id))
            .expect("task has no link")
    }

    /// Run once more and assert nothing happened on either side.
    pub fn assert_quiet_rerun(&self) {
        let calls = self.gateway.call_count();
        let links = self.links();
        let summary = self.sync();
        assert_eq!(summary.changes(), 0, "second run changed something: {summary:?}");
        assert_eq!(summary.failed, 0);
        assert_eq!(self.gateway.call_count(), calls, "second run called the tracker");
        assert_eq!(self.links(), links, "second run wrote links");
    }
}
