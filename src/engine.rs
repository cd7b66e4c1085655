//! The reconciliation run.
//!
//! One run pushes local changes out in three passes (new tasks, tracked
//! links, links to close) and then pulls remote issues in. Every item is
//! reconciled inside its own savepoint; a failed item is logged and skipped,
//! a fatal gateway error ends the run.

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use serde::Serialize;

use crate::config::SyncConfig;
use crate::db;
use crate::error::{GatewayError, SyncError};
use crate::fingerprint;
use crate::gateway::{IssueGateway, LOW_RATE_LIMIT};
use crate::model::{
    CloseReason, IssuePatch, IssueState, Link, Period, RemoteIssue, Task, User,
};
use crate::store;
use crate::translate::{self, Placement};

/// What reconciling one item did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    IssueCreated,
    /// An existing issue was handed over to a copied task.
    Copied,
    IssueUpdated,
    IssueReopened,
    IssueClosed,
    TaskCreated,
    TaskUpdated,
    TaskClosed,
    TaskReopened,
    /// Remote issue closed while its task is already gone.
    LinkClosed,
    Unchanged,
    Skipped(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub issues_created: usize,
    pub copied: usize,
    pub issues_updated: usize,
    pub issues_reopened: usize,
    pub issues_closed: usize,
    pub tasks_created: usize,
    pub tasks_updated: usize,
    pub tasks_closed: usize,
    pub tasks_reopened: usize,
    pub links_closed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The run stopped early because the rate limit ran out.
    pub aborted: bool,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::IssueCreated => &mut self.issues_created,
            Outcome::Copied => &mut self.copied,
            Outcome::IssueUpdated => &mut self.issues_updated,
            Outcome::IssueReopened => &mut self.issues_reopened,
            Outcome::IssueClosed => &mut self.issues_closed,
            Outcome::TaskCreated => &mut self.tasks_created,
            Outcome::TaskUpdated => &mut self.tasks_updated,
            Outcome::TaskClosed => &mut self.tasks_closed,
            Outcome::TaskReopened => &mut self.tasks_reopened,
            Outcome::LinkClosed => &mut self.links_closed,
            Outcome::Unchanged => &mut self.unchanged,
            Outcome::Skipped(_) => &mut self.skipped,
        };
        *counter += 1;
    }

    /// Number of items that changed something on either side.
    pub fn changes(&self) -> usize {
        self.issues_created
            + self.copied
            + self.issues_updated
            + self.issues_reopened
            + self.issues_closed
            + self.tasks_created
            + self.tasks_updated
            + self.tasks_closed
            + self.tasks_reopened
            + self.links_closed
    }
}

/// Fold one item result into the summary. Non-fatal errors are logged and
/// counted; fatal ones are handed back to end the run.
fn settle(
    summary: &mut RunSummary,
    what: impl FnOnce() -> String,
    result: Result<Outcome, SyncError>,
) -> Result<(), SyncError> {
    match result {
        Ok(Outcome::Skipped(reason)) => {
            debug!("Skipped {}: {reason}", what());
            summary.record(&Outcome::Skipped(reason));
            Ok(())
        }
        Ok(outcome) => {
            summary.record(&outcome);
            Ok(())
        }
        Err(e) if e.is_fatal() => {
            error!("Aborting run at {}: {e}", what());
            Err(e)
        }
        Err(e) => {
            error!("Failed to sync {}, changes rolled back: {e}", what());
            summary.failed += 1;
            Ok(())
        }
    }
}

pub struct Engine<'a, G: IssueGateway + ?Sized> {
    conn: &'a Connection,
    gateway: &'a G,
    config: &'a SyncConfig,
    today: NaiveDate,
}

impl<'a, G: IssueGateway + ?Sized> Engine<'a, G> {
    pub fn new(conn: &'a Connection, gateway: &'a G, config: &'a SyncConfig) -> Self {
        Self::with_today(conn, gateway, config, Local::now().date_naive())
    }

    pub fn with_today(
        conn: &'a Connection,
        gateway: &'a G,
        config: &'a SyncConfig,
        today: NaiveDate,
    ) -> Self {
        Self {
            conn,
            gateway,
            config,
            today,
        }
    }

    /// Run one full reconciliation. `all_issues` pulls every remote issue
    /// instead of only those updated since the last sync.
    pub fn run(&self, all_issues: bool) -> Result<RunSummary, SyncError> {
        let mut summary = RunSummary::default();

        let limit = self.gateway.rate_limit()?;
        if limit.remaining == 0 {
            error!(
                "GitHub rate limit exhausted ({} calls), resets at {}; not syncing",
                limit.limit, limit.reset_at
            );
            summary.aborted = true;
            return Ok(summary);
        }
        if limit.remaining < LOW_RATE_LIMIT {
            warn!(
                "GitHub rate limit is low: {}/{} left, resets at {}",
                limit.remaining, limit.limit, limit.reset_at
            );
        }

        let since = if all_issues { None } else { Some(self.since()?) };

        match self.reconcile(since, &mut summary) {
            Ok(()) => {}
            Err(SyncError::Gateway(GatewayError::RateLimited { reset_at })) => {
                error!("Rate limit hit mid-run, stopping until {reset_at}");
                summary.aborted = true;
            }
            Err(e) => return Err(e),
        }
        Ok(summary)
    }

    /// Lower bound for the pull listing: the last link write, widened by the
    /// configured slack to cover issues edited while that run was going.
    fn since(&self) -> Result<DateTime<Utc>, SyncError> {
        let last = store::last_link_modified(self.conn)?.unwrap_or_else(Utc::now);
        Ok(last - Duration::seconds(self.config.since_slack_secs))
    }

    fn reconcile(
        &self,
        since: Option<DateTime<Utc>>,
        summary: &mut RunSummary,
    ) -> Result<(), SyncError> {
        for task in store::unlinked_open_tasks(self.conn)? {
            let result = db::atomic(self.conn, |_| self.push_new(&task));
            settle(summary, || format!("task ({})", task.id), result)?;
        }

        for link in store::tracked_links(self.conn)? {
            let id = link.id;
            let result = db::atomic(self.conn, |_| self.push_tracked(link));
            settle(summary, || format!("link {id}"), result)?;
        }

        for link in store::links_to_close(self.conn)? {
            let id = link.id;
            let result = db::atomic(self.conn, |_| self.push_close(link));
            settle(summary, || format!("link {id}"), result)?;
        }

        match since {
            Some(since) => info!("Fetching issues updated since {since}"),
            None => info!("Fetching all issues"),
        }
        let issues = self.gateway.list_issues(since)?;
        for issue in &issues {
            let result = db::atomic(self.conn, |_| self.pull(issue));
            settle(summary, || format!("issue (#{})", issue.number), result)?;
        }
        Ok(())
    }

    // Push: local -> remote.

    fn push_new(&self, task: &Task) -> Result<Outcome, SyncError> {
        if task.is_too_empty() {
            return Ok(Outcome::Skipped(format!(
                "task ({}) {:?} has too little content",
                task.id, task.name
            )));
        }

        let checksum = fingerprint::task(self.config, task);
        if self.config.prevent_duplicates {
            if let Some(old) = store::open_link_by_checksum(self.conn, &checksum)? {
                if let Some(outcome) = self.take_over(task, old, &checksum)? {
                    return Ok(outcome);
                }
            }
        }

        let payload = translate::issue_from_task(self.config, task);
        info!(
            "Creating issue for task ({}) {} [{}]",
            task.id,
            task.name,
            payload.labels.join(", ")
        );
        let number = self.gateway.create(&payload)?;

        let mut link = Link::new(task.id, number, checksum);
        if let Err(e) = store::save_link(self.conn, &mut link) {
            error!(
                "Created issue (#{number}) but could not link it to task ({}), closing it",
                task.id
            );
            if let Err(close_err) = self.gateway.close(number, CloseReason::Orphaned) {
                error!("Could not close orphaned issue (#{number}): {close_err}");
            }
            return Err(e.into());
        }
        Ok(Outcome::IssueCreated)
    }

    /// Hand the issue of an open link with identical content over to `task`
    /// when the linked task lives in another period. No remote call is
    /// made; the issue already shows this content.
    fn take_over(
        &self,
        task: &Task,
        mut old: Link,
        checksum: &str,
    ) -> Result<Option<Outcome>, SyncError> {
        let Some(old_task) = old
            .task_id
            .map(|id| store::find_task(self.conn, id))
            .transpose()?
            .flatten()
        else {
            return Ok(None);
        };
        if old_task.period_id == task.period_id {
            return Ok(None);
        }
        let number = old.issue.ok_or(SyncError::MissingIssue { link_id: old.id })?;

        // Release the issue first: issue ids are unique across links.
        old.issue = None;
        old.done = true;
        store::save_link(self.conn, &mut old)?;

        let mut link = Link::new(task.id, number, checksum.to_string());
        store::save_link(self.conn, &mut link)?;
        info!(
            "Task ({}) is a copy of task ({}), moved issue (#{number}) over",
            task.id, old_task.id
        );
        Ok(Some(Outcome::Copied))
    }

    fn push_tracked(&self, mut link: Link) -> Result<Outcome, SyncError> {
        let number = link.issue.ok_or(SyncError::MissingIssue { link_id: link.id })?;
        let Some(task) = self.linked_task(&link)? else {
            return Ok(Outcome::Skipped(format!("link {} has no task", link.id)));
        };

        let mut outcome = Outcome::Unchanged;
        if link.done && !task.done {
            info!("Reopening issue (#{number}) for task ({})", task.id);
            self.gateway.reopen(number)?;
            link.done = false;
            store::save_link(self.conn, &mut link)?;
            outcome = Outcome::IssueReopened;
        }

        let checksum = fingerprint::task(self.config, &task);
        if checksum != link.checksum {
            info!("Updating issue (#{number}) from task ({})", task.id);
            let payload = translate::issue_from_task(self.config, &task);
            self.gateway.update(number, &IssuePatch::from(&payload))?;
            link.checksum = checksum;
            store::save_link(self.conn, &mut link)?;
            if outcome == Outcome::Unchanged {
                outcome = Outcome::IssueUpdated;
            }
        }
        Ok(outcome)
    }

    fn push_close(&self, mut link: Link) -> Result<Outcome, SyncError> {
        let number = link.issue.ok_or(SyncError::MissingIssue { link_id: link.id })?;
        let reason = match self.linked_task(&link)? {
            Some(_) => CloseReason::Closed,
            None => CloseReason::Deleted,
        };
        info!(
            "Closing issue (#{number}) of task ({}), task was {}",
            link.task_id.unwrap_or_default(),
            reason.as_str()
        );
        self.gateway.close(number, reason)?;
        link.done = true;
        store::save_link(self.conn, &mut link)?;
        Ok(Outcome::IssueClosed)
    }

    // Pull: remote -> local.

    fn pull(&self, issue: &RemoteIssue) -> Result<Outcome, SyncError> {
        let Some(link) = store::link_by_issue(self.conn, issue.number)? else {
            return match issue.state {
                IssueState::Open => self.pull_new(issue),
                IssueState::Closed => Ok(Outcome::Unchanged),
            };
        };
        let task = self.linked_task(&link)?;
        match (issue.state, link.done) {
            (IssueState::Open, false) => self.pull_update(issue, link, task),
            (IssueState::Closed, false) => self.pull_close(issue, link, task),
            (IssueState::Open, true) => self.pull_reopen(issue, link, task),
            (IssueState::Closed, true) => Ok(Outcome::Unchanged),
        }
    }

    fn pull_new(&self, issue: &RemoteIssue) -> Result<Outcome, SyncError> {
        let placement = self.placement(issue)?;
        let mut task = translate::task_from_issue(self.config, issue, None, &placement)?;
        store::save_task(self.conn, &mut task)?;

        let payload = translate::issue_from_task(self.config, &task);
        let mut link = Link::new(
            task.id,
            issue.number,
            fingerprint::payload(self.config, &payload),
        );
        store::save_link(self.conn, &mut link)?;

        // One-time rewrite so the issue carries the task block and back-link.
        self.gateway
            .update(issue.number, &IssuePatch::content(&payload))?;
        info!(
            "Created task ({}) from issue (#{}) {}",
            task.id, issue.number, issue.title
        );
        Ok(Outcome::TaskCreated)
    }

    fn pull_update(
        &self,
        issue: &RemoteIssue,
        mut link: Link,
        task: Option<Task>,
    ) -> Result<Outcome, SyncError> {
        let checksum = fingerprint::remote(self.config, issue);
        if checksum == link.checksum {
            return Ok(Outcome::Unchanged);
        }
        let Some(existing) = task else {
            return Ok(Outcome::Skipped(format!(
                "issue (#{}) changed but its task ({}) is gone",
                issue.number,
                link.task_id.unwrap_or_default()
            )));
        };

        let placement = self.placement(issue)?;
        let mut task = translate::task_from_issue(self.config, issue, Some(existing), &placement)?;
        store::save_task(self.conn, &mut task)?;
        link.checksum = checksum;
        store::save_link(self.conn, &mut link)?;
        info!("Updated task ({}) from issue (#{})", task.id, issue.number);
        Ok(Outcome::TaskUpdated)
    }

    fn pull_close(
        &self,
        issue: &RemoteIssue,
        mut link: Link,
        task: Option<Task>,
    ) -> Result<Outcome, SyncError> {
        link.done = true;
        store::save_link(self.conn, &mut link)?;

        let Some(mut task) = task else {
            info!("Issue (#{}) closed, its task is already gone", issue.number);
            return Ok(Outcome::LinkClosed);
        };
        task.done = true;
        task.progress = 100;
        task.end = Some(self.today);
        store::save_task(self.conn, &mut task)?;
        info!("Closed task ({}) because issue (#{}) was closed", task.id, issue.number);
        Ok(Outcome::TaskClosed)
    }

    fn pull_reopen(
        &self,
        issue: &RemoteIssue,
        mut link: Link,
        task: Option<Task>,
    ) -> Result<Outcome, SyncError> {
        let number = issue.number;
        let task = match task {
            None => {
                let placement = self.placement(issue)?;
                let mut task = translate::task_from_issue(self.config, issue, None, &placement)?;
                store::save_task(self.conn, &mut task)?;
                info!("Issue (#{number}) reopened, recreated its task as ({})", task.id);
                task
            }
            Some(task) => match task.period_id {
                None => {
                    let next = self.next_period(number)?;
                    let mut task = self.reopened(issue, task, next.id)?;
                    store::save_task(self.conn, &mut task)?;
                    info!(
                        "Issue (#{number}) reopened, moved task ({}) to period {}",
                        task.id, next.id
                    );
                    task
                }
                Some(period_id) => {
                    let period = store::find_period(self.conn, period_id)?.ok_or_else(|| {
                        SyncError::Inconsistent {
                            number,
                            detail: format!("task ({}) points at missing period {period_id}", task.id),
                        }
                    })?;
                    self.reopen_in_period(issue, task, &period)?
                }
            },
        };

        let relinked = link.task_id != Some(task.id);
        link.task_id = Some(task.id);
        link.done = false;
        if relinked {
            // The issue body still links to the previous task.
            let payload = translate::issue_from_task(self.config, &task);
            link.checksum = fingerprint::payload(self.config, &payload);
            store::save_link(self.conn, &mut link)?;
            self.gateway.update(number, &IssuePatch::content(&payload))?;
        } else {
            link.checksum = fingerprint::remote(self.config, issue);
            store::save_link(self.conn, &mut link)?;
        }
        Ok(Outcome::TaskReopened)
    }

    fn reopen_in_period(
        &self,
        issue: &RemoteIssue,
        task: Task,
        period: &Period,
    ) -> Result<Task, SyncError> {
        let number = issue.number;
        if period.is_current(self.today) || period.is_future(self.today) {
            let mut task = self.reopened(issue, task, period.id)?;
            store::save_task(self.conn, &mut task)?;
            info!("Issue (#{number}) reopened, reopened task ({})", task.id);
            return Ok(task);
        }
        if period.has_ended(self.today) {
            let next = self.next_period(number)?;
            let old_id = task.id;
            let mut copy = self.reopened(issue, Task { id: 0, ..task }, next.id)?;
            store::save_task(self.conn, &mut copy)?;
            info!(
                "Issue (#{number}) reopened after period {} ended, task ({old_id}) continues as ({}) in period {}",
                period.id, copy.id, next.id
            );
            return Ok(copy);
        }
        Err(SyncError::Inconsistent {
            number,
            detail: format!("task ({}) sits in period {} in an unknown state", task.id, period.id),
        })
    }

    /// `task` reopened in `period_id`, with whatever the issue says now.
    fn reopened(&self, issue: &RemoteIssue, task: Task, period_id: i64) -> Result<Task, SyncError> {
        let placement = Placement {
            period_id,
            assignee: self.assignee(issue)?,
        };
        let mut task = translate::task_from_issue(self.config, issue, Some(task), &placement)?;
        task.progress = 0;
        task.done = false;
        Ok(task)
    }

    fn next_period(&self, number: u64) -> Result<Period, SyncError> {
        store::next_period(self.conn, self.today)?.ok_or(SyncError::NoPeriod { number })
    }

    /// Period and assignee for a task built from `issue`: the next period,
    /// else the latest open one.
    fn placement(&self, issue: &RemoteIssue) -> Result<Placement, SyncError> {
        let period = match store::next_period(self.conn, self.today)? {
            Some(period) => period,
            None => {
                warn!(
                    "No next period, placing issue (#{}) in the latest open period",
                    issue.number
                );
                store::latest_open_period(self.conn)?.ok_or(SyncError::NoPeriod {
                    number: issue.number,
                })?
            }
        };

        Ok(Placement {
            period_id: period.id,
            assignee: self.assignee(issue)?,
        })
    }

    fn assignee(&self, issue: &RemoteIssue) -> Result<Option<User>, SyncError> {
        let Some(nick) = translate::assignee_nick(self.config, issue) else {
            return Ok(None);
        };
        let user = store::user_by_nick(self.conn, nick)?;
        if user.is_none() {
            warn!("Assignee {nick} of issue (#{}) is not a known user", issue.number);
        }
        Ok(user)
    }

    /// The link's task, or `None` when it was deleted.
    fn linked_task(&self, link: &Link) -> Result<Option<Task>, SyncError> {
        let task = match link.task_id {
            Some(id) => store::find_task(self.conn, id)?,
            None => None,
        };
        Ok(task.filter(Task::is_persisted))
    }
}
