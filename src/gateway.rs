use chrono::{DateTime, Utc};

use crate::error::GatewayError;
use crate::model::{CloseReason, Comment, IssuePatch, IssuePayload, IssueState, RateLimit, RemoteIssue};

/// Below this many remaining calls a run still proceeds, with a warning.
pub const LOW_RATE_LIMIT: u64 = 100;

/// The remote issue tracker. Every call is one round trip and may fail on
/// its own.
pub trait IssueGateway {
    fn rate_limit(&self) -> Result<RateLimit, GatewayError>;

    /// Create an issue and return its number.
    fn create(&self, payload: &IssuePayload) -> Result<u64, GatewayError>;

    fn update(&self, number: u64, patch: &IssuePatch) -> Result<(), GatewayError>;

    fn comment(&self, number: u64, comment: &Comment) -> Result<(), GatewayError>;

    /// All issues (not pull requests) updated at or after `since`, or every
    /// issue when `since` is `None`.
    fn list_issues(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RemoteIssue>, GatewayError>;

    fn close(&self, number: u64, reason: CloseReason) -> Result<(), GatewayError> {
        self.update(number, &IssuePatch::state(IssueState::Closed))?;
        self.comment(number, &reason.comment(number))
    }

    fn reopen(&self, number: u64) -> Result<(), GatewayError> {
        self.update(number, &IssuePatch::state(IssueState::Open))?;
        self.comment(number, &Comment::reopened(number))
    }
}
