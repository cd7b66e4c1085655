//! GitHub REST implementation of [`IssueGateway`].

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, LINK};
use serde::{Deserialize, Serialize};

use crate::config::GithubConfig;
use crate::error::GatewayError;
use crate::gateway::IssueGateway;
use crate::model::{Comment, IssuePatch, IssuePayload, IssueState, RateLimit, RemoteIssue};

const PER_PAGE: u32 = 100;
const TIMEOUT: Duration = Duration::from_secs(30);

pub struct GithubClient {
    http: Client,
    api_url: String,
    owner: String,
    repo: String,
}

#[derive(Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Deserialize)]
struct ApiLabel {
    name: String,
}

#[derive(Deserialize)]
struct ApiIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<ApiLabel>,
    #[serde(default)]
    assignee: Option<ApiUser>,
    #[serde(default)]
    user: Option<ApiUser>,
    state: IssueState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl ApiIssue {
    fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

impl From<ApiIssue> for RemoteIssue {
    fn from(api: ApiIssue) -> Self {
        Self {
            number: api.number,
            title: api.title,
            body: api.body.unwrap_or_default(),
            labels: api.labels.into_iter().map(|l| l.name).collect(),
            assignee: api.assignee.map(|u| u.login),
            author: api.user.map(|u| u.login),
            state: api.state,
            created_at: api.created_at,
            updated_at: api.updated_at,
        }
    }
}

#[derive(Deserialize)]
struct ApiCreated {
    number: u64,
}

#[derive(Deserialize)]
struct ApiRateLimit {
    resources: ApiResources,
}

#[derive(Deserialize)]
struct ApiResources {
    core: ApiCoreLimit,
}

#[derive(Deserialize)]
struct ApiCoreLimit {
    limit: u64,
    remaining: u64,
    reset: i64,
}

#[derive(Serialize)]
struct CreateIssue<'a> {
    title: &'a str,
    body: &'a str,
    labels: &'a [String],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    assignees: Vec<&'a str>,
}

#[derive(Serialize)]
struct CreateComment {
    body: String,
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

/// Map non-success statuses to errors. An exhausted quota comes back as 403
/// or 429 with `x-ratelimit-remaining: 0`.
fn check_response(resp: Response) -> Result<Response, GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == 403 || status == 429 {
        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        if header("x-ratelimit-remaining").as_deref() == Some("0") {
            let reset_at = header("x-ratelimit-reset")
                .and_then(|v| v.parse::<i64>().ok())
                .map(timestamp)
                .unwrap_or_else(Utc::now);
            return Err(GatewayError::RateLimited { reset_at });
        }
    }
    Err(GatewayError::Api {
        status: status.as_u16(),
        message: resp.text().unwrap_or_default(),
    })
}

/// The `rel="next"` target of a `Link` header, if any.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (url, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim() == "rel=\"next\"")
            .then(|| {
                url.trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string()
            })
    })
}

fn next_page(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LINK)
        .and_then(|v| v.to_str().ok())
        .and_then(next_link)
}

fn keep_issues(page: Vec<ApiIssue>) -> impl Iterator<Item = RemoteIssue> {
    page.into_iter()
        .filter(|i| !i.is_pull_request())
        .map(RemoteIssue::from)
}

impl GithubClient {
    pub fn new(config: &GithubConfig, token: Option<&str>) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| GatewayError::Decode("token is not a valid header value".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let http = Client::builder()
            .user_agent(concat!("tasksync/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}{path}", self.api_url, self.owner, self.repo)
    }

    fn issues_url(&self, since: Option<DateTime<Utc>>) -> String {
        let mut url = self.repo_url(&format!("/issues?state=all&per_page={PER_PAGE}"));
        if let Some(since) = since {
            url.push_str("&since=");
            url.push_str(&since.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        url
    }
}

impl IssueGateway for GithubClient {
    fn rate_limit(&self) -> Result<RateLimit, GatewayError> {
        let resp = self
            .http
            .get(format!("{}/rate_limit", self.api_url))
            .send()?;
        let body: ApiRateLimit = check_response(resp)?.json()?;
        let core = body.resources.core;
        Ok(RateLimit {
            remaining: core.remaining,
            limit: core.limit,
            reset_at: timestamp(core.reset),
        })
    }

    fn create(&self, payload: &IssuePayload) -> Result<u64, GatewayError> {
        let request = CreateIssue {
            title: &payload.title,
            body: &payload.body,
            labels: &payload.labels,
            assignees: payload.assignee.iter().map(String::as_str).collect(),
        };
        let resp = self
            .http
            .post(self.repo_url("/issues"))
            .json(&request)
            .send()?;
        let created: ApiCreated = check_response(resp)?.json()?;
        debug!("Created issue #{}", created.number);
        Ok(created.number)
    }

    fn update(&self, number: u64, patch: &IssuePatch) -> Result<(), GatewayError> {
        let resp = self
            .http
            .patch(self.repo_url(&format!("/issues/{number}")))
            .json(patch)
            .send()?;
        check_response(resp)?;
        Ok(())
    }

    fn comment(&self, number: u64, comment: &Comment) -> Result<(), GatewayError> {
        let resp = self
            .http
            .post(self.repo_url(&format!("/issues/{number}/comments")))
            .json(&CreateComment {
                body: comment.to_markdown(),
            })
            .send()?;
        check_response(resp)?;
        Ok(())
    }

    fn list_issues(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RemoteIssue>, GatewayError> {
        let mut issues = Vec::new();
        let mut url = Some(self.issues_url(since));
        while let Some(current) = url {
            let resp = check_response(self.http.get(&current).send()?)?;
            url = next_page(resp.headers());
            let page: Vec<ApiIssue> = resp.json()?;
            issues.extend(keep_issues(page));
        }
        debug!("Fetched {} issues", issues.len());
        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUES_JSON: &str = r#"[
      {
        "number": 12,
        "title": "Crash on save",
        "body": "Steps:\r\n1. save",
        "labels": [{"id": 1, "name": "bug"}, {"id": 2, "name": "tasksync"}],
        "assignee": {"login": "alice-gh", "id": 7},
        "user": {"login": "bob-gh", "id": 8},
        "state": "open",
        "created_at": "2026-10-01T08:00:00Z",
        "updated_at": "2026-10-02T09:30:00Z"
      },
      {
        "number": 13,
        "title": "Bump deps",
        "body": null,
        "labels": [],
        "assignee": null,
        "user": {"login": "bot"},
        "state": "closed",
        "created_at": "2026-10-01T08:00:00Z",
        "updated_at": "2026-10-01T08:00:00Z",
        "pull_request": {"url": "https://api.github.com/repos/acme/backlog/pulls/13"}
      },
      {
        "number": 14,
        "title": "No body",
        "labels": [],
        "state": "closed",
        "created_at": "2026-10-01T08:00:00Z",
        "updated_at": "2026-10-05T08:00:00Z"
      }
    ]"#;

    fn client() -> GithubClient {
        let config = GithubConfig {
            owner: "acme".into(),
            repo: "backlog".into(),
            token: None,
            api_url: "https://api.github.test/".into(),
        };
        GithubClient::new(&config, Some("t0ken")).unwrap()
    }

    #[test]
    fn issues_page_drops_pull_requests() {
        let page: Vec<ApiIssue> = serde_json::from_str(ISSUES_JSON).unwrap();
        let issues: Vec<RemoteIssue> = keep_issues(page).collect();
        assert_eq!(issues.len(), 2);

        let crash = &issues[0];
        assert_eq!(crash.number, 12);
        assert_eq!(crash.labels, vec!["bug", "tasksync"]);
        assert_eq!(crash.assignee.as_deref(), Some("alice-gh"));
        assert_eq!(crash.author.as_deref(), Some("bob-gh"));
        assert_eq!(crash.state, IssueState::Open);
        assert_eq!(crash.body, "Steps:\r\n1. save");

        let bare = &issues[1];
        assert_eq!(bare.number, 14);
        assert_eq!(bare.body, "");
        assert_eq!(bare.assignee, None);
        assert_eq!(bare.state, IssueState::Closed);
    }

    #[test]
    fn next_link_finds_rel_next() {
        let header = r#"<https://api.github.com/repositories/1/issues?page=2>; rel="next", <https://api.github.com/repositories/1/issues?page=5>; rel="last""#;
        assert_eq!(
            next_link(header).as_deref(),
            Some("https://api.github.com/repositories/1/issues?page=2")
        );

        let last_page = r#"<https://api.github.com/repositories/1/issues?page=1>; rel="first", <https://api.github.com/repositories/1/issues?page=4>; rel="prev""#;
        assert_eq!(next_link(last_page), None);
        assert_eq!(next_link(""), None);
    }

    #[test]
    fn rate_limit_body_parses() {
        let body = r#"{"resources": {"core": {"limit": 5000, "used": 1, "remaining": 4999, "reset": 1790000000}}, "rate": {}}"#;
        let parsed: ApiRateLimit = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.resources.core.remaining, 4999);
        assert_eq!(parsed.resources.core.limit, 5000);
        assert_eq!(timestamp(parsed.resources.core.reset).timestamp(), 1_790_000_000);
    }

    #[test]
    fn urls_are_built_from_config() {
        let c = client();
        assert_eq!(
            c.repo_url("/issues/3"),
            "https://api.github.test/repos/acme/backlog/issues/3"
        );
        assert_eq!(
            c.issues_url(None),
            "https://api.github.test/repos/acme/backlog/issues?state=all&per_page=100"
        );
        let since = DateTime::parse_from_rfc3339("2026-10-17T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(c
            .issues_url(Some(since))
            .ends_with("&since=2026-10-17T10:00:00Z"));
    }

    #[test]
    fn create_request_omits_empty_assignees() {
        let labels = vec!["bug".to_string()];
        let request = CreateIssue {
            title: "t",
            body: "b",
            labels: &labels,
            assignees: vec![],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("assignees").is_none());
        assert_eq!(json["labels"], serde_json::json!(["bug"]));
    }
}
