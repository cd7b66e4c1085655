use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// SQLite database holding tasks, periods and sync links.
    pub database: Option<String>,
    /// Log level name (error, warn, info, debug, trace).
    pub log: Option<String>,
    pub github: GithubConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GithubConfig {
    pub owner: String,
    pub repo: String,
    pub token: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Back-link target; `{id}` is replaced by the task id.
    pub task_url: String,
    pub default_priority: i64,
    pub default_hours: f64,
    pub prevent_duplicates: bool,
    /// How far the since-filter reaches back past the last sync.
    pub since_slack_secs: i64,
    pub static_label: Option<String>,
    pub type_labels: bool,
    /// Label name -> task type id.
    pub types: BTreeMap<String, i64>,
    /// Local user nick -> remote login.
    pub users: BTreeMap<String, String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            task_url: "http://localhost/?c=edittask&id={id}".into(),
            default_priority: 2,
            default_hours: 1.0,
            prevent_duplicates: true,
            since_slack_secs: 600,
            static_label: Some("tasksync".into()),
            type_labels: true,
            types: BTreeMap::new(),
            users: BTreeMap::new(),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.into()
}

impl SyncConfig {
    pub fn label_for_type(&self, kind: i64) -> Option<&str> {
        self.types
            .iter()
            .find(|(_, &id)| id == kind)
            .map(|(label, _)| label.as_str())
    }

    pub fn type_for_label(&self, label: &str) -> Option<i64> {
        self.types.get(label).copied()
    }

    pub fn login_for_nick(&self, nick: &str) -> Option<&str> {
        self.users.get(nick).map(String::as_str)
    }

    pub fn nick_for_login(&self, login: &str) -> Option<&str> {
        self.users
            .iter()
            .find(|(_, l)| l.as_str() == login)
            .map(|(nick, _)| nick.as_str())
    }

    pub fn task_url(&self, task_id: i64) -> String {
        self.task_url.replace("{id}", &task_id.to_string())
    }

    fn validate(&self) -> Result<()> {
        if !self.task_url.contains("{id}") {
            bail!("sync.task_url must contain an {{id}} placeholder");
        }
        let mut ids = HashSet::new();
        for (label, id) in &self.types {
            if !ids.insert(id) {
                bail!("sync.types: type {id} is mapped by more than one label (again by '{label}')");
            }
        }
        let mut logins = HashSet::new();
        for (nick, login) in &self.users {
            if !logins.insert(login.as_str()) {
                bail!("sync.users: login '{login}' is mapped by more than one nick (again by '{nick}')");
            }
        }
        if self.since_slack_secs < 0 {
            bail!("sync.since_slack_secs must not be negative");
        }
        Ok(())
    }
}

impl Config {
    /// Resolve the config path: explicit value, else `~/.tasksync/config.toml`.
    pub fn default_path() -> String {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        format!("{home}/.tasksync/config.toml")
    }

    /// The store path when neither the CLI nor the config names one.
    pub fn default_database() -> String {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        format!("{home}/.tasksync/tasks.db")
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.github.owner.trim().is_empty() || self.github.repo.trim().is_empty() {
            bail!("github.owner and github.repo must be set");
        }
        self.sync.validate()
    }
}
