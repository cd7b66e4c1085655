mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn, LevelFilter};
use rusqlite::Connection;

use cli::{Cli, Command};
use tasksync::config::Config;
use tasksync::engine::Engine;
use tasksync::gateway::IssueGateway;
use tasksync::github::GithubClient;
use tasksync::{db, output, store};

fn ensure_db_dir(db_path: &str) -> Result<()> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

fn open_db(db_path: &str) -> Result<Connection> {
    ensure_db_dir(db_path)?;
    let conn = db::open(db_path).with_context(|| format!("failed to open {db_path}"))?;
    db::init(&conn)?;
    Ok(conn)
}

/// `--db`, else the config's `database`, else the default location.
fn resolve_db_path(cli_db: Option<String>, config: Option<&Config>) -> String {
    cli_db
        .or_else(|| config.and_then(|c| c.database.clone()))
        .unwrap_or_else(Config::default_database)
}

/// Level from `--log-level`, else the config, else info. `RUST_LOG` wins
/// over both.
fn setup_logging(cli_level: Option<&str>, config: Option<&Config>) -> Result<()> {
    let level = match cli_level.or_else(|| config.and_then(|c| c.log.as_deref())) {
        Some(name) => name
            .parse::<LevelFilter>()
            .with_context(|| format!("invalid log level '{name}'"))?,
        None => LevelFilter::Info,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_secs()
        .init();
    Ok(())
}

fn github_token(config: &Config) -> Option<String> {
    std::env::var("GITHUB_TOKEN")
        .ok()
        .filter(|t| !t.is_empty())
        .or_else(|| config.github.token.clone())
}

fn github_client(config: &Config) -> Result<GithubClient> {
    let token = github_token(config);
    if token.is_none() {
        warn!("No GitHub token configured, requests are unauthenticated");
    }
    GithubClient::new(&config.github, token.as_deref()).context("failed to build GitHub client")
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    // Commands that only touch the database run without a config file.
    let config = match cli.command {
        Command::Init | Command::Links { .. } if !Path::new(&config_path).exists() => None,
        _ => Some(Config::load_from(Path::new(&config_path))?),
    };
    setup_logging(cli.log_level.as_deref(), config.as_ref())?;
    let db_path = resolve_db_path(cli.db, config.as_ref());

    match cli.command {
        Command::Init => {
            open_db(&db_path)?;
            eprintln!("Initialized database at {db_path}");
        }

        Command::Sync { all_issues } => {
            let config = config.context("sync needs a config file")?;
            let conn = open_db(&db_path)?;
            let client = github_client(&config)?;
            info!(
                "Starting sync of {} with {}/{}",
                db_path, config.github.owner, config.github.repo
            );
            let summary = Engine::new(&conn, &client, &config.sync).run(all_issues)?;
            info!("Sync ended: {}", output::format_summary(&summary));
        }

        Command::Links { open, json } => {
            let conn = open_db(&db_path)?;
            let links = store::list_links(&conn, open)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&links)?);
            } else {
                print!("{}", output::format_link_list(&links));
            }
        }

        Command::RateLimit => {
            let config = config.context("rate-limit needs a config file")?;
            let limit = github_client(&config)?.rate_limit()?;
            print!("{}", output::format_rate_limit(&limit));
        }
    }

    Ok(())
}
