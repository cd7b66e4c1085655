use crate::engine::RunSummary;
use crate::model::{Link, RateLimit};

fn dash_or<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}

pub fn format_link_list(links: &[Link]) -> String {
    let mut out = String::new();
    for link in links {
        let state = if link.done { "closed" } else { "open" };
        let issue = link
            .issue
            .map(|n| format!("#{n}"))
            .unwrap_or_else(|| "-".into());
        let modified = link
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        out.push_str(&format!(
            "{:>5}  task {:<6} {:<7} {:<6}  {}  {}\n",
            link.id,
            dash_or(link.task_id),
            issue,
            state,
            &link.checksum[..link.checksum.len().min(12)],
            modified,
        ));
    }
    out
}

pub fn format_rate_limit(limit: &RateLimit) -> String {
    format!(
        "{}/{} requests left, resets at {}\n",
        limit.remaining,
        limit.limit,
        limit.reset_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

pub fn format_summary(summary: &RunSummary) -> String {
    let rows = [
        ("issues created", summary.issues_created),
        ("issues moved to copies", summary.copied),
        ("issues updated", summary.issues_updated),
        ("issues reopened", summary.issues_reopened),
        ("issues closed", summary.issues_closed),
        ("tasks created", summary.tasks_created),
        ("tasks updated", summary.tasks_updated),
        ("tasks closed", summary.tasks_closed),
        ("tasks reopened", summary.tasks_reopened),
        ("links closed", summary.links_closed),
        ("skipped", summary.skipped),
        ("failed", summary.failed),
    ];
    let parts: Vec<String> = rows
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(label, n)| format!("{n} {label}"))
        .collect();

    let mut out = if parts.is_empty() {
        "Nothing to sync".to_string()
    } else {
        parts.join(", ")
    };
    if summary.aborted {
        out.push_str(" (stopped early: rate limit)");
    }
    out
}
