//! Queries over tasks, periods and sync links.
//!
//! Tasks and periods belong to the project-management side; this module only
//! reads them and saves tasks the sync has changed. Links are owned by the
//! sync and are never deleted: closed links stay behind as history and as
//! anchors for copy detection.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{Link, Period, Task, User, WorkEntry};

const TASK_COLUMNS: &str = "t.id, t.name, t.description, t.notes, t.client, t.contact, \
     t.project, t.budget, t.due, t.kind, t.prio, t.progress, t.done, t.start_date, \
     t.end_date, t.period_id";

const LINK_COLUMNS: &str = "l.id, l.task_id, l.issue_id, l.checksum, l.done, l.modified";

const PERIOD_COLUMNS: &str = "id, starts_on, ends_on, closed";

const INSERT_TASK: &str = "
INSERT INTO tasks (name, description, notes, client, contact, project, budget, due,
                   kind, prio, progress, done, start_date, end_date, period_id)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
";

const UPDATE_TASK: &str = "
UPDATE tasks
SET name = ?1, description = ?2, notes = ?3, client = ?4, contact = ?5, project = ?6,
    budget = ?7, due = ?8, kind = ?9, prio = ?10, progress = ?11, done = ?12,
    start_date = ?13, end_date = ?14, period_id = ?15
WHERE id = ?16
";

const INSERT_LINK: &str = "
INSERT INTO links (task_id, issue_id, checksum, done, modified)
VALUES (?1, ?2, ?3, ?4, ?5)
";

const UPDATE_LINK: &str = "
UPDATE links
SET task_id = ?1, issue_id = ?2, checksum = ?3, done = ?4, modified = ?5
WHERE id = ?6
";

/// Open tasks in an open (or no) period that have never been linked.
const UNLINKED_OPEN_TASKS: &str = "
FROM tasks t
LEFT JOIN periods p ON p.id = t.period_id
WHERE NOT EXISTS (SELECT 1 FROM links l WHERE l.task_id = t.id)
  AND t.done = 0
  AND (p.closed IS NULL OR p.closed = 0)
ORDER BY t.id
";

/// Open links, plus closed links whose task came back to life in an open
/// period and still point at an issue.
const TRACKED_LINKS: &str = "
FROM links l
INNER JOIN tasks t ON t.id = l.task_id
LEFT JOIN periods p ON p.id = t.period_id
WHERE l.done = 0
   OR (l.issue_id IS NOT NULL
       AND t.done = 0
       AND (p.closed IS NULL OR p.closed = 0))
ORDER BY l.id
";

/// Open links whose task is done, sits in a closed period, or is gone.
const LINKS_TO_CLOSE: &str = "
FROM links l
LEFT JOIN tasks t ON t.id = l.task_id
LEFT JOIN periods p ON p.id = t.period_id
WHERE l.done = 0
  AND (p.closed = 1 OR t.done = 1 OR t.id IS NULL)
ORDER BY l.id
";

fn read_task_row(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        notes: row.get(3)?,
        client: row.get(4)?,
        contact: row.get(5)?,
        project: row.get(6)?,
        budget: row.get(7)?,
        due: row.get(8)?,
        kind: row.get(9)?,
        priority: row.get(10)?,
        progress: row.get(11)?,
        done: row.get(12)?,
        start: row.get(13)?,
        end: row.get(14)?,
        period_id: row.get(15)?,
        work: Vec::new(),
    })
}

fn read_link_row(row: &rusqlite::Row) -> rusqlite::Result<Link> {
    Ok(Link {
        id: row.get(0)?,
        task_id: row.get(1)?,
        issue: row.get::<_, Option<i64>>(2)?.map(|n| n as u64),
        checksum: row.get(3)?,
        done: row.get(4)?,
        modified: row.get(5)?,
    })
}

fn read_period_row(row: &rusqlite::Row) -> rusqlite::Result<Period> {
    Ok(Period {
        id: row.get(0)?,
        start: row.get(1)?,
        end: row.get(2)?,
        closed: row.get(3)?,
    })
}

fn load_work(conn: &Connection, task_id: i64) -> rusqlite::Result<Vec<WorkEntry>> {
    let mut stmt = conn.prepare_cached(
        "SELECT w.user_id, u.nick, w.hours
         FROM work w INNER JOIN users u ON u.id = w.user_id
         WHERE w.task_id = ?1
         ORDER BY w.id",
    )?;
    let rows = stmt.query_map([task_id], |row| {
        Ok(WorkEntry {
            user_id: row.get(0)?,
            nick: row.get(1)?,
            hours: row.get(2)?,
        })
    })?;
    rows.collect()
}

fn with_work(conn: &Connection, mut task: Task) -> rusqlite::Result<Task> {
    task.work = load_work(conn, task.id)?;
    Ok(task)
}

fn query_links(conn: &Connection, from_where: &str) -> rusqlite::Result<Vec<Link>> {
    let mut stmt = conn.prepare(&format!("SELECT {LINK_COLUMNS} {from_where}"))?;
    let rows = stmt.query_map([], read_link_row)?;
    rows.collect()
}

pub fn find_task(conn: &Connection, id: i64) -> rusqlite::Result<Option<Task>> {
    let task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks t WHERE t.id = ?1"),
            [id],
            read_task_row,
        )
        .optional()?;
    task.map(|t| with_work(conn, t)).transpose()
}

pub fn unlinked_open_tasks(conn: &Connection) -> rusqlite::Result<Vec<Task>> {
    let tasks: Vec<Task> = {
        let mut stmt = conn.prepare(&format!("SELECT {TASK_COLUMNS} {UNLINKED_OPEN_TASKS}"))?;
        let rows = stmt.query_map([], read_task_row)?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    tasks.into_iter().map(|t| with_work(conn, t)).collect()
}

pub fn tracked_links(conn: &Connection) -> rusqlite::Result<Vec<Link>> {
    query_links(conn, TRACKED_LINKS)
}

pub fn links_to_close(conn: &Connection) -> rusqlite::Result<Vec<Link>> {
    query_links(conn, LINKS_TO_CLOSE)
}

pub fn list_links(conn: &Connection, open_only: bool) -> rusqlite::Result<Vec<Link>> {
    let filter = if open_only { "WHERE l.done = 0" } else { "" };
    query_links(conn, &format!("FROM links l {filter} ORDER BY l.id"))
}

/// An open link whose last-synced content hashes to `checksum`.
pub fn open_link_by_checksum(conn: &Connection, checksum: &str) -> rusqlite::Result<Option<Link>> {
    conn.query_row(
        &format!(
            "SELECT {LINK_COLUMNS} FROM links l WHERE l.checksum = ?1 AND l.done = 0 ORDER BY l.id LIMIT 1"
        ),
        [checksum],
        read_link_row,
    )
    .optional()
}

pub fn link_by_issue(conn: &Connection, number: u64) -> rusqlite::Result<Option<Link>> {
    conn.query_row(
        &format!("SELECT {LINK_COLUMNS} FROM links l WHERE l.issue_id = ?1"),
        [number as i64],
        read_link_row,
    )
    .optional()
}

pub fn find_period(conn: &Connection, id: i64) -> rusqlite::Result<Option<Period>> {
    conn.query_row(
        &format!("SELECT {PERIOD_COLUMNS} FROM periods WHERE id = ?1"),
        [id],
        read_period_row,
    )
    .optional()
}

/// The earliest open period that has not started yet.
pub fn next_period(conn: &Connection, today: NaiveDate) -> rusqlite::Result<Option<Period>> {
    conn.query_row(
        &format!(
            "SELECT {PERIOD_COLUMNS} FROM periods WHERE starts_on > ?1 AND closed = 0 ORDER BY starts_on, id LIMIT 1"
        ),
        [today],
        read_period_row,
    )
    .optional()
}

/// The open period that ends last.
pub fn latest_open_period(conn: &Connection) -> rusqlite::Result<Option<Period>> {
    conn.query_row(
        &format!(
            "SELECT {PERIOD_COLUMNS} FROM periods WHERE closed = 0 ORDER BY ends_on DESC, id DESC LIMIT 1"
        ),
        [],
        read_period_row,
    )
    .optional()
}

pub fn user_by_nick(conn: &Connection, nick: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        "SELECT id, nick FROM users WHERE nick = ?1",
        [nick],
        |row| {
            Ok(User {
                id: row.get(0)?,
                nick: row.get(1)?,
            })
        },
    )
    .optional()
}

pub fn last_link_modified(conn: &Connection) -> rusqlite::Result<Option<DateTime<Utc>>> {
    conn.query_row(
        "SELECT modified FROM links ORDER BY modified DESC LIMIT 1",
        [],
        |row| row.get(0),
    )
    .optional()
}

/// Insert the task when it has no id yet, update it otherwise. Work entries
/// are replaced wholesale.
pub fn save_task(conn: &Connection, task: &mut Task) -> rusqlite::Result<()> {
    let values = params![
        task.name,
        task.description,
        task.notes,
        task.client,
        task.contact,
        task.project,
        task.budget,
        task.due,
        task.kind,
        task.priority,
        task.progress,
        task.done,
        task.start,
        task.end,
        task.period_id,
    ];
    if task.is_persisted() {
        let mut all = values.to_vec();
        all.push(&task.id);
        conn.execute(UPDATE_TASK, all.as_slice())?;
    } else {
        conn.execute(INSERT_TASK, values)?;
        task.id = conn.last_insert_rowid();
    }

    conn.execute("DELETE FROM work WHERE task_id = ?1", [task.id])?;
    for entry in &task.work {
        conn.execute(
            "INSERT INTO work (task_id, user_id, hours) VALUES (?1, ?2, ?3)",
            params![task.id, entry.user_id, entry.hours],
        )?;
    }
    Ok(())
}

/// Insert or update a link and stamp its modification time. `task_id` is
/// written back exactly as loaded, so a link whose task was deleted keeps
/// pointing at the old id.
pub fn save_link(conn: &Connection, link: &mut Link) -> rusqlite::Result<()> {
    let modified = Utc::now();
    let issue = link.issue.map(|n| n as i64);
    if link.id == 0 {
        conn.execute(
            INSERT_LINK,
            params![link.task_id, issue, link.checksum, link.done, modified],
        )?;
        link.id = conn.last_insert_rowid();
    } else {
        conn.execute(
            UPDATE_LINK,
            params![link.task_id, issue, link.checksum, link.done, modified, link.id],
        )?;
    }
    link.modified = Some(modified);
    Ok(())
}

pub fn insert_period(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
    closed: bool,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO periods (starts_on, ends_on, closed) VALUES (?1, ?2, ?3)",
        params![start, end, closed],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_user(conn: &Connection, nick: &str) -> rusqlite::Result<i64> {
    conn.execute("INSERT INTO users (nick) VALUES (?1)", [nick])?;
    Ok(conn.last_insert_rowid())
}
