use anyhow::Result;
use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS periods (
    id        INTEGER PRIMARY KEY,
    starts_on TEXT NOT NULL,
    ends_on   TEXT NOT NULL,
    closed    INTEGER NOT NULL DEFAULT 0,
    CHECK (starts_on <= ends_on)
);

CREATE TABLE IF NOT EXISTS users (
    id   INTEGER PRIMARY KEY,
    nick TEXT NOT NULL UNIQUE
);

-- AUTOINCREMENT: a deleted task's id must never come back, links keep it.
CREATE TABLE IF NOT EXISTS tasks (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    notes       TEXT NOT NULL DEFAULT '',
    client      TEXT NOT NULL DEFAULT '',
    contact     TEXT NOT NULL DEFAULT '',
    project     TEXT NOT NULL DEFAULT '',
    budget      TEXT NOT NULL DEFAULT '',
    due         TEXT NOT NULL DEFAULT '',
    kind        INTEGER,
    prio        INTEGER NOT NULL DEFAULT 0,
    progress    INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
    done        INTEGER NOT NULL DEFAULT 0,
    start_date  TEXT,
    end_date    TEXT,
    period_id   INTEGER REFERENCES periods(id)
);

CREATE TABLE IF NOT EXISTS work (
    id      INTEGER PRIMARY KEY,
    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id),
    hours   REAL NOT NULL DEFAULT 0
);

-- task_id has no foreign key: a deleted task leaves its
-- id behind so the link can still be closed as 'deleted'.
CREATE TABLE IF NOT EXISTS links (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id  INTEGER,
    issue_id INTEGER UNIQUE,
    checksum TEXT NOT NULL,
    done     INTEGER NOT NULL DEFAULT 0,
    modified TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS links_task ON links(task_id);
CREATE INDEX IF NOT EXISTS links_checksum ON links(checksum) WHERE done = 0;
";

fn set_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    set_pragmas(&conn)?;
    Ok(conn)
}

pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Open an initialised in-memory database.
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    set_pragmas(&conn)?;
    init(&conn)?;
    Ok(conn)
}

/// Run `f` as one all-or-nothing unit. Uses a SAVEPOINT so it also works
/// nested inside an outer transaction.
pub fn atomic<T, E, F>(conn: &Connection, f: F) -> std::result::Result<T, E>
where
    F: FnOnce(&Connection) -> std::result::Result<T, E>,
    E: From<rusqlite::Error>,
{
    conn.execute_batch("SAVEPOINT sync_item")?;

    match f(conn) {
        Ok(v) => {
            conn.execute_batch("RELEASE sync_item")?;
            Ok(v)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK TO sync_item");
            let _ = conn.execute_batch("RELEASE sync_item");
            Err(e)
        }
    }
}
