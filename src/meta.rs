use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Result};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

struct SchemaMigration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const SCHEMA_MIGRATIONS: [SchemaMigration; 1] = [SchemaMigration {
    version: 1,
    name: "baseline_workspace_schema_v1",
    sql: r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS branches (
    name TEXT PRIMARY KEY,
    file_name TEXT NOT NULL UNIQUE,
    created_from TEXT,
    description TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS migration_applications (
    branch TEXT NOT NULL,
    filename TEXT NOT NULL,
    applied_at TEXT NOT NULL,
    PRIMARY KEY (branch, filename)
);

CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    branch TEXT NOT NULL,
    file_name TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    size_bytes INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    branch TEXT NOT NULL,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_ops (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    branch TEXT NOT NULL,
    detail TEXT NOT NULL,
    started_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_branch ON snapshots(branch);
CREATE INDEX IF NOT EXISTS idx_events_branch ON events(branch);
CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
CREATE INDEX IF NOT EXISTS idx_applications_filename
    ON migration_applications(filename);
"#,
}];

pub fn open_meta(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)?;
    configure(&conn)?;
    apply_schema(&mut conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None::<DatabaseName>, "journal_mode", "WAL")?;
    conn.pragma_update(None::<DatabaseName>, "synchronous", "NORMAL")?;
    conn.pragma_update(None::<DatabaseName>, "foreign_keys", "ON")?;
    conn.pragma_update(None::<DatabaseName>, "busy_timeout", 5000i64)?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(())
}

fn apply_schema(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#,
    )?;

    for migration in SCHEMA_MIGRATIONS {
        let already_applied: Option<i64> = tx
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;

        if already_applied.is_some() {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, now_utc_rfc3339()],
        )?;
    }

    tx.execute(
        r#"
INSERT INTO meta (key, value)
VALUES ('schema_version', ?1)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    tx.commit()
}

pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .expect("RFC3339 formatting for UTC timestamp should never fail")
}

pub fn filename_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO meta (key, value)
VALUES (?1, ?2)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![key, value],
    )?;
    Ok(())
}

pub fn current_branch(conn: &Connection) -> Result<Option<String>> {
    get_meta(conn, "current_branch")
}

pub fn set_current_branch(conn: &Connection, branch: &str) -> Result<()> {
    set_meta(conn, "current_branch", branch)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRecord {
    pub name: String,
    pub file_name: String,
    pub created_from: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
}

fn branch_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BranchRecord> {
    Ok(BranchRecord {
        name: row.get(0)?,
        file_name: row.get(1)?,
        created_from: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub fn insert_branch(conn: &Connection, branch: &BranchRecord) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO branches (name, file_name, created_from, description, created_at)
VALUES (?1, ?2, ?3, ?4, ?5)
"#,
        params![
            branch.name,
            branch.file_name,
            branch.created_from,
            branch.description,
            branch.created_at
        ],
    )?;
    Ok(())
}

pub fn get_branch(conn: &Connection, name: &str) -> Result<Option<BranchRecord>> {
    conn.query_row(
        r#"
SELECT name, file_name, created_from, description, created_at
FROM branches
WHERE name = ?1
"#,
        params![name],
        branch_from_row,
    )
    .optional()
}

/// Branches ordered for display: main first, the rest newest-first.
pub fn list_branches(conn: &Connection) -> Result<Vec<BranchRecord>> {
    let mut stmt = conn.prepare(
        r#"
SELECT name, file_name, created_from, description, created_at
FROM branches
ORDER BY CASE WHEN name = 'main' THEN 0 ELSE 1 END, created_at DESC, name ASC
"#,
    )?;

    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(branch_from_row(row)?);
    }
    Ok(result)
}

pub fn delete_branch_row(conn: &Connection, name: &str) -> Result<()> {
    conn.execute("DELETE FROM branches WHERE name = ?1", params![name])?;
    Ok(())
}

pub fn record_application(
    conn: &Connection,
    branch: &str,
    filename: &str,
    applied_at: &str,
) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO migration_applications (branch, filename, applied_at)
VALUES (?1, ?2, ?3)
"#,
        params![branch, filename, applied_at],
    )?;
    Ok(())
}

pub fn application_applied_at(
    conn: &Connection,
    branch: &str,
    filename: &str,
) -> Result<Option<String>> {
    conn.query_row(
        "SELECT applied_at FROM migration_applications WHERE branch = ?1 AND filename = ?2",
        params![branch, filename],
        |row| row.get(0),
    )
    .optional()
}

pub fn applied_filenames(conn: &Connection, branch: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT filename FROM migration_applications WHERE branch = ?1 ORDER BY filename ASC",
    )?;
    let mut rows = stmt.query(params![branch])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(row.get(0)?);
    }
    Ok(result)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplierRecord {
    pub branch: String,
    pub applied_at: String,
}

/// Every branch that ever recorded an application of this migration,
/// including branches that have since been deleted (history is sticky).
pub fn appliers(conn: &Connection, filename: &str) -> Result<Vec<ApplierRecord>> {
    let mut stmt = conn.prepare(
        r#"
SELECT branch, applied_at
FROM migration_applications
WHERE filename = ?1
ORDER BY applied_at ASC, branch ASC
"#,
    )?;
    let mut rows = stmt.query(params![filename])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(ApplierRecord {
            branch: row.get(0)?,
            applied_at: row.get(1)?,
        });
    }
    Ok(result)
}

pub fn count_applications(conn: &Connection, branch: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM migration_applications WHERE branch = ?1",
        params![branch],
        |row| row.get(0),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub id: i64,
    pub branch: String,
    pub file_name: String,
    pub name: String,
    pub description: Option<String>,
    pub size_bytes: i64,
    pub created_at: String,
}

fn snapshot_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotRecord> {
    Ok(SnapshotRecord {
        id: row.get(0)?,
        branch: row.get(1)?,
        file_name: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        size_bytes: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub struct NewSnapshot<'a> {
    pub branch: &'a str,
    pub file_name: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub size_bytes: i64,
    pub created_at: &'a str,
}

pub fn insert_snapshot(conn: &Connection, snapshot: &NewSnapshot<'_>) -> Result<i64> {
    conn.execute(
        r#"
INSERT INTO snapshots (branch, file_name, name, description, size_bytes, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
        params![
            snapshot.branch,
            snapshot.file_name,
            snapshot.name,
            snapshot.description,
            snapshot.size_bytes,
            snapshot.created_at
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_snapshot(conn: &Connection, id: i64) -> Result<Option<SnapshotRecord>> {
    conn.query_row(
        r#"
SELECT id, branch, file_name, name, description, size_bytes, created_at
FROM snapshots
WHERE id = ?1
"#,
        params![id],
        snapshot_from_row,
    )
    .optional()
}

pub fn list_snapshots(conn: &Connection, branch: &str) -> Result<Vec<SnapshotRecord>> {
    let mut stmt = conn.prepare(
        r#"
SELECT id, branch, file_name, name, description, size_bytes, created_at
FROM snapshots
WHERE branch = ?1
ORDER BY created_at DESC, id DESC
"#,
    )?;
    let mut rows = stmt.query(params![branch])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(snapshot_from_row(row)?);
    }
    Ok(result)
}

pub fn list_all_snapshots(conn: &Connection) -> Result<Vec<SnapshotRecord>> {
    let mut stmt = conn.prepare(
        r#"
SELECT id, branch, file_name, name, description, size_bytes, created_at
FROM snapshots
ORDER BY id ASC
"#,
    )?;
    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(snapshot_from_row(row)?);
    }
    Ok(result)
}

pub fn delete_snapshot_row(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM snapshots WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn delete_snapshots_for_branch(conn: &Connection, branch: &str) -> Result<()> {
    conn.execute("DELETE FROM snapshots WHERE branch = ?1", params![branch])?;
    Ok(())
}

pub fn count_snapshots(conn: &Connection, branch: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM snapshots WHERE branch = ?1",
        params![branch],
        |row| row.get(0),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub id: i64,
    pub branch: String,
    pub kind: String,
    pub payload: String,
    pub created_at: String,
}

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        branch: row.get(1)?,
        kind: row.get(2)?,
        payload: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub fn insert_event(
    conn: &Connection,
    branch: &str,
    kind: &str,
    payload: &str,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO events (branch, kind, payload, created_at)
VALUES (?1, ?2, ?3, ?4)
"#,
        params![branch, kind, payload, created_at],
    )?;
    Ok(())
}

pub fn query_events(
    conn: &Connection,
    branch: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<EventRow>> {
    let mut result = Vec::new();
    match branch {
        Some(branch) => {
            let mut stmt = conn.prepare(
                r#"
SELECT id, branch, kind, payload, created_at
FROM events
WHERE branch = ?1
ORDER BY id DESC
LIMIT ?2 OFFSET ?3
"#,
            )?;
            let mut rows = stmt.query(params![branch, limit, offset])?;
            while let Some(row) = rows.next()? {
                result.push(event_from_row(row)?);
            }
        }
        None => {
            let mut stmt = conn.prepare(
                r#"
SELECT id, branch, kind, payload, created_at
FROM events
ORDER BY id DESC
LIMIT ?1 OFFSET ?2
"#,
            )?;
            let mut rows = stmt.query(params![limit, offset])?;
            while let Some(row) = rows.next()? {
                result.push(event_from_row(row)?);
            }
        }
    }
    Ok(result)
}

pub fn count_events(conn: &Connection, branch: Option<&str>) -> Result<i64> {
    match branch {
        Some(branch) => conn.query_row(
            "SELECT COUNT(*) FROM events WHERE branch = ?1",
            params![branch],
            |row| row.get(0),
        ),
        None => conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventKindCount {
    pub kind: String,
    pub count: i64,
}

pub fn event_stats(conn: &Connection, branch: &str) -> Result<Vec<EventKindCount>> {
    let mut stmt = conn.prepare(
        r#"
SELECT kind, COUNT(*)
FROM events
WHERE branch = ?1
GROUP BY kind
ORDER BY COUNT(*) DESC, kind ASC
"#,
    )?;
    let mut rows = stmt.query(params![branch])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(EventKindCount {
            kind: row.get(0)?,
            count: row.get(1)?,
        });
    }
    Ok(result)
}

pub fn clear_events(conn: &Connection, branch: &str) -> Result<i64> {
    let deleted = conn.execute("DELETE FROM events WHERE branch = ?1", params![branch])?;
    Ok(deleted as i64)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOp {
    pub id: String,
    pub kind: String,
    pub branch: String,
    pub detail: String,
    pub started_at: String,
}

pub fn insert_pending_op(conn: &Connection, op: &PendingOp) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO pending_ops (id, kind, branch, detail, started_at)
VALUES (?1, ?2, ?3, ?4, ?5)
"#,
        params![op.id, op.kind, op.branch, op.detail, op.started_at],
    )?;
    Ok(())
}

pub fn clear_pending_op(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM pending_ops WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn list_pending_ops(conn: &Connection) -> Result<Vec<PendingOp>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, branch, detail, started_at FROM pending_ops ORDER BY started_at ASC",
    )?;
    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(PendingOp {
            id: row.get(0)?,
            kind: row.get(1)?,
            branch: row.get(2)?,
            detail: row.get(3)?,
            started_at: row.get(4)?,
        });
    }
    Ok(result)
}
