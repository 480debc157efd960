use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, DatabaseName, Result};

/// Opens a branch backing file with the workspace pragma profile.
/// WAL mode means every copy of the file must be preceded by a
/// checkpoint so pending writes land in the primary file first.
pub fn open_branch_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
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

/// Flushes the write-ahead log into the primary file. TRUNCATE resets
/// the WAL to zero bytes, so a byte-level copy of the primary file
/// afterwards is a complete, consistent image.
pub fn checkpoint_wal(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
    Ok(())
}

pub fn wal_path(db_path: &Path) -> PathBuf {
    side_path(db_path, "-wal")
}

pub fn shm_path(db_path: &Path) -> PathBuf {
    side_path(db_path, "-shm")
}

fn side_path(db_path: &Path, suffix: &str) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Copies a backing file and any WAL/SHM side files that exist next to
/// it. Returns the size of the primary file.
pub fn copy_backing_file(src: &Path, dst: &Path) -> std::io::Result<u64> {
    let size = std::fs::copy(src, dst)?;
    for (side_src, side_dst) in [
        (wal_path(src), wal_path(dst)),
        (shm_path(src), shm_path(dst)),
    ] {
        if side_src.exists() {
            std::fs::copy(&side_src, &side_dst)?;
        } else if side_dst.exists() {
            std::fs::remove_file(&side_dst)?;
        }
    }
    Ok(size)
}

/// Removes stale WAL/SHM side files after a backing file was replaced
/// wholesale. A leftover WAL from the old database would corrupt the
/// restored one on next open.
pub fn remove_side_files(db_path: &Path) -> std::io::Result<()> {
    for side in [wal_path(db_path), shm_path(db_path)] {
        if side.exists() {
            std::fs::remove_file(&side)?;
        }
    }
    Ok(())
}

pub fn file_size(path: &Path) -> std::io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}
