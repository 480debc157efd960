use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::dbfile;
use crate::layout::{self, Layout};
use crate::meta::{self, NewSnapshot, PendingOp, SnapshotRecord};
use crate::registry::ConnectionRegistry;
use crate::timeline::{self, EventPayload};
use crate::workspace::WorkspaceError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SnapshotView {
    pub id: i64,
    pub branch: String,
    pub file_name: String,
    pub name: String,
    pub description: Option<String>,
    pub size_bytes: i64,
    pub created_at: String,
    pub file_exists: bool,
}

fn view(layout: &Layout, record: SnapshotRecord) -> SnapshotView {
    let file_exists = layout.snapshot_path(&record.file_name).exists();
    SnapshotView {
        id: record.id,
        branch: record.branch,
        file_name: record.file_name,
        name: record.name,
        description: record.description,
        size_bytes: record.size_bytes,
        created_at: record.created_at,
        file_exists,
    }
}

/// Captures the branch's backing file into `snapshots/`. The WAL is
/// checkpointed first so the copied bytes are a complete image.
pub fn create(
    meta: &Connection,
    registry: &mut ConnectionRegistry,
    layout: &Layout,
    branch: &str,
    name: &str,
    description: Option<&str>,
) -> Result<SnapshotView, WorkspaceError> {
    if name.trim().is_empty() {
        return Err(WorkspaceError::InvalidArgument(
            "snapshot name cannot be empty".to_string(),
        ));
    }
    let record = meta::get_branch(meta, branch)?
        .ok_or_else(|| WorkspaceError::NotFound(format!("branch '{branch}' not found")))?;

    let conn = registry.acquire(branch, &layout.branch_path(&record.file_name))?;
    dbfile::checkpoint_wal(conn).map_err(WorkspaceError::Sql)?;

    std::fs::create_dir_all(layout.snapshots_dir())?;
    let file_name = unused_snapshot_file_name(layout, branch);
    let size = std::fs::copy(
        layout.branch_path(&record.file_name),
        layout.snapshot_path(&file_name),
    )?;

    let created_at = meta::now_utc_rfc3339();
    let id = meta::insert_snapshot(
        meta,
        &NewSnapshot {
            branch,
            file_name: &file_name,
            name,
            description,
            size_bytes: size as i64,
            created_at: &created_at,
        },
    )?;

    timeline::record(
        meta,
        branch,
        &EventPayload::SnapshotCreated {
            id,
            name: name.to_string(),
        },
    )?;

    Ok(SnapshotView {
        id,
        branch: branch.to_string(),
        file_name,
        name: name.to_string(),
        description: description.map(str::to_string),
        size_bytes: size as i64,
        created_at,
        file_exists: true,
    })
}

/// Restores a snapshot into its owning branch. Cross-branch restore is
/// categorically refused: it would swap branch identity outside
/// promote's auditable path.
pub fn restore(
    meta: &Connection,
    registry: &mut ConnectionRegistry,
    layout: &Layout,
    branch: &str,
    id: i64,
) -> Result<(), WorkspaceError> {
    let snapshot = meta::get_snapshot(meta, id)?
        .ok_or_else(|| WorkspaceError::NotFound(format!("snapshot {id} not found")))?;
    if snapshot.branch != branch {
        return Err(WorkspaceError::Conflict(format!(
            "snapshot {id} belongs to branch '{}', not '{branch}'",
            snapshot.branch
        )));
    }
    let source = layout.snapshot_path(&snapshot.file_name);
    if !source.exists() {
        return Err(WorkspaceError::NotFound(format!(
            "snapshot {id} bytes are gone: {}",
            snapshot.file_name
        )));
    }
    let record = meta::get_branch(meta, branch)?
        .ok_or_else(|| WorkspaceError::NotFound(format!("branch '{branch}' not found")))?;

    let marker = PendingOp {
        id: Uuid::now_v7().to_string(),
        kind: "snapshot.restore".to_string(),
        branch: branch.to_string(),
        detail: format!("restore {} -> {}", snapshot.file_name, record.file_name),
        started_at: meta::now_utc_rfc3339(),
    };
    meta::insert_pending_op(meta, &marker)?;

    registry.release(branch);
    let target = layout.branch_path(&record.file_name);
    std::fs::copy(&source, &target)?;
    dbfile::remove_side_files(&target)?;

    meta::clear_pending_op(meta, &marker.id)?;
    timeline::record(
        meta,
        branch,
        &EventPayload::SnapshotRestored {
            id,
            name: snapshot.name,
        },
    )?;
    Ok(())
}

/// Removes the metadata row only; the copied bytes stay on disk until
/// an explicit purge.
pub fn delete(
    meta: &Connection,
    branch: &str,
    id: i64,
) -> Result<(), WorkspaceError> {
    let snapshot = meta::get_snapshot(meta, id)?
        .ok_or_else(|| WorkspaceError::NotFound(format!("snapshot {id} not found")))?;
    if snapshot.branch != branch {
        return Err(WorkspaceError::Conflict(format!(
            "snapshot {id} belongs to branch '{}', not '{branch}'",
            snapshot.branch
        )));
    }

    meta::delete_snapshot_row(meta, id)?;
    timeline::record(meta, branch, &EventPayload::SnapshotDeleted { id })?;
    Ok(())
}

pub fn list(
    meta: &Connection,
    layout: &Layout,
    branch: &str,
) -> Result<Vec<SnapshotView>, WorkspaceError> {
    Ok(meta::list_snapshots(meta, branch)?
        .into_iter()
        .map(|record| view(layout, record))
        .collect())
}

pub fn get(meta: &Connection, layout: &Layout, id: i64) -> Result<SnapshotView, WorkspaceError> {
    let record = meta::get_snapshot(meta, id)?
        .ok_or_else(|| WorkspaceError::NotFound(format!("snapshot {id} not found")))?;
    Ok(view(layout, record))
}

fn unused_snapshot_file_name(layout: &Layout, branch: &str) -> String {
    let base = format!(
        "{}_{}",
        layout::sanitize_component(branch),
        meta::filename_timestamp()
    );
    let mut candidate = format!("{base}.db");
    let mut counter = 2;
    while layout.snapshot_path(&candidate).exists() {
        candidate = format!("{base}-{counter}.db");
        counter += 1;
    }
    candidate
}
