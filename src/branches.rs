use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::dbfile;
use crate::layout::{self, Layout};
use crate::meta::{self, BranchRecord, PendingOp};
use crate::registry::ConnectionRegistry;
use crate::snapshots;
use crate::timeline::{self, EventPayload};
use crate::workspace::WorkspaceError;

pub const MAIN_BRANCH: &str = "main";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BranchView {
    pub name: String,
    pub file_name: String,
    pub created_from: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
    pub is_current: bool,
}

impl BranchView {
    fn from_record(record: BranchRecord, current: &str) -> Self {
        Self {
            is_current: record.name == current,
            name: record.name,
            file_name: record.file_name,
            created_from: record.created_from,
            description: record.description,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BranchListing {
    pub current: String,
    pub branches: Vec<BranchView>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SwitchOutcome {
    pub previous: String,
    pub current: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PromoteOutcome {
    pub source: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BranchStats {
    pub branch: BranchView,
    pub table_count: i64,
    pub applied_migrations: i64,
    pub snapshots: i64,
    pub events: i64,
    pub file_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed_backing_files: Vec<String>,
    pub removed_snapshot_files: Vec<String>,
}

pub fn list(meta: &Connection, current: &str) -> Result<BranchListing, WorkspaceError> {
    let branches = meta::list_branches(meta)?
        .into_iter()
        .map(|record| BranchView::from_record(record, current))
        .collect();
    Ok(BranchListing {
        current: current.to_string(),
        branches,
    })
}

pub fn get(meta: &Connection, current: &str, name: &str) -> Result<BranchView, WorkspaceError> {
    let record = meta::get_branch(meta, name)?
        .ok_or_else(|| WorkspaceError::NotFound(format!("branch '{name}' not found")))?;
    Ok(BranchView::from_record(record, current))
}

/// Creates a branch as a checkpointed byte copy of its base. A base is
/// mandatory: every branch's lineage must be recorded at birth.
pub fn create(
    meta: &Connection,
    registry: &mut ConnectionRegistry,
    layout: &Layout,
    name: &str,
    base: &str,
    description: Option<&str>,
) -> Result<BranchView, WorkspaceError> {
    validate_name(name)?;
    if meta::get_branch(meta, name)?.is_some() {
        return Err(WorkspaceError::Conflict(format!(
            "branch '{name}' already exists"
        )));
    }
    let base_record = meta::get_branch(meta, base)?
        .ok_or_else(|| WorkspaceError::NotFound(format!("base branch '{base}' not found")))?;

    let file_name = layout::branch_file_name(name);
    if layout.branch_path(&file_name).exists() {
        return Err(WorkspaceError::Conflict(format!(
            "backing file '{file_name}' already exists (run purge or pick another name)"
        )));
    }

    // Flush the base WAL so the byte copy below is a consistent image,
    // then drop the handle before touching the file.
    let base_path = layout.branch_path(&base_record.file_name);
    let base_conn = registry.acquire(base, &base_path)?;
    dbfile::checkpoint_wal(base_conn).map_err(WorkspaceError::Sql)?;
    registry.release(base);

    let marker = PendingOp {
        id: Uuid::now_v7().to_string(),
        kind: "branch.create".to_string(),
        branch: name.to_string(),
        detail: format!("copy {} -> {}", base_record.file_name, file_name),
        started_at: meta::now_utc_rfc3339(),
    };
    meta::insert_pending_op(meta, &marker)?;

    dbfile::copy_backing_file(&base_path, &layout.branch_path(&file_name))?;

    let record = BranchRecord {
        name: name.to_string(),
        file_name,
        created_from: Some(base.to_string()),
        description: description.map(str::to_string),
        created_at: meta::now_utc_rfc3339(),
    };
    meta::insert_branch(meta, &record)?;
    meta::clear_pending_op(meta, &marker.id)?;

    // Every branch gets a restorable origin.
    snapshots::create(
        meta,
        registry,
        layout,
        name,
        "creation",
        Some("automatic snapshot at branch creation"),
    )?;

    // Lineage is discoverable from either side.
    timeline::record(
        meta,
        base,
        &EventPayload::BranchForked {
            name: name.to_string(),
        },
    )?;
    timeline::record(
        meta,
        name,
        &EventPayload::BranchCreated {
            from: base.to_string(),
        },
    )?;

    Ok(BranchView::from_record(record, ""))
}

/// Metadata-only: moves the current-branch pointer and releases the
/// previous branch's handle. The target opens lazily on next use.
pub fn switch(
    meta: &Connection,
    registry: &mut ConnectionRegistry,
    current: &str,
    name: &str,
) -> Result<SwitchOutcome, WorkspaceError> {
    if name == current {
        return Ok(SwitchOutcome {
            previous: current.to_string(),
            current: name.to_string(),
        });
    }
    if meta::get_branch(meta, name)?.is_none() {
        return Err(WorkspaceError::NotFound(format!("branch '{name}' not found")));
    }

    registry.release(current);
    meta::set_current_branch(meta, name)?;
    timeline::record(
        meta,
        name,
        &EventPayload::BranchSwitched {
            from: current.to_string(),
        },
    )?;

    Ok(SwitchOutcome {
        previous: current.to_string(),
        current: name.to_string(),
    })
}

/// Removes the logical branch. The backing file stays on disk: the
/// metadata delete is reversible, a file delete is not. Migration
/// application rows also stay, keeping catalog delete-protection
/// sticky.
pub fn delete(
    meta: &Connection,
    registry: &mut ConnectionRegistry,
    current: &str,
    name: &str,
) -> Result<(), WorkspaceError> {
    if name == MAIN_BRANCH {
        return Err(WorkspaceError::Conflict(
            "branch 'main' cannot be deleted".to_string(),
        ));
    }
    if name == current {
        return Err(WorkspaceError::Conflict(format!(
            "branch '{name}' is the current branch; switch away before deleting"
        )));
    }
    if meta::get_branch(meta, name)?.is_none() {
        return Err(WorkspaceError::NotFound(format!("branch '{name}' not found")));
    }

    if registry.is_live(name) {
        registry.release(name);
    }
    meta::delete_branch_row(meta, name)?;
    meta::delete_snapshots_for_branch(meta, name)?;
    meta::clear_events(meta, name)?;

    timeline::record(
        meta,
        current,
        &EventPayload::BranchDeleted {
            name: name.to_string(),
        },
    )?;
    Ok(())
}

/// The system's only merge primitive: full-state replacement of the
/// target's backing file with the source's.
pub fn promote(
    meta: &Connection,
    registry: &mut ConnectionRegistry,
    layout: &Layout,
    source: &str,
    target: &str,
    create_snapshot: bool,
) -> Result<PromoteOutcome, WorkspaceError> {
    if source == target {
        return Err(WorkspaceError::InvalidArgument(format!(
            "cannot promote branch '{source}' onto itself"
        )));
    }
    let source_record = meta::get_branch(meta, source)?
        .ok_or_else(|| WorkspaceError::NotFound(format!("branch '{source}' not found")))?;
    let target_record = meta::get_branch(meta, target)?
        .ok_or_else(|| WorkspaceError::NotFound(format!("branch '{target}' not found")))?;

    let source_path = layout.branch_path(&source_record.file_name);
    let target_path = layout.branch_path(&target_record.file_name);

    let source_conn = registry.acquire(source, &source_path)?;
    dbfile::checkpoint_wal(source_conn).map_err(WorkspaceError::Sql)?;
    let target_conn = registry.acquire(target, &target_path)?;
    dbfile::checkpoint_wal(target_conn).map_err(WorkspaceError::Sql)?;

    // Rollback point before the target's state is overwritten.
    let snapshot_id = if create_snapshot {
        let snapshot = snapshots::create(
            meta,
            registry,
            layout,
            target,
            "pre-promote",
            Some(&format!("state before promoting '{source}'")),
        )?;
        Some(snapshot.id)
    } else {
        None
    };

    registry.release(source);
    registry.release(target);

    let marker = PendingOp {
        id: Uuid::now_v7().to_string(),
        kind: "branch.promote".to_string(),
        branch: target.to_string(),
        detail: format!("copy {} -> {}", source_record.file_name, target_record.file_name),
        started_at: meta::now_utc_rfc3339(),
    };
    meta::insert_pending_op(meta, &marker)?;

    dbfile::copy_backing_file(&source_path, &target_path)?;

    meta::clear_pending_op(meta, &marker.id)?;

    timeline::record(
        meta,
        source,
        &EventPayload::BranchPromotedTo {
            target: target.to_string(),
        },
    )?;
    timeline::record(
        meta,
        target,
        &EventPayload::BranchPromotedFrom {
            source: source.to_string(),
            snapshot_id,
        },
    )?;

    Ok(PromoteOutcome {
        source: source.to_string(),
        target: target.to_string(),
        snapshot_id,
    })
}

pub fn stats(
    meta: &Connection,
    registry: &mut ConnectionRegistry,
    layout: &Layout,
    current: &str,
    name: &str,
) -> Result<BranchStats, WorkspaceError> {
    let record = meta::get_branch(meta, name)?
        .ok_or_else(|| WorkspaceError::NotFound(format!("branch '{name}' not found")))?;
    let path = layout.branch_path(&record.file_name);

    let conn = registry.acquire(name, &path)?;
    let table_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            [],
            |row| row.get(0),
        )
        .map_err(WorkspaceError::Sql)?;

    Ok(BranchStats {
        applied_migrations: meta::count_applications(meta, name)?,
        snapshots: meta::count_snapshots(meta, name)?,
        events: meta::count_events(meta, Some(name))?,
        file_size_bytes: dbfile::file_size(&path)?,
        table_count,
        branch: BranchView::from_record(record, current),
    })
}

/// Explicit garbage collection for the files that delete intentionally
/// leaves behind: backing files without a branch row and snapshot
/// files without a snapshot row.
pub fn purge(meta: &Connection, layout: &Layout) -> Result<PurgeReport, WorkspaceError> {
    let mut report = PurgeReport::default();

    let referenced: Vec<String> = meta::list_branches(meta)?
        .into_iter()
        .map(|record| record.file_name)
        .collect();
    for entry in std::fs::read_dir(layout.root())? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|value| value.to_str()) else {
            continue;
        };
        if !name.ends_with(".db") || referenced.iter().any(|kept| kept == name) {
            continue;
        }
        std::fs::remove_file(&path)?;
        dbfile::remove_side_files(&path)?;
        report.removed_backing_files.push(name.to_string());
    }

    let referenced: Vec<String> = meta::list_all_snapshots(meta)?
        .into_iter()
        .map(|record| record.file_name)
        .collect();
    let snapshots_dir = layout.snapshots_dir();
    if snapshots_dir.exists() {
        for entry in std::fs::read_dir(&snapshots_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|value| value.to_str()) else {
                continue;
            };
            if referenced.iter().any(|kept| kept == name) {
                continue;
            }
            std::fs::remove_file(&path)?;
            report.removed_snapshot_files.push(name.to_string());
        }
    }

    report.removed_backing_files.sort();
    report.removed_snapshot_files.sort();
    Ok(report)
}

pub fn validate_name(name: &str) -> Result<(), WorkspaceError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '/'));
    if valid {
        Ok(())
    } else {
        Err(WorkspaceError::InvalidArgument(format!(
            "invalid branch name '{name}': use only letters, digits, '-', '_', '/'"
        )))
    }
}
