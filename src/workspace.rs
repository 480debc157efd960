use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;

use crate::branches::{
    self, BranchListing, BranchStats, BranchView, PromoteOutcome, PurgeReport, SwitchOutcome,
    MAIN_BRANCH,
};
use crate::dbfile;
use crate::layout::{self, Layout};
use crate::locks::{LockError, WorkspaceLock};
use crate::meta::{self, BranchRecord, PendingOp};
use crate::migrations::{self, ApplyOutcome, MigrationStatus, MigrationView};
use crate::registry::{ConnectionRegistry, RegistryError};
use crate::snapshots::{self, SnapshotView};
use crate::timeline::{self, TimelinePage, TimelineStats};

const LOCK_TIMEOUT: Duration = Duration::from_millis(2000);

/// Composition root for one project. Owns the metadata store, the
/// connection registry, and the process lock. Engines never read
/// ambient state: the current-branch pointer is resolved here, once
/// per call, and passed into every engine function explicitly.
#[derive(Debug)]
pub struct Workspace {
    layout: Layout,
    meta: Connection,
    registry: ConnectionRegistry,
    _lock: WorkspaceLock,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DoctorReport {
    pub pending_operations: Vec<PendingOpView>,
    pub branches_missing_backing_file: Vec<String>,
    pub snapshots_missing_file: Vec<i64>,
}

impl DoctorReport {
    pub fn is_healthy(&self) -> bool {
        self.pending_operations.is_empty()
            && self.branches_missing_backing_file.is_empty()
            && self.snapshots_missing_file.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PendingOpView {
    pub id: String,
    pub kind: String,
    pub branch: String,
    pub detail: String,
    pub started_at: String,
}

impl From<PendingOp> for PendingOpView {
    fn from(op: PendingOp) -> Self {
        Self {
            id: op.id,
            kind: op.kind,
            branch: op.branch,
            detail: op.detail,
            started_at: op.started_at,
        }
    }
}

impl Workspace {
    /// Opens (initializing on first use) the workspace at `root`.
    /// Seeds the `main` branch with an empty backing file, takes the
    /// process lock, and leaves any interrupted-operation markers in
    /// place for `doctor` to report: reconciliation is the caller's
    /// call, never automatic.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let layout = Layout::new(root);
        layout.ensure_dirs()?;
        let lock = WorkspaceLock::acquire(&layout.lock_path(), LOCK_TIMEOUT)?;
        let meta = meta::open_meta(&layout.meta_db_path())?;

        let mut workspace = Self {
            layout,
            meta,
            registry: ConnectionRegistry::new(),
            _lock: lock,
        };
        workspace.seed_main()?;
        Ok(workspace)
    }

    fn seed_main(&mut self) -> Result<(), WorkspaceError> {
        if meta::get_branch(&self.meta, MAIN_BRANCH)?.is_none() {
            let file_name = layout::branch_file_name(MAIN_BRANCH);
            let path = self.layout.branch_path(&file_name);
            if !path.exists() {
                // Opening creates an empty database file.
                dbfile::open_branch_connection(&path)?;
            }
            meta::insert_branch(
                &self.meta,
                &BranchRecord {
                    name: MAIN_BRANCH.to_string(),
                    file_name,
                    created_from: None,
                    description: Some("default branch".to_string()),
                    created_at: meta::now_utc_rfc3339(),
                },
            )?;
        }
        if meta::current_branch(&self.meta)?.is_none() {
            meta::set_current_branch(&self.meta, MAIN_BRANCH)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &std::path::Path {
        self.layout.root()
    }

    /// The persisted current-branch pointer. Always names an existing
    /// branch; only `switch` mutates it.
    pub fn current_branch(&self) -> Result<String, WorkspaceError> {
        match meta::current_branch(&self.meta)? {
            Some(branch) => Ok(branch),
            None => Err(WorkspaceError::NotFound(
                "current-branch pointer is unset".to_string(),
            )),
        }
    }

    // ----- branches -----

    pub fn branch_list(&self) -> Result<BranchListing, WorkspaceError> {
        let current = self.current_branch()?;
        branches::list(&self.meta, &current)
    }

    pub fn branch_current(&self) -> Result<BranchView, WorkspaceError> {
        let current = self.current_branch()?;
        branches::get(&self.meta, &current, &current)
    }

    pub fn branch_create(
        &mut self,
        name: &str,
        base: &str,
        description: Option<&str>,
    ) -> Result<BranchView, WorkspaceError> {
        let current = self.current_branch()?;
        let created = branches::create(
            &self.meta,
            &mut self.registry,
            &self.layout,
            name,
            base,
            description,
        )?;
        branches::get(&self.meta, &current, &created.name)
    }

    pub fn branch_switch(&mut self, name: &str) -> Result<SwitchOutcome, WorkspaceError> {
        let current = self.current_branch()?;
        branches::switch(&self.meta, &mut self.registry, &current, name)
    }

    pub fn branch_delete(&mut self, name: &str) -> Result<(), WorkspaceError> {
        let current = self.current_branch()?;
        branches::delete(&self.meta, &mut self.registry, &current, name)
    }

    pub fn branch_promote(
        &mut self,
        source: &str,
        target: &str,
        create_snapshot: bool,
    ) -> Result<PromoteOutcome, WorkspaceError> {
        branches::promote(
            &self.meta,
            &mut self.registry,
            &self.layout,
            source,
            target,
            create_snapshot,
        )
    }

    pub fn branch_stats(&mut self, name: &str) -> Result<BranchStats, WorkspaceError> {
        let current = self.current_branch()?;
        branches::stats(&self.meta, &mut self.registry, &self.layout, &current, name)
    }

    pub fn purge(&mut self) -> Result<PurgeReport, WorkspaceError> {
        branches::purge(&self.meta, &self.layout)
    }

    // ----- migrations -----

    pub fn migration_list(&self) -> Result<Vec<MigrationView>, WorkspaceError> {
        let current = self.current_branch()?;
        migrations::list(&self.meta, &self.layout, &current)
    }

    pub fn migration_create(&self, name: &str, sql: &str) -> Result<String, WorkspaceError> {
        let current = self.current_branch()?;
        migrations::create(&self.meta, &self.layout, &current, name, sql)
    }

    pub fn migration_apply(&mut self, filename: &str) -> Result<(), WorkspaceError> {
        let current = self.current_branch()?;
        migrations::apply(&self.meta, &mut self.registry, &self.layout, &current, filename)
    }

    pub fn migration_apply_all(&mut self) -> Result<Vec<ApplyOutcome>, WorkspaceError> {
        let current = self.current_branch()?;
        migrations::apply_all(&self.meta, &mut self.registry, &self.layout, &current)
    }

    pub fn migration_delete(&self, filename: &str) -> Result<(), WorkspaceError> {
        let current = self.current_branch()?;
        migrations::delete(&self.meta, &self.layout, &current, filename)
    }

    pub fn migration_status(&self, filename: &str) -> Result<MigrationStatus, WorkspaceError> {
        migrations::status(&self.meta, &self.layout, filename)
    }

    // ----- snapshots -----

    pub fn snapshot_create(
        &mut self,
        name: &str,
        description: Option<&str>,
    ) -> Result<SnapshotView, WorkspaceError> {
        let current = self.current_branch()?;
        snapshots::create(
            &self.meta,
            &mut self.registry,
            &self.layout,
            &current,
            name,
            description,
        )
    }

    pub fn snapshot_restore(&mut self, id: i64) -> Result<(), WorkspaceError> {
        let current = self.current_branch()?;
        snapshots::restore(&self.meta, &mut self.registry, &self.layout, &current, id)
    }

    pub fn snapshot_delete(&mut self, id: i64) -> Result<(), WorkspaceError> {
        let current = self.current_branch()?;
        snapshots::delete(&self.meta, &current, id)
    }

    pub fn snapshot_list(&self) -> Result<Vec<SnapshotView>, WorkspaceError> {
        let current = self.current_branch()?;
        snapshots::list(&self.meta, &self.layout, &current)
    }

    pub fn snapshot_get(&self, id: i64) -> Result<SnapshotView, WorkspaceError> {
        snapshots::get(&self.meta, &self.layout, id)
    }

    // ----- timeline -----

    pub fn timeline_query(
        &self,
        branch: Option<&str>,
        limit: i64,
        offset: i64,
        all_branches: bool,
    ) -> Result<TimelinePage, WorkspaceError> {
        if all_branches {
            return timeline::query(&self.meta, None, limit, offset);
        }
        let scoped = match branch {
            Some(name) => {
                if meta::get_branch(&self.meta, name)?.is_none() {
                    return Err(WorkspaceError::NotFound(format!(
                        "branch '{name}' not found"
                    )));
                }
                name.to_string()
            }
            None => self.current_branch()?,
        };
        timeline::query(&self.meta, Some(&scoped), limit, offset)
    }

    pub fn timeline_stats(&self, branch: Option<&str>) -> Result<TimelineStats, WorkspaceError> {
        let scoped = match branch {
            Some(name) => name.to_string(),
            None => self.current_branch()?,
        };
        timeline::stats(&self.meta, &scoped)
    }

    pub fn timeline_clear(&self, branch: Option<&str>) -> Result<i64, WorkspaceError> {
        let scoped = match branch {
            Some(name) => name.to_string(),
            None => self.current_branch()?,
        };
        timeline::clear(&self.meta, &scoped)
    }

    // ----- diagnostics -----

    /// Interrupted-operation markers plus file/metadata drift. Reports
    /// only; repair stays with the caller.
    pub fn doctor(&self) -> Result<DoctorReport, WorkspaceError> {
        let pending_operations = meta::list_pending_ops(&self.meta)?
            .into_iter()
            .map(PendingOpView::from)
            .collect();

        let mut branches_missing_backing_file = Vec::new();
        for record in meta::list_branches(&self.meta)? {
            if !self.layout.branch_path(&record.file_name).exists() {
                branches_missing_backing_file.push(record.name);
            }
        }

        let mut snapshots_missing_file = Vec::new();
        for record in meta::list_all_snapshots(&self.meta)? {
            if !self.layout.snapshot_path(&record.file_name).exists() {
                snapshots_missing_file.push(record.id);
            }
        }

        Ok(DoctorReport {
            pending_operations,
            branches_missing_backing_file,
            snapshots_missing_file,
        })
    }
}

#[derive(Debug)]
pub enum WorkspaceError {
    InvalidArgument(String),
    NotFound(String),
    Conflict(String),
    Sql(rusqlite::Error),
    Db(rusqlite::Error),
    Io(std::io::Error),
    Lock(LockError),
}

impl fmt::Display for WorkspaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceError::InvalidArgument(message) => write!(f, "{}", message),
            WorkspaceError::NotFound(message) => write!(f, "{}", message),
            WorkspaceError::Conflict(message) => write!(f, "conflict: {}", message),
            WorkspaceError::Sql(err) => write!(f, "sql execution failed: {}", err),
            WorkspaceError::Db(err) => write!(f, "metadata store error: {}", err),
            WorkspaceError::Io(err) => write!(f, "I/O error: {}", err),
            WorkspaceError::Lock(err) => write!(f, "{}", err),
        }
    }
}

impl Error for WorkspaceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkspaceError::InvalidArgument(_)
            | WorkspaceError::NotFound(_)
            | WorkspaceError::Conflict(_) => None,
            WorkspaceError::Sql(err) => Some(err),
            WorkspaceError::Db(err) => Some(err),
            WorkspaceError::Io(err) => Some(err),
            WorkspaceError::Lock(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for WorkspaceError {
    fn from(value: rusqlite::Error) -> Self {
        WorkspaceError::Db(value)
    }
}

impl From<std::io::Error> for WorkspaceError {
    fn from(value: std::io::Error) -> Self {
        WorkspaceError::Io(value)
    }
}

impl From<LockError> for WorkspaceError {
    fn from(value: LockError) -> Self {
        WorkspaceError::Lock(value)
    }
}

impl From<RegistryError> for WorkspaceError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::MissingBackingFile { branch, path } => WorkspaceError::NotFound(
                format!("backing file for branch '{branch}' not found: {path}"),
            ),
            RegistryError::Db(err) => WorkspaceError::Db(err),
        }
    }
}

#[cfg(test)]
mod tests;
