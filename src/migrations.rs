use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::layout::Layout;
use crate::meta;
use crate::registry::ConnectionRegistry;
use crate::timeline::{self, EventPayload};
use crate::workspace::WorkspaceError;

pub const SEQUENCE_WIDTH: usize = 3;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MigrationView {
    pub filename: String,
    pub sql: String,
    pub checksum: String,
    pub applied: bool,
    pub applied_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub filename: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ApplierView {
    pub branch: String,
    pub applied_at: String,
    pub branch_exists: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MigrationStatus {
    pub filename: String,
    pub applied_in_branches: Vec<ApplierView>,
    pub can_delete: bool,
}

/// Catalog filenames in apply order. The numeric prefix makes lexical
/// order the apply order.
pub fn catalog(layout: &Layout) -> Result<Vec<String>, WorkspaceError> {
    let dir = layout.migrations_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut filenames = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|value| value.to_str()) else {
            continue;
        };
        if name.ends_with(".sql") {
            filenames.push(name.to_string());
        }
    }
    filenames.sort();
    Ok(filenames)
}

/// Every catalog migration with content, checksum, and the given
/// branch's applied status.
pub fn list(
    meta: &Connection,
    layout: &Layout,
    branch: &str,
) -> Result<Vec<MigrationView>, WorkspaceError> {
    let mut result = Vec::new();
    for filename in catalog(layout)? {
        let sql = std::fs::read_to_string(layout.migration_path(&filename))?;
        let applied_at = meta::application_applied_at(meta, branch, &filename)?;
        result.push(MigrationView {
            checksum: checksum(&sql),
            applied: applied_at.is_some(),
            applied_at,
            filename,
            sql,
        });
    }
    Ok(result)
}

/// Adds a migration to the global catalog. Never branch-scoped: every
/// branch sees the new file immediately.
pub fn create(
    meta: &Connection,
    layout: &Layout,
    current_branch: &str,
    name: &str,
    sql: &str,
) -> Result<String, WorkspaceError> {
    validate_name(name)?;
    if sql.trim().is_empty() {
        return Err(WorkspaceError::InvalidArgument(
            "migration sql cannot be empty".to_string(),
        ));
    }

    let next = next_sequence(&catalog(layout)?);
    let filename = format!("{next:0width$}_{name}.sql", width = SEQUENCE_WIDTH);
    let path = layout.migration_path(&filename);
    if path.exists() {
        return Err(WorkspaceError::Conflict(format!(
            "migration file '{filename}' already exists"
        )));
    }
    std::fs::create_dir_all(layout.migrations_dir())?;
    std::fs::write(&path, sql)?;

    timeline::record(
        meta,
        current_branch,
        &EventPayload::MigrationCreated {
            filename: filename.clone(),
        },
    )?;
    Ok(filename)
}

/// Executes one migration on one branch, exactly once. Failure writes
/// no application row, so a corrected retry starts clean.
pub fn apply(
    meta: &Connection,
    registry: &mut ConnectionRegistry,
    layout: &Layout,
    branch: &str,
    filename: &str,
) -> Result<(), WorkspaceError> {
    let sql = read_catalog_file(layout, filename)?;
    if meta::application_applied_at(meta, branch, filename)?.is_some() {
        return Err(WorkspaceError::Conflict(format!(
            "migration '{filename}' is already applied in branch '{branch}'"
        )));
    }

    let record = meta::get_branch(meta, branch)?
        .ok_or_else(|| WorkspaceError::NotFound(format!("branch '{branch}' not found")))?;
    let conn = registry.acquire(branch, &layout.branch_path(&record.file_name))?;
    conn.execute_batch(&sql).map_err(WorkspaceError::Sql)?;

    meta::record_application(meta, branch, filename, &meta::now_utc_rfc3339())?;
    timeline::record(
        meta,
        branch,
        &EventPayload::MigrationApplied {
            filename: filename.to_string(),
        },
    )?;
    Ok(())
}

/// Applies every pending migration in filename order, stopping at the
/// first failure. Earlier successes stay recorded; later files are
/// never attempted. Each migration is its own unit, not one shared
/// transaction.
pub fn apply_all(
    meta: &Connection,
    registry: &mut ConnectionRegistry,
    layout: &Layout,
    branch: &str,
) -> Result<Vec<ApplyOutcome>, WorkspaceError> {
    let applied = meta::applied_filenames(meta, branch)?;
    let pending: Vec<String> = catalog(layout)?
        .into_iter()
        .filter(|filename| !applied.contains(filename))
        .collect();

    let mut report = Vec::new();
    for filename in pending {
        match apply(meta, registry, layout, branch, &filename) {
            Ok(()) => report.push(ApplyOutcome {
                filename,
                success: true,
                error: None,
            }),
            Err(WorkspaceError::Sql(err)) => {
                report.push(ApplyOutcome {
                    filename,
                    success: false,
                    error: Some(err.to_string()),
                });
                break;
            }
            Err(other) => return Err(other),
        }
    }
    Ok(report)
}

/// Removes a migration from the catalog. Refused while any branch,
/// ever, holds an application record: the replay history of that
/// branch would desynchronize from the catalog.
pub fn delete(
    meta: &Connection,
    layout: &Layout,
    current_branch: &str,
    filename: &str,
) -> Result<(), WorkspaceError> {
    let path = layout.migration_path(filename);
    if !path.exists() {
        return Err(WorkspaceError::NotFound(format!(
            "migration '{filename}' not found"
        )));
    }

    let history = meta::appliers(meta, filename)?;
    if !history.is_empty() {
        let branches: Vec<&str> = history.iter().map(|entry| entry.branch.as_str()).collect();
        return Err(WorkspaceError::Conflict(format!(
            "migration '{filename}' was applied in: {}",
            branches.join(", ")
        )));
    }

    std::fs::remove_file(&path)?;
    timeline::record(
        meta,
        current_branch,
        &EventPayload::MigrationDeleted {
            filename: filename.to_string(),
        },
    )?;
    Ok(())
}

pub fn status(
    meta: &Connection,
    layout: &Layout,
    filename: &str,
) -> Result<MigrationStatus, WorkspaceError> {
    if !layout.migration_path(filename).exists() {
        return Err(WorkspaceError::NotFound(format!(
            "migration '{filename}' not found"
        )));
    }

    let mut applied_in_branches = Vec::new();
    for entry in meta::appliers(meta, filename)? {
        let branch_exists = meta::get_branch(meta, &entry.branch)?.is_some();
        applied_in_branches.push(ApplierView {
            branch: entry.branch,
            applied_at: entry.applied_at,
            branch_exists,
        });
    }

    Ok(MigrationStatus {
        filename: filename.to_string(),
        can_delete: applied_in_branches.is_empty(),
        applied_in_branches,
    })
}

fn read_catalog_file(layout: &Layout, filename: &str) -> Result<String, WorkspaceError> {
    let path = layout.migration_path(filename);
    if !path.exists() {
        return Err(WorkspaceError::NotFound(format!(
            "migration '{filename}' not found"
        )));
    }
    Ok(std::fs::read_to_string(path)?)
}

fn next_sequence(catalog: &[String]) -> usize {
    catalog
        .iter()
        .filter_map(|filename| filename.split('_').next())
        .filter_map(|prefix| prefix.parse::<usize>().ok())
        .max()
        .map_or(1, |max| max + 1)
}

fn validate_name(name: &str) -> Result<(), WorkspaceError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(WorkspaceError::InvalidArgument(format!(
            "invalid migration name '{name}': use only letters, digits, '-', '_'"
        )))
    }
}

fn checksum(sql: &str) -> String {
    let digest = Sha256::digest(sql.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{checksum, next_sequence, validate_name};

    #[test]
    fn sequence_starts_at_one_and_follows_the_max() {
        assert_eq!(next_sequence(&[]), 1);
        assert_eq!(
            next_sequence(&["001_init.sql".to_string(), "005_gap.sql".to_string()]),
            6
        );
        assert_eq!(next_sequence(&["junk.sql".to_string()]), 1);
    }

    #[test]
    fn names_reject_path_and_space_characters() {
        assert!(validate_name("create_users").is_ok());
        assert!(validate_name("v2-indexes").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("bad name").is_err());
        assert!(validate_name("../escape").is_err());
    }

    #[test]
    fn checksums_are_stable_hex_sha256() {
        let sum = checksum("CREATE TABLE t(id);");
        assert_eq!(sum.len(), 64);
        assert_eq!(sum, checksum("CREATE TABLE t(id);"));
        assert_ne!(sum, checksum("CREATE TABLE u(id);"));
    }
}
