use std::collections::HashMap;
use std::path::Path;

use rusqlite::Connection;

use crate::dbfile;

#[derive(Debug)]
pub enum RegistryError {
    MissingBackingFile { branch: String, path: String },
    Db(rusqlite::Error),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::MissingBackingFile { branch, path } => {
                write!(f, "backing file for branch '{branch}' not found: {path}")
            }
            RegistryError::Db(err) => write!(f, "database error: {}", err),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::MissingBackingFile { .. } => None,
            RegistryError::Db(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(value: rusqlite::Error) -> Self {
        RegistryError::Db(value)
    }
}

/// Runtime cache of one live connection per branch. Owns no persisted
/// state; any file-level copy/replace/delete of a backing file must
/// call `release` on that branch first so no live handle races the
/// file operation.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<String, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Creates-or-returns the cached handle for a branch. Opening a
    /// branch whose backing file is gone is a caller error, not an
    /// implicit create.
    pub fn acquire(&mut self, branch: &str, path: &Path) -> Result<&Connection, RegistryError> {
        if !self.connections.contains_key(branch) {
            if !path.exists() {
                return Err(RegistryError::MissingBackingFile {
                    branch: branch.to_string(),
                    path: path.display().to_string(),
                });
            }
            let conn = dbfile::open_branch_connection(path)?;
            self.connections.insert(branch.to_string(), conn);
        }
        Ok(self
            .connections
            .get(branch)
            .expect("connection inserted above"))
    }

    /// Closes and evicts the branch's handle. Idempotent.
    pub fn release(&mut self, branch: &str) {
        self.connections.remove(branch);
    }

    pub fn is_live(&self, branch: &str) -> bool {
        self.connections.contains_key(branch)
    }
}
