use std::path::{Path, PathBuf};

pub const META_DIR: &str = ".dbranch";
pub const META_DB_FILE: &str = "meta.sqlite";
pub const LOCK_FILE: &str = "workspace.lock";
pub const MIGRATIONS_DIR: &str = "migrations";
pub const SNAPSHOTS_DIR: &str = "snapshots";
pub const BACKING_EXT: &str = "db";

/// On-disk layout of one project: branch backing files in the root,
/// `migrations/` and `snapshots/` beside them, and the metadata store
/// under `.dbranch/` so it never shares a file with user tables.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    pub fn meta_db_path(&self) -> PathBuf {
        self.meta_dir().join(META_DB_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.meta_dir().join(LOCK_FILE)
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.root.join(MIGRATIONS_DIR)
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR)
    }

    pub fn branch_path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub fn migration_path(&self, filename: &str) -> PathBuf {
        self.migrations_dir().join(filename)
    }

    pub fn snapshot_path(&self, file_name: &str) -> PathBuf {
        self.snapshots_dir().join(file_name)
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.meta_dir())?;
        std::fs::create_dir_all(self.migrations_dir())?;
        std::fs::create_dir_all(self.snapshots_dir())?;
        Ok(())
    }
}

/// Backing file name for a branch. Branch names may contain `/`; file
/// names may not, so path separators map to `__`. The mapping is stored
/// in the branch row, which stays authoritative.
pub fn branch_file_name(branch: &str) -> String {
    format!("{}.{}", sanitize_component(branch), BACKING_EXT)
}

pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|ch| if ch == '/' { "__".to_string() } else { ch.to_string() })
        .collect()
}
