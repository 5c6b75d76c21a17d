use std::fs;
use std::path::{Path, PathBuf};

use crate::common::{Result, TableID};

const DATA_DIR: &str = "data";
const LOG_DIR: &str = "log";
const LOG_FILE: &str = "wal.log";

/// Where one database keeps its files: a heap file per table under
/// `data/`, the write-ahead log under `log/`.
pub struct DBFiles {
    root: PathBuf,
}

impl DBFiles {
    /// Creates the directory tree if it is missing.
    pub fn new(root: &Path) -> Result<Self> {
        let files = Self {
            root: root.to_path_buf(),
        };
        fs::create_dir_all(files.root.join(DATA_DIR))?;
        fs::create_dir_all(files.root.join(LOG_DIR))?;
        Ok(files)
    }

    pub fn db_directory(&self) -> &Path {
        &self.root
    }

    pub fn get_data_file_path(&self, table_id: TableID) -> PathBuf {
        self.root
            .join(DATA_DIR)
            .join(format!("segment_{}.dat", table_id.0))
    }

    pub fn get_log_file_path(&self) -> PathBuf {
        self.root.join(LOG_DIR).join(LOG_FILE)
    }

    /// Removes the whole database directory.
    pub fn cleanup(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
