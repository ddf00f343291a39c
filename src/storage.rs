//! On-disk layout of a tasksync data directory
//!
//! # Directory Structure
//!
//! ```text
//! <data_dir>/
//!   tasksync.toml        # Configuration
//!   tasks.json           # Every owner's task rows
//!   tasks.json.lock      # Writer lock (fs2)
//! ```
//!
//! Rows are kept as raw JSON so a hand-edited or older file still loads;
//! callers coerce them into records.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Config, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS};

pub const TASKS_FILE: &str = "tasks.json";
pub const TASKS_SCHEMA_VERSION: &str = "tasksync.tasks.v1";

/// Contents of `tasks.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFile {
    pub schema_version: String,
    #[serde(default)]
    pub tasks: Vec<Value>,
}

impl Default for TaskFile {
    fn default() -> Self {
        Self {
            schema_version: TASKS_SCHEMA_VERSION.to_string(),
            tasks: Vec::new(),
        }
    }
}

/// Platform data directory, e.g. `~/.local/share/tasksync` on Linux.
pub fn default_data_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "tasksync").map(|dirs| dirs.data_dir().to_path_buf())
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    lock_timeout_ms: u64,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    pub fn with_lock_timeout(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    // =========================================================================
    // Paths
    // =========================================================================

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.root.join(TASKS_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(format!("{TASKS_FILE}.lock"))
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Create the directory, an empty task file and a default config.
    /// Existing files are left alone. Returns `true` if anything was created.
    pub fn init(&self) -> Result<bool> {
        fs::create_dir_all(&self.root)?;
        let mut created = false;

        let _lock = FileLock::acquire(self.lock_file(), self.lock_timeout_ms)?;
        if !self.tasks_file().exists() {
            self.write_task_file(&TaskFile::default())?;
            created = true;
        }
        if !self.config_file().exists() {
            Config::default().save(&self.config_file())?;
            created = true;
        }
        Ok(created)
    }

    pub fn is_initialized(&self) -> bool {
        self.tasks_file().exists()
    }

    // =========================================================================
    // Task file I/O
    // =========================================================================

    /// Read the task file; a missing file reads as empty.
    pub fn read_task_file(&self) -> Result<TaskFile> {
        let path = self.tasks_file();
        if !path.exists() {
            return Ok(TaskFile::default());
        }
        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(TaskFile::default());
        }
        let file: TaskFile = serde_json::from_str(&content)?;
        if file.schema_version != TASKS_SCHEMA_VERSION {
            return Err(Error::OperationFailed(format!(
                "unsupported task file schema '{}' in {}",
                file.schema_version,
                path.display()
            )));
        }
        Ok(file)
    }

    fn write_task_file(&self, file: &TaskFile) -> Result<()> {
        let json = serde_json::to_string_pretty(file)?;
        lock::write_atomic(self.tasks_file(), json.as_bytes())
    }

    /// Read-modify-write the task rows under the writer lock.
    ///
    /// The closure's result is returned; the file is rewritten only when the
    /// closure succeeds.
    pub fn update_tasks<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Value>) -> Result<T>,
    {
        fs::create_dir_all(&self.root)?;
        let _lock = FileLock::acquire(self.lock_file(), self.lock_timeout_ms)?;

        let mut file = self.read_task_file()?;
        let result = f(&mut file.tasks)?;
        self.write_task_file(&file)?;
        Ok(result)
    }
}
