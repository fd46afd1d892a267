//! File-backed cache backend.
//!
//! One JSON file per entry, named by a hash of the literal SQL. The stored
//! entry keeps the full SQL so a hash collision reads as a miss instead of
//! returning someone else's rows. All IO failures degrade to cache misses.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::shape::RowData;

use super::CacheBackend;

#[derive(Serialize, Deserialize)]
struct Entry {
    sql: String,
    tables: Vec<String>,
    rows: Vec<RowData>,
}

/// Cache persisted as files under a root directory.
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, sql: &str) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        sql.hash(&mut hasher);
        self.root.join(format!("{:016x}.json", hasher.finish()))
    }

    fn read_entry(path: &Path) -> Option<Entry> {
        let bytes = fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

impl CacheBackend for FileCache {
    fn enabled(&self) -> bool {
        true
    }

    fn get(&self, sql: &str) -> Option<Vec<RowData>> {
        let entry = Self::read_entry(&self.path_for(sql))?;
        if entry.sql == sql {
            Some(entry.rows)
        } else {
            None
        }
    }

    fn put(&self, tables: &[String], sql: &str, rows: &[RowData]) {
        let entry = Entry {
            sql: sql.to_string(),
            tables: tables.to_vec(),
            rows: rows.to_vec(),
        };
        let Ok(bytes) = serde_json::to_vec(&entry) else {
            return;
        };
        if fs::create_dir_all(&self.root).is_err() {
            return;
        }
        let path = self.path_for(sql);
        if let Err(error) = fs::write(&path, bytes) {
            #[cfg(feature = "tracing")]
            tracing::debug!(path = %path.display(), %error, "file cache write failed");
            let _ = error;
        }
    }

    fn clear(&self, table: &str) {
        let Ok(dir) = fs::read_dir(&self.root) else {
            return;
        };
        for item in dir.flatten() {
            let path = item.path();
            let Some(entry) = Self::read_entry(&path) else {
                continue;
            };
            if entry.tables.iter().any(|t| t == table) {
                let _ = fs::remove_file(&path);
            }
        }
    }
}
