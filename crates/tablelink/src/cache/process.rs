//! Process-wide in-memory cache backend.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::shape::RowData;

use super::CacheBackend;

#[derive(Default)]
struct Inner {
    /// literal SQL → cached rows
    entries: HashMap<String, Vec<RowData>>,
    /// table → keys of entries that touch it
    index: HashMap<String, HashSet<String>>,
}

/// In-memory cache shared by every handle in the process.
#[derive(Default)]
pub struct ProcessCache {
    inner: Mutex<Inner>,
    enabled: AtomicBool,
}

impl ProcessCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Switch the whole cache on or off at runtime.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live entries, for diagnostics.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

impl CacheBackend for ProcessCache {
    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn get(&self, sql: &str) -> Option<Vec<RowData>> {
        self.lock().entries.get(sql).cloned()
    }

    fn put(&self, tables: &[String], sql: &str, rows: &[RowData]) {
        let mut inner = self.lock();
        inner.entries.insert(sql.to_string(), rows.to_vec());
        for table in tables {
            inner
                .index
                .entry(table.clone())
                .or_default()
                .insert(sql.to_string());
        }
    }

    fn clear(&self, table: &str) {
        let mut inner = self.lock();
        if let Some(keys) = inner.index.remove(table) {
            for key in keys {
                inner.entries.remove(&key);
            }
        }
    }
}
