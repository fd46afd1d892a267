//! Per-table result caching.
//!
//! Cache keys are the *literal* SQL of a read: two structurally identical
//! queries with different literal values are distinct entries. Every entry
//! is associated with all table names the statement touches, and any write
//! against one of those tables wipes that table's entire cache. Backend
//! failures degrade to "uncached", never to a caller-visible error.

mod file;
mod process;


pub use file::FileCache;
pub use process::ProcessCache;

use std::sync::Arc;

use crate::shape::RowData;

/// Cache backend capability. Two implementations ship: a process-wide
/// in-memory cache and a file-backed cache, selectable per table.
pub trait CacheBackend: Send + Sync {
    fn enabled(&self) -> bool;

    fn get(&self, sql: &str) -> Option<Vec<RowData>>;

    /// Store an entry, associating it with every listed table.
    fn put(&self, tables: &[String], sql: &str, rows: &[RowData]);

    /// Drop every entry associated with a table.
    fn clear(&self, table: &str);
}

/// A backend that caches nothing. Used when caching is switched off.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCache;

impl CacheBackend for NoCache {
    fn enabled(&self) -> bool {
        false
    }

    fn get(&self, _sql: &str) -> Option<Vec<RowData>> {
        None
    }

    fn put(&self, _tables: &[String], _sql: &str, _rows: &[RowData]) {}

    fn clear(&self, _table: &str) {}
}

/// Decides cache applicability per statement and routes to the backend.
#[derive(Clone)]
pub struct CacheCoordinator {
    backend: Arc<dyn CacheBackend>,
}

impl CacheCoordinator {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoCache))
    }

    /// A read is cacheable only when the backend is live and every touched
    /// table is known. An empty table list means raw SQL we could not
    /// resolve, so the entry could never be invalidated.
    pub fn usable(&self, tables: &[String]) -> bool {
        self.backend.enabled() && !tables.is_empty()
    }

    pub fn fetch(&self, sql: &str) -> Option<Vec<RowData>> {
        self.backend.get(sql)
    }

    pub fn store(&self, tables: &[String], sql: &str, rows: &[RowData]) {
        self.backend.put(tables, sql, rows);
    }

    /// Invalidate after a write: each touched table loses its whole cache.
    pub fn invalidate(&self, tables: &[String]) {
        for table in tables {
            self.backend.clear(table);
        }
    }
}
