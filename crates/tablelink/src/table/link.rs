//! Handle registry.
//!
//! A [`Link`] owns the injected services (connection manager, dialect,
//! session, cache backends) and memoizes one [`Table`] per alias for
//! process lifetime.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::cache::{CacheBackend, CacheCoordinator, FileCache, ProcessCache};
use crate::connection::{ConnectionManager, Session};
use crate::dialect::{Dialect, MysqlDialect};

use super::{Table, TableConfig};

/// Registry-level configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Prefix applied to derive physical table names from aliases.
    #[serde(default)]
    pub table_prefix: String,
    /// Master switch for result caching.
    #[serde(default = "LinkConfig::default_cache")]
    pub cache: bool,
    /// Root directory of the file-backed cache namespace. Tables flagged
    /// `file_cache` fall back to the process cache when unset.
    #[serde(default)]
    pub file_cache_dir: Option<PathBuf>,
}

impl LinkConfig {
    fn default_cache() -> bool {
        true
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            table_prefix: String::new(),
            cache: true,
            file_cache_dir: None,
        }
    }
}

struct Registry {
    configs: HashMap<String, TableConfig>,
    tables: HashMap<String, Arc<Table>>,
}

/// Root object: builds and memoizes table handles.
pub struct Link {
    manager: Arc<dyn ConnectionManager>,
    dialect: Arc<dyn Dialect>,
    session: Arc<Session>,
    process_cache: Arc<ProcessCache>,
    file_cache: Option<Arc<FileCache>>,
    config: LinkConfig,
    registry: Mutex<Registry>,
}

impl Link {
    pub fn new(manager: Arc<dyn ConnectionManager>, config: LinkConfig) -> Arc<Self> {
        Self::with_dialect(manager, Arc::new(MysqlDialect), config)
    }

    pub fn with_dialect(
        manager: Arc<dyn ConnectionManager>,
        dialect: Arc<dyn Dialect>,
        config: LinkConfig,
    ) -> Arc<Self> {
        let file_cache = config
            .file_cache_dir
            .as_ref()
            .map(|dir| Arc::new(FileCache::new(dir.clone())));
        Arc::new(Self {
            manager,
            dialect,
            session: Arc::new(Session::new()),
            process_cache: Arc::new(ProcessCache::new()),
            file_cache,
            config,
            registry: Mutex::new(Registry {
                configs: HashMap::new(),
                tables: HashMap::new(),
            }),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn process_cache(&self) -> &Arc<ProcessCache> {
        &self.process_cache
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register per-table configuration. Must happen before the alias is
    /// first resolved; later registrations only affect future handles.
    pub fn configure(&self, config: TableConfig) {
        self.lock().configs.insert(config.alias.clone(), config);
    }

    /// Resolve a handle, creating and memoizing it on first use.
    pub fn table(&self, alias: &str) -> Arc<Table> {
        let mut registry = self.lock();
        if let Some(table) = registry.tables.get(alias) {
            return Arc::clone(table);
        }
        let config = registry
            .configs
            .get(alias)
            .cloned()
            .unwrap_or_else(|| self.default_config(alias));
        let cache = self.coordinator_for(&config);
        let table = Arc::new(Table::new(
            config,
            Arc::clone(&self.dialect),
            Arc::clone(&self.manager),
            Arc::clone(&self.session),
            cache,
        ));
        registry.tables.insert(alias.to_string(), Arc::clone(&table));
        table
    }

    fn default_config(&self, alias: &str) -> TableConfig {
        let mut config = TableConfig::new(alias);
        config.table_name = format!("{}{}", self.config.table_prefix, alias);
        config
    }

    /// Pick the cache namespace for a table: disabled, file-backed, or the
    /// shared process cache.
    fn coordinator_for(&self, config: &TableConfig) -> CacheCoordinator {
        if !self.config.cache {
            return CacheCoordinator::disabled();
        }
        if config.file_cache {
            if let Some(file_cache) = &self.file_cache {
                return CacheCoordinator::new(Arc::clone(file_cache) as Arc<dyn CacheBackend>);
            }
        }
        CacheCoordinator::new(Arc::clone(&self.process_cache) as Arc<dyn CacheBackend>)
    }
}
