//! Table handles.
//!
//! A [`Table`] is the long-lived, per-alias orchestration core: it owns one
//! live [`Statement`], runs the hook pipeline around every verb, applies
//! the single-table consistency guard to raw SQL, decides cache
//! applicability and executes through the injected [`ConnectionManager`].
//! Handles are memoized by the [`Link`] registry, one per alias, for
//! process lifetime.
//!
//! Every verb follows the same template: before-hooks (interrupt returns
//! the verb's no-op value without touching the builder or the database),
//! apply rewritten arguments, render, cache/execute, after-hooks, then
//! clear the builder unconditionally. Raw `query`/`execute` additionally
//! pass the extracted table names through the guard first.

mod link;
mod verbs;

#[cfg(test)]
mod tests;

pub use link::{Link, LinkConfig};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::CacheCoordinator;
use crate::connection::{Connection, ConnectionManager, Role, Session};
use crate::dialect::{Dialect, ForeignKey};
use crate::error::{OrmError, OrmResult};
use crate::hooks::{HookArgs, HookFlow, HookPipeline, Verb};
use crate::shape::{Fields, GroupBy, Having, JoinKind, Limit, OrderBy, RowData, Where};
use crate::statement::{Rendered, Statement};

fn default_primary_key() -> String {
    "id".to_string()
}

fn default_connection() -> String {
    "default".to_string()
}

/// Per-table configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableConfig {
    /// Config-facing name, the key handles are memoized under.
    pub alias: String,
    /// Physical table name (prefix already applied).
    pub table_name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Connection alias passed to the manager.
    #[serde(default = "default_connection")]
    pub connection: String,
    /// Allow statements touching more than one table, disabling the
    /// handle/table consistency guard. Mutually exclusive with
    /// transactions.
    #[serde(default)]
    pub multi_table: bool,
    /// Route this table's reads through the file-backed cache namespace.
    #[serde(default)]
    pub file_cache: bool,
    /// Maintain `created`/`updated` columns automatically.
    #[serde(default)]
    pub auto_timestamps: bool,
    /// Log before/after row snapshots around small updates.
    #[serde(default)]
    pub log_mutations: bool,
}

impl TableConfig {
    pub fn new(alias: impl Into<String>) -> Self {
        let alias = alias.into();
        Self {
            table_name: alias.clone(),
            alias,
            primary_key: default_primary_key(),
            connection: default_connection(),
            multi_table: false,
            file_cache: false,
            auto_timestamps: false,
            log_mutations: false,
        }
    }
}

/// Stateful handle for one table alias.
pub struct Table {
    config: TableConfig,
    dialect: Arc<dyn Dialect>,
    manager: Arc<dyn ConnectionManager>,
    session: Arc<Session>,
    cache: CacheCoordinator,
    hooks: RwLock<HookPipeline>,
    builder: Mutex<Statement>,
    read_conn: tokio::sync::OnceCell<Arc<dyn Connection>>,
    write_conn: tokio::sync::OnceCell<Arc<dyn Connection>>,
    /// One-shot cache bypass, auto-resets on the next read.
    uncache_once: AtomicBool,
}

impl Table {
    pub fn new(
        config: TableConfig,
        dialect: Arc<dyn Dialect>,
        manager: Arc<dyn ConnectionManager>,
        session: Arc<Session>,
        cache: CacheCoordinator,
    ) -> Self {
        let builder = Statement::new(
            Arc::clone(&dialect),
            config.table_name.clone(),
            config.primary_key.clone(),
        );
        Self {
            config,
            dialect,
            manager,
            session,
            cache,
            hooks: RwLock::new(HookPipeline::new()),
            builder: Mutex::new(builder),
            read_conn: tokio::sync::OnceCell::new(),
            write_conn: tokio::sync::OnceCell::new(),
            uncache_once: AtomicBool::new(false),
        }
    }

    pub fn alias(&self) -> &str {
        &self.config.alias
    }

    pub fn table_name(&self) -> &str {
        &self.config.table_name
    }

    pub fn primary_key(&self) -> &str {
        &self.config.primary_key
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub(crate) fn lock_builder(&self) -> MutexGuard<'_, Statement> {
        self.builder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_builder(&self) {
        self.lock_builder().clear();
    }

    // ==================== fluent shape setters ====================

    pub fn fields(&self, fields: impl Into<Fields>) -> &Self {
        self.lock_builder().set_fields(fields.into());
        self
    }

    pub fn filter(&self, cond: impl Into<Where>) -> &Self {
        self.lock_builder().set_where(cond.into());
        self
    }

    pub fn order_by(&self, order: impl Into<OrderBy>) -> &Self {
        self.lock_builder().set_order_by(order.into());
        self
    }

    pub fn group_by(&self, group: impl Into<GroupBy>) -> &Self {
        self.lock_builder().set_group_by(group.into());
        self
    }

    pub fn having(&self, having: impl Into<Having>) -> &Self {
        self.lock_builder().set_having(having.into());
        self
    }

    pub fn limit(&self, limit: impl Into<Limit>) -> &Self {
        self.lock_builder().set_limit(limit.into());
        self
    }

    pub fn distinct(&self) -> &Self {
        self.lock_builder().set_distinct(true);
        self
    }

    pub fn join(&self, table: &str) -> &Self {
        self.lock_builder().join(JoinKind::Inner, table);
        self
    }

    pub fn left_join(&self, table: &str) -> &Self {
        self.lock_builder().join(JoinKind::Left, table);
        self
    }

    pub fn right_join(&self, table: &str) -> &Self {
        self.lock_builder().join(JoinKind::Right, table);
        self
    }

    pub fn on(&self, cond: &str) -> &Self {
        self.lock_builder().on(cond);
        self
    }

    /// Skip the cache for the next read only.
    pub fn uncache_once(&self) -> &Self {
        self.uncache_once.store(true, Ordering::SeqCst);
        self
    }

    // ==================== hooks ====================

    /// Register a before-hook for a verb. The most recently registered
    /// hook runs first.
    pub fn before_hook<F>(&self, verb: Verb, hook: F)
    where
        F: Fn(HookArgs) -> HookFlow + Send + Sync + 'static,
    {
        self.write_hooks().before(verb, hook);
    }

    /// Register an after-hook for a verb.
    pub fn after_hook<F>(&self, verb: Verb, hook: F)
    where
        F: Fn(serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    {
        self.write_hooks().after(verb, hook);
    }

    fn write_hooks(&self) -> std::sync::RwLockWriteGuard<'_, HookPipeline> {
        self.hooks.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn run_before(&self, verb: Verb, args: HookArgs) -> Option<HookArgs> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .run_before(verb, args)
    }

    pub(crate) fn run_after(&self, verb: Verb, value: serde_json::Value) -> serde_json::Value {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .run_after(verb, value)
    }

    // ==================== connections ====================

    pub(crate) async fn write_connection(&self) -> OrmResult<Arc<dyn Connection>> {
        self.write_conn
            .get_or_try_init(|| self.manager.connect(&self.config.connection, Role::Write))
            .await
            .cloned()
    }

    /// Read connection, redirected to the write connection while a
    /// transaction is open so it observes its own writes.
    pub(crate) async fn read_connection(&self) -> OrmResult<Arc<dyn Connection>> {
        if self.session.in_transaction() {
            return self.write_connection().await;
        }
        self.read_conn
            .get_or_try_init(|| self.manager.connect(&self.config.connection, Role::Read))
            .await
            .cloned()
    }

    // ==================== guards, cache, execution ====================

    /// Single-table consistency guard for raw SQL. Structured verbs render
    /// against the handle's own table (plus explicit joins) and skip it.
    /// An empty list (unresolvable raw SQL) passes; caching is disabled for
    /// that call instead.
    fn guard_tables(&self, tables: &[String]) -> OrmResult<()> {
        if self.config.multi_table || tables.is_empty() {
            return Ok(());
        }
        if tables.len() > 1 {
            return Err(OrmError::consistency(format!(
                "handle '{}' resolved multiple tables: {}",
                self.config.alias,
                tables.join(", ")
            )));
        }
        if tables[0] != self.config.table_name {
            return Err(OrmError::consistency(format!(
                "handle '{}' (table '{}') resolved table '{}'",
                self.config.alias, self.config.table_name, tables[0]
            )));
        }
        Ok(())
    }

    /// Raw-SQL read: the consistency guard applies here only.
    pub(crate) async fn raw_read_run(&self, rendered: &Rendered) -> OrmResult<Vec<RowData>> {
        self.guard_tables(&rendered.tables)?;
        self.read_run(rendered).await
    }

    /// Raw-SQL write: the consistency guard applies here only.
    pub(crate) async fn raw_write_run(&self, rendered: &Rendered) -> OrmResult<u64> {
        self.guard_tables(&rendered.tables)?;
        self.write_run(rendered).await
    }

    /// Cached read. Entries are keyed on the literal SQL and associated
    /// with every resolved table, so a joined select is invalidated by a
    /// write to any of its tables. The one-shot bypass is consumed here
    /// whether or not the rest of the conditions allow caching.
    pub(crate) async fn read_run(&self, rendered: &Rendered) -> OrmResult<Vec<RowData>> {
        let skip_once = self.uncache_once.swap(false, Ordering::SeqCst);
        let cacheable = !skip_once && self.cache.usable(&rendered.tables);
        if cacheable {
            if let Some(rows) = self.cache.fetch(&rendered.sql) {
                #[cfg(feature = "tracing")]
                tracing::debug!(target: "tablelink::sql", sql = %rendered.sql, "cache hit");
                return Ok(rows);
            }
        }
        let conn = self.read_connection().await?;
        let rows = self.timed_query(conn.as_ref(), rendered).await?;
        if cacheable {
            self.cache.store(&rendered.tables, &rendered.sql, &rows);
        }
        Ok(rows)
    }

    /// Write; invalidates every touched table's cache.
    pub(crate) async fn write_run(&self, rendered: &Rendered) -> OrmResult<u64> {
        let conn = self.write_connection().await?;
        let affected = self.timed_execute(conn.as_ref(), rendered).await?;
        self.cache.invalidate(&rendered.tables);
        Ok(affected)
    }

    async fn timed_query(
        &self,
        conn: &dyn Connection,
        rendered: &Rendered,
    ) -> OrmResult<Vec<RowData>> {
        #[cfg(feature = "tracing")]
        let started = std::time::Instant::now();
        let result = conn.query(&rendered.prepare, &rendered.params).await;
        #[cfg(feature = "tracing")]
        match &result {
            Ok(rows) => tracing::debug!(
                target: "tablelink::sql",
                sql = %rendered.sql,
                rows = rows.len(),
                elapsed_us = started.elapsed().as_micros() as u64,
            ),
            Err(error) => tracing::warn!(
                target: "tablelink::sql",
                sql = %rendered.sql,
                %error,
            ),
        }
        result
    }

    async fn timed_execute(&self, conn: &dyn Connection, rendered: &Rendered) -> OrmResult<u64> {
        #[cfg(feature = "tracing")]
        let started = std::time::Instant::now();
        let result = conn.execute(&rendered.prepare, &rendered.params).await;
        #[cfg(feature = "tracing")]
        match &result {
            Ok(affected) => tracing::debug!(
                target: "tablelink::sql",
                sql = %rendered.sql,
                affected,
                elapsed_us = started.elapsed().as_micros() as u64,
            ),
            Err(error) => tracing::warn!(
                target: "tablelink::sql",
                sql = %rendered.sql,
                %error,
            ),
        }
        result
    }

    // ==================== transactions ====================

    /// Open (or nest into) a transaction on the write connection.
    pub async fn begin(&self) -> OrmResult<()> {
        if self.config.multi_table {
            return Err(OrmError::consistency(
                "transactions are unavailable in multi-table mode",
            ));
        }
        let conn = self.write_connection().await?;
        conn.begin().await?;
        self.session.enter();
        Ok(())
    }

    pub async fn commit(&self) -> OrmResult<()> {
        if self.config.multi_table {
            return Err(OrmError::consistency(
                "transactions are unavailable in multi-table mode",
            ));
        }
        self.session.leave()?;
        let conn = self.write_connection().await?;
        conn.commit().await
    }

    pub async fn rollback(&self) -> OrmResult<()> {
        if self.config.multi_table {
            return Err(OrmError::consistency(
                "transactions are unavailable in multi-table mode",
            ));
        }
        self.session.leave()?;
        let conn = self.write_connection().await?;
        conn.rollback().await
    }

    // ==================== introspection ====================

    /// Column descriptions, straight from the driver.
    pub async fn meta(&self) -> OrmResult<Vec<RowData>> {
        let sql = self.dialect.describe_sql(&self.config.table_name);
        let conn = self.read_connection().await?;
        conn.query(&sql, &[]).await
    }

    /// Index listing.
    pub async fn indexes(&self) -> OrmResult<Vec<RowData>> {
        let sql = self.dialect.indexes_sql(&self.config.table_name);
        let conn = self.read_connection().await?;
        conn.query(&sql, &[]).await
    }

    /// Foreign keys parsed out of the create-table statement. The create
    /// statement is expected as the second column of the first row.
    pub async fn foreign_keys(&self) -> OrmResult<Vec<ForeignKey>> {
        let sql = self.dialect.create_table_sql(&self.config.table_name);
        let conn = self.read_connection().await?;
        let rows = conn.query(&sql, &[]).await?;
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let create = first
            .values()
            .nth(1)
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        Ok(self.dialect.parse_foreign_keys(create))
    }
}
