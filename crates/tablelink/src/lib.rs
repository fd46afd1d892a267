//! # tablelink
//!
//! An asynchronous table gateway: one stateful handle per table, a fluent
//! statement builder underneath it, and a small active-record layer on top.
//!
//! The pieces:
//!
//! - [`Link`]: registry that wires configuration, connections, dialect,
//!   session and caches together and memoizes one [`Table`] handle per
//!   alias.
//! - [`Table`]: the verb surface (`select`, `row`, `insert`, `update`,
//!   `delete`, `increase`, raw `query`/`execute`, transactions). Every verb
//!   runs through the hook pipeline and the cache coordinator; raw SQL also
//!   passes the single-table consistency guard.
//! - [`Statement`]: fluent, dialect-driven SQL renderer producing both a
//!   literal statement (cache key, logs) and a prepared form with
//!   parameters.
//! - [`Row`] / [`RowSet`]: loose result wrappers with `map`/`join` relation
//!   merges across tables and document collections.
//! - [`Record`] / [`RecordSet`]: per-row change tracking, declared
//!   relations, cascading removal.
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use tablelink::{Link, LinkConfig, Fields};
//! # async fn demo(manager: Arc<dyn tablelink::ConnectionManager>) -> tablelink::OrmResult<()> {
//! let link = Link::new(manager, LinkConfig::default());
//! let users = link.table("users");
//! let _rows = users
//!     .order_by("id DESC")
//!     .limit(10u64)
//!     .select(Fields::All, json!({"status": 1}))
//!     .await?;
//! # Ok(()) }
//! ```

pub mod cache;
pub mod connection;
pub mod dialect;
pub mod document;
pub mod error;
pub mod hooks;
pub mod record;
pub mod relation;
pub mod row;
pub mod shape;
pub mod statement;
pub mod table;

pub use cache::{CacheBackend, CacheCoordinator, FileCache, NoCache, ProcessCache};
pub use connection::{Connection, ConnectionManager, Role, RowStream, Session};
pub use dialect::{Clause, Dialect, ForeignKey, MysqlDialect};
pub use document::DocumentStore;
pub use error::{OrmError, OrmResult};
pub use hooks::{HookArgs, HookFlow, HookPipeline, Verb};
pub use record::{Record, RecordSet, RecordType, Resolved};
pub use relation::{distinct_keys, MiddleTable, RelationDef, RelationKind, RelationSpec};
pub use row::{Row, RowSet};
pub use shape::{Fields, GroupBy, Having, Join, JoinKind, Limit, OrderBy, RowData, Where};
pub use statement::{Operation, Rendered, Statement};
pub use table::{Link, LinkConfig, Table, TableConfig};
