//! Connection capabilities.
//!
//! The crate never talks to a concrete driver. Table handles execute
//! through a [`Connection`] obtained from a [`ConnectionManager`], with a
//! read/write role split. A [`Session`] carries the process-wide nested
//! transaction depth; only `begin`/`commit`/`rollback` on a handle mutate
//! it.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use futures_core::Stream;
use serde_json::Value;

use crate::error::{OrmError, OrmResult};
use crate::shape::RowData;

/// Type-erased row stream for unbuffered (cursor-mode) reads.
pub type RowStream = Pin<Box<dyn Stream<Item = OrmResult<RowData>> + Send>>;

/// Which side of the read/write split a connection serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Read,
    Write,
}

/// One live database connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run a prepared read and buffer all rows.
    async fn query(&self, prepare: &str, params: &[Value]) -> OrmResult<Vec<RowData>>;

    /// Run a prepared mutation; returns the affected-row count.
    async fn execute(&self, prepare: &str, params: &[Value]) -> OrmResult<u64>;

    /// Auto-increment id generated by the most recent insert, 0 when none.
    async fn last_insert_id(&self) -> OrmResult<i64>;

    async fn begin(&self) -> OrmResult<()>;

    async fn commit(&self) -> OrmResult<()>;

    async fn rollback(&self) -> OrmResult<()>;

    /// Toggle unbuffered cursor mode. Streaming reads flip this off and
    /// must restore it afterwards.
    async fn set_buffered(&self, buffered: bool) -> OrmResult<()>;

    /// Run a prepared read without buffering; rows arrive through the
    /// returned stream.
    async fn query_stream(&self, prepare: &str, params: &[Value]) -> OrmResult<RowStream>;
}

/// Hands out connections per (alias, role). Implementations decide pooling
/// and read-replica topology.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    async fn connect(&self, alias: &str, role: Role) -> OrmResult<Arc<dyn Connection>>;
}

/// Process-wide transaction state shared by every table handle.
///
/// Depth starts at 0. While depth > 0, reads are redirected to the write
/// connection so a transaction observes its own writes.
#[derive(Debug, Default)]
pub struct Session {
    depth: AtomicI32,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> i32 {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn in_transaction(&self) -> bool {
        self.depth() > 0
    }

    pub(crate) fn enter(&self) -> i32 {
        self.depth.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement, refusing to go below zero.
    pub(crate) fn leave(&self) -> OrmResult<i32> {
        self.depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| {
                (depth > 0).then_some(depth - 1)
            })
            .map(|previous| previous - 1)
            .map_err(|_| OrmError::consistency("commit/rollback without an open transaction"))
    }
}
