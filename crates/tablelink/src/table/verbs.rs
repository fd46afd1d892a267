//! CRUD verbs on a table handle.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use serde_json::Value;

use crate::connection::{Connection, RowStream};
use crate::error::{OrmError, OrmResult};
use crate::hooks::{HookArgs, Verb};
use crate::row::{Row, RowSet};
use crate::shape::{Fields, Limit, RowData, Where};
use crate::statement::{Operation, Statement};

use super::Table;

/// Coerce a loose value to an integer; numeric strings count.
pub(crate) fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Coerce a loose value to a float; numeric strings count.
pub(crate) fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn rows_to_value(rows: Vec<RowData>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

fn rows_from_value(value: Value) -> Vec<RowData> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

impl Table {
    // ==================== reads ====================

    /// Run a select and wrap the rows for relation traversal.
    pub async fn select(
        &self,
        fields: impl Into<Fields>,
        cond: impl Into<Where>,
    ) -> OrmResult<RowSet> {
        Ok(RowSet::new(self.select_array(fields, cond).await?))
    }

    /// Run a select, returning the raw row maps.
    pub async fn select_array(
        &self,
        fields: impl Into<Fields>,
        cond: impl Into<Where>,
    ) -> OrmResult<Vec<RowData>> {
        self.run_read_verb(Operation::Select, fields.into(), cond.into())
            .await
    }

    /// Shared template for hooked reads (select and exist).
    async fn run_read_verb(
        &self,
        op: Operation,
        fields: Fields,
        cond: Where,
    ) -> OrmResult<Vec<RowData>> {
        let (order, limit) = {
            let builder = self.lock_builder();
            (builder.order_shape().clone(), builder.limit_shape())
        };
        let Some(args) = self.run_before(
            Verb::Select,
            HookArgs::Select {
                fields,
                cond,
                order,
                limit,
            },
        ) else {
            return Ok(Vec::new());
        };
        let HookArgs::Select {
            fields,
            cond,
            order,
            limit,
        } = args
        else {
            return Err(OrmError::consistency(
                "select hook rewrote arguments for a different verb",
            ));
        };
        let rendered = {
            let mut builder = self.lock_builder();
            builder.set_operation(op);
            builder.set_fields(fields);
            builder.set_where(cond);
            builder.set_order_by(order);
            builder.set_limit(limit);
            builder.create()
        };
        let result = match rendered {
            Ok(rendered) => self.read_run(&rendered).await,
            Err(error) => Err(error),
        };
        self.clear_builder();
        let rows = result?;
        let value = self.run_after(Verb::Select, rows_to_value(rows));
        Ok(rows_from_value(value))
    }

    /// First matching row, or `None`.
    pub async fn row(&self, cond: impl Into<Where>) -> OrmResult<Option<Row>> {
        self.limit(1u64);
        let rows = self.select_array(Fields::All, cond).await?;
        Ok(rows.into_iter().next().map(Row::new))
    }

    /// One column of every matching row.
    pub async fn col(&self, field: &str, cond: impl Into<Where>) -> OrmResult<Vec<Value>> {
        let rows = self
            .select_array(Fields::Raw(field.to_string()), cond)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                row.get(field)
                    .cloned()
                    .or_else(|| row.values().next().cloned())
                    .unwrap_or(Value::Null)
            })
            .collect())
    }

    /// One column of the first matching row; `Null` when nothing matches.
    pub async fn get(&self, field: &str, cond: impl Into<Where>) -> OrmResult<Value> {
        self.limit(1u64);
        let mut values = self.col(field, cond).await?;
        Ok(if values.is_empty() {
            Value::Null
        } else {
            values.swap_remove(0)
        })
    }

    pub async fn get_int(&self, field: &str, cond: impl Into<Where>) -> OrmResult<i64> {
        Ok(value_to_i64(&self.get(field, cond).await?).unwrap_or(0))
    }

    pub async fn get_float(&self, field: &str, cond: impl Into<Where>) -> OrmResult<f64> {
        Ok(value_to_f64(&self.get(field, cond).await?).unwrap_or(0.0))
    }

    /// Primary key of the first matching row, 0 when nothing matches.
    pub async fn get_id(&self, cond: impl Into<Where>) -> OrmResult<i64> {
        let pk = self.primary_key().to_string();
        self.get_int(&pk, cond).await
    }

    pub async fn count(&self, cond: impl Into<Where>) -> OrmResult<i64> {
        let fields = Fields::Aliased(vec![("count(*)".to_string(), "cnt".to_string())]);
        let rows = self
            .run_read_verb(Operation::Select, fields, cond.into())
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("cnt"))
            .and_then(value_to_i64)
            .unwrap_or(0))
    }

    pub async fn exist(&self, cond: impl Into<Where>) -> OrmResult<bool> {
        let rows = self
            .run_read_verb(Operation::Exist, Fields::All, cond.into())
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("cnt"))
            .and_then(value_to_i64)
            .unwrap_or(0)
            > 0)
    }

    pub async fn not_exist(&self, cond: impl Into<Where>) -> OrmResult<bool> {
        Ok(!self.exist(cond).await?)
    }

    pub async fn sum(&self, field: &str, cond: impl Into<Where>) -> OrmResult<f64> {
        let fields = Fields::Aliased(vec![(format!("sum({field})"), "s".to_string())]);
        let rows = self
            .run_read_verb(Operation::Select, fields, cond.into())
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("s"))
            .and_then(value_to_f64)
            .unwrap_or(0.0))
    }

    /// Unbuffered streaming read for memory-bounded large results.
    /// Buffered mode is restored when the stream ends or is dropped.
    pub async fn select_handle(
        &self,
        fields: impl Into<Fields>,
        cond: impl Into<Where>,
    ) -> OrmResult<RowStream> {
        let (order, limit) = {
            let builder = self.lock_builder();
            (builder.order_shape().clone(), builder.limit_shape())
        };
        let Some(args) = self.run_before(
            Verb::Select,
            HookArgs::Select {
                fields: fields.into(),
                cond: cond.into(),
                order,
                limit,
            },
        ) else {
            return Ok(Box::pin(EmptyRows));
        };
        let HookArgs::Select {
            fields,
            cond,
            order,
            limit,
        } = args
        else {
            return Err(OrmError::consistency(
                "select hook rewrote arguments for a different verb",
            ));
        };
        let rendered = {
            let mut builder = self.lock_builder();
            builder.set_operation(Operation::SelectHandle);
            builder.set_fields(fields);
            builder.set_where(cond);
            builder.set_order_by(order);
            builder.set_limit(limit);
            builder.create()
        };
        self.clear_builder();
        let rendered = rendered?;

        let conn = self.read_connection().await?;
        conn.set_buffered(false).await?;
        match conn.query_stream(&rendered.prepare, &rendered.params).await {
            Ok(inner) => Ok(Box::pin(UnbufferedRows {
                inner,
                conn: Some(conn),
            })),
            Err(error) => {
                let _ = conn.set_buffered(true).await;
                Err(error)
            }
        }
    }

    /// Raw SQL read. Table names are extracted best-effort; when they
    /// cannot be resolved the call runs uncached.
    pub async fn query(&self, sql: impl Into<String>, params: Vec<Value>) -> OrmResult<Vec<RowData>> {
        let Some(args) = self.run_before(
            Verb::Query,
            HookArgs::Query {
                sql: sql.into(),
                params,
            },
        ) else {
            return Ok(Vec::new());
        };
        let HookArgs::Query { sql, params } = args else {
            return Err(OrmError::consistency(
                "query hook rewrote arguments for a different verb",
            ));
        };
        let rendered = {
            let mut builder = self.lock_builder();
            builder.set_operation(Operation::Query);
            builder.set_raw(sql, params);
            builder.create()
        };
        let result = match rendered {
            Ok(rendered) => self.raw_read_run(&rendered).await,
            Err(error) => Err(error),
        };
        self.clear_builder();
        let rows = result?;
        let value = self.run_after(Verb::Query, rows_to_value(rows));
        Ok(rows_from_value(value))
    }

    // ==================== writes ====================

    /// Raw SQL mutation.
    pub async fn execute(&self, sql: impl Into<String>, params: Vec<Value>) -> OrmResult<u64> {
        let Some(args) = self.run_before(
            Verb::Execute,
            HookArgs::Execute {
                sql: sql.into(),
                params,
            },
        ) else {
            return Ok(0);
        };
        let HookArgs::Execute { sql, params } = args else {
            return Err(OrmError::consistency(
                "execute hook rewrote arguments for a different verb",
            ));
        };
        let rendered = {
            let mut builder = self.lock_builder();
            builder.set_operation(Operation::Execute);
            builder.set_raw(sql, params);
            builder.create()
        };
        let result = match rendered {
            Ok(rendered) => self.raw_write_run(&rendered).await,
            Err(error) => Err(error),
        };
        self.clear_builder();
        let affected = result?;
        let value = self.run_after(Verb::Execute, Value::from(affected));
        Ok(value.as_u64().unwrap_or(affected))
    }

    /// Insert one row; returns the generated auto-increment id.
    pub async fn insert(&self, row: RowData) -> OrmResult<i64> {
        self.insert_like(Operation::Insert, row).await
    }

    /// Insert unless a unique key already matches. Returns the generated
    /// id when a row was created; otherwise the input row's primary key,
    /// or 0 when no identifier can be inferred.
    pub async fn insert_ignore(&self, row: RowData) -> OrmResult<i64> {
        self.insert_like(Operation::InsertIgnore, row).await
    }

    /// Insert-or-overwrite; returns the affected identifier.
    pub async fn replace(&self, row: RowData) -> OrmResult<i64> {
        self.insert_like(Operation::Replace, row).await
    }

    async fn insert_like(&self, op: Operation, mut row: RowData) -> OrmResult<i64> {
        self.stamp_insert(&mut row);
        let Some(args) = self.run_before(Verb::Insert, HookArgs::Insert { row }) else {
            return Ok(0);
        };
        let HookArgs::Insert { row } = args else {
            return Err(OrmError::consistency(
                "insert hook rewrote arguments for a different verb",
            ));
        };
        let rendered = {
            let mut builder = self.lock_builder();
            builder.set_operation(op);
            builder.set_row(row.clone());
            builder.create()
        };
        let result = match rendered {
            Ok(rendered) => self.write_run(&rendered).await,
            Err(error) => Err(error),
        };
        self.clear_builder();
        let affected = result?;

        let conn = self.write_connection().await?;
        let generated = conn.last_insert_id().await?;
        let input_id = row
            .get(self.primary_key())
            .and_then(value_to_i64)
            .unwrap_or(0);
        let id = match op {
            Operation::InsertIgnore => {
                if affected > 0 && generated > 0 {
                    generated
                } else {
                    input_id
                }
            }
            Operation::Replace => {
                if generated > 0 {
                    generated
                } else {
                    input_id
                }
            }
            _ => generated,
        };
        let value = self.run_after(Verb::Insert, Value::from(id));
        Ok(value.as_i64().unwrap_or(id))
    }

    /// Multi-row insert; returns the affected-row count.
    pub async fn inserts(&self, rows: Vec<RowData>) -> OrmResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let rows = {
            let mut rows = rows;
            for row in &mut rows {
                self.stamp_insert(row);
            }
            rows
        };
        let Some(args) = self.run_before(Verb::Insert, HookArgs::Inserts { rows }) else {
            return Ok(0);
        };
        let HookArgs::Inserts { rows } = args else {
            return Err(OrmError::consistency(
                "insert hook rewrote arguments for a different verb",
            ));
        };
        let rendered = {
            let mut builder = self.lock_builder();
            builder.set_operation(Operation::Inserts);
            builder.set_rows(rows);
            builder.create()
        };
        let result = match rendered {
            Ok(rendered) => self.write_run(&rendered).await,
            Err(error) => Err(error),
        };
        self.clear_builder();
        let affected = result?;
        let value = self.run_after(Verb::Insert, Value::from(affected));
        Ok(value.as_u64().unwrap_or(affected))
    }

    /// Update matching rows. A missing where condition is a consistency
    /// error; the statement never reaches the connection.
    pub async fn update(&self, row: RowData, cond: impl Into<Where>) -> OrmResult<u64> {
        let mut row = row;
        self.stamp_update(&mut row);
        let Some(args) = self.run_before(
            Verb::Update,
            HookArgs::Update {
                row,
                cond: cond.into(),
            },
        ) else {
            return Ok(0);
        };
        let HookArgs::Update { row, cond } = args else {
            return Err(OrmError::consistency(
                "update hook rewrote arguments for a different verb",
            ));
        };
        let snapshot = self.snapshot_rows(&cond).await;
        let rendered = {
            let mut builder = self.lock_builder();
            builder.set_operation(Operation::Update);
            builder.set_row(row);
            builder.set_where(cond.clone());
            builder.create()
        };
        let result = match rendered {
            Ok(rendered) => self.write_run(&rendered).await,
            Err(error) => Err(error),
        };
        self.clear_builder();
        let affected = result?;
        if let Some(before) = snapshot {
            self.log_update_diff(&cond, before).await;
        }
        let value = self.run_after(Verb::Update, Value::from(affected));
        Ok(value.as_u64().unwrap_or(affected))
    }

    /// Delete matching rows. A missing where condition is a consistency
    /// error; full-table deletion goes through [`Table::delete_all`].
    pub async fn delete(&self, cond: impl Into<Where>) -> OrmResult<u64> {
        self.delete_like(Operation::Delete, cond.into()).await
    }

    /// The one sanctioned full-table delete (`WHERE 1=1`).
    pub async fn delete_all(&self) -> OrmResult<u64> {
        self.delete_like(Operation::DeleteAll, Where::None).await
    }

    async fn delete_like(&self, op: Operation, cond: Where) -> OrmResult<u64> {
        let Some(args) = self.run_before(Verb::Delete, HookArgs::Delete { cond }) else {
            return Ok(0);
        };
        let HookArgs::Delete { cond } = args else {
            return Err(OrmError::consistency(
                "delete hook rewrote arguments for a different verb",
            ));
        };
        let rendered = {
            let mut builder = self.lock_builder();
            builder.set_operation(op);
            builder.set_where(cond);
            builder.create()
        };
        let result = match rendered {
            Ok(rendered) => self.write_run(&rendered).await,
            Err(error) => Err(error),
        };
        self.clear_builder();
        let affected = result?;
        let value = self.run_after(Verb::Delete, Value::from(affected));
        Ok(value.as_u64().unwrap_or(affected))
    }

    /// `field = field + amount` on matching rows, fully parametrized.
    pub async fn increase(
        &self,
        cond: impl Into<Where>,
        field: &str,
        amount: f64,
    ) -> OrmResult<u64> {
        self.crease(cond.into(), field, amount).await
    }

    /// `field = field - amount` on matching rows.
    pub async fn decrease(
        &self,
        cond: impl Into<Where>,
        field: &str,
        amount: f64,
    ) -> OrmResult<u64> {
        self.crease(cond.into(), field, -amount).await
    }

    async fn crease(&self, cond: Where, field: &str, amount: f64) -> OrmResult<u64> {
        let Some(args) = self.run_before(
            Verb::Crease,
            HookArgs::Crease {
                cond,
                field: field.to_string(),
                amount,
            },
        ) else {
            return Ok(0);
        };
        let HookArgs::Crease {
            cond,
            field,
            amount,
        } = args
        else {
            return Err(OrmError::consistency(
                "crease hook rewrote arguments for a different verb",
            ));
        };
        let rendered = {
            let mut builder = self.lock_builder();
            builder.set_operation(Operation::Crease);
            builder.set_crease(field, amount);
            builder.set_where(cond);
            builder.create()
        };
        let result = match rendered {
            Ok(rendered) => self.write_run(&rendered).await,
            Err(error) => Err(error),
        };
        self.clear_builder();
        let affected = result?;
        let value = self.run_after(Verb::Crease, Value::from(affected));
        Ok(value.as_u64().unwrap_or(affected))
    }

    // ==================== auto fields, audit ====================

    fn now(&self) -> String {
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    fn stamp_insert(&self, row: &mut RowData) {
        if !self.config.auto_timestamps {
            return;
        }
        let now = self.now();
        if !row.contains_key("created") {
            row.insert("created".to_string(), Value::String(now.clone()));
        }
        if !row.contains_key("updated") {
            row.insert("updated".to_string(), Value::String(now));
        }
    }

    fn stamp_update(&self, row: &mut RowData) {
        if !self.config.auto_timestamps {
            return;
        }
        if !row.contains_key("updated") {
            row.insert("updated".to_string(), Value::String(self.now()));
        }
    }

    /// Pre-update snapshot for the audit log. Only taken when snapshot
    /// logging is on and no more than 20 rows match; never fails the
    /// update.
    async fn snapshot_rows(&self, cond: &Where) -> Option<Vec<RowData>> {
        if !self.config.log_mutations || cond.is_none() {
            return None;
        }
        if cfg!(not(feature = "tracing")) {
            return None;
        }
        let rows = self.plain_select(cond, 21).await.ok()?;
        if rows.len() > 20 {
            return None;
        }
        Some(rows)
    }

    async fn log_update_diff(&self, cond: &Where, before: Vec<RowData>) {
        let Ok(after) = self.plain_select(cond, 21).await else {
            return;
        };
        #[cfg(feature = "tracing")]
        {
            // Bound outside the macro; its expansion shadows `Value`.
            let before = Value::Array(before.into_iter().map(Value::Object).collect());
            let after = Value::Array(after.into_iter().map(Value::Object).collect());
            tracing::info!(
                target: "tablelink::audit",
                table = %self.table_name(),
                before = %before,
                after = %after,
                "update"
            );
        }
        #[cfg(not(feature = "tracing"))]
        let _ = (before, after);
    }

    /// Direct select bypassing hooks and cache, used by the audit log.
    async fn plain_select(&self, cond: &Where, limit: u64) -> OrmResult<Vec<RowData>> {
        let mut stmt = Statement::new(
            Arc::clone(self.dialect()),
            self.table_name(),
            self.primary_key(),
        );
        stmt.set_operation(Operation::Select);
        stmt.set_where(cond.clone());
        stmt.set_limit(Limit::Count(limit));
        let rendered = stmt.create()?;
        let conn = self.read_connection().await?;
        conn.query(&rendered.prepare, &rendered.params).await
    }
}

/// Stream yielding nothing; the no-op result of an interrupted streaming
/// read.
struct EmptyRows;

impl Stream for EmptyRows {
    type Item = OrmResult<RowData>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(None)
    }
}

/// Wraps an unbuffered row stream and restores buffered mode once the
/// stream completes or is dropped.
struct UnbufferedRows {
    inner: RowStream,
    conn: Option<Arc<dyn Connection>>,
}

impl UnbufferedRows {
    /// Drop may run outside a runtime; skip the restore there instead of
    /// panicking in `spawn`.
    fn restore(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = conn.set_buffered(true).await;
                });
            }
        }
    }
}

impl Stream for UnbufferedRows {
    type Item = OrmResult<RowData>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                self.restore();
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for UnbufferedRows {
    fn drop(&mut self) {
        self.restore();
    }
}
