//! Statement builder.
//!
//! A [`Statement`] accumulates the shape of exactly one operation and then
//! renders it. Rendering produces four artifacts at once: the literal SQL
//! (logs, cache key), the placeholder SQL (execution), the ordered
//! parameter list, and the referenced table names. All four come from the
//! same shape, so the literal and placeholder forms can never drift apart.
//!
//! The builder is single-use: the owning table handle replaces it with a
//! fresh one after every terminal operation.


use std::sync::Arc;

use serde_json::Value;

use crate::dialect::{Clause, Dialect};
use crate::error::{OrmError, OrmResult};
use crate::shape::{Fields, GroupBy, Having, Join, JoinKind, Limit, OrderBy, RowData, Where};

/// Operation kind. Unset means a "null" statement, which refuses to render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Query,
    Execute,
    Select,
    SelectHandle,
    Insert,
    Inserts,
    InsertIgnore,
    Replace,
    Update,
    Delete,
    DeleteAll,
    Crease,
    Exist,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Query => "query",
            Operation::Execute => "execute",
            Operation::Select => "select",
            Operation::SelectHandle => "selectHandle",
            Operation::Insert => "insert",
            Operation::Inserts => "inserts",
            Operation::InsertIgnore => "insertIgnore",
            Operation::Replace => "replace",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::DeleteAll => "deleteAll",
            Operation::Crease => "crease",
            Operation::Exist => "exist",
        }
    }

    /// Reads consult the cache; everything else invalidates it.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Operation::Query | Operation::Select | Operation::SelectHandle | Operation::Exist
        )
    }
}

/// The rendered artifacts of one statement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rendered {
    /// Literal-inlined SQL, for logs and cache keys.
    pub sql: String,
    /// Placeholder SQL, for execution.
    pub prepare: String,
    /// Parameters bound to the placeholders, in order.
    pub params: Vec<Value>,
    /// Table names the statement touches. Empty when raw SQL could not be
    /// resolved.
    pub tables: Vec<String>,
}

/// Accumulates one operation's shape and renders it on demand.
pub struct Statement {
    dialect: Arc<dyn Dialect>,
    table: String,
    primary_key: String,
    operation: Option<Operation>,
    raw_sql: Option<String>,
    raw_params: Vec<Value>,
    fields: Fields,
    cond: Where,
    order: OrderBy,
    group: GroupBy,
    having: Having,
    limit: Limit,
    distinct: bool,
    joins: Vec<Join>,
    row: RowData,
    rows: Vec<RowData>,
    crease: Option<(String, f64)>,
    /// First fluent misuse, surfaced by `create()`.
    build_error: Option<String>,
    rendered: Option<Rendered>,
}

impl Statement {
    pub fn new(dialect: Arc<dyn Dialect>, table: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
            primary_key: primary_key.into(),
            operation: None,
            raw_sql: None,
            raw_params: Vec::new(),
            fields: Fields::default(),
            cond: Where::default(),
            order: OrderBy::default(),
            group: GroupBy::default(),
            having: Having::default(),
            limit: Limit::default(),
            distinct: false,
            joins: Vec::new(),
            row: RowData::new(),
            rows: Vec::new(),
            crease: None,
            build_error: None,
            rendered: None,
        }
    }

    /// Reset all accumulated shape, keeping identity and dialect.
    pub fn clear(&mut self) {
        let dialect = Arc::clone(&self.dialect);
        let table = std::mem::take(&mut self.table);
        let primary_key = std::mem::take(&mut self.primary_key);
        *self = Statement::new(dialect, table, primary_key);
    }

    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    fn touch(&mut self) {
        self.rendered = None;
    }

    // ==================== shape setters (last write wins) ====================

    pub fn set_operation(&mut self, op: Operation) {
        self.touch();
        self.operation = Some(op);
    }

    pub fn set_raw(&mut self, sql: impl Into<String>, params: Vec<Value>) {
        self.touch();
        self.raw_sql = Some(sql.into());
        self.raw_params = params;
    }

    pub fn set_fields(&mut self, fields: Fields) {
        self.touch();
        self.fields = fields;
    }

    pub fn set_where(&mut self, cond: Where) {
        self.touch();
        self.cond = cond;
    }

    pub fn set_order_by(&mut self, order: OrderBy) {
        self.touch();
        self.order = order;
    }

    pub fn set_group_by(&mut self, group: GroupBy) {
        self.touch();
        self.group = group;
    }

    pub fn set_having(&mut self, having: Having) {
        self.touch();
        self.having = having;
    }

    pub fn set_limit(&mut self, limit: Limit) {
        self.touch();
        self.limit = limit;
    }

    pub fn set_distinct(&mut self, distinct: bool) {
        self.touch();
        self.distinct = distinct;
    }

    pub fn set_row(&mut self, row: RowData) {
        self.touch();
        self.row = row;
    }

    pub fn set_rows(&mut self, rows: Vec<RowData>) {
        self.touch();
        self.rows = rows;
    }

    pub fn set_crease(&mut self, field: impl Into<String>, amount: f64) {
        self.touch();
        self.crease = Some((field.into(), amount));
    }

    pub fn where_shape(&self) -> &Where {
        &self.cond
    }

    pub fn order_shape(&self) -> &OrderBy {
        &self.order
    }

    pub fn limit_shape(&self) -> Limit {
        self.limit
    }

    /// Add a join target. The previous join must already have its ON
    /// condition attached.
    pub fn join(&mut self, kind: JoinKind, table: impl Into<String>) {
        self.touch();
        let table = table.into();
        if let Some(last) = self.joins.last() {
            if last.on.is_none() {
                self.defect(format!(
                    "join '{}' added while join '{}' still has no ON condition",
                    table, last.table
                ));
                return;
            }
        }
        self.joins.push(Join {
            kind,
            table,
            on: None,
        });
    }

    /// Attach the ON condition of the most recent join. Exactly one per
    /// join.
    pub fn on(&mut self, cond: impl Into<String>) {
        self.touch();
        match self.joins.last_mut() {
            None => self.defect("ON condition without a preceding join"),
            Some(join) if join.on.is_some() => {
                let table = join.table.clone();
                self.defect(format!("second ON condition for join '{table}'"));
            }
            Some(join) => join.on = Some(cond.into()),
        }
    }

    fn defect(&mut self, message: impl Into<String>) {
        if self.build_error.is_none() {
            self.build_error = Some(message.into());
        }
    }

    // ==================== rendering ====================

    /// Render the statement. Idempotent: a second call on an unmodified
    /// builder returns the memoized artifacts unchanged.
    pub fn create(&mut self) -> OrmResult<Rendered> {
        if let Some(message) = &self.build_error {
            return Err(OrmError::consistency(message.clone()));
        }
        if let Some(rendered) = &self.rendered {
            return Ok(rendered.clone());
        }
        let op = self.operation.ok_or_else(|| {
            OrmError::UnsupportedOperation("statement rendered without an operation".to_string())
        })?;
        let rendered = match op {
            Operation::Query | Operation::Execute => self.render_raw(op)?,
            Operation::Select | Operation::SelectHandle => self.render_select()?,
            Operation::Exist => self.render_exist()?,
            Operation::Insert => self.render_row(op)?,
            Operation::InsertIgnore => self.render_row(op)?,
            Operation::Replace => self.render_row(op)?,
            Operation::Inserts => self.render_rows()?,
            Operation::Update => self.render_update()?,
            Operation::Delete => self.render_delete(self.where_clause_required("delete")?),
            Operation::DeleteAll => {
                let all = Clause {
                    sql: "1=1".to_string(),
                    prepare: "1=1".to_string(),
                    params: Vec::new(),
                };
                self.render_delete(all)
            }
            Operation::Crease => self.render_crease()?,
        };
        self.rendered = Some(rendered.clone());
        Ok(rendered)
    }

    fn where_clause(&self) -> OrmResult<Clause> {
        self.dialect.render_where(&self.cond, &self.primary_key)
    }

    /// Update/delete/crease refuse to run unconditioned. Full-table
    /// mutation has its own explicit verb (`deleteAll`).
    fn where_clause_required(&self, verb: &str) -> OrmResult<Clause> {
        if self.cond.is_none() {
            return Err(OrmError::consistency(format!(
                "{verb} on '{}' without a where condition",
                self.table
            )));
        }
        let clause = self.where_clause()?;
        if clause.is_empty() {
            return Err(OrmError::consistency(format!(
                "{verb} on '{}' rendered an empty where condition",
                self.table
            )));
        }
        Ok(clause)
    }

    fn render_raw(&self, op: Operation) -> OrmResult<Rendered> {
        let prepare = self.raw_sql.clone().ok_or_else(|| {
            OrmError::consistency(format!("{} without a SQL string", op.name()))
        })?;
        if placeholder_count(&prepare) != self.raw_params.len() {
            return Err(OrmError::bind(format!(
                "{} placeholders but {} parameters",
                placeholder_count(&prepare),
                self.raw_params.len()
            )));
        }
        let sql = inline_params(&prepare, &self.raw_params, self.dialect.as_ref());
        let tables = self.dialect.extract_tables(&prepare);
        Ok(Rendered {
            sql,
            prepare,
            params: self.raw_params.clone(),
            tables,
        })
    }

    fn select_tables(&self) -> Vec<String> {
        let mut tables = vec![self.table.clone()];
        for join in &self.joins {
            if !tables.contains(&join.table) {
                tables.push(join.table.clone());
            }
        }
        tables
    }

    fn assemble_select(&self, fields: &Fields, limit: &Limit) -> OrmResult<Rendered> {
        let d = self.dialect.as_ref();
        let mut head = String::from("SELECT ");
        if self.distinct {
            head.push_str("DISTINCT ");
        }
        head.push_str(&d.render_fields(fields));
        head.push_str(&format!(" FROM {}", d.mark_field(&self.table)));

        let mut sql = head.clone();
        let mut prepare = head;
        let mut params = Vec::new();

        let joins = d.render_joins(&self.joins)?;
        if !joins.is_empty() {
            sql.push_str(&format!(" {joins}"));
            prepare.push_str(&format!(" {joins}"));
        }
        let cond = self.where_clause()?;
        if !cond.is_empty() {
            sql.push_str(&format!(" WHERE {}", cond.sql));
            prepare.push_str(&format!(" WHERE {}", cond.prepare));
            params.extend(cond.params);
        }
        let group = d.render_group_by(&self.group);
        if !group.is_empty() {
            sql.push_str(&format!(" {group}"));
            prepare.push_str(&format!(" {group}"));
        }
        let having = d.render_having(&self.having)?;
        if !having.is_empty() {
            sql.push_str(&format!(" HAVING {}", having.sql));
            prepare.push_str(&format!(" HAVING {}", having.prepare));
            params.extend(having.params);
        }
        let order = d.render_order_by(&self.order);
        if !order.is_empty() {
            sql.push_str(&format!(" {order}"));
            prepare.push_str(&format!(" {order}"));
        }
        let limit = d.render_limit(limit);
        if !limit.is_empty() {
            sql.push_str(&format!(" {limit}"));
            prepare.push_str(&format!(" {limit}"));
        }
        Ok(Rendered {
            sql,
            prepare,
            params,
            tables: self.select_tables(),
        })
    }

    fn render_select(&self) -> OrmResult<Rendered> {
        self.assemble_select(&self.fields, &self.limit)
    }

    fn render_exist(&self) -> OrmResult<Rendered> {
        let fields = Fields::Aliased(vec![("count(*)".to_string(), "cnt".to_string())]);
        self.assemble_select(&fields, &Limit::Count(1))
    }

    fn render_row(&self, op: Operation) -> OrmResult<Rendered> {
        let d = self.dialect.as_ref();
        let clause = match op {
            Operation::Insert => d.render_insert(&self.table, &self.row)?,
            Operation::InsertIgnore => d.render_insert_ignore(&self.table, &self.row)?,
            Operation::Replace => d.render_replace(&self.table, &self.row)?,
            other => {
                return Err(OrmError::UnsupportedOperation(format!(
                    "row payload render for '{}'",
                    other.name()
                )));
            }
        };
        Ok(self.from_clause(clause))
    }

    fn render_rows(&self) -> OrmResult<Rendered> {
        let clause = self.dialect.render_inserts(&self.table, &self.rows)?;
        Ok(self.from_clause(clause))
    }

    fn render_update(&self) -> OrmResult<Rendered> {
        let cond = self.where_clause_required("update")?;
        let clause = self.dialect.render_update(&self.table, &self.row, &cond)?;
        Ok(self.from_clause(clause))
    }

    fn render_delete(&self, cond: Clause) -> Rendered {
        self.from_clause(self.dialect.render_delete(&self.table, &cond))
    }

    fn render_crease(&self) -> OrmResult<Rendered> {
        let (field, amount) = self.crease.clone().ok_or_else(|| {
            OrmError::consistency("crease without a field")
        })?;
        let cond = self.where_clause_required("crease")?;
        Ok(self.from_clause(self.dialect.render_crease(&self.table, &field, amount, &cond)))
    }

    fn from_clause(&self, clause: Clause) -> Rendered {
        Rendered {
            sql: clause.sql,
            prepare: clause.prepare,
            params: clause.params,
            tables: vec![self.table.clone()],
        }
    }
}

/// Count `?` placeholders outside single-quoted literals.
pub fn placeholder_count(sql: &str) -> usize {
    let mut count = 0;
    let mut in_string = false;
    for c in sql.chars() {
        match c {
            '\'' => in_string = !in_string,
            '?' if !in_string => count += 1,
            _ => {}
        }
    }
    count
}

/// Inline parameters into `?` placeholders for the literal form. Best
/// effort: quoted regions are left alone, leftover placeholders stay.
fn inline_params(sql: &str, params: &[Value], dialect: &dyn Dialect) -> String {
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut next = params.iter();
    let mut in_string = false;
    for c in sql.chars() {
        match c {
            '\'' => {
                in_string = !in_string;
                out.push(c);
            }
            '?' if !in_string => match next.next() {
                Some(value) => out.push_str(&dialect.escape(value)),
                None => out.push(c),
            },
            _ => out.push(c),
        }
    }
    out
}
