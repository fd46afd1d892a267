//! SQL dialect capability.
//!
//! The statement builder never concatenates SQL itself; every clause is
//! rendered through a [`Dialect`]. Each rendering method produces both a
//! literal form (for logs and cache keys) and a placeholder form (for
//! execution) from the same input, so the two always describe the same
//! logical statement.

mod mysql;

#[cfg(test)]
mod tests;

pub use mysql::MysqlDialect;

use crate::error::OrmResult;
use crate::shape::{Fields, Having, Join, Limit, RowData, Where};
use serde_json::Value;

/// A rendered condition or statement fragment.
///
/// `sql` carries inlined literals, `prepare` carries placeholders, and
/// `params` binds to those placeholders in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Clause {
    pub sql: String,
    pub prepare: String,
    pub params: Vec<Value>,
}

impl Clause {
    pub fn is_empty(&self) -> bool {
        self.prepare.is_empty()
    }
}

/// One foreign-key declaration parsed out of a create-table statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Dialect capability consumed by the statement builder and table handles.
pub trait Dialect: Send + Sync {
    /// Quote a plain column or table identifier. Expressions (anything
    /// containing an operator, function call, dot path or wildcard) pass
    /// through untouched.
    fn mark_field(&self, field: &str) -> String;

    /// Render a value as an inline SQL literal.
    fn escape(&self, value: &Value) -> String;

    fn render_fields(&self, fields: &Fields) -> String;

    /// Render a where shape as a bare condition (no `WHERE` keyword).
    /// `primary_key` resolves the scalar shorthand.
    fn render_where(&self, cond: &Where, primary_key: &str) -> OrmResult<Clause>;

    fn render_having(&self, having: &Having) -> OrmResult<Clause>;

    /// Full `... JOIN ... ON ...` fragment, empty string when no joins.
    fn render_joins(&self, joins: &[Join]) -> OrmResult<String>;

    /// Full `ORDER BY ...` fragment, empty string when unset.
    fn render_order_by(&self, order: &crate::shape::OrderBy) -> String;

    /// Full `GROUP BY ...` fragment, empty string when unset.
    fn render_group_by(&self, group: &crate::shape::GroupBy) -> String;

    /// Full `LIMIT ...` fragment, empty string when unset.
    fn render_limit(&self, limit: &Limit) -> String;

    fn render_insert(&self, table: &str, row: &RowData) -> OrmResult<Clause>;

    fn render_inserts(&self, table: &str, rows: &[RowData]) -> OrmResult<Clause>;

    fn render_insert_ignore(&self, table: &str, row: &RowData) -> OrmResult<Clause>;

    fn render_replace(&self, table: &str, row: &RowData) -> OrmResult<Clause>;

    fn render_update(&self, table: &str, row: &RowData, cond: &Clause) -> OrmResult<Clause>;

    fn render_delete(&self, table: &str, cond: &Clause) -> Clause;

    /// `UPDATE t SET field = field + ? WHERE ...`; a negative amount
    /// decreases.
    fn render_crease(&self, table: &str, field: &str, amount: f64, cond: &Clause) -> Clause;

    /// Best-effort table-name extraction from raw SQL. Unresolvable input
    /// yields an empty list, never an error.
    fn extract_tables(&self, sql: &str) -> Vec<String>;

    fn describe_sql(&self, table: &str) -> String;

    fn indexes_sql(&self, table: &str) -> String;

    fn create_table_sql(&self, table: &str) -> String;

    /// Parse foreign-key declarations out of a create-table statement.
    fn parse_foreign_keys(&self, create_sql: &str) -> Vec<ForeignKey>;
}
