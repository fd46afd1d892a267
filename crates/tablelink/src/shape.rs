//! Loosely-typed query-shape parameters.
//!
//! Every fluent setter on a table handle accepts several literal shorthand
//! forms (a raw string, a list, a column→value mapping). Each shape is a
//! tagged sum type with explicit `From` constructors so the accepted forms
//! are visible in the type system instead of being inferred at runtime.

use serde_json::{Map, Value};

/// Row data: an ordered column→value mapping.
pub type RowData = Map<String, Value>;

/// SELECT column list.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Fields {
    /// `*`
    #[default]
    All,
    /// Verbatim column expression, e.g. `"id, name"` or `"count(*)"`.
    Raw(String),
    /// Column list, each marked individually.
    List(Vec<String>),
    /// expression→alias pairs, e.g. `("count(*)", "cnt")`.
    Aliased(Vec<(String, String)>),
}

impl From<&str> for Fields {
    fn from(s: &str) -> Self {
        if s.is_empty() || s == "*" {
            Fields::All
        } else {
            Fields::Raw(s.to_string())
        }
    }
}

impl From<String> for Fields {
    fn from(s: String) -> Self {
        Fields::from(s.as_str())
    }
}

impl From<Vec<&str>> for Fields {
    fn from(cols: Vec<&str>) -> Self {
        Fields::List(cols.into_iter().map(|s| s.to_string()).collect())
    }
}

impl From<Vec<String>> for Fields {
    fn from(cols: Vec<String>) -> Self {
        Fields::List(cols)
    }
}

impl From<(&str, &str)> for Fields {
    fn from((expr, alias): (&str, &str)) -> Self {
        Fields::Aliased(vec![(expr.to_string(), alias.to_string())])
    }
}

impl From<Vec<(&str, &str)>> for Fields {
    fn from(pairs: Vec<(&str, &str)>) -> Self {
        Fields::Aliased(
            pairs
                .into_iter()
                .map(|(e, a)| (e.to_string(), a.to_string()))
                .collect(),
        )
    }
}

impl Fields {
    /// Column names this shape explicitly requests, if it names any.
    pub fn names(&self) -> Option<Vec<String>> {
        match self {
            Fields::All | Fields::Raw(_) => None,
            Fields::List(cols) => Some(cols.clone()),
            Fields::Aliased(pairs) => Some(pairs.iter().map(|(_, a)| a.clone()).collect()),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Fields::All)
    }
}

/// WHERE condition.
///
/// A mapping key ending in ` in` binds its (array) value as an IN list;
/// every other key is an equality test. A bare scalar means equality
/// against the handle's primary key.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Where {
    #[default]
    None,
    /// Verbatim condition text, e.g. `"status = 1 AND age > 18"`.
    Raw(String),
    /// Primary-key equality.
    Pk(Value),
    /// column→value mapping, joined with AND.
    Map(RowData),
}

impl From<&str> for Where {
    fn from(s: &str) -> Self {
        if s.trim().is_empty() {
            Where::None
        } else {
            Where::Raw(s.to_string())
        }
    }
}

impl From<String> for Where {
    fn from(s: String) -> Self {
        Where::from(s.as_str())
    }
}

impl From<i64> for Where {
    fn from(id: i64) -> Self {
        Where::Pk(Value::from(id))
    }
}

impl From<Value> for Where {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Where::None,
            Value::Object(map) => Where::Map(map),
            Value::String(s) => Where::from(s.as_str()),
            scalar => Where::Pk(scalar),
        }
    }
}

impl From<RowData> for Where {
    fn from(map: RowData) -> Self {
        if map.is_empty() {
            Where::None
        } else {
            Where::Map(map)
        }
    }
}

impl Where {
    pub fn is_none(&self) -> bool {
        matches!(self, Where::None)
    }
}

/// ORDER BY clause.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum OrderBy {
    #[default]
    None,
    /// Verbatim, e.g. `"created DESC, id"`.
    Raw(String),
    /// One entry per column expression.
    List(Vec<String>),
}

impl From<&str> for OrderBy {
    fn from(s: &str) -> Self {
        if s.trim().is_empty() {
            OrderBy::None
        } else {
            OrderBy::Raw(s.to_string())
        }
    }
}

impl From<String> for OrderBy {
    fn from(s: String) -> Self {
        OrderBy::from(s.as_str())
    }
}

impl From<Vec<&str>> for OrderBy {
    fn from(cols: Vec<&str>) -> Self {
        OrderBy::List(cols.into_iter().map(|s| s.to_string()).collect())
    }
}

/// GROUP BY clause.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum GroupBy {
    #[default]
    None,
    Raw(String),
    List(Vec<String>),
}

impl From<&str> for GroupBy {
    fn from(s: &str) -> Self {
        if s.trim().is_empty() {
            GroupBy::None
        } else {
            GroupBy::Raw(s.to_string())
        }
    }
}

impl From<Vec<&str>> for GroupBy {
    fn from(cols: Vec<&str>) -> Self {
        GroupBy::List(cols.into_iter().map(|s| s.to_string()).collect())
    }
}

/// HAVING condition. Same shorthand rules as [`Where`] minus the
/// primary-key scalar form.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Having {
    #[default]
    None,
    Raw(String),
    Map(RowData),
}

impl From<&str> for Having {
    fn from(s: &str) -> Self {
        if s.trim().is_empty() {
            Having::None
        } else {
            Having::Raw(s.to_string())
        }
    }
}

impl From<RowData> for Having {
    fn from(map: RowData) -> Self {
        if map.is_empty() {
            Having::None
        } else {
            Having::Map(map)
        }
    }
}

/// LIMIT clause.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Limit {
    #[default]
    None,
    /// `LIMIT n`
    Count(u64),
    /// `LIMIT offset, n`
    Range(u64, u64),
}

impl From<u64> for Limit {
    fn from(n: u64) -> Self {
        Limit::Count(n)
    }
}

impl From<(u64, u64)> for Limit {
    fn from((offset, n): (u64, u64)) -> Self {
        Limit::Range(offset, n)
    }
}

/// JOIN kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

/// One JOIN target with its ON condition. The condition is attached by a
/// separate `on` call; a join without one never reaches the render step.
#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub on: Option<String>,
}
