//! Relation descriptors.
//!
//! Row/result merges (`map`/`join`) take a loose relation spec: a bare
//! field (remote key defaults to the target's conventional primary key),
//! `"local=remote"`, or an explicit pair. Record-level relations are
//! declared up front as [`RelationDef`] entries on a record type.

use serde_json::Value;

use crate::error::{OrmError, OrmResult};
use crate::shape::RowData;

/// Loose relation spec accepted by `map`/`join`.
#[derive(Clone, Debug, PartialEq)]
pub enum RelationSpec {
    /// `"dept_id"` or `"dept_id=id"`.
    Text(String),
    /// Explicit (local, remote) pair.
    Pair(String, String),
}

impl From<&str> for RelationSpec {
    fn from(s: &str) -> Self {
        RelationSpec::Text(s.to_string())
    }
}

impl From<String> for RelationSpec {
    fn from(s: String) -> Self {
        RelationSpec::Text(s)
    }
}

impl From<(&str, &str)> for RelationSpec {
    fn from((local, remote): (&str, &str)) -> Self {
        RelationSpec::Pair(local.to_string(), remote.to_string())
    }
}

impl RelationSpec {
    /// Normalize to a (local, remote) key pair. A bare field implies
    /// `default_remote` ("id" for relational targets, "_id" for document
    /// collections).
    pub fn resolve(&self, default_remote: &str) -> OrmResult<(String, String)> {
        match self {
            RelationSpec::Pair(local, remote) => {
                if local.is_empty() || remote.is_empty() {
                    return Err(OrmError::relation_format(
                        "relation pair with an empty side",
                    ));
                }
                Ok((local.clone(), remote.clone()))
            }
            RelationSpec::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(OrmError::relation_format("empty relation descriptor"));
                }
                match text.split_once('=') {
                    None => Ok((text.to_string(), default_remote.to_string())),
                    Some((local, remote)) => {
                        let (local, remote) = (local.trim(), remote.trim());
                        if local.is_empty() || remote.is_empty() {
                            return Err(OrmError::relation_format(format!(
                                "malformed relation descriptor '{text}'"
                            )));
                        }
                        Ok((local.to_string(), remote.to_string()))
                    }
                }
            }
        }
    }
}

/// Record-level relation kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
    BelongsToMany,
}

/// Junction-table wiring for many-to-many relations.
#[derive(Clone, Debug, PartialEq)]
pub struct MiddleTable {
    pub table: String,
    /// Column holding this side's primary key.
    pub self_key: String,
    /// Column holding the target side's primary key.
    pub target_key: String,
}

/// One declared relation on a record type.
#[derive(Clone, Debug)]
pub struct RelationDef {
    pub kind: RelationKind,
    /// Target table alias (or collection).
    pub target: String,
    /// Key column on this record.
    pub local_key: String,
    /// Key column on the target.
    pub foreign_key: String,
    pub middle: Option<MiddleTable>,
    /// Extra filter merged into the relation query.
    pub cond: Option<RowData>,
    pub order: Option<String>,
}

impl RelationDef {
    pub fn has_one(target: &str, local_key: &str, foreign_key: &str) -> Self {
        Self::plain(RelationKind::HasOne, target, local_key, foreign_key)
    }

    pub fn has_many(target: &str, local_key: &str, foreign_key: &str) -> Self {
        Self::plain(RelationKind::HasMany, target, local_key, foreign_key)
    }

    pub fn belongs_to(target: &str, local_key: &str, foreign_key: &str) -> Self {
        Self::plain(RelationKind::BelongsTo, target, local_key, foreign_key)
    }

    pub fn belongs_to_many(target: &str, local_key: &str, foreign_key: &str, middle: MiddleTable) -> Self {
        Self {
            middle: Some(middle),
            ..Self::plain(RelationKind::BelongsToMany, target, local_key, foreign_key)
        }
    }

    fn plain(kind: RelationKind, target: &str, local_key: &str, foreign_key: &str) -> Self {
        Self {
            kind,
            target: target.to_string(),
            local_key: local_key.to_string(),
            foreign_key: foreign_key.to_string(),
            middle: None,
            cond: None,
            order: None,
        }
    }

    pub fn with_cond(mut self, cond: RowData) -> Self {
        self.cond = Some(cond);
        self
    }

    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }
}

/// Distinct non-null values of one column across a row set, in first-seen
/// order. These are the secondary-query key values for `map`/`join`.
pub fn distinct_keys(rows: &[RowData], column: &str) -> Vec<Value> {
    let mut keys: Vec<Value> = Vec::new();
    for row in rows {
        if let Some(value) = row.get(column) {
            if !value.is_null() && !keys.contains(value) {
                keys.push(value.clone());
            }
        }
    }
    keys
}
