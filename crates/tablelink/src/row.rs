//! Row and row-set views over query results, with relation merges.
//!
//! `map` is the 1:1 merge: one secondary query keyed by the distinct
//! local-key values, remote columns folded into each row without
//! overwriting, empty-string placeholders for rows with no match so every
//! row keeps a uniform shape. `join` is the 1:N merge: remote rows grouped
//! by the remote key and attached under the target's alias as one nested
//! field per parent row. The `_doc` variants run against a document store
//! and default the remote key to `_id`.

use std::collections::HashMap;

use serde_json::Value;

use crate::document::DocumentStore;
use crate::error::OrmResult;
use crate::relation::{distinct_keys, RelationSpec};
use crate::shape::{Fields, RowData, Where};
use crate::table::Table;

/// A single-record view over one column→value mapping.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    data: RowData,
}

impl Row {
    pub fn new(data: RowData) -> Self {
        Self { data }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn data(&self) -> &RowData {
        &self.data
    }

    pub fn into_data(self) -> RowData {
        self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 1:1 relation merge into this row.
    pub async fn map(
        &mut self,
        target: &Table,
        spec: impl Into<RelationSpec>,
        fields: impl Into<Fields>,
    ) -> OrmResult<&mut Self> {
        map_into(std::slice::from_mut(&mut self.data), target, spec.into(), fields.into()).await?;
        Ok(self)
    }

    /// 1:N relation merge; the group lands under the target's alias.
    pub async fn join(
        &mut self,
        target: &Table,
        spec: impl Into<RelationSpec>,
        fields: impl Into<Fields>,
    ) -> OrmResult<&mut Self> {
        join_into(std::slice::from_mut(&mut self.data), target, spec.into(), fields.into()).await?;
        Ok(self)
    }
}

/// An ordered sequence of rows plus the raw mapping list they came from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowSet {
    raw: Vec<RowData>,
}

impl RowSet {
    pub fn new(raw: Vec<RowData>) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &[RowData] {
        &self.raw
    }

    pub fn into_raw(self) -> Vec<RowData> {
        self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Materialize `Row` views. Re-call after a relation merge; merges
    /// mutate the raw mappings.
    pub fn rows(&self) -> Vec<Row> {
        self.raw.iter().cloned().map(Row::new).collect()
    }

    pub fn first(&self) -> Option<Row> {
        self.raw.first().cloned().map(Row::new)
    }

    /// 1:1 relation merge across every row.
    pub async fn map(
        &mut self,
        target: &Table,
        spec: impl Into<RelationSpec>,
        fields: impl Into<Fields>,
    ) -> OrmResult<&mut Self> {
        map_into(&mut self.raw, target, spec.into(), fields.into()).await?;
        Ok(self)
    }

    /// 1:N relation merge across every row.
    pub async fn join(
        &mut self,
        target: &Table,
        spec: impl Into<RelationSpec>,
        fields: impl Into<Fields>,
    ) -> OrmResult<&mut Self> {
        join_into(&mut self.raw, target, spec.into(), fields.into()).await?;
        Ok(self)
    }

    /// 1:1 merge against a document collection (remote key defaults to
    /// `_id`).
    pub async fn map_doc(
        &mut self,
        store: &dyn DocumentStore,
        collection: &str,
        spec: impl Into<RelationSpec>,
        fields: &[String],
    ) -> OrmResult<&mut Self> {
        let (local, remote) = spec.into().resolve("_id")?;
        let keys = distinct_keys(&self.raw, &local);
        let remote_rows = if keys.is_empty() {
            Vec::new()
        } else {
            let mut filter = RowData::new();
            filter.insert(remote.clone(), Value::Array(keys));
            store.find(collection, &filter, fields, &RowData::new()).await?
        };
        let requested = if fields.is_empty() {
            None
        } else {
            Some(fields.to_vec())
        };
        merge_map(&mut self.raw, &local, &remote, &remote_rows, requested);
        Ok(self)
    }

    /// 1:N merge against a document collection, grouped under the
    /// collection name.
    pub async fn join_doc(
        &mut self,
        store: &dyn DocumentStore,
        collection: &str,
        spec: impl Into<RelationSpec>,
        fields: &[String],
        sort: RowData,
    ) -> OrmResult<&mut Self> {
        let (local, remote) = spec.into().resolve("_id")?;
        let keys = distinct_keys(&self.raw, &local);
        let remote_rows = if keys.is_empty() {
            Vec::new()
        } else {
            let mut filter = RowData::new();
            filter.insert(remote.clone(), Value::Array(keys));
            store.find(collection, &filter, fields, &sort).await?
        };
        merge_join(&mut self.raw, &local, &remote, remote_rows, collection);
        Ok(self)
    }
}

async fn map_into(
    rows: &mut [RowData],
    target: &Table,
    spec: RelationSpec,
    fields: Fields,
) -> OrmResult<()> {
    let (local, remote) = spec.resolve("id")?;
    let requested = fields.names();
    let keys = distinct_keys(rows, &local);
    let remote_rows = if keys.is_empty() {
        Vec::new()
    } else {
        let fields = fields_with_key(fields, &remote);
        let mut cond = RowData::new();
        cond.insert(format!("{remote} in"), Value::Array(keys));
        target.select_array(fields, Where::Map(cond)).await?
    };
    merge_map(rows, &local, &remote, &remote_rows, requested);
    Ok(())
}

async fn join_into(
    rows: &mut [RowData],
    target: &Table,
    spec: RelationSpec,
    fields: Fields,
) -> OrmResult<()> {
    let (local, remote) = spec.resolve("id")?;
    let keys = distinct_keys(rows, &local);
    let remote_rows = if keys.is_empty() {
        Vec::new()
    } else {
        let fields = fields_with_key(fields, &remote);
        let mut cond = RowData::new();
        cond.insert(format!("{remote} in"), Value::Array(keys));
        target.select_array(fields, Where::Map(cond)).await?
    };
    merge_join(rows, &local, &remote, remote_rows, target.alias());
    Ok(())
}

/// Make sure the remote key column comes back with the secondary query.
fn fields_with_key(fields: Fields, key: &str) -> Fields {
    match fields {
        Fields::All => Fields::All,
        Fields::Raw(s) => {
            if s.split(',').any(|part| part.trim() == key) {
                Fields::Raw(s)
            } else {
                Fields::Raw(format!("{s}, {key}"))
            }
        }
        Fields::List(mut cols) => {
            if !cols.iter().any(|c| c == key) {
                cols.push(key.to_string());
            }
            Fields::List(cols)
        }
        Fields::Aliased(mut pairs) => {
            if !pairs.iter().any(|(_, alias)| alias == key) {
                pairs.push((key.to_string(), key.to_string()));
            }
            Fields::Aliased(pairs)
        }
    }
}

/// Loose values indexed by their JSON rendering, so `5` matches `5` across
/// rows regardless of the containers they came in.
fn value_key(value: &Value) -> String {
    value.to_string()
}

/// 1:1 merge. Matched remote columns fold into the row without overwriting
/// existing same-named columns; rows with no match get every requested
/// remote field set to an empty-string placeholder so all rows share one
/// shape.
pub(crate) fn merge_map(
    rows: &mut [RowData],
    local: &str,
    remote: &str,
    remote_rows: &[RowData],
    requested: Option<Vec<String>>,
) {
    let mut index: HashMap<String, &RowData> = HashMap::new();
    for remote_row in remote_rows {
        if let Some(key) = remote_row.get(remote) {
            index.entry(value_key(key)).or_insert(remote_row);
        }
    }
    let placeholder_fields: Vec<String> = match &requested {
        Some(fields) => fields.clone(),
        None => remote_rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default(),
    };

    for row in rows.iter_mut() {
        let matched = row
            .get(local)
            .filter(|v| !v.is_null())
            .and_then(|v| index.get(&value_key(v)));
        match matched {
            Some(remote_row) => {
                for (column, value) in remote_row.iter() {
                    if !row.contains_key(column) {
                        row.insert(column.clone(), value.clone());
                    }
                }
            }
            None => {
                for column in &placeholder_fields {
                    if !row.contains_key(column) {
                        row.insert(column.clone(), Value::String(String::new()));
                    }
                }
            }
        }
    }
}

/// 1:N merge. Remote rows grouped by the remote key; each parent row gets
/// the whole group under `field_name` (an empty list when nothing
/// matched).
pub(crate) fn merge_join(
    rows: &mut [RowData],
    local: &str,
    remote: &str,
    remote_rows: Vec<RowData>,
    field_name: &str,
) {
    let mut groups: HashMap<String, Vec<Value>> = HashMap::new();
    for remote_row in remote_rows {
        if let Some(key) = remote_row.get(remote) {
            groups
                .entry(value_key(key))
                .or_default()
                .push(Value::Object(remote_row.clone()));
        }
    }
    for row in rows.iter_mut() {
        let group = row
            .get(local)
            .filter(|v| !v.is_null())
            .and_then(|v| groups.get(&value_key(v)))
            .cloned()
            .unwrap_or_default();
        row.insert(field_name.to_string(), Value::Array(group));
    }
}
