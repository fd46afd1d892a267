//! Active records.
//!
//! A [`Record`] wraps one row with change tracking: `old` holds the
//! last-loaded snapshot, `save` writes only the columns whose value
//! changed (structural equality) and inserts when the primary key is
//! absent. Declared relations resolve lazily through an explicit
//! [`Record::resolve`] call and are cached per instance. A [`RecordSet`]
//! is a relation-tagged collection whose `save` also deletes members whose
//! primary key vanished since load.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{OrmError, OrmResult};
use crate::relation::{RelationDef, RelationKind};
use crate::shape::{Fields, RowData, Where};
use crate::table::Link;

/// Static descriptor of a record type: table alias, primary key, declared
/// fields and relations.
#[derive(Clone, Debug)]
pub struct RecordType {
    pub table: String,
    pub primary_key: String,
    pub fields: Vec<String>,
    /// Declaration order matters for cascading removal.
    pub relations: Vec<(String, RelationDef)>,
}

impl RecordType {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: "id".to_string(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn primary_key(mut self, pk: impl Into<String>) -> Self {
        self.primary_key = pk.into();
        self
    }

    pub fn fields(mut self, fields: Vec<&str>) -> Self {
        self.fields = fields.into_iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn relation(mut self, name: impl Into<String>, def: RelationDef) -> Self {
        self.relations.push((name.into(), def));
        self
    }

    fn relation_def(&self, name: &str) -> Option<&RelationDef> {
        self.relations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, def)| def)
    }
}

/// A lazily resolved relation value.
pub enum Resolved {
    One(Box<Record>),
    Many(RecordSet),
}

/// One row with change tracking and lazy relation resolution.
pub struct Record {
    link: Arc<Link>,
    ty: Arc<RecordType>,
    data: RowData,
    old: RowData,
    resolved: HashMap<String, Resolved>,
}

impl Record {
    pub fn new(link: Arc<Link>, ty: Arc<RecordType>) -> Self {
        Self {
            link,
            ty,
            data: RowData::new(),
            old: RowData::new(),
            resolved: HashMap::new(),
        }
    }

    /// A record in loaded state, its snapshot equal to `data`.
    pub fn from_data(link: Arc<Link>, ty: Arc<RecordType>, data: RowData) -> Self {
        Self {
            link,
            old: data.clone(),
            data,
            ty,
            resolved: HashMap::new(),
        }
    }

    pub fn record_type(&self) -> &Arc<RecordType> {
        &self.ty
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) -> &mut Self {
        self.data.insert(field.into(), value);
        self
    }

    pub fn data(&self) -> &RowData {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Primary key value, when present and non-null.
    pub fn pk_value(&self) -> Option<Value> {
        self.data
            .get(&self.ty.primary_key)
            .filter(|v| !v.is_null())
            .cloned()
    }

    pub fn is_new(&self) -> bool {
        self.pk_value().is_none()
    }

    /// Columns changed since the last load/save, by structural equality.
    pub fn changed(&self) -> RowData {
        self.data
            .iter()
            .filter(|(column, value)| {
                *column != &self.ty.primary_key && self.old.get(*column) != Some(value)
            })
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect()
    }

    /// Load one row by primary key scalar or condition map. A missing
    /// condition is a [`OrmError::RecordLoad`]; a missing row is
    /// [`OrmError::NotFound`].
    pub async fn load(&mut self, cond: impl Into<Where>) -> OrmResult<()> {
        let cond = cond.into();
        if cond.is_none() {
            return Err(OrmError::record_load(format!(
                "loading a '{}' record requires a primary key or condition",
                self.ty.table
            )));
        }
        let fields = if self.ty.fields.is_empty() {
            Fields::All
        } else {
            Fields::List(self.ty.fields.clone())
        };
        let table = self.link.table(&self.ty.table);
        table.limit(1u64);
        let rows = table.select_array(fields, cond).await?;
        let Some(row) = rows.into_iter().next() else {
            return Err(OrmError::NotFound(format!(
                "no '{}' record matched",
                self.ty.table
            )));
        };
        self.data = row.clone();
        self.old = row;
        self.resolved.clear();
        Ok(())
    }

    /// Save this record and every already-resolved relation. Updates write
    /// only the changed columns; a record without a primary key inserts
    /// and adopts the generated id.
    pub fn save(&mut self) -> Pin<Box<dyn Future<Output = OrmResult<i64>> + Send + '_>> {
        Box::pin(async move {
            let table = self.link.table(&self.ty.table);
            let id = match self.pk_value() {
                None => {
                    let id = table.insert(self.data.clone()).await?;
                    if id > 0 {
                        self.data
                            .insert(self.ty.primary_key.clone(), Value::from(id));
                    }
                    id
                }
                Some(pk) => {
                    let diff = self.changed();
                    if !diff.is_empty() {
                        table.update(diff, Where::Pk(pk.clone())).await?;
                    }
                    pk.as_i64().unwrap_or(0)
                }
            };
            self.old = self.data.clone();

            for resolved in self.resolved.values_mut() {
                match resolved {
                    Resolved::One(record) => {
                        record.save().await?;
                    }
                    Resolved::Many(set) => set.save().await?,
                }
            }
            Ok(id)
        })
    }

    /// Resolve a declared relation, caching the value on this record.
    pub async fn resolve(&mut self, name: &str) -> OrmResult<&Resolved> {
        self.ensure_resolved(name).await?;
        self.resolved
            .get(name)
            .ok_or_else(|| Self::unknown_relation(&self.ty, name))
    }

    /// Like [`Record::resolve`], but the cached value can be edited (add or
    /// drop related records before a save).
    pub async fn resolve_mut(&mut self, name: &str) -> OrmResult<&mut Resolved> {
        self.ensure_resolved(name).await?;
        let ty = Arc::clone(&self.ty);
        self.resolved
            .get_mut(name)
            .ok_or_else(|| Self::unknown_relation(&ty, name))
    }

    async fn ensure_resolved(&mut self, name: &str) -> OrmResult<()> {
        if !self.resolved.contains_key(name) {
            let def = self
                .ty
                .relation_def(name)
                .cloned()
                .ok_or_else(|| Self::unknown_relation(&self.ty, name))?;
            let value = self.resolve_fresh(&def).await?;
            self.resolved.insert(name.to_string(), value);
        }
        Ok(())
    }

    fn unknown_relation(ty: &RecordType, name: &str) -> OrmError {
        OrmError::relation_format(format!(
            "record type '{}' declares no relation '{name}'",
            ty.table
        ))
    }

    /// Drop a cached relation so the next `resolve` re-queries.
    pub fn unresolve(&mut self, name: &str) {
        self.resolved.remove(name);
    }

    fn child_type(&self, def: &RelationDef) -> Arc<RecordType> {
        let table = self.link.table(&def.target);
        Arc::new(RecordType::new(def.target.clone()).primary_key(table.primary_key()))
    }

    fn relation_cond(&self, def: &RelationDef, key_column: &str, key: &Value) -> Where {
        let mut cond = RowData::new();
        cond.insert(key_column.to_string(), key.clone());
        if let Some(extra) = &def.cond {
            for (column, value) in extra {
                cond.insert(column.clone(), value.clone());
            }
        }
        Where::Map(cond)
    }

    async fn relation_rows(
        &self,
        def: &RelationDef,
        key_column: &str,
        key: &Value,
    ) -> OrmResult<Vec<RowData>> {
        let table = self.link.table(&def.target);
        if let Some(order) = &def.order {
            table.order_by(order.as_str());
        }
        table
            .select_array(Fields::All, self.relation_cond(def, key_column, key))
            .await
    }

    async fn resolve_fresh(&self, def: &RelationDef) -> OrmResult<Resolved> {
        let child_ty = self.child_type(def);
        let local = self.data.get(&def.local_key).cloned().unwrap_or(Value::Null);

        match def.kind {
            RelationKind::HasOne | RelationKind::BelongsTo => {
                let record = if local.is_null() {
                    Record::new(Arc::clone(&self.link), child_ty)
                } else {
                    let table = self.link.table(&def.target);
                    table.limit(1u64);
                    let rows = table
                        .select_array(Fields::All, self.relation_cond(def, &def.foreign_key, &local))
                        .await?;
                    match rows.into_iter().next() {
                        // No match still yields a record, just an empty one.
                        None => Record::new(Arc::clone(&self.link), child_ty),
                        Some(row) => Record::from_data(Arc::clone(&self.link), child_ty, row),
                    }
                };
                Ok(Resolved::One(Box::new(record)))
            }
            RelationKind::HasMany => {
                let rows = if local.is_null() {
                    Vec::new()
                } else {
                    self.relation_rows(def, &def.foreign_key, &local).await?
                };
                Ok(Resolved::Many(RecordSet::from_rows(
                    Arc::clone(&self.link),
                    child_ty,
                    def.clone(),
                    local,
                    rows,
                )))
            }
            RelationKind::BelongsToMany => {
                let middle = def.middle.as_ref().ok_or_else(|| {
                    OrmError::relation_format(format!(
                        "belongsToMany relation to '{}' has no middle table",
                        def.target
                    ))
                })?;
                let rows = if local.is_null() {
                    Vec::new()
                } else {
                    let mut link_cond = RowData::new();
                    link_cond.insert(middle.self_key.clone(), local.clone());
                    let target_keys = self
                        .link
                        .table(&middle.table)
                        .col(&middle.target_key, Where::Map(link_cond))
                        .await?;
                    if target_keys.is_empty() {
                        Vec::new()
                    } else {
                        let mut cond = RowData::new();
                        cond.insert(
                            format!("{} in", def.foreign_key),
                            Value::Array(target_keys),
                        );
                        if let Some(extra) = &def.cond {
                            for (column, value) in extra {
                                cond.insert(column.clone(), value.clone());
                            }
                        }
                        self.link
                            .table(&def.target)
                            .select_array(Fields::All, Where::Map(cond))
                            .await?
                    }
                };
                Ok(Resolved::Many(RecordSet::from_rows(
                    Arc::clone(&self.link),
                    child_ty,
                    def.clone(),
                    local,
                    rows,
                )))
            }
        }
    }

    /// Delete this record, cascading through hasOne/hasMany children and
    /// many-to-many link rows. A visited set bounds cyclic declarations.
    pub async fn remove(&mut self) -> OrmResult<u64> {
        let mut visited = HashSet::new();
        self.remove_with(&mut visited).await
    }

    fn remove_with<'a>(
        &'a mut self,
        visited: &'a mut HashSet<String>,
    ) -> Pin<Box<dyn Future<Output = OrmResult<u64>> + Send + 'a>> {
        Box::pin(async move {
            let Some(pk) = self.pk_value() else {
                return Err(OrmError::record_load(format!(
                    "removing an unsaved '{}' record",
                    self.ty.table
                )));
            };
            let tag = format!("{}:{}", self.ty.table, pk);
            if !visited.insert(tag) {
                return Ok(0);
            }

            for (_, def) in self.ty.relations.clone() {
                match def.kind {
                    RelationKind::HasOne | RelationKind::HasMany => {
                        let local = self.data.get(&def.local_key).cloned().unwrap_or(Value::Null);
                        if local.is_null() {
                            continue;
                        }
                        let rows = self.relation_rows(&def, &def.foreign_key, &local).await?;
                        let child_ty = self.child_type(&def);
                        for row in rows {
                            let mut child = Record::from_data(
                                Arc::clone(&self.link),
                                Arc::clone(&child_ty),
                                row,
                            );
                            child.remove_with(visited).await?;
                        }
                    }
                    RelationKind::BelongsToMany => {
                        if let Some(middle) = &def.middle {
                            let mut cond = RowData::new();
                            cond.insert(middle.self_key.clone(), pk.clone());
                            self.link
                                .table(&middle.table)
                                .delete(Where::Map(cond))
                                .await?;
                        }
                    }
                    // Parents are never cascaded into.
                    RelationKind::BelongsTo => {}
                }
            }

            self.resolved.clear();
            self.link
                .table(&self.ty.table)
                .delete(Where::Pk(pk))
                .await
        })
    }
}

/// A relation-tagged collection of records.
///
/// Tracks the primary keys present at load time so `save` can delete
/// members that were removed from the live set: hasMany members are
/// deleted from the target table, belongsToMany members lose their
/// junction row.
pub struct RecordSet {
    link: Arc<Link>,
    ty: Arc<RecordType>,
    def: RelationDef,
    /// Owning record's key value for the relation.
    owner_key: Value,
    records: Vec<Record>,
    old_primary_keys: Vec<Value>,
}

impl RecordSet {
    pub(crate) fn from_rows(
        link: Arc<Link>,
        ty: Arc<RecordType>,
        def: RelationDef,
        owner_key: Value,
        rows: Vec<RowData>,
    ) -> Self {
        let records: Vec<Record> = rows
            .into_iter()
            .map(|row| Record::from_data(Arc::clone(&link), Arc::clone(&ty), row))
            .collect();
        let old_primary_keys = records.iter().filter_map(Record::pk_value).collect();
        Self {
            link,
            ty,
            def,
            owner_key,
            records,
            old_primary_keys,
        }
    }

    pub fn kind(&self) -> RelationKind {
        self.def.kind
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add a member to the live set. It is persisted on the next `save`.
    pub fn add(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Drop a member from the live set by primary key. The row itself is
    /// deleted on the next `save`.
    pub fn remove(&mut self, pk: &Value) {
        self.records.retain(|r| r.pk_value().as_ref() != Some(pk));
    }

    /// Save every member, then reconcile against the keys present at
    /// load: vanished hasMany members are deleted from the target table,
    /// vanished belongsToMany members lose their junction row (and new
    /// members gain one).
    pub fn save(&mut self) -> Pin<Box<dyn Future<Output = OrmResult<()>> + Send + '_>> {
        Box::pin(async move {
            if self.def.kind == RelationKind::HasMany && !self.owner_key.is_null() {
                // Keep children pointing at their owner.
                for record in &mut self.records {
                    record.set(self.def.foreign_key.clone(), self.owner_key.clone());
                }
            }
            for record in &mut self.records {
                record.save().await?;
            }

            let live: Vec<Value> = self.records.iter().filter_map(Record::pk_value).collect();
            for vanished in self
                .old_primary_keys
                .iter()
                .filter(|pk| !live.contains(pk))
                .cloned()
                .collect::<Vec<_>>()
            {
                match (self.def.kind, &self.def.middle) {
                    (RelationKind::BelongsToMany, Some(middle)) => {
                        let mut cond = RowData::new();
                        cond.insert(middle.self_key.clone(), self.owner_key.clone());
                        cond.insert(middle.target_key.clone(), vanished);
                        self.link
                            .table(&middle.table)
                            .delete(Where::Map(cond))
                            .await?;
                    }
                    _ => {
                        self.link
                            .table(&self.ty.table)
                            .delete(Where::Pk(vanished))
                            .await?;
                    }
                }
            }

            if let (RelationKind::BelongsToMany, Some(middle)) = (self.def.kind, &self.def.middle) {
                for added in live.iter().filter(|pk| !self.old_primary_keys.contains(pk)) {
                    let mut row = RowData::new();
                    row.insert(middle.self_key.clone(), self.owner_key.clone());
                    row.insert(middle.target_key.clone(), added.clone());
                    self.link.table(&middle.table).insert_ignore(row).await?;
                }
            }

            self.old_primary_keys = live;
            Ok(())
        })
    }
}
