//! MySQL dialect.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{OrmError, OrmResult};
use crate::shape::{Fields, GroupBy, Having, Join, Limit, OrderBy, RowData, Where};

use super::{Clause, Dialect, ForeignKey};

/// Default dialect: backtick quoting, `?` placeholders, `INSERT IGNORE`,
/// `REPLACE INTO`, `LIMIT offset, count`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MysqlDialect;

fn table_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:from|join|into|update)\s+`?([A-Za-z_][A-Za-z0-9_]*)`?")
            .unwrap_or_else(|e| panic!("table extraction regex: {e}"))
    })
}

fn foreign_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"CONSTRAINT\s+`[^`]+`\s+FOREIGN KEY\s+\(`([^`]+)`\)\s+REFERENCES\s+`([^`]+)`\s+\(`([^`]+)`\)",
        )
        .unwrap_or_else(|e| panic!("foreign key regex: {e}"))
    })
}

impl MysqlDialect {
    /// One `column op value` pair in both literal and placeholder form.
    /// A key ending in ` in` binds its array value as an IN list; a null
    /// value renders as `IS NULL`.
    fn render_pair(&self, key: &str, value: &Value, out: &mut Clause) -> OrmResult<()> {
        if let Some(column) = key.strip_suffix(" in") {
            let items = match value {
                Value::Array(items) => items,
                other => {
                    return Err(OrmError::bind(format!(
                        "IN condition on '{column}' requires a list, got {other}"
                    )));
                }
            };
            let marked = self.mark_field(column.trim());
            let literals: Vec<String> = items.iter().map(|v| self.escape(v)).collect();
            let holes: Vec<&str> = items.iter().map(|_| "?").collect();
            out.sql
                .push_str(&format!("{} IN ({})", marked, literals.join(", ")));
            out.prepare
                .push_str(&format!("{} IN ({})", marked, holes.join(", ")));
            out.params.extend(items.iter().cloned());
            return Ok(());
        }

        let marked = self.mark_field(key);
        if value.is_null() {
            out.sql.push_str(&format!("{marked} IS NULL"));
            out.prepare.push_str(&format!("{marked} IS NULL"));
        } else {
            out.sql
                .push_str(&format!("{} = {}", marked, self.escape(value)));
            out.prepare.push_str(&format!("{marked} = ?"));
            out.params.push(value.clone());
        }
        Ok(())
    }

    fn render_map(&self, map: &RowData, glue: &str) -> OrmResult<Clause> {
        let mut out = Clause::default();
        for (i, (key, value)) in map.iter().enumerate() {
            if i > 0 {
                out.sql.push_str(glue);
                out.prepare.push_str(glue);
            }
            self.render_pair(key, value, &mut out)?;
        }
        Ok(out)
    }

    fn render_row_values(&self, columns: &[&String], row: &RowData, out: &mut Clause) {
        let mut literals = Vec::with_capacity(columns.len());
        for column in columns {
            let value = row.get(column.as_str()).cloned().unwrap_or(Value::Null);
            literals.push(self.escape(&value));
            out.params.push(value);
        }
        out.sql.push_str(&format!("({})", literals.join(", ")));
        out.prepare.push_str(&format!(
            "({})",
            columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ")
        ));
    }

    fn render_insert_like(&self, verb: &str, table: &str, rows: &[RowData]) -> OrmResult<Clause> {
        let first = rows
            .first()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| OrmError::consistency(format!("{verb} with an empty row")))?;
        let columns: Vec<&String> = first.keys().collect();
        let column_list = columns
            .iter()
            .map(|c| self.mark_field(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut out = Clause::default();
        let head = format!("{} `{}` ({}) VALUES ", verb, table, column_list);
        out.sql.push_str(&head);
        out.prepare.push_str(&head);
        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                out.sql.push_str(", ");
                out.prepare.push_str(", ");
            }
            self.render_row_values(&columns, row, &mut out);
        }
        Ok(out)
    }
}

impl Dialect for MysqlDialect {
    fn mark_field(&self, field: &str) -> String {
        let plain = !field.is_empty()
            && field
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if plain {
            format!("`{field}`")
        } else {
            field.to_string()
        }
    }

    fn escape(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''")),
            other => format!("'{}'", other.to_string().replace('\'', "''")),
        }
    }

    fn render_fields(&self, fields: &Fields) -> String {
        match fields {
            Fields::All => "*".to_string(),
            Fields::Raw(s) => s.clone(),
            Fields::List(cols) => cols
                .iter()
                .map(|c| self.mark_field(c))
                .collect::<Vec<_>>()
                .join(", "),
            Fields::Aliased(pairs) => pairs
                .iter()
                .map(|(expr, alias)| format!("{} AS {}", expr, self.mark_field(alias)))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    fn render_where(&self, cond: &Where, primary_key: &str) -> OrmResult<Clause> {
        match cond {
            Where::None => Ok(Clause::default()),
            Where::Raw(s) => Ok(Clause {
                sql: s.clone(),
                prepare: s.clone(),
                params: Vec::new(),
            }),
            Where::Pk(value) => {
                let mut out = Clause::default();
                self.render_pair(primary_key, value, &mut out)?;
                Ok(out)
            }
            Where::Map(map) => self.render_map(map, " AND "),
        }
    }

    fn render_having(&self, having: &Having) -> OrmResult<Clause> {
        match having {
            Having::None => Ok(Clause::default()),
            Having::Raw(s) => Ok(Clause {
                sql: s.clone(),
                prepare: s.clone(),
                params: Vec::new(),
            }),
            Having::Map(map) => self.render_map(map, " AND "),
        }
    }

    fn render_joins(&self, joins: &[Join]) -> OrmResult<String> {
        let mut parts = Vec::with_capacity(joins.len());
        for join in joins {
            let on = join.on.as_deref().ok_or_else(|| {
                OrmError::consistency(format!("join on '{}' has no ON condition", join.table))
            })?;
            parts.push(format!(
                "{} {} ON {}",
                join.kind.keyword(),
                self.mark_field(&join.table),
                on
            ));
        }
        Ok(parts.join(" "))
    }

    fn render_order_by(&self, order: &OrderBy) -> String {
        match order {
            OrderBy::None => String::new(),
            OrderBy::Raw(s) => format!("ORDER BY {s}"),
            OrderBy::List(cols) => format!("ORDER BY {}", cols.join(", ")),
        }
    }

    fn render_group_by(&self, group: &GroupBy) -> String {
        match group {
            GroupBy::None => String::new(),
            GroupBy::Raw(s) => format!("GROUP BY {s}"),
            GroupBy::List(cols) => format!(
                "GROUP BY {}",
                cols.iter()
                    .map(|c| self.mark_field(c))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    fn render_limit(&self, limit: &Limit) -> String {
        match limit {
            Limit::None => String::new(),
            Limit::Count(n) => format!("LIMIT {n}"),
            Limit::Range(offset, n) => format!("LIMIT {offset}, {n}"),
        }
    }

    fn render_insert(&self, table: &str, row: &RowData) -> OrmResult<Clause> {
        self.render_insert_like("INSERT INTO", table, std::slice::from_ref(row))
    }

    fn render_inserts(&self, table: &str, rows: &[RowData]) -> OrmResult<Clause> {
        self.render_insert_like("INSERT INTO", table, rows)
    }

    fn render_insert_ignore(&self, table: &str, row: &RowData) -> OrmResult<Clause> {
        self.render_insert_like("INSERT IGNORE INTO", table, std::slice::from_ref(row))
    }

    fn render_replace(&self, table: &str, row: &RowData) -> OrmResult<Clause> {
        self.render_insert_like("REPLACE INTO", table, std::slice::from_ref(row))
    }

    fn render_update(&self, table: &str, row: &RowData, cond: &Clause) -> OrmResult<Clause> {
        if row.is_empty() {
            return Err(OrmError::consistency("update with an empty row"));
        }
        let set = self.render_map(row, ", ")?;
        let mut params = set.params;
        params.extend(cond.params.iter().cloned());
        Ok(Clause {
            sql: format!("UPDATE `{}` SET {} WHERE {}", table, set.sql, cond.sql),
            prepare: format!(
                "UPDATE `{}` SET {} WHERE {}",
                table, set.prepare, cond.prepare
            ),
            params,
        })
    }

    fn render_delete(&self, table: &str, cond: &Clause) -> Clause {
        Clause {
            sql: format!("DELETE FROM `{}` WHERE {}", table, cond.sql),
            prepare: format!("DELETE FROM `{}` WHERE {}", table, cond.prepare),
            params: cond.params.clone(),
        }
    }

    fn render_crease(&self, table: &str, field: &str, amount: f64, cond: &Clause) -> Clause {
        let marked = self.mark_field(field);
        let mut params = vec![Value::from(amount)];
        params.extend(cond.params.iter().cloned());
        Clause {
            sql: format!(
                "UPDATE `{}` SET {} = {} + {} WHERE {}",
                table, marked, marked, amount, cond.sql
            ),
            prepare: format!(
                "UPDATE `{}` SET {} = {} + ? WHERE {}",
                table, marked, marked, cond.prepare
            ),
            params,
        }
    }

    fn extract_tables(&self, sql: &str) -> Vec<String> {
        let mut tables = Vec::new();
        for captures in table_regex().captures_iter(sql) {
            if let Some(name) = captures.get(1) {
                let name = name.as_str().to_string();
                if !tables.contains(&name) {
                    tables.push(name);
                }
            }
        }
        tables
    }

    fn describe_sql(&self, table: &str) -> String {
        format!("DESCRIBE `{table}`")
    }

    fn indexes_sql(&self, table: &str) -> String {
        format!("SHOW INDEX FROM `{table}`")
    }

    fn create_table_sql(&self, table: &str) -> String {
        format!("SHOW CREATE TABLE `{table}`")
    }

    fn parse_foreign_keys(&self, create_sql: &str) -> Vec<ForeignKey> {
        foreign_key_regex()
            .captures_iter(create_sql)
            .map(|c| ForeignKey {
                column: c[1].to_string(),
                referenced_table: c[2].to_string(),
                referenced_column: c[3].to_string(),
            })
            .collect()
    }
}
