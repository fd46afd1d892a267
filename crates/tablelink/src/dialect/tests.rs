use serde_json::{json, Value};

use super::*;
use crate::shape::{GroupBy, Having, Join, JoinKind, Limit, OrderBy, RowData, Where};

fn dialect() -> MysqlDialect {
    MysqlDialect
}

#[test]
fn mark_field_quotes_plain_identifiers_only() {
    let d = dialect();
    assert_eq!(d.mark_field("name"), "`name`");
    assert_eq!(d.mark_field("count(*)"), "count(*)");
    assert_eq!(d.mark_field("u.name"), "u.name");
    assert_eq!(d.mark_field("*"), "*");
}

#[test]
fn escape_quotes_strings_and_passes_numbers() {
    let d = dialect();
    assert_eq!(d.escape(&json!("it's")), "'it''s'");
    assert_eq!(d.escape(&json!(42)), "42");
    assert_eq!(d.escape(&json!(null)), "NULL");
    assert_eq!(d.escape(&json!(true)), "1");
}

#[test]
fn where_map_renders_both_forms_with_same_structure() {
    let d = dialect();
    let cond = Where::from(json!({"status": 1, "name": "bob"}));
    let clause = d.render_where(&cond, "id").unwrap();
    assert_eq!(clause.sql, "`status` = 1 AND `name` = 'bob'");
    assert_eq!(clause.prepare, "`status` = ? AND `name` = ?");
    assert_eq!(clause.params, vec![json!(1), json!("bob")]);
}

#[test]
fn where_in_suffix_binds_a_list() {
    let d = dialect();
    let cond = Where::from(json!({"id in": [1, 2, 3]}));
    let clause = d.render_where(&cond, "id").unwrap();
    assert_eq!(clause.sql, "`id` IN (1, 2, 3)");
    assert_eq!(clause.prepare, "`id` IN (?, ?, ?)");
    assert_eq!(clause.params.len(), 3);
}

#[test]
fn where_in_requires_a_list() {
    let d = dialect();
    let cond = Where::from(json!({"id in": 5}));
    assert!(d.render_where(&cond, "id").is_err());
}

#[test]
fn where_null_value_renders_is_null() {
    let d = dialect();
    let cond = Where::from(json!({"deleted_at": null}));
    let clause = d.render_where(&cond, "id").unwrap();
    assert_eq!(clause.sql, "`deleted_at` IS NULL");
    assert!(clause.params.is_empty());
}

#[test]
fn where_pk_scalar_uses_primary_key() {
    let d = dialect();
    let clause = d.render_where(&Where::from(7), "uid").unwrap();
    assert_eq!(clause.sql, "`uid` = 7");
    assert_eq!(clause.prepare, "`uid` = ?");
}

#[test]
fn insert_renders_columns_and_values() {
    let d = dialect();
    let row = json!({"name": "alice", "age": 30});
    let Value::Object(row) = row else { unreachable!() };
    let clause = d.render_insert("users", &row).unwrap();
    assert_eq!(
        clause.sql,
        "INSERT INTO `users` (`name`, `age`) VALUES ('alice', 30)"
    );
    assert_eq!(
        clause.prepare,
        "INSERT INTO `users` (`name`, `age`) VALUES (?, ?)"
    );
    assert_eq!(clause.params, vec![json!("alice"), json!(30)]);
}

#[test]
fn inserts_takes_columns_from_first_row_and_fills_gaps() {
    let d = dialect();
    let rows: Vec<RowData> = vec![
        json!({"name": "a", "age": 1}),
        json!({"name": "b"}),
    ]
    .into_iter()
    .map(|v| match v {
        Value::Object(m) => m,
        _ => unreachable!(),
    })
    .collect();
    let clause = d.render_inserts("users", &rows).unwrap();
    assert_eq!(
        clause.prepare,
        "INSERT INTO `users` (`name`, `age`) VALUES (?, ?), (?, ?)"
    );
    assert_eq!(clause.params[3], json!(null));
}

#[test]
fn insert_ignore_and_replace_use_their_verbs() {
    let d = dialect();
    let Value::Object(row) = json!({"id": 1}) else {
        unreachable!()
    };
    assert!(
        d.render_insert_ignore("t", &row)
            .unwrap()
            .prepare
            .starts_with("INSERT IGNORE INTO `t`")
    );
    assert!(
        d.render_replace("t", &row)
            .unwrap()
            .prepare
            .starts_with("REPLACE INTO `t`")
    );
}

#[test]
fn empty_row_insert_is_rejected() {
    let d = dialect();
    let row = RowData::new();
    assert!(d.render_insert("users", &row).is_err());
}

#[test]
fn update_appends_where_params_after_set_params() {
    let d = dialect();
    let Value::Object(row) = json!({"name": "x"}) else {
        unreachable!()
    };
    let cond = d.render_where(&Where::from(9), "id").unwrap();
    let clause = d.render_update("users", &row, &cond).unwrap();
    assert_eq!(clause.sql, "UPDATE `users` SET `name` = 'x' WHERE `id` = 9");
    assert_eq!(clause.prepare, "UPDATE `users` SET `name` = ? WHERE `id` = ?");
    assert_eq!(clause.params, vec![json!("x"), json!(9)]);
}

#[test]
fn crease_is_fully_parametrized() {
    let d = dialect();
    let cond = d.render_where(&Where::from(3), "id").unwrap();
    let clause = d.render_crease("counters", "hits", -2.0, &cond);
    assert_eq!(
        clause.prepare,
        "UPDATE `counters` SET `hits` = `hits` + ? WHERE `id` = ?"
    );
    assert_eq!(clause.params, vec![json!(-2.0), json!(3)]);
}

#[test]
fn joins_render_in_order_and_require_on() {
    let d = dialect();
    let joins = vec![
        Join {
            kind: JoinKind::Left,
            table: "depts".to_string(),
            on: Some("users.dept_id = depts.id".to_string()),
        },
        Join {
            kind: JoinKind::Inner,
            table: "roles".to_string(),
            on: Some("users.role_id = roles.id".to_string()),
        },
    ];
    assert_eq!(
        d.render_joins(&joins).unwrap(),
        "LEFT JOIN `depts` ON users.dept_id = depts.id INNER JOIN `roles` ON users.role_id = roles.id"
    );

    let dangling = vec![Join {
        kind: JoinKind::Left,
        table: "depts".to_string(),
        on: None,
    }];
    assert!(d.render_joins(&dangling).is_err());
}

#[test]
fn clause_fragments() {
    let d = dialect();
    assert_eq!(d.render_limit(&Limit::Count(5)), "LIMIT 5");
    assert_eq!(d.render_limit(&Limit::Range(10, 5)), "LIMIT 10, 5");
    assert_eq!(d.render_limit(&Limit::None), "");
    assert_eq!(
        d.render_order_by(&OrderBy::from("created DESC")),
        "ORDER BY created DESC"
    );
    assert_eq!(
        d.render_group_by(&GroupBy::from(vec!["dept_id"])),
        "GROUP BY `dept_id`"
    );
    assert_eq!(
        d.render_having(&Having::from("cnt > 2")).unwrap().sql,
        "cnt > 2"
    );
}

#[test]
fn extract_tables_finds_each_referenced_name_once() {
    let d = dialect();
    assert_eq!(
        d.extract_tables("SELECT * FROM users WHERE id = 1"),
        vec!["users"]
    );
    assert_eq!(
        d.extract_tables("SELECT * FROM `users` u LEFT JOIN depts d ON u.dept_id = d.id"),
        vec!["users", "depts"]
    );
    assert_eq!(d.extract_tables("INSERT INTO logs (msg) VALUES (?)"), vec!["logs"]);
    assert_eq!(d.extract_tables("UPDATE users SET a = 1"), vec!["users"]);
    assert!(d.extract_tables("SHOW VARIABLES").is_empty());
}

#[test]
fn parse_foreign_keys_from_create_statement() {
    let d = dialect();
    let create = "CREATE TABLE `orders` (\n\
        `id` int NOT NULL,\n\
        `user_id` int NOT NULL,\n\
        CONSTRAINT `fk_orders_user` FOREIGN KEY (`user_id`) REFERENCES `users` (`id`)\n\
        ) ENGINE=InnoDB";
    let keys = d.parse_foreign_keys(create);
    assert_eq!(
        keys,
        vec![ForeignKey {
            column: "user_id".to_string(),
            referenced_table: "users".to_string(),
            referenced_column: "id".to_string(),
        }]
    );
}
