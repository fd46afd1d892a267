use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::connection::{Connection, ConnectionManager, Role, RowStream};
use crate::error::OrmResult;
use crate::hooks::{HookArgs, HookFlow, Verb};
use crate::shape::{Fields, RowData, Where};

use super::{Link, LinkConfig, TableConfig};

fn obj(v: Value) -> RowData {
    match v {
        Value::Object(m) => m,
        other => panic!("expected object, got {other:?}"),
    }
}

fn rows(v: Value) -> Vec<RowData> {
    match v {
        Value::Array(items) => items.into_iter().map(obj).collect(),
        other => panic!("expected array, got {other:?}"),
    }
}

/// Scripted connection: queries pop pre-queued result sets, every call is
/// recorded for assertion.
struct MockConnection {
    queries: Mutex<Vec<(String, Vec<Value>)>>,
    executes: Mutex<Vec<(String, Vec<Value>)>>,
    results: Mutex<VecDeque<Vec<RowData>>>,
    affected: AtomicU64,
    last_id: AtomicI64,
    tx: Mutex<Vec<&'static str>>,
    buffered_flips: Mutex<Vec<bool>>,
}

impl MockConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            queries: Mutex::new(Vec::new()),
            executes: Mutex::new(Vec::new()),
            results: Mutex::new(VecDeque::new()),
            affected: AtomicU64::new(1),
            last_id: AtomicI64::new(0),
            tx: Mutex::new(Vec::new()),
            buffered_flips: Mutex::new(Vec::new()),
        })
    }

    fn queue(&self, result: Vec<RowData>) {
        self.results.lock().unwrap().push_back(result);
    }

    fn queries(&self) -> Vec<(String, Vec<Value>)> {
        self.queries.lock().unwrap().clone()
    }

    fn executes(&self) -> Vec<(String, Vec<Value>)> {
        self.executes.lock().unwrap().clone()
    }

    fn tx_log(&self) -> Vec<&'static str> {
        self.tx.lock().unwrap().clone()
    }

    fn next_result(&self) -> Vec<RowData> {
        self.results.lock().unwrap().pop_front().unwrap_or_default()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, prepare: &str, params: &[Value]) -> OrmResult<Vec<RowData>> {
        self.queries
            .lock()
            .unwrap()
            .push((prepare.to_string(), params.to_vec()));
        Ok(self.next_result())
    }

    async fn execute(&self, prepare: &str, params: &[Value]) -> OrmResult<u64> {
        self.executes
            .lock()
            .unwrap()
            .push((prepare.to_string(), params.to_vec()));
        Ok(self.affected.load(Ordering::SeqCst))
    }

    async fn last_insert_id(&self) -> OrmResult<i64> {
        Ok(self.last_id.load(Ordering::SeqCst))
    }

    async fn begin(&self) -> OrmResult<()> {
        self.tx.lock().unwrap().push("begin");
        Ok(())
    }

    async fn commit(&self) -> OrmResult<()> {
        self.tx.lock().unwrap().push("commit");
        Ok(())
    }

    async fn rollback(&self) -> OrmResult<()> {
        self.tx.lock().unwrap().push("rollback");
        Ok(())
    }

    async fn set_buffered(&self, buffered: bool) -> OrmResult<()> {
        self.buffered_flips.lock().unwrap().push(buffered);
        Ok(())
    }

    async fn query_stream(&self, prepare: &str, params: &[Value]) -> OrmResult<RowStream> {
        self.queries
            .lock()
            .unwrap()
            .push((prepare.to_string(), params.to_vec()));
        let rows = self.next_result();
        Ok(Box::pin(futures_util::stream::iter(
            rows.into_iter().map(Ok),
        )))
    }
}

struct MockManager {
    read: Arc<MockConnection>,
    write: Arc<MockConnection>,
}

impl MockManager {
    /// One connection serving both roles.
    fn shared(conn: Arc<MockConnection>) -> Arc<Self> {
        Arc::new(Self {
            read: Arc::clone(&conn),
            write: conn,
        })
    }

    fn split(read: Arc<MockConnection>, write: Arc<MockConnection>) -> Arc<Self> {
        Arc::new(Self { read, write })
    }
}

#[async_trait]
impl ConnectionManager for MockManager {
    async fn connect(&self, _alias: &str, role: Role) -> OrmResult<Arc<dyn Connection>> {
        Ok(match role {
            Role::Read => Arc::clone(&self.read) as Arc<dyn Connection>,
            Role::Write => Arc::clone(&self.write) as Arc<dyn Connection>,
        })
    }
}

fn shared_link() -> (Arc<Link>, Arc<MockConnection>) {
    let conn = MockConnection::new();
    let link = Link::new(MockManager::shared(Arc::clone(&conn)), LinkConfig::default());
    (link, conn)
}

fn uncached_link() -> (Arc<Link>, Arc<MockConnection>) {
    let conn = MockConnection::new();
    let config = LinkConfig {
        cache: false,
        ..LinkConfig::default()
    };
    let link = Link::new(MockManager::shared(Arc::clone(&conn)), config);
    (link, conn)
}

// ==================== reads and cache ====================

#[tokio::test]
async fn select_renders_where_and_params() {
    let (link, conn) = shared_link();
    let users = link.table("users");
    conn.queue(rows(json!([{"id": 1, "status": 1}])));

    let out = users
        .select_array(Fields::All, json!({"status": 1}))
        .await
        .unwrap();

    assert_eq!(out.len(), 1);
    let calls = conn.queries();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "SELECT * FROM `users` WHERE `status` = ?");
    assert_eq!(calls[0].1, vec![json!(1)]);
}

#[tokio::test]
async fn identical_select_is_served_from_cache() {
    let (link, conn) = shared_link();
    let users = link.table("users");
    conn.queue(rows(json!([{"id": 1}])));

    let first = users.select_array(Fields::All, json!({"status": 1})).await.unwrap();
    let second = users.select_array(Fields::All, json!({"status": 1})).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(conn.queries().len(), 1);
}

#[tokio::test]
async fn writes_invalidate_cached_reads() {
    let (link, conn) = shared_link();
    let users = link.table("users");
    conn.queue(rows(json!([{"id": 1}])));
    conn.queue(rows(json!([{"id": 1, "name": "n"}])));

    users.select_array(Fields::All, json!({"id": 1})).await.unwrap();
    users.update(obj(json!({"name": "n"})), 1i64).await.unwrap();
    users.select_array(Fields::All, json!({"id": 1})).await.unwrap();

    assert_eq!(conn.queries().len(), 2);
    let writes = conn.executes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, "UPDATE `users` SET `name` = ? WHERE `id` = ?");
    assert_eq!(writes[0].1, vec![json!("n"), json!(1)]);
}

#[tokio::test]
async fn uncache_once_skips_the_cache_for_one_read() {
    let (link, conn) = shared_link();
    let users = link.table("users");
    conn.queue(rows(json!([{"id": 1}])));
    conn.queue(rows(json!([{"id": 1}])));

    users.select_array(Fields::All, json!({"id": 1})).await.unwrap();
    users.uncache_once();
    users.select_array(Fields::All, json!({"id": 1})).await.unwrap();
    // The bypass is one-shot; this read hits the cache again.
    users.select_array(Fields::All, json!({"id": 1})).await.unwrap();

    assert_eq!(conn.queries().len(), 2);
}

#[tokio::test]
async fn select_handle_streams_rows_unbuffered() {
    let (link, conn) = uncached_link();
    let users = link.table("users");
    conn.queue(rows(json!([{"id": 1}, {"id": 2}])));

    let mut stream = users.select_handle(Fields::All, "").await.unwrap();
    let mut seen = Vec::new();
    while let Some(row) = stream.next().await {
        seen.push(row.unwrap());
    }
    drop(stream);
    assert_eq!(seen.len(), 2);

    // Buffered mode flips off before streaming and is restored afterwards
    // on a background task.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let flips = conn.buffered_flips.lock().unwrap().clone();
    assert_eq!(flips.first(), Some(&false));
    assert_eq!(flips.last(), Some(&true));
}

#[test]
fn dropping_a_stream_outside_the_runtime_does_not_panic() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let (link, conn) = uncached_link();
    conn.queue(rows(json!([{"id": 1}])));

    let stream = runtime.block_on(async {
        link.table("users")
            .select_handle(Fields::All, "")
            .await
            .unwrap()
    });

    drop(runtime);
    drop(stream);
}

#[cfg(feature = "tracing")]
#[tokio::test]
async fn small_updates_snapshot_rows_before_and_after() {
    let (link, conn) = shared_link();
    let mut config = TableConfig::new("users");
    config.log_mutations = true;
    link.configure(config);
    let users = link.table("users");
    conn.queue(rows(json!([{"id": 1, "name": "old"}])));
    conn.queue(rows(json!([{"id": 1, "name": "new"}])));

    let affected = users
        .update(obj(json!({"name": "new"})), 1i64)
        .await
        .unwrap();

    assert_eq!(affected, 1);
    assert_eq!(conn.executes().len(), 1);
    // The audit selects bracket the update and bypass the cache.
    let calls = conn.queries();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|(sql, _)| sql.ends_with("LIMIT 21")));
}

// ==================== mutation guards ====================

#[tokio::test]
async fn update_without_where_never_reaches_the_connection() {
    let (link, conn) = shared_link();
    let users = link.table("users");

    let err = users
        .update(obj(json!({"name": "n"})), Where::None)
        .await
        .unwrap_err();

    assert!(err.is_consistency());
    assert!(conn.executes().is_empty());
}

#[tokio::test]
async fn delete_without_where_never_reaches_the_connection() {
    let (link, conn) = shared_link();
    let users = link.table("users");

    let err = users.delete("").await.unwrap_err();

    assert!(err.is_consistency());
    assert!(conn.executes().is_empty());
}

#[tokio::test]
async fn delete_all_is_the_explicit_full_table_form() {
    let (link, conn) = shared_link();
    let users = link.table("users");

    users.delete_all().await.unwrap();

    let writes = conn.executes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, "DELETE FROM `users` WHERE 1=1");
}

#[tokio::test]
async fn raw_query_touching_two_tables_is_rejected() {
    let (link, conn) = shared_link();
    let users = link.table("users");

    let err = users
        .query(
            "SELECT * FROM users JOIN depts ON depts.id = users.dept_id",
            vec![],
        )
        .await
        .unwrap_err();

    assert!(err.is_consistency());
    assert!(conn.queries().is_empty());
}

#[tokio::test]
async fn multi_table_mode_lifts_the_table_guard() {
    let (link, conn) = shared_link();
    let mut config = TableConfig::new("users");
    config.multi_table = true;
    link.configure(config);
    let users = link.table("users");
    conn.queue(rows(json!([{"id": 1, "dept": "Eng"}])));

    let out = users
        .query(
            "SELECT * FROM users JOIN depts ON depts.id = users.dept_id",
            vec![],
        )
        .await
        .unwrap();

    assert_eq!(out.len(), 1);
}

#[tokio::test]
async fn joined_select_works_in_default_single_table_mode() {
    let (link, conn) = shared_link();
    let users = link.table("users");
    conn.queue(rows(json!([{"id": 1, "dept_id": 5, "dname": "Eng"}])));

    let out = users
        .left_join("depts")
        .on("users.dept_id = depts.id")
        .select_array(Fields::All, "")
        .await
        .unwrap();

    assert_eq!(out.len(), 1);
    let calls = conn.queries();
    assert_eq!(
        calls[0].0,
        "SELECT * FROM `users` LEFT JOIN `depts` ON users.dept_id = depts.id"
    );
}

#[tokio::test]
async fn joined_select_is_invalidated_by_writes_to_the_joined_table() {
    let (link, conn) = shared_link();
    let users = link.table("users");
    let depts = link.table("depts");
    conn.queue(rows(json!([{"id": 1, "dept_id": 5}])));
    conn.queue(rows(json!([{"id": 1, "dept_id": 5}])));

    users
        .left_join("depts")
        .on("users.dept_id = depts.id")
        .select_array(Fields::All, "")
        .await
        .unwrap();
    users
        .left_join("depts")
        .on("users.dept_id = depts.id")
        .select_array(Fields::All, "")
        .await
        .unwrap();
    // Identical joined read is served from the cache.
    assert_eq!(conn.queries().len(), 1);

    depts.update(obj(json!({"name": "Ops"})), 5i64).await.unwrap();
    users
        .left_join("depts")
        .on("users.dept_id = depts.id")
        .select_array(Fields::All, "")
        .await
        .unwrap();
    // The entry is keyed on both tables, so the depts write evicted it.
    assert_eq!(conn.queries().len(), 2);
}

#[tokio::test]
async fn raw_query_against_another_table_is_rejected() {
    let (link, conn) = shared_link();
    let users = link.table("users");

    let err = users.query("SELECT * FROM orders", vec![]).await.unwrap_err();

    assert!(err.is_consistency());
    assert!(conn.queries().is_empty());
}

// ==================== insert family ====================

#[tokio::test]
async fn insert_returns_the_generated_id() {
    let (link, conn) = shared_link();
    let users = link.table("users");
    conn.last_id.store(42, Ordering::SeqCst);

    let id = users.insert(obj(json!({"name": "a"}))).await.unwrap();

    assert_eq!(id, 42);
    let writes = conn.executes();
    assert_eq!(writes[0].0, "INSERT INTO `users` (`name`) VALUES (?)");
    assert_eq!(writes[0].1, vec![json!("a")]);
}

#[tokio::test]
async fn insert_ignore_falls_back_to_input_pk_then_zero() {
    let (link, conn) = shared_link();
    let users = link.table("users");
    conn.affected.store(0, Ordering::SeqCst);
    conn.last_id.store(0, Ordering::SeqCst);

    let with_pk = users
        .insert_ignore(obj(json!({"id": 9, "name": "a"})))
        .await
        .unwrap();
    let without_pk = users
        .insert_ignore(obj(json!({"name": "b"})))
        .await
        .unwrap();

    assert_eq!(with_pk, 9);
    assert_eq!(without_pk, 0);
    assert!(conn
        .executes()
        .iter()
        .all(|(sql, _)| sql.starts_with("INSERT IGNORE INTO `users`")));
}

#[tokio::test]
async fn inserts_render_one_statement_per_batch() {
    let (link, conn) = shared_link();
    let users = link.table("users");
    conn.affected.store(2, Ordering::SeqCst);

    let affected = users
        .inserts(rows(json!([{"name": "a"}, {"name": "b"}])))
        .await
        .unwrap();

    assert_eq!(affected, 2);
    let writes = conn.executes();
    assert_eq!(writes.len(), 1);
    assert_eq!(
        writes[0].0,
        "INSERT INTO `users` (`name`) VALUES (?), (?)"
    );
}

#[tokio::test]
async fn auto_timestamps_stamp_inserts() {
    let (link, conn) = shared_link();
    let mut config = TableConfig::new("users");
    config.auto_timestamps = true;
    link.configure(config);
    let users = link.table("users");

    users.insert(obj(json!({"name": "a"}))).await.unwrap();

    let writes = conn.executes();
    assert_eq!(
        writes[0].0,
        "INSERT INTO `users` (`name`, `created`, `updated`) VALUES (?, ?, ?)"
    );
    assert_eq!(writes[0].1.len(), 3);
}

// ==================== hooks ====================

#[tokio::test]
async fn interrupted_insert_is_a_noop() {
    let (link, conn) = shared_link();
    let users = link.table("users");
    users.before_hook(Verb::Insert, |_| HookFlow::Interrupt);

    let id = users.insert(obj(json!({"name": "a"}))).await.unwrap();

    assert_eq!(id, 0);
    assert!(conn.executes().is_empty());
}

#[tokio::test]
async fn interrupted_select_returns_no_rows() {
    let (link, conn) = shared_link();
    let users = link.table("users");
    users.before_hook(Verb::Select, |_| HookFlow::Interrupt);

    let out = users.select_array(Fields::All, "").await.unwrap();

    assert!(out.is_empty());
    assert!(conn.queries().is_empty());
}

#[tokio::test]
async fn before_hook_rewrites_select_arguments() {
    let (link, conn) = shared_link();
    let users = link.table("users");
    users.before_hook(Verb::Select, |args| {
        let HookArgs::Select {
            fields,
            order,
            limit,
            ..
        } = args
        else {
            return HookFlow::Interrupt;
        };
        HookFlow::Continue(HookArgs::Select {
            fields,
            cond: Where::from(json!({"status": 2})),
            order,
            limit,
        })
    });

    users
        .select_array(Fields::All, json!({"status": 1}))
        .await
        .unwrap();

    let calls = conn.queries();
    assert_eq!(calls[0].1, vec![json!(2)]);
}

#[tokio::test]
async fn after_hook_reshapes_select_rows() {
    let (link, conn) = shared_link();
    let users = link.table("users");
    conn.queue(rows(json!([{"id": 1}])));
    users.after_hook(Verb::Select, |_| json!([{"masked": true}]));

    let out = users.select_array(Fields::All, "").await.unwrap();

    assert_eq!(out, rows(json!([{"masked": true}])));
}

// ==================== transactions ====================

#[tokio::test]
async fn commit_without_begin_is_a_consistency_error() {
    let (link, conn) = shared_link();
    let users = link.table("users");

    let err = users.commit().await.unwrap_err();

    assert!(err.is_consistency());
    assert!(conn.tx_log().is_empty());
}

#[tokio::test]
async fn begin_and_commit_run_in_order() {
    let (link, conn) = shared_link();
    let users = link.table("users");

    users.begin().await.unwrap();
    assert!(link.session().in_transaction());
    users.commit().await.unwrap();
    assert!(!link.session().in_transaction());

    assert_eq!(conn.tx_log(), vec!["begin", "commit"]);
}

#[tokio::test]
async fn multi_table_handles_refuse_transactions() {
    let (link, _conn) = shared_link();
    let mut config = TableConfig::new("logs");
    config.multi_table = true;
    link.configure(config);
    let logs = link.table("logs");

    assert!(logs.begin().await.unwrap_err().is_consistency());
    assert!(logs.commit().await.unwrap_err().is_consistency());
}

#[tokio::test]
async fn reads_redirect_to_the_write_connection_inside_a_transaction() {
    let read = MockConnection::new();
    let write = MockConnection::new();
    let config = LinkConfig {
        cache: false,
        ..LinkConfig::default()
    };
    let link = Link::new(
        MockManager::split(Arc::clone(&read), Arc::clone(&write)),
        config,
    );
    let users = link.table("users");

    users.select_array(Fields::All, json!({"id": 1})).await.unwrap();
    users.begin().await.unwrap();
    users.select_array(Fields::All, json!({"id": 2})).await.unwrap();
    users.commit().await.unwrap();
    users.select_array(Fields::All, json!({"id": 3})).await.unwrap();

    assert_eq!(read.queries().len(), 2);
    assert_eq!(write.queries().len(), 1);
}

// ==================== relation merges ====================

#[tokio::test]
async fn map_merges_department_names_with_placeholders() {
    let (link, conn) = shared_link();
    let users = link.table("users");
    let depts = link.table("depts");
    conn.queue(rows(json!([
        {"id": 1, "dept_id": 5},
        {"id": 2, "dept_id": 9}
    ])));
    conn.queue(rows(json!([{"name": "Eng", "id": 5}])));

    let mut set = users.select(Fields::All, "").await.unwrap();
    set.map(&depts, "dept_id", vec!["name"]).await.unwrap();

    let merged = set.raw();
    assert_eq!(merged[0].get("name"), Some(&json!("Eng")));
    assert_eq!(merged[1].get("name"), Some(&json!("")));

    // The secondary query asks the remote key column back explicitly.
    let calls = conn.queries();
    assert_eq!(
        calls[1].0,
        "SELECT `name`, `id` FROM `depts` WHERE `id` IN (?, ?)"
    );
    assert_eq!(calls[1].1, vec![json!(5), json!(9)]);
}

#[tokio::test]
async fn join_attaches_grouped_children_under_the_target_alias() {
    let (link, conn) = shared_link();
    let users = link.table("users");
    let orders = link.table("orders");
    conn.queue(rows(json!([{"id": 1}, {"id": 2}])));
    conn.queue(rows(json!([
        {"id": 10, "user_id": 1},
        {"id": 11, "user_id": 1}
    ])));

    let mut set = users.select(Fields::All, "").await.unwrap();
    set.join(&orders, ("id", "user_id"), Fields::All)
        .await
        .unwrap();

    let merged = set.raw();
    assert_eq!(
        merged[0].get("orders").and_then(|v| v.as_array()).map(Vec::len),
        Some(2)
    );
    assert_eq!(merged[1].get("orders"), Some(&json!([])));
}

// ==================== registry ====================

#[tokio::test]
async fn link_memoizes_one_handle_per_alias() {
    let (link, _conn) = shared_link();
    let a = link.table("users");
    let b = link.table("users");
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.table_name(), "users");
}

#[tokio::test]
async fn table_prefix_applies_to_unregistered_aliases() {
    let conn = MockConnection::new();
    let config = LinkConfig {
        table_prefix: "app_".to_string(),
        ..LinkConfig::default()
    };
    let link = Link::new(MockManager::shared(Arc::clone(&conn)), config);

    let users = link.table("users");
    assert_eq!(users.alias(), "users");
    assert_eq!(users.table_name(), "app_users");

    users.delete_all().await.unwrap();
    assert_eq!(conn.executes()[0].0, "DELETE FROM `app_users` WHERE 1=1");
}
