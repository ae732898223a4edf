use super::*;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
struct Call {
    route: &'static str,
    sql: String,
    params: Vec<String>,
}

type Log = Arc<Mutex<Vec<Call>>>;

fn record(log: &Log, route: &'static str, sql: &str, params: &[&(dyn ToSql + Sync)]) {
    log.lock().unwrap().push(Call {
        route,
        sql: sql.to_string(),
        params: params.iter().map(|p| format!("{p:?}")).collect(),
    });
}

/// Provider that records statements and returns empty results.
#[derive(Default)]
struct RecordingProvider {
    log: Log,
    fail: bool,
    debug: bool,
    delay: Option<Duration>,
}

impl RecordingProvider {
    fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }

    fn sql(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.sql).collect()
    }

    async fn respond<T>(&self, ok: T) -> OrmResult<T> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(OrmError::Other("connection reset".to_string()));
        }
        Ok(ok)
    }
}

impl GenericClient for RecordingProvider {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        record(&self.log, "pool", sql, params);
        self.respond(Vec::new()).await
    }

    async fn query_opt(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Option<Row>> {
        record(&self.log, "pool", sql, params);
        self.respond(None).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        record(&self.log, "pool", sql, params);
        self.respond(3).await
    }

    async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
        record(&self.log, "pool", sql, &[]);
        self.respond(()).await
    }
}

struct RecordingTx {
    log: Log,
}

impl GenericClient for RecordingTx {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        record(&self.log, "tx", sql, params);
        Ok(Vec::new())
    }

    async fn query_opt(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Option<Row>> {
        record(&self.log, "tx", sql, params);
        Ok(None)
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        record(&self.log, "tx", sql, params);
        Ok(1)
    }

    async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
        record(&self.log, "tx", sql, &[]);
        Ok(())
    }
}

impl TransactionHandle for RecordingTx {
    async fn commit(self) -> OrmResult<()> {
        self.batch_execute("COMMIT").await
    }

    async fn rollback(self) -> OrmResult<()> {
        self.batch_execute("ROLLBACK").await
    }
}

impl ConnectionProvider for RecordingProvider {
    type Transaction = RecordingTx;

    async fn begin(&self) -> OrmResult<RecordingTx> {
        record(&self.log, "pool", "BEGIN", &[]);
        Ok(RecordingTx {
            log: self.log.clone(),
        })
    }

    fn debug_sql(&self) -> bool {
        self.debug
    }
}

fn param(v: impl Into<Value>) -> String {
    format!("{:?}", v.into())
}

#[tokio::test]
async fn select_compiles_full_statement_and_resets() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();
    m.table("users")
        .fields("id, name")
        .eq("status", "active")
        .group_by("id, name")
        .sort("id DESC")
        .limit(10, 5);

    let rows = m.select().await.unwrap();
    assert!(rows.is_empty());

    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].sql,
        "SELECT id, name FROM users WHERE status=$1 GROUP BY id, name ORDER BY id DESC LIMIT 5 OFFSET 10"
    );
    assert_eq!(calls[0].params, [param("active")]);
    assert_eq!(m.state(), &QueryState::default());
}

#[tokio::test]
async fn select_one_limits_to_a_single_row() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();
    let row = m.table("users").eq("id", 9).select_one().await.unwrap();

    assert!(row.is_none());
    assert_eq!(provider.sql(), ["SELECT * FROM users WHERE id=$1 LIMIT 1"]);
}

#[tokio::test]
async fn select_index_requires_a_column() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();
    let err = m.table("users").select_index().await.unwrap_err();

    assert!(err.is_validation());
    assert!(provider.calls().is_empty());
    assert_eq!(m.state(), &QueryState::default());
}

#[tokio::test]
async fn insert_binds_values_and_returns_key() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();
    let err = m
        .table("users")
        .insert_value("name", "alice")
        .insert_value("age", 30)
        .insert("id")
        .await
        .unwrap_err();

    // The recording provider returns no row.
    assert!(err.is_not_found());
    let calls = provider.calls();
    assert_eq!(
        calls[0].sql,
        r#"INSERT INTO users ("name", "age") VALUES ($1, $2) RETURNING id"#
    );
    assert_eq!(calls[0].params, [param("alice"), param(30)]);
    assert_eq!(m.state(), &QueryState::default());
}

#[tokio::test]
async fn insert_batch_returns_keys_per_row() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();
    let ids = m
        .table("items")
        .insert_rows(vec![
            Record::new().with("sku", "a").with("qty", 1),
            Record::new().with("qty", 2).with("sku", "b"),
        ])
        .insert_batch("id")
        .await
        .unwrap();

    assert!(ids.is_empty());
    let calls = provider.calls();
    assert_eq!(
        calls[0].sql,
        r#"INSERT INTO items ("sku", "qty") VALUES ($1, $2), ($3, $4) RETURNING id"#
    );
    assert_eq!(
        calls[0].params,
        [param("a"), param(1), param("b"), param(2)]
    );
}

#[tokio::test]
async fn insert_batch_without_key_executes() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();
    m.table("items")
        .insert_rows(vec![Record::new().with("sku", "a")])
        .insert_batch("")
        .await
        .unwrap();

    assert_eq!(provider.sql(), [r#"INSERT INTO items ("sku") VALUES ($1)"#]);
}

#[tokio::test]
async fn mismatched_batch_sends_nothing() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();
    let err = m
        .table("items")
        .insert_rows(vec![
            Record::new().with("a", 1).with("b", 2),
            Record::new().with("a", 3).with("b", 4).with("c", 5),
        ])
        .insert_batch("id")
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(provider.calls().is_empty());
    assert_eq!(m.state(), &QueryState::default());
}

#[tokio::test]
async fn update_numbers_set_before_where() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();
    let affected = m
        .table("users")
        .set("name", "bob")
        .set("score", 1.5)
        .where_map(vec![("id", 7)])
        .update()
        .await
        .unwrap();

    assert_eq!(affected, 3);
    let calls = provider.calls();
    assert_eq!(
        calls[0].sql,
        r#"UPDATE users SET "name"=$1, "score"=$2 WHERE id=$3"#
    );
    assert_eq!(calls[0].params, [param("bob"), param(1.5), param(7)]);
}

#[tokio::test]
async fn delete_with_typed_condition() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();
    m.table("sessions")
        .where_typed(vec![("user_id", vec!["u1", "u2"])])
        .delete()
        .await
        .unwrap();

    let calls = provider.calls();
    assert_eq!(calls[0].sql, "DELETE FROM sessions WHERE user_id in ($1, $2)");
    assert_eq!(calls[0].params, [param("u1"), param("u2")]);
}

#[tokio::test]
async fn raw_sql_passes_through() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();
    m.table("ignored");
    m.query("SELECT now()", vec![]).await.unwrap();
    let n = m
        .exec_raw("UPDATE t SET a = $1", vec![Value::Int(1)])
        .await
        .unwrap();

    assert_eq!(n, 3);
    assert_eq!(provider.sql(), ["SELECT now()", "UPDATE t SET a = $1"]);
    assert_eq!(m.state(), &QueryState::default());
}

#[tokio::test]
async fn failed_execution_still_resets() {
    let provider = RecordingProvider {
        fail: true,
        ..Default::default()
    };
    let mut m = provider.model();
    let err = m
        .table("users")
        .set("name", "x")
        .eq("id", 1)
        .limit(0, 10)
        .update()
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::Other(_)));
    assert_eq!(provider.calls().len(), 1);
    assert_eq!(m.state(), &QueryState::default());
}

#[tokio::test]
async fn missing_table_is_rejected_before_execution() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();
    let err = m.eq("id", 1).delete().await.unwrap_err();

    assert!(err.is_validation());
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn transaction_routes_statements_until_commit() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();

    m.begin().await.unwrap();
    assert!(m.in_transaction());
    m.table("a").select().await.unwrap();
    m.table("a").set("x", 1).update().await.unwrap();
    m.commit().await.unwrap();
    assert!(!m.in_transaction());
    m.table("a").select().await.unwrap();

    let routes: Vec<(&str, String)> = provider
        .calls()
        .into_iter()
        .map(|c| (c.route, c.sql))
        .collect();
    assert_eq!(
        routes,
        [
            ("pool", "BEGIN".to_string()),
            ("tx", "SELECT * FROM a".to_string()),
            ("tx", r#"UPDATE a SET "x"=$1"#.to_string()),
            ("tx", "COMMIT".to_string()),
            ("pool", "SELECT * FROM a".to_string()),
        ]
    );
}

#[tokio::test]
async fn rollback_ends_transaction() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();
    m.begin().await.unwrap();
    m.rollback().await.unwrap();

    assert!(!m.in_transaction());
    assert_eq!(provider.sql(), ["BEGIN", "ROLLBACK"]);
}

#[tokio::test]
async fn transaction_misuse_is_rejected() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();

    assert!(m.commit().await.unwrap_err().is_validation());
    assert!(m.rollback().await.unwrap_err().is_validation());
    m.begin().await.unwrap();
    assert!(m.begin().await.unwrap_err().is_validation());
}

#[tokio::test]
async fn clean_drops_transaction_and_state() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();
    m.begin().await.unwrap();
    m.table("users").eq("id", 1).sort("id");

    m.clean();

    assert!(!m.in_transaction());
    assert_eq!(m.state(), &QueryState::default());
    assert_eq!(provider.sql(), ["BEGIN"]);
}

#[tokio::test]
async fn debug_flag_resets_to_provider_default() {
    let provider = RecordingProvider {
        debug: true,
        ..Default::default()
    };
    let mut m = provider.model();
    assert!(m.state().debug);

    m.table("users").debug(false).select().await.unwrap();
    assert!(m.state().debug);
}

#[tokio::test]
async fn slow_statement_times_out() {
    let provider = RecordingProvider {
        delay: Some(Duration::from_millis(500)),
        ..Default::default()
    };
    let mut m = provider.model();
    m.timeout(Duration::from_millis(10));

    let err = m.table("users").select().await.unwrap_err();
    assert!(err.is_timeout());

    // The deadline survives the reset.
    let err = m.table("users").delete().await.unwrap_err();
    assert!(err.is_timeout());
}

#[test]
fn plans_do_not_consume_state() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();
    m.table("users")
        .where_raw("deleted_at IS NULL")
        .filter(Filter::gt("age", 18))
        .set("active", true);

    let select = m.plan_select().unwrap();
    assert_eq!(
        select.sql,
        "SELECT * FROM users WHERE (deleted_at IS NULL) AND age > $1"
    );
    assert_eq!(select.params, [Value::Int(18)]);

    let update = m.plan_update().unwrap();
    assert_eq!(
        update.sql,
        r#"UPDATE users SET "active"=$1 WHERE (deleted_at IS NULL) AND age > $2"#
    );
    assert_eq!(update.params, [Value::Bool(true), Value::Int(18)]);

    assert_eq!(m.state().table, "users");
    assert!(provider.calls().is_empty());
}

#[test]
fn insert_plan_requires_primary_key() {
    let provider = RecordingProvider::default();
    let mut m = provider.model();
    m.table("users").insert_value("name", "x");
    assert!(m.plan_insert(" ").unwrap_err().is_validation());
    assert!(m.plan_insert("id").is_ok());
}

#[test]
fn truncated_log_sql_respects_char_boundaries() {
    let sql = "é".repeat(MAX_LOGGED_SQL);
    let out = truncate_sql(&sql);
    assert!(out.ends_with("..."));
    assert!(out.len() <= MAX_LOGGED_SQL + 3);
    assert_eq!(truncate_sql("SELECT 1"), "SELECT 1");
}
