//! Live-database checks. Skipped unless DATABASE_URL is set.

#![cfg(feature = "pool")]

use qesydb::prelude::*;
use std::time::{Duration, Instant};

fn try_config() -> Option<DbConfig> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").ok()?;
    let mut config = DbConfig::from_url(&database_url).expect("DATABASE_URL is not a valid URL");
    config.max_connections = 2;
    config.min_connections = 0;
    Some(config)
}

async fn connect(config: &DbConfig) -> PoolProvider {
    let provider = PoolProvider::from_config(config).expect("failed to build pool");
    let _client = provider
        .pool()
        .get()
        .await
        .expect("Failed to connect to DATABASE_URL with NoTls");
    provider
}

async fn try_connect() -> Option<PoolProvider> {
    let config = try_config()?;
    Some(connect(&config).await)
}

/// Open a transaction and create a scratch table that disappears on rollback.
async fn scratch(m: &mut Model<'_, PoolProvider>, ddl: &str) {
    m.begin().await.unwrap();
    m.exec_raw(ddl, vec![]).await.unwrap();
}

#[tokio::test]
async fn decodes_canonical_text() {
    let Some(provider) = try_connect().await else {
        return;
    };
    let mut m = provider.model();
    scratch(
        &mut m,
        "CREATE TEMP TABLE rt_values (
            id BIGSERIAL PRIMARY KEY,
            n INT NOT NULL,
            f DOUBLE PRECISION NOT NULL,
            r REAL NOT NULL,
            b BOOLEAN NOT NULL,
            at TIMESTAMPTZ NOT NULL,
            naive TIMESTAMP NOT NULL,
            note TEXT
        ) ON COMMIT DROP",
    )
    .await;

    let id = m
        .table("rt_values")
        .insert_value("n", 42)
        .insert_value("f", 0.1)
        .insert_value("r", 1.5_f32)
        .insert_value("b", true)
        .insert_value("at", "2024-03-05 06:07:08.123 +0000")
        .insert_value("naive", "2024-03-05 06:07:08.123 +0000")
        .insert_value("note", Value::Null)
        .insert("id")
        .await
        .unwrap();

    let row = m
        .table("rt_values")
        .eq("id", id.as_str())
        .select_one()
        .await
        .unwrap()
        .expect("inserted row");

    assert_eq!(row["id"], id);
    assert_eq!(row["n"], "42");
    assert_eq!(row["f"], "0.1");
    assert_eq!(row["r"], "1.5");
    assert_eq!(row["b"], "1");
    assert_eq!(row["at"], "2024-03-05 06:07:08.123 +0000");
    assert_eq!(row["naive"], "2024-03-05 06:07:08.123 +0000");
    assert_eq!(row["note"], "");

    m.rollback().await.unwrap();
}

#[tokio::test]
async fn decoded_rows_bind_back() {
    let Some(provider) = try_connect().await else {
        return;
    };
    let mut m = provider.model();
    scratch(
        &mut m,
        "CREATE TEMP TABLE rt_copy (flag BOOLEAN, at TIMESTAMPTZ, amount FLOAT8) ON COMMIT DROP",
    )
    .await;

    m.table("rt_copy")
        .insert_rows(vec![
            Record::new()
                .with("flag", false)
                .with("at", "2023-12-31 23:59:59.999 +0200")
                .with("amount", 2.25),
        ])
        .insert_batch("")
        .await
        .unwrap();

    let first = m.table("rt_copy").select().await.unwrap().remove(0);
    let copy: Record = first.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    m.table("rt_copy")
        .insert_rows(vec![copy])
        .insert_batch("")
        .await
        .unwrap();

    let rows = m.table("rt_copy").select().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], rows[1]);
    assert_eq!(rows[0]["flag"], "0");
    assert_eq!(rows[0]["at"], "2023-12-31 21:59:59.999 +0000");

    m.rollback().await.unwrap();
}

#[tokio::test]
async fn select_index_last_write_wins() {
    let Some(provider) = try_connect().await else {
        return;
    };
    let mut m = provider.model();
    scratch(
        &mut m,
        "CREATE TEMP TABLE rt_index (id INT PRIMARY KEY, k TEXT) ON COMMIT DROP",
    )
    .await;

    let ids = m
        .table("rt_index")
        .insert_rows(vec![
            Record::new().with("id", 1).with("k", "dup"),
            Record::new().with("id", 2).with("k", "dup"),
            Record::new().with("id", 3).with("k", ""),
            Record::new().with("id", 4).with("k", "solo"),
        ])
        .insert_batch("id")
        .await
        .unwrap();
    assert_eq!(ids.len(), 4);

    let indexed = m
        .table("rt_index")
        .index("k")
        .sort("id")
        .select_index()
        .await
        .unwrap();

    assert_eq!(indexed.len(), 2);
    assert_eq!(indexed["dup"]["id"], "2");
    assert_eq!(indexed["solo"]["id"], "4");

    m.rollback().await.unwrap();
}

#[tokio::test]
async fn enum_labels_decode_as_text() {
    let Some(provider) = try_connect().await else {
        return;
    };
    let mut m = provider.model();
    scratch(&mut m, "CREATE TYPE rt_mood AS ENUM ('happy', 'sad')").await;

    let rows = m
        .query(
            "SELECT 'happy'::rt_mood AS mood, '{\"a\": 1}'::jsonb AS doc",
            vec![],
        )
        .await
        .unwrap();
    assert_eq!(rows[0]["mood"], "happy");
    assert_eq!(rows[0]["doc"], r#"{"a":1}"#);

    m.rollback().await.unwrap();
}

#[tokio::test]
async fn driver_errors_surface_verbatim() {
    let Some(provider) = try_connect().await else {
        return;
    };
    let mut m = provider.model();
    scratch(
        &mut m,
        "CREATE TEMP TABLE rt_unique (email TEXT UNIQUE) ON COMMIT DROP",
    )
    .await;

    m.table("rt_unique")
        .insert_rows(vec![Record::new().with("email", "a@x")])
        .insert_batch("")
        .await
        .unwrap();
    let err = m
        .table("rt_unique")
        .insert_rows(vec![Record::new().with("email", "a@x")])
        .insert_batch("")
        .await
        .unwrap_err();

    assert!(err.is_unique_violation());
    assert_eq!(m.state(), &qesydb::QueryState::default());

    m.rollback().await.unwrap();
}

#[tokio::test]
async fn dropped_transaction_is_not_committed() {
    let Some(provider) = try_connect().await else {
        return;
    };
    provider
        .execute(
            "CREATE TABLE IF NOT EXISTS rt_dropped (v INT)",
            &[],
        )
        .await
        .unwrap();
    provider.execute("DELETE FROM rt_dropped", &[]).await.unwrap();

    {
        let mut m = provider.model();
        m.begin().await.unwrap();
        m.exec_raw("INSERT INTO rt_dropped (v) VALUES ($1)", vec![Value::Int(1)])
            .await
            .unwrap();
        m.clean();
    }

    let mut m = provider.model();
    let rows = m.table("rt_dropped").select().await.unwrap();
    assert!(rows.is_empty());
    m.exec_raw("DROP TABLE rt_dropped", vec![]).await.unwrap();
}

#[tokio::test]
async fn binary_only_types_ask_for_a_text_cast() {
    let Some(provider) = try_connect().await else {
        return;
    };
    let mut m = provider.model();

    for sql in [
        "SELECT '1 day'::interval AS iv",
        "SELECT ARRAY[1, 2]::int4[] AS arr",
    ] {
        let err = m.query(sql, vec![]).await.unwrap_err();
        assert_eq!(err.partial_rows().map(<[_]>::len), Some(0), "{sql}");
        assert!(err.to_string().contains("cast it to text"), "{sql}: {err}");
    }

    let rows = m
        .query("SELECT '1 day'::interval::text AS iv", vec![])
        .await
        .unwrap();
    assert_eq!(rows[0]["iv"], "1 day");
}

#[tokio::test]
async fn timed_out_statement_frees_its_slot() {
    let Some(mut config) = try_config() else {
        return;
    };
    config.max_connections = 1;
    let provider = connect(&config).await;
    let mut m = provider.model();

    m.timeout(Duration::from_millis(200));
    let err = m.query("SELECT pg_sleep(3)", vec![]).await.unwrap_err();
    assert!(err.is_timeout());

    m.no_timeout();
    let started = Instant::now();
    let rows = m.query("SELECT 1 AS one", vec![]).await.unwrap();
    assert_eq!(rows[0]["one"], "1");
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "follow-up waited {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn maintenance_warm_up_leaves_room_for_callers() {
    let Some(mut config) = try_config() else {
        return;
    };
    config.max_connections = 2;
    config.min_connections = 2;
    config.health_check_interval = Duration::from_millis(50);
    let provider = connect(&config).await;
    let pool = provider.pool().clone();

    let held = pool.get().await.unwrap();
    let maintenance = spawn_maintenance(pool.clone(), &config);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let second = tokio::time::timeout(Duration::from_secs(2), pool.get())
        .await
        .expect("caller starved by warm-up")
        .unwrap();
    assert!(pool.status().size <= 2);

    drop(second);
    drop(held);
    maintenance.abort();
}
