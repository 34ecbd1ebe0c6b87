#![cfg(feature = "postgres")]

use std::collections::BTreeMap;
use std::env;
use std::fs;

use launchpad_core::backends::file::FileDataSource;
use launchpad_core::backends::postgres::{PostgresDataSink, PostgresDataSource};
use launchpad_core::{
    BackendRegistry, DataSink, DataSource, DbmsConfig, Params, Raw, Resource, ResourceConfig,
    ResourceError,
};
use polars::prelude::*;
use serde_json::json;
use tempfile::TempDir;

fn dbms(host: &str, port: u16, user_var: &str) -> DbmsConfig {
    DbmsConfig {
        dbms_type: "postgres".into(),
        host: host.into(),
        port,
        service_name: "postgres".into(),
        user_var: user_var.into(),
        password_var: None,
        options: Default::default(),
    }
}

/// Connection block for the database named by `LAUNCHPAD_TEST_PG_*`, or
/// `None` when no test database is configured.
fn live_dbms() -> Option<DbmsConfig> {
    let host = match env::var("LAUNCHPAD_TEST_PG_HOST") {
        Ok(host) => host,
        Err(_) => {
            eprintln!("Skipping postgres integration test because LAUNCHPAD_TEST_PG_HOST is not set");
            return None;
        }
    };
    let port = env::var("LAUNCHPAD_TEST_PG_PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(5432);
    let mut config = dbms(&host, port, "LAUNCHPAD_TEST_PG_USER");
    if let Ok(database) = env::var("LAUNCHPAD_TEST_PG_DATABASE") {
        config.service_name = database;
    }
    if env::var("LAUNCHPAD_TEST_PG_PASSWORD").is_ok() {
        config.password_var = Some("LAUNCHPAD_TEST_PG_PASSWORD".into());
    }
    Some(config)
}

#[test]
fn unreachable_host_fails_construction() {
    env::set_var("LAUNCHPAD_UNREACHABLE_TEST_USER", "nobody");
    let mut config = dbms("127.0.0.1", 1, "LAUNCHPAD_UNREACHABLE_TEST_USER");
    config.options.insert("connect_timeout".into(), json!(5));

    let result = PostgresDataSource::new(
        "report",
        ResourceConfig::new("dbms.unreachable").with_query("SELECT 1"),
        "unreachable",
        config,
    );
    match result {
        Err(ResourceError::Connection { connection, .. }) => assert_eq!(connection, "unreachable"),
        Err(other) => panic!("expected connection error, got {other:?}"),
        Ok(_) => panic!("nothing listens on port 1"),
    }
}

#[test]
fn connect_timeout_bounds_an_unreachable_host() {
    env::set_var("LAUNCHPAD_TIMEOUT_TEST_USER", "nobody");
    let mut config = dbms("10.255.255.1", 5432, "LAUNCHPAD_TIMEOUT_TEST_USER");
    config.options.insert("connect_timeout".into(), json!(0.5));

    let started = std::time::Instant::now();
    let err = PostgresDataSource::new(
        "report",
        ResourceConfig::new("dbms.blackhole").with_query("SELECT 1"),
        "blackhole",
        config,
    )
    .expect_err("nothing answers");
    assert!(matches!(err, ResourceError::Connection { .. }), "{err:?}");
    assert!(started.elapsed() < std::time::Duration::from_secs(30));
}

#[tokio::test]
async fn construction_inside_an_async_runtime_is_an_error() {
    env::set_var("LAUNCHPAD_ASYNC_TEST_USER", "nobody");
    let mut config = dbms("127.0.0.1", 1, "LAUNCHPAD_ASYNC_TEST_USER");
    config.options.insert("connect_timeout".into(), json!(5));

    let result = PostgresDataSource::new(
        "report",
        ResourceConfig::new("dbms.nested").with_query("SELECT 1"),
        "nested",
        config,
    );
    match result {
        Err(ResourceError::AsyncContext { connection }) => assert_eq!(connection, "nested"),
        Err(other) => panic!("expected async context error, got {other:?}"),
        Ok(_) => panic!("construction cannot block inside a runtime"),
    }
}

#[test]
fn live_sessions_refuse_calls_from_async_code() {
    let Some(config) = live_dbms() else { return };

    let mut source = PostgresDataSource::new(
        "report",
        ResourceConfig::new("dbms.test").with_query("SELECT 1 AS one"),
        "test",
        config,
    )
    .expect("connect");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    runtime.block_on(async move {
        assert!(matches!(
            source.fetch_dataframe(),
            Err(ResourceError::AsyncContext { .. })
        ));
        // Dropped here, inside the runtime, without panicking.
        drop(source);
    });
}

#[test]
fn missing_user_variable_is_reported_before_connecting() {
    let config = dbms("127.0.0.1", 1, "LAUNCHPAD_TEST_USER_THAT_IS_NEVER_SET");
    let err = PostgresDataSink::new(
        "archive",
        ResourceConfig::new("dbms.unreachable").with_table("archive"),
        "unreachable",
        config,
    )
    .expect_err("no credentials");
    match err {
        ResourceError::MissingCredential { var } => {
            assert_eq!(var, "LAUNCHPAD_TEST_USER_THAT_IS_NEVER_SET")
        }
        other => panic!("expected missing credential, got {other:?}"),
    }
}

#[test]
fn query_and_table_are_required() {
    let config = dbms("127.0.0.1", 1, "LAUNCHPAD_TEST_USER_THAT_IS_NEVER_SET");
    let err = PostgresDataSource::new("report", ResourceConfig::new("dbms.x"), "x", config.clone())
        .expect_err("no query");
    assert!(matches!(err, ResourceError::Configuration(_)));

    let err = PostgresDataSink::new("archive", ResourceConfig::new("dbms.x"), "x", config)
        .expect_err("no table");
    assert!(matches!(err, ResourceError::Configuration(_)));
}

#[test]
fn unknown_connection_options_are_rejected() {
    env::set_var("LAUNCHPAD_OPTIONS_TEST_USER", "nobody");
    let mut config = dbms("127.0.0.1", 1, "LAUNCHPAD_OPTIONS_TEST_USER");
    config.options.insert("encoding".into(), json!("UTF-8"));

    let err = PostgresDataSource::new(
        "report",
        ResourceConfig::new("dbms.x").with_query("SELECT 1"),
        "x",
        config,
    )
    .expect_err("encoding is not a connection option");
    match err {
        ResourceError::Configuration(message) => assert!(message.contains("encoding"), "{message}"),
        other => panic!("expected configuration error, got {other:?}"),
    }
}

#[test]
fn nulls_from_the_database_match_empty_csv_cells() {
    let Some(config) = live_dbms() else { return };

    let mut database = PostgresDataSource::new(
        "gaps_db",
        ResourceConfig::new("dbms.test").with_query(
            "SELECT id::bigint AS id, amount::float8 AS amount \
             FROM (VALUES (1, 1.5), (2, NULL), (3, 'NaN')) AS t(id, amount) ORDER BY id",
        ),
        "test",
        config,
    )
    .expect("connect");
    let from_db = database.fetch_dataframe().expect("query");

    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("gaps.csv");
    fs::write(&path, "id,amount\n1,1.5\n2,\n3,\n").expect("seed csv");
    let from_csv = FileDataSource::new("gaps_csv", ResourceConfig::new("csv").with_path(&path))
        .expect("source")
        .fetch_dataframe()
        .expect("read");

    assert!(from_db.equals_missing(&from_csv), "{from_db}\n{from_csv}");
    database.close().expect("close");
    assert!(!database.is_connected());
}

#[test]
fn named_parameters_are_bound() {
    let Some(config) = live_dbms() else { return };

    let mut source = PostgresDataSource::new(
        "params",
        ResourceConfig::new("dbms.test")
            .with_query("SELECT :label::text AS label, :limit::bigint * 2 AS doubled"),
        "test",
        config,
    )
    .expect("connect");

    let mut params = Params::new();
    params.insert("label".into(), json!("north"));
    params.insert("limit".into(), json!(21));
    let df = source.get_dataframe(Some(&params), false).expect("query");
    assert_eq!(df.column("label").expect("label").str().expect("str").get(0), Some("north"));
    assert_eq!(df.column("doubled").expect("doubled").i64().expect("i64").get(0), Some(42));

    let err = source.fetch_dataframe().expect_err("parameters missing");
    assert!(matches!(err, ResourceError::Configuration(_)));
}

#[test]
fn string_parameters_compare_against_typed_columns_with_a_cast() {
    let Some(config) = live_dbms() else { return };

    let mut source = PostgresDataSource::new(
        "by_day",
        ResourceConfig::new("dbms.test").with_query(
            "SELECT count(*)::bigint AS hits \
             FROM (VALUES (DATE '2024-05-01'), (DATE '2024-05-02')) AS t(d) WHERE d = :day::date",
        ),
        "test",
        config,
    )
    .expect("connect");

    let mut params = Params::new();
    params.insert("day".into(), json!("2024-05-01"));
    let df = source.get_dataframe(Some(&params), false).expect("query");
    assert_eq!(df.column("hits").expect("hits").i64().expect("i64").get(0), Some(1));
}

#[test]
fn database_resources_refuse_raw_payloads() {
    let Some(config) = live_dbms() else { return };

    let mut source = PostgresDataSource::new(
        "report",
        ResourceConfig::new("dbms.test").with_query("SELECT 1 AS one"),
        "test",
        config.clone(),
    )
    .expect("connect");
    assert!(matches!(source.fetch_raw(), Err(ResourceError::NotSupportedYet(_))));
    assert!(matches!(
        source.get_dataframe(None, true),
        Err(ResourceError::NotSupportedYet(_))
    ));

    let mut sink = PostgresDataSink::new(
        "archive",
        ResourceConfig::new("dbms.test").with_table("launchpad_raw_refusal"),
        "test",
        config,
    )
    .expect("connect");
    assert!(matches!(
        sink.store_raw(Raw::from("blob")),
        Err(ResourceError::NotSupportedYet(_))
    ));
}

#[test]
fn table_writes_honour_if_exists() {
    let Some(config) = live_dbms() else { return };
    let table = "launchpad_if_exists_test";
    let frame = df!(
        "site" => ["north", "south"],
        "reading" => [Some(1.25f64), None]
    )
    .expect("frame");

    let mut dbms_map = BTreeMap::new();
    dbms_map.insert("test".to_string(), config);
    let registry = BackendRegistry::builtin();
    let sink_config = |mode: &str| {
        ResourceConfig::new("dbms.test")
            .with_table(table)
            .with_option("if_exists", mode)
    };

    let mut replace = registry
        .create_data_sink("replace", sink_config("replace"), &dbms_map)
        .expect("connect");
    replace.store_dataframe(&frame).expect("replace");
    // Index is off unless asked for.
    assert_eq!(replace.options().get("index"), Some(&json!(false)));

    let mut fail = registry
        .create_data_sink("fail", sink_config("fail"), &dbms_map)
        .expect("connect");
    assert!(matches!(
        fail.store_dataframe(&frame),
        Err(ResourceError::Configuration(_))
    ));

    let mut append = registry
        .create_data_sink("append", sink_config("append"), &dbms_map)
        .expect("connect");
    append.store_dataframe(&frame).expect("append");

    let mut reader = registry
        .create_data_source(
            "check",
            ResourceConfig::new("dbms.test")
                .with_query(format!("SELECT site, reading FROM {table} ORDER BY site")),
            &dbms_map,
        )
        .expect("connect");
    let stored = reader.fetch_dataframe().expect("read back");
    assert_eq!(stored.height(), 4);
    assert_eq!(stored.column("reading").expect("reading").null_count(), 2);

    replace.close().expect("close");
    fail.close().expect("close");
    append.close().expect("close");
    reader.close().expect("close");
}
