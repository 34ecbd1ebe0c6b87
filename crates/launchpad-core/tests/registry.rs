use std::collections::BTreeMap;

use launchpad_core::{
    BackendDescriptor, BackendRegistry, DataSink, DataSource, DbmsBinding, DbmsConfig, Params, Raw,
    Resource, ResourceConfig, ResourceError, Result,
};
use polars::prelude::*;

/// In-memory backend serving the `bogus` tag.
#[derive(Debug)]
struct BogusSource {
    id: String,
    config: ResourceConfig,
}

impl Resource for BogusSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn config(&self) -> &ResourceConfig {
        &self.config
    }
}

impl DataSource for BogusSource {
    fn get_dataframe(&mut self, _params: Option<&Params>, _buffer: bool) -> Result<DataFrame> {
        Ok(df!("answer" => [42i64])?)
    }

    fn get_raw(&mut self, _params: Option<&Params>, _buffer: bool) -> Result<Raw> {
        Ok(Raw::from("42"))
    }
}

fn build_bogus(
    id: &str,
    config: ResourceConfig,
    _dbms: Option<DbmsBinding<'_>>,
) -> Result<Box<dyn DataSource>> {
    Ok(Box::new(BogusSource {
        id: id.to_string(),
        config,
    }))
}

fn bogus_backend() -> BackendDescriptor {
    BackendDescriptor {
        name: "bogus",
        serves: &["bogus"],
        description: "answers every question with 42",
        build_source: Some(build_bogus),
        build_sink: None,
    }
}

#[test]
fn custom_backends_join_the_dispatch() {
    let registry = BackendRegistry::builtin()
        .with_backend(bogus_backend())
        .expect("bogus tag is free");
    let dbms = BTreeMap::new();

    let mut source = registry
        .create_data_source("oracle", ResourceConfig::new("bogus"), &dbms)
        .expect("bogus source");
    assert_eq!(source.id(), "oracle");
    let df = source.fetch_dataframe().expect("answer");
    assert_eq!(df.column("answer").expect("column").i64().expect("ints").get(0), Some(42));

    // The built-in registry is left untouched.
    let err = BackendRegistry::builtin()
        .create_data_source("oracle", ResourceConfig::new("bogus"), &dbms)
        .expect_err("not registered globally");
    assert!(matches!(err, ResourceError::Configuration(_)));

    // Boxed resources print their backend state.
    assert!(format!("{source:?}").contains("oracle"));
}

#[test]
fn backends_without_a_sink_builder_refuse_sinks() {
    let registry = BackendRegistry::builtin()
        .with_backend(bogus_backend())
        .expect("bogus tag is free");
    let err = registry
        .create_data_sink("oracle_out", ResourceConfig::new("bogus"), &BTreeMap::new())
        .expect_err("no sink side");
    match err {
        ResourceError::Configuration(message) => {
            assert!(message.contains("bogus"), "{message}");
            assert!(message.contains("oracle_out"), "{message}");
        }
        other => panic!("expected configuration error, got {other:?}"),
    }
}

#[test]
fn unknown_tags_fail_dispatch() {
    let err = BackendRegistry::builtin()
        .create_data_source("events", ResourceConfig::new("parquet"), &BTreeMap::new())
        .expect_err("nobody serves parquet");
    match err {
        ResourceError::Configuration(message) => {
            assert!(message.contains("parquet"), "{message}");
            assert!(message.contains("events"), "{message}");
        }
        other => panic!("expected configuration error, got {other:?}"),
    }
}

#[test]
fn file_tags_dispatch_to_the_file_backend() {
    let registry = BackendRegistry::builtin();
    let dbms = BTreeMap::new();
    for tag in ["csv", "euro_csv", "text_file", "binary_file"] {
        let source = registry
            .create_data_source("in", ResourceConfig::new(tag).with_path("in.dat"), &dbms)
            .expect("file source");
        assert_eq!(source.config().resource_type, tag);
        let sink = registry
            .create_data_sink("out", ResourceConfig::new(tag).with_path("out.dat"), &dbms)
            .expect("file sink");
        assert_eq!(sink.id(), "out");
    }
}

#[test]
fn database_entries_need_a_known_connection() {
    let err = BackendRegistry::builtin()
        .create_data_source(
            "report",
            ResourceConfig::new("dbms.warehouse").with_query("SELECT 1"),
            &BTreeMap::new(),
        )
        .expect_err("no [dbms.warehouse] block");
    match err {
        ResourceError::Configuration(message) => assert!(message.contains("warehouse"), "{message}"),
        other => panic!("expected configuration error, got {other:?}"),
    }
}

#[test]
fn unsupported_database_types_fail_dispatch() {
    let mut dbms = BTreeMap::new();
    dbms.insert(
        "legacy".to_string(),
        DbmsConfig {
            dbms_type: "oracle".into(),
            host: "db.example.com".into(),
            port: 1521,
            service_name: "ORCL".into(),
            user_var: "LEGACY_USER".into(),
            password_var: None,
            options: Default::default(),
        },
    );
    let err = BackendRegistry::builtin()
        .create_data_source(
            "report",
            ResourceConfig::new("dbms.legacy").with_query("SELECT 1 FROM dual"),
            &dbms,
        )
        .expect_err("oracle is not served");
    match err {
        ResourceError::Configuration(message) => {
            assert!(message.contains("dbms.oracle"), "{message}")
        }
        other => panic!("expected configuration error, got {other:?}"),
    }
}
