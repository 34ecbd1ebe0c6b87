// crates/launchpad-core/src/registry.rs

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;

use crate::backends::file::{FileDataSink, FileDataSource, SUPPORTED_FILE_TYPES};
use crate::backends::POSTGRES_TYPES;
use crate::config::{DbmsConfig, ResourceConfig};
use crate::error::{ResourceError, Result};
use crate::resource::{DataSink, DataSource, ResourceKind};

/// The `[dbms.<name>]` block a database-backed entry resolved to.
#[derive(Debug, Clone, Copy)]
pub struct DbmsBinding<'a> {
    pub name: &'a str,
    pub config: &'a DbmsConfig,
}

pub type SourceBuilder =
    fn(&str, ResourceConfig, Option<DbmsBinding<'_>>) -> Result<Box<dyn DataSource>>;
pub type SinkBuilder =
    fn(&str, ResourceConfig, Option<DbmsBinding<'_>>) -> Result<Box<dyn DataSink>>;

#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    pub name: &'static str,
    pub serves: &'static [&'static str],
    pub description: &'static str,
    pub build_source: Option<SourceBuilder>,
    pub build_sink: Option<SinkBuilder>,
}

static BUILTIN: Lazy<BackendRegistry> = Lazy::new(|| BackendRegistry {
    backends: vec![
        BackendDescriptor {
            name: "file",
            serves: &SUPPORTED_FILE_TYPES,
            description: "Local csv, euro_csv, text and binary files",
            build_source: Some(build_file_source),
            build_sink: Some(build_file_sink),
        },
        BackendDescriptor {
            name: "postgres",
            serves: POSTGRES_TYPES,
            description: "Postgres query sources and table sinks",
            build_source: Some(build_postgres_source),
            build_sink: Some(build_postgres_sink),
        },
    ],
});

/// Maps configuration `type` tags to the backend that serves them.
///
/// Every tag is served by at most one backend, which keeps dispatch
/// unambiguous.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    backends: Vec<BackendDescriptor>,
}

impl BackendRegistry {
    pub fn builtin() -> &'static BackendRegistry {
        &BUILTIN
    }

    pub fn new(backends: Vec<BackendDescriptor>) -> Result<Self> {
        ensure_unambiguous(&backends)?;
        Ok(Self { backends })
    }

    /// A copy of this registry with one more backend.
    pub fn with_backend(&self, backend: BackendDescriptor) -> Result<Self> {
        let mut backends = self.backends.clone();
        backends.push(backend);
        Self::new(backends)
    }

    pub fn backends(&self) -> &[BackendDescriptor] {
        &self.backends
    }

    pub fn backend_for_tag(&self, tag: &str) -> Option<&BackendDescriptor> {
        self.backends
            .iter()
            .find(|backend| backend.serves.contains(&tag))
    }

    /// Work out the backend tag for an entry. Database entries name a
    /// connection (`dbms.<name>`); their tag is `dbms.<connection type>`.
    pub fn resolve<'a>(
        &self,
        kind: ResourceKind,
        id: &str,
        config: &ResourceConfig,
        dbms: &'a BTreeMap<String, DbmsConfig>,
    ) -> Result<(String, Option<DbmsBinding<'a>>)> {
        match config.dbms_connection() {
            Some(name) => {
                let (name, dbms_config) = dbms.get_key_value(name).ok_or_else(|| {
                    ResourceError::configuration(format!(
                        "{kind} '{id}' refers to unknown database connection '{name}'"
                    ))
                })?;
                Ok((
                    format!("dbms.{}", dbms_config.dbms_type),
                    Some(DbmsBinding {
                        name,
                        config: dbms_config,
                    }),
                ))
            }
            None => Ok((config.resource_type.clone(), None)),
        }
    }

    pub fn create_data_source(
        &self,
        id: &str,
        config: ResourceConfig,
        dbms: &BTreeMap<String, DbmsConfig>,
    ) -> Result<Box<dyn DataSource>> {
        let kind = ResourceKind::Source;
        let (tag, binding) = self.resolve(kind, id, &config, dbms)?;
        let build = self
            .backend_for_tag(&tag)
            .and_then(|backend| backend.build_source)
            .ok_or_else(|| no_backend(kind, id, &tag))?;
        build(id, config, binding)
    }

    pub fn create_data_sink(
        &self,
        id: &str,
        config: ResourceConfig,
        dbms: &BTreeMap<String, DbmsConfig>,
    ) -> Result<Box<dyn DataSink>> {
        let kind = ResourceKind::Sink;
        let (tag, binding) = self.resolve(kind, id, &config, dbms)?;
        let build = self
            .backend_for_tag(&tag)
            .and_then(|backend| backend.build_sink)
            .ok_or_else(|| no_backend(kind, id, &tag))?;
        build(id, config, binding)
    }
}

fn no_backend(kind: ResourceKind, id: &str, tag: &str) -> ResourceError {
    ResourceError::configuration(format!(
        "no {kind} backend serves type '{tag}' (in {kind} '{id}')"
    ))
}

fn ensure_unambiguous(backends: &[BackendDescriptor]) -> Result<()> {
    let mut owners: HashMap<&str, &str> = HashMap::new();
    for backend in backends {
        for tag in backend.serves {
            if let Some(previous) = owners.insert(*tag, backend.name) {
                return Err(ResourceError::configuration(format!(
                    "type '{tag}' is served by both '{previous}' and '{}'",
                    backend.name
                )));
            }
        }
    }
    Ok(())
}

fn build_file_source(
    id: &str,
    config: ResourceConfig,
    _dbms: Option<DbmsBinding<'_>>,
) -> Result<Box<dyn DataSource>> {
    Ok(Box::new(FileDataSource::new(id, config)?))
}

fn build_file_sink(
    id: &str,
    config: ResourceConfig,
    _dbms: Option<DbmsBinding<'_>>,
) -> Result<Box<dyn DataSink>> {
    Ok(Box::new(FileDataSink::new(id, config)?))
}

fn require_dbms<'a>(
    kind: ResourceKind,
    id: &str,
    dbms: Option<DbmsBinding<'a>>,
) -> Result<DbmsBinding<'a>> {
    dbms.ok_or_else(|| {
        ResourceError::configuration(format!(
            "{kind} '{id}' needs a database connection (type = \"dbms.<connection>\")"
        ))
    })
}

#[cfg(feature = "postgres")]
fn build_postgres_source(
    id: &str,
    config: ResourceConfig,
    dbms: Option<DbmsBinding<'_>>,
) -> Result<Box<dyn DataSource>> {
    use crate::backends::postgres::PostgresDataSource;

    let dbms = require_dbms(ResourceKind::Source, id, dbms)?;
    Ok(Box::new(PostgresDataSource::new(
        id,
        config,
        dbms.name,
        dbms.config.clone(),
    )?))
}

#[cfg(feature = "postgres")]
fn build_postgres_sink(
    id: &str,
    config: ResourceConfig,
    dbms: Option<DbmsBinding<'_>>,
) -> Result<Box<dyn DataSink>> {
    use crate::backends::postgres::PostgresDataSink;

    let dbms = require_dbms(ResourceKind::Sink, id, dbms)?;
    Ok(Box::new(PostgresDataSink::new(
        id,
        config,
        dbms.name,
        dbms.config.clone(),
    )?))
}

#[cfg(not(feature = "postgres"))]
fn build_postgres_source(
    id: &str,
    _config: ResourceConfig,
    dbms: Option<DbmsBinding<'_>>,
) -> Result<Box<dyn DataSource>> {
    require_dbms(ResourceKind::Source, id, dbms)?;
    Err(postgres_unavailable())
}

#[cfg(not(feature = "postgres"))]
fn build_postgres_sink(
    id: &str,
    _config: ResourceConfig,
    dbms: Option<DbmsBinding<'_>>,
) -> Result<Box<dyn DataSink>> {
    require_dbms(ResourceKind::Sink, id, dbms)?;
    Err(postgres_unavailable())
}

#[cfg(not(feature = "postgres"))]
fn postgres_unavailable() -> ResourceError {
    ResourceError::DependencyUnavailable {
        backend: "postgres",
        feature: "postgres",
    }
}
