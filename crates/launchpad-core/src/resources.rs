// crates/launchpad-core/src/resources.rs

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::config::LaunchpadConfig;
use crate::error::{ResourceError, Result};
use crate::registry::BackendRegistry;
use crate::resource::{DataSink, DataSource};

/// Every data source and data sink a configuration declares, keyed by
/// identifier.
#[derive(Default)]
pub struct Resources {
    sources: BTreeMap<String, Box<dyn DataSource>>,
    sinks: BTreeMap<String, Box<dyn DataSink>>,
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources")
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .field("sinks", &self.sinks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Resources {
    /// Build the resources of `config` with the built-in backends.
    ///
    /// With `tags`, only entries carrying at least one of them are built.
    pub fn from_config(config: &LaunchpadConfig, tags: Option<&[&str]>) -> Result<Self> {
        Self::from_config_with(BackendRegistry::builtin(), config, tags)
    }

    /// Like [`Resources::from_config`], dispatching through `registry`.
    ///
    /// If any entry fails to construct, the ones already built are dropped
    /// (closing their connections) and the error is returned.
    pub fn from_config_with(
        registry: &BackendRegistry,
        config: &LaunchpadConfig,
        tags: Option<&[&str]>,
    ) -> Result<Self> {
        let wanted = |entry_tags: &crate::config::ResourceConfig| {
            tags.map_or(true, |tags| entry_tags.has_any_tag(tags))
        };

        let mut resources = Resources::default();
        for (id, entry) in config.datasources.iter().filter(|(_, e)| wanted(e)) {
            debug!(datasource = %id, resource_type = %entry.resource_type, "creating datasource");
            let source = registry.create_data_source(id, entry.clone(), &config.dbms)?;
            resources.sources.insert(id.clone(), source);
        }
        for (id, entry) in config.datasinks.iter().filter(|(_, e)| wanted(e)) {
            debug!(datasink = %id, resource_type = %entry.resource_type, "creating datasink");
            let sink = registry.create_data_sink(id, entry.clone(), &config.dbms)?;
            resources.sinks.insert(id.clone(), sink);
        }
        Ok(resources)
    }

    pub fn insert_source(&mut self, source: Box<dyn DataSource>) -> Option<Box<dyn DataSource>> {
        self.sources.insert(source.id().to_string(), source)
    }

    pub fn insert_sink(&mut self, sink: Box<dyn DataSink>) -> Option<Box<dyn DataSink>> {
        self.sinks.insert(sink.id().to_string(), sink)
    }

    pub fn source(&mut self, id: &str) -> Result<&mut dyn DataSource> {
        match self.sources.get_mut(id) {
            Some(source) => Ok(source.as_mut()),
            None => Err(ResourceError::configuration(format!(
                "no datasource named '{id}' is configured"
            ))),
        }
    }

    pub fn sink(&mut self, id: &str) -> Result<&mut dyn DataSink> {
        match self.sinks.get_mut(id) {
            Some(sink) => Ok(sink.as_mut()),
            None => Err(ResourceError::configuration(format!(
                "no datasink named '{id}' is configured"
            ))),
        }
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn sink_ids(&self) -> impl Iterator<Item = &str> {
        self.sinks.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.sinks.is_empty()
    }

    /// Close every resource and return how many failed. Failures are logged,
    /// not raised.
    pub fn close_all(&mut self) -> usize {
        let mut failures = 0;
        for (id, source) in self.sources.iter_mut() {
            if let Err(err) = source.close() {
                warn!(datasource = %id, error = %err, "failed to close datasource");
                failures += 1;
            }
        }
        for (id, sink) in self.sinks.iter_mut() {
            if let Err(err) = sink.close() {
                warn!(datasink = %id, error = %err, "failed to close datasink");
                failures += 1;
            }
        }
        failures
    }
}
