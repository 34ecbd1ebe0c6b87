// crates/launchpad-core/src/config.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ResourceError, Result};

/// Free-form settings forwarded to a backend's read/write primitive.
pub type Options = serde_json::Map<String, Value>;

/// Named query parameters supplied at call time.
pub type Params = serde_json::Map<String, Value>;

/// The resource-related sections of a launchpad configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LaunchpadConfig {
    #[serde(default)]
    pub dbms: BTreeMap<String, DbmsConfig>,
    #[serde(default)]
    pub datasources: BTreeMap<String, ResourceConfig>,
    #[serde(default)]
    pub datasinks: BTreeMap<String, ResourceConfig>,
}

impl LaunchpadConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load a configuration file, choosing the format from its extension
    /// (`.json` is read as JSON, anything else as TOML).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }
}

/// One `[datasources.<id>]` or `[datasinks.<id>]` entry.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResourceConfig {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default)]
    pub options: Options,
    /// Consumed by the caching layer; carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ResourceConfig {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            path: None,
            query: None,
            table: None,
            options: Options::new(),
            expires: None,
            tags: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Name of the `[dbms.<name>]` block this entry points at, if its type is
    /// of the form `dbms.<name>`.
    pub fn dbms_connection(&self) -> Option<&str> {
        self.resource_type.strip_prefix("dbms.")
    }

    pub fn has_any_tag(&self, tags: &[&str]) -> bool {
        self.tags.iter().any(|tag| tags.contains(&tag.as_str()))
    }
}

/// One `[dbms.<name>]` connection block.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DbmsConfig {
    #[serde(rename = "type")]
    pub dbms_type: String,
    pub host: String,
    pub port: u16,
    pub service_name: String,
    pub user_var: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_var: Option<String>,
    #[serde(default)]
    pub options: Options,
}

/// Default `index` to `false` for tabular writes. A value already present is
/// left alone, so applying this more than once is harmless.
pub fn inject_default_index(options: &mut Options) {
    options
        .entry("index".to_string())
        .or_insert(Value::Bool(false));
}

pub(crate) fn require_path<'a>(config: &'a ResourceConfig, context: &str) -> Result<&'a Path> {
    config
        .path
        .as_deref()
        .ok_or_else(|| ResourceError::configuration(format!("{context} is missing `path`")))
}
