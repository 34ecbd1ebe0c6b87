// crates/launchpad-core/src/resource.rs

use std::fmt;

use polars::prelude::DataFrame;

use crate::config::{Options, Params, ResourceConfig};
use crate::error::{ResourceError, Result};

/// Unstructured payload for `get_raw`/`put_raw`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Raw {
    Text(String),
    Bytes(Vec<u8>),
}

impl Raw {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Raw::Text(text) => text.as_bytes(),
            Raw::Bytes(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Raw {
    fn from(value: String) -> Self {
        Raw::Text(value)
    }
}

impl From<&str> for Raw {
    fn from(value: &str) -> Self {
        Raw::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Raw {
    fn from(value: Vec<u8>) -> Self {
        Raw::Bytes(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Source,
    Sink,
}

impl ResourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Source => "datasource",
            ResourceKind::Sink => "datasink",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity shared by every source and sink: its name, its configuration
/// entry and the options forwarded to the backend primitive.
pub trait Resource: Send + fmt::Debug {
    fn id(&self) -> &str;
    fn config(&self) -> &ResourceConfig;

    fn options(&self) -> &Options {
        &self.config().options
    }

    /// Release anything held open by the resource. Calling it again after a
    /// successful close does nothing.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A readable resource.
///
/// `params` fills named placeholders for query-based backends and is ignored
/// by file backends. `buffer = true` is reserved and always rejected.
pub trait DataSource: Resource {
    fn get_dataframe(&mut self, params: Option<&Params>, buffer: bool) -> Result<DataFrame>;

    fn get_raw(&mut self, params: Option<&Params>, buffer: bool) -> Result<Raw>;

    fn fetch_dataframe(&mut self) -> Result<DataFrame> {
        self.get_dataframe(None, false)
    }

    fn fetch_raw(&mut self) -> Result<Raw> {
        self.get_raw(None, false)
    }
}

/// A writable resource. Same `params`/`buffer` conventions as [`DataSource`].
pub trait DataSink: Resource {
    fn put_dataframe(
        &mut self,
        dataframe: &DataFrame,
        params: Option<&Params>,
        buffer: bool,
    ) -> Result<()>;

    fn put_raw(&mut self, raw: Raw, params: Option<&Params>, buffer: bool) -> Result<()>;

    fn store_dataframe(&mut self, dataframe: &DataFrame) -> Result<()> {
        self.put_dataframe(dataframe, None, false)
    }

    fn store_raw(&mut self, raw: Raw) -> Result<()> {
        self.put_raw(raw, None, false)
    }
}

pub(crate) fn ensure_unbuffered(buffer: bool, action: &str) -> Result<()> {
    if buffer {
        return Err(ResourceError::NotSupportedYet(format!(
            "Buffered {action} not supported yet"
        )));
    }
    Ok(())
}

pub(crate) fn describe(kind: ResourceKind, id: &str) -> String {
    format!("{kind} '{id}'")
}
