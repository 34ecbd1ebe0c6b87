// crates/launchpad-core/src/options.rs

use serde_json::Value;

use crate::config::Options;
use crate::error::{ResourceError, Result};

/// Typed view over an options map, producing `Configuration` errors that name
/// the offending key and the resource it belongs to.
pub(crate) struct OptionReader<'a> {
    options: &'a Options,
    context: String,
}

impl<'a> OptionReader<'a> {
    pub fn new(options: &'a Options, context: impl Into<String>) -> Self {
        Self {
            options,
            context: context.into(),
        }
    }

    /// Fail on the first key the underlying primitive has no setting for.
    pub fn allow_only(&self, allowed: &[&str]) -> Result<()> {
        match self.options.keys().find(|key| !allowed.contains(&key.as_str())) {
            Some(key) => Err(ResourceError::configuration(format!(
                "unsupported option `{key}` for {} (supported: {})",
                self.context,
                if allowed.is_empty() {
                    "none".to_string()
                } else {
                    allowed.join(", ")
                }
            ))),
            None => Ok(()),
        }
    }

    pub fn bool(&self, key: &str) -> Result<Option<bool>> {
        self.typed(key, "a boolean", Value::as_bool)
    }

    pub fn usize(&self, key: &str) -> Result<Option<usize>> {
        self.typed(key, "a non-negative integer", |value| {
            value.as_u64().and_then(|n| usize::try_from(n).ok())
        })
    }

    /// An integer that may be explicitly `null`; the outer `Option` is `None`
    /// when the key is absent.
    pub fn nullable_usize(&self, key: &str) -> Result<Option<Option<usize>>> {
        match self.options.get(key) {
            None => Ok(None),
            Some(Value::Null) => Ok(Some(None)),
            Some(_) => self.usize(key).map(|n| n.map(Some)),
        }
    }

    pub fn f64(&self, key: &str) -> Result<Option<f64>> {
        self.typed(key, "a number", Value::as_f64)
    }

    pub fn str(&self, key: &str) -> Result<Option<&'a str>> {
        self.typed(key, "a string", Value::as_str)
    }

    /// A single ASCII character, as used for quote characters.
    pub fn ascii_char(&self, key: &str) -> Result<Option<u8>> {
        match self.str(key)? {
            None => Ok(None),
            Some(text) if text.len() == 1 && text.is_ascii() => Ok(Some(text.as_bytes()[0])),
            Some(_) => Err(self.invalid(key, "a single ASCII character")),
        }
    }

    pub fn string_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        let Some(value) = self.options.get(key) else {
            return Ok(None);
        };
        let items = value
            .as_array()
            .ok_or_else(|| self.invalid(key, "a list of strings"))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.invalid(key, "a list of strings"))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    pub fn table(&self, key: &str) -> Result<Option<&'a Options>> {
        self.typed(key, "a table", Value::as_object)
    }

    fn typed<T>(
        &self,
        key: &str,
        expected: &str,
        convert: impl Fn(&'a Value) -> Option<T>,
    ) -> Result<Option<T>> {
        match self.options.get(key) {
            None => Ok(None),
            Some(value) => convert(value)
                .map(Some)
                .ok_or_else(|| self.invalid(key, expected)),
        }
    }

    fn invalid(&self, key: &str, expected: &str) -> ResourceError {
        ResourceError::configuration(format!(
            "option `{key}` for {} must be {expected}",
            self.context
        ))
    }
}
