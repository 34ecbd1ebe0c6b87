//! Driver-independent helpers for query-based backends.

use serde_json::Value;

use crate::config::Params;
use crate::error::{ResourceError, Result};

/// A query whose `:name` placeholders were rewritten to `$1`, `$2`, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedQuery {
    pub sql: String,
    /// Placeholder names in positional order; a name used twice maps to the
    /// same position.
    pub names: Vec<String>,
}

impl NamedQuery {
    pub fn parse(query: &str) -> Self {
        rewrite_named_params(query)
    }

    /// Values from `params` in positional order.
    ///
    /// Every placeholder needs a value and every supplied value must be used.
    pub fn ordered_values<'p>(&self, params: Option<&'p Params>) -> Result<Vec<&'p Value>> {
        let mut values = Vec::with_capacity(self.names.len());
        for name in &self.names {
            let value = params.and_then(|p| p.get(name)).ok_or_else(|| {
                ResourceError::configuration(format!("query parameter :{name} was not supplied"))
            })?;
            values.push(value);
        }

        if let Some(params) = params {
            if let Some(unused) = params.keys().find(|key| !self.names.contains(key)) {
                return Err(ResourceError::configuration(format!(
                    "parameter '{unused}' does not appear in the query"
                )));
            }
        }

        Ok(values)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn rewrite_named_params(query: &str) -> NamedQuery {
    let mut sql = String::with_capacity(query.len());
    let mut names: Vec<String> = Vec::new();
    let chars: Vec<char> = query.chars().collect();
    let mut i = 0;
    let mut prev: Option<char> = None;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                // Copy quoted literals/identifiers verbatim; doubled quotes
                // inside them are just two consecutive quoted sections.
                sql.push(c);
                i += 1;
                while i < chars.len() {
                    sql.push(chars[i]);
                    i += 1;
                    if chars[i - 1] == c {
                        break;
                    }
                }
                prev = Some(c);
                continue;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    sql.push(chars[i]);
                    i += 1;
                }
                continue;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                sql.push_str("::");
                i += 2;
                prev = Some(':');
                continue;
            }
            ':' if prev.map_or(true, |p| !is_ident_char(p) && p != ':')
                && chars
                    .get(i + 1)
                    .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') =>
            {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let position = match names.iter().position(|existing| *existing == name) {
                    Some(index) => index + 1,
                    None => {
                        names.push(name);
                        names.len()
                    }
                };
                sql.push('$');
                sql.push_str(&position.to_string());
                prev = chars.get(end - 1).copied();
                i = end;
                continue;
            }
            _ => {}
        }
        sql.push(c);
        prev = Some(c);
        i += 1;
    }

    NamedQuery { sql, names }
}

/// Quote a possibly schema-qualified table name (`schema.table`).
pub fn quote_table_name(table: &str) -> String {
    table
        .split('.')
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(".")
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        value.as_object().cloned().expect("object literal")
    }

    #[test]
    fn rewrites_named_placeholders() {
        let query = NamedQuery::parse("SELECT * FROM t WHERE id = :id AND kind = :kind OR parent = :id");
        assert_eq!(
            query.sql,
            "SELECT * FROM t WHERE id = $1 AND kind = $2 OR parent = $1"
        );
        assert_eq!(query.names, vec!["id".to_string(), "kind".to_string()]);
    }

    #[test]
    fn leaves_casts_literals_and_comments_alone() {
        let query = NamedQuery::parse(
            "SELECT ':nope', \"a:b\", x::int, ts::date -- :ignored\nFROM t WHERE y = :y",
        );
        assert_eq!(
            query.sql,
            "SELECT ':nope', \"a:b\", x::int, ts::date -- :ignored\nFROM t WHERE y = $1"
        );
        assert_eq!(query.names, vec!["y".to_string()]);
    }

    #[test]
    fn casts_on_placeholders_survive_the_rewrite() {
        let query = NamedQuery::parse("SELECT d FROM t WHERE d = :day::date AND n < :n::int4");
        assert_eq!(query.sql, "SELECT d FROM t WHERE d = $1::date AND n < $2::int4");
        assert_eq!(query.names, vec!["day".to_string(), "n".to_string()]);
    }

    #[test]
    fn time_literals_are_not_placeholders() {
        let query = NamedQuery::parse("SELECT '12:30' AS t, 10:20");
        assert!(query.names.is_empty());
        assert_eq!(query.sql, "SELECT '12:30' AS t, 10:20");
    }

    #[test]
    fn orders_values_by_position() {
        let query = NamedQuery::parse("SELECT :b, :a");
        let supplied = params(json!({"a": 1, "b": "two"}));
        let values = query.ordered_values(Some(&supplied)).expect("all supplied");
        assert_eq!(values, vec![&json!("two"), &json!(1)]);
    }

    #[test]
    fn missing_and_unused_params_are_errors() {
        let query = NamedQuery::parse("SELECT * FROM t WHERE id = :id");

        let err = query.ordered_values(None).unwrap_err();
        assert!(err.to_string().contains(":id"));

        let extra = params(json!({"id": 1, "other": 2}));
        let err = query.ordered_values(Some(&extra)).unwrap_err();
        assert!(err.to_string().contains("other"));

        let plain = NamedQuery::parse("SELECT 1");
        assert!(plain.ordered_values(None).expect("no params").is_empty());
    }

    #[test]
    fn quotes_qualified_tables() {
        assert_eq!(quote_table_name("public.scores"), "\"public\".\"scores\"");
        assert_eq!(quote_table_name("odd\"name"), "\"odd\"\"name\"");
    }
}
