// crates/launchpad-core/src/backends/postgres/convert.rs

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::*;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgColumn, PgConnection, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::query_builder::Separated;
use sqlx::types::{Decimal, Json, JsonValue, Uuid};
use sqlx::{Column as _, Connection, Executor, QueryBuilder, Row, Statement, TypeInfo};
use tracing::debug;

use crate::backends::sql::{quote_identifier, quote_table_name};
use crate::error::{ResourceError, Result};

/// Postgres caps a single statement at this many bind parameters.
const MAX_BIND_PARAMETERS: usize = 65_535;

/// Run `sql` with positional `values` and collect the result into a frame whose
/// column types follow the result set's column types.
pub(crate) async fn fetch_dataframe(
    connection: &mut PgConnection,
    sql: &str,
    values: &[&Value],
    persistent: bool,
) -> Result<DataFrame> {
    let mut query = sqlx::query(sql).persistent(persistent);
    for value in values {
        query = bind_json(query, value);
    }
    let rows = query.fetch_all(&mut *connection).await?;

    // An empty result still has a schema; ask the server for it.
    let columns: Vec<PgColumn> = match rows.first() {
        Some(row) => row.columns().to_vec(),
        None => (&mut *connection).prepare(sql).await?.columns().to_vec(),
    };

    let mut frame_columns = Vec::with_capacity(columns.len());
    for column in &columns {
        frame_columns.push(column_from_rows(column, &rows)?);
    }
    Ok(DataFrame::new(frame_columns)?)
}

/// Bind one JSON parameter value. Strings bind as `TEXT`, so a placeholder
/// compared against another type needs an explicit cast (`:day::date`).
fn bind_json<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(flag) => query.bind(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => query.bind(integer),
            None => query.bind(number.as_f64()),
        },
        Value::String(text) => query.bind(text.clone()),
        other => query.bind(Json(other.clone())),
    }
}

fn decode_all<'r, T>(rows: &'r [PgRow], index: usize) -> Result<Vec<Option<T>>>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    rows.iter()
        .map(|row| row.try_get::<Option<T>, _>(index).map_err(ResourceError::from))
        .collect()
}

fn column_from_rows(column: &PgColumn, rows: &[PgRow]) -> Result<Column> {
    let name = PlSmallStr::from(column.name());
    let index = column.ordinal();

    let converted = match column.type_info().name() {
        "BOOL" => Column::new(name, decode_all::<bool>(rows, index)?),
        "INT2" => Column::new(
            name,
            decode_all::<i16>(rows, index)?
                .into_iter()
                .map(|v| v.map(i32::from))
                .collect::<Vec<_>>(),
        ),
        "INT4" => Column::new(name, decode_all::<i32>(rows, index)?),
        "INT8" => Column::new(name, decode_all::<i64>(rows, index)?),
        "FLOAT4" => Column::new(name, decode_all::<f32>(rows, index)?),
        "FLOAT8" => Column::new(name, decode_all::<f64>(rows, index)?),
        "NUMERIC" => Column::new(
            name,
            decode_all::<Decimal>(rows, index)?
                .into_iter()
                .map(|v| v.and_then(|d| d.to_string().parse::<f64>().ok()))
                .collect::<Vec<_>>(),
        ),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" => {
            Column::new(name, decode_all::<String>(rows, index)?)
        }
        "DATE" => Column::new(name, decode_all::<NaiveDate>(rows, index)?),
        "TIMESTAMP" => Column::new(name, decode_all::<NaiveDateTime>(rows, index)?),
        "TIMESTAMPTZ" => Column::new(
            name,
            decode_all::<DateTime<Utc>>(rows, index)?
                .into_iter()
                .map(|v| v.map(|ts| ts.naive_utc()))
                .collect::<Vec<_>>(),
        ),
        "UUID" => Column::new(
            name,
            decode_all::<Uuid>(rows, index)?
                .into_iter()
                .map(|v| v.map(|id| id.to_string()))
                .collect::<Vec<_>>(),
        ),
        "JSON" | "JSONB" => Column::new(
            name,
            decode_all::<JsonValue>(rows, index)?
                .into_iter()
                .map(|v| v.map(|json| json.to_string()))
                .collect::<Vec<_>>(),
        ),
        other => {
            return Err(ResourceError::NotSupportedYet(format!(
                "column '{}' has database type {other}, which cannot be loaded into a dataframe",
                column.name()
            )))
        }
    };
    Ok(converted)
}

/// How `put_dataframe` treats a table that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfExists {
    Fail,
    Replace,
    Append,
}

impl IfExists {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "fail" => Ok(IfExists::Fail),
            "replace" => Ok(IfExists::Replace),
            "append" => Ok(IfExists::Append),
            other => Err(ResourceError::configuration(format!(
                "if_exists must be one of fail, replace, append (got '{other}')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlKind {
    Bool,
    Int,
    Float,
    Text,
    Date,
    Timestamp,
}

impl SqlKind {
    fn for_dtype(dtype: &DataType) -> Self {
        match dtype {
            DataType::Boolean => SqlKind::Bool,
            dtype if dtype.is_integer() => SqlKind::Int,
            dtype if dtype.is_float() => SqlKind::Float,
            DataType::Date => SqlKind::Date,
            DataType::Datetime(_, _) => SqlKind::Timestamp,
            _ => SqlKind::Text,
        }
    }

    fn sql_type(&self) -> &'static str {
        match self {
            SqlKind::Bool => "BOOLEAN",
            SqlKind::Int => "BIGINT",
            SqlKind::Float => "DOUBLE PRECISION",
            SqlKind::Text => "TEXT",
            SqlKind::Date => "DATE",
            SqlKind::Timestamp => "TIMESTAMP",
        }
    }
}

/// Column values materialized into the Rust types they are bound as.
enum SqlValues {
    Bool(Vec<Option<bool>>),
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Date(Vec<Option<NaiveDate>>),
    Timestamp(Vec<Option<NaiveDateTime>>),
}

impl SqlValues {
    fn from_column(column: &Column, kind: SqlKind) -> Result<Self> {
        let series = column.as_materialized_series();
        let values = match kind {
            SqlKind::Bool => SqlValues::Bool(series.bool()?.into_iter().collect()),
            SqlKind::Int => {
                SqlValues::Int(series.cast(&DataType::Int64)?.i64()?.into_iter().collect())
            }
            SqlKind::Float => {
                SqlValues::Float(series.cast(&DataType::Float64)?.f64()?.into_iter().collect())
            }
            SqlKind::Text => SqlValues::Text(
                series
                    .cast(&DataType::String)?
                    .str()?
                    .into_iter()
                    .map(|v| v.map(str::to_string))
                    .collect(),
            ),
            SqlKind::Date => SqlValues::Date(series.date()?.as_date_iter().collect()),
            SqlKind::Timestamp => {
                SqlValues::Timestamp(series.datetime()?.as_datetime_iter().collect())
            }
        };
        Ok(values)
    }

    fn push_bind(&self, row: usize, target: &mut Separated<'_, '_, Postgres, &'static str>) {
        match self {
            SqlValues::Bool(values) => target.push_bind(values[row]),
            SqlValues::Int(values) => target.push_bind(values[row]),
            SqlValues::Float(values) => target.push_bind(values[row]),
            SqlValues::Text(values) => target.push_bind(values[row].clone()),
            SqlValues::Date(values) => target.push_bind(values[row]),
            SqlValues::Timestamp(values) => target.push_bind(values[row]),
        };
    }
}

/// Write `dataframe` into `table` inside a single transaction, creating the
/// table from the frame's dtypes when it does not exist. Returns rows written.
pub(crate) async fn write_dataframe(
    connection: &mut PgConnection,
    table: &str,
    dataframe: &DataFrame,
    if_exists: IfExists,
    chunksize: Option<usize>,
) -> Result<u64> {
    let quoted_table = quote_table_name(table);
    let kinds: Vec<SqlKind> = dataframe
        .get_columns()
        .iter()
        .map(|column| SqlKind::for_dtype(column.dtype()))
        .collect();
    if kinds.is_empty() {
        return Err(ResourceError::configuration(format!(
            "cannot store a dataframe without columns in table {table}"
        )));
    }

    let mut tx = connection.begin().await?;

    let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
        .bind(&quoted_table)
        .fetch_one(&mut *tx)
        .await?;

    let create = match (exists, if_exists) {
        (true, IfExists::Fail) => {
            return Err(ResourceError::configuration(format!(
                "table {table} already exists (set option if_exists to \"append\" or \"replace\")"
            )))
        }
        (true, IfExists::Replace) => {
            debug!(table, "dropping existing table before replacing it");
            sqlx::query(&format!("DROP TABLE {quoted_table}"))
                .execute(&mut *tx)
                .await?;
            true
        }
        (true, IfExists::Append) => false,
        (false, _) => true,
    };

    let column_list = dataframe
        .get_column_names()
        .iter()
        .map(|name| quote_identifier(name.as_str()))
        .collect::<Vec<_>>();

    if create {
        let definitions = column_list
            .iter()
            .zip(&kinds)
            .map(|(name, kind)| format!("{name} {}", kind.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!("CREATE TABLE {quoted_table} ({definitions})"))
            .execute(&mut *tx)
            .await?;
    }

    let values = dataframe
        .get_columns()
        .iter()
        .zip(&kinds)
        .map(|(column, kind)| SqlValues::from_column(column, *kind))
        .collect::<Result<Vec<_>>>()?;

    let max_rows = (MAX_BIND_PARAMETERS / kinds.len()).max(1);
    let rows_per_insert = chunksize.unwrap_or(max_rows).clamp(1, max_rows);
    let insert_prefix = format!("INSERT INTO {quoted_table} ({}) ", column_list.join(", "));

    let height = dataframe.height();
    let mut written = 0u64;
    let mut start = 0;
    while start < height {
        let end = (start + rows_per_insert).min(height);
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(&insert_prefix);
        builder.push_values(start..end, |mut row_binds, row| {
            for column in &values {
                column.push_bind(row, &mut row_binds);
            }
        });
        written += builder.build().execute(&mut *tx).await?.rows_affected();
        start = end;
    }

    tx.commit().await?;
    Ok(written)
}
