//! Postgres-backed sources and sinks.
//!
//! Each resource opens its own long-lived connection when it is constructed
//! and closes it on [`Resource::close`] or when dropped.

mod connection;
mod convert;

use polars::prelude::{DataFrame, PlSmallStr};
use tracing::{debug, info};

use crate::backends::sql::NamedQuery;
use crate::config::{inject_default_index, DbmsConfig, Params, ResourceConfig};
use crate::error::{ResourceError, Result};
use crate::frame::normalize_missing;
use crate::options::OptionReader;
use crate::resource::{describe, ensure_unbuffered, DataSink, DataSource, Raw, Resource, ResourceKind};

pub use connection::{connect, DbSession};
pub use convert::IfExists;

const QUERY_OPTIONS: &[&str] = &["persistent"];
const TABLE_OPTIONS: &[&str] = &["index", "index_label", "if_exists", "chunksize"];

/// Runs the configured `query` and returns its result as a dataframe.
#[derive(Debug)]
pub struct PostgresDataSource {
    id: String,
    config: ResourceConfig,
    dbms_config: DbmsConfig,
    query: String,
    session: DbSession,
}

impl PostgresDataSource {
    pub fn new(
        id: impl Into<String>,
        config: ResourceConfig,
        connection_name: &str,
        dbms_config: DbmsConfig,
    ) -> Result<Self> {
        let id = id.into();
        let query = config.query.clone().ok_or_else(|| {
            ResourceError::configuration(format!(
                "{} is missing `query`",
                describe(ResourceKind::Source, &id)
            ))
        })?;

        info!(datasource = %id, connection = connection_name, "establishing database connection for datasource");
        let session = connect(connection_name, &dbms_config)?;

        Ok(Self {
            id,
            config,
            dbms_config,
            query,
            session,
        })
    }

    pub fn dbms_config(&self) -> &DbmsConfig {
        &self.dbms_config
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_open()
    }
}

impl Resource for PostgresDataSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn config(&self) -> &ResourceConfig {
        &self.config
    }

    fn close(&mut self) -> Result<()> {
        self.session.close()
    }
}

impl DataSource for PostgresDataSource {
    fn get_dataframe(&mut self, params: Option<&Params>, buffer: bool) -> Result<DataFrame> {
        ensure_unbuffered(buffer, "reading")?;

        let reader = OptionReader::new(&self.config.options, describe(ResourceKind::Source, &self.id));
        reader.allow_only(QUERY_OPTIONS)?;
        let persistent = reader.bool("persistent")?.unwrap_or(true);

        let named = NamedQuery::parse(&self.query);
        let values = named.ordered_values(params)?;

        debug!(
            query = %self.query,
            params = ?params,
            options = ?self.config.options,
            "fetching query"
        );
        let (runtime, connection) = self.session.parts()?;
        let df = runtime.block_on(convert::fetch_dataframe(
            connection,
            &named.sql,
            &values,
            persistent,
        ))?;

        normalize_missing(df)
    }

    fn get_raw(&mut self, _params: Option<&Params>, _buffer: bool) -> Result<Raw> {
        Err(ResourceError::NotSupportedYet(
            "PostgresDataSource does not support raw format/blobs. \
             Use method \"get_dataframe\" for dataframes"
                .to_string(),
        ))
    }
}

/// Stores dataframes in the configured `table`.
#[derive(Debug)]
pub struct PostgresDataSink {
    id: String,
    config: ResourceConfig,
    dbms_config: DbmsConfig,
    table: String,
    session: DbSession,
}

impl PostgresDataSink {
    pub fn new(
        id: impl Into<String>,
        mut config: ResourceConfig,
        connection_name: &str,
        dbms_config: DbmsConfig,
    ) -> Result<Self> {
        let id = id.into();
        let table = config.table.clone().ok_or_else(|| {
            ResourceError::configuration(format!(
                "{} is missing `table`",
                describe(ResourceKind::Sink, &id)
            ))
        })?;
        inject_default_index(&mut config.options);

        info!(datasink = %id, connection = connection_name, "establishing database connection for datasink");
        let session = connect(connection_name, &dbms_config)?;

        Ok(Self {
            id,
            config,
            dbms_config,
            table,
            session,
        })
    }

    pub fn dbms_config(&self) -> &DbmsConfig {
        &self.dbms_config
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_open()
    }
}

impl Resource for PostgresDataSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn config(&self) -> &ResourceConfig {
        &self.config
    }

    fn close(&mut self) -> Result<()> {
        self.session.close()
    }
}

impl DataSink for PostgresDataSink {
    fn put_dataframe(
        &mut self,
        dataframe: &DataFrame,
        _params: Option<&Params>,
        buffer: bool,
    ) -> Result<()> {
        ensure_unbuffered(buffer, "storing")?;

        let reader = OptionReader::new(&self.config.options, describe(ResourceKind::Sink, &self.id));
        reader.allow_only(TABLE_OPTIONS)?;
        let if_exists = match reader.str("if_exists")? {
            Some(value) => IfExists::parse(value)?,
            None => IfExists::Fail,
        };
        let chunksize = reader.usize("chunksize")?;
        let with_index = if reader.bool("index")?.unwrap_or(false) {
            let label = reader.str("index_label")?.unwrap_or("index");
            Some(dataframe.with_row_index(PlSmallStr::from(label), None)?)
        } else {
            None
        };
        let frame = with_index.as_ref().unwrap_or(dataframe);

        debug!(
            table = %self.table,
            rows = frame.height(),
            options = ?self.config.options,
            "storing dataframe in table"
        );
        let (runtime, connection) = self.session.parts()?;
        let written = runtime.block_on(convert::write_dataframe(
            connection,
            &self.table,
            frame,
            if_exists,
            chunksize,
        ))?;
        debug!(table = %self.table, rows = written, "stored dataframe");
        Ok(())
    }

    fn put_raw(&mut self, _raw: Raw, _params: Option<&Params>, _buffer: bool) -> Result<()> {
        Err(ResourceError::NotSupportedYet(
            "PostgresDataSink does not support raw format/blobs. \
             Use method \"put_dataframe\" for dataframes"
                .to_string(),
        ))
    }
}
