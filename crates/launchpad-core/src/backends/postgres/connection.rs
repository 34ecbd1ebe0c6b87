// crates/launchpad-core/src/backends/postgres/connection.rs

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::Connection;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info, warn};

use crate::config::DbmsConfig;
use crate::credentials::get_user_pw;
use crate::error::{ResourceError, Result};
use crate::options::OptionReader;

const CONNECT_OPTIONS: &[&str] = &[
    "sslmode",
    "application_name",
    "statement_cache_capacity",
    "connect_timeout",
    "options",
];

/// One open Postgres connection together with the single-threaded runtime
/// that drives it. Owned by exactly one resource.
///
/// Every call blocks the calling thread, so none may be made from a thread
/// that is already driving a tokio runtime; those calls fail with
/// [`ResourceError::AsyncContext`].
pub struct DbSession {
    connection_name: String,
    runtime: Option<Runtime>,
    connection: Option<PgConnection>,
}

impl std::fmt::Debug for DbSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbSession")
            .field("connection_name", &self.connection_name)
            .field("open", &self.connection.is_some())
            .finish()
    }
}

impl DbSession {
    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// The runtime and the live connection, for driving one call to completion.
    pub(crate) fn parts(&mut self) -> Result<(&Runtime, &mut PgConnection)> {
        ensure_blocking_allowed(&self.connection_name)?;
        match (self.runtime.as_ref(), self.connection.as_mut()) {
            (Some(runtime), Some(connection)) => Ok((runtime, connection)),
            _ => Err(ResourceError::Connection {
                connection: self.connection_name.clone(),
                source: "connection already closed".into(),
            }),
        }
    }

    /// Close the connection. Only the first call does any work.
    ///
    /// Inside an async runtime the connection is dropped without the
    /// goodbye message and `AsyncContext` is returned.
    pub fn close(&mut self) -> Result<()> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };
        debug!(connection = %self.connection_name, "closing database connection");
        ensure_blocking_allowed(&self.connection_name)?;
        if let Some(runtime) = self.runtime.as_ref() {
            runtime.block_on(connection.close())?;
        }
        Ok(())
    }
}

impl Drop for DbSession {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(
                connection = %self.connection_name,
                error = %err,
                "failed to close database connection"
            );
        }
        // Dropping a runtime blocks, which panics inside another runtime.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn ensure_blocking_allowed(connection_name: &str) -> Result<()> {
    match Handle::try_current() {
        Ok(_) => Err(ResourceError::AsyncContext {
            connection: connection_name.to_string(),
        }),
        Err(_) => Ok(()),
    }
}

/// Open a connection described by a `[dbms.<name>]` block.
///
/// Credentials come from the environment variables the block names. The
/// service name is used as the database name.
pub fn connect(connection_name: &str, config: &DbmsConfig) -> Result<DbSession> {
    let credentials = get_user_pw(&config.user_var, config.password_var.as_deref())?;

    let reader = OptionReader::new(
        &config.options,
        format!("database connection '{connection_name}'"),
    );
    reader.allow_only(CONNECT_OPTIONS)?;

    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.service_name)
        .username(&credentials.user);
    if let Some(password) = credentials.password.as_deref() {
        options = options.password(password);
    }
    if let Some(mode) = reader.str("sslmode")? {
        let mode = PgSslMode::from_str(mode).map_err(|err| {
            ResourceError::configuration(format!(
                "invalid sslmode '{mode}' for database connection '{connection_name}': {err}"
            ))
        })?;
        options = options.ssl_mode(mode);
    }
    if let Some(name) = reader.str("application_name")? {
        options = options.application_name(name);
    }
    if let Some(capacity) = reader.usize("statement_cache_capacity")? {
        options = options.statement_cache_capacity(capacity);
    }
    if let Some(parameters) = reader.table("options")? {
        options = options.options(parameters.iter().map(|(key, value)| {
            let value = value
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            (key.clone(), value)
        }));
    }
    let timeout = match reader.f64("connect_timeout")? {
        Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        Some(secs) => {
            return Err(ResourceError::configuration(format!(
                "connect_timeout for database connection '{connection_name}' must be a positive number of seconds, got {secs}"
            )))
        }
        None => None,
    };

    info!(
        connection = connection_name,
        host = %config.host,
        port = config.port,
        service_name = %config.service_name,
        "establishing database connection"
    );

    ensure_blocking_allowed(connection_name)?;
    let runtime = Builder::new_current_thread().enable_all().build()?;
    // The timer has to be created inside the runtime it runs on.
    let connected = runtime.block_on(async {
        let connecting = PgConnection::connect_with(&options);
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, connecting).await {
                Ok(result) => result.map_err(|err| connection_error(connection_name, err)),
                Err(elapsed) => Err(connection_error(connection_name, elapsed)),
            },
            None => connecting
                .await
                .map_err(|err| connection_error(connection_name, err)),
        }
    });
    let connection = connected?;

    Ok(DbSession {
        connection_name: connection_name.to_string(),
        runtime: Some(runtime),
        connection: Some(connection),
    })
}

fn connection_error(
    connection_name: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> ResourceError {
    ResourceError::Connection {
        connection: connection_name.to_string(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_is_allowed_on_plain_threads() {
        assert!(ensure_blocking_allowed("warehouse").is_ok());
    }

    #[test]
    fn blocking_is_refused_inside_a_runtime() {
        let runtime = Builder::new_current_thread().build().expect("runtime");
        let err = runtime
            .block_on(async { ensure_blocking_allowed("warehouse") })
            .expect_err("inside block_on");
        assert!(matches!(
            err,
            ResourceError::AsyncContext { ref connection } if connection == "warehouse"
        ));
    }
}
