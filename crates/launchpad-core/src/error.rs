// crates/launchpad-core/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{resource} does not support {method}. Use method \"{use_instead}\" instead")]
    UnsupportedOperation {
        resource: String,
        method: &'static str,
        use_instead: &'static str,
    },

    #[error("{resource} expects a {expected} payload")]
    InvalidPayload {
        resource: String,
        expected: &'static str,
    },

    #[error("Not supported yet: {0}")]
    NotSupportedYet(String),

    #[error("Environment variable {var} is not set")]
    MissingCredential { var: String },

    #[error("Could not connect to database connection {connection}: {source}")]
    Connection {
        connection: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("database connection {connection} blocks the calling thread and cannot be used from inside an async runtime (move the call to a blocking thread, e.g. tokio::task::spawn_blocking)")]
    AsyncContext { connection: String },

    #[error("{backend} backend is not available in this build (enable the `{feature}` feature)")]
    DependencyUnavailable {
        backend: &'static str,
        feature: &'static str,
    },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[cfg(feature = "postgres")]
    #[error("Database query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("TOML configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResourceError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        ResourceError::Configuration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ResourceError>;
