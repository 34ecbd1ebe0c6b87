pub mod file;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sql;

/// Tags served by the Postgres backend, with or without the `postgres` feature.
pub const POSTGRES_TYPES: &[&str] = &["dbms.postgres"];
