//! PostgreSQL client implementation
//!
//! Owns the connection pool shared by the source reader and the checkpoint
//! store.

use crate::config::schema::SourceConfig;
use crate::domain::{Result, SluiceError};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use postgres_native_tls::MakeTlsConnector;
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::NoTls;

/// Pooled PostgreSQL client
pub struct PostgresClient {
    pool: Pool,
    statement_timeout_seconds: u64,
    safe_connection_string: String,
}

impl PostgresClient {
    /// Create a new PostgreSQL client
    ///
    /// Connections are opened lazily; call [`Self::test_connection`] to fail
    /// fast on bad credentials.
    ///
    /// # Errors
    ///
    /// Returns [`SluiceError::Configuration`] for an unparsable connection
    /// string or ssl mode, and [`SluiceError::Connection`] when the pool or the
    /// TLS connector cannot be built.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let connection_string = config.connection_string.expose_secret().as_ref();
        let mut pg_config: tokio_postgres::Config = connection_string.parse().map_err(|e| {
            SluiceError::Configuration(format!("Invalid PostgreSQL connection string: {}", e))
        })?;
        pg_config.connect_timeout(Duration::from_secs(config.connection_timeout_seconds));

        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let manager = match config.ssl_mode.as_str() {
            "disable" => {
                pg_config.ssl_mode(SslMode::Disable);
                Manager::from_config(pg_config, NoTls, manager_config)
            }
            mode @ ("prefer" | "require") => {
                pg_config.ssl_mode(if mode == "require" {
                    SslMode::Require
                } else {
                    SslMode::Prefer
                });
                let connector = native_tls::TlsConnector::builder().build().map_err(|e| {
                    SluiceError::Connection(format!("Failed to build TLS connector: {}", e))
                })?;
                Manager::from_config(pg_config, MakeTlsConnector::new(connector), manager_config)
            }
            other => {
                return Err(SluiceError::Configuration(format!(
                    "Unsupported source.ssl_mode '{other}'"
                )))
            }
        };

        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .recycle_timeout(Some(timeout))
            .runtime(deadpool_postgres::Runtime::Tokio1)
            .build()
            .map_err(|e| {
                SluiceError::Connection(format!("Failed to create connection pool: {}", e))
            })?;

        Ok(Self {
            pool,
            statement_timeout_seconds: config.statement_timeout_seconds,
            safe_connection_string: redact_connection_string(connection_string),
        })
    }

    /// Test the connection to PostgreSQL
    pub async fn test_connection(&self) -> Result<()> {
        let client = self.get_connection().await?;

        client.simple_query("SELECT 1").await.map_err(|e| {
            SluiceError::Connection(format!("PostgreSQL connection test failed: {}", e))
        })?;

        tracing::info!(
            source = %self.safe_connection_string,
            "PostgreSQL connection test successful"
        );
        Ok(())
    }

    /// Get a connection from the pool
    ///
    /// # Errors
    ///
    /// Returns [`SluiceError::Connection`] if a connection cannot be obtained.
    pub async fn get_connection(&self) -> Result<Object> {
        self.pool.get().await.map_err(|e| {
            SluiceError::Connection(format!("Failed to get connection from pool: {}", e))
        })
    }

    /// `SET LOCAL statement_timeout` for the current transaction, if configured
    pub(crate) fn statement_timeout_sql(&self) -> Option<String> {
        (self.statement_timeout_seconds > 0).then(|| {
            format!(
                "SET LOCAL statement_timeout = {}",
                self.statement_timeout_seconds * 1000
            )
        })
    }

    /// Connection string without credentials
    pub fn connection_string_safe(&self) -> &str {
        &self.safe_connection_string
    }

    /// Get the pool statistics
    pub fn pool_status(&self) -> deadpool_postgres::Status {
        self.pool.status()
    }
}

fn redact_connection_string(connection_string: &str) -> String {
    connection_string
        .rsplit_once('@')
        .map(|(_, host)| format!("postgresql://***@{}", host))
        .unwrap_or_else(|| "postgresql://***".to_string())
}
