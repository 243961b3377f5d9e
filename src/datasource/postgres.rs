//! Postgres data source
//!
//! Queries run as written; each result row comes back as a JSON object keyed
//! by column name.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use super::{DataSource, DataSourceError, RangeParams};
use crate::config::PostgresSourceConfig;
use crate::storage::sql::postgres_options;

const MAX_CONNECTIONS: u32 = 5;

pub struct PostgresSource {
    name: String,
    pool: PgPool,
}

impl PostgresSource {
    /// Connections are opened on first use.
    pub fn new(config: &PostgresSourceConfig) -> Result<Self, DataSourceError> {
        let options = postgres_options(&config.connection)
            .map_err(|e| DataSourceError::Config(format!("{}: {}", config.name, e)))?;
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(config.connection.timeout)
            .connect_lazy_with(options);

        Ok(Self {
            name: config.name.clone(),
            pool,
        })
    }
}

/// Wrap a query so every row is returned as one JSON value
fn rows_as_json(query: &str) -> String {
    let query = query.trim().trim_end_matches(';');
    format!("SELECT row_to_json(q) FROM ({}) AS q", query)
}

#[async_trait]
impl DataSource for PostgresSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn query(&self, query: &str) -> Result<serde_json::Value, DataSourceError> {
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(&rows_as_json(query))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DataSourceError::Query(e.to_string()))?;
        Ok(serde_json::Value::Array(rows))
    }

    async fn range(
        &self,
        _query: &str,
        _params: &RangeParams,
    ) -> Result<serde_json::Value, DataSourceError> {
        Err(DataSourceError::Query(
            "range queries are not supported by postgres, use query".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PostgresConnection;
    use std::time::Duration;

    fn config() -> PostgresSourceConfig {
        PostgresSourceConfig {
            name: "reports".to_string(),
            connection: PostgresConnection {
                host: "localhost".to_string(),
                port: 5432,
                username: "tripwire".to_string(),
                password: String::new(),
                database: "reports".to_string(),
                ssl_mode: None,
                ssl_cert_path: None,
                timeout: Duration::from_secs(1),
            },
        }
    }

    #[test]
    fn test_rows_as_json() {
        assert_eq!(
            rows_as_json(" SELECT id, state FROM jobs WHERE state = 'failed'; "),
            "SELECT row_to_json(q) FROM (SELECT id, state FROM jobs WHERE state = 'failed') AS q"
        );
    }

    #[tokio::test]
    async fn test_range_is_rejected() {
        let source = PostgresSource::new(&config()).unwrap();
        assert_eq!(source.kind(), "postgres");
        let err = source
            .range("SELECT 1", &RangeParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DataSourceError::Query(msg) if msg.contains("not supported")));
    }

    #[tokio::test]
    async fn test_bad_ssl_mode_is_config_error() {
        let mut config = config();
        config.connection.ssl_mode = Some("sometimes".to_string());
        assert!(matches!(
            PostgresSource::new(&config),
            Err(DataSourceError::Config(msg)) if msg.starts_with("reports")
        ));
    }
}
