//! Read-only data sources exposed to scripts
//!
//! Each source is injected into scripts as `datasource.<kind>.<name>`.

pub mod postgres;
pub mod prometheus;

pub use postgres::PostgresSource;
pub use prometheus::PrometheusSource;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DataSourcesConfig;

/// Time window for range queries; values are passed through to the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeParams {
    pub start: Option<String>,
    pub end: Option<String>,
    pub step: Option<String>,
}

#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> &'static str;

    /// Instant query returning rows
    async fn query(&self, query: &str) -> Result<serde_json::Value, DataSourceError>;

    /// Range query returning series
    async fn range(
        &self,
        query: &str,
        params: &RangeParams,
    ) -> Result<serde_json::Value, DataSourceError>;
}

pub fn module_name(kind: &str, name: &str) -> String {
    format!("datasource.{}.{}", kind, name)
}

/// Data sources keyed by module name, read-only after startup
#[derive(Default)]
pub struct DataSourceRegistry {
    sources: BTreeMap<String, Arc<dyn DataSource>>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &DataSourcesConfig) -> Result<Self, DataSourceError> {
        let mut registry = Self::new();
        for cfg in &config.prometheus {
            registry.register(Arc::new(PrometheusSource::new(cfg)?));
        }
        for cfg in &config.postgres {
            registry.register(Arc::new(PostgresSource::new(cfg)?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, source: Arc<dyn DataSource>) {
        let key = module_name(source.kind(), source.name());
        tracing::info!(datasource = %key, "Registered data source");
        self.sources.insert(key, source);
    }

    pub fn get(&self, module_name: &str) -> Option<Arc<dyn DataSource>> {
        self.sources.get(module_name).cloned()
    }

    /// `(module name, source)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn DataSource>)> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Unexpected response: {0}")]
    Response(String),

    #[error("Invalid data source configuration: {0}")]
    Config(String),
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Returns a fixed payload for every query
    pub(crate) struct StaticSource {
        pub(crate) name: String,
        pub(crate) rows: serde_json::Value,
    }

    #[async_trait]
    impl DataSource for StaticSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> &'static str {
            "static"
        }

        async fn query(&self, query: &str) -> Result<serde_json::Value, DataSourceError> {
            if query == "fail" {
                return Err(DataSourceError::Query("bad query".to_string()));
            }
            Ok(self.rows.clone())
        }

        async fn range(
            &self,
            query: &str,
            _params: &RangeParams,
        ) -> Result<serde_json::Value, DataSourceError> {
            self.query(query).await
        }
    }
}
