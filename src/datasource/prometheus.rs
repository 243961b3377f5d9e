//! Prometheus HTTP API data source

use async_trait::async_trait;
use serde::Deserialize;

use super::{DataSource, DataSourceError, RangeParams};
use crate::config::PrometheusConfig;

pub struct PrometheusSource {
    name: String,
    url: String,
    basic_auth: Option<(String, String)>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    #[serde(default)]
    result: serde_json::Value,
}

impl PrometheusSource {
    pub fn new(config: &PrometheusConfig) -> Result<Self, DataSourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DataSourceError::Config(format!("{}: {}", config.name, e)))?;

        Ok(Self {
            name: config.name.clone(),
            url: config.url.trim_end_matches('/').to_string(),
            basic_auth: config
                .basic_auth
                .as_ref()
                .map(|a| (a.username.clone(), a.password.clone())),
            client,
        })
    }

    async fn get(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value, DataSourceError> {
        let mut request = self
            .client
            .get(format!("{}{}", self.url, path))
            .query(params);
        if let Some((user, pass)) = &self.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request
            .send()
            .await
            .map_err(|e| DataSourceError::Http(e.to_string()))?;
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| DataSourceError::Response(e.to_string()))?;

        Self::into_result(body)
    }

    fn into_result(body: ApiResponse) -> Result<serde_json::Value, DataSourceError> {
        if body.status != "success" {
            return Err(DataSourceError::Query(
                body.error.unwrap_or_else(|| format!("status {}", body.status)),
            ));
        }
        body.data
            .map(|d| d.result)
            .ok_or_else(|| DataSourceError::Response("missing data".to_string()))
    }
}

#[async_trait]
impl DataSource for PrometheusSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "prometheus"
    }

    async fn query(&self, query: &str) -> Result<serde_json::Value, DataSourceError> {
        self.get("/api/v1/query", &[("query", query)]).await
    }

    async fn range(
        &self,
        query: &str,
        params: &RangeParams,
    ) -> Result<serde_json::Value, DataSourceError> {
        let mut query_params = vec![("query", query)];
        if let Some(start) = &params.start {
            query_params.push(("start", start.as_str()));
        }
        if let Some(end) = &params.end {
            query_params.push(("end", end.as_str()));
        }
        if let Some(step) = &params.step {
            query_params.push(("step", step.as_str()));
        }
        self.get("/api/v1/query_range", &query_params).await
    }
}
