//! HTTP client for the monitoring backend API

use super::{ApiError, BackendApi};
use crate::models::{CheckReport, GraphDef, Host, HostMetricValue, HostParams, HostStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

const API_KEY_HEADER: &str = "X-Api-Key";

/// Configuration for the backend HTTP client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the backend (e.g., "https://api.example-monitoring.io")
    pub endpoint: String,
    /// API key sent with every request
    pub api_key: String,
    /// Request timeout
    pub request_timeout: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.example-monitoring.io".to_string(),
            api_key: String::new(),
            request_timeout: Duration::from_secs(30),
            user_agent: format!("telemetry-agent/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// reqwest-backed implementation of [`BackendApi`]
pub struct HttpApiClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

#[derive(Deserialize)]
struct HostEnvelope {
    host: Host,
}

#[derive(Deserialize)]
struct HostsEnvelope {
    hosts: Vec<Host>,
}

#[derive(Deserialize)]
struct IdEnvelope {
    id: String,
}

#[derive(Serialize)]
struct StatusBody {
    status: HostStatus,
}

#[derive(Serialize)]
struct ReportsBody<'a> {
    reports: &'a [CheckReport],
}

impl HttpApiClient {
    /// Create a new API client
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(&config.endpoint)
            .with_context(|| format!("Invalid API endpoint: {}", config.endpoint))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Invalid API endpoint: {}", config.endpoint);
        }

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key,
        })
    }

    /// Build a request for the endpoint path plus `segments`, each percent-encoded
    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Transport(format!("invalid base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        trace!(%method, %url, "API request");
        Ok(self
            .client
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key))
    }

    /// Send a request and turn non-success statuses into classified errors
    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), body = %body, "API call rejected");
        Err(ApiError::from_status(status.as_u16(), body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl BackendApi for HttpApiClient {
    async fn find_host(&self, id: &str) -> Result<Host, ApiError> {
        let request = self.request(Method::GET, &["api", "v0", "hosts", id])?;
        let envelope: HostEnvelope = self.send_json(request).await?;
        Ok(envelope.host)
    }

    async fn find_hosts(
        &self,
        custom_identifier: &str,
        statuses: &[HostStatus],
    ) -> Result<Vec<Host>, ApiError> {
        let mut query = vec![("customIdentifier", custom_identifier)];
        query.extend(statuses.iter().map(|s| ("status", s.as_str())));

        let request = self.request(Method::GET, &["api", "v0", "hosts"])?.query(&query);
        let envelope: HostsEnvelope = self.send_json(request).await?;
        Ok(envelope.hosts)
    }

    async fn create_host(&self, params: &HostParams) -> Result<String, ApiError> {
        let request = self.request(Method::POST, &["api", "v0", "hosts"])?.json(params);
        let envelope: IdEnvelope = self.send_json(request).await?;
        Ok(envelope.id)
    }

    async fn update_host(&self, id: &str, params: &HostParams) -> Result<(), ApiError> {
        let request = self
            .request(Method::PUT, &["api", "v0", "hosts", id])?
            .json(params);
        self.send(request).await?;
        Ok(())
    }

    async fn update_host_status(&self, id: &str, status: HostStatus) -> Result<(), ApiError> {
        let request = self
            .request(Method::POST, &["api", "v0", "hosts", id, "status"])?
            .json(&StatusBody { status });
        self.send(request).await?;
        Ok(())
    }

    async fn retire_host(&self, id: &str) -> Result<(), ApiError> {
        let request = self
            .request(Method::POST, &["api", "v0", "hosts", id, "retire"])?
            .json(&serde_json::json!({}));
        self.send(request).await?;
        Ok(())
    }

    async fn post_metric_values(&self, values: &[HostMetricValue]) -> Result<(), ApiError> {
        let request = self.request(Method::POST, &["api", "v0", "tsdb"])?.json(values);
        self.send(request).await?;
        Ok(())
    }

    async fn post_graph_defs(&self, defs: &[GraphDef]) -> Result<(), ApiError> {
        let request = self
            .request(Method::POST, &["api", "v0", "graph-defs", "create"])?
            .json(defs);
        self.send(request).await?;
        Ok(())
    }

    async fn post_check_reports(&self, reports: &[CheckReport]) -> Result<(), ApiError> {
        let request = self
            .request(Method::POST, &["api", "v0", "monitoring", "checks", "report"])?
            .json(&ReportsBody { reports });
        self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::Server) -> HttpApiClient {
        HttpApiClient::new(ClientConfig {
            endpoint: server.url(),
            api_key: "secret".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.user_agent.starts_with("telemetry-agent/"));
    }

    #[test]
    fn test_rejects_non_base_endpoint() {
        let result = HttpApiClient::new(ClientConfig {
            endpoint: "mailto:ops@backend.test".to_string(),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_endpoint_path_prefix_is_kept() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/monitoring/api/v0/hosts/abcde")
            .with_status(200)
            .with_body(r#"{"host":{"id":"abcde"}}"#)
            .expect(2)
            .create_async()
            .await;

        for endpoint in [
            format!("{}/monitoring", server.url()),
            format!("{}/monitoring/", server.url()),
        ] {
            let client = HttpApiClient::new(ClientConfig {
                endpoint,
                ..Default::default()
            })
            .unwrap();
            client.find_host("abcde").await.unwrap();
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_host_id_is_percent_encoded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v0/hosts/web%2F1%3Fx%20y/status")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        client_for(&server)
            .update_host_status("web/1?x y", HostStatus::Standby)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_find_host_sends_api_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v0/hosts/abcde")
            .match_header("x-api-key", "secret")
            .with_status(200)
            .with_body(r#"{"host":{"id":"abcde","name":"web-1","status":"working"}}"#)
            .create_async()
            .await;

        let host = client_for(&server).find_host("abcde").await.unwrap();
        assert_eq!(host.id, "abcde");
        assert_eq!(host.status, Some(HostStatus::Working));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_find_hosts_filters_by_custom_identifier() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v0/hosts")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("customIdentifier".into(), "task-123".into()),
                Matcher::UrlEncoded("status".into(), "working".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"hosts":[{"id":"h1"},{"id":"h2"}]}"#)
            .create_async()
            .await;

        let hosts = client_for(&server)
            .find_hosts("task-123", &HostStatus::ACTIVE)
            .await
            .unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].id, "h1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_host_returns_id() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v0/hosts")
            .match_body(Matcher::PartialJson(serde_json::json!({"name": "web-1"})))
            .with_status(200)
            .with_body(r#"{"id":"abcde"}"#)
            .create_async()
            .await;

        let params = HostParams {
            name: "web-1".to_string(),
            ..Default::default()
        };
        let id = client_for(&server).create_host(&params).await.unwrap();
        assert_eq!(id, "abcde");
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v0/tsdb")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let err = client_for(&server)
            .post_metric_values(&[])
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_error_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v0/hosts/abcde/retire")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let err = client_for(&server).retire_host("abcde").await.unwrap_err();
        assert!(matches!(err, ApiError::Client { status: 403, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_check_reports_are_wrapped() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v0/monitoring/checks/report")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "reports": [{"name": "disk", "status": "OK"}]
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let report = CheckReport {
            source: None,
            name: "disk".to_string(),
            status: crate::models::CheckStatus::Ok,
            message: "fine".to_string(),
            occurred_at: 1,
            notification_interval: None,
            max_check_attempts: None,
        };
        client_for(&server)
            .post_check_reports(&[report])
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let client = HttpApiClient::new(ClientConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();

        let err = client.find_host("abcde").await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert!(err.is_retryable());
    }
}
