//! Status document sources

use async_trait::async_trait;
use rigkeeper_common::{parse_status, StatusDocument, StatusEndpoint};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = "Mozilla/5.0";

/// Why a poll produced no document
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("status request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("status endpoint answered {0}")]
    Status(reqwest::StatusCode),

    #[error("status document is empty")]
    Empty,

    #[error("status document is malformed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Something that can be asked for the worker's current status
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self) -> Result<StatusDocument, TelemetryError>;
}

/// Builds the status source for a validated endpoint
pub trait SourceFactory: Send + Sync {
    fn connect(&self, endpoint: &StatusEndpoint) -> Result<Arc<dyn StatusSource>, TelemetryError>;
}

/// Makes [`HttpStatusSource`]s with a fixed request timeout
#[derive(Debug, Clone, Copy)]
pub struct HttpSourceFactory {
    pub timeout: Duration,
}

impl SourceFactory for HttpSourceFactory {
    fn connect(&self, endpoint: &StatusEndpoint) -> Result<Arc<dyn StatusSource>, TelemetryError> {
        Ok(Arc::new(HttpStatusSource::new(endpoint, self.timeout)?))
    }
}

/// Status endpoint over HTTP
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    client: reqwest::Client,
    uri: String,
}

impl HttpStatusSource {
    pub fn new(endpoint: &StatusEndpoint, timeout: Duration) -> Result<Self, TelemetryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            uri: endpoint.uri.clone(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self) -> Result<StatusDocument, TelemetryError> {
        let response = self.client.get(&self.uri).send().await?;
        if !response.status().is_success() {
            return Err(TelemetryError::Status(response.status()));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(TelemetryError::Empty);
        }
        Ok(parse_status(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigkeeper_common::resolve_endpoint;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response
    async fn serve_once(status: &'static str, body: &'static str) -> StatusEndpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        resolve_endpoint(&addr.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_parses_document() {
        let endpoint = serve_once("200 OK", r#"{"AcceptedShares": 3, "Miners": []}"#).await;
        let source = HttpStatusSource::new(&endpoint, Duration::from_secs(5)).unwrap();

        let doc = source.fetch().await.unwrap();
        assert_eq!(doc.accepted_shares, Some(3.0));
    }

    #[tokio::test]
    async fn test_fetch_reports_http_errors() {
        let endpoint = serve_once("503 Service Unavailable", "").await;
        let source = HttpStatusSource::new(&endpoint, Duration::from_secs(5)).unwrap();
        assert!(matches!(source.fetch().await, Err(TelemetryError::Status(_))));

        let endpoint = serve_once("200 OK", "not json").await;
        let source = HttpStatusSource::new(&endpoint, Duration::from_secs(5)).unwrap();
        assert!(matches!(source.fetch().await, Err(TelemetryError::Decode(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = resolve_endpoint(&addr.to_string()).unwrap();
        let source = HttpStatusSource::new(&endpoint, Duration::from_secs(2)).unwrap();
        assert!(matches!(source.fetch().await, Err(TelemetryError::Request(_))));
    }
}
