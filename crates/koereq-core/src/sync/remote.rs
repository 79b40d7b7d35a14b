//! Remote request service client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::SyncConfig;
use crate::models::MedicalRequest;

/// Why a single submission failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("rejected by remote: {0}")]
    Rejected(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("submission timed out")]
    Timeout,
}

impl SubmitError {
    /// Failures that say nothing about the record itself and would repeat
    /// for every other record in the batch. Only bad credentials qualify;
    /// a 403 may be specific to one record and is a rejection.
    pub fn is_batch_level(&self) -> bool {
        matches!(self, SubmitError::Unauthorized(_))
    }
}

/// Submits one record to the remote request service.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Submit a request. `Ok` means the remote acknowledged it.
    async fn submit(&self, request: &MedicalRequest) -> Result<(), SubmitError>;
}

/// JSON-over-HTTP client: `POST {base_url}/requests`.
pub struct HttpRemoteClient {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpRemoteClient {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
    ) -> Result<Self, SubmitError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SubmitError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    /// Build from config. `None` when no base URL is configured.
    pub fn from_config(config: &SyncConfig) -> Option<Result<Self, SubmitError>> {
        config
            .remote_base_url
            .as_ref()
            .map(|url| Self::new(url.clone(), config.auth_token.clone()))
    }

    fn endpoint(&self) -> String {
        format!("{}/requests", self.base_url)
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn submit(&self, request: &MedicalRequest) -> Result<(), SubmitError> {
        let mut builder = self
            .client
            .post(self.endpoint())
            // The same revision may be delivered more than once.
            .header("Idempotency-Key", format!("{}:{}", request.id, request.revision))
            .json(request);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SubmitError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, body))
    }
}

/// Map a non-success HTTP status to a submission error.
///
/// 401 is batch-level. 403 and other 4xx reject only the record sent.
fn classify_failure(status: StatusCode, body: String) -> SubmitError {
    let reason = if body.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), body)
    };

    match status {
        StatusCode::UNAUTHORIZED => SubmitError::Unauthorized(reason),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => SubmitError::Network(reason),
        s if s.is_client_error() => SubmitError::Rejected(reason),
        _ => SubmitError::Network(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMedicalRequest;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one HTTP exchange with a canned status; returns the raw request.
    async fn serve_once(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                if request_complete(&buf) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status_line
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&buf).to_string()
        });

        (base_url, task)
    }

    fn request_complete(buf: &[u8]) -> bool {
        let text = String::from_utf8_lossy(buf);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        buf.len() >= header_end + 4 + content_length
    }

    fn make_request() -> MedicalRequest {
        NewMedicalRequest::new("Taro", "fever").into_request().unwrap()
    }

    #[tokio::test]
    async fn test_submit_success_posts_json() {
        let (base_url, server) = serve_once("201 Created").await;
        let client =
            HttpRemoteClient::new(format!("{}/", base_url), Some("secret".into())).unwrap();
        let request = make_request();

        client.submit(&request).await.unwrap();

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /requests HTTP/1.1"));
        assert!(raw.to_lowercase().contains("authorization: bearer secret"));
        assert!(raw.contains(&format!("{}:{}", request.id, request.revision)));
        assert!(raw.contains("\"patientName\":\"Taro\""));
    }

    #[tokio::test]
    async fn test_unprocessable_is_rejection() {
        let (base_url, server) = serve_once("422 Unprocessable Entity").await;
        let client = HttpRemoteClient::new(base_url, None).unwrap();

        let err = client.submit(&make_request()).await.unwrap_err();
        server.await.unwrap();
        assert!(matches!(err, SubmitError::Rejected(_)));
        assert!(!err.is_batch_level());
    }

    #[tokio::test]
    async fn test_forbidden_is_record_rejection() {
        let (base_url, server) = serve_once("403 Forbidden").await;
        let client = HttpRemoteClient::new(base_url, Some("secret".into())).unwrap();

        let err = client.submit(&make_request()).await.unwrap_err();
        server.await.unwrap();
        assert!(matches!(err, SubmitError::Rejected(_)));
        assert!(!err.is_batch_level());
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpRemoteClient::new(format!("http://{}", addr), None).unwrap();
        let err = client.submit(&make_request()).await.unwrap_err();
        assert!(matches!(err, SubmitError::Network(_)));
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, String::new()),
            SubmitError::Unauthorized(_)
        ));
        assert!(classify_failure(StatusCode::UNAUTHORIZED, String::new()).is_batch_level());
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, "not your patient".into()),
            SubmitError::Rejected(reason) if reason == "HTTP 403: not your patient"
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, "missing symptoms".into()),
            SubmitError::Rejected(reason) if reason == "HTTP 400: missing symptoms"
        ));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, String::new()),
            SubmitError::Network(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_GATEWAY, String::new()),
            SubmitError::Network(_)
        ));
    }

    #[test]
    fn test_from_config() {
        assert!(HttpRemoteClient::from_config(&SyncConfig::default()).is_none());

        let config = SyncConfig {
            remote_base_url: Some("https://api.example.org/v1/".into()),
            ..Default::default()
        };
        let client = HttpRemoteClient::from_config(&config).unwrap().unwrap();
        assert_eq!(client.endpoint(), "https://api.example.org/v1/requests");
    }
}
