//! Raw event export over HTTP.
//!
//! Issues one `GET /api/2.0/export` per call for a set of event names and an
//! inclusive [`DateWindow`], returning the newline-delimited JSON body
//! untouched. Parsing is left to [`crate::normalizer`].

use std::time::Duration;

use recon_core::error::{ReconError, Result};
use recon_core::settings::Credentials;
use recon_core::window::DateWindow;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use tracing::{debug, info};

/// Path of the raw export endpoint below the regional host.
pub const EXPORT_PATH: &str = "/api/2.0/export";

/// Longest error body carried into [`ReconError::Transport`].
const MAX_ERROR_BODY_CHARS: usize = 512;

/// HTTP client bound to one export host and one set of credentials.
#[derive(Debug, Clone)]
pub struct ExportClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl ExportClient {
    /// Build a client with a bounded per-request `timeout`.
    pub fn new(base_url: impl Into<String>, credentials: Credentials, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn export_url(&self) -> String {
        format!("{}{}", self.base_url, EXPORT_PATH)
    }

    /// Fetch every event named in `event_names` within `window`.
    ///
    /// An empty or whitespace-only body is returned as an empty string; it
    /// means the window holds no events and is not an error.
    pub async fn fetch(&self, event_names: &[String], window: &DateWindow) -> Result<String> {
        let events_json = serde_json::to_string(event_names)
            .map_err(|e| ReconError::Other(e.into()))?;

        debug!(
            url = %self.export_url(),
            window = %window,
            events = %events_json,
            "requesting raw export"
        );

        let response = self
            .http
            .get(self.export_url())
            .query(&[
                ("project_id", self.credentials.project_id.as_str()),
                ("from_date", window.from_date().as_str()),
                ("to_date", window.to_date().as_str()),
                ("event", events_json.as_str()),
            ])
            .header(ACCEPT, "text/plain")
            .header(AUTHORIZATION, format!("Basic {}", self.credentials.api_key))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ReconError::Transport {
                status: status.as_u16(),
                body: truncate(body.trim(), MAX_ERROR_BODY_CHARS),
            });
        }

        if body.trim().is_empty() {
            info!(window = %window, "export returned no events");
            return Ok(String::new());
        }

        info!(window = %window, bytes = body.len(), "export received");
        Ok(body)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn creds() -> Credentials {
        Credentials {
            api_key: "dG9rZW46".to_string(),
            project_id: "4242".to_string(),
        }
    }

    fn window() -> DateWindow {
        let d = |day| NaiveDate::from_ymd_opt(2024, 6, day).unwrap();
        DateWindow::new(d(1), d(7), d(10)).unwrap()
    }

    /// Serve exactly one HTTP response and hand back the raw request head.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&buf).to_string()
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_export_url_strips_trailing_slash() {
        let client =
            ExportClient::new("https://data-eu.mixpanel.com/", creds(), Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            client.export_url(),
            "https://data-eu.mixpanel.com/api/2.0/export"
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc…");
    }

    #[tokio::test]
    async fn test_fetch_sends_window_events_and_auth() {
        let line = r#"{"event":"New Payment Made","properties":{"distinct_id":"u@x.com"}}"#;
        let (base, server) = serve_once("200 OK", line).await;
        let client = ExportClient::new(base, creds(), Duration::from_secs(5)).unwrap();

        let events = vec!["New Payment Made".to_string(), "Refund Granted".to_string()];
        let body = client.fetch(&events, &window()).await.unwrap();
        assert_eq!(body, line);

        let request = server.await.unwrap();
        let request_lower = request.to_lowercase();
        assert!(request.starts_with("GET /api/2.0/export?"));
        assert!(request.contains("project_id=4242"));
        assert!(request.contains("from_date=2024-06-01"));
        assert!(request.contains("to_date=2024-06-07"));
        // ["New Payment Made","Refund Granted"] form-encoded
        assert!(request.contains(
            "event=%5B%22New+Payment+Made%22%2C%22Refund+Granted%22%5D"
        ));
        assert!(request_lower.contains("authorization: basic dg9rzw46"));
        assert!(request_lower.contains("accept: text/plain"));
    }

    #[tokio::test]
    async fn test_fetch_whitespace_body_is_empty_result() {
        let (base, server) = serve_once("200 OK", "\n  \n").await;
        let client = ExportClient::new(base, creds(), Duration::from_secs(5)).unwrap();

        let body = client
            .fetch(&["New Payment Made".to_string()], &window())
            .await
            .unwrap();
        assert!(body.is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_non_success_is_transport_error() {
        let (base, server) = serve_once("401 Unauthorized", "{\"error\":\"bad credentials\"}").await;
        let client = ExportClient::new(base, creds(), Duration::from_secs(5)).unwrap();

        let err = client
            .fetch(&["New Payment Made".to_string()], &window())
            .await
            .unwrap_err();
        match err {
            ReconError::Transport { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("bad credentials"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_server_error_is_transient() {
        let (base, server) = serve_once("503 Service Unavailable", "try later").await;
        let client = ExportClient::new(base, creds(), Duration::from_secs(5)).unwrap();

        let err = client
            .fetch(&["New Payment Made".to_string()], &window())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_http_error() {
        // Bind then drop so the port is (very likely) closed.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            ExportClient::new(format!("http://{}", addr), creds(), Duration::from_secs(2)).unwrap();
        let err = client
            .fetch(&["New Payment Made".to_string()], &window())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::Http(_)));
    }
}
