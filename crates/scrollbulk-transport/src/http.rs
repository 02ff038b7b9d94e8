//! Elasticsearch-compatible REST transport over reqwest.
//!
//! One pooled `reqwest::Client` is built from `TransportSettings` at startup.
//! Configured addresses are used round-robin, one per request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Value};
use tracing::debug;

use scrollbulk_core::config::{Refresh, TransportSettings};
use scrollbulk_core::{Error, Result, Transport};

pub struct HttpTransport {
    client: Client,
    addresses: Vec<String>,
    next: AtomicUsize,
    username: Option<String>,
    password: Option<String>,
}

impl HttpTransport {
    pub fn new(settings: &TransportSettings) -> Result<Self> {
        if settings.addresses.is_empty() {
            return Err(Error::InvalidConfig("transport.addresses must not be empty".into()));
        }
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .connect_timeout(settings.connect_timeout())
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        let addresses = settings.addresses.iter().map(|a| a.trim_end_matches('/').to_string()).collect();
        Ok(Self {
            client,
            addresses,
            next: AtomicUsize::new(0),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.addresses.len();
        format!("{}/{}", self.addresses[i], path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.client.request(method, self.url(path));
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_deref()),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Value> {
        let resp = req.send().await.map_err(|e| Error::Transport(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response body: {e}")))?;
        debug!(status = status.as_u16(), bytes = text.len(), "engine response");
        if !status.is_success() {
            return Err(error_envelope(status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| Error::Decode(format!("response body is not JSON: {e}")))
    }
}

/// Maps an error status plus body to an `Error`. Only the engine's
/// `{"error":..}` envelope becomes `Error::Response`; any other error status
/// (proxies, gateways, load balancers) is a transport failure.
pub(crate) fn error_envelope(status: u16, body: &str) -> Error {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let (kind, reason) = match parsed.as_ref().and_then(|v| v.get("error")) {
        Some(Value::Object(err)) => (
            err.get("type").and_then(Value::as_str).unwrap_or("unknown").to_string(),
            err.get("reason").and_then(Value::as_str).unwrap_or_default().to_string(),
        ),
        Some(Value::String(reason)) => ("error".to_string(), reason.clone()),
        _ => {
            let snippet: String = body.chars().take(512).collect();
            return Error::Transport(format!("HTTP {status}: {snippet}"));
        }
    };
    Error::Response { status, kind, reason }
}

fn keep_alive_param(d: Duration) -> String { format!("{}s", d.as_secs().max(1)) }

#[async_trait]
impl Transport for HttpTransport {
    async fn search(&self, index: &str, body: &Value, scroll: Option<Duration>) -> Result<Value> {
        let mut req = self
            .request(Method::POST, &format!("{index}/_search"))
            .query(&[("track_total_hits", "true")])
            .json(body);
        if let Some(keep_alive) = scroll {
            req = req.query(&[("scroll", keep_alive_param(keep_alive))]);
        }
        self.send(req).await
    }

    async fn scroll(&self, token: &str, keep_alive: Duration) -> Result<Value> {
        let body = json!({ "scroll": keep_alive_param(keep_alive), "scroll_id": token });
        self.send(self.request(Method::POST, "_search/scroll").json(&body)).await
    }

    async fn clear_scroll(&self, token: &str) -> Result<()> {
        let body = json!({ "scroll_id": token });
        self.send(self.request(Method::DELETE, "_search/scroll").json(&body)).await.map(|_| ())
    }

    async fn bulk(&self, index: &str, body: String, refresh: Refresh) -> Result<Value> {
        let req = self
            .request(Method::POST, &format!("{index}/_bulk"))
            .query(&[("refresh", refresh.as_param())])
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        self.send(req).await
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<()> {
        self.send(self.request(Method::PUT, index).json(body)).await.map(|_| ())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, index)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_reads_type_and_reason() {
        let body = r#"{"error":{"type":"index_not_found_exception","reason":"no such index [docs]"},"status":404}"#;
        match error_envelope(404, body) {
            Error::Response { status, kind, reason } => {
                assert_eq!(status, 404);
                assert_eq!(kind, "index_not_found_exception");
                assert_eq!(reason, "no such index [docs]");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_without_envelope_is_a_transport_error() {
        match error_envelope(502, "Bad Gateway") {
            Error::Transport(msg) => assert_eq!(msg, "HTTP 502: Bad Gateway"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(error_envelope(503, r#"{"message":"upstream down"}"#), Error::Transport(_)));
        assert!(matches!(error_envelope(500, r#"{"error":"shard failure"}"#), Error::Response { status: 500, .. }));
    }

    #[test]
    fn addresses_rotate_per_request() {
        let settings = TransportSettings {
            addresses: vec!["http://a:9200/".into(), "http://b:9200".into()],
            ..TransportSettings::default()
        };
        let transport = HttpTransport::new(&settings).expect("client");
        assert_eq!(transport.url("_bulk"), "http://a:9200/_bulk");
        assert_eq!(transport.url("_bulk"), "http://b:9200/_bulk");
        assert_eq!(transport.url("_bulk"), "http://a:9200/_bulk");
    }

    #[test]
    fn keep_alive_is_whole_seconds() {
        assert_eq!(keep_alive_param(Duration::from_secs(60)), "60s");
        assert_eq!(keep_alive_param(Duration::from_millis(10)), "1s");
    }
}
