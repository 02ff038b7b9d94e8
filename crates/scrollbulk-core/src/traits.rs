use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Refresh;
use crate::error::Result;

/// Request/response access to a search engine.
///
/// Implementations return the decoded JSON body on success, `Error::Transport`
/// when no usable response arrived, and `Error::Response` when the engine
/// answered with an error envelope.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Runs a search. With `scroll` set, the engine keeps a scroll context
    /// alive for that long and the response carries `_scroll_id`.
    async fn search(&self, index: &str, body: &Value, scroll: Option<Duration>) -> Result<Value>;

    /// Continues a scroll context by token only.
    async fn scroll(&self, token: &str, keep_alive: Duration) -> Result<Value>;

    async fn clear_scroll(&self, token: &str) -> Result<()>;

    /// Submits a newline-delimited action/payload body.
    async fn bulk(&self, index: &str, body: String, refresh: Refresh) -> Result<Value>;

    async fn create_index(&self, index: &str, body: &Value) -> Result<()>;

    async fn delete_index(&self, index: &str) -> Result<()>;
}
