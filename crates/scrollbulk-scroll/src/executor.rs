use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use scrollbulk_core::types::{Hit, Query, ResultPage};
use scrollbulk_core::{Error, Result, Transport};

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: HitsEnvelope,
}

#[derive(Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    total: Option<Total>,
    #[serde(default)]
    hits: Vec<RawHit>,
}

// 7.x reports `{"value": n, "relation": ..}`, older engines a bare number.
#[derive(Deserialize)]
#[serde(untagged)]
enum Total {
    Count(u64),
    Object { value: u64 },
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_index", default)]
    index: String,
    #[serde(rename = "_score")]
    score: Option<f32>,
    #[serde(rename = "_source", default)]
    source: Value,
}

/// A normalized page plus the engine's scroll context id, which may exist
/// even when the page carries no continuation.
pub(crate) struct Fetched {
    pub page: ResultPage,
    pub context: Option<String>,
}

/// Issues single bounded search requests and normalizes their responses.
#[derive(Clone)]
pub struct PageExecutor {
    transport: Arc<dyn Transport>,
    keep_alive: Duration,
}

impl PageExecutor {
    pub fn new(transport: Arc<dyn Transport>, keep_alive: Duration) -> Self { Self { transport, keep_alive } }

    pub fn keep_alive(&self) -> Duration { self.keep_alive }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> { &self.transport }

    /// First page of a scrolled query. The page carries a continuation token
    /// only when it came back full.
    pub async fn fetch(&self, index: &str, query: &Query) -> Result<ResultPage> {
        Ok(self.open(index, query).await?.page)
    }

    /// Next page of an open scroll, addressed by token alone.
    pub async fn fetch_next(&self, token: &str, page_size: usize) -> Result<ResultPage> {
        Ok(self.resume(token, page_size).await?.page)
    }

    /// One bounded search without a scroll context; never yields a token.
    pub async fn fetch_once(&self, index: &str, query: &Query) -> Result<ResultPage> {
        let body = query.request_body()?;
        let raw = self.transport.search(index, &body, None).await?;
        let mut fetched = normalize(raw, query.size)?;
        fetched.page.continuation = None;
        Ok(fetched.page)
    }

    pub(crate) async fn open(&self, index: &str, query: &Query) -> Result<Fetched> {
        let body = query.request_body()?;
        let raw = self.transport.search(index, &body, Some(self.keep_alive)).await?;
        let fetched = normalize(raw, query.size)?;
        debug!(index, hits = fetched.page.len(), total = fetched.page.total, more = fetched.page.continuation.is_some(), "first page");
        Ok(fetched)
    }

    pub(crate) async fn resume(&self, token: &str, page_size: usize) -> Result<Fetched> {
        if page_size == 0 {
            return Err(Error::InvalidArgument("page size must be positive".into()));
        }
        let raw = self.transport.scroll(token, self.keep_alive).await?;
        let fetched = normalize(raw, page_size)?;
        debug!(hits = fetched.page.len(), more = fetched.page.continuation.is_some(), "continuation page");
        Ok(fetched)
    }
}

fn normalize(raw: Value, page_size: usize) -> Result<Fetched> {
    let resp: SearchResponse = serde_json::from_value(raw)?;
    let hits: Vec<Hit> = resp
        .hits
        .hits
        .into_iter()
        .map(|h| Hit { id: h.id, score: h.score.unwrap_or(0.0), index: h.index, source: h.source })
        .collect();
    if hits.len() > page_size {
        return Err(Error::Decode(format!("engine returned {} hits for a page size of {page_size}", hits.len())));
    }
    let total = match resp.hits.total {
        Some(Total::Count(n) | Total::Object { value: n }) => n,
        None => hits.len() as u64,
    };
    let continuation = if hits.len() == page_size { resp.scroll_id.clone() } else { None };
    Ok(Fetched { page: ResultPage { hits, total, continuation }, context: resp.scroll_id })
}
