use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use scrollbulk_core::config::Refresh;
use scrollbulk_core::types::Query;
use scrollbulk_core::{CancelToken, Error, Result, Transport};
use scrollbulk_scroll::{collect_all, CursorState, PageExecutor, PaginatedCollector};
use scrollbulk_transport::MemoryTransport;

fn engine_with(n: usize) -> Arc<MemoryTransport> {
    let engine = Arc::new(MemoryTransport::new());
    engine.insert_many("docs", (0..n).map(|i| (format!("doc-{i:04}"), json!({ "n": i, "kind": if i % 2 == 0 { "even" } else { "odd" } }))));
    engine
}

fn executor(engine: &Arc<MemoryTransport>) -> PageExecutor { PageExecutor::new(engine.clone(), Duration::from_secs(60)) }

fn sizes(pages: &[scrollbulk_core::types::ResultPage]) -> Vec<usize> { pages.iter().map(|p| p.len()).collect() }

#[tokio::test]
async fn five_matches_in_pages_of_two() -> anyhow::Result<()> {
    let engine = engine_with(5);
    let mut collector = PaginatedCollector::new(executor(&engine), "docs", &Query::match_all(10), 2, 10)?;
    let pages = collector.collect().await?;

    assert_eq!(sizes(&pages), vec![2, 2, 1]);
    assert_eq!(collector.cursor_state(), &CursorState::Exhausted);
    assert_eq!(engine.fetch_calls(), 3);
    assert!(pages.iter().all(|p| p.total == 5));
    assert!(pages[2].continuation.is_none());
    assert_eq!(engine.open_scrolls(), 0, "short page releases the engine context");
    Ok(())
}

#[tokio::test]
async fn exact_multiple_ends_with_an_empty_page() -> anyhow::Result<()> {
    let engine = engine_with(4);
    let pages = collect_all(&executor(&engine), "docs", &Query::match_all(10), 2, 10).await?;
    assert_eq!(sizes(&pages), vec![2, 2, 0]);
    assert_eq!(engine.fetch_calls(), 3);
    Ok(())
}

#[tokio::test]
async fn hits_keep_engine_order_across_pages() -> anyhow::Result<()> {
    let engine = engine_with(7);
    let pages = collect_all(&executor(&engine), "docs", &Query::match_all(10), 3, 10).await?;
    let ids: Vec<String> = pages.iter().flat_map(|p| p.hits.iter().map(|h| h.id.clone())).collect();
    let expected: Vec<String> = (0..7).map(|i| format!("doc-{i:04}")).collect();
    assert_eq!(ids, expected);
    Ok(())
}

#[tokio::test]
async fn page_cap_bounds_fetches_and_releases_the_context() -> anyhow::Result<()> {
    let engine = engine_with(100);
    let mut collector = PaginatedCollector::new(executor(&engine), "docs", &Query::match_all(10), 10, 3)?;
    let pages = collector.collect().await?;

    assert_eq!(sizes(&pages), vec![10, 10, 10]);
    assert_eq!(engine.fetch_calls(), 3);
    assert_eq!(collector.pages_fetched(), 3);
    assert_eq!(collector.cursor_state(), &CursorState::Exhausted);
    assert_eq!(engine.open_scrolls(), 0);
    Ok(())
}

#[tokio::test]
async fn zero_page_cap_issues_no_request() -> anyhow::Result<()> {
    let engine = engine_with(5);
    let mut collector = PaginatedCollector::new(executor(&engine), "docs", &Query::match_all(10), 2, 0)?;
    let pages = collector.collect().await?;
    assert!(pages.is_empty());
    assert_eq!(engine.fetch_calls(), 0);
    assert_eq!(collector.cursor_state(), &CursorState::Uninitialized);
    assert!(collector.next_page().await.is_none());
    assert_eq!(collector.cursor_state(), &CursorState::Uninitialized);
    Ok(())
}

#[tokio::test]
async fn zero_page_size_is_rejected_before_any_request() {
    let engine = engine_with(5);
    let err = collect_all(&executor(&engine), "docs", &Query::match_all(10), 0, 5).await.expect_err("page size 0");
    assert!(err.pages.is_empty());
    assert!(matches!(err.source, Error::InvalidArgument(_)));
    assert_eq!(engine.fetch_calls(), 0);
}

#[tokio::test]
async fn failure_on_third_fetch_keeps_earlier_pages() {
    let engine = engine_with(10);
    engine.fail_fetch_call(3);
    let err = collect_all(&executor(&engine), "docs", &Query::match_all(10), 2, 50).await.expect_err("third fetch fails");

    assert_eq!(sizes(&err.pages), vec![2, 2]);
    assert!(matches!(err.source, Error::Transport(_)));
    assert_eq!(engine.fetch_calls(), 3);
    assert_eq!(engine.open_scrolls(), 0, "aborted scroll is cleared");
}

#[tokio::test]
async fn missing_index_surfaces_engine_error() {
    let engine = engine_with(0);
    let err = collect_all(&executor(&engine), "nope", &Query::match_all(10), 2, 5).await.expect_err("no index");
    assert!(err.pages.is_empty());
    assert!(matches!(err.source, Error::Response { status: 404, ref kind, .. } if kind == "index_not_found_exception"));
}

#[tokio::test]
async fn term_query_pages_only_matching_documents() -> anyhow::Result<()> {
    let engine = engine_with(9);
    let query = Query::new(json!({ "query": { "term": { "kind": "even" } } }), 10);
    let pages = collect_all(&executor(&engine), "docs", &query, 2, 10).await?;
    assert_eq!(sizes(&pages), vec![2, 2, 1]);
    assert!(pages.iter().flat_map(|p| &p.hits).all(|h| h.source["kind"] == json!("even")));
    Ok(())
}

#[tokio::test]
async fn stream_fetches_only_what_is_consumed() -> anyhow::Result<()> {
    let engine = engine_with(50);
    let collector = PaginatedCollector::new(executor(&engine), "docs", &Query::match_all(10), 5, 10)?;
    let first: Vec<_> = collector.into_stream().take(2).collect().await;
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|p| p.as_ref().map(|p| p.len()).ok() == Some(5)));
    assert_eq!(engine.fetch_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn cancellation_before_start_issues_no_request() -> anyhow::Result<()> {
    let engine = engine_with(5);
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut collector = PaginatedCollector::new(executor(&engine), "docs", &Query::match_all(10), 2, 10)?.with_cancel(cancel);
    let err = collector.collect().await.expect_err("cancelled");
    assert!(matches!(err.source, Error::Cancelled));
    assert_eq!(engine.fetch_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn cancellation_between_pages_stops_the_stream() -> anyhow::Result<()> {
    let engine = engine_with(20);
    let cancel = CancelToken::new();
    let collector = PaginatedCollector::new(executor(&engine), "docs", &Query::match_all(10), 5, 10)?.with_cancel(cancel.clone());
    let mut pages = Box::pin(collector.into_stream());

    let first = pages.next().await.expect("first page")?;
    assert_eq!(first.len(), 5);
    cancel.cancel();
    assert!(matches!(pages.next().await, Some(Err(Error::Cancelled))));
    assert!(pages.next().await.is_none());
    assert_eq!(engine.fetch_calls(), 1);
    assert_eq!(engine.open_scrolls(), 0, "cancelled scroll is still cleared");
    Ok(())
}

#[tokio::test]
async fn cancellation_abandons_an_in_flight_fetch() -> anyhow::Result<()> {
    let engine = engine_with(5);
    engine.set_latency(Duration::from_secs(30));
    let cancel = CancelToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });
    let mut collector = PaginatedCollector::new(executor(&engine), "docs", &Query::match_all(10), 2, 10)?.with_cancel(cancel);
    let err = collector.collect().await.expect_err("cancelled in flight");
    assert!(matches!(err.source, Error::Cancelled));
    assert!(err.pages.is_empty());
    Ok(())
}

#[tokio::test]
async fn single_search_never_opens_a_scroll() -> anyhow::Result<()> {
    let engine = engine_with(5);
    let page = executor(&engine).fetch_once("docs", &Query::match_all(5)).await?;
    assert_eq!(page.len(), 5);
    assert!(page.continuation.is_none());
    assert_eq!(engine.open_scrolls(), 0);
    Ok(())
}

#[tokio::test]
async fn executor_fetch_and_fetch_next_follow_tokens() -> anyhow::Result<()> {
    let engine = engine_with(3);
    let exec = executor(&engine);
    let first = exec.fetch("docs", &Query::match_all(2)).await?;
    let token = first.continuation.clone().expect("full page has a token");
    let second = exec.fetch_next(&token, 2).await?;
    assert_eq!(second.len(), 1);
    assert!(second.continuation.is_none());
    Ok(())
}

/// Lets the engine answer, then holds the search response back.
struct SlowReply {
    inner: Arc<MemoryTransport>,
    delay: Duration,
}

#[async_trait]
impl Transport for SlowReply {
    async fn search(&self, index: &str, body: &Value, scroll: Option<Duration>) -> Result<Value> {
        let resp = self.inner.search(index, body, scroll).await;
        tokio::time::sleep(self.delay).await;
        resp
    }

    async fn scroll(&self, token: &str, keep_alive: Duration) -> Result<Value> { self.inner.scroll(token, keep_alive).await }

    async fn clear_scroll(&self, token: &str) -> Result<()> { self.inner.clear_scroll(token).await }

    async fn bulk(&self, index: &str, body: String, refresh: Refresh) -> Result<Value> { self.inner.bulk(index, body, refresh).await }

    async fn create_index(&self, index: &str, body: &Value) -> Result<()> { self.inner.create_index(index, body).await }

    async fn delete_index(&self, index: &str) -> Result<()> { self.inner.delete_index(index).await }
}

#[tokio::test]
async fn cancelled_first_fetch_clears_the_context_it_opened() -> anyhow::Result<()> {
    let engine = engine_with(10);
    let slow = Arc::new(SlowReply { inner: engine.clone(), delay: Duration::from_millis(150) });
    let cancel = CancelToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });
    let mut collector = PaginatedCollector::new(PageExecutor::new(slow, Duration::from_secs(60)), "docs", &Query::match_all(10), 2, 10)?
        .with_cancel(cancel);
    let err = collector.collect().await.expect_err("cancelled in flight");
    assert!(matches!(err.source, Error::Cancelled));
    assert_eq!(engine.fetch_calls(), 1);
    assert_eq!(engine.open_scrolls(), 1, "engine opened a context before the cancel");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(engine.open_scrolls(), 0);
    Ok(())
}
