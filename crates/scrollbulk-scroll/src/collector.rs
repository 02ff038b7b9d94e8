use futures::stream::{self, Stream};
use tracing::{debug, info, warn};

use scrollbulk_core::types::{Query, ResultPage};
use scrollbulk_core::{CancelToken, CollectError, Error, Result};

use crate::cursor::{CursorState, ScrollCursor};
use crate::executor::{Fetched, PageExecutor};

/// Drives a `ScrollCursor` to completion or to a page cap.
///
/// Pages are produced lazily, one fetch per `next_page` call. The collector
/// is single-use: once it returns `None` or an error it stays finished.
pub struct PaginatedCollector {
    executor: PageExecutor,
    cursor: ScrollCursor,
    index: String,
    query: Query,
    max_pages: usize,
    fetched: usize,
    cancel: Option<CancelToken>,
    stopped: bool,
}

impl PaginatedCollector {
    pub fn new(executor: PageExecutor, index: impl Into<String>, query: &Query, page_size: usize, max_pages: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(Error::InvalidArgument("page size must be positive".into()));
        }
        let cursor = ScrollCursor::new(executor.keep_alive());
        Ok(Self {
            executor,
            cursor,
            index: index.into(),
            query: query.with_size(page_size),
            max_pages,
            fetched: 0,
            cancel: None,
            stopped: false,
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn cursor_state(&self) -> &CursorState { self.cursor.state() }

    pub fn pages_fetched(&self) -> usize { self.fetched }

    pub fn page_size(&self) -> usize { self.query.size }

    /// Fetches the next page, or `None` once the cursor is exhausted or the
    /// page cap is reached. An error ends the collection.
    pub async fn next_page(&mut self) -> Option<Result<ResultPage>> {
        if self.stopped || self.cursor.is_exhausted() {
            return None;
        }
        if self.fetched >= self.max_pages {
            self.stopped = true;
            if matches!(self.cursor.state(), CursorState::Active(_)) {
                self.release().await;
            }
            return None;
        }
        match self.fetch().await {
            Ok(Fetched { page, context }) => {
                self.fetched += 1;
                if let Err(e) = self.cursor.advance(page.continuation.clone()) {
                    self.stopped = true;
                    return Some(Err(e));
                }
                if self.cursor.is_exhausted() {
                    // Short page: the engine may still hold the context until keep-alive expiry.
                    if let Some(context) = context {
                        self.clear(&context).await;
                    }
                } else if self.fetched >= self.max_pages {
                    debug!(index = %self.index, max_pages = self.max_pages, "page cap reached with results remaining");
                    self.release().await;
                }
                Some(Ok(page))
            }
            Err(e) => {
                self.stopped = true;
                // Release is not guarded, so it still goes out after a cancel.
                self.release().await;
                Some(Err(e))
            }
        }
    }

    /// Runs the collection to the end. On failure the pages fetched so far
    /// travel inside the error.
    pub async fn collect(&mut self) -> std::result::Result<Vec<ResultPage>, CollectError> {
        let mut pages = Vec::new();
        while let Some(next) = self.next_page().await {
            match next {
                Ok(page) => pages.push(page),
                Err(source) => {
                    warn!(index = %self.index, pages = pages.len(), error = %source, "collection stopped early");
                    return Err(CollectError { pages, source });
                }
            }
        }
        let hits: usize = pages.iter().map(ResultPage::len).sum();
        info!(index = %self.index, pages = pages.len(), hits, "collection finished");
        Ok(pages)
    }

    /// Lazy page stream; each poll issues at most one fetch.
    pub fn into_stream(self) -> impl Stream<Item = Result<ResultPage>> {
        stream::unfold(self, |mut collector| async move {
            let next = collector.next_page().await?;
            Some((next, collector))
        })
    }

    async fn fetch(&self) -> Result<Fetched> {
        let token = self.cursor.next_request()?.map(str::to_owned);
        let Some(cancel) = &self.cancel else {
            return match token.as_deref() {
                None => self.executor.open(&self.index, &self.query).await,
                Some(token) => self.executor.resume(token, self.query.size).await,
            };
        };
        match token {
            None => cancel.guard(self.spawn_open(cancel.clone())).await,
            Some(token) => cancel.guard(self.executor.resume(&token, self.query.size)).await,
        }
    }

    /// Runs the opening search on its own task. If the caller cancels while
    /// it is in flight, the task still sees the response and clears the
    /// context the engine opened, since no token ever reaches the cursor.
    async fn spawn_open(&self, cancel: CancelToken) -> Result<Fetched> {
        let executor = self.executor.clone();
        let index = self.index.clone();
        let query = self.query.clone();
        let task = tokio::spawn(async move {
            let fetched = executor.open(&index, &query).await;
            if cancel.is_cancelled() {
                if let Some(context) = fetched.as_ref().ok().and_then(|f| f.context.as_deref()) {
                    debug!(index = %index, "clearing scroll opened by a cancelled fetch");
                    if let Err(e) = executor.transport().clear_scroll(context).await {
                        warn!(error = %e, "failed to release scroll context");
                    }
                }
            }
            fetched
        });
        task.await.map_err(|e| Error::Transport(format!("scroll open task failed: {e}")))?
    }

    async fn release(&mut self) {
        if let Some(token) = self.cursor.close() {
            self.clear(&token).await;
        }
    }

    async fn clear(&self, token: &str) {
        if let Err(e) = self.executor.transport().clear_scroll(token).await {
            warn!(error = %e, "failed to release scroll context");
        }
    }
}

/// Collects every page of `query` up to `max_pages`.
pub async fn collect_all(
    executor: &PageExecutor,
    index: &str,
    query: &Query,
    page_size: usize,
    max_pages: usize,
) -> std::result::Result<Vec<ResultPage>, CollectError> {
    let mut collector = PaginatedCollector::new(executor.clone(), index, query, page_size, max_pages)
        .map_err(|source| CollectError { pages: Vec::new(), source })?;
    collector.collect().await
}
