//! scrollbulk-client
//!
//! `SearchClient` ties the read and write paths to one shared transport and
//! the loaded `Settings`.

use std::sync::Arc;

use futures::Stream;
use serde_json::Value;
use tracing::info;

use scrollbulk_bulk::BulkOptions;
use scrollbulk_core::config::Settings;
use scrollbulk_core::types::{BulkReport, DocId, MutationOp, Query, ResultPage};
use scrollbulk_core::{CancelToken, CollectError, Result, Transport};
use scrollbulk_scroll::{PageExecutor, PaginatedCollector};
use scrollbulk_transport::transport_from_settings;

pub struct SearchClient {
    transport: Arc<dyn Transport>,
    settings: Settings,
    cancel: Option<CancelToken>,
}

impl SearchClient {
    pub fn new(transport: Arc<dyn Transport>, settings: Settings) -> Self { Self { transport, settings, cancel: None } }

    /// Validates `settings` and builds the process transport from them.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let transport = transport_from_settings(&settings.transport)?;
        Ok(Self::new(transport, settings))
    }

    /// Every read and write issued through this client observes `cancel`.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn settings(&self) -> &Settings { &self.settings }

    pub fn transport(&self) -> &Arc<dyn Transport> { &self.transport }

    fn executor(&self) -> PageExecutor { PageExecutor::new(self.transport.clone(), self.settings.scroll.keep_alive()) }

    fn collector(&self, index: &str, query: &Query, page_size: usize, max_pages: usize) -> Result<PaginatedCollector> {
        let collector = PaginatedCollector::new(self.executor(), index, query, page_size, max_pages)?;
        Ok(match &self.cancel {
            Some(cancel) => collector.with_cancel(cancel.clone()),
            None => collector,
        })
    }

    /// Scrolls `query` page by page until the cursor is exhausted or
    /// `max_pages` pages have been fetched.
    pub async fn collect_all(
        &self,
        index: &str,
        query: &Query,
        page_size: usize,
        max_pages: usize,
    ) -> std::result::Result<Vec<ResultPage>, CollectError> {
        let mut collector = self
            .collector(index, query, page_size, max_pages)
            .map_err(|source| CollectError { pages: Vec::new(), source })?;
        collector.collect().await
    }

    /// `collect_all` with the configured page size and cap.
    pub async fn scan(&self, index: &str, query: &Query) -> std::result::Result<Vec<ResultPage>, CollectError> {
        let scroll = &self.settings.scroll;
        self.collect_all(index, query, scroll.page_size, scroll.max_pages).await
    }

    /// Lazy version of `collect_all`.
    pub fn pages(&self, index: &str, query: &Query, page_size: usize, max_pages: usize) -> Result<impl Stream<Item = Result<ResultPage>>> {
        Ok(self.collector(index, query, page_size, max_pages)?.into_stream())
    }

    /// One page without a scroll context.
    pub async fn search(&self, index: &str, query: &Query) -> Result<ResultPage> {
        let executor = self.executor();
        let request = executor.fetch_once(index, query);
        match &self.cancel {
            Some(cancel) => cancel.guard(request).await,
            None => request.await,
        }
    }

    pub async fn bulk_write(&self, index: &str, ops: Vec<MutationOp>, chunk_size: usize) -> Result<BulkReport> {
        let options = BulkOptions::writes(&self.settings.bulk).with_chunk_size(chunk_size);
        scrollbulk_bulk::bulk_write(self.transport.clone(), index, ops, &options, self.cancel.as_ref()).await
    }

    pub async fn delete_by_ids(&self, index: &str, ids: Vec<DocId>, chunk_size: usize) -> Result<BulkReport> {
        let options = BulkOptions::deletes(&self.settings.bulk).with_chunk_size(chunk_size);
        scrollbulk_bulk::delete_by_ids(self.transport.clone(), index, ids, &options, self.cancel.as_ref()).await
    }

    /// Creates `index`; `body` carries optional settings and mappings.
    pub async fn create_index(&self, index: &str, body: &Value) -> Result<()> {
        self.transport.create_index(index, body).await?;
        info!(index, "index created");
        Ok(())
    }

    pub async fn delete_index(&self, index: &str) -> Result<()> {
        self.transport.delete_index(index).await?;
        info!(index, "index deleted");
        Ok(())
    }
}
