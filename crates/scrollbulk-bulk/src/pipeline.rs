use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use scrollbulk_core::config::{BulkSettings, Refresh};
use scrollbulk_core::types::{BulkReport, ChunkReport, DocId, MutationOp};
use scrollbulk_core::{CancelToken, Error, Result, Transport};

use crate::builder::BulkBuilder;
use crate::chunker::chunk;
use crate::dispatcher::BulkDispatcher;

#[derive(Debug, Clone, PartialEq)]
pub struct BulkOptions {
    pub chunk_size: usize,
    pub concurrency: usize,
    pub retry_on_conflict: u32,
    pub refresh: Refresh,
}

impl Default for BulkOptions {
    fn default() -> Self { Self::writes(&BulkSettings::default()) }
}

impl BulkOptions {
    /// Options for create/upsert batches.
    pub fn writes(settings: &BulkSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            concurrency: settings.concurrency,
            retry_on_conflict: settings.retry_on_conflict,
            refresh: settings.refresh,
        }
    }

    /// Options for delete-by-id batches, which use the larger chunk size.
    pub fn deletes(settings: &BulkSettings) -> Self { Self { chunk_size: settings.delete_chunk_size, ..Self::writes(settings) } }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Chunks `ops`, encodes every chunk, then dispatches them with at most
/// `options.concurrency` requests in flight.
///
/// Returns `Err` only when nothing was sent: a bad chunk size or concurrency,
/// or an operation that cannot be encoded. Everything that happens after
/// dispatch starts is reported per chunk.
///
/// Cancellation is checked before each chunk is sent. A chunk already on the
/// wire runs to completion and reports what the engine did, so
/// `Err(Cancelled)` always means the chunk was never sent.
pub async fn bulk_write(
    transport: Arc<dyn Transport>,
    index: &str,
    ops: Vec<MutationOp>,
    options: &BulkOptions,
    cancel: Option<&CancelToken>,
) -> Result<BulkReport> {
    if options.concurrency == 0 {
        return Err(Error::InvalidArgument("concurrency must be at least 1".into()));
    }
    let total = ops.len();
    let chunks = chunk(ops, options.chunk_size)?;
    let builder = BulkBuilder::new(options.retry_on_conflict);
    let bodies = chunks.iter().map(|ops| builder.build(index, ops)).collect::<Result<Vec<_>>>()?;
    info!(index, ops = total, chunks = bodies.len(), concurrency = options.concurrency, "dispatching bulk request");

    let dispatcher = BulkDispatcher::new(transport, options.refresh);
    let mut reports: Vec<ChunkReport> = stream::iter(bodies.into_iter().enumerate())
        .map(|(chunk, body)| {
            let dispatcher = &dispatcher;
            async move {
                let submitted = body.len();
                let result = if cancel.is_some_and(CancelToken::is_cancelled) {
                    Err(Error::Cancelled)
                } else {
                    dispatcher.submit(index, body).await
                };
                match &result {
                    Ok(outcome) if !outcome.is_clean() => {
                        warn!(index, chunk, rejected = outcome.failures.len(), "bulk chunk had rejected items");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(index, chunk, error = %e, "bulk chunk failed"),
                }
                ChunkReport { chunk, submitted, result }
            }
        })
        .buffer_unordered(options.concurrency)
        .collect()
        .await;
    reports.sort_by_key(|r| r.chunk);

    let report = BulkReport { chunks: reports };
    info!(
        index,
        submitted = report.submitted(),
        succeeded = report.succeeded(),
        item_failures = report.item_failures().count(),
        chunk_errors = report.chunk_errors().count(),
        "bulk request finished"
    );
    Ok(report)
}

/// Deletes documents by id. Ids that do not exist count as deleted.
pub async fn delete_by_ids(
    transport: Arc<dyn Transport>,
    index: &str,
    ids: Vec<DocId>,
    options: &BulkOptions,
    cancel: Option<&CancelToken>,
) -> Result<BulkReport> {
    let ops = ids.into_iter().map(MutationOp::delete).collect();
    bulk_write(transport, index, ops, options, cancel).await
}

/// `BulkOptions` for deletes when no settings are at hand.
pub fn default_delete_options() -> BulkOptions { BulkOptions::deletes(&BulkSettings::default()) }
