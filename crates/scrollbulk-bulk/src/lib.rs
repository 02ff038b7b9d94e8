//! scrollbulk-bulk
//!
//! Write path: chunking, NDJSON encoding, dispatch with per-item
//! classification, and the bounded-concurrency pipeline over all chunks.

pub mod builder;
pub mod chunker;
pub mod dispatcher;
pub mod pipeline;

pub use builder::{BulkBody, BulkBuilder};
pub use chunker::{chunk, DEFAULT_DELETE_CHUNK_SIZE, DEFAULT_WRITE_CHUNK_SIZE};
pub use dispatcher::BulkDispatcher;
pub use pipeline::{bulk_write, default_delete_options, delete_by_ids, BulkOptions};
