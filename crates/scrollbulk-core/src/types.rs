//! Domain types shared by the read (scroll) and write (bulk) paths.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub type DocId = String;

/// A search predicate plus the page size requested for it.
///
/// `body` is the JSON request document built elsewhere (filters, sorts,
/// boosts). The read path never mutates it; `request_body` produces a sized
/// copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub body: Value,
    pub size: usize,
}

impl Query {
    pub fn new(body: Value, size: usize) -> Self { Self { body, size } }

    pub fn match_all(size: usize) -> Self {
        Self::new(serde_json::json!({ "query": { "match_all": {} } }), size)
    }

    /// The same predicate with a different page size.
    pub fn with_size(&self, size: usize) -> Self { Self::new(self.body.clone(), size) }

    /// Request body sent to the engine: `body` with `size` set.
    pub fn request_body(&self) -> Result<Value> {
        if self.size == 0 {
            return Err(Error::InvalidArgument("page size must be positive".into()));
        }
        let mut body = match &self.body {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => return Err(Error::InvalidArgument(format!("query body must be a JSON object, got {other}"))),
        };
        body.insert("size".to_string(), Value::from(self.size));
        Ok(Value::Object(body))
    }
}

/// One retrieved document.
///
/// - `id`: engine document id (`_id`)
/// - `score`: relevance score; `0.0` when the engine reports none (e.g. sorted queries)
/// - `index`: concrete index the document lives in
/// - `source`: the stored document (`_source`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: DocId,
    pub score: f32,
    pub index: String,
    pub source: Value,
}

impl Hit {
    pub fn source_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.source)?)
    }
}

/// One fetched page.
///
/// `total` is the engine's match count; only the first page of a query
/// carries an authoritative value. `continuation` is set only when the page
/// came back full.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPage {
    pub hits: Vec<Hit>,
    pub total: u64,
    pub continuation: Option<String>,
}

impl ResultPage {
    pub fn len(&self) -> usize { self.hits.len() }
    pub fn is_empty(&self) -> bool { self.hits.is_empty() }
}

/// A single mutation destined for a bulk request.
///
/// Serialized with an `op` tag so operation files read as
/// `{"op":"upsert","id":"42","doc":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationOp {
    Create { id: DocId, doc: Value },
    Upsert { id: DocId, doc: Value },
    Delete { id: DocId },
}

impl MutationOp {
    pub fn create<T: Serialize>(id: impl Into<DocId>, doc: &T) -> Result<Self> {
        Ok(Self::Create { id: id.into(), doc: to_document(doc)? })
    }

    pub fn upsert<T: Serialize>(id: impl Into<DocId>, doc: &T) -> Result<Self> {
        Ok(Self::Upsert { id: id.into(), doc: to_document(doc)? })
    }

    pub fn delete(id: impl Into<DocId>) -> Self { Self::Delete { id: id.into() } }

    pub fn id(&self) -> &str {
        match self {
            Self::Create { id, .. } | Self::Upsert { id, .. } | Self::Delete { id } => id,
        }
    }
}

fn to_document<T: Serialize>(doc: &T) -> Result<Value> {
    serde_json::to_value(doc).map_err(|e| Error::InvalidArgument(format!("document is not serializable: {e}")))
}

/// A bulk item the engine rejected while its siblings went through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub id: DocId,
    pub status: u16,
    pub kind: String,
    pub reason: String,
}

/// Result of one successfully transported bulk request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub submitted: usize,
    pub succeeded: usize,
    pub failures: Vec<ItemFailure>,
}

impl BulkOutcome {
    pub fn is_clean(&self) -> bool { self.failures.is_empty() }
}

/// What happened to one chunk of a logical bulk operation.
#[derive(Debug)]
pub struct ChunkReport {
    pub chunk: usize,
    pub submitted: usize,
    pub result: Result<BulkOutcome>,
}

/// Aggregate over every chunk of a logical bulk operation, in chunk order.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub chunks: Vec<ChunkReport>,
}

impl BulkReport {
    pub fn submitted(&self) -> usize { self.chunks.iter().map(|c| c.submitted).sum() }

    pub fn succeeded(&self) -> usize {
        self.chunks.iter().filter_map(|c| c.result.as_ref().ok()).map(|o| o.succeeded).sum()
    }

    pub fn item_failures(&self) -> impl Iterator<Item = &ItemFailure> {
        self.chunks.iter().filter_map(|c| c.result.as_ref().ok()).flat_map(|o| o.failures.iter())
    }

    /// Ids worth retrying: rejected items only. Items of failed chunks are not
    /// listed here since their fate is unknown; see `chunk_errors`.
    pub fn failed_ids(&self) -> Vec<&str> { self.item_failures().map(|f| f.id.as_str()).collect() }

    pub fn chunk_errors(&self) -> impl Iterator<Item = (usize, &Error)> {
        self.chunks.iter().filter_map(|c| c.result.as_ref().err().map(|e| (c.chunk, e)))
    }

    pub fn is_success(&self) -> bool {
        self.chunks.iter().all(|c| matches!(&c.result, Ok(o) if o.is_clean()))
    }
}
