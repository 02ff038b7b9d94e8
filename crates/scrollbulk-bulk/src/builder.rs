use serde::Serialize;
use serde_json::Value;

use scrollbulk_core::config::BulkSettings;
use scrollbulk_core::types::{DocId, MutationOp};
use scrollbulk_core::{Error, Result};

/// One encoded bulk request. `ids[i]` is the document addressed by the i-th
/// action, which is how response items are matched back.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkBody {
    pub body: String,
    pub ids: Vec<DocId>,
}

impl BulkBody {
    pub fn len(&self) -> usize { self.ids.len() }

    pub fn is_empty(&self) -> bool { self.ids.is_empty() }
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum ActionLine<'a> {
    Create(ActionMeta<'a>),
    Update(ActionMeta<'a>),
    Delete(ActionMeta<'a>),
}

#[derive(Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_on_conflict: Option<u32>,
}

#[derive(Serialize)]
struct UpsertLine<'a> {
    doc: &'a Value,
    doc_as_upsert: bool,
}

/// Encodes mutation operations as newline-delimited action/payload pairs.
#[derive(Debug, Clone, Copy)]
pub struct BulkBuilder {
    retry_on_conflict: u32,
}

impl Default for BulkBuilder {
    fn default() -> Self { Self::new(BulkSettings::default().retry_on_conflict) }
}

impl BulkBuilder {
    pub fn new(retry_on_conflict: u32) -> Self { Self { retry_on_conflict } }

    pub fn build(&self, index: &str, ops: &[MutationOp]) -> Result<BulkBody> {
        if index.is_empty() {
            return Err(Error::InvalidArgument("index name must not be empty".into()));
        }
        if ops.is_empty() {
            return Err(Error::InvalidArgument("bulk request needs at least one operation".into()));
        }
        let mut body = String::new();
        let mut ids = Vec::with_capacity(ops.len());
        for op in ops {
            let id = op.id();
            if id.is_empty() {
                return Err(Error::InvalidArgument("document id must not be empty".into()));
            }
            match op {
                MutationOp::Create { doc, .. } => {
                    require_object(id, doc)?;
                    push_line(&mut body, &ActionLine::Create(meta(index, id, None)))?;
                    push_line(&mut body, doc)?;
                }
                MutationOp::Upsert { doc, .. } => {
                    require_object(id, doc)?;
                    push_line(&mut body, &ActionLine::Update(meta(index, id, Some(self.retry_on_conflict))))?;
                    push_line(&mut body, &UpsertLine { doc, doc_as_upsert: true })?;
                }
                MutationOp::Delete { .. } => {
                    push_line(&mut body, &ActionLine::Delete(meta(index, id, None)))?;
                }
            }
            ids.push(id.to_string());
        }
        Ok(BulkBody { body, ids })
    }
}

fn meta<'a>(index: &'a str, id: &'a str, retry_on_conflict: Option<u32>) -> ActionMeta<'a> {
    ActionMeta { index, id, retry_on_conflict }
}

fn require_object(id: &str, doc: &Value) -> Result<()> {
    if doc.is_object() {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("document {id} must be a JSON object")))
    }
}

fn push_line<T: Serialize + ?Sized>(body: &mut String, line: &T) -> Result<()> {
    body.push_str(&serde_json::to_string(line)?);
    body.push('\n');
    Ok(())
}
