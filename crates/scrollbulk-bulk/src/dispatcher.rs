use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use scrollbulk_core::config::Refresh;
use scrollbulk_core::types::{BulkOutcome, ItemFailure};
use scrollbulk_core::{Result, Transport};

use crate::builder::BulkBody;

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<HashMap<String, ItemResult>>,
}

#[derive(Deserialize)]
struct ItemResult {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

/// Sends one bulk body and classifies the per-item results.
#[derive(Clone)]
pub struct BulkDispatcher {
    transport: Arc<dyn Transport>,
    refresh: Refresh,
}

impl BulkDispatcher {
    pub fn new(transport: Arc<dyn Transport>, refresh: Refresh) -> Self { Self { transport, refresh } }

    /// Whole-request failures come back as `Err`; rejected items never do.
    pub async fn submit(&self, index: &str, body: BulkBody) -> Result<BulkOutcome> {
        let BulkBody { body, ids } = body;
        let raw = self.transport.bulk(index, body, self.refresh).await?;
        let resp: BulkResponse = serde_json::from_value(raw)?;
        let outcome = classify(&ids, resp.items);
        debug!(index, submitted = outcome.submitted, succeeded = outcome.succeeded, failed = outcome.failures.len(), "bulk submitted");
        Ok(outcome)
    }
}

fn classify(ids: &[String], items: Vec<HashMap<String, ItemResult>>) -> BulkOutcome {
    if items.len() > ids.len() {
        warn!(expected = ids.len(), received = items.len(), "engine returned extra bulk items");
    }
    let mut items = items.into_iter();
    let mut outcome = BulkOutcome { submitted: ids.len(), ..BulkOutcome::default() };
    for id in ids {
        // Each item is a single-key map: {"create"|"update"|"delete"|"index": {...}}.
        let item = items.next().and_then(|m| m.into_values().next());
        let Some(item) = item else {
            outcome.failures.push(ItemFailure {
                id: id.clone(),
                status: 0,
                kind: "missing_item".into(),
                reason: "no result returned for this position".into(),
            });
            continue;
        };
        if let Some(returned) = item.id.as_deref().filter(|r| *r != id.as_str()) {
            warn!(expected = %id, returned, "bulk item id does not match its position");
        }
        match item.error {
            Some(error) => outcome.failures.push(item_failure(id, item.status, &error)),
            None => outcome.succeeded += 1,
        }
    }
    outcome
}

fn item_failure(id: &str, status: u16, error: &Value) -> ItemFailure {
    let (kind, reason) = match error {
        Value::Object(err) => (
            err.get("type").and_then(Value::as_str).unwrap_or("unknown").to_string(),
            err.get("reason").and_then(Value::as_str).unwrap_or_default().to_string(),
        ),
        Value::String(reason) => ("error".to_string(), reason.clone()),
        other => ("unknown".to_string(), other.to_string()),
    };
    ItemFailure { id: id.to_string(), status, kind, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items(raw: Value) -> Vec<HashMap<String, ItemResult>> {
        serde_json::from_value::<BulkResponse>(raw).unwrap().items
    }

    fn ids(list: &[&str]) -> Vec<String> { list.iter().map(|s| s.to_string()).collect() }

    #[test]
    fn error_objects_become_item_failures() {
        let raw = json!({ "errors": true, "items": [
            { "create": { "_id": "a", "status": 201, "result": "created" } },
            { "update": { "_id": "b", "status": 409, "error": { "type": "version_conflict_engine_exception", "reason": "conflict" } } },
        ]});
        let outcome = classify(&ids(&["a", "b"]), items(raw));
        assert_eq!(outcome.submitted, 2);
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failures, vec![ItemFailure {
            id: "b".into(),
            status: 409,
            kind: "version_conflict_engine_exception".into(),
            reason: "conflict".into(),
        }]);
    }

    #[test]
    fn delete_of_absent_document_is_success() {
        let raw = json!({ "errors": false, "items": [{ "delete": { "_id": "gone", "status": 404, "result": "not_found" } }] });
        let outcome = classify(&ids(&["gone"]), items(raw));
        assert!(outcome.is_clean());
        assert_eq!(outcome.succeeded, 1);
    }

    #[test]
    fn short_item_list_reports_missing_positions() {
        let raw = json!({ "errors": false, "items": [{ "delete": { "_id": "a", "status": 200, "result": "deleted" } }] });
        let outcome = classify(&ids(&["a", "b", "c"]), items(raw));
        assert_eq!(outcome.succeeded, 1);
        let missing: Vec<(&str, &str)> = outcome.failures.iter().map(|f| (f.id.as_str(), f.kind.as_str())).collect();
        assert_eq!(missing, vec![("b", "missing_item"), ("c", "missing_item")]);
    }

    #[test]
    fn correlation_is_positional_not_by_returned_id() {
        let raw = json!({ "items": [
            { "create": { "_id": "x", "status": 400, "error": { "type": "mapper_parsing_exception", "reason": "bad field" } } },
        ]});
        let outcome = classify(&ids(&["a"]), items(raw));
        assert_eq!(outcome.failures[0].id, "a");
        assert_eq!(outcome.failures[0].kind, "mapper_parsing_exception");
    }

    #[test]
    fn string_error_is_kept_as_reason() {
        let failure = item_failure("a", 500, &json!("shard failure"));
        assert_eq!(failure.kind, "error");
        assert_eq!(failure.reason, "shard failure");
    }
}
