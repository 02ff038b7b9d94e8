//! In-process engine speaking the same JSON shapes as the REST transport.
//!
//! Used by tests and offline development (`APP_USE_MEMORY_TRANSPORT=1`).
//! Documents are kept per index in id order; queries support `match_all`,
//! `term` on top-level fields and `ids`. Fault hooks let callers reject
//! individual bulk items, fail whole bulk requests that touch a given id, or
//! fail the Nth search/scroll call.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use scrollbulk_core::config::Refresh;
use scrollbulk_core::{Error, Result, Transport};

#[derive(Debug, Clone)]
struct Rejection {
    status: u16,
    kind: String,
    reason: String,
}

struct ScrollContext {
    remaining: VecDeque<Value>,
    size: usize,
    total: usize,
}

#[derive(Default)]
struct State {
    indices: BTreeMap<String, BTreeMap<String, Value>>,
    scrolls: HashMap<String, ScrollContext>,
    next_scroll: u64,
    fetch_calls: usize,
    bulk_calls: usize,
    rejected: HashMap<String, Rejection>,
    failing_bulk_ids: HashSet<String>,
    failing_fetch_call: Option<usize>,
}

#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
    latency: Mutex<Option<Duration>>,
}

fn not_found(kind: &str, reason: String) -> Error { Error::Response { status: 404, kind: kind.to_string(), reason } }

fn bad_request(reason: String) -> Error {
    Error::Response { status: 400, kind: "illegal_argument_exception".to_string(), reason }
}

impl MemoryTransport {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> { self.state.lock().unwrap_or_else(PoisonError::into_inner) }

    /// Seeds `index` with documents, creating it if needed.
    pub fn insert_many<I>(&self, index: &str, docs: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut state = self.lock();
        state.indices.entry(index.to_string()).or_default().extend(docs);
    }

    pub fn document(&self, index: &str, id: &str) -> Option<Value> {
        self.lock().indices.get(index).and_then(|docs| docs.get(id).cloned())
    }

    pub fn count(&self, index: &str) -> usize { self.lock().indices.get(index).map_or(0, BTreeMap::len) }

    pub fn has_index(&self, index: &str) -> bool { self.lock().indices.contains_key(index) }

    /// Every bulk item targeting `id` fails with the given engine error.
    pub fn reject_id(&self, id: &str, status: u16, kind: &str, reason: &str) {
        let rejection = Rejection { status, kind: kind.to_string(), reason: reason.to_string() };
        self.lock().rejected.insert(id.to_string(), rejection);
    }

    /// Any bulk request touching `id` fails as a transport error, with nothing applied.
    pub fn fail_bulk_containing(&self, id: &str) { self.lock().failing_bulk_ids.insert(id.to_string()); }

    /// The `n`th search or scroll call (1-based) fails as a transport error.
    pub fn fail_fetch_call(&self, n: usize) { self.lock().failing_fetch_call = Some(n); }

    /// Delay applied to every request before it is processed.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = Some(latency);
    }

    /// Search plus scroll calls received so far.
    pub fn fetch_calls(&self) -> usize { self.lock().fetch_calls }

    pub fn bulk_calls(&self) -> usize { self.lock().bulk_calls }

    pub fn open_scrolls(&self) -> usize { self.lock().scrolls.len() }

    async fn delay(&self) {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }
    }

    fn count_fetch(state: &mut State) -> Result<()> {
        state.fetch_calls += 1;
        if state.failing_fetch_call == Some(state.fetch_calls) {
            return Err(Error::Transport("connection reset by peer".into()));
        }
        Ok(())
    }
}

fn hit(index: &str, id: &str, source: &Value) -> Value {
    json!({ "_index": index, "_id": id, "_score": 1.0, "_source": source })
}

fn matches(query: Option<&Value>, id: &str, source: &Value) -> Result<bool> {
    let Some(query) = query else { return Ok(true) };
    let clause = query
        .as_object()
        .and_then(|q| q.iter().next())
        .ok_or_else(|| bad_request("query must be an object with one clause".into()))?;
    match clause {
        (kind, _) if kind == "match_all" => Ok(true),
        (kind, Value::Object(term)) if kind == "term" => Ok(term.iter().all(|(field, expected)| {
            let expected = expected.get("value").unwrap_or(expected);
            source.get(field) == Some(expected)
        })),
        (kind, spec) if kind == "ids" => {
            let values = spec.get("values").and_then(Value::as_array).cloned().unwrap_or_default();
            Ok(values.iter().any(|v| v.as_str() == Some(id)))
        }
        (kind, _) => Err(Error::Response {
            status: 400,
            kind: "parsing_exception".into(),
            reason: format!("unsupported query [{kind}]"),
        }),
    }
}

fn search_response(hits: Vec<Value>, total: usize, scroll_id: Option<&str>) -> Value {
    let mut resp = json!({
        "took": 1,
        "timed_out": false,
        "hits": { "total": { "value": total, "relation": "eq" }, "max_score": 1.0, "hits": hits },
    });
    if let (Some(id), Some(obj)) = (scroll_id, resp.as_object_mut()) {
        obj.insert("_scroll_id".into(), Value::from(id));
    }
    resp
}

fn merge_doc(target: &mut Value, patch: &Value) {
    if let (Some(p), true) = (patch.as_object(), target.is_object()) {
        if let Some(t) = target.as_object_mut() {
            for (k, v) in p {
                t.insert(k.clone(), v.clone());
            }
        }
        return;
    }
    *target = patch.clone();
}

struct BulkAction {
    action: String,
    index: String,
    id: String,
    payload: Option<Value>,
}

fn parse_bulk(default_index: &str, body: &str) -> Result<Vec<BulkAction>> {
    let mut lines = body.lines().filter(|l| !l.trim().is_empty());
    let mut actions = Vec::new();
    while let Some(line) = lines.next() {
        let header: Map<String, Value> =
            serde_json::from_str(line).map_err(|e| bad_request(format!("malformed action line: {e}")))?;
        let (action, meta) = header.into_iter().next().ok_or_else(|| bad_request("empty action line".into()))?;
        let index = meta.get("_index").and_then(Value::as_str).unwrap_or(default_index).to_string();
        let id = meta
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_request(format!("[{action}] requires _id")))?
            .to_string();
        let payload = match action.as_str() {
            "delete" => None,
            "create" | "index" | "update" => {
                let line = lines.next().ok_or_else(|| bad_request(format!("[{action}] is missing its payload line")))?;
                Some(serde_json::from_str(line).map_err(|e| bad_request(format!("malformed payload line: {e}")))?)
            }
            other => return Err(bad_request(format!("unknown bulk action [{other}]"))),
        };
        actions.push(BulkAction { action, index, id, payload });
    }
    Ok(actions)
}

fn apply(docs: &mut BTreeMap<String, Value>, act: &BulkAction) -> std::result::Result<(u16, &'static str), Rejection> {
    let conflict = |reason: String| Rejection { status: 409, kind: "version_conflict_engine_exception".into(), reason };
    let payload = act.payload.clone().unwrap_or(Value::Null);
    match act.action.as_str() {
        "create" if docs.contains_key(&act.id) => {
            Err(conflict(format!("[{}]: version conflict, document already exists", act.id)))
        }
        "create" => {
            docs.insert(act.id.clone(), payload);
            Ok((201, "created"))
        }
        "index" => Ok(if docs.insert(act.id.clone(), payload).is_some() { (200, "updated") } else { (201, "created") }),
        "update" => {
            let doc = payload.get("doc").cloned().unwrap_or(Value::Null);
            let as_upsert = payload.get("doc_as_upsert").and_then(Value::as_bool).unwrap_or(false);
            match docs.get_mut(&act.id) {
                Some(existing) => {
                    merge_doc(existing, &doc);
                    Ok((200, "updated"))
                }
                None if as_upsert => {
                    docs.insert(act.id.clone(), doc);
                    Ok((201, "created"))
                }
                None => Err(Rejection {
                    status: 404,
                    kind: "document_missing_exception".into(),
                    reason: format!("[{}]: document missing", act.id),
                }),
            }
        }
        _ => Ok(if docs.remove(&act.id).is_some() { (200, "deleted") } else { (404, "not_found") }),
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn search(&self, index: &str, body: &Value, scroll: Option<Duration>) -> Result<Value> {
        self.delay().await;
        let mut state = self.lock();
        Self::count_fetch(&mut state)?;
        let docs = state
            .indices
            .get(index)
            .ok_or_else(|| not_found("index_not_found_exception", format!("no such index [{index}]")))?;
        let size = body.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;
        let mut matched = Vec::new();
        for (id, source) in docs {
            if matches(body.get("query"), id, source)? {
                matched.push(hit(index, id, source));
            }
        }
        let total = matched.len();
        if scroll.is_none() {
            let from = body.get("from").and_then(Value::as_u64).unwrap_or(0) as usize;
            let page = matched.into_iter().skip(from).take(size).collect();
            return Ok(search_response(page, total, None));
        }
        let mut remaining: VecDeque<Value> = matched.into();
        let page: Vec<Value> = remaining.drain(..size.min(remaining.len())).collect();
        state.next_scroll += 1;
        let scroll_id = format!("scroll-{}", state.next_scroll);
        state.scrolls.insert(scroll_id.clone(), ScrollContext { remaining, size, total });
        Ok(search_response(page, total, Some(&scroll_id)))
    }

    async fn scroll(&self, token: &str, _keep_alive: Duration) -> Result<Value> {
        self.delay().await;
        let mut state = self.lock();
        Self::count_fetch(&mut state)?;
        let ctx = state
            .scrolls
            .get_mut(token)
            .ok_or_else(|| not_found("search_context_missing_exception", format!("No search context found for id [{token}]")))?;
        let n = ctx.size.min(ctx.remaining.len());
        let page: Vec<Value> = ctx.remaining.drain(..n).collect();
        Ok(search_response(page, ctx.total, Some(token)))
    }

    async fn clear_scroll(&self, token: &str) -> Result<()> {
        match self.lock().scrolls.remove(token) {
            Some(_) => Ok(()),
            None => Err(not_found("search_context_missing_exception", format!("No search context found for id [{token}]"))),
        }
    }

    async fn bulk(&self, index: &str, body: String, _refresh: Refresh) -> Result<Value> {
        self.delay().await;
        let mut state = self.lock();
        state.bulk_calls += 1;
        let actions = parse_bulk(index, &body)?;
        if actions.iter().any(|a| state.failing_bulk_ids.contains(&a.id)) {
            return Err(Error::Transport("connection reset by peer".into()));
        }
        let mut items = Vec::with_capacity(actions.len());
        let mut errors = false;
        for act in &actions {
            let rejected = state.rejected.get(&act.id).cloned();
            let outcome = match rejected {
                Some(rejection) => Err(rejection),
                None => apply(state.indices.entry(act.index.clone()).or_default(), act),
            };
            let mut item = json!({ "_index": act.index, "_id": act.id });
            match outcome {
                Ok((status, result)) => {
                    item["status"] = json!(status);
                    item["result"] = json!(result);
                }
                Err(rejection) => {
                    errors = true;
                    item["status"] = json!(rejection.status);
                    item["error"] = json!({ "type": rejection.kind, "reason": rejection.reason });
                }
            }
            let mut wrapper = Map::new();
            wrapper.insert(act.action.clone(), item);
            items.push(Value::Object(wrapper));
        }
        Ok(json!({ "took": 1, "errors": errors, "items": items }))
    }

    async fn create_index(&self, index: &str, _body: &Value) -> Result<()> {
        let mut state = self.lock();
        if state.indices.contains_key(index) {
            return Err(Error::Response {
                status: 400,
                kind: "resource_already_exists_exception".into(),
                reason: format!("index [{index}] already exists"),
            });
        }
        state.indices.insert(index.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        match self.lock().indices.remove(index) {
            Some(_) => Ok(()),
            None => Err(not_found("index_not_found_exception", format!("no such index [{index}]"))),
        }
    }
}
