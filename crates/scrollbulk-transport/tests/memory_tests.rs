use std::time::Duration;

use scrollbulk_core::config::Refresh;
use scrollbulk_core::{Error, Transport};
use scrollbulk_transport::MemoryTransport;
use serde_json::json;

const KEEP_ALIVE: Duration = Duration::from_secs(60);

fn seeded(n: usize) -> MemoryTransport {
    let engine = MemoryTransport::new();
    engine.insert_many("docs", (0..n).map(|i| (format!("doc-{i}"), json!({ "n": i, "even": i % 2 == 0 }))));
    engine
}

#[tokio::test]
async fn scroll_walks_all_documents_then_returns_empty_pages() -> anyhow::Result<()> {
    let engine = seeded(5);
    let first = engine.search("docs", &json!({ "size": 2 }), Some(KEEP_ALIVE)).await?;
    assert_eq!(first["hits"]["total"]["value"], json!(5));
    assert_eq!(first["hits"]["hits"].as_array().map(Vec::len), Some(2));
    let token = first["_scroll_id"].as_str().expect("scroll id").to_string();

    let second = engine.scroll(&token, KEEP_ALIVE).await?;
    let third = engine.scroll(&token, KEEP_ALIVE).await?;
    let fourth = engine.scroll(&token, KEEP_ALIVE).await?;
    assert_eq!(second["hits"]["hits"].as_array().map(Vec::len), Some(2));
    assert_eq!(third["hits"]["hits"].as_array().map(Vec::len), Some(1));
    assert_eq!(fourth["hits"]["hits"].as_array().map(Vec::len), Some(0));
    assert_eq!(engine.fetch_calls(), 4);

    engine.clear_scroll(&token).await?;
    assert_eq!(engine.open_scrolls(), 0);
    assert!(matches!(engine.scroll(&token, KEEP_ALIVE).await, Err(Error::Response { status: 404, .. })));
    Ok(())
}

#[tokio::test]
async fn term_and_ids_queries_filter_documents() -> anyhow::Result<()> {
    let engine = seeded(6);
    let evens = engine.search("docs", &json!({ "size": 10, "query": { "term": { "even": true } } }), None).await?;
    assert_eq!(evens["hits"]["total"]["value"], json!(3));
    let ids = engine.search("docs", &json!({ "query": { "ids": { "values": ["doc-1", "doc-9"] } } }), None).await?;
    assert_eq!(ids["hits"]["hits"][0]["_id"], json!("doc-1"));
    assert_eq!(ids["hits"]["total"]["value"], json!(1));
    Ok(())
}

#[tokio::test]
async fn search_on_missing_index_is_a_response_error() {
    let engine = MemoryTransport::new();
    match engine.search("nope", &json!({}), None).await {
        Err(Error::Response { status, kind, .. }) => {
            assert_eq!(status, 404);
            assert_eq!(kind, "index_not_found_exception");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn bulk_reports_items_positionally_with_conflicts() -> anyhow::Result<()> {
    let engine = seeded(1);
    let body = [
        r#"{"create":{"_index":"docs","_id":"doc-0"}}"#,
        r#"{"n":100}"#,
        r#"{"update":{"_index":"docs","_id":"new","retry_on_conflict":3}}"#,
        r#"{"doc":{"n":7},"doc_as_upsert":true}"#,
        r#"{"delete":{"_index":"docs","_id":"ghost"}}"#,
    ]
    .join("\n")
        + "\n";
    let resp = engine.bulk("docs", body, Refresh::False).await?;
    assert_eq!(resp["errors"], json!(true));
    assert_eq!(resp["items"][0]["create"]["status"], json!(409));
    assert_eq!(resp["items"][0]["create"]["error"]["type"], json!("version_conflict_engine_exception"));
    assert_eq!(resp["items"][1]["update"]["status"], json!(201));
    assert_eq!(resp["items"][2]["delete"]["result"], json!("not_found"));
    assert_eq!(engine.document("docs", "new"), Some(json!({ "n": 7 })));
    assert_eq!(engine.document("docs", "doc-0"), Some(json!({ "n": 0, "even": true })));
    Ok(())
}

#[tokio::test]
async fn failing_bulk_applies_nothing() {
    let engine = MemoryTransport::new();
    engine.fail_bulk_containing("x");
    let body = "{\"delete\":{\"_id\":\"a\"}}\n{\"create\":{\"_id\":\"x\"}}\n{}\n".to_string();
    assert!(matches!(engine.bulk("docs", body, Refresh::False).await, Err(Error::Transport(_))));
    assert!(!engine.has_index("docs"));
    assert_eq!(engine.bulk_calls(), 1);
}

#[tokio::test]
async fn index_admin_round_trip() -> anyhow::Result<()> {
    let engine = MemoryTransport::new();
    engine.create_index("docs", &json!({ "mappings": {} })).await?;
    assert!(engine.has_index("docs"));
    assert!(matches!(engine.create_index("docs", &json!({})).await, Err(Error::Response { status: 400, .. })));
    engine.delete_index("docs").await?;
    assert!(!engine.has_index("docs"));
    Ok(())
}
