use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::time::Duration;

use anyhow::Context;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use scrollbulk_client::SearchClient;
use scrollbulk_core::config::{expand_path, Config};
use scrollbulk_core::types::{BulkReport, MutationOp, Query};
use scrollbulk_core::CancelToken;

const USAGE: &str = "Usage: scrollbulk [--config FILE] [--timeout SECS] <command> [args...]

Commands:
  scan <index> [--query JSON] [--page-size N] [--max-pages N]
  bulk <index> <ops.ndjson> [--chunk-size N]
  delete <index> <ids.txt|-> [--chunk-size N]
  create-index <index> [mapping.json]
  drop-index <index>";

/// Positional arguments plus `--flag value` pairs, in any order.
struct Args {
    positional: Vec<String>,
    flags: HashMap<String, String>,
}

impl Args {
    fn parse(raw: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut positional = Vec::new();
        let mut flags = HashMap::new();
        let mut raw = raw.peekable();
        while let Some(arg) = raw.next() {
            match arg.strip_prefix("--") {
                Some("help") => {
                    println!("{USAGE}");
                    std::process::exit(0);
                }
                Some(name) => {
                    let value = raw.next().with_context(|| format!("--{name} requires a value"))?;
                    flags.insert(name.to_string(), value);
                }
                None => positional.push(arg),
            }
        }
        Ok(Self { positional, flags })
    }

    fn number(&self, name: &str) -> anyhow::Result<Option<usize>> {
        self.flags
            .get(name)
            .map(|v| v.parse::<usize>().with_context(|| format!("--{name} requires a number, got {v:?}")))
            .transpose()
    }

    fn json(&self, name: &str) -> anyhow::Result<Option<Value>> {
        self.flags
            .get(name)
            .map(|v| serde_json::from_str(v).with_context(|| format!("--{name} is not valid JSON")))
            .transpose()
    }

    fn positional(&self, i: usize, what: &str) -> anyhow::Result<&str> {
        self.positional.get(i).map(String::as_str).with_context(|| format!("missing <{what}>\n\n{USAGE}"))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn read_lines(path: &str) -> anyhow::Result<Vec<String>> {
    let reader: Box<dyn BufRead> = if path == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = fs::File::open(expand_path(path)).with_context(|| format!("cannot open {path}"))?;
        Box::new(BufReader::new(file))
    };
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    Ok(lines)
}

fn print_report(report: &BulkReport) {
    eprintln!(
        "submitted={} succeeded={} item_failures={} chunk_errors={}",
        report.submitted(),
        report.succeeded(),
        report.item_failures().count(),
        report.chunk_errors().count()
    );
    for failure in report.item_failures() {
        eprintln!("  {} [{}] {}: {}", failure.id, failure.status, failure.kind, failure.reason);
    }
    for (chunk, error) in report.chunk_errors() {
        eprintln!("  chunk {chunk}: {error}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse(env::args().skip(1))?;
    if args.positional.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }

    let config_path = args.flags.get("config").map(expand_path);
    let config = Config::load_with(config_path.as_deref()).map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let settings = config.settings()?;

    let cancel = CancelToken::new();
    if let Some(secs) = args.number("timeout")? {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs as u64)).await;
            tracing::warn!(secs, "timeout reached, cancelling");
            cancel.cancel();
        });
    }
    let client = SearchClient::from_settings(settings)?.with_cancel(cancel);

    let cmd = args.positional(0, "command")?;
    match cmd {
        "scan" => {
            let index = args.positional(1, "index")?;
            let page_size = args.number("page-size")?.unwrap_or(client.settings().scroll.page_size);
            let max_pages = args.number("max-pages")?.unwrap_or(client.settings().scroll.max_pages);
            let body = args.json("query")?.unwrap_or_else(|| json!({ "query": { "match_all": {} } }));
            let query = Query::new(body, page_size);
            let (pages, failure) = match client.collect_all(index, &query, page_size, max_pages).await {
                Ok(pages) => (pages, None),
                Err(e) => (e.pages, Some(e.source)),
            };
            let mut out = io::stdout().lock();
            let mut hits = 0usize;
            for hit in pages.iter().flat_map(|p| &p.hits) {
                writeln!(out, "{}", json!({ "_id": hit.id, "_score": hit.score, "_source": hit.source }))?;
                hits += 1;
            }
            let total = pages.first().map_or(0, |p| p.total);
            eprintln!("pages={} hits={hits} total={total}", pages.len());
            if let Some(e) = failure {
                anyhow::bail!("scan stopped early: {e}");
            }
        }
        "bulk" => {
            let index = args.positional(1, "index")?;
            let path = args.positional(2, "ops.ndjson")?;
            let chunk_size = args.number("chunk-size")?.unwrap_or(client.settings().bulk.chunk_size);
            let ops = read_lines(path)?
                .iter()
                .enumerate()
                .map(|(i, line)| serde_json::from_str::<MutationOp>(line).with_context(|| format!("{path}:{}: invalid operation", i + 1)))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let report = client.bulk_write(index, ops, chunk_size).await?;
            print_report(&report);
            if !report.is_success() {
                std::process::exit(2);
            }
        }
        "delete" => {
            let index = args.positional(1, "index")?;
            let path = args.positional(2, "ids.txt")?;
            let chunk_size = args.number("chunk-size")?.unwrap_or(client.settings().bulk.delete_chunk_size);
            let ids = read_lines(path)?;
            let report = client.delete_by_ids(index, ids, chunk_size).await?;
            print_report(&report);
            if !report.is_success() {
                std::process::exit(2);
            }
        }
        "create-index" => {
            let index = args.positional(1, "index")?;
            let body = match args.positional.get(2) {
                Some(path) => {
                    let text = fs::read_to_string(expand_path(path)).with_context(|| format!("cannot read {path}"))?;
                    serde_json::from_str(&text).with_context(|| format!("{path} is not valid JSON"))?
                }
                None => json!({}),
            };
            client.create_index(index, &body).await?;
            println!("created {index}");
        }
        "drop-index" => {
            let index = args.positional(1, "index")?;
            client.delete_index(index).await?;
            println!("deleted {index}");
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(1);
        }
    }
    Ok(())
}
