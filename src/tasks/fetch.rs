use super::{bounded, guard::ensure_absent, parse_args, write_new, TaskContext};
use crate::{dispatch::registry::Task, errors::TaskResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoreParams {
    url: String,
    #[serde(alias = "save_path", alias = "output_filename")]
    output: String,
}

fn input_schema() -> Value {
    json!({"type":"object","required":["url","output"],"properties":{"url":{"type":"string"},"output":{"type":"string"}}})
}

/// GETs `url` and stores the body at a fresh path under the root.
async fn fetch_into(ctx: &TaskContext, args: Value, timeout: Duration, as_text: bool) -> TaskResult {
    let p: StoreParams = parse_args(args)?;
    let url = ctx.check_url(&p.url)?;
    let output = ctx.confine(&p.output)?;
    ensure_absent(&output)?;

    let body = bounded(timeout, ctx.collab.fetcher.get(url.as_str())).await?;
    let written = if as_text {
        write_new(&output, String::from_utf8_lossy(&body.bytes).as_bytes()).await?
    } else {
        write_new(&output, &body.bytes).await?
    };
    info!(url = %url, output = %output, bytes = written, "stored");
    Ok(json!({"output": output.to_string(), "bytes_written": written, "content_type": body.content_type}))
}

/// Downloads a resource as text.
pub struct FetchAndStore;

#[async_trait]
impl Task for FetchAndStore {
    fn name(&self) -> &'static str { "fetch-and-store" }
    fn capabilities(&self) -> Value {
        json!({"input": input_schema(), "output": {"type":"object","properties":{"output":{"type":"string"},"bytes_written":{"type":"integer"},"content_type":{"type":["string","null"]}}}})
    }
    async fn run(&self, ctx: &TaskContext, args: Value, timeout: Duration) -> TaskResult {
        fetch_into(ctx, args, timeout, true).await
    }
}

/// Saves a page's raw body untouched.
pub struct ScrapeAndStore;

#[async_trait]
impl Task for ScrapeAndStore {
    fn name(&self) -> &'static str { "scrape-and-store" }
    fn capabilities(&self) -> Value {
        json!({"input": input_schema(), "output": {"type":"object","properties":{"output":{"type":"string"},"bytes_written":{"type":"integer"}}}})
    }
    async fn run(&self, ctx: &TaskContext, args: Value, timeout: Duration) -> TaskResult {
        fetch_into(ctx, args, timeout, false).await
    }
}
