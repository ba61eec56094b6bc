use super::{guard::ensure_absent, parse_args, require_file, write_new, TaskContext};
use crate::{
    dispatch::registry::Task,
    errors::{TaskError, TaskResult},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConvertParams {
    #[serde(alias = "md_path")]
    input: String,
    #[serde(alias = "output_path")]
    output: String,
}

/// Renders a Markdown file to HTML.
pub struct ConvertAndStore;

#[async_trait]
impl Task for ConvertAndStore {
    fn name(&self) -> &'static str { "convert-and-store" }
    fn capabilities(&self) -> Value {
        json!({"input": {"type":"object","required":["input","output"],"properties":{"input":{"type":"string"},"output":{"type":"string"}}}, "output": {"type":"object","properties":{"output":{"type":"string"},"bytes_written":{"type":"integer"}}}})
    }
    async fn run(&self, ctx: &TaskContext, args: Value, _timeout: Duration) -> TaskResult {
        let p: ConvertParams = parse_args(args)?;
        let input = ctx.confine(&p.input)?;
        let output = ctx.confine(&p.output)?;
        require_file(&input).await?;
        ensure_absent(&output)?;

        let source = tokio::fs::read_to_string(input.as_path())
            .await
            .map_err(|e| TaskError::InvalidArgument(format!("{input}: {e}")))?;
        let html = ctx.collab.renderer.render(&source);
        let written = write_new(&output, html.as_bytes()).await?;
        Ok(json!({"output": output.to_string(), "bytes_written": written}))
    }
}
