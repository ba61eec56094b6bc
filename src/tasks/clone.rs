use super::{bounded, guard::ensure_absent, parse_args, TaskContext};
use crate::{
    dispatch::registry::Task,
    errors::{TaskError, TaskResult},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CloneParams {
    #[serde(alias = "repo_url")]
    source: String,
    #[serde(alias = "commit_message")]
    message: String,
    #[serde(default = "default_dest")]
    dest: String,
}
fn default_dest() -> String { "repo".to_string() }

/// Clones a repository into a new directory under the root and records an
/// empty commit there.
pub struct CloneAndCommit;

#[async_trait]
impl Task for CloneAndCommit {
    fn name(&self) -> &'static str { "clone-and-commit" }
    fn capabilities(&self) -> Value {
        json!({"input": {"type":"object","required":["source","message"],"properties":{"source":{"type":"string"},"message":{"type":"string"},"dest":{"type":"string","default":"repo"}}}, "output": {"type":"object","properties":{"dest":{"type":"string"},"head":{"type":"string"}}}})
    }
    async fn run(&self, ctx: &TaskContext, args: Value, timeout: Duration) -> TaskResult {
        let p: CloneParams = parse_args(args)?;
        if p.source.trim().is_empty() || p.source.starts_with('-') {
            return Err(TaskError::InvalidArgument(format!("source {:?} is not a repository reference", p.source)));
        }
        if p.message.trim().is_empty() {
            return Err(TaskError::InvalidArgument("commit message must not be empty".into()));
        }
        let dest = ctx.confine(&p.dest)?;
        ensure_absent(&dest)?;

        let head = bounded(timeout, ctx.collab.vcs.clone_and_commit(&p.source, dest.as_path(), &p.message)).await?;
        info!(source = %p.source, dest = %dest, head = %head, "cloned");
        Ok(json!({"dest": dest.to_string(), "head": head}))
    }
}
