use super::{bounded, parse_args, require_file, TaskContext};
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
struct TranscribeParams {
    #[serde(alias = "audio_path")]
    audio: String,
}

pub struct Transcribe;

#[async_trait]
impl Task for Transcribe {
    fn name(&self) -> &'static str { "transcribe" }
    fn capabilities(&self) -> Value {
        json!({"input": {"type":"object","required":["audio"],"properties":{"audio":{"type":"string"}}}, "output": {"type":"object","properties":{"text":{"type":"string"}}}})
    }
    async fn run(&self, ctx: &TaskContext, args: Value, timeout: Duration) -> TaskResult {
        let p: TranscribeParams = parse_args(args)?;
        let audio = ctx.confine(&p.audio)?;
        require_file(&audio).await?;

        let bytes = tokio::fs::read(audio.as_path()).await.map_err(|e| TaskError::internal(format!("{audio}: {e}")))?;
        let file_name = audio
            .as_path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let text = bounded(timeout, ctx.collab.transcriber.transcribe(&file_name, bytes)).await?;
        Ok(json!({"text": text}))
    }
}
