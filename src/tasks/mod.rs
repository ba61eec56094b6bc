pub mod clone;
pub mod convert;
pub mod fetch;
pub mod filter;
pub mod guard;
pub mod query;
pub mod transcribe;

use crate::{
    collab::Collaborators,
    config::{canonical_root, Config},
    errors::TaskError,
};
use guard::{ConfinedPath, PathGuard};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::io::AsyncWriteExt;

/// Process-wide, read-only state every task runs against.
pub struct TaskContext {
    pub cfg: Arc<Config>,
    pub guard: PathGuard,
    pub collab: Collaborators,
}

impl TaskContext {
    pub fn new(cfg: Arc<Config>, collab: Collaborators) -> anyhow::Result<Self> {
        let root = canonical_root(&cfg.root.root_dir)?;
        Ok(Self { cfg, guard: PathGuard::new(root), collab })
    }

    pub fn confine(&self, candidate: &str) -> Result<ConfinedPath, TaskError> {
        self.guard.confine(candidate)
    }

    /// Caller-requested timeout, capped at the configured limit.
    pub fn timeout_for(&self, requested_s: Option<u64>) -> Duration {
        let max = self.cfg.limits.task_timeout_s;
        Duration::from_secs(requested_s.map(|t| t.clamp(1, max)).unwrap_or(max))
    }

    /// Only http(s) URLs to allowed hosts may be contacted.
    pub fn check_url(&self, raw: &str) -> Result<Url, TaskError> {
        let url = Url::parse(raw).map_err(|e| TaskError::InvalidArgument(format!("url {raw:?}: {e}")))?;
        self.cfg.network.permits(&url).map_err(TaskError::InvalidArgument)?;
        Ok(url)
    }
}

/// Validates raw arguments against a task's parameter type.
pub fn parse_args<P: DeserializeOwned>(args: Value) -> Result<P, TaskError> {
    let args = if args.is_null() { Value::Object(Default::default()) } else { args };
    serde_json::from_value(args).map_err(|e| TaskError::InvalidArgument(e.to_string()))
}

/// Runs one external effect under `limit`; dropping the future on expiry
/// releases whatever the collaborator holds.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, TaskError>
where
    F: Future<Output = Result<T, TaskError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(r) => r,
        Err(_) => Err(TaskError::Timeout(limit)),
    }
}

/// Creates `path` exclusively and writes `data`; never truncates existing output.
pub async fn write_new(path: &ConfinedPath, data: &[u8]) -> Result<usize, TaskError> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path.as_path())
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => TaskError::AlreadyExists(path.to_string()),
            _ => TaskError::internal(format!("{path}: {e}")),
        })?;
    file.write_all(data).await.map_err(|e| TaskError::internal(format!("{path}: {e}")))?;
    file.flush().await.map_err(|e| TaskError::internal(format!("{path}: {e}")))?;
    Ok(data.len())
}

/// Input arguments must name an existing regular file.
pub async fn require_file(path: &ConfinedPath) -> Result<(), TaskError> {
    match tokio::fs::metadata(path.as_path()).await {
        Ok(m) if m.is_file() => Ok(()),
        Ok(_) => Err(TaskError::InvalidArgument(format!("{path} is not a file"))),
        Err(_) => Err(TaskError::InvalidArgument(format!("{path} does not exist"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Params {
        name: String,
        #[serde(default)]
        count: Option<u32>,
    }

    #[test]
    fn parse_args_rejects_missing_unknown_and_mistyped_fields() {
        let ok: Params = parse_args(serde_json::json!({"name": "x", "count": 2})).unwrap();
        assert_eq!((ok.name.as_str(), ok.count), ("x", Some(2)));
        for bad in [
            serde_json::json!({}),
            serde_json::json!({"name": "x", "extra": 1}),
            serde_json::json!({"name": 5}),
            Value::Null,
        ] {
            assert_eq!(parse_args::<Params>(bad).unwrap_err().code(), "InvalidArgument");
        }
    }

    #[test]
    fn timeout_is_capped_by_config() {
        let (_dir, ctx, _fakes) = support::context();
        assert_eq!(ctx.timeout_for(None), Duration::from_secs(5));
        assert_eq!(ctx.timeout_for(Some(2)), Duration::from_secs(2));
        assert_eq!(ctx.timeout_for(Some(600)), Duration::from_secs(5));
    }

    #[test]
    fn urls_are_limited_to_http_and_allowed_hosts() {
        let (_dir, mut ctx, _fakes) = support::context();
        assert!(ctx.check_url("https://example.com/x").is_ok());
        assert_eq!(ctx.check_url("file:///etc/passwd").unwrap_err().code(), "InvalidArgument");
        assert_eq!(ctx.check_url("not a url").unwrap_err().code(), "InvalidArgument");

        let mut cfg = (*ctx.cfg).clone();
        cfg.network.allowed_hosts = vec!["api.example.com".into()];
        ctx.cfg = Arc::new(cfg);
        assert!(ctx.check_url("https://API.example.com/v1").is_ok());
        assert_eq!(ctx.check_url("https://evil.example.com/").unwrap_err().code(), "InvalidArgument");
    }

    #[tokio::test]
    async fn bounded_turns_expiry_into_timeout() {
        let err = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, TaskError>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.code(), "Timeout");
    }

    #[tokio::test]
    async fn write_new_never_clobbers() {
        let (_dir, ctx, _fakes) = support::context();
        let path = ctx.confine("out.txt").unwrap();
        assert_eq!(write_new(&path, b"one").await.unwrap(), 3);
        assert_eq!(write_new(&path, b"two").await.unwrap_err().code(), "AlreadyExists");
        assert_eq!(std::fs::read_to_string(path.as_path()).unwrap(), "one");
    }
}
