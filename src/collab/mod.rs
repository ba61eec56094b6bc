//! External capabilities the tasks delegate to. Each sits behind a trait so a
//! task only ever sees the boundary, never the concrete client or engine.

pub mod git;
pub mod http;
pub mod markdown;
pub mod sql;
pub mod tabular;

use crate::{config::Config, errors::TaskError};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::{path::Path, sync::Arc, time::Duration};

pub type Record = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url`. Any non-2xx status is an error.
    async fn get(&self, url: &str) -> Result<FetchedBody, TaskError>;
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Clones `source` into `dest` (which must not exist) and records an empty commit.
    async fn clone_and_commit(&self, source: &str, dest: &Path, message: &str) -> Result<String, TaskError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn query(&self, db: &Path, sql: &str) -> Result<QueryRows, TaskError>;
}

pub trait Renderer: Send + Sync {
    fn render(&self, source: &str) -> String;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, file_name: &str, audio: Vec<u8>) -> Result<String, TaskError>;
}

pub trait TabularFilter: Send + Sync {
    fn filter(&self, input: &Path, column: &str, value: &Value) -> Result<Vec<Record>, TaskError>;
}

/// The full set of collaborators handed to tasks through the context.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub vcs: Arc<dyn VersionControl>,
    pub query: Arc<dyn QueryEngine>,
    pub renderer: Arc<dyn Renderer>,
    pub transcriber: Arc<dyn Transcriber>,
    pub tabular: Arc<dyn TabularFilter>,
}

impl Collaborators {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.network.user_agent.clone())
            .connect_timeout(Duration::from_secs(cfg.limits.task_timeout_s))
            .build()?;
        Ok(Self {
            fetcher: Arc::new(http::HttpFetcher::new(http::fetch_client(cfg)?)),
            vcs: Arc::new(git::SystemGit::new(&cfg.git)),
            query: Arc::new(sql::SqlEngine),
            renderer: Arc::new(markdown::MarkdownRenderer),
            transcriber: Arc::new(http::HttpTranscriber::new(client, &cfg.transcribe)),
            tabular: Arc::new(tabular::CsvFilter),
        })
    }
}
