use super::{FetchedBody, Fetcher, Transcriber};
use crate::{config, errors::TaskError};
use async_trait::async_trait;
use reqwest::{multipart, redirect, Client};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_REDIRECTS: usize = 10;

/// Client for fetch/scrape. Every redirect hop passes the same host check as
/// the first URL.
pub fn fetch_client(cfg: &config::Config) -> reqwest::Result<Client> {
    let network = cfg.network.clone();
    let policy = redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("more than {MAX_REDIRECTS} redirects"));
        }
        match network.permits(attempt.url()) {
            Ok(()) => attempt.follow(),
            Err(reason) => {
                warn!(target_url = %attempt.url(), reason = %reason, "redirect refused");
                attempt.error(format!("redirect refused: {reason}"))
            }
        }
    });
    Client::builder()
        .user_agent(cfg.network.user_agent.clone())
        .connect_timeout(Duration::from_secs(cfg.limits.task_timeout_s))
        .redirect(policy)
        .build()
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<FetchedBody, TaskError> {
        let resp = self.client.get(url).send().await.map_err(TaskError::external)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TaskError::ExternalService(format!("GET {url} returned {status}")));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await.map_err(TaskError::external)?;
        debug!(url, status = status.as_u16(), len = bytes.len(), "fetched");
        Ok(FetchedBody { content_type, bytes })
    }
}

pub struct HttpTranscriber {
    client: Client,
    endpoint: String,
    model: String,
    api_key_env: String,
}

impl HttpTranscriber {
    pub fn new(client: Client, cfg: &config::Transcribe) -> Self {
        Self {
            client,
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            api_key_env: cfg.api_key_env.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, file_name: &str, audio: Vec<u8>) -> Result<String, TaskError> {
        let part = multipart::Part::bytes(audio).file_name(file_name.to_string());
        let form = multipart::Form::new().text("model", self.model.clone()).part("file", part);
        let mut req = self.client.post(&self.endpoint).multipart(form);
        // a missing key is left to the service to reject; local endpoints often need none
        if let Ok(key) = std::env::var(&self.api_key_env) {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(TaskError::external)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TaskError::ExternalService(format!("transcription returned {status}: {body}")));
        }
        let parsed: TranscriptionResponse = resp.json().await.map_err(TaskError::external)?;
        Ok(parsed.text)
    }
}
