use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub root: Root,
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub git: Git,
    #[serde(default)]
    pub transcribe: Transcribe,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Root { pub root_dir: PathBuf }

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_base_path")]
    pub base_path: String,
}
fn default_bind_addr() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8700 }
fn default_base_path() -> String { "/tasks".to_string() }

impl Default for Server {
    fn default() -> Self {
        Self { bind_addr: default_bind_addr(), port: default_port(), base_path: default_base_path() }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Auth {
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Limits {
    #[serde(default = "default_task_timeout_s")]
    pub task_timeout_s: u64,
    #[serde(default = "default_max_request_kb")]
    pub max_request_kb: usize,
    #[serde(default = "default_rate_per_sec")]
    pub rate_per_sec: u32,
    #[serde(default = "default_rate_burst")]
    pub rate_burst: u32,
}
fn default_task_timeout_s() -> u64 { 30 }
fn default_max_request_kb() -> usize { 256 }
fn default_rate_per_sec() -> u32 { 20 }
fn default_rate_burst() -> u32 { 40 }

impl Default for Limits {
    fn default() -> Self {
        Self {
            task_timeout_s: default_task_timeout_s(),
            max_request_kb: default_max_request_kb(),
            rate_per_sec: default_rate_per_sec(),
            rate_burst: default_rate_burst(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Network {
    /// Hosts fetch/scrape may contact. Empty allows any host.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}
fn default_user_agent() -> String { concat!("warden/", env!("CARGO_PKG_VERSION")).to_string() }

impl Default for Network {
    fn default() -> Self { Self { allowed_hosts: Vec::new(), user_agent: default_user_agent() } }
}

impl Network {
    /// Only http(s) URLs to allowed hosts may be contacted, redirect targets included.
    pub fn permits(&self, url: &reqwest::Url) -> Result<(), String> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("url scheme {} is not allowed", url.scheme()));
        }
        if !self.allowed_hosts.is_empty() {
            let host = url.host_str().unwrap_or("");
            if !self.allowed_hosts.iter().any(|h| h.eq_ignore_ascii_case(host)) {
                return Err(format!("host {host} is not in allowed_hosts"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Git {
    #[serde(default = "default_git_program")]
    pub program: String,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
}
fn default_git_program() -> String { "git".to_string() }
fn default_author_name() -> String { "warden".to_string() }
fn default_author_email() -> String { "warden@localhost".to_string() }

impl Default for Git {
    fn default() -> Self {
        Self { program: default_git_program(), author_name: default_author_name(), author_email: default_author_email() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Transcribe {
    #[serde(default = "default_transcribe_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_transcribe_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}
fn default_transcribe_endpoint() -> String { "https://api.openai.com/v1/audio/transcriptions".to_string() }
fn default_transcribe_model() -> String { "whisper-1".to_string() }
fn default_api_key_env() -> String { "OPENAI_API_KEY".to_string() }

impl Default for Transcribe {
    fn default() -> Self {
        Self { endpoint: default_transcribe_endpoint(), model: default_transcribe_model(), api_key_env: default_api_key_env() }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            Ok(serde_json::from_str(&raw)?)
        } else {
            Ok(toml::from_str(&raw)?)
        }
    }

    /// Minimal configuration rooted at `root_dir`, everything else defaulted.
    #[cfg(test)]
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: Root { root_dir: root_dir.into() },
            server: Server::default(),
            auth: Auth::default(),
            limits: Limits::default(),
            network: Network::default(),
            git: Git::default(),
            transcribe: Transcribe::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.root.root_dir.is_absolute() {
            anyhow::bail!("root_dir must be an absolute path: {}", self.root.root_dir.display());
        }
        if !self.root.root_dir.is_dir() {
            anyhow::bail!("root_dir does not exist or is not a directory: {}", self.root.root_dir.display());
        }
        if let Some(token) = &self.auth.bearer_token {
            if token.trim().is_empty() { anyhow::bail!("bearer_token must not be empty when set"); }
        }
        if !self.server.base_path.starts_with('/') { anyhow::bail!("base_path must start with '/'"); }
        if self.limits.task_timeout_s == 0 { anyhow::bail!("task_timeout_s must be > 0"); }
        if self.limits.max_request_kb == 0 { anyhow::bail!("max_request_kb must be > 0"); }
        if self.limits.rate_per_sec == 0 { anyhow::bail!("rate_per_sec must be > 0"); }
        if self.limits.rate_burst == 0 { anyhow::bail!("rate_burst must be > 0"); }
        if self.transcribe.model.trim().is_empty() { anyhow::bail!("transcribe.model must not be empty"); }
        Ok(())
    }
}

/// Resolves the configured git program to an absolute executable.
pub fn resolve_program(program: &str) -> anyhow::Result<PathBuf> {
    let path = if program.contains('/') { PathBuf::from(program) } else { which::which(program)? };
    Ok(dunce::canonicalize(path)?)
}

pub fn canonical_root(root: &Path) -> anyhow::Result<PathBuf> {
    let c = dunce::canonicalize(root)?;
    Ok(c)
}
