use super::VersionControl;
use crate::{config, errors::TaskError};
use async_trait::async_trait;
use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::process::Command;
use tracing::{debug, warn};

/// Drives the system git binary. Every value is passed as its own argv entry.
pub struct SystemGit {
    program: PathBuf,
    author_name: String,
    author_email: String,
}

impl SystemGit {
    pub fn new(cfg: &config::Git) -> Self {
        let program = match config::resolve_program(&cfg.program) {
            Ok(p) => p,
            Err(e) => {
                warn!(program = %cfg.program, error = %e, "git not resolved at start-up; will try PATH at call time");
                PathBuf::from(&cfg.program)
            }
        };
        Self { program, author_name: cfg.author_name.clone(), author_email: cfg.author_email.clone() }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .arg("-c")
            .arg(format!("user.name={}", self.author_name))
            .arg("-c")
            .arg(format!("user.email={}", self.author_email))
            .arg("-c")
            .arg("commit.gpgsign=false")
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn run<I, S>(&self, op: &str, args: I) -> Result<String, TaskError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self
            .command(args)
            .output()
            .await
            .map_err(|e| TaskError::ExternalService(format!("failed to spawn {}: {e}", self.program.display())))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TaskError::ExternalService(format!(
                "git {op} exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        debug!(op, "git ok");
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Removes a destination this call created unless disarmed. Runs on every exit,
/// including the future being dropped at a timeout.
struct PartialClone<'a> {
    dest: &'a Path,
    armed: bool,
}

impl Drop for PartialClone<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_dir_all(self.dest) {
            Ok(()) => debug!(dest = %self.dest.display(), "removed partial clone"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dest = %self.dest.display(), error = %e, "failed to remove partial clone"),
        }
    }
}

#[async_trait]
impl VersionControl for SystemGit {
    async fn clone_and_commit(&self, source: &str, dest: &Path, message: &str) -> Result<String, TaskError> {
        if dest.symlink_metadata().is_ok() {
            return Err(TaskError::AlreadyExists(dest.display().to_string()));
        }
        let mut partial = PartialClone { dest, armed: true };

        self.run("clone", [OsStr::new("clone"), OsStr::new("--"), OsStr::new(source), dest.as_os_str()])
            .await?;
        self.run("commit", [OsStr::new("-C"), dest.as_os_str(), OsStr::new("commit"), OsStr::new("--allow-empty"), OsStr::new("-m"), OsStr::new(message)])
            .await?;
        let head = self.run("rev-parse", [OsStr::new("-C"), dest.as_os_str(), OsStr::new("rev-parse"), OsStr::new("HEAD")]).await?;

        partial.armed = false;
        Ok(head)
    }
}
