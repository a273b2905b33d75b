//! Git transport: shallow clones for fetch, fast-forward pulls for refresh.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use url::Url;

use vulcan_core::config::FetchSettings;
use vulcan_core::error::AppError;

use crate::fetcher::ResourceFetcher;

const SERVICE: &str = "source-host";

/// Refresh failures only a rebuild can reconcile: the local and remote
/// histories no longer share a fast-forwardable relationship.
const DIVERGENCE_PATTERNS: &[&str] = &[
    "non-fast-forward",
    "not possible to fast-forward",
    "divergent branches",
    "have diverged",
    "unrelated histories",
    "would be overwritten",
];

/// Failure text indicating a transient transport problem rather than a
/// permanent state of the remote. These retry; other command failures
/// fail fast.
const TRANSIENT_PATTERNS: &[&str] = &[
    "could not resolve host",
    "failed to connect",
    "connection timed out",
    "connection reset",
    "operation timed out",
    "early eof",
    "rpc failed",
    "remote end hung up",
];

/// Fetcher for git-hosted repositories.
///
/// Fetch-new is a `--depth 1` clone; refresh is a `--ff-only` pull so a
/// rewritten upstream surfaces as a classified divergence instead of a
/// silent merge.
pub struct GitFetcher {
    clone_timeout: Duration,
    refresh_timeout: Duration,
}

impl GitFetcher {
    pub fn new(settings: &FetchSettings) -> Self {
        Self {
            clone_timeout: settings.clone_timeout(),
            refresh_timeout: settings.refresh_timeout(),
        }
    }
}

#[async_trait]
impl ResourceFetcher for GitFetcher {
    fn service(&self) -> &str {
        SERVICE
    }

    async fn fetch(&self, identity: &str, dest: &Path) -> Result<(), AppError> {
        Url::parse(identity).map_err(|_| AppError::InvalidUrl(identity.to_string()))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!(url = identity, dest = %dest.display(), "cloning repository");
        let mut cmd = git_command();
        cmd.arg("clone")
            .arg("--depth")
            .arg("1")
            .arg(identity)
            .arg(dest);
        run_with_timeout(cmd, self.clone_timeout).await
    }

    async fn refresh(&self, identity: &str, dest: &Path) -> Result<(), AppError> {
        debug!(url = identity, dest = %dest.display(), "pulling repository");
        let mut cmd = git_command();
        cmd.arg("-C").arg(dest).arg("pull").arg("--ff-only");
        run_with_timeout(cmd, self.refresh_timeout).await
    }

    fn is_recoverable_divergence(&self, error: &AppError) -> bool {
        match error {
            AppError::CommandFailed(stderr) => {
                let lowered = stderr.to_lowercase();
                DIVERGENCE_PATTERNS.iter().any(|p| lowered.contains(p))
            }
            _ => false,
        }
    }
}

fn git_command() -> Command {
    let mut cmd = Command::new("git");
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Runs a prepared git command, bounding it with `timeout`.
///
/// Dropping the returned future kills the child process, so a cancelled
/// sync never leaves a clone running in the background.
async fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<(), AppError> {
    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::Configuration("git executable not found; install git".to_string())
        } else {
            AppError::Filesystem(e)
        }
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(AppError::Filesystem(e)),
        Err(_) => return Err(AppError::Timeout(timeout.as_secs())),
    };

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(classify_failure(stderr.trim()))
}

/// Turns nonzero-exit stderr into the right error class.
fn classify_failure(stderr: &str) -> AppError {
    let lowered = stderr.to_lowercase();
    if TRANSIENT_PATTERNS.iter().any(|p| lowered.contains(p)) {
        AppError::Network(stderr.to_string())
    } else {
        AppError::CommandFailed(stderr.to_string())
    }
}
