use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

use crate::bitbucket::RepositoryRef;
use crate::config::Config;

/// Mode for newly created owner directories
#[cfg(unix)]
const OWNER_DIR_MODE: u32 = 0o744;

/// Exit code reported when the process never produced one
const NO_EXIT_CODE: i32 = -1;

/// ssh invocation that fails instead of prompting for host keys or passphrases
const BATCH_SSH_COMMAND: &str = "ssh -o BatchMode=yes";

/// Which git operation was attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    Clone,
    Pull,
}

/// Outcome of mirroring a single repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub owner: String,
    pub clone_url: String,
    pub local_path: PathBuf,
    pub operation: SyncOperation,
    pub success: bool,
    pub exit_code: i32,
    /// stderr of a failed git run, or why git could not be run at all
    pub error: Option<String>,
}

/// Runs git clone/pull for one repository at a time
#[derive(Clone)]
pub struct GitClient {
    git_binary: Arc<str>,
    timeout: Option<Duration>,
}

impl GitClient {
    pub fn new(git_binary: impl AsRef<str>) -> Self {
        Self {
            git_binary: Arc::from(git_binary.as_ref()),
            timeout: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.sync.git_binary).with_timeout(config.sync_timeout())
    }

    /// Abort a clone/pull that runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory a repository is mirrored into
    pub fn project_directory(destination: &Path, repo: &RepositoryRef) -> Result<PathBuf> {
        let project_name = repo
            .project_name()
            .ok_or_else(|| anyhow!("Cannot derive a project name from {}", repo.clone_url))?;

        Ok(destination.join(&repo.owner).join(project_name))
    }

    /// Clone the repository if it is not present yet, pull it otherwise.
    ///
    /// Never fails: problems running git are reported as an unsuccessful
    /// [`SyncResult`] so one repository cannot abort the whole run.
    pub async fn handle_repo(&self, destination: &Path, repo: &RepositoryRef) -> SyncResult {
        let owner_dir = destination.join(&repo.owner);
        let local_path = match Self::project_directory(destination, repo) {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping {}: {}", repo.clone_url, e);
                return self.failure(repo, owner_dir, SyncOperation::Clone, e);
            }
        };

        let operation = if local_path.exists() {
            SyncOperation::Pull
        } else {
            SyncOperation::Clone
        };

        match self.run_operation(&owner_dir, &local_path, repo, operation).await {
            Ok((status, stderr)) => {
                let exit_code = exit_code(&status);
                let success = status.success();

                if success {
                    info!(
                        "{:?} succeeded: {} -> {}",
                        operation,
                        repo.clone_url,
                        local_path.display()
                    );
                } else {
                    warn!(
                        "{:?} of {} failed with exit code {}: {}",
                        operation,
                        repo.clone_url,
                        exit_code,
                        stderr.trim()
                    );
                }

                SyncResult {
                    owner: repo.owner.clone(),
                    clone_url: repo.clone_url.clone(),
                    local_path,
                    operation,
                    success,
                    exit_code,
                    error: (!success).then(|| stderr.trim().to_string()),
                }
            }
            Err(e) => {
                warn!("{:?} of {} could not run: {:#}", operation, repo.clone_url, e);
                self.failure(repo, local_path, operation, e)
            }
        }
    }

    async fn run_operation(
        &self,
        owner_dir: &Path,
        project_dir: &Path,
        repo: &RepositoryRef,
        operation: SyncOperation,
    ) -> Result<(ExitStatus, String)> {
        let mut command = AsyncCommand::new(self.git_binary.as_ref());

        match operation {
            SyncOperation::Pull => {
                debug!("Pulling {} in {}", repo.clone_url, project_dir.display());
                command
                    .arg("-C")
                    .arg(project_dir)
                    .args(["pull", "--recurse-submodules=yes"]);
            }
            SyncOperation::Clone => {
                ensure_owner_directory(owner_dir).await?;
                debug!("Cloning {} into {}", repo.clone_url, owner_dir.display());
                command
                    .arg("-C")
                    .arg(owner_dir)
                    .args(["clone", "--recursive"])
                    .arg(&repo.clone_url);
            }
        }

        // ssh prompts on the tty, not stdin
        command.env("GIT_TERMINAL_PROMPT", "0");
        if std::env::var_os("GIT_SSH_COMMAND").is_none() && std::env::var_os("GIT_SSH").is_none() {
            command.env("GIT_SSH_COMMAND", BATCH_SSH_COMMAND);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.git_binary))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| anyhow!("Operation timed out after {}s", limit.as_secs()))?,
            None => child.wait_with_output().await,
        }
        .with_context(|| format!("Failed to wait for {}", self.git_binary))?;

        Ok((
            output.status,
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }

    fn failure(
        &self,
        repo: &RepositoryRef,
        local_path: PathBuf,
        operation: SyncOperation,
        error: anyhow::Error,
    ) -> SyncResult {
        SyncResult {
            owner: repo.owner.clone(),
            clone_url: repo.clone_url.clone(),
            local_path,
            operation,
            success: false,
            exit_code: NO_EXIT_CODE,
            error: Some(format!("{:#}", error)),
        }
    }
}

/// Create the owner directory; another worker may have created it already
async fn ensure_owner_directory(owner_dir: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(OWNER_DIR_MODE);

    builder
        .create(owner_dir)
        .await
        .with_context(|| format!("Failed to create owner directory {}", owner_dir.display()))
}

/// Process exit code; signal terminations map to the negated signal number
fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    NO_EXIT_CODE
}
