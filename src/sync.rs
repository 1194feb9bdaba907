//! Sync Engine - Orchestrates parallel repository mirroring
//!
//! Discovery runs first and strictly sequentially: the full repository set
//! must be known before anything is dispatched. The filtered set is then
//! handed to a bounded pool of tasks, each running one clone or pull, whose
//! results flow back over a channel to a single collector.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::bitbucket::{RepositoryCatalog, RepositoryRef};
use crate::config::{Config, FilterConfig};
use crate::git::{GitClient, SyncResult};

/// Results from a complete sync operation
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub total_repositories: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub duration: Duration,
    pub results: Vec<SyncResult>,
}

impl SyncSummary {
    fn compile(results: Vec<SyncResult>, duration: Duration) -> Self {
        let successful_operations = results.iter().filter(|r| r.success).count();

        SyncSummary {
            total_repositories: results.len(),
            successful_operations,
            failed_operations: results.len() - successful_operations,
            duration,
            results,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &SyncResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

/// Keep repositories whose owner passes the include/exclude lists.
///
/// Exclusion always wins. A non-empty include list keeps only its owners.
pub fn apply_filters(
    repositories: Vec<RepositoryRef>,
    include_owners: &[String],
    exclude_owners: &[String],
) -> Vec<RepositoryRef> {
    if repositories.is_empty() || (include_owners.is_empty() && exclude_owners.is_empty()) {
        return repositories;
    }

    repositories
        .into_iter()
        .filter(|repo| {
            if exclude_owners.contains(&repo.owner) {
                debug!("Excluding {} (owner {})", repo.clone_url, repo.owner);
                return false;
            }
            include_owners.is_empty() || include_owners.contains(&repo.owner)
        })
        .collect()
}

/// Mirrors a set of repositories with bounded concurrency
#[derive(Clone)]
pub struct SyncEngine {
    git_client: GitClient,
    max_parallel: usize,
}

impl SyncEngine {
    pub fn new(git_client: GitClient, max_parallel: usize) -> Self {
        Self {
            git_client,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(GitClient::from_config(config), config.worker_count())
    }

    /// Filter the repositories and clone or pull each of them.
    ///
    /// Results are returned in completion order once every dispatched
    /// repository has finished.
    pub async fn run(
        &self,
        destination: &Path,
        repositories: impl IntoIterator<Item = RepositoryRef>,
        include_owners: &[String],
        exclude_owners: &[String],
    ) -> Vec<SyncResult> {
        // Identity is (owner, clone_url); dedup before dispatch so no two
        // workers ever target the same project directory.
        let unique: BTreeSet<RepositoryRef> = repositories.into_iter().collect();
        let selected = apply_filters(unique.into_iter().collect(), include_owners, exclude_owners);

        info!(
            "Syncing {} repositories into {} with {} workers",
            selected.len(),
            destination.display(),
            self.max_parallel
        );

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let (sender, mut receiver) = mpsc::channel::<SyncResult>(self.max_parallel);
        let destination: Arc<PathBuf> = Arc::new(destination.to_path_buf());
        let mut handles = Vec::with_capacity(selected.len());

        for repo in selected {
            let semaphore = semaphore.clone();
            let sender = sender.clone();
            let git_client = self.git_client.clone();
            let destination = destination.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };

                let result = git_client.handle_repo(&destination, &repo).await;
                if sender.send(result).await.is_err() {
                    warn!("Result collector closed before {} finished", repo.clone_url);
                }
            }));
        }

        // Only the workers hold senders now; the channel closes when the last one finishes
        drop(sender);

        let mut results = Vec::with_capacity(handles.len());
        while let Some(result) = receiver.recv().await {
            report(&result);
            results.push(result);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Sync worker panicked: {}", e);
            }
        }

        results
    }

    /// Discover every repository the consumer can see and mirror them all
    pub async fn run_sync(
        &self,
        catalog: &RepositoryCatalog,
        destination: &Path,
        filters: &FilterConfig,
    ) -> Result<SyncSummary> {
        let start_time = Instant::now();

        info!("Starting repository synchronization");

        let repositories = discover_repositories(catalog)
            .await
            .context("Failed to discover repositories")?;

        let results = self
            .run(
                destination,
                repositories,
                &filters.include_owners,
                &filters.exclude_owners,
            )
            .await;

        let summary = SyncSummary::compile(results, start_time.elapsed());

        info!(
            "Sync completed in {:.2}s: {} successful, {} failed",
            summary.duration.as_secs_f64(),
            summary.successful_operations,
            summary.failed_operations
        );

        Ok(summary)
    }
}

/// The user's own repositories plus those of every team they belong to
pub async fn discover_repositories(catalog: &RepositoryCatalog) -> Result<BTreeSet<RepositoryRef>> {
    let username = catalog
        .get_current_username()
        .await
        .context("Failed to get current user")?;
    let teams = catalog
        .get_member_teams()
        .await
        .context("Failed to list teams")?;

    let repositories = catalog
        .get_repositories(&username, &teams)
        .await
        .context("Failed to list repositories")?;

    info!("Discovered {} repositories", repositories.len());
    Ok(repositories)
}

fn report(result: &SyncResult) {
    if result.success {
        info!(
            owner = %result.owner,
            exit_code = result.exit_code,
            "{:?} {} -> {}",
            result.operation,
            result.clone_url,
            result.local_path.display()
        );
    } else {
        error!(
            owner = %result.owner,
            exit_code = result.exit_code,
            "{:?} {} failed: {}",
            result.operation,
            result.clone_url,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::SyncOperation;
    use quickcheck_macros::quickcheck;

    fn repos(pairs: &[(&str, &str)]) -> Vec<RepositoryRef> {
        pairs
            .iter()
            .map(|(owner, url)| RepositoryRef::new(*owner, *url))
            .collect()
    }

    fn owners(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn result(success: bool) -> SyncResult {
        SyncResult {
            owner: "alice".to_string(),
            clone_url: "git@host:alice/x.git".to_string(),
            local_path: "/tmp/alice/x".into(),
            operation: SyncOperation::Clone,
            success,
            exit_code: if success { 0 } else { 128 },
            error: None,
        }
    }

    #[test]
    fn test_filters_without_lists_are_identity() {
        let input = repos(&[("alice", "git@host:alice/x.git"), ("acme", "git@host:acme/y.git")]);
        assert_eq!(apply_filters(input.clone(), &[], &[]), input);
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let input = repos(&[("A", "git@host:A/x.git"), ("B", "git@host:B/y.git")]);
        assert!(apply_filters(input, &owners(&["A"]), &owners(&["A"])).is_empty());
    }

    #[test]
    fn test_exclude_drops_only_that_owner() {
        let input = repos(&[
            ("A", "git@host:A/x.git"),
            ("B", "git@host:B/y.git"),
            ("C", "git@host:C/z.git"),
            ("B", "git@host:B/w.git"),
        ]);

        let filtered = apply_filters(input, &[], &owners(&["B"]));

        assert_eq!(
            filtered,
            repos(&[("A", "git@host:A/x.git"), ("C", "git@host:C/z.git")])
        );
    }

    #[test]
    fn test_include_keeps_only_listed_owners() {
        let input = repos(&[("A", "git@host:A/x.git"), ("B", "git@host:B/y.git")]);
        let filtered = apply_filters(input, &owners(&["B", "Z"]), &[]);
        assert_eq!(filtered, repos(&[("B", "git@host:B/y.git")]));
    }

    #[test]
    fn test_filters_on_empty_input() {
        assert!(apply_filters(Vec::new(), &owners(&["A"]), &owners(&["B"])).is_empty());
    }

    #[quickcheck]
    fn prop_empty_filters_are_identity(pairs: Vec<(String, String)>) -> bool {
        let input: Vec<RepositoryRef> = pairs
            .into_iter()
            .map(|(owner, url)| RepositoryRef::new(owner, url))
            .collect();
        apply_filters(input.clone(), &[], &[]) == input
    }

    #[quickcheck]
    fn prop_excluded_owner_never_survives(pairs: Vec<(String, String)>, excluded: String) -> bool {
        let input: Vec<RepositoryRef> = pairs
            .into_iter()
            .map(|(owner, url)| RepositoryRef::new(owner, url))
            .collect();
        let kept_elsewhere = input.iter().filter(|r| r.owner != excluded).count();
        let exclude = vec![excluded.clone()];

        let filtered = apply_filters(input, &[], &exclude);
        filtered.iter().all(|r| r.owner != excluded) && filtered.len() == kept_elsewhere
    }

    #[test]
    fn test_sync_summary_calculation() {
        let results = vec![result(true), result(false), result(true)];
        let duration = Duration::from_secs(60);

        let summary = SyncSummary::compile(results, duration);

        assert_eq!(summary.total_repositories, 3);
        assert_eq!(summary.successful_operations, 2);
        assert_eq!(summary.failed_operations, 1);
        assert_eq!(summary.failures().count(), 1);
        assert_eq!(summary.duration, duration);
    }

    #[test]
    fn test_engine_never_has_zero_workers() {
        let engine = SyncEngine::new(GitClient::new("git"), 0);
        assert_eq!(engine.max_parallel, 1);
    }

    #[tokio::test]
    async fn test_run_with_nothing_to_do() {
        let engine = SyncEngine::new(GitClient::new("git"), 2);
        let results = engine
            .run(Path::new("/nonexistent"), Vec::new(), &[], &[])
            .await;
        assert!(results.is_empty());
    }
}
