//! bitbucket-mirror - Mirror every repository a Bitbucket account can reach
//!
//! Clones new repositories and pulls existing ones for the authenticated user
//! and every team they are a member of, into `destination/<owner>/<project>`.
//!
//! ## Modules
//!
//! - [`auth`]: OAuth2 client-credentials token lifecycle
//! - [`bitbucket`]: Paginated repository listing for users and teams
//! - [`git`]: Per-repository clone-or-pull
//! - [`sync`]: Owner filtering and bounded parallel dispatch
//! - [`config`]: YAML configuration with XDG compliance

pub mod auth;
pub mod bitbucket;
pub mod config;
pub mod error;
pub mod git;
pub mod sync;

pub use auth::{Credential, TokenManager};
pub use bitbucket::{RepositoryCatalog, RepositoryRef};
pub use config::Config;
pub use error::MirrorError;
pub use git::{GitClient, SyncOperation, SyncResult};
pub use sync::{apply_filters, SyncEngine, SyncSummary};
