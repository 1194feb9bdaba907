use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info, warn};

use crate::auth::TokenManager;
use crate::config::Config;
use crate::error::{MirrorError, Result};

/// One decoded response from a paginated listing endpoint
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    /// Items per page
    pub pagelen: u64,
    /// Item count reported by the server; required since it drives pagination
    pub size: u64,
    #[serde(default = "Vec::new")]
    pub values: Vec<T>,
    /// Link to the next page, absent on the last one
    #[serde(default)]
    pub next: Option<String>,
}

impl<T> Page<T> {
    /// Only a full page with a `next` link is followed; a stale link on an
    /// under-full page is ignored.
    pub fn next_page(&self) -> Option<&str> {
        if self.size >= self.pagelen {
            self.next.as_deref()
        } else {
            None
        }
    }
}

/// Version control system reported for a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsKind {
    Git,
    Other,
}

impl VcsKind {
    pub fn from_scm(scm: &str) -> Self {
        if scm == "git" {
            VcsKind::Git
        } else {
            VcsKind::Other
        }
    }
}

/// Repository entry as returned in a listing page
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryRecord {
    pub scm: String,
    #[serde(default)]
    pub links: RepositoryLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryLinks {
    /// Clone-link variants keyed by name ("ssh", "https")
    #[serde(default, deserialize_with = "deserialize_clone_links")]
    pub clone: BTreeMap<String, String>,
}

fn deserialize_clone_links<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct CloneLink {
        name: String,
        href: String,
    }

    let links = Vec::<CloneLink>::deserialize(deserializer)?;
    Ok(links.into_iter().map(|l| (l.name, l.href)).collect())
}

impl RepositoryRecord {
    pub fn vcs_kind(&self) -> VcsKind {
        VcsKind::from_scm(&self.scm)
    }

    /// The ssh clone URL, only for git repositories
    pub fn ssh_clone_url(&self) -> Option<&str> {
        match self.vcs_kind() {
            VcsKind::Git => self.links.clone.get("ssh").map(String::as_str),
            VcsKind::Other => None,
        }
    }
}

/// A repository to mirror, identified by owner and clone URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryRef {
    /// User or team handle the repository was listed under
    pub owner: String,
    pub clone_url: String,
}

impl RepositoryRef {
    pub fn new(owner: impl Into<String>, clone_url: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            clone_url: clone_url.into(),
        }
    }

    /// Final segment of the clone URL without a trailing ".git"
    pub fn project_name(&self) -> Option<&str> {
        let trimmed = self.clone_url.trim_end_matches('/');
        let last = trimmed.rsplit(['/', ':']).next()?;
        let name = last.strip_suffix(".git").unwrap_or(last);

        match name {
            "" | "." | ".." => None,
            name => Some(name),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct Team {
    username: String,
}

/// Bitbucket API v2.0 client listing the repositories of a user and their teams
pub struct RepositoryCatalog {
    http: Client,
    auth: TokenManager,
    base_url: String,
}

impl RepositoryCatalog {
    pub fn new(http: Client, auth: TokenManager, base_url: impl Into<String>) -> Self {
        Self {
            http,
            auth,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build a catalog and its token manager from configuration and OAuth consumer credentials
    pub fn from_config(config: &Config, client_id: &str, secret: &str) -> Result<Self> {
        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = config.api_timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        let auth = TokenManager::new(http.clone(), &config.api.token_url, client_id, secret);
        Ok(Self::new(http, auth, &config.api.base_url))
    }

    /// GET a JSON document with a freshly obtained bearer credential
    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        let authorization = self.auth.authorization_header().await?;

        debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .query(query)
            .header(AUTHORIZATION, authorization)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MirrorError::Api {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.json().await?)
    }

    /// Username the OAuth consumer acts for
    pub async fn get_current_username(&self) -> Result<String> {
        let user: CurrentUser = self.get_json(&format!("{}/user", self.base_url), &[]).await?;

        info!("Authenticated as Bitbucket user: {}", user.username);
        Ok(user.username)
    }

    /// Teams the user is a member of. The listing must fit in a single page.
    pub async fn get_member_teams(&self) -> Result<BTreeSet<String>> {
        let page: Page<Team> = self
            .get_json(&format!("{}/teams", self.base_url), &[("role", "member")])
            .await?;

        if page.size > page.pagelen {
            return Err(MirrorError::Pagination {
                size: page.size,
                pagelen: page.pagelen,
            });
        }

        let teams: BTreeSet<String> = page.values.into_iter().map(|t| t.username).collect();

        info!("Found {} teams: {:?}", teams.len(), teams);
        Ok(teams)
    }

    async fn fetch_multi_page_response(
        &self,
        first_page_url: &str,
    ) -> Result<Vec<Page<RepositoryRecord>>> {
        let mut pages = Vec::new();
        let mut visited = HashSet::from([first_page_url.to_string()]);
        let mut page: Page<RepositoryRecord> = self.get_json(first_page_url, &[]).await?;

        loop {
            let next = page.next_page().map(str::to_string);
            pages.push(page);

            match next {
                Some(url) if !visited.insert(url.clone()) => {
                    warn!("Next link {} was already fetched, stopping pagination", url);
                    break;
                }
                Some(url) => page = self.get_json(&url, &[]).await?,
                None => break,
            }
        }

        debug!("Fetched {} pages from {}", pages.len(), first_page_url);
        Ok(pages)
    }

    async fn list_repositories(&self, owner: &str, first_page_url: &str) -> Result<Vec<RepositoryRef>> {
        let pages = self.fetch_multi_page_response(first_page_url).await?;

        let repositories: Vec<RepositoryRef> = pages
            .iter()
            .flat_map(|page| page.values.iter())
            .filter_map(RepositoryRecord::ssh_clone_url)
            .map(|url| RepositoryRef::new(owner, url))
            .collect();

        info!("Found {} git repositories for {}", repositories.len(), owner);
        Ok(repositories)
    }

    /// Repositories owned by a user
    pub async fn list_user_repositories(&self, username: &str) -> Result<Vec<RepositoryRef>> {
        debug!("Fetching user repositories for: {}", username);
        let url = format!("{}/users/{}/repositories", self.base_url, username);
        self.list_repositories(username, &url).await
    }

    /// Repositories owned by a team
    pub async fn list_team_repositories(&self, team: &str) -> Result<Vec<RepositoryRef>> {
        debug!("Fetching repositories for team: {}", team);
        let url = format!("{}/repositories/{}", self.base_url, team);
        self.list_repositories(team, &url).await
    }

    /// Distinct repositories of the user and every given team
    pub async fn get_repositories<I, S>(&self, username: &str, teams: I) -> Result<BTreeSet<RepositoryRef>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut repositories: BTreeSet<RepositoryRef> =
            self.list_user_repositories(username).await?.into_iter().collect();

        for team in teams {
            repositories.extend(self.list_team_repositories(team.as_ref()).await?);
        }

        info!("Total distinct repositories: {}", repositories.len());
        Ok(repositories)
    }
}
