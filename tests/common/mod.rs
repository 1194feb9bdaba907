//! Common test utilities and helpers for bitbucket-mirror tests
#![allow(dead_code)]

use bitbucket_mirror::{Config, RepositoryCatalog};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Command;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN_PATH: &str = "/site/oauth2/access_token";
pub const CLIENT_KEY: &str = "key";
pub const CLIENT_SECRET: &str = "secret";
/// base64("key:secret")
pub const BASIC_AUTH: &str = "Basic a2V5OnNlY3JldA==";
pub const ACCESS_TOKEN: &str = "tok-1";

/// Configuration pointing every endpoint at the mock server
pub fn mock_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.api.base_url = server.uri();
    config.api.token_url = format!("{}{}", server.uri(), TOKEN_PATH);
    config
}

pub fn catalog_for(server: &MockServer) -> RepositoryCatalog {
    RepositoryCatalog::from_config(&mock_config(server), CLIENT_KEY, CLIENT_SECRET)
        .expect("Failed to create catalog")
}

/// Mount a client-credentials token endpoint expected to be hit `calls` times
pub async fn mount_token_endpoint(server: &MockServer, expires_in: i64, calls: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(header("authorization", BASIC_AUTH))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": ACCESS_TOKEN,
            "refresh_token": "refresh-1",
            "expires_in": expires_in,
            "token_type": "bearer",
            "scopes": "repository team account"
        })))
        .expect(calls)
        .mount(server)
        .await;
}

/// Mount a bearer-authenticated GET returning `body`
pub async fn mount_get(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header("authorization", format!("Bearer {}", ACCESS_TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// A repository item as Bitbucket lists it
pub fn repo_json(scm: &str, owner: &str, name: &str) -> Value {
    json!({
        "scm": scm,
        "full_name": format!("{}/{}", owner, name),
        "links": {
            "clone": [
                {"name": "https", "href": format!("https://{}@host/{}/{}.git", owner, owner, name)},
                {"name": "ssh", "href": ssh_url(owner, name)}
            ]
        }
    })
}

pub fn ssh_url(owner: &str, name: &str) -> String {
    format!("git@host:{}/{}.git", owner, name)
}

pub fn page_json(pagelen: u64, size: u64, values: Vec<Value>, next: Option<String>) -> Value {
    let mut page = json!({
        "pagelen": pagelen,
        "size": size,
        "page": 1,
        "values": values,
    });
    if let Some(next) = next {
        page["next"] = Value::String(next);
    }
    page
}

/// Whether a usable git binary is on PATH
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

pub fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to execute git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Create a local origin repository with one commit, usable as a clone URL
pub fn init_origin_repo(parent: &Path, name: &str) -> PathBuf {
    run_git(parent, &["init", "--quiet", name]);
    let origin = parent.join(name);
    run_git(
        &origin,
        &[
            "-c",
            "user.name=Test",
            "-c",
            "user.email=test@example.com",
            "commit",
            "--allow-empty",
            "--quiet",
            "-m",
            "initial",
        ],
    );
    origin
}
