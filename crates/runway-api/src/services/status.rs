//! Build status reporting.

use async_trait::async_trait;
use runway_core::reporter::{StatusReporter, describe};
use runway_core::{Build, BuildStatus, Error, Result};
use serde::Serialize;
use tracing::{debug, info};

const GITHUB_API: &str = "https://api.github.com";
const STATUS_CONTEXT: &str = "runway";

/// Commit status payload accepted by the GitHub statuses API.
#[derive(Debug, Serialize)]
struct CommitStatus<'a> {
    state: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_url: Option<String>,
    context: &'a str,
}

/// Posts commit statuses to GitHub.
pub struct GitHubStatusReporter {
    client: reqwest::Client,
    token: String,
    api_url: String,
    public_url: Option<String>,
}

impl GitHubStatusReporter {
    pub fn new(token: impl Into<String>, public_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            api_url: GITHUB_API.to_string(),
            public_url: public_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// Point at a different API root, e.g. GitHub Enterprise.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    fn status_for(&self, build: &Build) -> CommitStatus<'static> {
        CommitStatus {
            state: github_state(build.status),
            description: describe(build.status),
            target_url: self
                .public_url
                .as_ref()
                .map(|base| format!("{}/api/v1/builds/{}/output", base, build.id)),
            context: STATUS_CONTEXT,
        }
    }
}

#[async_trait]
impl StatusReporter for GitHubStatusReporter {
    async fn report(&self, build: &Build) -> Result<()> {
        let (owner, repo) = status_repository(build).ok_or_else(|| {
            Error::InvalidInput(format!("not a GitHub repository: {}", build.clone_url))
        })?;
        let url = format!(
            "{}/repos/{}/{}/statuses/{}",
            self.api_url, owner, repo, build.commit_sha
        );
        let body = self.status_for(build);
        debug!(build_id = %build.id, url = %url, state = body.state, "Posting commit status");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", "Runway-CI")
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("Status request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "Failed to post status ({}): {}",
                status, text
            )));
        }
        Ok(())
    }
}

/// Reporter used when no GitHub token is configured.
#[derive(Debug, Default)]
pub struct LogReporter;

#[async_trait]
impl StatusReporter for LogReporter {
    async fn report(&self, build: &Build) -> Result<()> {
        info!(
            build_id = %build.id,
            ref_name = %build.ref_name,
            sha = %build.short_sha(),
            status = %build.status,
            "{}",
            describe(build.status)
        );
        Ok(())
    }
}

fn github_state(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Queued | BuildStatus::Running => "pending",
        BuildStatus::Success => "success",
        BuildStatus::Failed => "failure",
        BuildStatus::Error => "error",
    }
}

/// Repository that owns the build's commit statuses.
///
/// Pull requests from forks clone the fork but report to the base
/// repository recorded on the build.
fn status_repository(build: &Build) -> Option<(&str, &str)> {
    match build.repository.as_deref() {
        Some(full_name) => full_name
            .split_once('/')
            .filter(|(owner, repo)| !owner.is_empty() && !repo.is_empty() && !repo.contains('/')),
        None => repository_slug(&build.clone_url),
    }
}

/// Extract `(owner, repo)` from an HTTPS or SSH clone URL.
fn repository_slug(clone_url: &str) -> Option<(&str, &str)> {
    let path = if let Some(rest) = clone_url.strip_prefix("git@") {
        rest.split_once(':')?.1
    } else {
        let rest = clone_url.split_once("://")?.1;
        let (host, path) = rest.split_once('/')?;
        if host.is_empty() {
            return None;
        }
        path
    };
    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let (owner, repo) = path.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner, repo))
}
