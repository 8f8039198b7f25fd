//! Repository events decoded from Git provider webhooks.

use serde::{Deserialize, Serialize};

use crate::BuildType;

/// SHA GitHub sends as `after` when a ref is deleted.
const NULL_SHA: &str = "0000000000000000000000000000000000000000";

/// A repository event that should produce a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEvent {
    pub build_type: BuildType,
    pub repository_full_name: String,
    pub clone_url: String,
    pub ref_name: String,
    pub commit_sha: String,
}

/// Parsed push event data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    pub r#ref: String,
    pub before: String,
    pub after: String,
    pub repository_full_name: String,
    pub clone_url: String,
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub deleted: bool,
    pub pusher: String,
}

impl PushEvent {
    pub fn from_github_payload(payload: &serde_json::Value) -> Option<Self> {
        let r#ref = payload.get("ref")?.as_str()?.to_string();
        let before = payload.get("before")?.as_str()?.to_string();
        let after = payload.get("after")?.as_str()?.to_string();
        let repository = payload.get("repository")?;
        let repository_full_name = repository.get("full_name")?.as_str()?.to_string();
        let clone_url = repository.get("clone_url")?.as_str()?.to_string();

        let branch = r#ref.strip_prefix("refs/heads/").map(str::to_string);
        let tag = r#ref.strip_prefix("refs/tags/").map(str::to_string);

        let deleted = payload
            .get("deleted")
            .and_then(|d| d.as_bool())
            .unwrap_or(after == NULL_SHA);

        let pusher = payload
            .get("pusher")
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("unknown")
            .to_string();

        Some(PushEvent {
            r#ref,
            before,
            after,
            repository_full_name,
            clone_url,
            branch,
            tag,
            deleted,
            pusher,
        })
    }

    /// The build this push asks for, or `None` for ref deletions.
    pub fn into_repository_event(self) -> Option<RepositoryEvent> {
        if self.deleted {
            return None;
        }
        let ref_name = self.branch.or(self.tag).unwrap_or(self.r#ref);
        Some(RepositoryEvent {
            build_type: BuildType::Push,
            repository_full_name: self.repository_full_name,
            clone_url: self.clone_url,
            ref_name,
            commit_sha: self.after,
        })
    }
}

/// Parsed pull request event data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub number: u64,
    /// Repository the pull request targets; statuses are posted here.
    pub repository_full_name: String,
    /// Repository holding the head branch (a fork, possibly).
    pub head_clone_url: String,
    pub head_ref: String,
    pub head_sha: String,
}

impl PullRequestEvent {
    pub fn from_github_payload(payload: &serde_json::Value) -> Option<Self> {
        let action = payload.get("action")?.as_str()?.to_string();
        let number = payload.get("number")?.as_u64()?;
        let repository_full_name = payload
            .get("repository")?
            .get("full_name")?
            .as_str()?
            .to_string();

        let head = payload.get("pull_request")?.get("head")?;
        let head_ref = head.get("ref")?.as_str()?.to_string();
        let head_sha = head.get("sha")?.as_str()?.to_string();
        let head_clone_url = head.get("repo")?.get("clone_url")?.as_str()?.to_string();

        Some(PullRequestEvent {
            action,
            number,
            repository_full_name,
            head_clone_url,
            head_ref,
            head_sha,
        })
    }

    /// Only new commits on a pull request trigger builds.
    pub fn triggers_build(&self) -> bool {
        matches!(
            self.action.as_str(),
            "opened" | "reopened" | "synchronize"
        )
    }

    pub fn into_repository_event(self) -> Option<RepositoryEvent> {
        if !self.triggers_build() {
            return None;
        }
        Some(RepositoryEvent {
            build_type: BuildType::PullRequest,
            repository_full_name: self.repository_full_name,
            clone_url: self.head_clone_url,
            ref_name: self.head_ref,
            commit_sha: self.head_sha,
        })
    }
}
