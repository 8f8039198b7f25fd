//! Build records and the build status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BuildId;

/// The kind of repository event that triggered a build.
///
/// Partitions the ref index: `main` pushed and `main` opened as a pull
/// request have separate histories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildType {
    Push,
    PullRequest,
}

impl BuildType {
    /// Stable one-byte code used in storage keys.
    pub const fn code(self) -> u8 {
        match self {
            BuildType::Push => 0,
            BuildType::PullRequest => 1,
        }
    }
}

impl std::fmt::Display for BuildType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildType::Push => write!(f, "push"),
            BuildType::PullRequest => write!(f, "pull-request"),
        }
    }
}

impl std::str::FromStr for BuildType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "push" => Ok(BuildType::Push),
            "pull-request" | "pull_request" | "pr" => Ok(BuildType::PullRequest),
            _ => Err(format!("Unknown build type: {}", s)),
        }
    }
}

/// Status of a build.
///
/// `Queued -> Running -> {Success | Error | Failed}`. `Failed` means the
/// build script ran and failed (or could not be started); `Error` means
/// the server could not set the build up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Queued,
    Running,
    Success,
    Error,
    Failed,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Error | BuildStatus::Failed
        )
    }

    /// Whether the build sits in the pending index with this status.
    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether `self -> next` is a forward step of the status machine.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        match self {
            BuildStatus::Queued => next == BuildStatus::Running,
            BuildStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BuildStatus::Queued => "queued",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Error => "error",
            BuildStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One CI execution attempt for a ref at a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub build_type: BuildType,
    pub clone_url: String,
    /// `owner/name` of the repository statuses are reported to, when it
    /// differs from what `clone_url` names (pull requests from forks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    pub ref_name: String,
    pub commit_sha: String,
    pub status: BuildStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Build {
    /// A freshly queued build.
    pub fn queued(
        id: BuildId,
        build_type: BuildType,
        clone_url: impl Into<String>,
        ref_name: impl Into<String>,
        commit_sha: impl Into<String>,
    ) -> Self {
        Self {
            id,
            build_type,
            clone_url: clone_url.into(),
            repository: None,
            ref_name: ref_name.into(),
            commit_sha: commit_sha.into(),
            status: BuildStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_repository(mut self, repository: Option<String>) -> Self {
        self.repository = repository;
        self
    }

    /// First seven characters of the commit SHA.
    pub fn short_sha(&self) -> &str {
        let end = self
            .commit_sha
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.commit_sha.len());
        &self.commit_sha[..end]
    }
}
