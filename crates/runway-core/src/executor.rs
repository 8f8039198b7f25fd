//! Executor trait and job types.
//!
//! Executors prepare a build workspace and run the configured build script,
//! streaming its output back line by line.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Build, BuildId, Channel, Result};

/// Specification for one build run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// The build being executed.
    pub build_id: BuildId,
    /// Shell command line of the build script.
    pub script: String,
    /// Environment variables added on top of the inherited environment.
    pub env: HashMap<String, String>,
    /// Maximum execution time of the script.
    pub timeout: Option<Duration>,
    /// Repository to clone before running the script.
    pub git_clone: GitCloneSpec,
    /// Directory under which per-build workspaces are created.
    pub workspace_root: PathBuf,
}

impl JobSpec {
    /// Build the job spec for a build record.
    ///
    /// `RUNWAY_*` variables describing the build are added after the
    /// configured ones and win on conflict.
    pub fn for_build(
        build: &Build,
        script: impl Into<String>,
        configured_env: &HashMap<String, String>,
        timeout: Option<Duration>,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        let mut env = configured_env.clone();
        env.insert("CI".to_string(), "true".to_string());
        env.insert("RUNWAY_BUILD_ID".to_string(), build.id.to_string());
        env.insert("RUNWAY_BUILD_TYPE".to_string(), build.build_type.to_string());
        env.insert("RUNWAY_REF".to_string(), build.ref_name.clone());
        env.insert("RUNWAY_COMMIT_SHA".to_string(), build.commit_sha.clone());
        env.insert("RUNWAY_CLONE_URL".to_string(), build.clone_url.clone());

        Self {
            build_id: build.id,
            script: script.into(),
            env,
            timeout,
            git_clone: GitCloneSpec {
                url: build.clone_url.clone(),
                branch: Some(build.ref_name.clone()).filter(|r| !r.is_empty()),
                sha: Some(build.commit_sha.clone()).filter(|s| !s.is_empty()),
            },
            workspace_root: workspace_root.into(),
        }
    }

    /// Directory this build is cloned into.
    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace_root.join(self.build_id.to_string())
    }
}

/// Specification for cloning a git repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitCloneSpec {
    /// Repository URL to clone.
    pub url: String,
    /// Branch to check out (defaults to the remote's default branch).
    pub branch: Option<String>,
    /// Specific commit SHA to check out.
    pub sha: Option<String>,
}

/// Result of a finished script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Exit code, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Whether the process was killed because it exceeded its timeout.
    pub timed_out: bool,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// A line of log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

impl LogLine {
    pub fn new(stream: LogStream, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl From<LogStream> for Channel {
    fn from(stream: LogStream) -> Self {
        match stream {
            LogStream::Stdout => Channel::Stdout,
            LogStream::Stderr => Channel::Stderr,
        }
    }
}

/// A started build script.
///
/// `logs` ends once both output pipes are closed; `exit` resolves when the
/// process has exited (or was killed on timeout).
pub struct RunningJob {
    pub logs: BoxStream<'static, LogLine>,
    pub exit: BoxFuture<'static, Result<JobResult>>,
}

/// Trait for build executors.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Create the build workspace and check out the repository.
    ///
    /// Errors here are server-side setup failures.
    async fn prepare(&self, spec: &JobSpec) -> Result<PathBuf>;

    /// Start the build script inside a prepared workspace.
    ///
    /// Errors here mean the script could not be started.
    async fn spawn(&self, spec: &JobSpec, workdir: &Path) -> Result<RunningJob>;
}
