//! Reporting build status back to the repository host.

use async_trait::async_trait;

use crate::{Build, BuildStatus, Result};

/// Receives a build whenever its status changes.
///
/// Failures are logged by the caller and never retried.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, build: &Build) -> Result<()>;
}

/// Human readable description of a status, as shown next to a commit.
pub fn describe(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Queued => "The build is queued",
        BuildStatus::Running => "The build is running",
        BuildStatus::Success => "The build succeeded",
        BuildStatus::Error => "The build could not be set up",
        BuildStatus::Failed => "The build failed",
    }
}
