//! Build intake shared by the worker pool.
//!
//! The durable backlog is the pending index in the database; the intake
//! channel only carries IDs of builds that a worker should try to claim.

use std::sync::Arc;

use runway_core::{BuildId, BuildStatus, Error, Result};
use runway_db::{Db, DbResult};
use tokio::sync::{Mutex, mpsc};
use tracing::info;

/// A build a worker should pick up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A queued build, taken with `claim`.
    Queued(BuildId),
    /// A build left running by a previous process, taken with `resume`.
    Resume(BuildId),
}

impl Submission {
    pub fn build_id(&self) -> BuildId {
        match self {
            Submission::Queued(id) | Submission::Resume(id) => *id,
        }
    }
}

/// Receiving side of the intake, shared by all workers.
#[derive(Clone)]
pub struct Intake {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Submission>>>,
}

impl Intake {
    pub fn channel() -> (BuildSubmitter, Intake) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            BuildSubmitter { tx },
            Intake {
                rx: Arc::new(Mutex::new(rx)),
            },
        )
    }

    /// Wait for the next submission; `None` once intake is closed and empty.
    pub async fn next(&self) -> Option<Submission> {
        self.rx.lock().await.recv().await
    }
}

/// Sending side of the intake.
#[derive(Debug, Clone)]
pub struct BuildSubmitter {
    tx: mpsc::UnboundedSender<Submission>,
}

impl BuildSubmitter {
    /// Hand a freshly created build to the workers.
    pub fn submit(&self, id: BuildId) -> Result<()> {
        self.send(Submission::Queued(id))
    }

    pub(crate) fn send(&self, submission: Submission) -> Result<()> {
        self.tx
            .send(submission)
            .map_err(|_| Error::Internal("scheduler is shut down".to_string()))
    }
}

/// Submissions for every build still pending in the database.
pub async fn recover(db: &Db) -> DbResult<Vec<Submission>> {
    let pending = db.call(|db| db.pending_builds()).await?;
    let submissions: Vec<Submission> = pending
        .iter()
        .filter_map(|build| match build.status {
            BuildStatus::Queued => Some(Submission::Queued(build.id)),
            BuildStatus::Running => Some(Submission::Resume(build.id)),
            _ => None,
        })
        .collect();

    let resumed = submissions
        .iter()
        .filter(|s| matches!(s, Submission::Resume(_)))
        .count();
    if !submissions.is_empty() {
        info!(
            pending = submissions.len(),
            resumed, "Recovered pending builds"
        );
    }
    Ok(submissions)
}
