//! Build scheduling for Runway.
//!
//! A fixed pool of worker tasks pulls build IDs from a shared intake,
//! claims each build in the database, runs it through an [`Executor`] and
//! records the outcome. At startup every build still pending in the
//! database is put back on the intake.

pub mod queue;
pub mod worker;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use runway_config::ServerConfig;
use runway_core::reporter::StatusReporter;
use runway_core::{BuildId, Result};
use runway_db::{Db, DbResult};
use runway_executor::Executor;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use queue::{BuildSubmitter, Intake, Submission};
pub use worker::Worker;

/// Default time to keep reading output after a script exited.
pub const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Settings shared by every worker.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of builds run at the same time.
    pub concurrency: usize,
    /// Root directory for per-build checkouts.
    pub workspace_dir: PathBuf,
    /// Shell command line run in each checkout.
    pub script: String,
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
    /// How long output is still read after the script exited.
    pub drain_grace: Duration,
}

impl SchedulerConfig {
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            concurrency: config.scheduler.concurrency,
            workspace_dir: config.workspace.clone(),
            script: config.script.clone(),
            env: config.env.clone(),
            timeout: config.scheduler.timeout,
            drain_grace: DRAIN_GRACE,
        }
    }
}

/// Everything a worker needs to run builds.
pub struct Scheduler {
    db: Db,
    executor: Arc<dyn Executor>,
    reporter: Arc<dyn StatusReporter>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        db: Db,
        executor: Arc<dyn Executor>,
        reporter: Arc<dyn StatusReporter>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            executor,
            reporter,
            config,
        }
    }

    /// Recover pending builds and start the worker pool.
    pub async fn start(self) -> DbResult<SchedulerHandle> {
        let (submitter, intake) = Intake::channel();
        for submission in queue::recover(&self.db).await? {
            // The receiver is alive, so this cannot fail.
            let _ = submitter.send(submission);
        }

        let concurrency = self.config.concurrency.max(1);
        info!(
            concurrency,
            executor = self.executor.name(),
            script = %self.config.script,
            "Starting scheduler"
        );

        let shared = Arc::new(self);
        let workers = (0..concurrency)
            .map(|n| {
                let worker = Worker::new(n, shared.clone(), intake.clone());
                tokio::spawn(worker.run())
            })
            .collect();

        Ok(SchedulerHandle { submitter, workers })
    }
}

/// Owner of the running worker pool.
pub struct SchedulerHandle {
    submitter: BuildSubmitter,
    workers: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Hand a freshly created build to the workers.
    pub fn submit(&self, id: BuildId) -> Result<()> {
        self.submitter.submit(id)
    }

    /// A cloneable submitter for request handlers.
    pub fn submitter(&self) -> BuildSubmitter {
        self.submitter.clone()
    }

    /// Close intake and wait for the workers to finish what is queued.
    ///
    /// Intake only closes once every [`BuildSubmitter`] clone is dropped.
    pub async fn shutdown(self) {
        let SchedulerHandle { submitter, workers } = self;
        drop(submitter);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker task panicked");
            }
        }
        info!("Scheduler stopped");
    }
}
