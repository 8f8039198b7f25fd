//! Worker that claims and executes builds.

use std::sync::Arc;

use futures::StreamExt;
use runway_core::executor::{JobResult, JobSpec, LogLine, RunningJob};
use runway_core::{Build, BuildId, BuildStatus, Channel, Result};
use tracing::{debug, error, info, warn};

use crate::Scheduler;
use crate::queue::{Intake, Submission};

/// Lines appended to the output log per transaction.
const OUTPUT_BATCH: usize = 64;

enum Event {
    Lines(Option<Vec<LogLine>>),
    Exited(Result<JobResult>),
}

/// A worker that claims and executes builds.
pub struct Worker {
    id: usize,
    scheduler: Arc<Scheduler>,
    intake: Intake,
}

impl Worker {
    pub fn new(id: usize, scheduler: Arc<Scheduler>, intake: Intake) -> Self {
        Self {
            id,
            scheduler,
            intake,
        }
    }

    /// Run the worker loop until intake is closed.
    pub async fn run(self) {
        debug!(worker_id = self.id, "Starting worker");
        while let Some(submission) = self.intake.next().await {
            self.process(submission).await;
        }
        debug!(worker_id = self.id, "Worker stopped");
    }

    async fn process(&self, submission: Submission) {
        let db = &self.scheduler.db;
        let id = submission.build_id();
        let claimed = match submission {
            Submission::Queued(id) => db.call(move |db| db.claim(id)).await,
            Submission::Resume(id) => db.call(move |db| db.resume(id)).await,
        };

        let build = match claimed {
            Ok(Some(build)) => build,
            Ok(None) => {
                debug!(worker_id = self.id, build_id = %id, "Build already taken, skipping");
                return;
            }
            Err(e) => {
                error!(worker_id = self.id, build_id = %id, error = %e, "Failed to claim build");
                return;
            }
        };

        info!(
            worker_id = self.id,
            build_id = %id,
            build_type = %build.build_type,
            ref_name = %build.ref_name,
            sha = %build.short_sha(),
            "Claimed build"
        );
        if matches!(submission, Submission::Resume(_)) {
            self.log(id, Channel::CiInfo, "resuming build interrupted by restart")
                .await;
        }
        self.report(&build).await;

        let status = self.execute(&build).await;

        match db.call(move |db| db.finish(id, status)).await {
            Ok(finished) => {
                info!(worker_id = self.id, build_id = %id, status = %status, "Build finished");
                self.report(&finished).await;
            }
            Err(e) => {
                error!(build_id = %id, status = %status, error = %e, "Failed to record build result");
            }
        }
    }

    /// Run one claimed build and decide its terminal status.
    async fn execute(&self, build: &Build) -> BuildStatus {
        let config = &self.scheduler.config;
        let executor = &self.scheduler.executor;
        let spec = JobSpec::for_build(
            build,
            config.script.clone(),
            &config.env,
            config.timeout,
            config.workspace_dir.clone(),
        );

        self.log(
            build.id,
            Channel::CiInfo,
            format!("cloning {} at {}", build.clone_url, build.ref_name),
        )
        .await;
        let workdir = match executor.prepare(&spec).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(build_id = %build.id, error = %e, "Failed to prepare workspace");
                self.log(build.id, Channel::CiError, format!("failed to prepare workspace: {}", e))
                    .await;
                return BuildStatus::Error;
            }
        };

        self.log(build.id, Channel::CiInfo, format!("running {}", config.script))
            .await;
        let job = match executor.spawn(&spec, &workdir).await {
            Ok(job) => job,
            Err(e) => {
                warn!(build_id = %build.id, error = %e, "Failed to start build script");
                self.log(build.id, Channel::CiError, format!("failed to start script: {}", e))
                    .await;
                return BuildStatus::Failed;
            }
        };

        let (channel, message, status) = match self.stream_output(build.id, job).await {
            Ok(result) if result.timed_out => {
                let secs = config.timeout.map(|t| t.as_secs()).unwrap_or_default();
                (
                    Channel::CiError,
                    format!("build timed out after {}s", secs),
                    BuildStatus::Failed,
                )
            }
            Ok(JobResult {
                exit_code: Some(0), ..
            }) => (
                Channel::CiInfo,
                "script exited with code 0".to_string(),
                BuildStatus::Success,
            ),
            Ok(JobResult {
                exit_code: Some(code),
                ..
            }) => (
                Channel::CiError,
                format!("script exited with code {}", code),
                BuildStatus::Failed,
            ),
            Ok(JobResult { exit_code: None, .. }) => (
                Channel::CiError,
                "script was terminated by a signal".to_string(),
                BuildStatus::Failed,
            ),
            Err(e) => (
                Channel::CiError,
                format!("lost track of script: {}", e),
                BuildStatus::Error,
            ),
        };
        self.log(build.id, channel, message).await;
        status
    }

    /// Copy script output into the log until the script exits and its
    /// output is drained.
    async fn stream_output(&self, id: BuildId, job: RunningJob) -> Result<JobResult> {
        let RunningJob { logs, mut exit } = job;
        let mut chunks = logs.ready_chunks(OUTPUT_BATCH);
        let mut exited: Option<Result<JobResult>> = None;
        let mut drain_deadline = None;

        loop {
            let event = if let Some(deadline) = drain_deadline {
                // Background children may hold the pipes open after exit.
                match tokio::time::timeout_at(deadline, chunks.next()).await {
                    Ok(lines) => Event::Lines(lines),
                    Err(_) => {
                        warn!(build_id = %id, "Output still open after script exited, detaching");
                        Event::Lines(None)
                    }
                }
            } else {
                tokio::select! {
                    lines = chunks.next() => Event::Lines(lines),
                    result = &mut exit => Event::Exited(result),
                }
            };

            match event {
                Event::Lines(Some(lines)) => self.append(id, lines).await,
                Event::Lines(None) => break,
                Event::Exited(result) => {
                    exited = Some(result);
                    drain_deadline =
                        Some(tokio::time::Instant::now() + self.scheduler.config.drain_grace);
                }
            }
        }

        match exited {
            Some(result) => result,
            None => exit.await,
        }
    }

    async fn append(&self, id: BuildId, lines: Vec<LogLine>) {
        let batch: Vec<(Channel, String)> = lines
            .into_iter()
            .map(|line| (Channel::from(line.stream), line.content))
            .collect();
        let count = batch.len();
        if let Err(e) = self
            .scheduler
            .db
            .call(move |db| db.append_outputs(id, batch))
            .await
        {
            warn!(build_id = %id, lines = count, error = %e, "Failed to store build output");
        }
    }

    async fn log(&self, id: BuildId, channel: Channel, message: impl Into<String>) {
        let message = message.into();
        debug!(build_id = %id, channel = ?channel, "{}", message);
        if let Err(e) = self
            .scheduler
            .db
            .call(move |db| db.append_output(id, channel, message))
            .await
        {
            warn!(build_id = %id, error = %e, "Failed to store build output");
        }
    }

    async fn report(&self, build: &Build) {
        if let Err(e) = self.scheduler.reporter.report(build).await {
            warn!(build_id = %build.id, status = %build.status, error = %e, "Failed to report build status");
        }
    }
}
