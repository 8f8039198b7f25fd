//! Build execution backends for Runway.
//!
//! Provides executor implementations for running build scripts:
//! - Local child processes (the default)

pub mod local;

pub use local::LocalProcessExecutor;
pub use runway_core::executor::{
    Executor, GitCloneSpec, JobResult, JobSpec, LogLine, LogStream, RunningJob,
};
