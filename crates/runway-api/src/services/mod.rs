//! Outbound integrations.

pub mod status;

pub use status::{GitHubStatusReporter, LogReporter};
