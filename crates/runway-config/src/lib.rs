//! KDL configuration parsing for Runway.
//!
//! This crate handles parsing of the server configuration file
//! (`runway.kdl`): listen address, database and workspace locations,
//! scheduler limits, the build script and its environment, and GitHub
//! credentials.

pub mod error;
mod nodes;
pub mod server;

pub use error::{ConfigError, ConfigResult};
pub use server::{GitHubConfig, SchedulerSettings, ServerConfig, ServerSection, parse_server_config};
