//! Core domain types and traits for the Runway CI server.
//!
//! This crate contains:
//! - Build identifiers, build records and their status machine
//! - Output line and channel types
//! - Executor trait and job types
//! - Status reporter trait
//! - Parsed repository webhook events

pub mod build;
pub mod error;
pub mod executor;
pub mod id;
pub mod output;
pub mod reporter;
pub mod repository;

pub use build::{Build, BuildStatus, BuildType};
pub use error::{Error, Result};
pub use id::BuildId;
pub use output::{Channel, OutputLine};
