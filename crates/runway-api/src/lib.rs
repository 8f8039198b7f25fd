//! HTTP server for Runway.
//!
//! Receives GitHub webhooks, queues builds and serves build history and
//! output to pollers.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
