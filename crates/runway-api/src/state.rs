//! Application state.

use std::sync::Arc;

use runway_db::Db;
use runway_scheduler::BuildSubmitter;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub submitter: BuildSubmitter,
    /// Secret for verifying `X-Hub-Signature-256`; unchecked when absent.
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(db: Db, submitter: BuildSubmitter) -> Self {
        Self {
            db,
            submitter,
            webhook_secret: None,
        }
    }

    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret.map(Arc::from);
        self
    }
}
