//! Embedded storage layer for Runway.
//!
//! A single redb file holds the primary build table, the pending queue,
//! the per-ref and per-commit history indices and the output log. All
//! access goes through [`Store`] transactions so the indices never disagree
//! with the build records.

pub mod builds;
pub mod error;
pub mod output;
pub mod schema;
pub mod store;

pub use builds::validate_range;
pub use error::{DbError, DbResult};
pub use store::{Order, Store};

use std::path::Path;

/// Build queue and output log backed by one database file.
#[derive(Clone)]
pub struct Db {
    store: Store,
}

impl Db {
    /// Create or open the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Ok(Self::from_store(Store::open(path)?))
    }

    pub fn from_store(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run blocking database work off the async executor.
    pub async fn call<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Db) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| DbError::Task(e.to_string()))?
    }
}
