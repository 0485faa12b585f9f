//! Application state shared across all request handlers.

use std::path::Path;
use std::sync::Arc;

use super::store::ChatStatusStore;
use crate::error::TrackerResult;

/// Shared application state.
pub struct AppState {
    /// Status table.
    pub store: ChatStatusStore,
}

impl AppState {
    /// Open the status database at `db_path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn open(db_path: impl AsRef<Path>) -> TrackerResult<Arc<Self>> {
        let store = ChatStatusStore::open(db_path).await?;
        Ok(Arc::new(Self { store }))
    }

    /// Wrap an already initialized store.
    #[must_use]
    pub fn with_store(store: ChatStatusStore) -> Arc<Self> {
        Arc::new(Self { store })
    }
}
