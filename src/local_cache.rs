//! Local durable cache with independently namespaced slots.
//!
//! Each slot holds one JSON document: the conversation cache or the toggle
//! cache. Slots are read once at startup and rewritten on every mutation.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rusqlite::OptionalExtension;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_rusqlite::Connection;

use crate::error::TrackerResult;

/// Boxed future type for local store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Namespaced slot in the local cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheSlot {
    /// Conversation summaries keyed by id.
    Conversations,
    /// Toggle records keyed by conversation id.
    Toggles,
}

impl CacheSlot {
    /// Storage key of the slot.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Conversations => "tracked_chats",
            Self::Toggles => "chat_toggles",
        }
    }
}

impl fmt::Display for CacheSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Key-value storage for the cache slots.
pub trait LocalStore: Send + Sync {
    /// Read the raw JSON stored in `slot`.
    fn load(&self, slot: CacheSlot) -> StoreFuture<'_, TrackerResult<Option<String>>>;

    /// Replace the contents of `slot`.
    fn save(&self, slot: CacheSlot, json: String) -> StoreFuture<'_, TrackerResult<()>>;

    /// Remove the contents of `slot`.
    fn clear(&self, slot: CacheSlot) -> StoreFuture<'_, TrackerResult<()>>;
}

/// Read and decode a slot.
///
/// # Errors
/// Returns an error if storage access fails or the stored JSON does not decode.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn LocalStore,
    slot: CacheSlot,
) -> TrackerResult<Option<T>> {
    match store.load(slot).await? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Encode and write a slot.
///
/// # Errors
/// Returns an error if encoding or storage access fails.
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn LocalStore,
    slot: CacheSlot,
    value: &T,
) -> TrackerResult<()> {
    let json = serde_json::to_string(value)?;
    store.save(slot, json).await
}

/// `SQLite` implementation of the local store.
pub struct SqliteLocalStore {
    conn: Arc<Connection>,
    table: String,
}

impl SqliteLocalStore {
    /// Table name for cache slots.
    pub const DEFAULT_TABLE: &'static str = "local_cache";

    /// Open (or create) the cache database at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        Self::new(Arc::new(conn)).await
    }

    /// Initialize the store on an existing connection.
    ///
    /// # Errors
    /// Returns an error if the table cannot be created.
    pub async fn new(conn: Arc<Connection>) -> TrackerResult<Self> {
        let table = Self::DEFAULT_TABLE.to_string();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    slot TEXT PRIMARY KEY,
                    value_json TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

impl LocalStore for SqliteLocalStore {
    fn load(&self, slot: CacheSlot) -> StoreFuture<'_, TrackerResult<Option<String>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let value = self
                .conn
                .call(move |conn| {
                    let value = conn
                        .query_row(
                            &format!("SELECT value_json FROM {table} WHERE slot = ?1"),
                            rusqlite::params![slot.key()],
                            |row| row.get::<_, String>(0),
                        )
                        .optional()?;
                    Ok(value)
                })
                .await?;
            Ok(value)
        })
    }

    fn save(&self, slot: CacheSlot, json: String) -> StoreFuture<'_, TrackerResult<()>> {
        Box::pin(async move {
            let table = self.table.clone();
            let now_ms = Utc::now().timestamp_millis();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (slot, value_json, updated_at)
                             VALUES (?1, ?2, ?3)
                             ON CONFLICT(slot) DO UPDATE SET
                                value_json = excluded.value_json,
                                updated_at = excluded.updated_at"
                        ),
                        rusqlite::params![slot.key(), json, now_ms],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn clear(&self, slot: CacheSlot) -> StoreFuture<'_, TrackerResult<()>> {
        Box::pin(async move {
            let table = self.table.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!("DELETE FROM {table} WHERE slot = ?1"),
                        rusqlite::params![slot.key()],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }
}

/// In-process local store, for hosts without a writable disk.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    slots: DashMap<CacheSlot, String>,
}

impl MemoryLocalStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryLocalStore {
    fn load(&self, slot: CacheSlot) -> StoreFuture<'_, TrackerResult<Option<String>>> {
        Box::pin(async move { Ok(self.slots.get(&slot).map(|entry| entry.value().clone())) })
    }

    fn save(&self, slot: CacheSlot, json: String) -> StoreFuture<'_, TrackerResult<()>> {
        Box::pin(async move {
            self.slots.insert(slot, json);
            Ok(())
        })
    }

    fn clear(&self, slot: CacheSlot) -> StoreFuture<'_, TrackerResult<()>> {
        Box::pin(async move {
            self.slots.remove(&slot);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    async fn sqlite_store() -> SqliteLocalStore {
        let conn = Connection::open_in_memory().await.unwrap();
        SqliteLocalStore::new(Arc::new(conn)).await.unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_slots_are_independent() {
        let store = sqlite_store().await;
        store
            .save(CacheSlot::Conversations, "{\"a\":1}".to_string())
            .await
            .unwrap();

        assert_eq!(
            store.load(CacheSlot::Conversations).await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert!(store.load(CacheSlot::Toggles).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_save_overwrites_and_clear_removes() {
        let store = sqlite_store().await;
        store.save(CacheSlot::Toggles, "1".to_string()).await.unwrap();
        store.save(CacheSlot::Toggles, "2".to_string()).await.unwrap();
        assert_eq!(
            store.load(CacheSlot::Toggles).await.unwrap().as_deref(),
            Some("2")
        );

        store.clear(CacheSlot::Toggles).await.unwrap();
        assert!(store.load(CacheSlot::Toggles).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_helpers_round_trip_through_memory_store() {
        let store = MemoryLocalStore::new();
        let mut map = HashMap::new();
        map.insert("chat-1".to_string(), true);

        save_json(&store, CacheSlot::Toggles, &map).await.unwrap();
        let restored: Option<HashMap<String, bool>> =
            load_json(&store, CacheSlot::Toggles).await.unwrap();
        assert_eq!(restored, Some(map));

        let missing: Option<HashMap<String, bool>> =
            load_json(&store, CacheSlot::Conversations).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_slot_is_an_error() {
        let store = MemoryLocalStore::new();
        store
            .save(CacheSlot::Toggles, "not json".to_string())
            .await
            .unwrap();
        let result: TrackerResult<Option<HashMap<String, bool>>> =
            load_json(&store, CacheSlot::Toggles).await;
        assert!(result.is_err());
    }
}
