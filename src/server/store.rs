//! `SQLite` table backing the chat-status service.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio_rusqlite::Connection;

use crate::error::TrackerResult;

/// Persistent map of conversation id to enabled flag.
pub struct ChatStatusStore {
    conn: Arc<Connection>,
    table: String,
}

impl ChatStatusStore {
    /// Table name for statuses.
    pub const DEFAULT_TABLE: &'static str = "chat_status";

    /// Open (or create) the status database at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        Self::new(Arc::new(conn)).await
    }

    /// Initialize the table on an existing connection.
    ///
    /// # Errors
    /// Returns an error if the table cannot be created.
    pub async fn new(conn: Arc<Connection>) -> TrackerResult<Self> {
        let table = Self::DEFAULT_TABLE.to_string();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    chat_id TEXT PRIMARY KEY,
                    enabled INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL
                )"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }

    /// Every stored status.
    ///
    /// # Errors
    /// Returns an error on storage failure.
    pub async fn all(&self) -> TrackerResult<HashMap<String, bool>> {
        let table = self.table.clone();
        let statuses = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("SELECT chat_id, enabled FROM {table}"))?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
                })?;
                let mut statuses = HashMap::new();
                for row in rows {
                    let (chat_id, enabled) = row?;
                    statuses.insert(chat_id, enabled);
                }
                Ok(statuses)
            })
            .await?;
        Ok(statuses)
    }

    /// Insert or update one status, refreshing its timestamp.
    ///
    /// # Errors
    /// Returns an error on storage failure.
    pub async fn set(&self, chat_id: &str, enabled: bool) -> TrackerResult<()> {
        let table = self.table.clone();
        let chat_id = chat_id.to_string();
        let updated_at = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO {table} (chat_id, enabled, updated_at)
                         VALUES (?1, ?2, ?3)
                         ON CONFLICT(chat_id) DO UPDATE SET
                            enabled = excluded.enabled,
                            updated_at = excluded.updated_at"
                    ),
                    rusqlite::params![chat_id, enabled, updated_at],
                )?;
                Ok(())
            })
            .await?;

        tracing::debug!(enabled, "Chat status stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> ChatStatusStore {
        let conn = Connection::open_in_memory().await.unwrap();
        ChatStatusStore::new(Arc::new(conn)).await.unwrap()
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = memory_store().await;
        store.set("a", true).await.unwrap();
        store.set("b", false).await.unwrap();
        store.set("a", false).await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("a"), Some(&false));
        assert_eq!(all.get("b"), Some(&false));
    }

    #[tokio::test]
    async fn test_empty_table() {
        let store = memory_store().await;
        assert!(store.all().await.unwrap().is_empty());
    }
}
