//! Conversation list cache with value-level reconciliation.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::TrackerResult;
use crate::local_cache::{CacheSlot, LocalStore, load_json, save_json};
use crate::payload;
use crate::remote::ChatRemote;
use crate::sequence::RequestSequencer;
use crate::types::Conversation;

/// Cached conversation summaries, kept in sync with the remote list.
pub struct ChatList {
    remote: Arc<dyn ChatRemote>,
    local: Arc<dyn LocalStore>,
    cache: DashMap<String, Conversation>,
    sequencer: RequestSequencer,
}

impl ChatList {
    /// Create an empty list.
    #[must_use]
    pub fn new(remote: Arc<dyn ChatRemote>, local: Arc<dyn LocalStore>) -> Self {
        Self {
            remote,
            local,
            cache: DashMap::new(),
            sequencer: RequestSequencer::new(),
        }
    }

    /// Merge a raw server payload. Returns whether any entry changed.
    pub fn reconcile_payload(&self, payload: Value) -> bool {
        self.reconcile_list(payload::conversations(payload))
    }

    /// Merge normalized records. Returns whether any entry changed.
    ///
    /// An entry is replaced whole when it is missing or differs by value;
    /// equal entries are left alone.
    pub fn reconcile_list(&self, records: Vec<Conversation>) -> bool {
        let mut changed = false;
        for record in records {
            let unchanged = self
                .cache
                .get(&record.id)
                .is_some_and(|existing| *existing == record);
            if !unchanged {
                self.cache.insert(record.id.clone(), record);
                changed = true;
            }
        }
        changed
    }

    /// Fetch the remote list, merge it, and persist the cache if it changed.
    ///
    /// # Errors
    /// Returns an error if the fetch fails. Persistence failures are logged.
    pub async fn refresh(&self) -> TrackerResult<bool> {
        let seq = self.sequencer.issue();
        let payload = self.remote.fetch_conversations().await?;

        if !self.sequencer.try_accept(seq) {
            debug!(seq, "Discarding out-of-order chat list response");
            return Ok(false);
        }

        let changed = self.reconcile_payload(payload);
        if changed {
            debug!(entries = self.cache.len(), "Chat list changed");
            if let Err(err) = self.persist().await {
                warn!(?err, "Failed to persist chat list");
            }
        }
        Ok(changed)
    }

    /// Load the cache from the local slot. Returns the number of entries loaded.
    ///
    /// The slot may hold a map keyed by id or a plain sequence of records.
    ///
    /// # Errors
    /// Returns an error if the slot cannot be read or decoded.
    pub async fn hydrate_from_local(&self) -> TrackerResult<usize> {
        let Some(stored) = load_json::<Value>(self.local.as_ref(), CacheSlot::Conversations).await?
        else {
            return Ok(0);
        };

        let records: Vec<Conversation> = match stored {
            Value::Object(map) if map.values().all(Value::is_object) => map
                .into_values()
                .filter_map(|v| serde_json::from_value::<Conversation>(v).ok())
                .collect(),
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| serde_json::from_value::<Conversation>(v).ok())
                .collect(),
            _ => Vec::new(),
        };

        let count = records.len();
        self.reconcile_list(records);
        Ok(count)
    }

    /// Write the cache to the local slot.
    ///
    /// # Errors
    /// Returns an error if encoding or storage fails.
    pub async fn persist(&self) -> TrackerResult<()> {
        let snapshot = self.snapshot();
        save_json(self.local.as_ref(), CacheSlot::Conversations, &snapshot).await
    }

    /// Copy of the cache keyed by id.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Conversation> {
        self.cache
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Look up one conversation.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.cache.get(id).map(|entry| entry.value().clone())
    }

    /// Filtered, most-recent-first view of the cache.
    #[must_use]
    pub fn view(&self, search: &str) -> Vec<Conversation> {
        let entries: Vec<Conversation> = self
            .cache
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        derive_view(entries, search)
    }
}

/// Filter by case-insensitive match on name or id, newest first.
///
/// Absent times sort as the epoch; ties fall back to ascending id.
#[must_use]
pub fn derive_view(entries: Vec<Conversation>, search: &str) -> Vec<Conversation> {
    let needle = search.to_lowercase();
    let mut view: Vec<Conversation> = entries
        .into_iter()
        .filter(|c| {
            needle.is_empty()
                || c.display_name.to_lowercase().contains(&needle)
                || c.id.to_lowercase().contains(&needle)
        })
        .collect();

    view.sort_by(|a, b| {
        b.recency_millis()
            .cmp(&a.recency_millis())
            .then_with(|| a.id.cmp(&b.id))
    });
    view
}
