//! Per-conversation enable flags.
//!
//! The remote status store is the source of truth; the local slot is only a
//! startup fallback when the remote has nothing to offer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::error::TrackerResult;
use crate::local_cache::{CacheSlot, LocalStore, load_json, save_json};
use crate::remote::ChatRemote;
use crate::types::Toggle;

/// Where the hydrated toggle state came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleSource {
    /// Loaded from the remote status store.
    Remote,
    /// Remote was empty or unreachable; loaded from the local slot.
    Local,
}

/// Cache of toggle flags with remote write-through.
pub struct ToggleStore {
    remote: Arc<dyn ChatRemote>,
    local: Arc<dyn LocalStore>,
    toggles: DashMap<String, Toggle>,
}

impl ToggleStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(remote: Arc<dyn ChatRemote>, local: Arc<dyn LocalStore>) -> Self {
        Self {
            remote,
            local,
            toggles: DashMap::new(),
        }
    }

    /// Load all flags once: remote first, local slot if the remote gave nothing.
    ///
    /// A non-empty remote result is mirrored into the local slot.
    ///
    /// # Errors
    /// Returns an error only if the local fallback cannot be read.
    pub async fn hydrate(&self) -> TrackerResult<ToggleSource> {
        match self.remote.fetch_chat_statuses().await {
            Ok(statuses) if !statuses.is_empty() => {
                let now = Utc::now();
                self.toggles.clear();
                for (conversation_id, enabled) in statuses {
                    self.toggles.insert(
                        conversation_id.clone(),
                        Toggle {
                            conversation_id,
                            enabled,
                            updated_at: now,
                        },
                    );
                }
                info!(count = self.toggles.len(), "Toggles loaded from status store");
                if let Err(err) = self.persist().await {
                    warn!(?err, "Failed to persist toggles");
                }
                return Ok(ToggleSource::Remote);
            }
            Ok(_) => info!("Status store empty, using local toggles"),
            Err(err) => warn!(?err, "Status store unreachable, using local toggles"),
        }

        let stored: Option<HashMap<String, Toggle>> =
            load_json(self.local.as_ref(), CacheSlot::Toggles).await?;
        self.toggles.clear();
        for (id, toggle) in stored.unwrap_or_default() {
            self.toggles.insert(id, toggle);
        }
        Ok(ToggleSource::Local)
    }

    /// Mapping of conversation id to enabled flag.
    #[must_use]
    pub fn get_all(&self) -> HashMap<String, bool> {
        self.toggles
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().enabled))
            .collect()
    }

    /// Whether `conversation_id` is enabled. Unknown ids are disabled.
    #[must_use]
    pub fn is_enabled(&self, conversation_id: &str) -> bool {
        self.toggles
            .get(conversation_id)
            .is_some_and(|toggle| toggle.enabled)
    }

    /// Full record for `conversation_id`.
    #[must_use]
    pub fn get(&self, conversation_id: &str) -> Option<Toggle> {
        self.toggles.get(conversation_id).map(|t| t.value().clone())
    }

    /// Flip the flag for `conversation_id` and return the new value.
    ///
    /// Writes the status store, then notifies the webhook. State changes only
    /// after both succeed.
    ///
    /// # Errors
    /// Returns the first remote failure; the cached flag is left as it was.
    pub async fn toggle(&self, conversation_id: &str) -> TrackerResult<bool> {
        let next = !self.is_enabled(conversation_id);

        self.remote.set_chat_status(conversation_id, next).await?;
        self.remote.notify_toggle(conversation_id, next).await?;

        self.toggles.insert(
            conversation_id.to_string(),
            Toggle {
                conversation_id: conversation_id.to_string(),
                enabled: next,
                updated_at: Utc::now(),
            },
        );
        info!(chat_id = %conversation_id, enabled = next, "Toggle changed");

        if let Err(err) = self.persist().await {
            warn!(?err, "Failed to persist toggles");
        }
        Ok(next)
    }

    /// Write every flag to the local slot.
    ///
    /// # Errors
    /// Returns an error if encoding or storage fails.
    pub async fn persist(&self) -> TrackerResult<()> {
        let snapshot: HashMap<String, Toggle> = self
            .toggles
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        save_json(self.local.as_ref(), CacheSlot::Toggles, &snapshot).await
    }
}
