//! Message stream of the selected conversation.
//!
//! Holds the last fetched history plus the operator's optimistic echoes.
//! Every selection bumps a generation counter; fetches carry the generation
//! they were issued under and are dropped if the selection moved on.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{TrackerError, TrackerResult};
use crate::payload;
use crate::remote::ChatRemote;
use crate::sequence::RequestSequencer;
use crate::types::{
    DeliveryState, Direction, DisplayMessage, Message, OutboundMessage, SyncEvent,
};

#[derive(Debug, Default)]
struct StreamState {
    generation: u64,
    conversation_id: Option<String>,
    fetched: Option<Vec<Message>>,
    outbound: Vec<OutboundMessage>,
}

impl StreamState {
    fn target(&self, generation: u64) -> Option<String> {
        if self.generation == generation {
            self.conversation_id.clone()
        } else {
            None
        }
    }

    fn outbound_count(&self, text: &str) -> Option<usize> {
        self.fetched
            .as_deref()
            .map(|fetched| count_outbound(fetched, text))
    }

    /// Drop echoes the server history now mirrors. Returns how many were dropped.
    fn prune_mirrored(&mut self) -> usize {
        let Some(fetched) = self.fetched.as_deref() else {
            return 0;
        };

        let mut consumed: HashMap<String, usize> = HashMap::new();
        let before = self.outbound.len();
        self.outbound.retain(|echo| {
            let text = &echo.message.text;
            let seen = consumed.get(text).copied().unwrap_or(0);
            if count_outbound(fetched, text) > echo.baseline + seen {
                consumed.insert(text.clone(), seen + 1);
                false
            } else {
                true
            }
        });
        before - self.outbound.len()
    }
}

fn count_outbound(messages: &[Message], text: &str) -> usize {
    messages
        .iter()
        .filter(|m| m.direction == Direction::Outbound && m.text == text)
        .count()
}

/// Fetch/diff logic and optimistic echo for one selected conversation.
pub struct MessageStream {
    remote: Arc<dyn ChatRemote>,
    state: Arc<RwLock<StreamState>>,
    sequencer: RequestSequencer,
    events: Option<broadcast::Sender<SyncEvent>>,
}

impl MessageStream {
    /// Create a stream with no selection.
    #[must_use]
    pub fn new(remote: Arc<dyn ChatRemote>) -> Self {
        Self {
            remote,
            state: Arc::new(RwLock::new(StreamState::default())),
            sequencer: RequestSequencer::new(),
            events: None,
        }
    }

    /// Publish delivery outcomes on `events`.
    #[must_use]
    pub fn with_events(mut self, events: broadcast::Sender<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Switch to `conversation_id`, discarding the previous view and echoes.
    ///
    /// Returns the generation that fetches for this selection must carry.
    pub async fn begin(&self, conversation_id: impl Into<String>) -> u64 {
        let conversation_id = conversation_id.into();
        let mut state = self.state.write().await;
        state.generation += 1;
        state.fetched = None;
        state.outbound.clear();
        info!(chat_id = %conversation_id, generation = state.generation, "Conversation selected");
        state.conversation_id = Some(conversation_id);
        state.generation
    }

    /// Drop the selection and everything held for it.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.generation += 1;
        state.conversation_id = None;
        state.fetched = None;
        state.outbound.clear();
    }

    /// Full fetch for a fresh selection.
    ///
    /// On failure the view becomes an empty history and the error is returned.
    ///
    /// # Errors
    /// Returns the fetch error after resetting the view.
    pub async fn load_initial(&self, generation: u64) -> TrackerResult<()> {
        let Some(chat_id) = self.state.read().await.target(generation) else {
            return Ok(());
        };

        let seq = self.sequencer.issue();
        let result = self.remote.fetch_messages(&chat_id).await;

        let mut state = self.state.write().await;
        if state.generation != generation || !self.sequencer.try_accept(seq) {
            debug!(%chat_id, generation, seq, "Discarding stale initial messages");
            return Ok(());
        }

        match result {
            Ok(payload) => {
                let fetched = payload::messages(payload);
                debug!(%chat_id, count = fetched.len(), "Loaded message history");
                state.fetched = Some(fetched);
                state.prune_mirrored();
                Ok(())
            }
            Err(err) => {
                state.fetched = Some(Vec::new());
                Err(err)
            }
        }
    }

    /// Periodic fetch. Returns whether the visible stream changed.
    ///
    /// A failed fetch leaves the view untouched.
    ///
    /// # Errors
    /// Returns the fetch error.
    pub async fn poll_update(&self, generation: u64) -> TrackerResult<bool> {
        let Some(chat_id) = self.state.read().await.target(generation) else {
            return Ok(false);
        };

        let seq = self.sequencer.issue();
        let payload = self.remote.fetch_messages(&chat_id).await?;
        let fetched = payload::messages(payload);

        let mut state = self.state.write().await;
        if state.generation != generation || !self.sequencer.try_accept(seq) {
            debug!(%chat_id, generation, seq, "Discarding stale message update");
            return Ok(false);
        }

        let history_changed = state.fetched.as_ref() != Some(&fetched);
        if history_changed {
            state.fetched = Some(fetched);
        }
        let confirmed = state.prune_mirrored();
        if confirmed > 0 {
            debug!(%chat_id, confirmed, "Echoes mirrored by server history");
        }

        Ok(history_changed || confirmed > 0)
    }

    /// Echo `text` locally and submit it in the background.
    ///
    /// Surrounding whitespace is trimmed; blank text is ignored and yields
    /// `None`. The echo is visible as soon as this returns and the
    /// submission outcome updates its delivery state.
    ///
    /// # Errors
    /// Returns [`TrackerError::NoActiveConversation`] without a selection and
    /// [`TrackerError::HistoryNotLoaded`] before the initial load has landed.
    pub async fn send_message(&self, text: &str) -> TrackerResult<Option<Uuid>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let (chat_id, generation, id) = {
            let mut state = self.state.write().await;
            let chat_id = state
                .conversation_id
                .clone()
                .ok_or(TrackerError::NoActiveConversation)?;
            // The mirror baseline needs the history the echo will be compared against.
            let Some(baseline) = state.outbound_count(text) else {
                return Err(TrackerError::HistoryNotLoaded(chat_id));
            };
            let id = Uuid::new_v4();
            state.outbound.push(OutboundMessage {
                id,
                message: Message::outbound(text, Some(Utc::now())),
                state: DeliveryState::Pending,
                baseline,
            });
            (chat_id, state.generation, id)
        };

        let remote = Arc::clone(&self.remote);
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let text = text.to_string();
        tokio::spawn(async move {
            let outcome = match remote.send_agent_message(&chat_id, &text).await {
                Ok(()) => DeliveryState::Confirmed,
                Err(err) => {
                    warn!(%chat_id, ?err, "Message delivery failed");
                    DeliveryState::Failed
                }
            };

            let mut state = state.write().await;
            if state.generation != generation {
                return;
            }
            let Some(echo) = state.outbound.iter_mut().find(|echo| echo.id == id) else {
                return;
            };
            echo.state = outcome;
            drop(state);

            if let Some(events) = events {
                // No subscribers is fine.
                let _ = events.send(SyncEvent::DeliveryChanged {
                    conversation_id: chat_id,
                    local_id: id,
                    state: outcome,
                });
            }
        });

        Ok(Some(id))
    }

    /// Fetched history followed by local echoes.
    pub async fn messages(&self) -> Vec<DisplayMessage> {
        let state = self.state.read().await;
        let fetched = state.fetched.iter().flatten().map(|message| DisplayMessage {
            message: message.clone(),
            delivery: None,
            local_id: None,
        });
        let echoes = state.outbound.iter().map(|echo| DisplayMessage {
            message: echo.message.clone(),
            delivery: Some(echo.state),
            local_id: Some(echo.id),
        });
        fetched.chain(echoes).collect()
    }

    /// Local echoes not yet mirrored by the server.
    pub async fn pending_echoes(&self) -> Vec<OutboundMessage> {
        self.state.read().await.outbound.clone()
    }

    /// Currently selected conversation.
    pub async fn current_conversation(&self) -> Option<String> {
        self.state.read().await.conversation_id.clone()
    }

    /// Whether the initial load for the current selection has landed.
    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.fetched.is_some()
    }
}
