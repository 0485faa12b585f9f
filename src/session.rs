//! Operator session: the one object owning loops, caches and signals.
//!
//! A session is built once per login and torn down with
//! [`SyncSession::shutdown`]. Nothing here is global; two sessions never
//! share state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::activity::ActivitySignal;
use crate::chat_list::ChatList;
use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::local_cache::LocalStore;
use crate::messages::MessageStream;
use crate::remote::ChatRemote;
use crate::scheduler::{PollLoop, PollScheduler};
use crate::toggles::ToggleStore;
use crate::types::{Conversation, DisplayMessage, SyncEvent};

const EVENT_CAPACITY: usize = 64;

/// Synchronization context for one operator session.
pub struct SyncSession {
    activity: Arc<ActivitySignal>,
    scheduler: PollScheduler,
    chat_list: Arc<ChatList>,
    messages: Arc<MessageStream>,
    toggles: Arc<ToggleStore>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncSession {
    /// Wire a session over the given collaborators. No loop runs until
    /// [`SyncSession::start`].
    #[must_use]
    pub fn new(
        config: &TrackerConfig,
        remote: Arc<dyn ChatRemote>,
        local: Arc<dyn LocalStore>,
    ) -> Self {
        let activity = Arc::new(ActivitySignal::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            scheduler: PollScheduler::new(Arc::clone(&activity), config.cadence),
            chat_list: Arc::new(ChatList::new(Arc::clone(&remote), Arc::clone(&local))),
            messages: Arc::new(MessageStream::new(Arc::clone(&remote)).with_events(events.clone())),
            toggles: Arc::new(ToggleStore::new(remote, local)),
            activity,
            events,
        }
    }

    /// Hydrate caches and start the chat list loop.
    pub async fn start(&self) {
        match self.chat_list.hydrate_from_local().await {
            Ok(0) => {}
            Ok(count) => {
                info!(count, "Restored cached conversations");
                self.publish(SyncEvent::ChatListChanged);
            }
            Err(err) => warn!(?err, "Could not restore cached conversations"),
        }

        if let Err(err) = self.toggles.hydrate().await {
            warn!(?err, "Could not restore toggles");
        }

        let list = Arc::clone(&self.chat_list);
        let events = self.events.clone();
        self.scheduler.start(PollLoop::ChatList, move || {
            let list = Arc::clone(&list);
            let events = events.clone();
            async move {
                match list.refresh().await {
                    Ok(true) => {
                        let _ = events.send(SyncEvent::ChatListChanged);
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(?err, transient = err.is_transient(), "Chat list refresh failed");
                    }
                }
            }
        });
        info!("Session started");
    }

    /// Record an operator interaction.
    pub fn record_interaction(&self) {
        self.activity.record_interaction();
    }

    /// Report tab visibility.
    pub fn set_visible(&self, visible: bool) {
        self.activity.set_visible(visible);
    }

    /// Follow `conversation_id`: load its history and poll for updates.
    ///
    /// The previous message loop is stopped and its view discarded first.
    pub async fn select(&self, conversation_id: &str) {
        self.activity.record_interaction();
        self.scheduler.stop(PollLoop::Messages);

        let generation = self.messages.begin(conversation_id).await;
        if let Err(err) = self.messages.load_initial(generation).await {
            warn!(chat_id = %conversation_id, ?err, "Initial message load failed");
        }
        self.publish(SyncEvent::MessagesChanged {
            conversation_id: conversation_id.to_string(),
        });

        let stream = Arc::clone(&self.messages);
        let events = self.events.clone();
        let chat_id = conversation_id.to_string();
        self.scheduler.start(PollLoop::Messages, move || {
            let stream = Arc::clone(&stream);
            let events = events.clone();
            let chat_id = chat_id.clone();
            async move {
                match stream.poll_update(generation).await {
                    Ok(true) => {
                        let _ = events.send(SyncEvent::MessagesChanged {
                            conversation_id: chat_id,
                        });
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(%chat_id, ?err, transient = err.is_transient(), "Message update failed");
                    }
                }
            }
        });
    }

    /// Stop following the current conversation.
    pub async fn deselect(&self) {
        self.scheduler.stop(PollLoop::Messages);
        self.messages.clear().await;
    }

    /// Currently selected conversation.
    pub async fn selected(&self) -> Option<String> {
        self.messages.current_conversation().await
    }

    /// Send `text` to the selected conversation with an optimistic echo.
    ///
    /// # Errors
    /// Fails without a selection, or when sending is toggled off for the
    /// selected conversation.
    pub async fn send_message(&self, text: &str) -> TrackerResult<Option<Uuid>> {
        self.activity.record_interaction();

        let conversation_id = self
            .messages
            .current_conversation()
            .await
            .ok_or(TrackerError::NoActiveConversation)?;
        if !self.toggles.is_enabled(&conversation_id) {
            return Err(TrackerError::SendingDisabled(conversation_id));
        }

        let id = self.messages.send_message(text).await?;
        if id.is_some() {
            self.publish(SyncEvent::MessagesChanged { conversation_id });
        }
        Ok(id)
    }

    /// Flip the toggle for `conversation_id`.
    ///
    /// # Errors
    /// Returns the remote failure; the flag is then unchanged.
    pub async fn toggle(&self, conversation_id: &str) -> TrackerResult<bool> {
        self.activity.record_interaction();
        self.toggles.toggle(conversation_id).await
    }

    /// Filtered, sorted conversation list.
    #[must_use]
    pub fn chat_view(&self, search: &str) -> Vec<Conversation> {
        self.chat_list.view(search)
    }

    /// Visible messages of the selected conversation.
    pub async fn messages(&self) -> Vec<DisplayMessage> {
        self.messages.messages().await
    }

    /// All toggle flags.
    #[must_use]
    pub fn toggles(&self) -> HashMap<String, bool> {
        self.toggles.get_all()
    }

    /// Whether sending is enabled for `conversation_id`.
    #[must_use]
    pub fn is_enabled(&self, conversation_id: &str) -> bool {
        self.toggles.is_enabled(conversation_id)
    }

    /// Subscribe to change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Whether loop `name` is running.
    #[must_use]
    pub fn is_polling(&self, name: PollLoop) -> bool {
        self.scheduler.is_running(name)
    }

    /// Stop every loop and drop the selection.
    pub async fn shutdown(&self) {
        self.scheduler.stop_all();
        self.messages.clear().await;
        info!("Session shut down");
    }

    fn publish(&self, event: SyncEvent) {
        // Sending fails only when nobody is subscribed.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_cache::MemoryLocalStore;
    use crate::remote::fake::FakeRemote;
    use crate::types::DeliveryState;
    use serde_json::json;
    use std::time::Duration;

    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    fn session_with(remote: &Arc<FakeRemote>) -> SyncSession {
        SyncSession::new(
            &TrackerConfig::new("http://localhost/webhook"),
            Arc::clone(remote) as Arc<dyn ChatRemote>,
            Arc::new(MemoryLocalStore::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_conversation_stops_previous_loop() {
        let remote = Arc::new(FakeRemote::default());
        remote.set_messages("x", json!([{"bot_message": "x1"}]));
        remote.set_messages("y", json!([{"bot_message": "y1"}]));
        let session = session_with(&remote);
        session.start().await;

        session.select("x").await;
        settle().await;
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;

        session.select("y").await;
        let switched_at = remote.message_calls().len();
        settle().await;

        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(30)).await;
            settle().await;
        }

        let calls = remote.message_calls();
        assert!(calls[..switched_at - 1].iter().all(|id| id == "x"));
        assert!(calls[switched_at - 1..].iter().all(|id| id == "y"));
        assert!(calls.len() > switched_at);
        assert!(session.is_polling(PollLoop::Messages));
        assert!(session.is_polling(PollLoop::ChatList));

        let texts: Vec<String> = session
            .messages()
            .await
            .into_iter()
            .map(|m| m.message.text)
            .collect();
        assert_eq!(texts, vec!["y1".to_string()]);

        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_tab_slows_list_polling() {
        let remote = Arc::new(FakeRemote::default());
        remote.set_conversations(json!([{"chat_id": "a", "user_name": "Ada"}]));
        let session = session_with(&remote);
        session.set_visible(false);
        session.start().await;
        settle().await;
        assert_eq!(session.chat_view("").len(), 1);

        remote.set_conversations(json!([
            {"chat_id": "a", "user_name": "Ada"},
            {"chat_id": "b", "user_name": "Bob"}
        ]));
        tokio::time::advance(Duration::from_secs(20)).await;
        settle().await;
        assert_eq!(session.chat_view("").len(), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(session.chat_view("").len(), 2);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_is_gated_by_toggle() {
        let remote = Arc::new(FakeRemote::default());
        let session = session_with(&remote);

        assert!(matches!(
            session.send_message("hi").await,
            Err(TrackerError::NoActiveConversation)
        ));

        session.select("c").await;
        assert!(matches!(
            session.send_message("hi").await,
            Err(TrackerError::SendingDisabled(id)) if id == "c"
        ));

        assert!(session.toggle("c").await.unwrap());
        let id = session.send_message("hi").await.unwrap();
        assert!(id.is_some());
        assert_eq!(session.messages().await.len(), 1);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_delivery_outcome_is_published() {
        let remote = Arc::new(FakeRemote::default());
        let session = session_with(&remote);
        session.toggle("c").await.unwrap();
        session.select("c").await;

        let mut events = session.subscribe();
        let id = session.send_message("hi").await.unwrap().unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::MessagesChanged {
                conversation_id: "c".to_string()
            }
        );
        loop {
            if let SyncEvent::DeliveryChanged { local_id, state, .. } = events.recv().await.unwrap() {
                assert_eq!(local_id, id);
                assert_eq!(state, DeliveryState::Confirmed);
                break;
            }
        }

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_deselect_discards_view() {
        let remote = Arc::new(FakeRemote::default());
        remote.set_messages("c", json!([{"bot_message": "hello"}]));
        let session = session_with(&remote);

        session.select("c").await;
        assert_eq!(session.messages().await.len(), 1);
        assert_eq!(session.selected().await.as_deref(), Some("c"));

        session.deselect().await;
        assert!(session.messages().await.is_empty());
        assert!(!session.is_polling(PollLoop::Messages));
    }
}
