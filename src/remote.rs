//! Remote collaborators: the chat webhook and the chat-status service.
//!
//! The core only depends on the [`ChatRemote`] contract; [`HttpChatRemote`]
//! is the `reqwest` implementation used by the binaries.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};

/// Boxed future type for remote operations.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Longest response body kept in a [`TrackerError::Status`].
const MAX_ERROR_BODY: usize = 180;

/// Request/response contracts the synchronization core consumes.
pub trait ChatRemote: Send + Sync {
    /// Fetch conversation summaries (one record or a sequence).
    fn fetch_conversations(&self) -> RemoteFuture<'_, TrackerResult<Value>>;

    /// Fetch the message history of `chat_id` (one record or a sequence).
    fn fetch_messages(&self, chat_id: &str) -> RemoteFuture<'_, TrackerResult<Value>>;

    /// Submit an operator message.
    fn send_agent_message(&self, chat_id: &str, text: &str) -> RemoteFuture<'_, TrackerResult<()>>;

    /// Tell the webhook that a conversation was switched on or off.
    fn notify_toggle(&self, chat_id: &str, enabled: bool) -> RemoteFuture<'_, TrackerResult<()>>;

    /// Read every stored toggle.
    fn fetch_chat_statuses(&self) -> RemoteFuture<'_, TrackerResult<HashMap<String, bool>>>;

    /// Store the toggle of one conversation.
    fn set_chat_status(&self, chat_id: &str, enabled: bool) -> RemoteFuture<'_, TrackerResult<()>>;
}

/// Opaque bearer credential issued by the auth service.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    fn header_value(&self) -> Option<HeaderValue> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.0)).ok()?;
        value.set_sensitive(true);
        Some(value)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

#[derive(Debug, Deserialize)]
struct StatusesResponse {
    #[serde(default)]
    statuses: HashMap<String, bool>,
}

/// `reqwest`-backed implementation of [`ChatRemote`].
pub struct HttpChatRemote {
    client: reqwest::Client,
    webhook: Url,
    status_endpoint: Url,
}

impl HttpChatRemote {
    /// Build the client from the tracker configuration.
    ///
    /// # Errors
    /// Returns an error if a URL is invalid or the HTTP client cannot be built.
    pub fn new(config: &TrackerConfig) -> TrackerResult<Self> {
        let webhook = Url::parse(&config.webhook_url)?;
        let status_endpoint = Self::status_endpoint(&config.status_api_base)?;
        let token = config.auth_token.as_deref().map(AuthToken::new);
        let client = Self::build_client(config, token.as_ref())?;

        Ok(Self {
            client,
            webhook,
            status_endpoint,
        })
    }

    /// Resolve `<base>/chat-status`, keeping any path prefix of `base`.
    fn status_endpoint(base: &str) -> TrackerResult<Url> {
        let mut base = base.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Url::parse(&base)?.join("chat-status")?)
    }

    fn build_client(
        config: &TrackerConfig,
        token: Option<&AuthToken>,
    ) -> TrackerResult<reqwest::Client> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(value) = token.and_then(AuthToken::header_value) {
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }

    async fn post_webhook(&self, body: Value) -> TrackerResult<reqwest::Response> {
        let response = self
            .client
            .post(self.webhook.clone())
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await
    }
}

/// Turn a non-success status into [`TrackerError::Status`].
async fn ensure_success(response: reqwest::Response) -> TrackerResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(TrackerError::Status {
        status: status.as_u16(),
        body: body.chars().take(MAX_ERROR_BODY).collect(),
    })
}

/// Read a JSON body; an empty body is `null` rather than a parse error.
async fn read_json(response: reqwest::Response) -> TrackerResult<Value> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

impl ChatRemote for HttpChatRemote {
    fn fetch_conversations(&self) -> RemoteFuture<'_, TrackerResult<Value>> {
        Box::pin(async move {
            let response = self.client.get(self.webhook.clone()).send().await?;
            read_json(ensure_success(response).await?).await
        })
    }

    fn fetch_messages(&self, chat_id: &str) -> RemoteFuture<'_, TrackerResult<Value>> {
        let chat_id = chat_id.to_string();
        Box::pin(async move {
            let response = self
                .post_webhook(json!({"action": "show_chat", "chat_id": chat_id}))
                .await?;
            read_json(response).await
        })
    }

    fn send_agent_message(&self, chat_id: &str, text: &str) -> RemoteFuture<'_, TrackerResult<()>> {
        let body = json!({"action": "agent_message", "chatId": chat_id, "message": text});
        Box::pin(async move {
            self.post_webhook(body).await?;
            Ok(())
        })
    }

    fn notify_toggle(&self, chat_id: &str, enabled: bool) -> RemoteFuture<'_, TrackerResult<()>> {
        let body = json!({"action": "toggle_chat", "chat_id": chat_id, "enabled": enabled});
        Box::pin(async move {
            self.post_webhook(body).await?;
            Ok(())
        })
    }

    fn fetch_chat_statuses(&self) -> RemoteFuture<'_, TrackerResult<HashMap<String, bool>>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.status_endpoint.clone())
                .send()
                .await?;
            let body = read_json(ensure_success(response).await?).await?;
            if body.is_null() {
                return Ok(HashMap::new());
            }
            let parsed: StatusesResponse = serde_json::from_value(body)?;
            Ok(parsed.statuses)
        })
    }

    fn set_chat_status(&self, chat_id: &str, enabled: bool) -> RemoteFuture<'_, TrackerResult<()>> {
        let body = json!({"chat_id": chat_id, "enabled": enabled});
        Box::pin(async move {
            let response = self
                .client
                .post(self.status_endpoint.clone())
                .json(&body)
                .send()
                .await?;
            ensure_success(response).await?;
            Ok(())
        })
    }
}
