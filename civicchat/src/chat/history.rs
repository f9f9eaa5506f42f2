//! Message history and conversation lists from the REST collaborator.
//!
//! Defines the [`HistorySource`] trait used to hydrate the message store when
//! a conversation is opened, plus two implementations:
//! - [`HttpHistory`]: the relay's REST endpoints over reqwest
//! - [`InMemoryHistory`]: fixed records for testing and offline use

use std::collections::HashMap;

use civicchat_proto::conversation::Conversation;
use civicchat_proto::message::{ConversationKey, Message, Timestamp, UserId};
use parking_lot::Mutex;
use url::Url;

/// Errors from fetching history.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// The base URL is unusable.
    #[error("invalid history url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request could not be made or the body could not be decoded.
    #[error("history request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("history endpoint {url} returned {status}")]
    Status { url: String, status: u16 },
}

/// Paging for history requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: u32,
    /// Only records created strictly before this instant.
    pub before: Option<Timestamp>,
}

impl HistoryQuery {
    #[must_use]
    pub const fn latest(limit: u32) -> Self {
        Self {
            limit,
            before: None,
        }
    }
}

/// Source of persisted messages and conversation summaries.
pub trait HistorySource: Send + Sync + 'static {
    /// Messages of one conversation, ascending by `created_at`.
    fn messages(
        &self,
        key: &ConversationKey,
        query: HistoryQuery,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, HistoryError>> + Send;

    /// Conversations an administrator takes part in.
    fn conversations(
        &self,
        admin_id: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, HistoryError>> + Send;
}

/// REST client for the relay's history endpoints.
#[derive(Debug, Clone)]
pub struct HttpHistory {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl HttpHistory {
    /// # Errors
    ///
    /// Returns [`HistoryError::InvalidUrl`] if `base` does not parse.
    pub fn new(base: &str, token: impl Into<String>) -> Result<Self, HistoryError> {
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            token: token.into(),
        })
    }

    fn messages_url(&self, key: &ConversationKey, query: HistoryQuery) -> Result<Url, HistoryError> {
        let mut url = self.base.join(&format!(
            "conversations/{}/{}/messages",
            key.user_id, key.admin_id
        ))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("limit", &query.limit.to_string());
            if let Some(before) = query.before {
                pairs.append_pair("before", &before.as_millis().to_string());
            }
        }
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, HistoryError> {
        tracing::debug!(url = %url, "history GET");
        let resp = self
            .http
            .get(url.clone())
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(url = %url, status = status.as_u16(), "history request rejected");
            return Err(HistoryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.json().await?)
    }
}

impl HistorySource for HttpHistory {
    async fn messages(
        &self,
        key: &ConversationKey,
        query: HistoryQuery,
    ) -> Result<Vec<Message>, HistoryError> {
        let url = self.messages_url(key, query)?;
        let mut messages: Vec<Message> = self.get_json(url).await?;
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn conversations(&self, admin_id: &UserId) -> Result<Vec<Conversation>, HistoryError> {
        let url = self.base.join(&format!("admins/{admin_id}/conversations"))?;
        self.get_json(url).await
    }
}

impl<T: HistorySource> HistorySource for std::sync::Arc<T> {
    fn messages(
        &self,
        key: &ConversationKey,
        query: HistoryQuery,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, HistoryError>> + Send {
        (**self).messages(key, query)
    }

    fn conversations(
        &self,
        admin_id: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, HistoryError>> + Send {
        (**self).conversations(admin_id)
    }
}

/// In-memory history keyed by conversation.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    messages: Mutex<HashMap<ConversationKey, Vec<Message>>>,
}

impl InMemoryHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record to its conversation.
    pub fn push(&self, message: Message) {
        self.messages
            .lock()
            .entry(message.conversation.clone())
            .or_default()
            .push(message);
    }
}

impl HistorySource for InMemoryHistory {
    async fn messages(
        &self,
        key: &ConversationKey,
        query: HistoryQuery,
    ) -> Result<Vec<Message>, HistoryError> {
        let mut records: Vec<Message> = self
            .messages
            .lock()
            .get(key)
            .map(|list| {
                list.iter()
                    .filter(|m| query.before.is_none_or(|before| m.created_at < before))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by_key(|m| m.created_at);
        let limit = usize::try_from(query.limit).unwrap_or(usize::MAX);
        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }

    async fn conversations(&self, admin_id: &UserId) -> Result<Vec<Conversation>, HistoryError> {
        let messages = self.messages.lock();
        Ok(messages
            .iter()
            .filter(|(key, _)| &key.admin_id == admin_id)
            .map(|(key, list)| {
                let mut summary = Conversation::new(key);
                if let Some(last) = list.iter().max_by_key(|m| m.created_at) {
                    summary.last_message = Some(last.content.clone());
                    summary.last_message_at = Some(last.created_at);
                }
                summary.unread_count = u32::try_from(
                    list.iter()
                        .filter(|m| &m.sender_id != admin_id && !m.is_seen())
                        .count(),
                )
                .unwrap_or(u32::MAX);
                summary
            })
            .collect())
    }
}
