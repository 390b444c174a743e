use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::CorrespondentId,
    protocol::{ConversationSummary, MessagePayload, SendMessageRequest},
};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

pub mod connection;
pub mod error;
pub mod index;
pub mod reconcile;

use connection::{ChannelEvent, ChannelSession, ChannelState};
use error::SyncError;
use index::ConversationIndex;
use reconcile::MessageThread;

const EVENT_BUFFER: usize = 1024;

/// Identity shown in the conversation header, derived from the
/// correspondent id (the upstream API carries no display name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactCard {
    pub display_name: String,
    pub number: String,
}

impl ContactCard {
    fn for_correspondent(correspondent_id: &CorrespondentId) -> Self {
        Self {
            display_name: format!("User {}", correspondent_id.suffix(4)),
            number: correspondent_id.to_string(),
        }
    }
}

/// Events emitted by [`SyncClient`] toward the rendering layer.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConversationsUpdated(Vec<ConversationSummary>),
    /// Emitted after every thread mutation, not only on new-message
    /// arrival, so a UI can unconditionally scroll to latest.
    ThreadUpdated {
        correspondent_id: CorrespondentId,
        messages: Vec<MessagePayload>,
    },
    ChannelConnected {
        correspondent_id: CorrespondentId,
    },
    ChannelClosed {
        correspondent_id: CorrespondentId,
        exhausted: bool,
    },
    Error(String),
}

#[derive(Debug, Default)]
struct SyncState {
    index: ConversationIndex,
    thread: MessageThread,
    contact: Option<ContactCard>,
    /// Bumped on every selection change; inbound work tagged with an older
    /// sequence is discarded instead of applied.
    session_seq: u64,
}

/// Facade over the sync engine: Conversation Index, Message Reconciler and
/// one live [`ChannelSession`] for the selected conversation.
///
/// All state mutations are replace-or-merge against the last snapshot and
/// idempotent under re-delivery, so the REST refresh and the push channel
/// may race freely.
pub struct SyncClient {
    http: Client,
    server_url: String,
    ws_base_url: String,
    inner: Mutex<SyncState>,
    channel: Mutex<Option<ChannelSession>>,
    events: broadcast::Sender<ClientEvent>,
}

impl SyncClient {
    pub fn new(server_url: impl Into<String>) -> Result<Arc<Self>, SyncError> {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        let ws_base_url = if let Some(rest) = server_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = server_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(SyncError::InvalidServerUrl);
        };

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Arc::new(Self {
            http: Client::new(),
            server_url,
            ws_base_url,
            inner: Mutex::new(SyncState::default()),
            channel: Mutex::new(None),
            events,
        }))
    }

    /// Fetches the full conversation list, sorts it by most recent
    /// activity and replaces the held list atomically. A failure leaves
    /// the previous list untouched.
    pub async fn refresh_conversations(&self) -> Result<Vec<ConversationSummary>, SyncError> {
        let conversations: Vec<ConversationSummary> = self
            .http
            .get(format!("{}/api/conversations", self.server_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.index.replace_all(conversations);
            inner.index.conversations().to_vec()
        };
        let _ = self
            .events
            .send(ClientEvent::ConversationsUpdated(snapshot.clone()));
        Ok(snapshot)
    }

    /// Opens a live session for `correspondent_id` and loads its thread.
    ///
    /// The previous session is torn down first, so events from the old
    /// conversation's channel can never cross-deliver into the new one.
    pub async fn select_conversation(
        self: &Arc<Self>,
        correspondent_id: CorrespondentId,
    ) -> Result<(), SyncError> {
        if let Some(previous) = self.channel.lock().await.take() {
            previous.close();
        }

        let seq = {
            let mut inner = self.inner.lock().await;
            inner.session_seq += 1;
            inner.index.select(correspondent_id.clone());
            inner.session_seq
        };

        let session = ChannelSession::open(&self.ws_base_url, correspondent_id.clone());
        let channel_events = session.subscribe();
        *self.channel.lock().await = Some(session);
        self.spawn_event_pump(correspondent_id.clone(), seq, channel_events);

        self.load_full(&correspondent_id).await
    }

    /// Replaces the in-memory thread wholesale with the server's
    /// authoritative list and refreshes the header identity.
    ///
    /// A response that arrives after the user already switched away is
    /// discarded rather than applied to the wrong conversation.
    async fn load_full(&self, correspondent_id: &CorrespondentId) -> Result<(), SyncError> {
        let messages: Vec<MessagePayload> = self
            .http
            .get(format!(
                "{}/api/messages/{}",
                self.server_url, correspondent_id
            ))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let snapshot = {
            let mut inner = self.inner.lock().await;
            if inner.index.selected() != Some(correspondent_id) {
                debug!(%correspondent_id, "discarding stale thread response after switch");
                return Ok(());
            }
            inner.thread.replace_all(messages);
            inner.contact = Some(ContactCard::for_correspondent(correspondent_id));
            inner.thread.messages().to_vec()
        };
        let _ = self.events.send(ClientEvent::ThreadUpdated {
            correspondent_id: correspondent_id.clone(),
            messages: snapshot,
        });
        Ok(())
    }

    /// Sends `text` to the selected conversation. The server is the source
    /// of truth for the final message id and status, so both outcomes
    /// trigger a full reload instead of an optimistic local echo.
    pub async fn send_message(&self, text: &str) -> Result<(), SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let correspondent_id = { self.inner.lock().await.index.selected().cloned() }
            .ok_or(SyncError::NoSelection)?;

        let result = self
            .http
            .post(format!("{}/api/send-message", self.server_url))
            .json(&SendMessageRequest {
                wa_id: correspondent_id.clone(),
                text: text.to_string(),
            })
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => self.load_full(&correspondent_id).await,
            Err(err) => {
                warn!(%correspondent_id, "send failed, reloading thread to resync: {err}");
                if let Err(reload_err) = self.load_full(&correspondent_id).await {
                    warn!(%correspondent_id, "recovery reload after failed send failed: {reload_err}");
                }
                Err(err.into())
            }
        }
    }

    /// Tears down the live session and clears the selection.
    pub async fn close(&self) {
        if let Some(session) = self.channel.lock().await.take() {
            session.close();
        }
        let mut inner = self.inner.lock().await;
        inner.session_seq += 1;
        inner.index.clear_selection();
        inner.contact = None;
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn event_stream(&self) -> BroadcastStream<ClientEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        self.inner.lock().await.index.conversations().to_vec()
    }

    pub async fn messages(&self) -> Vec<MessagePayload> {
        self.inner.lock().await.thread.messages().to_vec()
    }

    pub async fn selected_conversation(&self) -> Option<CorrespondentId> {
        self.inner.lock().await.index.selected().cloned()
    }

    pub async fn contact(&self) -> Option<ContactCard> {
        self.inner.lock().await.contact.clone()
    }

    pub async fn channel_state(&self) -> Option<ChannelState> {
        self.channel.lock().await.as_ref().map(ChannelSession::state)
    }

    fn spawn_event_pump(
        self: &Arc<Self>,
        correspondent_id: CorrespondentId,
        seq: u64,
        mut channel_events: broadcast::Receiver<ChannelEvent>,
    ) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let event = match channel_events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%correspondent_id, skipped, "event pump lagged behind channel");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if client.current_seq().await != seq {
                    break;
                }
                match event {
                    ChannelEvent::Connected => {
                        let _ = client.events.send(ClientEvent::ChannelConnected {
                            correspondent_id: correspondent_id.clone(),
                        });
                    }
                    ChannelEvent::Message(payload) => {
                        client.apply_inbound(&correspondent_id, seq, payload).await;
                        // An inbound event may have changed ordering or
                        // preview of the active conversation.
                        if let Err(err) = client.refresh_conversations().await {
                            warn!("conversation refresh after inbound event failed: {err}");
                        }
                    }
                    ChannelEvent::Error(info) => {
                        warn!(%correspondent_id, "live channel error: {info}");
                        let _ = client.events.send(ClientEvent::Error(info));
                    }
                    ChannelEvent::Closed { exhausted } => {
                        let _ = client.events.send(ClientEvent::ChannelClosed {
                            correspondent_id: correspondent_id.clone(),
                            exhausted,
                        });
                        if exhausted {
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn apply_inbound(
        &self,
        correspondent_id: &CorrespondentId,
        seq: u64,
        payload: MessagePayload,
    ) {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            if inner.session_seq != seq || inner.index.selected() != Some(correspondent_id) {
                debug!(%correspondent_id, "discarding inbound event from superseded session");
                return;
            }
            inner.thread.apply_inbound(payload);
            inner.thread.messages().to_vec()
        };
        let _ = self.events.send(ClientEvent::ThreadUpdated {
            correspondent_id: correspondent_id.clone(),
            messages: snapshot,
        });
    }

    async fn current_seq(&self) -> u64 {
        self.inner.lock().await.session_seq
    }
}

/// Object-safe facade over the engine, for rendering layers that want to
/// hold the client behind a trait object.
#[async_trait]
pub trait SyncHandle: Send + Sync {
    async fn refresh_conversations(&self) -> Result<Vec<ConversationSummary>, SyncError>;
    async fn select_conversation(&self, correspondent_id: CorrespondentId)
        -> Result<(), SyncError>;
    async fn send_message(&self, text: &str) -> Result<(), SyncError>;
    async fn close(&self);
    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

#[async_trait]
impl SyncHandle for Arc<SyncClient> {
    async fn refresh_conversations(&self) -> Result<Vec<ConversationSummary>, SyncError> {
        SyncClient::refresh_conversations(self).await
    }

    async fn select_conversation(
        &self,
        correspondent_id: CorrespondentId,
    ) -> Result<(), SyncError> {
        SyncClient::select_conversation(self, correspondent_id).await
    }

    async fn send_message(&self, text: &str) -> Result<(), SyncError> {
        SyncClient::send_message(self, text).await
    }

    async fn close(&self) {
        SyncClient::close(self).await;
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
