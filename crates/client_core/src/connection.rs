use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use futures::StreamExt;
use shared::{
    domain::CorrespondentId,
    protocol::{InboundFrame, MessagePayload},
};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, info, warn};

/// Reconnect budget per live session. Once spent, the session stays closed
/// until the caller opens a fresh one.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

const RECONNECT_DELAY_STEP: Duration = Duration::from_millis(2000);
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Events surfaced by a live channel, keepalive noise already filtered out.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Connected,
    Message(MessagePayload),
    Error(String),
    Closed { exhausted: bool },
}

/// Bounded linear backoff: delays of `2000ms * attempt_count` for five
/// attempts (0, 2000, 4000, 6000, 8000 ms), then permanently exhausted.
#[derive(Debug, Default)]
pub struct ReconnectPolicy {
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= MAX_RECONNECT_ATTEMPTS {
            return None;
        }
        let delay = RECONNECT_DELAY_STEP * self.attempts;
        self.attempts += 1;
        Some(delay)
    }

    /// A successful open resets the budget for the next disconnection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// One live-updates channel scoped to a single conversation.
///
/// The session owns a background task that connects, reads frames, and
/// reconnects per [`ReconnectPolicy`]. `close` is deterministic: the task is
/// aborted, so no events are delivered afterward and no reconnect happens.
pub struct ChannelSession {
    correspondent_id: CorrespondentId,
    events: broadcast::Sender<ChannelEvent>,
    state: watch::Receiver<ChannelState>,
    closed: AtomicBool,
    task: tokio::task::JoinHandle<()>,
}

impl ChannelSession {
    pub fn open(ws_base_url: &str, correspondent_id: CorrespondentId) -> Self {
        let url = format!("{ws_base_url}/api/ws/{correspondent_id}");
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (state_tx, state) = watch::channel(ChannelState::Idle);
        let task = tokio::spawn(run_channel(url, events.clone(), state_tx));
        Self {
            correspondent_id,
            events,
            state,
            closed: AtomicBool::new(false),
            task,
        }
    }

    pub fn correspondent_id(&self) -> &CorrespondentId {
        &self.correspondent_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// The event feed as a `Stream`, for consumers that prefer combinators
    /// over a receive loop.
    pub fn event_stream(&self) -> BroadcastStream<ChannelEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    pub fn state(&self) -> ChannelState {
        if self.closed.load(Ordering::SeqCst) {
            return ChannelState::Closed;
        }
        *self.state.borrow()
    }

    /// Terminates the channel. Guaranteed: no events are delivered after
    /// this returns and no automatic reconnect is attempted.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_channel(
    url: String,
    events: broadcast::Sender<ChannelEvent>,
    state: watch::Sender<ChannelState>,
) {
    let mut policy = ReconnectPolicy::default();
    loop {
        let _ = state.send(ChannelState::Connecting);
        match connect_async(&url).await {
            Ok((stream, _)) => {
                policy.reset();
                let _ = state.send(ChannelState::Open);
                let _ = events.send(ChannelEvent::Connected);
                info!(%url, "live channel connected");
                read_frames(stream, &events).await;
                warn!(%url, "live channel closed unexpectedly");
            }
            Err(err) => {
                let _ = events.send(ChannelEvent::Error(format!(
                    "websocket connect failed: {err}"
                )));
            }
        }

        match policy.next_delay() {
            Some(delay) => {
                info!(
                    %url,
                    attempt = policy.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "scheduling live channel reconnect"
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                warn!(%url, "live channel reconnect budget exhausted");
                let _ = state.send(ChannelState::Closed);
                let _ = events.send(ChannelEvent::Closed { exhausted: true });
                return;
            }
        }
    }
}

async fn read_frames<S>(stream: WebSocketStream<S>, events: &broadcast::Sender<ChannelEvent>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (_, mut reader) = stream.split();
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => match InboundFrame::parse(&text) {
                Ok(InboundFrame::Keepalive) => {
                    debug!("filtered keepalive frame");
                }
                Ok(InboundFrame::Message(payload)) => {
                    let _ = events.send(ChannelEvent::Message(payload));
                }
                Err(err) => {
                    let _ = events.send(ChannelEvent::Error(format!(
                        "invalid channel frame: {err}"
                    )));
                }
            },
            Ok(Message::Close(_)) => return,
            Ok(_) => {}
            // Transport errors are reported but do not themselves end the
            // session; the stream ending drives reconnection.
            Err(err) => {
                let _ = events.send(ChannelEvent::Error(format!(
                    "websocket receive failed: {err}"
                )));
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
