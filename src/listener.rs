//! Background task draining one user's inbound WebSocket frames.

use futures_util::{Stream, StreamExt};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::metrics::{MetricKind, MetricsCollector};
use crate::protocol::{epoch_seconds, ChatMessage, InboundFrame};

/// Messages a user has observed, shared only with that user's own listener.
#[derive(Clone, Default)]
pub struct Inbox(Arc<Mutex<Vec<ChatMessage>>>);

impl Inbox {
    fn push(&self, message: ChatMessage) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Why a listener stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerExit {
    /// Close frame received.
    Closed,
    /// The stream ended without a close frame.
    StreamEnded,
    Transport(String),
    Malformed(String),
}

pub struct MessageListener {
    username: String,
    metrics: Arc<MetricsCollector>,
    inbox: Inbox,
}

impl MessageListener {
    pub fn new(username: String, metrics: Arc<MetricsCollector>, inbox: Inbox) -> Self {
        Self {
            username,
            metrics,
            inbox,
        }
    }

    pub fn spawn<S>(self, stream: S) -> JoinHandle<ListenerExit>
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Send + Unpin + 'static,
    {
        tokio::spawn(self.run(stream))
    }

    /// Receive until the connection closes, errors, or delivers an unparseable frame.
    pub async fn run<S>(self, mut stream: S) -> ListenerExit
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Err(e) = self.handle_text(&text) {
                        info!("Listener for {} stopped on malformed frame: {}", self.username, e);
                        return ListenerExit::Malformed(e.to_string());
                    }
                }

                Ok(Message::Close(_)) => {
                    info!("WebSocket closed for {}", self.username);
                    return ListenerExit::Closed;
                }

                Ok(_) => {}

                Err(e) => {
                    info!("Listener for {} stopped: {}", self.username, e);
                    return ListenerExit::Transport(e.to_string());
                }
            }
        }

        debug!("Stream for {} ended", self.username);
        ListenerExit::StreamEnded
    }

    fn handle_text(&self, text: &str) -> Result<(), sonic_rs::Error> {
        let received_at = epoch_seconds();
        match InboundFrame::decode(text)? {
            InboundFrame::Message(message) => self.deliver(message, received_at),
            InboundFrame::Error { error } => {
                warn!(
                    "{} received error frame: {}",
                    self.username,
                    error.as_deref().unwrap_or("unknown")
                );
            }
            other => debug!("{} received {:?}", self.username, other),
        }
        Ok(())
    }

    fn deliver(&self, message: ChatMessage, received_at: f64) {
        if let Some(sent_at) = message.sent_at() {
            self.metrics
                .add_sample_secs(MetricKind::MessageReceive, received_at - sent_at);
        }

        let preview: String = message.content.chars().take(30).collect();
        debug!("{} received: {}...", self.username, preview);
        self.inbox.push(message);
    }
}
