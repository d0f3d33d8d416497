//! One simulated chat user driven through the account → room → stream lifecycle.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::api::{ChatApi, RegisterOutcome, Timed};
use crate::error::StepError;
use crate::listener::{Inbox, ListenerExit, MessageListener};
use crate::metrics::{MetricKind, MetricsCollector};
use crate::protocol::{epoch_seconds, OutboundFrame, RoomId};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Lifecycle position. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UserState {
    Unregistered,
    Registered,
    Authenticated,
    RoomMember,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub id: usize,
    pub username: String,
    pub password: String,
    /// Set once by a successful login.
    pub token: Option<String>,
}

struct Connection {
    sink: WsSink,
    listener: JoinHandle<ListenerExit>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

pub struct SimulatedUser {
    identity: Identity,
    state: UserState,
    api: ChatApi,
    metrics: Arc<MetricsCollector>,
    connection: Option<Connection>,
    inbox: Inbox,
}

impl SimulatedUser {
    pub fn new(id: usize, api: ChatApi, metrics: Arc<MetricsCollector>) -> Self {
        let settings = api.settings();
        let identity = Identity {
            id,
            username: settings.username(id),
            password: settings.password.clone(),
            token: None,
        };
        Self {
            identity,
            state: UserState::Unregistered,
            api,
            metrics,
            connection: None,
            inbox: Inbox::default(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    pub fn state(&self) -> UserState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.token.is_some()
    }

    pub fn is_room_member(&self) -> bool {
        self.state >= UserState::RoomMember && self.state != UserState::Disconnected
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Messages received so far by this user's listener.
    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    fn advance(&mut self, to: UserState) {
        self.state = self.state.max(to);
    }

    fn token(&self) -> Result<String, StepError> {
        self.identity
            .token
            .clone()
            .ok_or(StepError::Precondition("not logged in"))
    }

    /// Log a failed step and hand back its value, if any.
    fn outcome<T>(&self, step: &str, result: Result<T, StepError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    "{} failed for {} ({:?}): {}",
                    step,
                    self.identity.username,
                    e.class(),
                    e
                );
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // HTTP steps
    // -------------------------------------------------------------------------

    /// Create the account. An existing account is not an error.
    pub async fn register(&mut self) -> bool {
        let result = self.try_register().await;
        self.outcome("register", result).is_some()
    }

    async fn try_register(&mut self) -> Result<(), StepError> {
        let Timed {
            value: outcome,
            elapsed,
        } = self
            .api
            .register(&self.identity.username, &self.identity.password)
            .await?;
        self.metrics.add_sample(MetricKind::Registration, elapsed);

        match outcome {
            RegisterOutcome::Created => {
                info!(
                    "User {} registered ({}ms)",
                    self.identity.username,
                    elapsed.as_millis()
                );
            }
            RegisterOutcome::Conflict { status, body } => {
                warn!(
                    "User {} already exists or was rejected ({}): {}",
                    self.identity.username, status, body
                );
            }
        }
        self.advance(UserState::Registered);
        Ok(())
    }

    /// Obtain a bearer token. Authenticated steps are refused until this succeeds.
    pub async fn login(&mut self) -> bool {
        let result = self.try_login().await;
        self.outcome("login", result).is_some()
    }

    async fn try_login(&mut self) -> Result<(), StepError> {
        if self.identity.token.is_some() {
            return Err(StepError::Precondition("already logged in"));
        }

        let Timed {
            value: token,
            elapsed,
        } = self
            .api
            .login(&self.identity.username, &self.identity.password)
            .await?;
        self.metrics.add_sample(MetricKind::Login, elapsed);

        self.identity.token = Some(token);
        self.advance(UserState::Authenticated);
        info!(
            "User {} logged in ({}ms)",
            self.identity.username,
            elapsed.as_millis()
        );
        Ok(())
    }

    pub async fn create_room(&mut self, name: &str) -> Option<RoomId> {
        let result = self.try_create_room(name).await;
        self.outcome("create room", result)
    }

    async fn try_create_room(&mut self, name: &str) -> Result<RoomId, StepError> {
        let token = self.token()?;

        let Timed {
            value: room,
            elapsed,
        } = self.api.create_room(&token, name).await?;
        self.metrics.add_sample(MetricKind::RoomCreation, elapsed);

        info!("Room '{}' created as {} ({}ms)", name, room, elapsed.as_millis());
        Ok(room)
    }

    /// Join `room`. Joining a room twice is not distinguished from joining once.
    pub async fn join_room(&mut self, room: RoomId) -> bool {
        let result = self.try_join_room(room).await;
        self.outcome("join room", result).is_some()
    }

    async fn try_join_room(&mut self, room: RoomId) -> Result<(), StepError> {
        let token = self.token()?;

        let Timed { elapsed, .. } = self.api.join_room(&token, room).await?;
        self.metrics.add_sample(MetricKind::RoomJoin, elapsed);

        self.advance(UserState::RoomMember);
        info!(
            "User {} joined room {} ({}ms)",
            self.identity.username,
            room,
            elapsed.as_millis()
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Streaming steps
    // -------------------------------------------------------------------------

    /// Open the WebSocket, subscribe to `room` and start the background listener.
    pub async fn connect(&mut self, room: RoomId) -> bool {
        let result = self.try_connect(room).await;
        self.outcome("connect", result).is_some()
    }

    async fn try_connect(&mut self, room: RoomId) -> Result<(), StepError> {
        if self.connection.is_some() {
            return Err(StepError::Precondition("already connected"));
        }
        let token = self.token()?;
        let url = self.api.settings().stream_url(&token);

        let started = Instant::now();
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let elapsed = started.elapsed();

        let (mut sink, stream) = ws_stream.split();
        let subscribe = OutboundFrame::Subscribe { room_id: room }.encode()?;
        sink.send(Message::Text(subscribe)).await?;

        self.metrics
            .add_sample(MetricKind::ConnectionEstablishment, elapsed);

        let listener = MessageListener::new(
            self.identity.username.clone(),
            Arc::clone(&self.metrics),
            self.inbox.clone(),
        )
        .spawn(stream);

        self.connection = Some(Connection { sink, listener });
        self.advance(UserState::Connected);
        info!(
            "WebSocket connected for {} ({}ms)",
            self.identity.username,
            elapsed.as_millis()
        );
        Ok(())
    }

    /// Write one chat message. The sample covers the local write only.
    pub async fn send_message(&mut self, room: RoomId, content: &str) -> bool {
        let result = self.try_send_message(room, content).await;
        self.outcome("send message", result).is_some()
    }

    async fn try_send_message(&mut self, room: RoomId, content: &str) -> Result<(), StepError> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(StepError::Precondition("not connected"))?;

        let started = Instant::now();
        let frame = OutboundFrame::Message {
            room_id: room,
            content,
            send_timestamp: epoch_seconds(),
        }
        .encode()?;
        connection.sink.send(Message::Text(frame)).await?;
        self.metrics
            .add_sample(MetricKind::MessageSend, started.elapsed());

        let preview: String = content.chars().take(30).collect();
        debug!("{} sent: {}...", self.identity.username, preview);
        Ok(())
    }

    /// Close the WebSocket and wait for the listener, each bounded by the
    /// configured close timeout. A no-op when not connected.
    pub async fn disconnect(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        let close_timeout = self.api.settings().close_timeout;
        let username = &self.identity.username;

        match timeout(close_timeout, connection.sink.close()).await {
            Ok(Ok(())) => debug!("Close frame sent for {}", username),
            Ok(Err(e)) => debug!("Close for {} failed: {}", username, e),
            Err(_) => warn!("Close for {} timed out", username),
        }

        match timeout(close_timeout, &mut connection.listener).await {
            Ok(Ok(exit)) => debug!("Listener for {} finished: {:?}", username, exit),
            Ok(Err(e)) => warn!("Listener for {} panicked: {}", username, e),
            Err(_) => {
                warn!("Listener for {} did not stop in time, aborting", username);
                connection.listener.abort();
            }
        }

        self.advance(UserState::Disconnected);
    }
}
