//! In-process mock of the chat service: the four HTTP endpoints plus the
//! WebSocket fan-out channel.

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chat_loadsim::ScenarioSettings;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use url::Url;

#[derive(Debug, Clone)]
pub struct MockOptions {
    /// Usernames whose login is answered with 401.
    pub reject_logins: HashSet<String>,
    /// Whether broadcasts carry the sender's `send_timestamp`.
    pub echo_timestamp: bool,
    /// Hold back the body of register and login answers after the status
    /// line has gone out.
    pub body_delay: Duration,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            reject_logins: HashSet::new(),
            echo_timestamp: true,
            body_delay: Duration::ZERO,
        }
    }
}

impl MockOptions {
    pub fn rejecting(usernames: &[&str]) -> Self {
        Self {
            reject_logins: usernames.iter().map(|u| u.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn slow_bodies(delay: Duration) -> Self {
        Self {
            body_delay: delay,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
struct Delivery {
    room: u64,
    sender: u64,
    payload: String,
}

struct MockState {
    options: MockOptions,
    users: Mutex<HashSet<String>>,
    rooms: Mutex<HashSet<u64>>,
    next_room: AtomicU64,
    next_connection: AtomicU64,
    deliveries: broadcast::Sender<Delivery>,
}

impl MockState {
    fn user_for_token(&self, token: &str) -> Option<String> {
        let username = token.strip_prefix("token-")?;
        self.users
            .lock()
            .unwrap()
            .contains(username)
            .then(|| username.to_string())
    }

    fn authorize(&self, headers: &HeaderMap) -> Option<String> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        self.user_for_token(value.strip_prefix("Bearer ")?)
    }
}

pub struct MockChatServer {
    port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockChatServer {
    pub async fn start() -> Self {
        Self::start_with(MockOptions::default()).await
    }

    pub async fn start_with(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (deliveries, _) = broadcast::channel(4096);
        let state = Arc::new(MockState {
            options,
            users: Mutex::new(HashSet::new()),
            rooms: Mutex::new(HashSet::new()),
            next_room: AtomicU64::new(1),
            next_connection: AtomicU64::new(1),
            deliveries,
        });

        let app = Router::new()
            .route("/auth/register", post(register))
            .route("/auth/login", post(login))
            .route("/rooms/create", post(create_room))
            .route("/rooms/:id/join", post(join_room))
            .route("/ws", get(upgrade))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            port,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn http_url(&self) -> Url {
        Url::parse(&format!("http://127.0.0.1:{}", self.port)).unwrap()
    }

    pub fn ws_url(&self) -> Url {
        Url::parse(&format!("ws://127.0.0.1:{}/ws", self.port)).unwrap()
    }

    /// Settings pointed at this server with short pauses.
    pub fn settings(&self) -> ScenarioSettings {
        ScenarioSettings {
            api_url: self.http_url(),
            ws_url: self.ws_url(),
            settle: Duration::from_millis(100),
            pacing: Duration::from_millis(5),
            flood_pacing: Duration::from_millis(5),
            drain: Duration::from_millis(500),
            flood_drain: Duration::from_millis(500),
            flood_drain_per_message: Duration::ZERO,
            close_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            ..ScenarioSettings::default()
        }
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockChatServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Settings aimed at a port nothing listens on.
pub async fn unreachable_settings() -> ScenarioSettings {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    ScenarioSettings {
        api_url: Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap(),
        ws_url: Url::parse(&format!("ws://127.0.0.1:{}/ws", port)).unwrap(),
        settle: Duration::ZERO,
        drain: Duration::ZERO,
        request_timeout: Duration::from_secs(2),
        ..ScenarioSettings::default()
    }
}

// =============================================================================
// HTTP handlers
// =============================================================================

/// JSON answer whose body is streamed only after `options.body_delay`.
fn reply(state: &MockState, status: StatusCode, body: serde_json::Value) -> Response {
    if state.options.body_delay.is_zero() {
        return (status, Json(body)).into_response();
    }
    let delay = state.options.body_delay;
    let chunk = futures_util::stream::once(async move {
        tokio::time::sleep(delay).await;
        Ok::<_, Infallible>(body.to_string())
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(chunk),
    )
        .into_response()
}

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

async fn register(State(state): State<Arc<MockState>>, Json(body): Json<Credentials>) -> Response {
    if body.username.is_empty() || body.password.is_empty() {
        return reply(&state, StatusCode::BAD_REQUEST, json!({"message": "Missing fields"}));
    }
    if !state.users.lock().unwrap().insert(body.username.clone()) {
        return reply(&state, StatusCode::BAD_REQUEST, json!({"message": "Username taken"}));
    }
    reply(&state, StatusCode::OK, json!({"id": 1, "username": body.username}))
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<Credentials>) -> Response {
    let known = state.users.lock().unwrap().contains(&body.username);
    if !known || state.options.reject_logins.contains(&body.username) {
        return reply(&state, StatusCode::UNAUTHORIZED, json!({"message": "Invalid credentials"}));
    }
    reply(
        &state,
        StatusCode::OK,
        json!({
            "token": format!("token-{}", body.username),
            "user": {"username": body.username},
        }),
    )
}

#[derive(Deserialize)]
struct CreateRoom {
    name: String,
    #[serde(default)]
    is_private: bool,
}

async fn create_room(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<CreateRoom>,
) -> Response {
    if state.authorize(&headers).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let id = state.next_room.fetch_add(1, Ordering::Relaxed);
    state.rooms.lock().unwrap().insert(id);
    Json(json!({"id": id, "name": body.name, "is_private": body.is_private})).into_response()
}

async fn join_room(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response {
    if state.authorize(&headers).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if !state.rooms.lock().unwrap().contains(&id) {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "room not found"}))).into_response();
    }
    Json(json!({"joined": true, "message": "joined"})).into_response()
}

// =============================================================================
// WebSocket
// =============================================================================

async fn upgrade(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(username) = query.get("token").and_then(|t| state.user_for_token(t)) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, username))
}

async fn handle_socket(socket: WebSocket, state: Arc<MockState>, username: String) {
    let connection = state.next_connection.fetch_add(1, Ordering::Relaxed);
    let mut deliveries = state.deliveries.subscribe();
    let (mut sender, mut receiver) = socket.split();
    let mut subscribed: Option<u64> = None;

    let welcome = json!({"type": "WELCOME", "user": username}).to_string();
    if sender.send(Message::Text(welcome)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<serde_json::Value>(&text) else {
                        continue;
                    };
                    match frame["type"].as_str() {
                        Some("SUBSCRIBE") => subscribed = frame["roomId"].as_u64(),
                        Some("MESSAGE") => {
                            let Some(room) = frame["roomId"].as_u64() else { continue };
                            let mut payload = json!({
                                "type": "MESSAGE",
                                "roomId": room.to_string(),
                                "username": username,
                                "content": frame["content"],
                            });
                            if state.options.echo_timestamp {
                                payload["send_timestamp"] = frame["send_timestamp"].clone();
                            }
                            let _ = state.deliveries.send(Delivery {
                                room,
                                sender: connection,
                                payload: payload.to_string(),
                            });
                        }
                        _ => {}
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            delivery = deliveries.recv() => match delivery {
                Ok(d) if subscribed == Some(d.room) && d.sender != connection => {
                    if sender.send(Message::Text(d.payload)).await.is_err() {
                        break;
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    let _ = sender.close().await;
}
