//! HTTP client for the chat service's account and room endpoints.

use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ScenarioSettings;
use crate::error::StepError;
use crate::protocol::RoomId;

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateRoomRequest<'a> {
    name: &'a str,
    is_private: bool,
}

/// Serializes as `{}`.
#[derive(Debug, Serialize)]
struct EmptyBody {}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct CreatedRoom {
    id: RoomId,
}

/// How the service answered a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    /// Non-success answer, usually "username taken" from an earlier run.
    Conflict { status: u16, body: String },
}

/// An answer plus the time until its response status arrived. Body reads
/// and decoding are not included.
#[derive(Debug, Clone, PartialEq)]
pub struct Timed<T> {
    pub value: T,
    pub elapsed: Duration,
}

/// Shared handle to the chat API; cheap to clone.
#[derive(Clone)]
pub struct ChatApi {
    client: Client,
    settings: Arc<ScenarioSettings>,
}

impl ChatApi {
    pub fn new(settings: Arc<ScenarioSettings>) -> Result<Self, StepError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .pool_max_idle_per_host(500)
            .build()?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &Arc<ScenarioSettings> {
        &self.settings
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Timed<RegisterOutcome>, StepError> {
        let request = self
            .client
            .post(self.settings.endpoint("/auth/register"))
            .json(&Credentials { username, password });
        let (response, elapsed) = send_timed(request).await?;

        let value = if response.status().is_success() {
            RegisterOutcome::Created
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            RegisterOutcome::Conflict { status, body }
        };
        Ok(Timed { value, elapsed })
    }

    /// Exchange credentials for a bearer token.
    pub async fn login(&self, username: &str, password: &str) -> Result<Timed<String>, StepError> {
        let request = self
            .client
            .post(self.settings.endpoint("/auth/login"))
            .json(&Credentials { username, password });
        let (response, elapsed) = send_timed(request).await?;

        let body: LoginResponse = expect_success(response).await?.json().await?;
        Ok(Timed {
            value: body.token,
            elapsed,
        })
    }

    pub async fn create_room(&self, token: &str, name: &str) -> Result<Timed<RoomId>, StepError> {
        let request = self
            .client
            .post(self.settings.endpoint("/rooms/create"))
            .bearer_auth(token)
            .json(&CreateRoomRequest {
                name,
                is_private: false,
            });
        let (response, elapsed) = send_timed(request).await?;

        let room: CreatedRoom = expect_success(response).await?.json().await?;
        Ok(Timed {
            value: room.id,
            elapsed,
        })
    }

    pub async fn join_room(&self, token: &str, room: RoomId) -> Result<Timed<()>, StepError> {
        let request = self
            .client
            .post(self.settings.endpoint(&format!("/rooms/{}/join", room)))
            .bearer_auth(token)
            .json(&EmptyBody {});
        let (response, elapsed) = send_timed(request).await?;

        expect_success(response).await?;
        Ok(Timed { value: (), elapsed })
    }
}

/// Send `request`, stopping the clock as soon as the status line is in.
async fn send_timed(request: RequestBuilder) -> Result<(Response, Duration), StepError> {
    let started = Instant::now();
    let response = request.send().await?;
    Ok((response, started.elapsed()))
}

async fn expect_success(response: Response) -> Result<Response, StepError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(StepError::Status { status, body })
}
