//! Scenario orchestration: barrier-synchronized fan-out of user lifecycle phases.

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info};

use crate::api::ChatApi;
use crate::config::{Scenario, ScenarioSettings};
use crate::error::{ScenarioAbort, StepError};
use crate::metrics::MetricsCollector;
use crate::protocol::RoomId;
use crate::user::SimulatedUser;

/// Outcome of one scenario invocation. Aborted runs keep what they measured.
pub struct ScenarioRun {
    pub scenario: Scenario,
    pub metrics: Arc<MetricsCollector>,
    pub abort: Option<ScenarioAbort>,
    pub elapsed: Duration,
}

impl ScenarioRun {
    pub fn completed(&self) -> bool {
        self.abort.is_none()
    }
}

pub struct ScenarioRunner {
    settings: Arc<ScenarioSettings>,
    api: ChatApi,
}

fn successes(results: &[bool]) -> usize {
    results.iter().filter(|ok| **ok).count()
}

impl ScenarioRunner {
    pub fn new(settings: ScenarioSettings) -> Result<Self, StepError> {
        let settings = Arc::new(settings);
        let api = ChatApi::new(Arc::clone(&settings))?;
        Ok(Self { settings, api })
    }

    pub fn settings(&self) -> &ScenarioSettings {
        &self.settings
    }

    /// A user bound to this runner's API client and `metrics`.
    pub fn user(&self, id: usize, metrics: &Arc<MetricsCollector>) -> SimulatedUser {
        SimulatedUser::new(id, self.api.clone(), Arc::clone(metrics))
    }

    fn users(&self, count: usize, metrics: &Arc<MetricsCollector>) -> Vec<SimulatedUser> {
        (0..count).map(|id| self.user(id, metrics)).collect()
    }

    pub async fn run(&self, scenario: Scenario) -> ScenarioRun {
        let started = Instant::now();
        let metrics = Arc::new(MetricsCollector::new());

        info!("Starting scenario: {}", scenario.name());
        let result = match scenario {
            Scenario::BasicInteraction { users } => {
                self.basic_interaction(users, &metrics).await
            }
            Scenario::MessageFlood { users, messages } => {
                self.message_flood(users, messages, &metrics).await
            }
        };

        let abort = result.err();
        if let Some(abort) = &abort {
            error!("Scenario aborted: {}", abort);
        }

        ScenarioRun {
            scenario,
            metrics,
            abort,
            elapsed: started.elapsed(),
        }
    }

    // =========================================================================
    // Shared phases
    // =========================================================================

    /// Joins and connects every logged-in user, then waits for the settle pause.
    async fn join_and_connect(&self, users: &mut [SimulatedUser], room: RoomId) {
        info!("Joining users to room {}", room);
        let joined = join_all(
            users
                .iter_mut()
                .filter(|u| u.is_authenticated())
                .map(|u| u.join_room(room)),
        )
        .await;
        info!("Joined: {}/{}", successes(&joined), users.len());

        info!("Connecting WebSockets");
        let connected = join_all(
            users
                .iter_mut()
                .filter(|u| u.is_room_member())
                .map(|u| u.connect(room)),
        )
        .await;
        info!("Connected: {}/{}", successes(&connected), users.len());

        sleep(self.settings.settle).await;
    }

    async fn disconnect_all(&self, users: &mut [SimulatedUser]) {
        info!("Disconnecting users");
        for user in users.iter_mut() {
            user.disconnect().await;
        }
    }

    // =========================================================================
    // Scenario 1: basic interaction
    // =========================================================================

    /// Concurrent register/login/join/connect, then paced sequential messaging.
    async fn basic_interaction(
        &self,
        count: usize,
        metrics: &Arc<MetricsCollector>,
    ) -> Result<(), ScenarioAbort> {
        if count == 0 {
            return Err(ScenarioAbort::NoUsers);
        }
        info!("Simulating {} users", count);
        let mut users = self.users(count, metrics);

        info!("Registering users");
        let registered = join_all(users.iter_mut().map(|u| u.register())).await;
        info!("Registered: {}/{}", successes(&registered), count);

        info!("Logging in users");
        let logged_in = join_all(users.iter_mut().map(|u| u.login())).await;
        let ok = successes(&logged_in);
        info!("Logged in: {}/{}", ok, count);
        if ok < count {
            return Err(ScenarioAbort::LoginFailed {
                failed: count - ok,
                total: count,
            });
        }

        info!("Creating room");
        let room = users[0]
            .create_room(&self.settings.basic_room_name)
            .await
            .ok_or(ScenarioAbort::RoomCreationFailed)?;

        self.join_and_connect(&mut users, room).await;

        info!("Sending messages");
        for round in 1..=self.settings.rounds {
            for user in users.iter_mut().filter(|u| u.is_connected()) {
                let content = format!("Message {} from {}", round, user.username());
                user.send_message(room, &content).await;
                sleep(self.settings.pacing).await;
            }
        }

        sleep(self.settings.drain).await;
        self.disconnect_all(&mut users).await;
        Ok(())
    }

    // =========================================================================
    // Scenario 2: message flood
    // =========================================================================

    /// Every connected user sends `messages` concurrently with all others.
    async fn message_flood(
        &self,
        count: usize,
        messages: usize,
        metrics: &Arc<MetricsCollector>,
    ) -> Result<(), ScenarioAbort> {
        if count == 0 {
            return Err(ScenarioAbort::NoUsers);
        }
        info!("Simulating {} users sending {} messages each", count, messages);
        let mut users = self.users(count, metrics);

        info!("Provisioning users");
        for user in users.iter_mut() {
            user.register().await;
            user.login().await;
        }

        if !users[0].is_authenticated() {
            return Err(ScenarioAbort::AnchorLoginFailed {
                username: users[0].username().to_string(),
            });
        }
        let room = users[0]
            .create_room(&self.settings.flood_room_name)
            .await
            .ok_or(ScenarioAbort::RoomCreationFailed)?;

        self.join_and_connect(&mut users, room).await;

        info!("Sending messages in parallel");
        let pacing = self.settings.flood_pacing;
        let senders = users.iter_mut().filter(|u| u.is_connected()).map(|user| async move {
            let mut sent = 0;
            for i in 0..messages {
                let content = format!("Message {} from {}", i, user.username());
                if user.send_message(room, &content).await {
                    sent += 1;
                }
                sleep(pacing).await;
            }
            sent
        });
        let sent: usize = join_all(senders).await.into_iter().sum();
        info!("Sent {} messages", sent);

        sleep(self.settings.flood_drain_for(sent)).await;
        self.disconnect_all(&mut users).await;
        Ok(())
    }
}
