//! Command-line configuration and the scenario settings derived from it.

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Upper bound for the load-scaled flood drain pause.
const MAX_FLOOD_DRAIN: Duration = Duration::from_secs(60);

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "chat-loadsim")]
#[command(about = "Load and latency simulator for the chat service", long_about = None)]
pub struct Config {
    /// Scenario (1: basic interaction, 2: message flood)
    #[arg(long, env = "SCENARIO", default_value = "1", value_parser = clap::value_parser!(u8).range(1..=2))]
    pub scenario: u8,

    /// Number of simulated users
    #[arg(long, env = "USERS", default_value = "5", value_parser = clap::value_parser!(u64).range(1..))]
    pub users: u64,

    /// Messages per user (scenario 2)
    #[arg(long, env = "MESSAGES", default_value = "50", value_parser = clap::value_parser!(u64).range(1..))]
    pub messages: u64,

    /// Chat API base URL
    #[arg(long, env = "API_URL", default_value = "http://localhost:5000")]
    pub api_url: String,

    /// Chat WebSocket URL
    #[arg(long, env = "WS_URL", default_value = "ws://localhost:4000/ws")]
    pub ws_url: String,

    /// Password shared by every simulated user
    #[arg(long, env = "USER_PASSWORD", default_value = "password123")]
    pub password: String,

    /// Username prefix; users are named <prefix>_<id>
    #[arg(long, env = "USER_PREFIX", default_value = "user")]
    pub user_prefix: String,

    /// Append a random run tag to the prefix so identities are never reused
    #[arg(long, env = "FRESH_USERS")]
    pub fresh_users: bool,

    /// Message rounds in scenario 1
    #[arg(long, env = "ROUNDS", default_value = "3")]
    pub rounds: usize,

    /// Pause after connecting, in milliseconds
    #[arg(long, env = "SETTLE_MS", default_value = "2000")]
    pub settle_ms: u64,

    /// Pause between sends in scenario 1, in milliseconds
    #[arg(long, env = "PACING_MS", default_value = "100")]
    pub pacing_ms: u64,

    /// Pause between sends of one user in scenario 2, in milliseconds
    #[arg(long, env = "FLOOD_PACING_MS", default_value = "50")]
    pub flood_pacing_ms: u64,

    /// Pause before disconnecting in scenario 1, in milliseconds
    #[arg(long, env = "DRAIN_MS", default_value = "3000")]
    pub drain_ms: u64,

    /// Base pause before disconnecting in scenario 2, in milliseconds
    #[arg(long, env = "FLOOD_DRAIN_MS", default_value = "5000")]
    pub flood_drain_ms: u64,

    /// Extra drain per message sent in scenario 2, in milliseconds
    #[arg(long, env = "FLOOD_DRAIN_PER_MESSAGE_MS", default_value = "1")]
    pub flood_drain_per_message_ms: u64,

    /// Upper bound for closing one WebSocket, in milliseconds
    #[arg(long, env = "CLOSE_TIMEOUT_MS", default_value = "5000")]
    pub close_timeout_ms: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Also write the report as JSON to this file
    #[arg(long, env = "REPORT_JSON")]
    pub report_json: Option<PathBuf>,
}

impl Config {
    pub fn scenario(&self) -> Scenario {
        let users = self.users as usize;
        match self.scenario {
            2 => Scenario::MessageFlood {
                users,
                messages: self.messages as usize,
            },
            _ => Scenario::BasicInteraction { users },
        }
    }

    pub fn settings(&self) -> Result<ScenarioSettings> {
        let api_url = Url::parse(&self.api_url)
            .context(format!("Invalid API URL: {}", self.api_url))?;
        let ws_url =
            Url::parse(&self.ws_url).context(format!("Invalid WebSocket URL: {}", self.ws_url))?;

        let user_prefix = if self.fresh_users {
            let tag: u32 = rand::rng().random();
            format!("{}_{:08x}", self.user_prefix, tag)
        } else {
            self.user_prefix.clone()
        };

        Ok(ScenarioSettings {
            api_url,
            ws_url,
            password: self.password.clone(),
            user_prefix,
            rounds: self.rounds,
            settle: Duration::from_millis(self.settle_ms),
            pacing: Duration::from_millis(self.pacing_ms),
            flood_pacing: Duration::from_millis(self.flood_pacing_ms),
            drain: Duration::from_millis(self.drain_ms),
            flood_drain: Duration::from_millis(self.flood_drain_ms),
            flood_drain_per_message: Duration::from_millis(self.flood_drain_per_message_ms),
            close_timeout: Duration::from_millis(self.close_timeout_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..ScenarioSettings::default()
        })
    }
}

// =============================================================================
// Scenario Settings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    BasicInteraction { users: usize },
    MessageFlood { users: usize, messages: usize },
}

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::BasicInteraction { .. } => "basic interaction",
            Scenario::MessageFlood { .. } => "message flood",
        }
    }
}

/// Everything the orchestrator needs, independent of how it was configured.
#[derive(Debug, Clone)]
pub struct ScenarioSettings {
    pub api_url: Url,
    pub ws_url: Url,
    pub password: String,
    pub user_prefix: String,
    pub basic_room_name: String,
    pub flood_room_name: String,
    pub rounds: usize,
    pub settle: Duration,
    pub pacing: Duration,
    pub flood_pacing: Duration,
    pub drain: Duration,
    pub flood_drain: Duration,
    pub flood_drain_per_message: Duration,
    pub close_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            api_url: Url::parse("http://localhost:5000").expect("static URL"),
            ws_url: Url::parse("ws://localhost:4000/ws").expect("static URL"),
            password: "password123".to_string(),
            user_prefix: "user".to_string(),
            basic_room_name: "Test Room".to_string(),
            flood_room_name: "Load Room".to_string(),
            rounds: 3,
            settle: Duration::from_secs(2),
            pacing: Duration::from_millis(100),
            flood_pacing: Duration::from_millis(50),
            drain: Duration::from_secs(3),
            flood_drain: Duration::from_secs(5),
            flood_drain_per_message: Duration::from_millis(1),
            close_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ScenarioSettings {
    pub fn username(&self, id: usize) -> String {
        format!("{}_{}", self.user_prefix, id)
    }

    /// Full URL of an API endpoint; `path` starts with `/`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url.as_str().trim_end_matches('/'), path)
    }

    /// WebSocket URL carrying `token` as a query parameter.
    pub fn stream_url(&self, token: &str) -> Url {
        let mut url = self.ws_url.clone();
        url.query_pairs_mut().append_pair("token", token);
        url
    }

    /// Drain pause once a flood has written `messages_sent` frames. Scales
    /// with sends that succeeded, not the requested `users × messages`;
    /// capped at one minute.
    pub fn flood_drain_for(&self, messages_sent: usize) -> Duration {
        let per_message = self
            .flood_drain_per_message
            .saturating_mul(u32::try_from(messages_sent).unwrap_or(u32::MAX));
        self.flood_drain
            .saturating_add(per_message)
            .min(MAX_FLOOD_DRAIN.max(self.flood_drain))
    }
}
