//! Load generation and latency measurement for a chat service exposed over
//! HTTP (accounts, rooms) and WebSocket (message fan-out).

pub mod api;
pub mod config;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod protocol;
pub mod scenario;
pub mod user;

pub use config::{Config, Scenario, ScenarioSettings};
pub use error::{ScenarioAbort, StepError};
pub use metrics::{MetricKind, MetricsCollector, Report, Summary};
pub use scenario::{ScenarioRun, ScenarioRunner};
pub use user::{SimulatedUser, UserState};
