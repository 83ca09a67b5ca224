//! Layered configuration (ambient stack; SPEC_FULL.md §5).
//!
//! Loading order, lowest to highest precedence: compiled-in defaults →
//! `config/switchboard.toml` → `config/switchboard.{env}.toml` →
//! `SWITCHBOARD_*` environment variables (via `.env`, loaded with
//! `dotenvy` if present). Mirrors the base/environment-overlay layering the
//! teacher uses for its own TOML configuration.

use crate::error::{SwitchboardError, SwitchboardResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Circuit breaker tunables (C5/C6 collaborators).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    #[validate(range(min = 1))]
    pub failure_threshold: u32,
    #[validate(range(min = 1))]
    pub success_threshold: u32,
    pub open_timeout_seconds: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_seconds: 30,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_seconds)
    }
}

/// Retry/backoff policy for worker dispatch (C6/C10). Exponential backoff:
/// `base * factor^attempt`, capped at `max_delay_seconds`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct RetrySettings {
    #[validate(range(min = 0))]
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_seconds: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            factor: 2.0,
            max_delay_seconds: 30,
        }
    }
}

/// Blocked-confirmation timeout policy (Open Question 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationTimeoutPolicy {
    Proceed,
    Abort,
}

impl Default for ConfirmationTimeoutPolicy {
    fn default() -> Self {
        ConfirmationTimeoutPolicy::Proceed
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct ConfirmationSettings {
    pub default_timeout_seconds: u64,
    pub default_timeout_policy: ConfirmationTimeoutPolicy,
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 300,
            default_timeout_policy: ConfirmationTimeoutPolicy::Proceed,
        }
    }
}

/// Soft/hard task deadlines (spec §5).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct DeadlineSettings {
    pub soft_seconds: u64,
    pub hard_seconds: u64,
}

impl Default for DeadlineSettings {
    fn default() -> Self {
        Self {
            soft_seconds: 60,
            hard_seconds: 120,
        }
    }
}

impl DeadlineSettings {
    pub fn soft(&self) -> Duration {
        Duration::from_secs(self.soft_seconds)
    }

    pub fn hard(&self) -> Duration {
        Duration::from_secs(self.hard_seconds)
    }
}

/// Worker pool sizing (C6) for one queue. `fast_concurrency`/
/// `heavy_concurrency` (spec §6) are two independently-configured
/// instances of this struct, not one shared field — the fast and heavy
/// lanes have different concurrency needs (spec §4.6: "Each queue has
/// independent worker concurrency").
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct WorkerSettings {
    #[validate(range(min = 1))]
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub sample_memory: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 50,
            sample_memory: false,
        }
    }
}

impl WorkerSettings {
    /// Default sizing for the heavy lane: fewer, slower-polling workers
    /// than the fast lane's default (spec §4.6's soft-limit example gives
    /// heavy tasks 6x the fast lane's runtime budget).
    fn default_heavy() -> Self {
        Self {
            concurrency: 2,
            poll_interval_ms: 200,
            sample_memory: false,
        }
    }
}

/// Progress bus tunables (C4): connection cap and WS heartbeat cadence
/// (spec §6: `max_connections`, `ping_interval_sec`, `ping_timeout_sec`).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct BusSettings {
    #[validate(range(min = 1))]
    pub max_connections: usize,
    pub ping_interval_seconds: u64,
    pub ping_timeout_seconds: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            ping_interval_seconds: 30,
            ping_timeout_seconds: 10,
        }
    }
}

impl BusSettings {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_seconds)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_seconds)
    }
}

/// The bus server's bind address (C4).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Top-level configuration object assembled by [`SwitchboardConfig::load`].
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// Broker endpoint (spec §6: `broker_url`). Carried as a plain field
    /// for whichever binary assembles the broker client — an empty string
    /// means "use the in-memory broker", the same default the broker
    /// provider itself falls back to.
    pub broker_url: String,
    #[validate(nested)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[validate(nested)]
    pub retry: RetrySettings,
    #[validate(nested)]
    pub confirmation: ConfirmationSettings,
    #[validate(nested)]
    pub deadline: DeadlineSettings,
    #[validate(nested)]
    pub fast_worker: WorkerSettings,
    #[serde(default = "WorkerSettings::default_heavy")]
    #[validate(nested)]
    pub heavy_worker: WorkerSettings,
    #[validate(nested)]
    pub bus: BusSettings,
    #[validate(nested)]
    pub server: ServerSettings,
    /// WS/HTTP origin allowlist (spec §6: `cors_allowed_origins`) —
    /// enforcement belongs to the out-of-scope HTTP surface; carried here
    /// as a plain field for that external collaborator to consume.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            broker_url: String::new(),
            circuit_breaker: CircuitBreakerSettings::default(),
            retry: RetrySettings::default(),
            confirmation: ConfirmationSettings::default(),
            deadline: DeadlineSettings::default(),
            fast_worker: WorkerSettings::default(),
            heavy_worker: WorkerSettings::default_heavy(),
            bus: BusSettings::default(),
            server: ServerSettings::default(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl SwitchboardConfig {
    /// Load defaults, overlay `config/switchboard.toml` and
    /// `config/switchboard.{env}.toml` if present, then `SWITCHBOARD_*`
    /// environment variables (a `.env` file is loaded first via `dotenvy`,
    /// silently ignored if absent). `env` defaults to `development`.
    pub fn load(env: Option<&str>) -> SwitchboardResult<Self> {
        let _ = dotenvy::dotenv();
        let env = env.unwrap_or("development");

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/switchboard").required(false))
            .add_source(
                config::File::with_name(&format!("config/switchboard.{env}")).required(false),
            )
            .add_source(config::Environment::with_prefix("SWITCHBOARD").separator("__"));

        let raw: SwitchboardConfig = builder.build()?.try_deserialize()?;
        raw.validate()
            .map_err(|e| SwitchboardError::Config(e.to_string()))?;
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SwitchboardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.confirmation.default_timeout_policy, ConfirmationTimeoutPolicy::Proceed);
    }

    #[test]
    fn circuit_breaker_open_timeout_converts_to_duration() {
        let settings = CircuitBreakerSettings::default();
        assert_eq!(settings.open_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn zero_failure_threshold_is_invalid() {
        let settings = CircuitBreakerSettings {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn load_with_no_files_falls_back_to_defaults() {
        let config = SwitchboardConfig::load(Some("test")).unwrap();
        assert_eq!(config.server.port, ServerSettings::default().port);
    }

    #[test]
    fn fast_and_heavy_worker_settings_are_independently_sized() {
        let config = SwitchboardConfig::default();
        assert_ne!(config.fast_worker.concurrency, config.heavy_worker.concurrency);
    }

    #[test]
    fn load_with_no_files_gives_heavy_worker_its_own_default() {
        let config = SwitchboardConfig::load(Some("test")).unwrap();
        assert_eq!(config.heavy_worker.concurrency, WorkerSettings::default_heavy().concurrency);
    }

    #[test]
    fn bus_settings_convert_to_durations() {
        let bus = BusSettings::default();
        assert_eq!(bus.ping_interval(), Duration::from_secs(30));
        assert_eq!(bus.ping_timeout(), Duration::from_secs(10));
    }
}
