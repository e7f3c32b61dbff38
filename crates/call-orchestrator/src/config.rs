//! Orchestrator configuration
//!
//! Every field has a default, so an empty TOML document is a valid configuration.
//! Durations are whole milliseconds.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │     OrchestratorConfig       │
//! │ ┌──────────────────────────┐ │
//! │ │ engine        pump, buf  │ │  • 20 ms engine pump
//! │ │ registration  backoff   ─┼─┼─ • 5 s base, 60 s cap
//! │ │ audio         verify     │ │  • 150 ms route check
//! │ │ notification  ticker     │ │  • 1 s elapsed refresh
//! │ │ credentials   namespace  │ │
//! │ │ commands      capacity   │ │
//! │ │ logging       level, fmt │ │
//! │ └──────────────────────────┘ │
//! └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use rvoip_call_orchestrator::OrchestratorConfig;
//!
//! let config = OrchestratorConfig::from_toml_str(r#"
//!     [registration]
//!     base_delay_ms = 2000
//!
//!     [credentials]
//!     namespace = "work"
//! "#).unwrap();
//!
//! assert_eq!(config.registration.base_delay_ms, 2000);
//! assert_eq!(config.registration.max_delay_ms, 60_000);
//! assert_eq!(config.credentials.namespace, "work");
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::Directive;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::logging::parse_log_level;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Interval between `SipEngine::iterate` calls
    pub pump_interval_ms: u64,
    /// Capacity of the broadcast channel carrying orchestrator events
    pub event_buffer: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pump_interval_ms: 20,
            event_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    /// Register stored credentials at startup when they are marked registered
    pub auto_register: bool,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
            jitter: false,
            auto_register: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Delay before the speakerphone flag is re-checked after a switch
    pub verify_delay_ms: u64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self { verify_delay_ms: 150 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub tick_interval_ms: u64,
    /// Title of the idle service notification
    pub service_title: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            service_title: "SIP Service".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    pub namespace: String,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    /// Capacity of the handle-to-worker command channel
    pub capacity: usize,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

/// Subscriber settings read by [`crate::logging::LoggingConfig::from_settings`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    pub file_info: bool,
    pub spans: bool,
    /// Extra `EnvFilter` directives, e.g. `rvoip_call_orchestrator::registration=debug`
    pub directives: Vec<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
            spans: false,
            directives: Vec::new(),
        }
    }
}

/// Complete orchestrator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub engine: EngineSettings,
    pub registration: RegistrationSettings,
    pub audio: AudioSettings,
    pub notification: NotificationSettings,
    pub credentials: CredentialSettings,
    pub commands: CommandSettings,
    pub logging: LoggingSettings,
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(raw: &str) -> OrchestratorResult<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| OrchestratorError::invalid_configuration("toml", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> OrchestratorResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::invalid_configuration(path.display().to_string(), e.to_string())
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> OrchestratorResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| OrchestratorError::invalid_configuration("toml", e.to_string()))
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.engine.pump_interval_ms == 0 {
            return Err(OrchestratorError::invalid_configuration(
                "engine.pump_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.engine.event_buffer == 0 {
            return Err(OrchestratorError::invalid_configuration(
                "engine.event_buffer",
                "must be greater than zero",
            ));
        }
        if self.registration.base_delay_ms == 0 {
            return Err(OrchestratorError::invalid_configuration(
                "registration.base_delay_ms",
                "must be greater than zero",
            ));
        }
        if self.registration.max_delay_ms < self.registration.base_delay_ms {
            return Err(OrchestratorError::invalid_configuration(
                "registration.max_delay_ms",
                "must not be smaller than base_delay_ms",
            ));
        }
        if self.notification.tick_interval_ms == 0 {
            return Err(OrchestratorError::invalid_configuration(
                "notification.tick_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.credentials.namespace.trim().is_empty() {
            return Err(OrchestratorError::invalid_configuration(
                "credentials.namespace",
                "must not be empty",
            ));
        }
        if self.commands.capacity == 0 {
            return Err(OrchestratorError::invalid_configuration(
                "commands.capacity",
                "must be greater than zero",
            ));
        }
        if parse_log_level(&self.logging.level).is_err() {
            return Err(OrchestratorError::invalid_configuration(
                "logging.level",
                format!("unknown level {:?}", self.logging.level),
            ));
        }
        for directive in &self.logging.directives {
            Directive::from_str(directive).map_err(|e| {
                OrchestratorError::invalid_configuration("logging.directives", e.to_string())
            })?;
        }
        Ok(())
    }

    pub fn with_pump_interval(mut self, interval: Duration) -> Self {
        self.engine.pump_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.registration.base_delay_ms = base.as_millis() as u64;
        self.registration.max_delay_ms = max.as_millis() as u64;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.registration.jitter = jitter;
        self
    }

    pub fn with_auto_register(mut self, auto_register: bool) -> Self {
        self.registration.auto_register = auto_register;
        self
    }

    pub fn with_verify_delay(mut self, delay: Duration) -> Self {
        self.audio.verify_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.notification.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_service_title(mut self, title: impl Into<String>) -> Self {
        self.notification.service_title = title.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.credentials.namespace = namespace.into();
        self
    }

    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.commands.capacity = capacity;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.logging.level = level.into();
        self
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.engine.pump_interval_ms)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.audio.verify_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.notification.tick_interval_ms)
    }
}
