//! Tracing subscriber setup for binaries embedding the orchestrator
//!
//! The `[logging]` section of [`OrchestratorConfig`](crate::OrchestratorConfig) maps
//! onto [`LoggingConfig`]. Per-module directives let a host turn up one component,
//! for example `rvoip_call_orchestrator::registration=debug`, without flooding the
//! log with engine pump ticks.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingSettings;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log spans
    pub log_spans: bool,
    /// Application name used in the welcome line
    pub app_name: String,
    /// Extra filter directives applied after the base level
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            app_name: env!("CARGO_PKG_NAME").to_string(),
            directives: Vec::new(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Build from the configuration file's `[logging]` section.
    pub fn from_settings(settings: &LoggingSettings, app_name: impl Into<String>) -> OrchestratorResult<Self> {
        Ok(LoggingConfig {
            level: parse_log_level(&settings.level)?,
            json: settings.json,
            file_info: settings.file_info,
            log_spans: settings.spans,
            app_name: app_name.into(),
            directives: settings.directives.clone(),
        })
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

/// Install the global subscriber. `RUST_LOG` directives are honored on top of the
/// configured level. Fails if a subscriber is already installed.
pub fn setup_logging(config: &LoggingConfig) -> OrchestratorResult<()> {
    let mut filter = EnvFilter::from_default_env().add_directive(config.level.into());
    for raw in &config.directives {
        let directive = Directive::from_str(raw).map_err(|e| OrchestratorError::Logging {
            reason: format!("Invalid directive {:?}: {}", raw, e),
        })?;
        filter = filter.add_directive(directive);
    }

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let mut subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events);

    if config.file_info {
        subscriber = subscriber.with_file(true).with_line_number(true);
    }

    let installed = if config.json {
        subscriber.with_writer(std::io::stdout).json().try_init()
    } else {
        subscriber.try_init()
    };

    installed.map_err(|e| OrchestratorError::Logging {
        reason: e.to_string(),
    })
}

pub fn parse_log_level(level: &str) -> OrchestratorResult<Level> {
    Level::from_str(level).map_err(|_| OrchestratorError::Logging {
        reason: format!("Invalid log level: {}", level),
    })
}

/// Log a welcome message with version info
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} v{}", app_name, version);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn log_levels_parse_case_insensitively() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(matches!(parse_log_level("loud"), Err(OrchestratorError::Logging { .. })));
    }

    #[test]
    fn settings_map_onto_the_subscriber_config() {
        let settings = LoggingSettings {
            level: "debug".to_string(),
            spans: true,
            directives: vec!["rvoip_call_orchestrator::registration=trace".to_string()],
            ..Default::default()
        };

        let config = LoggingConfig::from_settings(&settings, "softphone").unwrap();

        assert_eq!(config.level, Level::DEBUG);
        assert!(config.log_spans);
        assert!(!config.json);
        assert_eq!(config.app_name, "softphone");
        assert_eq!(config.directives, settings.directives);

        let bad = LoggingSettings { level: "chatty".to_string(), ..Default::default() };
        assert!(LoggingConfig::from_settings(&bad, "softphone").is_err());
    }

    #[test]
    #[serial]
    fn bad_directive_is_rejected_before_install() {
        let config = LoggingConfig::new(Level::ERROR, "test").with_directive("registration=loud");
        let err = setup_logging(&config).unwrap_err();
        assert!(matches!(err, OrchestratorError::Logging { ref reason } if reason.contains("registration=loud")));
    }

    #[test]
    #[serial]
    fn second_install_is_reported() {
        let config = LoggingConfig::new(Level::ERROR, "test");
        let _ = setup_logging(&config);
        assert!(setup_logging(&config).is_err());
    }

    #[test]
    #[serial]
    fn json_install_reports_an_existing_subscriber() {
        let config = LoggingConfig::new(Level::ERROR, "test").with_json().with_file_info();
        let _ = setup_logging(&config);
        let err = setup_logging(&config).unwrap_err();
        assert_eq!(err.category(), "configuration");
    }
}
