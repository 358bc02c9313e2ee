//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for log output.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for logs
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error) or full directive
    pub log_level: String,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,

    /// Whether to include the event target in text output
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "offline-sync".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SYNC_SERVICE_NAME`: Service name (default: offline-sync)
    /// - `SYNC_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `SYNC_JSON_LOGS`: Enable JSON logs (default: false)
    pub fn from_env() -> Self {
        Self {
            service_name: env::var("SYNC_SERVICE_NAME")
                .unwrap_or_else(|_| "offline-sync".to_string()),

            log_level: env::var("SYNC_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("SYNC_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false),

            with_target: true,
        }
    }

    /// Configuration used by test harnesses.
    pub fn for_testing() -> Self {
        Self {
            log_level: "debug".to_string(),
            with_target: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "offline-sync");
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs);
    }

    #[test]
    fn test_testing_config() {
        let config = TelemetryConfig::for_testing();
        assert_eq!(config.log_level, "debug");
        assert!(!config.with_target);
    }
}
