//! Structured logging.
//!
//! Events carry a `component` field naming the part of the engine that
//! produced them, so log pipelines can filter on it:
//! - `connection`, `queries`, `mutations`, `dispatcher`, `storage`, `rooms`

use crate::{TelemetryConfig, TelemetryError};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| TelemetryError::Filter(e.to_string()))?;

    let installed = if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(config.with_target)
            .try_init()
    };
    installed.map_err(|e| TelemetryError::Install(e.to_string()))?;

    tracing::debug!(
        service = %config.service_name,
        json_logs = config.json_logs,
        "Structured logging configured"
    );
    Ok(())
}

/// Install a test-writer subscriber once per process. Later calls are no-ops.
pub fn init_test_logging() {
    let config = TelemetryConfig::for_testing();
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_test_writer()
        .try_init();
}

/// Helper to create structured log entries with consistent formatting.
#[macro_export]
macro_rules! log_event {
    ($level:ident, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a query-cache event keyed by query hash.
#[macro_export]
macro_rules! log_query_event {
    ($level:ident, $msg:expr, $hash:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = $crate::components::QUERIES,
            hash = %$hash,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a mutation-queue event keyed by event id.
#[macro_export]
macro_rules! log_mutation_event {
    ($level:ident, $msg:expr, $event_id:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = $crate::components::MUTATIONS,
            event_id = %$event_id,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a connection event keyed by channel generation.
#[macro_export]
macro_rules! log_channel_event {
    ($level:ident, $msg:expr, $generation:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = $crate::components::CONNECTION,
            generation = $generation,
            $($($field)*,)?
            $msg
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        let config = TelemetryConfig {
            log_level: "sync_reactor=notalevel".to_string(),
            ..TelemetryConfig::default()
        };
        assert!(matches!(init_logging(&config), Err(TelemetryError::Filter(_))));
    }

    #[test]
    fn test_init_test_logging_is_idempotent() {
        init_test_logging();
        init_test_logging();
        log_event!(info, crate::components::STORAGE, "after init", keys = 2);
        log_query_event!(debug, "query event", "abc123");
        log_mutation_event!(warn, "mutation event", "evt-1", order = 3);
        log_channel_event!(info, "channel event", 7u64);
    }
}
