//! # Sync Telemetry
//!
//! Logging setup for the offline sync engine.
//!
//! ## Components
//!
//! - **Config**: `TelemetryConfig` read from the environment
//! - **Logging**: `tracing-subscriber` with an `EnvFilter`, plain or JSON output
//! - **Macros**: `log_*_event!` helpers that stamp a `component` field
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sync_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_logging(&config).expect("logging");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SYNC_SERVICE_NAME` | `offline-sync` | Service name attached to the root span |
//! | `SYNC_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `SYNC_JSON_LOGS` | `false` | Emit JSON lines instead of text |

#![warn(missing_docs)]

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{init_logging, init_test_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The log filter directive could not be parsed.
    #[error("Invalid log filter: {0}")]
    Filter(String),

    /// A global subscriber was already installed.
    #[error("Failed to install subscriber: {0}")]
    Install(String),
}

/// Component names used in the `component` field of structured events.
pub mod components {
    /// Connection state machine.
    pub const CONNECTION: &str = "connection";
    /// Query subscription cache.
    pub const QUERIES: &str = "queries";
    /// Pending mutation queue.
    pub const MUTATIONS: &str = "mutations";
    /// Inbound message dispatcher.
    pub const DISPATCHER: &str = "dispatcher";
    /// Durable collections.
    pub const STORAGE: &str = "storage";
    /// Presence and broadcast rooms.
    pub const ROOMS: &str = "rooms";
}
