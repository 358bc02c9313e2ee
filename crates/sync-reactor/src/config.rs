//! # Reactor Configuration
//!
//! Timing, cache and handshake settings for the Reactor.

use crate::domain::Schema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

/// Default channel endpoint.
pub const DEFAULT_CHANNEL_URI: &str = "wss://api.example.invalid/runtime/session";

/// Reactor configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReactorConfig {
    /// Application id. Sent with `init`; hosts use it to namespace storage.
    pub app_id: String,

    /// Endpoint handed to the transport.
    pub channel_uri: String,

    /// Reconnect delay growth per consecutive failure.
    pub reconnect_step_ms: u64,

    /// Reconnect delay cap.
    pub reconnect_max_ms: u64,

    /// Deadline for one-shot queries while online.
    pub query_once_timeout_ms: u64,

    /// Mutation timeout per queued mutation.
    pub mutation_timeout_base_ms: u64,

    /// Queue size above which acknowledged entries are pruned by age.
    pub pending_cleanup_threshold: usize,

    /// Age after which an acknowledged entry may be pruned.
    pub confirmed_ttl_ms: u64,

    /// Durable subscriptions re-admitted on load.
    pub query_cache_limit: usize,

    /// Collapse cardinality-one attributes in results.
    /// `None` enables it whenever a schema is configured.
    pub cardinality_inference: Option<bool>,

    /// Client library versions sent with `init`.
    pub versions: BTreeMap<String, String>,

    /// Optional local schema.
    #[serde(default)]
    pub schema: Option<Schema>,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            channel_uri: DEFAULT_CHANNEL_URI.to_string(),
            reconnect_step_ms: 1_000,
            reconnect_max_ms: 10_000,
            query_once_timeout_ms: 30_000,
            mutation_timeout_base_ms: 5_000,
            pending_cleanup_threshold: 200,
            confirmed_ttl_ms: 30_000,
            query_cache_limit: 10,
            cardinality_inference: None,
            versions: BTreeMap::from([(
                env!("CARGO_PKG_NAME").to_string(),
                env!("CARGO_PKG_VERSION").to_string(),
            )]),
            schema: None,
        }
    }
}

impl ReactorConfig {
    /// Configuration for `app_id` with defaults elsewhere.
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            ..Self::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SYNC_APP_ID`: Application id (default: empty)
    /// - `SYNC_CHANNEL_URI`: Channel endpoint (default: [`DEFAULT_CHANNEL_URI`])
    /// - `SYNC_QUERY_CACHE_LIMIT`: Re-admitted subscriptions (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            app_id: env::var("SYNC_APP_ID").unwrap_or(defaults.app_id),
            channel_uri: env::var("SYNC_CHANNEL_URI").unwrap_or(defaults.channel_uri),
            query_cache_limit: env::var("SYNC_QUERY_CACHE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.query_cache_limit),
            ..Self::default()
        }
    }

    /// Create a config for testing (short timers).
    pub fn for_testing() -> Self {
        Self {
            app_id: "test-app".to_string(),
            reconnect_step_ms: 10,
            reconnect_max_ms: 100,
            query_once_timeout_ms: 1_000,
            mutation_timeout_base_ms: 500,
            ..Self::default()
        }
    }

    /// Attach a local schema.
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Whether snapshots collapse cardinality-one attributes.
    pub fn cardinality_inference(&self) -> bool {
        self.schema.is_some() && self.cardinality_inference.unwrap_or(true)
    }

    pub(crate) fn query_once_timeout(&self) -> Duration {
        Duration::from_millis(self.query_once_timeout_ms)
    }
}
