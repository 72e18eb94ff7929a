//! Operator process configuration
//!
//! Everything is read from the environment once at startup. Unset or
//! unparsable values fall back to the defaults below.

use std::time::Duration;

/// Default number of clusters reconciled in parallel
pub const DEFAULT_RECONCILE_CONCURRENCY: u16 = 4;

/// Default requeue interval of a converged cluster
pub const DEFAULT_REQUEUE_INTERVAL_SECS: u64 = 300;

/// Default port of the health and metrics server
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Process-wide settings
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Restrict the watch to one namespace (`WATCH_NAMESPACE`); cluster-wide when unset
    pub watch_namespace: Option<String>,
    /// Maximum parallel reconciliations (`RECONCILE_CONCURRENCY`)
    pub reconcile_concurrency: u16,
    /// Requeue interval of a converged cluster (`REQUEUE_INTERVAL_SECS`)
    pub requeue_interval: Duration,
    /// Health server port (`HEALTH_PORT`)
    pub health_port: u16,
    /// `LOG_FORMAT=json` switches to JSON logs
    pub log_format: LogFormat,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            reconcile_concurrency: DEFAULT_RECONCILE_CONCURRENCY,
            requeue_interval: Duration::from_secs(DEFAULT_REQUEUE_INTERVAL_SECS),
            health_port: DEFAULT_HEALTH_PORT,
            log_format: LogFormat::Text,
        }
    }
}

impl OperatorConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ns) = lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty()) {
            config.watch_namespace = Some(ns.trim().to_string());
        }

        if let Some(n) = lookup("RECONCILE_CONCURRENCY")
            .and_then(|s| s.parse::<u16>().ok())
            .filter(|n| *n > 0)
        {
            config.reconcile_concurrency = n;
        }

        if let Some(secs) = lookup("REQUEUE_INTERVAL_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|s| *s > 0)
        {
            config.requeue_interval = Duration::from_secs(secs);
        }

        if let Some(port) = lookup("HEALTH_PORT").and_then(|s| s.parse().ok()) {
            config.health_port = port;
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            config.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }

        config
    }
}
