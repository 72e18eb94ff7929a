use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::OperatorConfig;
use crate::controller::error::BackoffConfig;
use crate::health::HealthState;
use crate::store::{KubeStore, ObjectStore};

/// Shared context for the controller
pub struct Context<S: ObjectStore = KubeStore> {
    /// Reads and writes of cluster children
    pub store: S,
    /// Health state for metrics (optional)
    pub health_state: Option<Arc<HealthState>>,
    pub config: OperatorConfig,
    pub backoff: BackoffConfig,
    /// Consecutive failed passes per cluster (`namespace/name`)
    attempts: Mutex<HashMap<String, u32>>,
}

impl<S: ObjectStore> Context<S> {
    pub fn new(store: S, health_state: Option<Arc<HealthState>>, config: OperatorConfig) -> Self {
        Self {
            store,
            health_state,
            config,
            backoff: BackoffConfig::default(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Count a write to a child object
    pub fn record_mutation(&self, kind: &str, verb: &str) {
        if let Some(ref state) = self.health_state {
            state.metrics.record_mutation(kind, verb);
        }
    }

    /// Record a failed pass and return how many failures preceded it
    pub fn next_attempt(&self, key: &str) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let counter = attempts.entry(key.to_string()).or_insert(0);
        let previous = *counter;
        *counter = counter.saturating_add(1);
        previous
    }

    /// Forget the failure streak of a cluster
    pub fn reset_attempts(&self, key: &str) {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}
