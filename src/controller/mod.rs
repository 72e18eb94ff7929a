pub mod apply;
pub mod backup;
pub mod context;
pub mod error;
pub mod instances;
pub mod observe;
pub mod patroni;
pub mod proxy;
pub mod reconciler;
pub mod status;
pub mod validation;

pub use context::Context;
pub use error::{BackoffConfig, ChildFailure, Error, ErrorClass, Result};
pub use reconciler::{FINALIZER, error_policy, reconcile};
pub use status::{ConditionBuilder, aggregate};
pub use validation::validate_spec;

/// Result of the apply phase of one pass
///
/// Sub-controllers never short-circuit: every failure is collected here and
/// the remaining children are still attempted.
#[derive(Debug, Default)]
pub struct PassOutcome {
    /// Failed child steps; any entry fails the pass
    pub failures: Vec<ChildFailure>,
    /// Work still converging (draining sets, HA retries); shortens the requeue
    pub pending: Vec<String>,
}

impl PassOutcome {
    pub fn fail(&mut self, component: &'static str, target: impl Into<String>, error: Error) {
        let target = target.into();
        tracing::warn!(component, target = %target, class = ?error.class(), "Child step failed: {}", error);
        self.failures.push(ChildFailure {
            component,
            target,
            error,
        });
    }

    pub fn pend(&mut self, note: impl Into<String>) {
        self.pending.push(note.into());
    }

    pub fn merge(&mut self, other: PassOutcome) {
        self.failures.extend(other.failures);
        self.pending.extend(other.pending);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
