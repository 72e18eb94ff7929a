//! Admission webhook policies
//!
//! Each policy module exports a `validate` function that checks specific rules.
//! Policies see the declaration after defaulting, the same form the
//! reconciler acts on.

pub mod declaration;
pub mod immutability;

pub use declaration::validate_declaration;
pub use immutability::validate_immutability;

use crate::crd::PostgresCluster;

/// Result of a policy validation
#[derive(Debug)]
pub struct ValidationResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}

/// Context for validation including old object for UPDATE operations
pub struct ValidationContext<'a> {
    pub cluster: &'a PostgresCluster,
    pub old_cluster: Option<&'a PostgresCluster>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(cluster: &'a PostgresCluster, old_cluster: Option<&'a PostgresCluster>) -> Self {
        Self {
            cluster,
            old_cluster,
        }
    }

    /// Check if this is a CREATE operation (no old object)
    pub fn is_create(&self) -> bool {
        self.old_cluster.is_none()
    }
}

/// Run all validation policies and return the first failure
pub fn validate_all(ctx: &ValidationContext) -> ValidationResult {
    let policies: [fn(&ValidationContext) -> ValidationResult; 2] =
        [validate_declaration, validate_immutability];

    for policy in policies {
        let result = policy(ctx);
        if !result.allowed {
            return result;
        }
    }

    ValidationResult::allowed()
}
