//! Declaration validity
//!
//! Rejects at admission what the reconciler would otherwise only report in
//! status: the rules are the same [`validate_spec`] checks.

use super::{ValidationContext, ValidationResult};
use crate::controller::validate_spec;

pub fn validate_declaration(ctx: &ValidationContext) -> ValidationResult {
    match validate_spec(&ctx.cluster.spec) {
        Ok(()) => ValidationResult::allowed(),
        Err(e) => ValidationResult::denied("InvalidSpec", &e.to_string()),
    }
}
