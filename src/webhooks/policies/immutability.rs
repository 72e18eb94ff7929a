//! Immutability policies
//!
//! - Storage class of an existing instance set or repository cannot change
//! - PostgreSQL version can only increase (no downgrades)

use super::{ValidationContext, ValidationResult};
use crate::crd::VolumeClaimSpec;

/// Validate immutable fields and version upgrade rules
///
/// Sets and repositories are matched by name; newly added ones are free to
/// pick any storage class.
pub fn validate_immutability(ctx: &ValidationContext) -> ValidationResult {
    // Only apply immutability checks on UPDATE, not CREATE
    let Some(old_cluster) = ctx.old_cluster else {
        return ValidationResult::allowed();
    };
    let old = &old_cluster.spec;
    let new = &ctx.cluster.spec;

    for set in &new.instance_sets {
        if let Some(previous) = old.instance_sets.iter().find(|s| s.name == set.name)
            && storage_class_changed(&previous.volume_claim_spec, &set.volume_claim_spec)
        {
            return ValidationResult::denied(
                "StorageClassImmutable",
                &format!(
                    "Storage class of instance set '{}' cannot be changed after creation. \
                     Add a new instance set with the desired storage class instead.",
                    set.name
                ),
            );
        }
    }

    for repo in &new.archive.pgbackrest.repos {
        if let Some(previous) = old.archive.pgbackrest.repos.iter().find(|r| r.name == repo.name)
            && storage_class_changed(&previous.volume_claim_spec, &repo.volume_claim_spec)
        {
            return ValidationResult::denied(
                "StorageClassImmutable",
                &format!(
                    "Storage class of repository '{}' cannot be changed after creation.",
                    repo.name
                ),
            );
        }
    }

    if new.postgres_version < old.postgres_version {
        return ValidationResult::denied(
            "VersionDowngradeNotAllowed",
            &format!(
                "PostgreSQL version downgrades are not allowed. Current version: {}, requested: {}",
                old.postgres_version, new.postgres_version
            ),
        );
    }

    ValidationResult::allowed()
}

fn storage_class_changed(old: &VolumeClaimSpec, new: &VolumeClaimSpec) -> bool {
    old.storage_class_name != new.storage_class_name
}
