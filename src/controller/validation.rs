//! Validation of PostgresCluster specs
//!
//! Runs on the normalized spec, both in the admission webhook and at the
//! start of every reconciliation pass. A spec that fails here is never
//! acted on; the error is surfaced in status until the spec changes.

use std::collections::BTreeSet;

use crate::controller::error::{Error, Result};
use crate::crd::{
    MAX_POSTGRES_VERSION, MIN_POSTGRES_VERSION, PgBouncerPodSpec, PostgresClusterSpec,
    VolumeClaimSpec,
};
use crate::resources::common::names;

/// Maximum number of pgBackRest repositories
pub const MAX_REPOS: usize = 4;

/// Pool modes PgBouncer understands
pub const POOL_MODES: [&str; 3] = ["session", "transaction", "statement"];

/// True for `repo1` through `repo4`
pub fn is_valid_repo_name(name: &str) -> bool {
    matches!(name.strip_prefix("repo"), Some("1" | "2" | "3" | "4"))
}

/// Validate a normalized cluster spec
pub fn validate_spec(spec: &PostgresClusterSpec) -> Result<()> {
    validate_version(spec)?;
    if spec.image.trim().is_empty() {
        return Err(invalid("image must not be empty"));
    }
    validate_port("port", spec.postgres_port())?;
    validate_instance_sets(spec)?;
    validate_repos(spec)?;
    validate_patroni(spec)?;
    if let Some(pgbouncer) = spec.proxy.as_ref().and_then(|p| p.pg_bouncer.as_ref()) {
        validate_pgbouncer(pgbouncer)?;
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ValidationError(message.into())
}

fn validate_version(spec: &PostgresClusterSpec) -> Result<()> {
    let version = spec.postgres_version;
    if !(MIN_POSTGRES_VERSION..=MAX_POSTGRES_VERSION).contains(&version) {
        return Err(invalid(format!(
            "postgresVersion {} is outside the supported range {}-{}",
            version, MIN_POSTGRES_VERSION, MAX_POSTGRES_VERSION
        )));
    }
    Ok(())
}

fn validate_port(field: &str, port: i32) -> Result<()> {
    if !(1..=65535).contains(&port) {
        return Err(invalid(format!("{} {} is not a valid port", field, port)));
    }
    Ok(())
}

/// Instance set names end up in object names, so they must be DNS-label safe
fn is_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

fn validate_instance_sets(spec: &PostgresClusterSpec) -> Result<()> {
    let mut seen = BTreeSet::new();
    for set in &spec.instance_sets {
        if !is_dns_label(&set.name) {
            return Err(invalid(format!(
                "instance set name {:?} must be a lowercase DNS label",
                set.name
            )));
        }
        if set.name == names::REPO_HOST_SUFFIX {
            return Err(invalid(format!(
                "instance set name {:?} is reserved for the pgBackRest repository host",
                set.name
            )));
        }
        if !seen.insert(set.name.as_str()) {
            return Err(invalid(format!("duplicate instance set name {:?}", set.name)));
        }
        if let Some(replicas) = set.replicas
            && replicas < 0
        {
            return Err(invalid(format!(
                "instance set {:?} has negative replicas {}",
                set.name, replicas
            )));
        }
        validate_claim(&format!("instance set {:?}", set.name), &set.volume_claim_spec)?;
    }
    Ok(())
}

/// Validate storage size format (e.g. "10Gi", "500Mi")
fn validate_claim(owner: &str, claim: &VolumeClaimSpec) -> Result<()> {
    let size = &claim.size;
    let Some(number) = ["Ki", "Mi", "Gi", "Ti"]
        .iter()
        .find_map(|suffix| size.strip_suffix(suffix))
    else {
        return Err(invalid(format!(
            "{} storage size must end with Ki, Mi, Gi or Ti: {:?}",
            owner, size
        )));
    };
    match number.parse::<u64>() {
        Ok(n) if n > 0 => Ok(()),
        _ => Err(invalid(format!("{} has invalid storage size {:?}", owner, size))),
    }
}

fn validate_repos(spec: &PostgresClusterSpec) -> Result<()> {
    let repos = &spec.archive.pgbackrest.repos;
    if repos.is_empty() || repos.len() > MAX_REPOS {
        return Err(invalid(format!(
            "between 1 and {} pgBackRest repositories are required, got {}",
            MAX_REPOS,
            repos.len()
        )));
    }

    let mut seen = BTreeSet::new();
    for repo in repos {
        if !is_valid_repo_name(&repo.name) {
            return Err(invalid(format!(
                "repository name {:?} must match repo[1-4]",
                repo.name
            )));
        }
        if !seen.insert(repo.name.as_str()) {
            return Err(invalid(format!("duplicate repository name {:?}", repo.name)));
        }
        validate_claim(&format!("repository {:?}", repo.name), &repo.volume_claim_spec)?;
    }

    if let Some(host) = &spec.archive.pgbackrest.repo_host
        && host.image.trim().is_empty()
    {
        return Err(invalid("repoHost.image must not be empty"));
    }
    Ok(())
}

fn validate_patroni(spec: &PostgresClusterSpec) -> Result<()> {
    let patroni = spec.patroni_settings();
    let lease = patroni.leader_lease_duration_seconds.unwrap_or_default();
    let sync = patroni.sync_period_seconds.unwrap_or_default();
    if sync <= 0 {
        return Err(invalid("patroni.syncPeriodSeconds must be positive"));
    }
    if lease <= sync {
        return Err(invalid(format!(
            "patroni.leaderLeaseDurationSeconds ({}) must exceed syncPeriodSeconds ({})",
            lease, sync
        )));
    }
    validate_port("patroni.port", patroni.api_port())?;
    if patroni.api_port() == spec.postgres_port() {
        return Err(invalid("patroni.port must differ from the PostgreSQL port"));
    }
    Ok(())
}

fn validate_pgbouncer(pgbouncer: &PgBouncerPodSpec) -> Result<()> {
    if pgbouncer.desired_replicas() < 0 {
        return Err(invalid("proxy.pgBouncer.replicas must not be negative"));
    }
    validate_port("proxy.pgBouncer.port", pgbouncer.listen_port())?;
    if let Some(mode) = &pgbouncer.pool_mode
        && !POOL_MODES.contains(&mode.as_str())
    {
        return Err(invalid(format!(
            "proxy.pgBouncer.poolMode {:?} must be one of {}",
            mode,
            POOL_MODES.join(", ")
        )));
    }
    Ok(())
}
