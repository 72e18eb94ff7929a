// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for PostgresCluster defaulting, validation and
//! resource generation
//!
//! These tests use proptest to generate random declarations and verify that:
//! 1. Defaulting is idempotent and never renames an explicitly named set
//! 2. Validation is deterministic and never panics
//! 3. Every valid declaration generates children without panicking
//! 4. Status aggregation never moves the observed generation backwards

#[path = "../common/mod.rs"]
mod common;

use proptest::prelude::*;

use pgcluster_operator::controller::PassOutcome;
use pgcluster_operator::controller::observe::Observed;
use pgcluster_operator::controller::status::aggregate;
use pgcluster_operator::controller::validate_spec;
use pgcluster_operator::crd::{
    PostgresCluster, PostgresClusterStatus, PostgresInstanceSetSpec, RepoVolume,
};
use pgcluster_operator::resources::instance::generate_instance_set;
use pgcluster_operator::resources::{patroni, pgbackrest, pgbouncer};

use common::*;

// =============================================================================
// Strategies
// =============================================================================

fn set_name() -> impl Strategy<Value = String> {
    prop_oneof![Just(String::new()), "[a-z][a-z0-9]{0,6}"]
}

fn instance_set() -> impl Strategy<Value = PostgresInstanceSetSpec> {
    (set_name(), proptest::option::of(-1i32..5), 1u32..100).prop_map(|(name, replicas, gi)| {
        PostgresInstanceSetSpec {
            name,
            replicas,
            resources: None,
            volume_claim_spec: claim(&format!("{}Gi", gi)),
        }
    })
}

fn repo_name() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => (1u8..=4).prop_map(|n| format!("repo{}", n)),
        1 => "[a-z]{1,6}[0-9]?",
    ]
}

fn cluster() -> impl Strategy<Value = PostgresCluster> {
    (
        9i32..15,
        prop::collection::vec(instance_set(), 0..4),
        prop::collection::vec(repo_name(), 0..6),
        any::<bool>(),
        proptest::option::of(0i32..4),
    )
        .prop_map(|(version, sets, repos, repo_host, pgbouncer)| {
            let mut builder = PostgresClusterBuilder::new("db", TEST_NAMESPACE)
                .with_uid(TEST_UID)
                .with_version(version);
            if repo_host {
                builder = builder.with_repo_host("pgbackrest:latest");
            }
            if let Some(replicas) = pgbouncer {
                builder = builder.with_pgbouncer_replicas(replicas);
            }
            let mut cluster = builder.build();
            cluster.spec.instance_sets = sets;
            cluster.spec.archive.pgbackrest.repos = repos
                .into_iter()
                .map(|name| RepoVolume {
                    name,
                    volume_claim_spec: claim("1Gi"),
                })
                .collect();
            cluster
        })
}

// =============================================================================
// Defaulting
// =============================================================================

proptest! {
    #[test]
    fn normalize_is_idempotent(cluster in cluster()) {
        let once = cluster.spec.normalized();
        prop_assert_eq!(once.normalized(), once);
    }

    #[test]
    fn normalize_names_every_set(cluster in cluster()) {
        let spec = cluster.spec.normalized();
        for (i, (before, after)) in cluster.spec.instance_sets.iter().zip(&spec.instance_sets).enumerate() {
            prop_assert!(!after.name.is_empty());
            if before.name.is_empty() {
                prop_assert_eq!(&after.name, &format!("{:02}", i));
            } else {
                prop_assert_eq!(&after.name, &before.name);
            }
            prop_assert!(after.replicas.is_some());
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

proptest! {
    #[test]
    fn validation_is_deterministic(cluster in cluster()) {
        let spec = cluster.spec.normalized();
        let first = validate_spec(&spec).map_err(|e| e.to_string());
        let second = validate_spec(&spec).map_err(|e| e.to_string());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn accepted_repos_are_well_formed(cluster in cluster()) {
        let spec = cluster.spec.normalized();
        if validate_spec(&spec).is_ok() {
            let repos = spec.repo_names();
            prop_assert!((1..=4).contains(&repos.len()));
            let mut unique = repos.clone();
            unique.sort();
            unique.dedup();
            prop_assert_eq!(unique.len(), repos.len());
        }
    }
}

// =============================================================================
// Resource generation
// =============================================================================

proptest! {
    #[test]
    fn valid_declarations_generate_children(cluster in cluster()) {
        let mut cluster = cluster;
        cluster.spec.normalize();
        prop_assume!(validate_spec(&cluster.spec).is_ok());

        for set in &cluster.spec.instance_sets {
            let sts = generate_instance_set(&cluster, set);
            prop_assert_eq!(sts.spec.as_ref().and_then(|s| s.replicas), set.replicas);
        }
        prop_assert!(patroni::generate_patroni_config(&cluster).is_ok());
        for repo in &cluster.spec.archive.pgbackrest.repos {
            let pvc = pgbackrest::generate_repo_volume(&cluster, repo);
            prop_assert!(pvc.metadata.name.as_deref().is_some_and(|n| n.ends_with(&repo.name)));
        }
        if let Some(host) = &cluster.spec.archive.pgbackrest.repo_host {
            let sts = pgbackrest::generate_repo_host(&cluster, host);
            prop_assert_eq!(sts.spec.and_then(|s| s.replicas), Some(1));
        }
        if let Some(spec) = cluster.spec.proxy.as_ref().and_then(|p| p.pg_bouncer.as_ref()) {
            let deployment = pgbouncer::generate_pgbouncer_deployment(&cluster, spec);
            prop_assert_eq!(deployment.spec.and_then(|s| s.replicas), spec.replicas);
        }
    }
}

// =============================================================================
// Status aggregation
// =============================================================================

proptest! {
    #[test]
    fn observed_generation_is_monotonic(
        generation in 1i64..50,
        prior in proptest::option::of(0i64..50),
        failed in any::<bool>(),
    ) {
        let mut cluster = create_test_cluster("db", TEST_NAMESPACE);
        cluster.spec.normalize();
        cluster.metadata.generation = Some(generation);
        cluster.status = Some(PostgresClusterStatus {
            observed_generation: prior,
            ..Default::default()
        });

        let mut outcome = PassOutcome::default();
        if failed {
            outcome.fail(
                "instances",
                "db-00",
                pgcluster_operator::Error::TransientError("unavailable".to_string()),
            );
        }
        let status = aggregate(&cluster, &Observed::default(), &outcome, "2024-01-01T00:00:00Z");

        prop_assert!(status.observed_generation >= prior);
        if failed {
            prop_assert_eq!(status.observed_generation, prior);
        } else {
            prop_assert!(status.observed_generation >= Some(generation));
        }
    }
}
