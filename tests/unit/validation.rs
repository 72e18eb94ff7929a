//! Unit tests for declaration validation
//!
//! Validation always runs on the normalized spec, so every case here is
//! normalized first.

use pgcluster_operator::controller::{ErrorClass, validate_spec};
use pgcluster_operator::crd::{PatroniSpec, PostgresCluster, PostgresClusterSpec};

use crate::common::*;

fn normalized(cluster: PostgresCluster) -> PostgresClusterSpec {
    cluster.spec.normalized()
}

fn assert_invalid(spec: &PostgresClusterSpec, fragment: &str) {
    let err = validate_spec(spec).expect_err("spec should be rejected");
    assert_eq!(err.class(), ErrorClass::Validation);
    let message = err.to_string();
    assert!(
        message.contains(fragment),
        "expected {:?} in {:?}",
        fragment,
        message
    );
}

#[test]
fn test_minimal_cluster_is_valid() {
    assert!(validate_spec(&normalized(create_test_cluster("db", "default"))).is_ok());
}

#[test]
fn test_full_cluster_is_valid() {
    let cluster = PostgresClusterBuilder::new("db", "default")
        .with_instance_set("", Some(3))
        .with_instance_set("analytics", Some(0))
        .with_repo("repo1")
        .with_repo("repo4")
        .with_repo_host("pgbackrest:latest")
        .with_pgbouncer_replicas(2)
        .build();
    assert!(validate_spec(&normalized(cluster)).is_ok());
}

#[test]
fn test_no_instance_sets_is_valid() {
    let cluster = PostgresClusterBuilder::new("db", "default")
        .with_repo("repo1")
        .build();
    assert!(validate_spec(&normalized(cluster)).is_ok());
}

#[test]
fn test_repository_count_bounds() {
    let none = PostgresClusterBuilder::new("db", "default")
        .with_instance_set("", None)
        .build();
    assert_invalid(&normalized(none), "between 1 and 4");

    let mut too_many = PostgresClusterBuilder::new("db", "default").with_instance_set("", None);
    for name in ["repo1", "repo2", "repo3", "repo4", "repo1"] {
        too_many = too_many.with_repo(name);
    }
    assert_invalid(&normalized(too_many.build()), "got 5");
}

#[test]
fn test_duplicate_repository_rejected() {
    let cluster = PostgresClusterBuilder::new("db", "default")
        .with_instance_set("", None)
        .with_repo("repo2")
        .with_repo("repo2")
        .build();
    assert_invalid(&normalized(cluster), "duplicate repository");
}

#[test]
fn test_duplicate_instance_set_rejected() {
    // The second set defaults to "01", colliding with the explicit name
    let cluster = PostgresClusterBuilder::new("db", "default")
        .with_instance_set("01", None)
        .with_instance_set("", None)
        .with_repo("repo1")
        .build();
    assert_invalid(&normalized(cluster), "duplicate instance set");
}

#[test]
fn test_instance_set_name_must_be_dns_label() {
    let cluster = PostgresClusterBuilder::new("db", "default")
        .with_instance_set("Primary_Set", None)
        .with_repo("repo1")
        .build();
    assert_invalid(&normalized(cluster), "DNS label");
}

#[test]
fn test_repo_host_name_is_reserved() {
    let cluster = PostgresClusterBuilder::new("db", "default")
        .with_instance_set("repo-host", None)
        .with_repo("repo1")
        .build();
    assert_invalid(&normalized(cluster), "reserved for the pgBackRest repository host");
}

#[test]
fn test_negative_replicas_rejected() {
    let cluster = PostgresClusterBuilder::new("db", "default")
        .with_instance_set("", Some(-1))
        .with_repo("repo1")
        .build();
    assert_invalid(&normalized(cluster), "negative replicas");
}

#[test]
fn test_storage_size_format() {
    let mut cluster = create_test_cluster("db", "default");
    cluster.spec.instance_sets[0].volume_claim_spec = claim("10GB");
    assert_invalid(&normalized(cluster), "must end with");

    let mut cluster = create_test_cluster("db", "default");
    cluster.spec.archive.pgbackrest.repos[0].volume_claim_spec = claim("0Gi");
    assert_invalid(&normalized(cluster), "invalid storage size");
}

#[test]
fn test_version_range() {
    for version in [9, 14] {
        let cluster = PostgresClusterBuilder::new("db", "default")
            .with_version(version)
            .with_instance_set("", None)
            .with_repo("repo1")
            .build();
        assert_invalid(&normalized(cluster), "supported range");
    }
}

#[test]
fn test_empty_image_rejected() {
    let cluster = PostgresClusterBuilder::new("db", "default")
        .with_image("  ")
        .with_instance_set("", None)
        .with_repo("repo1")
        .build();
    assert_invalid(&normalized(cluster), "image");
}

#[test]
fn test_patroni_lease_must_exceed_sync_period() {
    let mut cluster = create_test_cluster("db", "default");
    cluster.spec.patroni = Some(PatroniSpec {
        leader_lease_duration_seconds: Some(10),
        sync_period_seconds: Some(10),
        ..Default::default()
    });
    assert!(validate_spec(&normalized(cluster)).is_err());
}

#[test]
fn test_pool_mode_checked() {
    let mut cluster = create_test_cluster_with_pgbouncer("db", "default");
    if let Some(pgbouncer) = cluster
        .spec
        .proxy
        .as_mut()
        .and_then(|p| p.pg_bouncer.as_mut())
    {
        pgbouncer.pool_mode = Some("batch".to_string());
    }
    assert!(validate_spec(&normalized(cluster)).is_err());
}

#[test]
fn test_validation_is_deterministic() {
    let cluster = PostgresClusterBuilder::new("db", "default")
        .with_instance_set("", None)
        .with_repo("repo7")
        .build();
    let spec = normalized(cluster);
    let first = validate_spec(&spec).unwrap_err().to_string();
    let second = validate_spec(&spec).unwrap_err().to_string();
    assert_eq!(first, second);
}
