//! Unit tests for declaration defaulting

use pgcluster_operator::crd::{
    DEFAULT_INSTANCE_REPLICAS, DEFAULT_LEADER_LEASE_SECONDS, DEFAULT_PATRONI_PORT,
    DEFAULT_POOL_MODE, DEFAULT_POSTGRES_PORT, DEFAULT_SYNC_PERIOD_SECONDS,
};

use crate::common::*;

#[test]
fn test_unnamed_sets_are_named_by_position() {
    let cluster = PostgresClusterBuilder::new("db", "default")
        .with_instance_set("", None)
        .with_instance_set("", Some(3))
        .build();

    let spec = cluster.spec.normalized();
    let names: Vec<&str> = spec.instance_sets.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["00", "01"]);
    assert_eq!(spec.instance_sets[0].replicas, Some(DEFAULT_INSTANCE_REPLICAS));
    assert_eq!(spec.instance_sets[1].replicas, Some(3));
}

#[test]
fn test_named_sets_keep_their_names() {
    let cluster = PostgresClusterBuilder::new("db", "default")
        .with_instance_set("primary", None)
        .with_instance_set("", None)
        .build();

    let spec = cluster.spec.normalized();
    assert_eq!(spec.instance_sets[0].name, "primary");
    // Position, not count of unnamed sets
    assert_eq!(spec.instance_sets[1].name, "01");
}

#[test]
fn test_scalar_defaults() {
    let spec = create_test_cluster("db", "default").spec.normalized();

    assert_eq!(spec.port, Some(DEFAULT_POSTGRES_PORT));
    let patroni = spec.patroni.expect("patroni defaulted");
    assert_eq!(patroni.port, Some(DEFAULT_PATRONI_PORT));
    assert_eq!(
        patroni.leader_lease_duration_seconds,
        Some(DEFAULT_LEADER_LEASE_SECONDS)
    );
    assert_eq!(patroni.sync_period_seconds, Some(DEFAULT_SYNC_PERIOD_SECONDS));
    assert!(spec.proxy.is_none(), "an absent proxy stays absent");
}

#[test]
fn test_pgbouncer_defaults() {
    let spec = create_test_cluster_with_pgbouncer("db", "default")
        .spec
        .normalized();
    let pgbouncer = spec.proxy.unwrap().pg_bouncer.unwrap();
    assert_eq!(pgbouncer.replicas, Some(1));
    assert_eq!(pgbouncer.pool_mode.as_deref(), Some(DEFAULT_POOL_MODE));
}

#[test]
fn test_normalize_is_idempotent() {
    let once = create_test_cluster_with_pgbouncer("db", "default")
        .spec
        .normalized();
    let twice = once.normalized();
    assert_eq!(once, twice);
}

#[test]
fn test_explicit_values_survive() {
    let mut cluster = PostgresClusterBuilder::new("db", "default")
        .with_port(6432)
        .with_instance_set("a", Some(0))
        .build();
    cluster.spec.normalize();
    assert_eq!(cluster.spec.port, Some(6432));
    assert_eq!(cluster.spec.instance_sets[0].replicas, Some(0));
}
