//! Patroni configuration and RBAC for PostgreSQL instances
//!
//! Patroni runs inside every instance pod and uses the Kubernetes API as its
//! DCS. The operator only renders its configuration and grants the instance
//! ServiceAccount the permissions leader election needs.
//!
//! Reference: https://github.com/patroni/patroni

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use kube::ResourceExt;
use kube::core::ObjectMeta;
use serde_json::{Value, json};

use crate::controller::error::Result;
use crate::crd::PostgresCluster;
use crate::resources::common::{
    LABEL_CLUSTER, LABEL_ROLE, component, component_labels, names, owner_reference,
};

/// Mount path of the Patroni configuration in instance pods
pub const CONFIG_MOUNT_PATH: &str = "/etc/patroni";

/// Label Patroni uses as its cluster scope
pub const LABEL_PATRONI_SCOPE: &str = "postgres-operator.smoketurner.com/patroni";

/// PostgreSQL data directory for a major version
pub fn data_directory(postgres_version: i32) -> String {
    format!("/pgdata/pg{}", postgres_version)
}

/// Patroni scope (DCS cluster name) for a PostgresCluster
pub fn scope(cluster_name: &str) -> String {
    format!("{}-ha", cluster_name)
}

/// Parameters every instance runs with; declared parameters override them
fn base_parameters() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("wal_level".to_string(), "replica".to_string()),
        ("hot_standby".to_string(), "on".to_string()),
        ("max_wal_senders".to_string(), "10".to_string()),
        ("max_replication_slots".to_string(), "10".to_string()),
        ("archive_mode".to_string(), "on".to_string()),
        (
            "archive_command".to_string(),
            "pgbackrest --stanza=db archive-push \"%p\"".to_string(),
        ),
        ("unix_socket_directories".to_string(), "/tmp/postgres".to_string()),
    ])
}

/// Render `patroni.yml` for a normalized cluster
pub fn render_patroni_yaml(cluster: &PostgresCluster) -> Result<String> {
    let cluster_name = cluster.name_any();
    let ns = cluster.namespace().unwrap_or_default();
    let patroni = cluster.spec.patroni_settings();
    let ttl = patroni.leader_lease_duration_seconds.unwrap_or_default();
    let loop_wait = patroni.sync_period_seconds.unwrap_or_default();
    // Patroni requires ttl >= loop_wait + 2 * retry_timeout
    let retry_timeout = ((ttl - loop_wait) / 2).max(1);
    let port = cluster.spec.postgres_port();

    let mut parameters = base_parameters();
    parameters.extend(patroni.parameters.clone());
    let parameters: serde_json::Map<String, Value> = parameters
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    let mut dcs_labels = serde_json::Map::new();
    dcs_labels.insert(LABEL_CLUSTER.to_string(), Value::String(cluster_name.clone()));

    let config = json!({
        "scope": scope(&cluster_name),
        "kubernetes": {
            "namespace": ns,
            "use_endpoints": true,
            "scope_label": LABEL_PATRONI_SCOPE,
            "role_label": LABEL_ROLE,
            "labels": dcs_labels,
        },
        "bootstrap": {
            "dcs": {
                "ttl": ttl,
                "loop_wait": loop_wait,
                "retry_timeout": retry_timeout,
                "postgresql": {
                    "use_pg_rewind": true,
                    "use_slots": false,
                    "parameters": parameters,
                },
            },
            "initdb": ["data-checksums", {"encoding": "UTF8"}],
        },
        "postgresql": {
            "listen": format!("*:{}", port),
            "data_dir": data_directory(cluster.spec.postgres_version),
            "pgpass": "/tmp/.pgpass",
            "authentication": {
                "superuser": {"username": "postgres"},
                "replication": {"username": "replicator"},
            },
            "pg_hba": [
                "local all all peer",
                "host replication replicator all scram-sha-256",
                "host all all all scram-sha-256",
            ],
        },
        "restapi": {
            "listen": format!("*:{}", patroni.api_port()),
        },
        "watchdog": {"mode": "off"},
    });

    Ok(serde_yaml::to_string(&config)?)
}

/// Generate the Patroni ConfigMap (`patroni.yml` plus the member instance sets)
pub fn generate_patroni_config(cluster: &PostgresCluster) -> Result<ConfigMap> {
    let cluster_name = cluster.name_any();
    let members = cluster
        .spec
        .instance_sets
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(names::patroni_config(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(component_labels(&cluster_name, component::PATRONI)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            ("patroni.yml".to_string(), render_patroni_yaml(cluster)?),
            ("instance-sets".to_string(), members),
        ])),
        ..Default::default()
    })
}

/// Generate the ServiceAccount instance pods run as
pub fn generate_service_account(cluster: &PostgresCluster) -> ServiceAccount {
    let cluster_name = cluster.name_any();

    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(names::instance_account(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(component_labels(&cluster_name, component::PATRONI)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn rule(resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec!["".to_string()]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

/// Generate the Role Patroni needs for the Kubernetes DCS
pub fn generate_patroni_role(cluster: &PostgresCluster) -> Role {
    let cluster_name = cluster.name_any();
    let all = [
        "get", "list", "watch", "create", "update", "patch", "delete",
    ];

    Role {
        metadata: ObjectMeta {
            name: Some(names::instance_account(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(component_labels(&cluster_name, component::PATRONI)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        rules: Some(vec![
            // Leader lock and cluster state
            rule(&["endpoints", "configmaps"], &all),
            // Member discovery and role labels
            rule(&["pods"], &["get", "list", "watch", "patch"]),
            // Patroni creates the `<scope>-config` service for its endpoints
            rule(&["services"], &["create"]),
        ]),
    }
}

/// Generate the RoleBinding for the instance ServiceAccount
pub fn generate_patroni_role_binding(cluster: &PostgresCluster) -> RoleBinding {
    let cluster_name = cluster.name_any();
    let name = names::instance_account(&cluster_name);
    let ns = cluster.namespace();

    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: ns.clone(),
            labels: Some(component_labels(&cluster_name, component::PATRONI)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name,
            namespace: ns,
            ..Default::default()
        }]),
    }
}
