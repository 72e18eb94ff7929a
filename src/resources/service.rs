//! Service generation for Patroni-managed PostgreSQL clusters
//!
//! Patroni labels each member with its role, so the primary and replicas
//! Services route by that label. The headless pods Service gives every
//! instance and the repository host a stable DNS name.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use std::collections::BTreeMap;

use crate::crd::PostgresCluster;
use crate::resources::common::{
    LABEL_CLUSTER, LABEL_ROLE, names, owner_reference, standard_labels,
};

/// Role label value of the Patroni leader
pub const ROLE_PRIMARY: &str = "master";

/// Role label value of Patroni replicas
pub const ROLE_REPLICA: &str = "replica";

fn postgres_port(port: i32) -> ServicePort {
    ServicePort {
        port,
        target_port: Some(IntOrString::String("postgres".to_string())),
        name: Some("postgres".to_string()),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn role_service(cluster: &PostgresCluster, name: String, role: &str) -> Service {
    let cluster_name = cluster.name_any();
    let selector = BTreeMap::from([
        (LABEL_CLUSTER.to_string(), cluster_name.clone()),
        (LABEL_ROLE.to_string(), role.to_string()),
    ]);

    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(vec![postgres_port(cluster.spec.postgres_port())]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the primary (read-write) service
///
/// Routes to whichever member currently holds the Patroni leader lock.
pub fn generate_primary_service(cluster: &PostgresCluster) -> Service {
    role_service(
        cluster,
        names::primary_service(&cluster.name_any()),
        ROLE_PRIMARY,
    )
}

/// Generate the replicas (read-only) service
pub fn generate_replicas_service(cluster: &PostgresCluster) -> Service {
    role_service(
        cluster,
        names::replicas_service(&cluster.name_any()),
        ROLE_REPLICA,
    )
}

/// Generate the headless service for pod discovery
///
/// Not-ready addresses are published so members can find each other while
/// Patroni is still bootstrapping.
pub fn generate_pods_service(cluster: &PostgresCluster) -> Service {
    let cluster_name = cluster.name_any();
    let selector = BTreeMap::from([(LABEL_CLUSTER.to_string(), cluster_name.clone())]);

    Service {
        metadata: ObjectMeta {
            name: Some(names::pods_service(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector),
            publish_not_ready_addresses: Some(true),
            ports: Some(vec![postgres_port(cluster.spec.postgres_port())]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
