//! PgBouncer connection pooler resources
//!
//! PgBouncer runs as a separate Deployment in front of the primary Service.
//! Its configuration is rendered into a ConfigMap and mounted read-only.
//!
//! Reference: https://www.pgbouncer.org/

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, PodAffinityTerm,
    PodAntiAffinity, PodSpec, PodTemplateSpec, Probe, Service, ServicePort, ServiceSpec,
    TCPSocketAction, Volume, VolumeMount, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use std::collections::BTreeMap;

use crate::crd::{
    DEFAULT_MAX_CLIENT_CONN, DEFAULT_POOL_MODE, DEFAULT_POOL_SIZE, PgBouncerPodSpec,
    PostgresCluster,
};
use crate::resources::common::{
    component, component_labels, names, owner_reference, resource_requirements,
};
use crate::resources::instance::{container_security_context, pod_security_context};

/// Image used when the declaration does not name one
pub const DEFAULT_PGBOUNCER_IMAGE: &str = "docker.io/bitnami/pgbouncer:1.21.0";

/// Key of the rendered configuration in the ConfigMap
pub const CONFIG_KEY: &str = "pgbouncer.ini";

const CONFIG_MOUNT_PATH: &str = "/etc/pgbouncer";

/// Labels for PgBouncer resources
pub fn pgbouncer_labels(cluster_name: &str) -> BTreeMap<String, String> {
    component_labels(cluster_name, component::PGBOUNCER)
}

/// Render `pgbouncer.ini`
///
/// Every database is routed to the primary Service.
pub fn render_config(cluster: &PostgresCluster, spec: &PgBouncerPodSpec) -> String {
    let cluster_name = cluster.name_any();
    let pool_mode = spec.pool_mode.as_deref().unwrap_or(DEFAULT_POOL_MODE);
    let max_client_conn = spec.max_client_conn.unwrap_or(DEFAULT_MAX_CLIENT_CONN);
    let default_pool_size = spec.default_pool_size.unwrap_or(DEFAULT_POOL_SIZE);

    format!(
        r#"[databases]
* = host={primary_service} port={postgres_port}

[pgbouncer]
listen_addr = 0.0.0.0
listen_port = {port}
auth_type = scram-sha-256
auth_user = postgres
auth_query = SELECT usename, passwd FROM pg_catalog.pg_shadow WHERE usename=$1
pool_mode = {pool_mode}
max_client_conn = {max_client_conn}
default_pool_size = {default_pool_size}
server_connect_timeout = 15
server_login_retry = 15
query_wait_timeout = 120
log_pooler_errors = 1
ignore_startup_parameters = extra_float_digits,search_path
"#,
        primary_service = names::primary_service(&cluster_name),
        postgres_port = cluster.spec.postgres_port(),
        port = spec.listen_port(),
        pool_mode = pool_mode,
        max_client_conn = max_client_conn,
        default_pool_size = default_pool_size,
    )
}

/// Generate the PgBouncer ConfigMap
pub fn generate_pgbouncer_configmap(cluster: &PostgresCluster, spec: &PgBouncerPodSpec) -> ConfigMap {
    let cluster_name = cluster.name_any();

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(names::pgbouncer(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(pgbouncer_labels(&cluster_name)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CONFIG_KEY.to_string(),
            render_config(cluster, spec),
        )])),
        ..Default::default()
    }
}

fn generate_pgbouncer_anti_affinity(cluster_name: &str) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(LabelSelector {
                            match_expressions: Some(vec![LabelSelectorRequirement {
                                key: "app.kubernetes.io/component".to_string(),
                                operator: "In".to_string(),
                                values: Some(vec![component::PGBOUNCER.to_string()]),
                            }]),
                            match_labels: Some(BTreeMap::from([(
                                "app.kubernetes.io/name".to_string(),
                                cluster_name.to_string(),
                            )])),
                        }),
                        topology_key: "kubernetes.io/hostname".to_string(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn tcp_probe(port: i32, initial_delay_seconds: i32, failure_threshold: i32) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    }
}

/// Generate the PgBouncer Deployment
pub fn generate_pgbouncer_deployment(
    cluster: &PostgresCluster,
    spec: &PgBouncerPodSpec,
) -> Deployment {
    let cluster_name = cluster.name_any();
    let labels = pgbouncer_labels(&cluster_name);
    let port = spec.listen_port();
    let openshift = cluster.spec.openshift.unwrap_or(false);
    let image = spec
        .image
        .clone()
        .unwrap_or_else(|| DEFAULT_PGBOUNCER_IMAGE.to_string());

    let volumes = vec![Volume {
        name: "pgbouncer-config".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: names::pgbouncer(&cluster_name),
            default_mode: Some(0o644),
            ..Default::default()
        }),
        ..Default::default()
    }];

    let volume_mounts = vec![VolumeMount {
        name: "pgbouncer-config".to_string(),
        mount_path: CONFIG_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    }];

    let container = Container {
        name: "pgbouncer".to_string(),
        image: Some(image),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec![
            "pgbouncer".to_string(),
            format!("{}/{}", CONFIG_MOUNT_PATH, CONFIG_KEY),
        ]),
        ports: Some(vec![ContainerPort {
            container_port: port,
            name: Some("pgbouncer".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(volume_mounts),
        resources: spec.resources.as_ref().map(resource_requirements),
        readiness_probe: Some(tcp_probe(port, 5, 3)),
        liveness_probe: Some(tcp_probe(port, 30, 6)),
        security_context: Some(container_security_context()),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(names::pgbouncer(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(spec.desired_replicas()),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    termination_grace_period_seconds: Some(10),
                    affinity: Some(generate_pgbouncer_anti_affinity(&cluster_name)),
                    security_context: Some(pod_security_context(openshift)),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the PgBouncer Service
pub fn generate_pgbouncer_service(cluster: &PostgresCluster, spec: &PgBouncerPodSpec) -> Service {
    let cluster_name = cluster.name_any();
    let labels = pgbouncer_labels(&cluster_name);
    let port = spec.listen_port();

    Service {
        metadata: ObjectMeta {
            name: Some(names::pgbouncer(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("pgbouncer".to_string()),
                port,
                target_port: Some(IntOrString::String("pgbouncer".to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
