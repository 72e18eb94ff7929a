//! Instance set StatefulSets
//!
//! Every declared instance set becomes one StatefulSet running Patroni,
//! which in turn runs PostgreSQL. Any pod of any set can become the leader;
//! the sets differ only in size, storage and resources.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetPersistentVolumeClaimRetentionPolicy,
    StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
    HTTPGetAction, ObjectFieldSelector, PersistentVolumeClaim, PodAffinityTerm, PodAntiAffinity,
    PodSecurityContext, PodSpec, PodTemplateSpec, ProjectedVolumeSource, Probe, SeccompProfile,
    SecurityContext, Volume, VolumeMount, VolumeProjection, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::{PostgresCluster, PostgresInstanceSetSpec};
use crate::resources::common::{
    LABEL_CLUSTER, claim_spec, instance_set_labels, names, owner_reference,
    resource_requirements, secret_projection,
};
use crate::resources::patroni::{self, CONFIG_MOUNT_PATH, LABEL_PATRONI_SCOPE, data_directory};
use crate::resources::pgbackrest;

/// Name of the data volume claim template
pub const DATA_VOLUME: &str = "pgdata";

/// Mount path of the data volume
pub const DATA_MOUNT_PATH: &str = "/pgdata";

/// Mount path of the custom TLS secret
pub const TLS_MOUNT_PATH: &str = "/pgconf/tls";

/// Name of the database container in instance pods
pub const DATABASE_CONTAINER: &str = "database";

/// The `postgres` uid and gid in the community images
const POSTGRES_UID: i64 = 26;

/// Pod-level security context
///
/// OpenShift assigns a uid from the namespace range, so no ids are set there.
pub fn pod_security_context(openshift: bool) -> PodSecurityContext {
    let id = (!openshift).then_some(POSTGRES_UID);
    PodSecurityContext {
        fs_group: id,
        run_as_user: id,
        run_as_group: id,
        run_as_non_root: Some(true),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn container_security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        privileged: Some(false),
        read_only_root_filesystem: Some(false),
        ..Default::default()
    }
}

/// Spread members of one cluster across nodes, then zones
fn generate_anti_affinity(cluster_name: &str) -> Affinity {
    let term = |weight: i32, topology_key: &str| WeightedPodAffinityTerm {
        weight,
        pod_affinity_term: PodAffinityTerm {
            label_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: LABEL_CLUSTER.to_string(),
                    operator: "In".to_string(),
                    values: Some(vec![cluster_name.to_string()]),
                }]),
                ..Default::default()
            }),
            topology_key: topology_key.to_string(),
            ..Default::default()
        },
    };

    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                term(100, "kubernetes.io/hostname"),
                term(50, "topology.kubernetes.io/zone"),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn value_env(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    }
}

fn patroni_probe(path: &str, port: i32, failure_threshold: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    }
}

/// Labels of an instance pod: the set labels plus the Patroni scope
pub fn instance_pod_labels(cluster_name: &str, set_name: &str) -> BTreeMap<String, String> {
    let mut labels = instance_set_labels(cluster_name, set_name);
    labels.insert(LABEL_PATRONI_SCOPE.to_string(), patroni::scope(cluster_name));
    labels
}

/// The `pgdata` claim template for an instance set
pub fn data_volume_claim(set: &PostgresInstanceSetSpec) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME.to_string()),
            ..Default::default()
        },
        spec: Some(claim_spec(&set.volume_claim_spec)),
        ..Default::default()
    }
}

/// Generate the StatefulSet for one instance set of a normalized cluster
pub fn generate_instance_set(cluster: &PostgresCluster, set: &PostgresInstanceSetSpec) -> StatefulSet {
    let cluster_name = cluster.name_any();
    let labels = instance_pod_labels(&cluster_name, &set.name);
    let patroni = cluster.spec.patroni_settings();
    let api_port = patroni.api_port();
    let port = cluster.spec.postgres_port();
    let openshift = cluster.spec.openshift.unwrap_or(false);

    let env = vec![
        value_env("PATRONI_SCOPE", patroni::scope(&cluster_name)),
        field_env("PATRONI_NAME", "metadata.name"),
        field_env("PATRONI_KUBERNETES_NAMESPACE", "metadata.namespace"),
        field_env("PATRONI_KUBERNETES_POD_IP", "status.podIP"),
        value_env(
            "PATRONI_POSTGRESQL_CONNECT_ADDRESS",
            format!("$(PATRONI_KUBERNETES_POD_IP):{}", port),
        ),
        value_env(
            "PATRONI_RESTAPI_CONNECT_ADDRESS",
            format!("$(PATRONI_KUBERNETES_POD_IP):{}", api_port),
        ),
        value_env("PGDATA", data_directory(cluster.spec.postgres_version)),
        value_env("PGHOST", "/tmp/postgres".to_string()),
        value_env("PGPORT", port.to_string()),
    ];

    let mut volume_mounts = vec![
        VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: DATA_MOUNT_PATH.to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: "patroni-config".to_string(),
            mount_path: CONFIG_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        },
        pgbackrest::config_mount(),
    ];

    let mut volumes = vec![
        Volume {
            name: "patroni-config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: names::patroni_config(&cluster_name),
                default_mode: Some(0o644),
                ..Default::default()
            }),
            ..Default::default()
        },
        pgbackrest::config_volume(cluster),
    ];

    if let Some(tls) = &cluster.spec.custom_tls_secret {
        volumes.push(Volume {
            name: "tls".to_string(),
            projected: Some(ProjectedVolumeSource {
                sources: Some(vec![VolumeProjection {
                    secret: Some(secret_projection(tls)),
                    ..Default::default()
                }]),
                default_mode: Some(0o600),
                ..Default::default()
            }),
            ..Default::default()
        });
        volume_mounts.push(VolumeMount {
            name: "tls".to_string(),
            mount_path: TLS_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    let container = Container {
        name: DATABASE_CONTAINER.to_string(),
        image: Some(cluster.spec.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec![
            "patroni".to_string(),
            format!("{}/patroni.yml", CONFIG_MOUNT_PATH),
        ]),
        ports: Some(vec![
            ContainerPort {
                container_port: port,
                name: Some("postgres".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: api_port,
                name: Some("patroni".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env: Some(env),
        volume_mounts: Some(volume_mounts),
        resources: set.resources.as_ref().map(resource_requirements),
        readiness_probe: Some(patroni_probe("/readiness", api_port, 3)),
        liveness_probe: Some(patroni_probe("/liveness", api_port, 6)),
        security_context: Some(container_security_context()),
        ..Default::default()
    };

    let update_strategy = StatefulSetUpdateStrategy {
        type_: Some("RollingUpdate".to_string()),
        rolling_update: Some(RollingUpdateStatefulSetStrategy {
            max_unavailable: Some(IntOrString::Int(1)),
            partition: Some(0),
        }),
    };

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(names::instance_set(&cluster_name, &set.name)),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: Some(names::pods_service(&cluster_name)),
            replicas: set.replicas,
            selector: LabelSelector {
                match_labels: Some(instance_set_labels(&cluster_name, &set.name)),
                ..Default::default()
            },
            update_strategy: Some(update_strategy),
            pod_management_policy: Some("Parallel".to_string()),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(names::instance_account(&cluster_name)),
                    containers: vec![container],
                    volumes: Some(volumes),
                    termination_grace_period_seconds: Some(30),
                    affinity: Some(generate_anti_affinity(&cluster_name)),
                    security_context: Some(pod_security_context(openshift)),
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![data_volume_claim(set)]),
            // Data volumes go with the set; scaling down keeps them for a later scale up
            persistent_volume_claim_retention_policy: Some(
                StatefulSetPersistentVolumeClaimRetentionPolicy {
                    when_deleted: Some("Delete".to_string()),
                    when_scaled: Some("Retain".to_string()),
                },
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}
