//! pgBackRest repository resources
//!
//! Generates the repository volumes, the dedicated repository host and the
//! pgBackRest configuration shared by instances and the host. Backup and
//! restore themselves are run by pgBackRest; the operator only wires it up.
//!
//! Reference: https://pgbackrest.org/configuration.html

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapProjection, Container, KeyToPath, PersistentVolumeClaim,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, ProjectedVolumeSource, Volume,
    VolumeMount, VolumeProjection,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::{PostgresCluster, RepoHost, RepoVolume};
use crate::resources::common::{
    LABEL_PGBACKREST_REPO, claim_spec, component, component_labels, config_map_projection, names,
    owner_reference, resource_requirements, secret_projection,
};
use crate::resources::instance::{container_security_context, pod_security_context};
use crate::resources::patroni::data_directory;

/// Mount path of the projected pgBackRest configuration
pub const CONFIG_MOUNT_PATH: &str = "/etc/pgbackrest/conf.d";

/// Name of the projected configuration volume in every pgBackRest pod
pub const CONFIG_VOLUME: &str = "pgbackrest-config";

/// Key of the generated configuration file
pub const CONFIG_KEY: &str = "pgbackrest.conf";

/// Mount path of repository `repo` on the repository host
pub fn repo_path(repo: &str) -> String {
    format!("/pgbackrest/{}", repo)
}

/// Label marking the repository host StatefulSet and its pod
pub const LABEL_REPO_HOST: &str = "postgres-operator.smoketurner.com/pgbackrest-repo-host";

/// Whether a StatefulSet was generated as a repository host
pub fn is_repo_host(sts: &StatefulSet) -> bool {
    sts.labels().get(LABEL_REPO_HOST).map(String::as_str) == Some("true")
}

fn repo_host_labels(cluster_name: &str) -> BTreeMap<String, String> {
    let mut labels = component_labels(cluster_name, component::PGBACKREST);
    labels.insert(LABEL_REPO_HOST.to_string(), "true".to_string());
    labels
}

/// Generate the PersistentVolumeClaim backing one repository
pub fn generate_repo_volume(cluster: &PostgresCluster, repo: &RepoVolume) -> PersistentVolumeClaim {
    let cluster_name = cluster.name_any();
    let mut labels = component_labels(&cluster_name, component::PGBACKREST);
    labels.insert(LABEL_PGBACKREST_REPO.to_string(), repo.name.clone());

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(names::repo_volume(&cluster_name, &repo.name)),
            namespace: cluster.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(claim_spec(&repo.volume_claim_spec)),
        ..Default::default()
    }
}

/// DNS name of the repository host pod
pub fn repo_host_address(cluster: &PostgresCluster) -> String {
    let cluster_name = cluster.name_any();
    format!(
        "{}-0.{}.{}.svc.cluster.local.",
        names::repo_host(&cluster_name),
        names::pods_service(&cluster_name),
        cluster.namespace().unwrap_or_default()
    )
}

/// Render `pgbackrest.conf`
///
/// `repo_host_exists` must reflect the observed repository host, not the
/// declared one.
pub fn render_config(cluster: &PostgresCluster, repo_host_exists: bool) -> String {
    let mut global = vec!["log-path=/tmp".to_string()];
    for repo in &cluster.spec.archive.pgbackrest.repos {
        global.push(format!("{}-path={}", repo.name, repo_path(&repo.name)));
        if repo_host_exists {
            global.push(format!("{}-host={}", repo.name, repo_host_address(cluster)));
            global.push(format!("{}-host-user=postgres", repo.name));
        }
    }

    let db = [
        format!("pg1-path={}", data_directory(cluster.spec.postgres_version)),
        format!("pg1-port={}", cluster.spec.postgres_port()),
        "pg1-socket-path=/tmp/postgres".to_string(),
    ];

    format!(
        "[global]\n{}\n\n[db]\n{}\n",
        global.join("\n"),
        db.join("\n")
    )
}

/// Generate the pgBackRest configuration ConfigMap
pub fn generate_config(cluster: &PostgresCluster, repo_host_exists: bool) -> ConfigMap {
    let cluster_name = cluster.name_any();

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(names::pgbackrest_config(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(component_labels(&cluster_name, component::PGBACKREST)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CONFIG_KEY.to_string(),
            render_config(cluster, repo_host_exists),
        )])),
        ..Default::default()
    }
}

/// Projected volume carrying the generated configuration followed by the
/// declared configuration sources, in declaration order
pub fn config_volume(cluster: &PostgresCluster) -> Volume {
    let cluster_name = cluster.name_any();
    let mut sources = vec![VolumeProjection {
        config_map: Some(ConfigMapProjection {
            name: names::pgbackrest_config(&cluster_name),
            items: Some(vec![KeyToPath {
                key: CONFIG_KEY.to_string(),
                path: CONFIG_KEY.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }];

    for source in &cluster.spec.archive.pgbackrest.configuration {
        sources.push(VolumeProjection {
            config_map: source.config_map.as_ref().map(config_map_projection),
            secret: source.secret.as_ref().map(secret_projection),
            ..Default::default()
        });
    }

    Volume {
        name: CONFIG_VOLUME.to_string(),
        projected: Some(ProjectedVolumeSource {
            sources: Some(sources),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn config_mount() -> VolumeMount {
    VolumeMount {
        name: CONFIG_VOLUME.to_string(),
        mount_path: CONFIG_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

fn ssh_volume(host: &RepoHost) -> Option<Volume> {
    let mut sources = Vec::new();
    if let Some(cm) = &host.ssh_config {
        sources.push(VolumeProjection {
            config_map: Some(config_map_projection(cm)),
            ..Default::default()
        });
    }
    if let Some(secret) = &host.ssh_secret {
        sources.push(VolumeProjection {
            secret: Some(secret_projection(secret)),
            ..Default::default()
        });
    }
    if sources.is_empty() {
        return None;
    }
    Some(Volume {
        name: "ssh".to_string(),
        projected: Some(ProjectedVolumeSource {
            sources: Some(sources),
            default_mode: Some(0o600),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Generate the dedicated repository host StatefulSet
///
/// Always a single replica. Every declared repository volume is mounted at
/// `/pgbackrest/<repo>`.
pub fn generate_repo_host(cluster: &PostgresCluster, host: &RepoHost) -> StatefulSet {
    let cluster_name = cluster.name_any();
    let labels = repo_host_labels(&cluster_name);
    let openshift = cluster.spec.openshift.unwrap_or(false);

    let mut volumes = vec![config_volume(cluster)];
    let mut volume_mounts = vec![config_mount()];

    for repo in &cluster.spec.archive.pgbackrest.repos {
        volumes.push(Volume {
            name: repo.name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: names::repo_volume(&cluster_name, &repo.name),
                read_only: Some(false),
            }),
            ..Default::default()
        });
        volume_mounts.push(VolumeMount {
            name: repo.name.clone(),
            mount_path: repo_path(&repo.name),
            ..Default::default()
        });
    }

    if let Some(ssh) = ssh_volume(host) {
        volumes.push(ssh);
        volume_mounts.push(VolumeMount {
            name: "ssh".to_string(),
            mount_path: "/etc/ssh".to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    let container = Container {
        name: "pgbackrest".to_string(),
        image: Some(host.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec![
            "/usr/sbin/sshd".to_string(),
            "-D".to_string(),
            "-e".to_string(),
        ]),
        volume_mounts: Some(volume_mounts),
        resources: host.effective_resources().map(resource_requirements),
        security_context: Some(container_security_context()),
        ..Default::default()
    };

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(names::repo_host(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: Some(names::pods_service(&cluster_name)),
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    security_context: Some(pod_security_context(openshift)),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
