//! Common utilities for Kubernetes resource generation
//!
//! Shared labels, naming, ownership and content hashing used by every
//! generator, so that each child carries the same identity.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMapProjection, KeyToPath, PersistentVolumeClaimSpec, ResourceRequirements,
    SecretProjection, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::controller::error::Result;
use crate::crd::{self, PostgresCluster};

/// API version for PostgresCluster CRD
pub const API_VERSION: &str = "postgres-operator.smoketurner.com/v1beta1";

/// Kind for PostgresCluster CRD
pub const KIND: &str = "PostgresCluster";

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "pgcluster-operator";

/// Label identifying the owning cluster
pub const LABEL_CLUSTER: &str = "postgres-operator.smoketurner.com/cluster";

/// Label naming the instance set of an instance StatefulSet and its pods
pub const LABEL_INSTANCE_SET: &str = "postgres-operator.smoketurner.com/instance-set";

/// Label naming the pgBackRest repository a volume belongs to
pub const LABEL_PGBACKREST_REPO: &str = "postgres-operator.smoketurner.com/pgbackrest-repo";

/// Label Patroni sets on each member with its current role
pub const LABEL_ROLE: &str = "postgres-operator.smoketurner.com/role";

/// Annotation holding the content hash of the generated object
pub const ANNOTATION_SPEC_HASH: &str = "postgres-operator.smoketurner.com/spec-hash";

/// Component values for `app.kubernetes.io/component`
pub mod component {
    pub const POSTGRESQL: &str = "postgresql";
    pub const PGBACKREST: &str = "pgbackrest";
    pub const PGBOUNCER: &str = "pgbouncer";
    pub const PATRONI: &str = "patroni";
}

/// Generate an owner reference for a PostgresCluster
///
/// All child resources are owned by the cluster and garbage collected with it.
pub fn owner_reference(cluster: &PostgresCluster) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// True when `obj` is controlled by the cluster with the given uid
pub fn is_owned_by<K: Resource>(obj: &K, uid: &str) -> bool {
    !uid.is_empty()
        && obj
            .meta()
            .owner_references
            .as_ref()
            .is_some_and(|refs| refs.iter().any(|r| r.uid == uid && r.kind == KIND))
}

/// Generate standard labels for all resources belonging to a PostgresCluster
pub fn standard_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/name".to_string(),
            cluster_name.to_string(),
        ),
        (
            "app.kubernetes.io/component".to_string(),
            component::POSTGRESQL.to_string(),
        ),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
        (LABEL_CLUSTER.to_string(), cluster_name.to_string()),
    ])
}

/// Standard labels with a specific component
pub fn component_labels(cluster_name: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = standard_labels(cluster_name);
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        component.to_string(),
    );
    labels
}

/// Labels selecting every instance StatefulSet of a cluster
pub fn instance_selector(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_CLUSTER.to_string(), cluster_name.to_string()),
        (
            "app.kubernetes.io/component".to_string(),
            component::POSTGRESQL.to_string(),
        ),
    ])
}

/// Labels for one instance set (StatefulSet, pod template and selector)
pub fn instance_set_labels(cluster_name: &str, set_name: &str) -> BTreeMap<String, String> {
    let mut labels = standard_labels(cluster_name);
    labels.insert(LABEL_INSTANCE_SET.to_string(), set_name.to_string());
    labels
}

/// Labels selecting every pgBackRest repository volume of a cluster
pub fn repo_volume_selector(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_CLUSTER.to_string(), cluster_name.to_string()),
        (
            "app.kubernetes.io/component".to_string(),
            component::PGBACKREST.to_string(),
        ),
    ])
}

/// Child object names
pub mod names {
    pub fn instance_set(cluster: &str, set: &str) -> String {
        format!("{}-{}", cluster, set)
    }

    pub fn pods_service(cluster: &str) -> String {
        format!("{}-pods", cluster)
    }

    pub fn primary_service(cluster: &str) -> String {
        format!("{}-primary", cluster)
    }

    pub fn replicas_service(cluster: &str) -> String {
        format!("{}-replicas", cluster)
    }

    pub fn patroni_config(cluster: &str) -> String {
        format!("{}-config", cluster)
    }

    pub fn instance_account(cluster: &str) -> String {
        format!("{}-instance", cluster)
    }

    pub fn repo_volume(cluster: &str, repo: &str) -> String {
        format!("{}-pgbackrest-{}", cluster, repo)
    }

    /// Suffix of the repository host StatefulSet, which shares a namespace
    /// of names with the instance sets
    pub const REPO_HOST_SUFFIX: &str = "repo-host";

    pub fn repo_host(cluster: &str) -> String {
        format!("{}-{}", cluster, REPO_HOST_SUFFIX)
    }

    pub fn pgbackrest_config(cluster: &str) -> String {
        format!("{}-pgbackrest-config", cluster)
    }

    pub fn pgbouncer(cluster: &str) -> String {
        format!("{}-pgbouncer", cluster)
    }
}

/// Hash of an object's serialized content, hex encoded
pub fn content_hash<T: Serialize>(obj: &T) -> Result<String> {
    let bytes = serde_json::to_vec(obj)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Stamp an object with the hash of its content (computed without the stamp)
pub fn with_spec_hash<K: Resource + Serialize>(mut obj: K) -> Result<K> {
    let meta = obj.meta_mut();
    if let Some(annotations) = meta.annotations.as_mut() {
        annotations.remove(ANNOTATION_SPEC_HASH);
        if annotations.is_empty() {
            meta.annotations = None;
        }
    }
    let hash = content_hash(&obj)?;
    obj.meta_mut()
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(ANNOTATION_SPEC_HASH.to_string(), hash);
    Ok(obj)
}

/// The hash stamped on an object, if any
pub fn spec_hash<K: Resource>(obj: &K) -> Option<&str> {
    obj.meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_SPEC_HASH))
        .map(String::as_str)
}

/// True when every field set in `desired` has the same value in `actual`
///
/// Objects are compared key by key so that server-populated fields in
/// `actual` are ignored. Arrays must have the same length and match
/// element-wise. Entries of `limits` and `requests` maps are quantities,
/// which the API server rewrites to canonical form (`0.5` becomes `500m`),
/// so they are compared by value.
pub fn json_subset(desired: &Value, actual: &Value) -> bool {
    subset_at(desired, actual, false)
}

fn subset_at(desired: &Value, actual: &Value, quantities: bool) -> bool {
    match (desired, actual) {
        (Value::Null, _) => true,
        (Value::Object(d), Value::Object(a)) => d.iter().all(|(k, v)| match a.get(k) {
            Some(av) if quantities => quantity_eq(v, av),
            Some(av) => subset_at(v, av, matches!(k.as_str(), "limits" | "requests")),
            None => v.is_null(),
        }),
        (Value::Array(d), Value::Array(a)) => {
            d.len() == a.len() && d.iter().zip(a).all(|(dv, av)| subset_at(dv, av, false))
        }
        (d, a) => d == a,
    }
}

fn quantity_eq(desired: &Value, actual: &Value) -> bool {
    match (desired.as_str().and_then(parse_quantity), actual.as_str().and_then(parse_quantity)) {
        (Some(d), Some(a)) => d == a,
        _ => desired == actual,
    }
}

/// Value of a Kubernetes quantity in billionths of its unit
///
/// Accepts decimal SI suffixes (`m`, `k`, `G`), binary suffixes (`Mi`, `Gi`)
/// and decimal exponents (`1e3`). `None` for anything malformed or too large.
pub fn parse_quantity(quantity: &str) -> Option<i128> {
    let quantity = quantity.trim();
    let split = quantity
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '+' | '-')))
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);

    let (multiplier, pow10): (i128, i32) = match suffix {
        "" => (1, 0),
        "n" => (1, -9),
        "u" => (1, -6),
        "m" => (1, -3),
        "k" => (1, 3),
        "M" => (1, 6),
        "G" => (1, 9),
        "T" => (1, 12),
        "P" => (1, 15),
        "E" => (1, 18),
        "Ki" => (1 << 10, 0),
        "Mi" => (1 << 20, 0),
        "Gi" => (1 << 30, 0),
        "Ti" => (1 << 40, 0),
        "Pi" => (1 << 50, 0),
        "Ei" => (1 << 60, 0),
        exp if exp.starts_with(['e', 'E']) => (1, exp.get(1..)?.parse().ok()?),
        _ => return None,
    };

    let (negative, digits) = match number.as_bytes().first() {
        Some(b'-') => (true, number.get(1..)?),
        Some(b'+') => (false, number.get(1..)?),
        _ => (false, number),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }

    let mut mantissa: i128 = 0;
    for c in whole.chars().chain(fraction.chars()) {
        let digit = c.to_digit(10)?;
        mantissa = mantissa.checked_mul(10)?.checked_add(i128::from(digit))?;
    }
    let mut value = mantissa.checked_mul(multiplier)?;

    // Scale to nano units: 10^(9 + pow10 - fraction digits)
    let scale = 9 + pow10 - i32::try_from(fraction.len()).ok()?;
    if scale >= 0 {
        value = value.checked_mul(10i128.checked_pow(scale.unsigned_abs())?)?;
    } else {
        value /= 10i128.checked_pow(scale.unsigned_abs())?;
    }
    Some(if negative { -value } else { value })
}

/// Convert declared CPU/memory quantities to container resource requirements
pub fn resource_requirements(resources: &crd::ResourceRequirements) -> ResourceRequirements {
    ResourceRequirements {
        limits: resources.limits.as_ref().map(resource_list),
        requests: resources.requests.as_ref().map(resource_list),
        ..Default::default()
    }
}

fn resource_list(list: &crd::ResourceList) -> BTreeMap<String, Quantity> {
    let mut map = BTreeMap::new();
    if let Some(cpu) = &list.cpu {
        map.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &list.memory {
        map.insert("memory".to_string(), Quantity(memory.clone()));
    }
    map
}

/// Convert a volume claim declaration to a PersistentVolumeClaimSpec
pub fn claim_spec(claim: &crd::VolumeClaimSpec) -> PersistentVolumeClaimSpec {
    let access_modes = if claim.access_modes.is_empty() {
        vec!["ReadWriteOnce".to_string()]
    } else {
        claim.access_modes.clone()
    };
    PersistentVolumeClaimSpec {
        access_modes: Some(access_modes),
        storage_class_name: claim.storage_class_name.clone(),
        resources: Some(VolumeResourceRequirements {
            requests: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity(claim.size.clone()),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn key_items(projection: &crd::KeyProjection) -> Option<Vec<KeyToPath>> {
    if projection.items.is_empty() {
        return None;
    }
    Some(
        projection
            .items
            .iter()
            .map(|i| KeyToPath {
                key: i.key.clone(),
                path: i.path.clone(),
                ..Default::default()
            })
            .collect(),
    )
}

pub fn config_map_projection(projection: &crd::KeyProjection) -> ConfigMapProjection {
    ConfigMapProjection {
        name: projection.name.clone(),
        items: key_items(projection),
        optional: projection.optional,
    }
}

pub fn secret_projection(projection: &crd::KeyProjection) -> SecretProjection {
    SecretProjection {
        name: projection.name.clone(),
        items: key_items(projection),
        optional: projection.optional,
    }
}
