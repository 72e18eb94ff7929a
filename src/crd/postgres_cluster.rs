use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// PostgresCluster is the Schema for the postgresclusters API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[kube(
    group = "postgres-operator.smoketurner.com",
    version = "v1beta1",
    kind = "PostgresCluster",
    plural = "postgresclusters",
    shortname = "pgc",
    namespaced,
    status = "PostgresClusterStatus",
    printcolumn = r#"{"name":"Version", "type":"integer", "jsonPath":".spec.postgresVersion"}"#,
    printcolumn = r#"{"name":"Observed", "type":"integer", "jsonPath":".status.observedGeneration"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterSpec {
    /// PostgreSQL archive configuration
    pub archive: Archive,

    /// Secret holding `tls.crt`, `tls.key` and `ca.crt`, projected into
    /// every instance pod at `/pgconf/tls`
    #[serde(
        default,
        rename = "customTLSSecret",
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_tls_secret: Option<KeyProjection>,

    /// The image name to use for PostgreSQL containers
    pub image: String,

    /// Instance sets, unique by name
    #[serde(rename = "instances")]
    pub instance_sets: Vec<PostgresInstanceSetSpec>,

    /// Whether the cluster is deployed to OpenShift
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openshift: Option<bool>,

    /// Patroni (HA layer) tuning; defaulted when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patroni: Option<PatroniSpec>,

    /// The port on which PostgreSQL should listen (default 5432)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Major version of PostgreSQL installed in the PostgreSQL container
    pub postgres_version: i32,

    /// Proxy in front of PostgreSQL. Absent means no proxy is deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<PostgresProxySpec>,
}

/// PostgreSQL archive configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
pub struct Archive {
    /// pgBackRest archive configuration
    pub pgbackrest: PGBackRestArchive,
}

/// pgBackRest archive configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PGBackRestArchive {
    /// Projected sources containing custom pgBackRest configuration, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configuration: Vec<VolumeProjection>,

    /// Repository volumes (1 to 4, named repo1..repo4)
    #[serde(default)]
    pub repos: Vec<RepoVolume>,

    /// Dedicated repository host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_host: Option<RepoHost>,
}

/// A single projected configuration source
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolumeProjection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<KeyProjection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<KeyProjection>,
}

/// Projection of a ConfigMap or Secret, optionally restricted to some keys
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct KeyProjection {
    /// Name of the ConfigMap or Secret
    pub name: String,

    /// Keys to project; all keys when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<KeyToPath>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
pub struct KeyToPath {
    pub key: String,
    pub path: String,
}

/// A pgBackRest dedicated repository host
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RepoHost {
    /// Dedicated repository host configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedicated: Option<DedicatedRepo>,

    /// The image name to use for pgBackRest containers
    pub image: String,

    /// Resource requirements for the repository host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// ConfigMap containing custom SSH configuration
    #[serde(
        default,
        rename = "sshConfigMap",
        skip_serializing_if = "Option::is_none"
    )]
    pub ssh_config: Option<KeyProjection>,

    /// Secret containing custom SSH keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_secret: Option<KeyProjection>,
}

impl RepoHost {
    /// Resources for the host container. The dedicated block wins when both are set.
    pub fn effective_resources(&self) -> Option<&ResourceRequirements> {
        self.dedicated
            .as_ref()
            .and_then(|d| d.resources.as_ref())
            .or(self.resources.as_ref())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
pub struct DedicatedRepo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

/// A volume for a pgBackRest repository
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RepoVolume {
    /// Repository name, `repo1` through `repo4`
    pub name: String,

    /// Claim used to create the repository volume
    pub volume_claim_spec: VolumeClaimSpec,
}

/// PersistentVolumeClaim declaration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimSpec {
    /// Access modes; `ReadWriteOnce` when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,

    /// Storage class name (uses default if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Requested size (e.g., "10Gi")
    pub size: String,
}

/// Resource requirements for a container
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceList>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceList>,
}

/// Resource quantities for CPU and memory
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
pub struct ResourceList {
    /// CPU quantity (e.g., "500m", "2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    /// Memory quantity (e.g., "512Mi", "2Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// A named group of PostgreSQL instances sharing a storage template
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PostgresInstanceSetSpec {
    /// Set name; derived from the list position when blank
    #[serde(default)]
    pub name: String,

    /// Number of instances (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Claim used to create the PGDATA volume of each instance
    pub volume_claim_spec: VolumeClaimSpec,
}

/// Patroni settings
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PatroniSpec {
    /// TTL of the leader lock, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_lease_duration_seconds: Option<i32>,

    /// Port of the Patroni REST API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Interval between Patroni HA loop runs, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_period_seconds: Option<i32>,

    /// PostgreSQL parameters rendered into the Patroni dynamic configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

/// Union of the supported PostgreSQL proxies
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PostgresProxySpec {
    /// PgBouncer proxy and connection pooler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pg_bouncer: Option<PgBouncerPodSpec>,
}

/// The proxy variant selected by a declaration
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProxyKind<'a> {
    PgBouncer(&'a PgBouncerPodSpec),
}

impl PostgresProxySpec {
    /// The declared variant, if any
    pub fn kind(&self) -> Option<ProxyKind<'_>> {
        self.pg_bouncer.as_ref().map(ProxyKind::PgBouncer)
    }
}

/// PgBouncer deployment settings
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PgBouncerPodSpec {
    /// PgBouncer image (operator default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Number of PgBouncer pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Port PgBouncer listens on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// session, transaction, or statement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_client_conn: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_pool_size: Option<i32>,
}

/// Status of the PostgresCluster
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patroni: Option<PatroniStatus>,

    /// Status information for pgBackRest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pgbackrest: Option<PGBackRestStatus>,

    /// Current state of the PostgreSQL proxy
    #[serde(default)]
    pub proxy: PostgresProxyStatus,

    /// Per instance-set replica counts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<InstanceSetStatus>,

    /// The `.metadata.generation` this status was based on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Kubernetes-style conditions, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl PostgresClusterStatus {
    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

/// pgBackRest status
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PGBackRestStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_host: Option<RepoHostStatus>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repos: Vec<RepoVolumeStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct RepoHostStatus {
    /// Whether the repository host is ready for use
    #[serde(default)]
    pub ready: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepoVolumeStatus {
    /// Repository name
    pub name: String,

    /// Whether the repository claim is bound to a volume
    #[serde(default)]
    pub bound: bool,

    /// Name of the bound volume
    #[serde(default, rename = "volume", skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostgresProxyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pg_bouncer: Option<PgBouncerPodStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PgBouncerPodStatus {
    /// Desired PgBouncer pods
    #[serde(default)]
    pub replicas: i32,

    /// PgBouncer pods available to serve connections
    #[serde(default)]
    pub ready_replicas: i32,
}

/// Patroni role information, surfaced for visibility
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatroniStatus {
    /// Pod currently holding the leader lock
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,

    /// Pods running as replicas
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replicas: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSetStatus {
    pub name: String,

    #[serde(default)]
    pub replicas: i32,

    #[serde(default)]
    pub ready_replicas: i32,
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
