//! Status aggregation for PostgresCluster resources
//!
//! The status is rebuilt on every pass from freshly observed children. The
//! aggregation itself is a pure function; persisting it is left to the
//! reconciler.

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde_json::{Map, Value};

use crate::controller::PassOutcome;
use crate::controller::backup::{RepoState, is_bound};
use crate::controller::observe::Observed;
use crate::crd::{
    Condition, DEFAULT_INSTANCE_REPLICAS, InstanceSetStatus, PGBackRestStatus, PatroniStatus,
    PgBouncerPodStatus, PostgresCluster, PostgresClusterStatus, PostgresProxyStatus,
    RepoHostStatus, RepoVolumeStatus,
};
use crate::resources::common::{LABEL_ROLE, names};
use crate::resources::service::{ROLE_PRIMARY, ROLE_REPLICA};

/// Standard condition types following Kubernetes conventions
pub mod condition_types {
    /// Every declared child is ready
    pub const READY: &str = "Ready";
    /// Children are converging towards the declaration
    pub const PROGRESSING: &str = "Progressing";
    /// The last pass failed for at least one child
    pub const DEGRADED: &str = "Degraded";
    /// The declaration passed validation
    pub const CONFIG_VALID: &str = "ConfigurationValid";
    /// The declared proxy has all its replicas available
    pub const PROXY_AVAILABLE: &str = "ProxyAvailable";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
}

fn bool_status(value: bool) -> &'static str {
    if value {
        condition_status::TRUE
    } else {
        condition_status::FALSE
    }
}

/// Builder for creating and updating status conditions
///
/// Keeps at most one condition per type. The transition time of a condition
/// only moves when its status value changes.
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    touched: Vec<String>,
    generation: Option<i64>,
    now: String,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new(generation: Option<i64>, now: impl Into<String>) -> Self {
        Self::from_existing(Vec::new(), generation, now)
    }

    /// Create from existing conditions
    pub fn from_existing(
        existing: Vec<Condition>,
        generation: Option<i64>,
        now: impl Into<String>,
    ) -> Self {
        let mut conditions: Vec<Condition> = Vec::with_capacity(existing.len());
        for c in existing {
            if !conditions.iter().any(|k| k.type_ == c.type_) {
                conditions.push(c);
            }
        }
        Self {
            conditions,
            touched: Vec::new(),
            generation,
            now: now.into(),
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = self.now.clone();
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: self.now.clone(),
                observed_generation: self.generation,
            });
        }
        self.touched.push(type_.to_string());
        self
    }

    /// Set the Ready condition
    pub fn ready(self, is_ready: bool, reason: &str, message: &str) -> Self {
        self.set_condition(condition_types::READY, bool_status(is_ready), reason, message)
    }

    /// Set the Progressing condition
    pub fn progressing(self, is_progressing: bool, reason: &str, message: &str) -> Self {
        self.set_condition(
            condition_types::PROGRESSING,
            bool_status(is_progressing),
            reason,
            message,
        )
    }

    /// Set the Degraded condition
    pub fn degraded(self, is_degraded: bool, reason: &str, message: &str) -> Self {
        self.set_condition(condition_types::DEGRADED, bool_status(is_degraded), reason, message)
    }

    pub fn config_valid(self, is_valid: bool, reason: &str, message: &str) -> Self {
        self.set_condition(condition_types::CONFIG_VALID, bool_status(is_valid), reason, message)
    }

    pub fn proxy_available(self, is_available: bool, reason: &str, message: &str) -> Self {
        self.set_condition(
            condition_types::PROXY_AVAILABLE,
            bool_status(is_available),
            reason,
            message,
        )
    }

    /// Build the conditions list, keeping untouched conditions
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }

    /// Build only the conditions set on this builder
    pub fn build_touched(self) -> Vec<Condition> {
        let touched = self.touched;
        self.conditions
            .into_iter()
            .filter(|c| touched.contains(&c.type_))
            .collect()
    }
}

/// Compute the status of a cluster from a fresh observation
///
/// `outcome` is the result of the apply phase of the same pass. The observed
/// generation only advances when that phase had no failures, and never moves
/// backwards.
pub fn aggregate(
    cluster: &PostgresCluster,
    observed: &Observed,
    outcome: &PassOutcome,
    now: &str,
) -> PostgresClusterStatus {
    let prior = cluster.status.clone().unwrap_or_default();
    let generation = cluster.metadata.generation;
    let cluster_name = cluster.name_any();

    let instances: Vec<InstanceSetStatus> = cluster
        .spec
        .instance_sets
        .iter()
        .map(|set| {
            let status = observed
                .instance_set(&names::instance_set(&cluster_name, &set.name))
                .and_then(|s| s.status.as_ref());
            InstanceSetStatus {
                name: set.name.clone(),
                replicas: status.map(|s| s.replicas).unwrap_or(0),
                ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            }
        })
        .collect();
    let instances_ready = cluster
        .spec
        .instance_sets
        .iter()
        .zip(&instances)
        .all(|(set, status)| {
            status.ready_replicas >= set.replicas.unwrap_or(DEFAULT_INSTANCE_REPLICAS)
        });

    let repos: Vec<RepoVolumeStatus> = cluster
        .spec
        .archive
        .pgbackrest
        .repos
        .iter()
        .map(|repo| {
            let claim = observed.repo_volume(&names::repo_volume(&cluster_name, &repo.name));
            RepoVolumeStatus {
                name: repo.name.clone(),
                bound: RepoState::of(true, claim) == RepoState::Bound,
                volume_name: claim
                    .filter(|c| is_bound(c))
                    .and_then(|c| c.spec.as_ref())
                    .and_then(|s| s.volume_name.clone()),
            }
        })
        .collect();
    let repos_bound = repos.iter().all(|r| r.bound);

    let repo_host = cluster.spec.archive.pgbackrest.repo_host.as_ref().map(|_| {
        let ready = observed.repo_host.as_ref().is_some_and(|sts| {
            let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            let available = sts
                .status
                .as_ref()
                .and_then(|s| s.available_replicas)
                .unwrap_or(0);
            desired > 0 && available >= desired
        });
        RepoHostStatus { ready }
    });
    let repo_host_ready = repo_host.as_ref().is_none_or(|h| h.ready);

    let declared_proxy = cluster
        .spec
        .proxy
        .as_ref()
        .and_then(|p| p.pg_bouncer.as_ref());
    let pg_bouncer = declared_proxy.map(|spec| {
        let status = observed.pgbouncer.as_ref().and_then(|d| d.status.as_ref());
        PgBouncerPodStatus {
            replicas: spec.desired_replicas(),
            ready_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
        }
    });
    let proxy_available = match (&pg_bouncer, &observed.pgbouncer) {
        (Some(status), Some(_)) => Some(status.ready_replicas >= status.replicas),
        (Some(_), None) => Some(false),
        (None, _) => None,
    };

    let mut conditions = ConditionBuilder::from_existing(prior.conditions.clone(), generation, now)
        .config_valid(true, "Valid", "Specification is valid");

    // ProxyAvailable is omitted when no proxy is declared
    if let Some(available) = proxy_available {
        conditions = if available {
            conditions.proxy_available(true, "DeploymentAvailable", "PgBouncer replicas are available")
        } else if observed.pgbouncer.is_none() {
            conditions.proxy_available(false, "DeploymentNotFound", "PgBouncer deployment does not exist yet")
        } else {
            conditions.proxy_available(false, "DeploymentUnavailable", "Waiting for PgBouncer replicas")
        };
    }

    let proxy_ready = proxy_available.unwrap_or(true);
    let all_ready = instances_ready && repos_bound && repo_host_ready && proxy_ready;
    let waiting = waiting_on(instances_ready, repos_bound, repo_host_ready, proxy_ready);

    conditions = if outcome.is_clean() {
        conditions.degraded(false, "Healthy", "All child resources applied")
    } else {
        conditions.degraded(true, "ReconcileFailed", &failure_message(outcome))
    };
    conditions = if all_ready && outcome.is_clean() {
        conditions
            .ready(true, "ClusterReady", "All declared children are ready")
            .progressing(false, "Stable", "Cluster is stable")
    } else if outcome.is_clean() {
        conditions
            .ready(false, "Converging", &format!("Waiting for {}", waiting))
            .progressing(true, "Converging", &format!("Waiting for {}", waiting))
    } else {
        conditions
            .ready(false, "ReconcileFailed", &failure_message(outcome))
            .progressing(false, "Blocked", "Retrying after failures")
    };

    let observed_generation = if outcome.is_clean() {
        prior.observed_generation.max(generation)
    } else {
        prior.observed_generation
    };

    PostgresClusterStatus {
        patroni: patroni_status(observed),
        pgbackrest: Some(PGBackRestStatus { repo_host, repos }),
        proxy: PostgresProxyStatus { pg_bouncer },
        instances,
        observed_generation,
        conditions: conditions.build_touched(),
    }
}

/// Status written when the declaration fails validation
///
/// Everything observed earlier is kept; only the validity, readiness and
/// progress conditions change.
pub fn invalid_status(cluster: &PostgresCluster, message: &str, now: &str) -> PostgresClusterStatus {
    let prior = cluster.status.clone().unwrap_or_default();
    let conditions = ConditionBuilder::from_existing(prior.conditions.clone(), cluster.metadata.generation, now)
        .config_valid(false, "InvalidSpec", message)
        .ready(false, "InvalidSpec", message)
        .progressing(false, "InvalidSpec", "Waiting for the specification to be corrected")
        .build();
    PostgresClusterStatus {
        conditions,
        ..prior
    }
}

fn waiting_on(instances: bool, repos: bool, repo_host: bool, proxy: bool) -> String {
    let mut parts = Vec::new();
    if !instances {
        parts.push("instances");
    }
    if !repos {
        parts.push("repository volumes");
    }
    if !repo_host {
        parts.push("repository host");
    }
    if !proxy {
        parts.push("proxy");
    }
    parts.join(", ")
}

fn failure_message(outcome: &PassOutcome) -> String {
    outcome
        .failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn patroni_status(observed: &Observed) -> Option<PatroniStatus> {
    if observed.instance_pods.is_empty() {
        return None;
    }
    let role = |pod: &Pod| pod.labels().get(LABEL_ROLE).cloned();

    let leader = observed
        .instance_pods
        .iter()
        .find(|p| matches!(role(p).as_deref(), Some(ROLE_PRIMARY) | Some("primary")))
        .map(|p| p.name_any());
    let mut replicas: Vec<String> = observed
        .instance_pods
        .iter()
        .filter(|p| role(p).as_deref() == Some(ROLE_REPLICA))
        .map(|p| p.name_any())
        .collect();
    replicas.sort();

    Some(PatroniStatus { leader, replicas })
}

/// Merge patch turning `prior` into `new`
///
/// Fields present in `prior` but gone from `new` are set to null so the
/// status really is replaced rather than merged.
pub fn status_patch(prior: &Value, new: &Value) -> Value {
    match (prior, new) {
        (Value::Object(p), Value::Object(n)) => {
            let mut out = Map::new();
            for (k, v) in n {
                let merged = match p.get(k) {
                    Some(pv) => status_patch(pv, v),
                    None => v.clone(),
                };
                out.insert(k.clone(), merged);
            }
            for k in p.keys() {
                if !n.contains_key(k) {
                    out.insert(k.clone(), Value::Null);
                }
            }
            Value::Object(out)
        }
        (_, n) => n.clone(),
    }
}
