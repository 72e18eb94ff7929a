//! High-availability configuration
//!
//! Patroni elects the leader and handles failover by itself. The operator
//! renders its configuration, grants the RBAC the Kubernetes DCS needs and
//! exposes the role-routed Services.
//!
//! Failures here do not fail the pass: Patroni keeps running on its last
//! configuration and the step is retried on a short requeue.

use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::ResourceExt;
use tracing::warn;

use crate::controller::PassOutcome;
use crate::controller::apply::ensure;
use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::crd::PostgresCluster;
use crate::resources::patroni::{
    generate_patroni_config, generate_patroni_role, generate_patroni_role_binding,
    generate_service_account,
};
use crate::resources::service::{
    generate_pods_service, generate_primary_service, generate_replicas_service,
};
use crate::store::{Managed, ObjectStore};

async fn step<S: ObjectStore, K: Managed>(
    ctx: &Context<S>,
    ns: &str,
    desired: Result<K>,
    outcome: &mut PassOutcome,
) {
    let result = match desired {
        Ok(desired) => {
            let name = format!("{}/{}", K::kind(&()), desired.name_any());
            ensure(ctx, ns, desired).await.map_err(|e| (name, e))
        }
        Err(e) => Err((K::kind(&()).to_string(), e)),
    };
    if let Err((target, e)) = result {
        warn!(target = %target, "HA configuration step failed, will retry: {}", e);
        outcome.pend(format!("ha {}: {}", target, e));
    }
}

/// Apply the Patroni configuration, its RBAC and the role Services
pub async fn reconcile_ha<S: ObjectStore>(ctx: &Context<S>, cluster: &PostgresCluster) -> PassOutcome {
    let ns = cluster.namespace().unwrap_or_default();
    let mut outcome = PassOutcome::default();

    step::<_, ConfigMap>(ctx, &ns, generate_patroni_config(cluster), &mut outcome).await;
    step::<_, ServiceAccount>(ctx, &ns, Ok(generate_service_account(cluster)), &mut outcome).await;
    step::<_, Role>(ctx, &ns, Ok(generate_patroni_role(cluster)), &mut outcome).await;
    step::<_, RoleBinding>(ctx, &ns, Ok(generate_patroni_role_binding(cluster)), &mut outcome)
        .await;
    step::<_, Service>(ctx, &ns, Ok(generate_pods_service(cluster)), &mut outcome).await;
    step::<_, Service>(ctx, &ns, Ok(generate_primary_service(cluster)), &mut outcome).await;
    step::<_, Service>(ctx, &ns, Ok(generate_replicas_service(cluster)), &mut outcome).await;

    outcome
}
