//! Proxy reconciliation
//!
//! Exactly one proxy variant may be declared. When none is, every proxy
//! child left over from an earlier declaration is removed.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::ResourceExt;

use crate::controller::PassOutcome;
use crate::controller::apply::{ensure, remove_owned};
use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::crd::{PgBouncerPodSpec, PostgresCluster, ProxyKind};
use crate::resources::common::names;
use crate::resources::pgbouncer::{
    generate_pgbouncer_configmap, generate_pgbouncer_deployment, generate_pgbouncer_service,
};
use crate::store::ObjectStore;

const COMPONENT: &str = "proxy";

pub async fn reconcile_proxy<S: ObjectStore>(
    ctx: &Context<S>,
    cluster: &PostgresCluster,
) -> PassOutcome {
    let ns = cluster.namespace().unwrap_or_default();
    let mut outcome = PassOutcome::default();

    match cluster.spec.proxy.as_ref().and_then(|p| p.kind()) {
        Some(ProxyKind::PgBouncer(spec)) => apply_pgbouncer(ctx, cluster, &ns, spec, &mut outcome).await,
        None => remove_pgbouncer(ctx, cluster, &ns, &mut outcome).await,
    }

    outcome
}

async fn apply_pgbouncer<S: ObjectStore>(
    ctx: &Context<S>,
    cluster: &PostgresCluster,
    ns: &str,
    spec: &PgBouncerPodSpec,
    outcome: &mut PassOutcome,
) {
    let config = generate_pgbouncer_configmap(cluster, spec);
    let target = config.name_any();
    if let Err(e) = ensure(ctx, ns, config).await {
        outcome.fail(COMPONENT, format!("ConfigMap/{}", target), e);
    }

    let deployment = generate_pgbouncer_deployment(cluster, spec);
    let target = deployment.name_any();
    if let Err(e) = ensure(ctx, ns, deployment).await {
        outcome.fail(COMPONENT, format!("Deployment/{}", target), e);
    }

    let service = generate_pgbouncer_service(cluster, spec);
    let target = service.name_any();
    if let Err(e) = ensure(ctx, ns, service).await {
        outcome.fail(COMPONENT, format!("Service/{}", target), e);
    }
}

async fn remove_pgbouncer<S: ObjectStore>(
    ctx: &Context<S>,
    cluster: &PostgresCluster,
    ns: &str,
    outcome: &mut PassOutcome,
) {
    let name = names::pgbouncer(&cluster.name_any());
    let uid = cluster.uid().unwrap_or_default();

    let results: [(&str, Result<bool>); 3] = [
        ("Deployment", remove_owned::<_, Deployment>(ctx, ns, &name, &uid).await),
        ("Service", remove_owned::<_, Service>(ctx, ns, &name, &uid).await),
        ("ConfigMap", remove_owned::<_, ConfigMap>(ctx, ns, &name, &uid).await),
    ];
    for (kind, result) in results {
        if let Err(e) = result {
            outcome.fail(COMPONENT, format!("{}/{}", kind, name), e);
        }
    }
}
