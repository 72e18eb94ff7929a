//! Instance set reconciliation
//!
//! One StatefulSet per declared instance set. Sets that are no longer
//! declared are drained (scaled to zero) and deleted once no pods remain.

use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::ResourceExt;
use serde_json::json;
use tracing::info;

use crate::controller::PassOutcome;
use crate::controller::apply::{self, ensure_with};
use crate::controller::context::Context;
use crate::crd::PostgresCluster;
use crate::resources::common::{LABEL_INSTANCE_SET, instance_selector, is_owned_by};
use crate::resources::instance::generate_instance_set;
use crate::store::ObjectStore;

const COMPONENT: &str = "instances";

/// Apply every declared instance set and drain the undeclared ones
pub async fn reconcile_instances<S: ObjectStore>(
    ctx: &Context<S>,
    cluster: &PostgresCluster,
) -> PassOutcome {
    let ns = cluster.namespace().unwrap_or_default();
    let mut outcome = PassOutcome::default();

    for set in &cluster.spec.instance_sets {
        let desired = generate_instance_set(cluster, set);
        let name = desired.name_any();
        // Claim templates are immutable once created
        let result = ensure_with(ctx, &ns, desired, |desired, existing| {
            if let (Some(spec), Some(current)) = (desired.spec.as_mut(), existing.spec.as_ref()) {
                spec.volume_claim_templates = current.volume_claim_templates.clone();
            }
        })
        .await;
        if let Err(e) = result {
            outcome.fail(COMPONENT, name, e);
        }
    }

    let declared: BTreeSet<&str> = cluster
        .spec
        .instance_sets
        .iter()
        .map(|s| s.name.as_str())
        .collect();
    let uid = cluster.uid().unwrap_or_default();

    let existing = match ctx
        .store
        .list::<StatefulSet>(&ns, &instance_selector(&cluster.name_any()))
        .await
    {
        Ok(existing) => existing,
        Err(e) => {
            // Without a complete listing nothing is known to be undeclared
            outcome.fail(COMPONENT, "list", e);
            return outcome;
        }
    };

    for sts in existing {
        if !is_owned_by(&sts, &uid) {
            continue;
        }
        let Some(set_name) = sts.labels().get(LABEL_INSTANCE_SET) else {
            continue;
        };
        if declared.contains(set_name.as_str()) {
            continue;
        }
        match drain(ctx, &ns, &sts).await {
            Ok(Drain::Deleted) => {}
            Ok(Drain::InProgress) => outcome.pend(format!("draining {}", sts.name_any())),
            Err(e) => outcome.fail(COMPONENT, sts.name_any(), e),
        }
    }

    outcome
}

#[derive(Debug, PartialEq, Eq)]
enum Drain {
    InProgress,
    Deleted,
}

/// Step an undeclared set towards removal
async fn drain<S: ObjectStore>(
    ctx: &Context<S>,
    ns: &str,
    sts: &StatefulSet,
) -> crate::controller::Result<Drain> {
    let name = sts.name_any();
    // No status yet means the pod count is unknown, not zero
    let pods = sts.status.as_ref().map(|s| s.replicas);
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);

    if pods == Some(0) {
        apply::delete(ctx, ns, sts).await?;
        return Ok(Drain::Deleted);
    }

    if desired != 0 {
        info!(statefulset = %name, pods = ?pods, "Scaling undeclared instance set to zero");
        ctx.store
            .patch::<StatefulSet>(ns, &name, json!({"spec": {"replicas": 0}}))
            .await?;
        ctx.record_mutation("StatefulSet", "patch");
    }
    Ok(Drain::InProgress)
}
