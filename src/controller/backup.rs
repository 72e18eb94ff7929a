//! pgBackRest repository reconciliation
//!
//! Each declared repository moves through
//! `Absent -> Declared -> VolumeProvisioned -> Bound`. The operator only ever
//! requests the claim; binding belongs to the storage subsystem and is only
//! observed.
//!
//! A repository volume is deleted only on positive evidence that it is no
//! longer wanted: the listing of this cluster's repository volumes succeeded,
//! the volume carries a well-formed repository label, and that repository is
//! absent from the validated declaration. Any failed read leaves every
//! volume in place.

use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::controller::PassOutcome;
use crate::controller::apply::{self, Applied, create_if_absent, ensure};
use crate::controller::context::Context;
use crate::controller::validation::is_valid_repo_name;
use crate::crd::PostgresCluster;
use crate::resources::common::{
    LABEL_PGBACKREST_REPO, is_owned_by, names, repo_volume_selector,
};
use crate::resources::pgbackrest::{
    generate_config, generate_repo_host, generate_repo_volume, is_repo_host,
};
use crate::store::ObjectStore;

const COMPONENT: &str = "backup";

/// Lifecycle of one repository, as far as the operator can tell
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepoState {
    /// Not in the declaration
    Absent,
    /// Declared, no claim yet
    Declared,
    /// Claim exists, not yet bound
    VolumeProvisioned,
    /// Claim bound to a volume
    Bound,
}

impl RepoState {
    /// Derive the state of a repository from the declaration and its observed claim
    pub fn of(declared: bool, claim: Option<&PersistentVolumeClaim>) -> Self {
        match (declared, claim) {
            (false, _) => RepoState::Absent,
            (true, None) => RepoState::Declared,
            (true, Some(pvc)) if is_bound(pvc) => RepoState::Bound,
            (true, Some(_)) => RepoState::VolumeProvisioned,
        }
    }
}

/// Whether the storage subsystem reports the claim as bound
pub fn is_bound(pvc: &PersistentVolumeClaim) -> bool {
    pvc.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        == Some("Bound")
}

/// Reconcile repository volumes, the dedicated repository host and the
/// pgBackRest configuration
pub async fn reconcile_backup<S: ObjectStore>(
    ctx: &Context<S>,
    cluster: &PostgresCluster,
) -> PassOutcome {
    let ns = cluster.namespace().unwrap_or_default();
    let cluster_name = cluster.name_any();
    let uid = cluster.uid().unwrap_or_default();
    let mut outcome = PassOutcome::default();

    reconcile_repo_volumes(ctx, cluster, &ns, &uid, &mut outcome).await;

    // Repository host
    let host_name = names::repo_host(&cluster_name);
    match &cluster.spec.archive.pgbackrest.repo_host {
        Some(host) => {
            if let Err(e) = ensure(ctx, &ns, generate_repo_host(cluster, host)).await {
                outcome.fail(COMPONENT, host_name.clone(), e);
            }
        }
        None => {
            // Volumes stay: backups already taken remain addressable
            if let Err(e) = remove_repo_host(ctx, &ns, &host_name, &uid).await {
                outcome.fail(COMPONENT, host_name.clone(), e);
            }
        }
    }

    // The configuration points at the host only once it is observed to exist
    let host_exists = match ctx.store.get::<StatefulSet>(&ns, &host_name).await {
        Ok(host) => host.is_some_and(|h| is_owned_by(&h, &uid) && is_repo_host(&h)),
        Err(e) => {
            outcome.fail(COMPONENT, host_name, e);
            return outcome;
        }
    };
    let config = generate_config(cluster, host_exists);
    let config_name = config.name_any();
    if let Err(e) = ensure(ctx, &ns, config).await {
        outcome.fail(COMPONENT, config_name, e);
    }

    outcome
}

/// Delete the repository host, leaving any other StatefulSet of that name alone
async fn remove_repo_host<S: ObjectStore>(
    ctx: &Context<S>,
    ns: &str,
    name: &str,
    uid: &str,
) -> crate::controller::Result<()> {
    let Some(sts) = ctx.store.get::<StatefulSet>(ns, name).await? else {
        return Ok(());
    };
    if !is_repo_host(&sts) || !is_owned_by(&sts, uid) {
        warn!(statefulset = %name, "Not deleting StatefulSet that is not this cluster's repository host");
        return Ok(());
    }
    apply::delete(ctx, ns, &sts).await
}

async fn reconcile_repo_volumes<S: ObjectStore>(
    ctx: &Context<S>,
    cluster: &PostgresCluster,
    ns: &str,
    uid: &str,
    outcome: &mut PassOutcome,
) {
    let cluster_name = cluster.name_any();

    // Declared -> VolumeProvisioned
    for repo in &cluster.spec.archive.pgbackrest.repos {
        let desired = generate_repo_volume(cluster, repo);
        let name = desired.name_any();
        match create_if_absent(ctx, ns, desired).await {
            Ok(Applied::Created) => info!(repo = %repo.name, "Requested repository volume"),
            Ok(_) => {}
            // A failed read here must not be mistaken for absence
            Err(e) => outcome.fail(COMPONENT, name, e),
        }
    }

    let declared: BTreeSet<&str> = cluster.spec.repo_names().into_iter().collect();
    let existing = match ctx
        .store
        .list::<PersistentVolumeClaim>(ns, &repo_volume_selector(&cluster_name))
        .await
    {
        Ok(existing) => existing,
        Err(e) => {
            outcome.fail(COMPONENT, "list repository volumes", e);
            return;
        }
    };

    for pvc in existing {
        let Some(repo) = pvc.labels().get(LABEL_PGBACKREST_REPO) else {
            continue;
        };
        if !is_valid_repo_name(repo) {
            warn!(pvc = %pvc.name_any(), repo = %repo, "Ignoring volume with malformed repository label");
            continue;
        }
        if declared.contains(repo.as_str()) || !is_owned_by(&pvc, uid) {
            continue;
        }
        info!(pvc = %pvc.name_any(), repo = %repo, "Deleting volume of undeclared repository");
        if let Err(e) = apply::delete(ctx, ns, &pvc).await {
            outcome.fail(COMPONENT, pvc.name_any(), e);
        }
    }
}
