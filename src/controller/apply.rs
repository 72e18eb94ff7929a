//! Idempotent writes of child objects
//!
//! Desired objects are stamped with a content hash. An existing object is
//! rewritten only when its hash differs or when a field we set has drifted,
//! so a converged pass issues no writes at all.

use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::resources::common::{is_owned_by, json_subset, spec_hash, with_spec_hash};
use crate::store::{Managed, ObjectStore};

/// What a write step did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

impl Applied {
    pub fn changed(self) -> bool {
        self != Applied::Unchanged
    }
}

/// Create `desired` or bring the existing object in line with it
pub async fn ensure<S, K>(ctx: &Context<S>, ns: &str, desired: K) -> Result<Applied>
where
    S: ObjectStore,
    K: Managed,
{
    ensure_with(ctx, ns, desired, |_, _| {}).await
}

/// Like [`ensure`], with a hook that may carry fields over from the existing object
///
/// The hash is computed before the hook runs, so carried-over fields never
/// cause a rewrite on their own.
pub async fn ensure_with<S, K, F>(ctx: &Context<S>, ns: &str, desired: K, carry: F) -> Result<Applied>
where
    S: ObjectStore,
    K: Managed,
    F: FnOnce(&mut K, &K) + Send,
{
    let mut desired = with_spec_hash(desired)?;
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or(Error::MissingObjectKey("metadata.name"))?;
    let kind = K::kind(&()).to_string();

    let existing = ctx.store.get::<K>(ns, &name).await?;
    let verb = match &existing {
        Some(existing) => {
            carry(&mut desired, existing);
            if spec_hash(existing) == spec_hash(&desired)
                && json_subset(&serde_json::to_value(&desired)?, &serde_json::to_value(existing)?)
            {
                debug!(kind = %kind, name = %name, "Child up to date");
                return Ok(Applied::Unchanged);
            }
            Applied::Updated
        }
        None => Applied::Created,
    };

    ctx.store.apply(ns, &desired).await?;
    ctx.record_mutation(&kind, "apply");
    info!(kind = %kind, name = %name, result = ?verb, "Applied child");
    Ok(verb)
}

/// Create `desired` only when absent; an existing object is never touched
pub async fn create_if_absent<S, K>(ctx: &Context<S>, ns: &str, desired: K) -> Result<Applied>
where
    S: ObjectStore,
    K: Managed,
{
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or(Error::MissingObjectKey("metadata.name"))?;
    if ctx.store.get::<K>(ns, &name).await?.is_some() {
        return Ok(Applied::Unchanged);
    }

    let kind = K::kind(&()).to_string();
    ctx.store.apply(ns, &with_spec_hash(desired)?).await?;
    ctx.record_mutation(&kind, "create");
    info!(kind = %kind, name = %name, "Created child");
    Ok(Applied::Created)
}

/// Delete a child if it exists and belongs to the cluster with `owner_uid`
///
/// Returns true when a delete was issued. Objects owned by someone else are
/// left alone.
pub async fn remove_owned<S, K>(ctx: &Context<S>, ns: &str, name: &str, owner_uid: &str) -> Result<bool>
where
    S: ObjectStore,
    K: Managed,
{
    let kind = K::kind(&()).to_string();
    let Some(existing) = ctx.store.get::<K>(ns, name).await? else {
        return Ok(false);
    };
    if !is_owned_by(&existing, owner_uid) {
        warn!(kind = %kind, name = %name, "Not deleting child owned by another object");
        return Ok(false);
    }
    delete(ctx, ns, &existing).await?;
    Ok(true)
}

/// Delete an already-observed child
pub async fn delete<S, K>(ctx: &Context<S>, ns: &str, obj: &K) -> Result<()>
where
    S: ObjectStore,
    K: Managed,
{
    let kind = K::kind(&()).to_string();
    let name = obj.name_any();
    ctx.store.delete::<K>(ns, &name).await?;
    ctx.record_mutation(&kind, "delete");
    info!(kind = %kind, name = %name, "Deleted child");
    Ok(())
}
