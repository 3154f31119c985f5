//! VolumeSnapshot reconciler
//!
//! Folds observed snapshots into the "latest" pointer of their source
//! volume's schedule entity and re-arms the timer from the new reference
//! time. Snapshots without a PVC source (content-imported) are ignored.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, warn};

use snapcycle_common::{Error, VolumeIdentity};

use crate::crd::VolumeSnapshot;

use super::{Context, HEARTBEAT_SECS};

/// Reconcile a VolumeSnapshot into its source volume's schedule entity.
pub async fn reconcile(snapshot: Arc<VolumeSnapshot>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = snapshot.name_any();
    let namespace = snapshot.namespace().unwrap_or_default();

    let Some(source) = snapshot.source_volume() else {
        debug!(namespace = %namespace, snapshot = %name, "snapshot has no PVC source, skipping");
        return Ok(Action::await_change());
    };
    let Some(created) = snapshot.created_at() else {
        // Not persisted yet; the update event carries the timestamp
        return Ok(Action::await_change());
    };

    let identity = VolumeIdentity::new(namespace, source);
    debug!(volume = %identity, snapshot = %name, "Reconciling snapshot");

    let entity = ctx.registry.get_or_create(&identity);
    if entity.observe_snapshot(created, &name) {
        debug!(volume = %identity, snapshot = %name, "latest snapshot advanced");
    }
    ctx.scheduler.reschedule(&entity);

    Ok(Action::await_change())
}

/// Error policy for the snapshot controller
pub fn error_policy(snapshot: Arc<VolumeSnapshot>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        namespace = %snapshot.namespace().unwrap_or_default(),
        snapshot = %snapshot.name_any(),
        error = %error,
        "Snapshot reconciliation error, will retry"
    );
    Action::requeue(Duration::from_secs(HEARTBEAT_SECS))
}
