//! PersistentVolumeClaim reconciler
//!
//! Feeds volume observations into the backup registry and keeps the
//! per-volume timer armed. Scheduled volumes are requeued on a fixed
//! heartbeat so a missed watch event delays a backup by at most one
//! heartbeat period.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolumeClaim};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, warn};

use snapcycle_common::{Error, VolumeIdentity};

use crate::events::reasons;

use super::{Context, HEARTBEAT_SECS};

/// Reconcile a PersistentVolumeClaim into its schedule entity.
pub async fn reconcile(
    pvc: Arc<PersistentVolumeClaim>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let namespace = pvc.namespace().unwrap_or_default();
    let name = pvc.name_any();
    let identity = VolumeIdentity::new(namespace, name);

    debug!(volume = %identity, "Reconciling PVC");

    let entity = ctx.registry.get_or_create(&identity);

    if let Err(e) = entity.observe_volume(&pvc) {
        // Malformed annotation: the schedule keeps its prior values and the
        // user is told via an Event. Not a reconcile failure - retrying
        // cannot fix the annotation.
        warn!(volume = %identity, error = %e, "ignoring malformed schedule annotation");
        ctx.events
            .publish(
                &claim_ref(&pvc, &identity),
                EventType::Warning,
                reasons::SCHEDULE_INVALID,
                "Reconcile",
                Some(e.to_string()),
            )
            .await;
    }

    ctx.scheduler.reschedule(&entity);

    if entity.has_schedule() {
        Ok(Action::requeue(Duration::from_secs(HEARTBEAT_SECS)))
    } else {
        Ok(Action::await_change())
    }
}

/// Error policy for the PVC controller
pub fn error_policy(
    pvc: Arc<PersistentVolumeClaim>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    warn!(
        namespace = %pvc.namespace().unwrap_or_default(),
        pvc = %pvc.name_any(),
        error = %error,
        "PVC reconciliation error, will retry"
    );
    Action::requeue(Duration::from_secs(HEARTBEAT_SECS))
}

fn claim_ref(pvc: &PersistentVolumeClaim, identity: &VolumeIdentity) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("PersistentVolumeClaim".to_string()),
        namespace: Some(identity.namespace.clone()),
        name: Some(identity.name.clone()),
        uid: pvc.metadata.uid.clone(),
        ..Default::default()
    }
}
