//! Reconciliation dispatch: binds watched kinds to their reconcilers
//!
//! Each `build_*` function returns boxed controller futures the caller
//! composes. Delivery is level-triggered and at-least-once; both
//! reconcilers are idempotent under repeated delivery of the same state.
//! Objects deleted between trigger and reconcile are dropped by the
//! runtime's store lookup and surface only in the result log.

pub mod pvc;
pub mod snapshot;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use crate::crd::VolumeSnapshot;
use crate::events::EventPublisher;
use crate::registry::BackupRegistry;
use crate::scheduler::Scheduler;

/// Watcher timeout (seconds) - must be less than the client read timeout
/// so the API server closes idle watches before the client times out.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Fixed follow-up reconcile for scheduled volumes; bounds staleness when
/// watch events are missed.
pub(crate) const HEARTBEAT_SECS: u64 = 60;

/// Shared state for both reconcilers.
pub struct Context {
    /// Volume identity -> schedule entity map
    pub registry: Arc<BackupRegistry>,
    /// The scheduling engine
    pub scheduler: Arc<Scheduler>,
    /// Event sink for user-visible reconcile outcomes
    pub events: Arc<dyn EventPublisher>,
}

impl Context {
    /// Create a dispatch context
    pub fn new(
        registry: Arc<BackupRegistry>,
        scheduler: Arc<Scheduler>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            registry,
            scheduler,
            events,
        }
    }
}

/// Build the PVC and snapshot controller futures
pub fn build_backup_controllers(
    client: Client,
    ctx: Arc<Context>,
) -> Vec<Pin<Box<dyn Future<Output = ()> + Send>>> {
    let pvcs: Api<PersistentVolumeClaim> = Api::all(client.clone());
    let snapshots: Api<VolumeSnapshot> = Api::all(client);

    tracing::info!("- PersistentVolumeClaim controller");
    tracing::info!("- VolumeSnapshot controller");

    let pvc_ctrl = Controller::new(
        pvcs,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(pvc::reconcile, pvc::error_policy, ctx.clone())
    .for_each(log_reconcile_result("Pvc"));

    let snapshot_ctrl = Controller::new(
        snapshots,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(snapshot::reconcile, snapshot::error_policy, ctx)
    .for_each(log_reconcile_result("Snapshot"));

    vec![Box::pin(pvc_ctrl), Box::pin(snapshot_ctrl)]
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => {
                tracing::debug!(?action, "{} reconciliation completed", controller_name)
            }
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
