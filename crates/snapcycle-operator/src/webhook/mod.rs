//! Admission webhook surface
//!
//! The transport (TLS termination, HTTPS service wiring) is external; this
//! module only owns the mutation handlers and their shared state.

pub mod pvc;

use std::sync::Arc;

use axum::routing::post;
use axum::Router;

use snapcycle_common::MUTATE_PATH;

use crate::registry::BackupRegistry;
use crate::scheduler::Scheduler;

/// How the restore annotation on an incoming PVC is interpreted.
///
/// Chosen once at composition time; there is no per-request dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum RestoreMode {
    /// The annotation value names the snapshot directly, either as a bare
    /// name or a `group/kind/name` triple
    Static,
    /// The annotation requests the most recent snapshot known for the
    /// claim's identity
    Latest,
}

/// Shared state for the admission handlers.
pub struct WebhookState {
    /// Active restore mode
    pub mode: RestoreMode,
    /// Volume identity -> schedule entity map
    pub registry: Arc<BackupRegistry>,
    /// Engine used for the authoritative latest-snapshot lookup
    pub scheduler: Arc<Scheduler>,
}

/// Build the webhook router
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(MUTATE_PATH, post(pvc::mutate_handler))
        .with_state(state)
}
