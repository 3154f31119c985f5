//! PVC mutation webhook
//!
//! Handles AdmissionReview requests for PersistentVolumeClaim creation and
//! patches a snapshot data source onto claims carrying the restore
//! annotation. The handler is a pure transform of (request, registry
//! state) into a JSON Patch; the incoming object is never modified.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, TypedLocalObjectReference};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::{debug, error, info};

use snapcycle_common::{VolumeIdentity, RESTORE_ANNOTATION, SNAPSHOT_API_GROUP, SNAPSHOT_KIND};

use super::{RestoreMode, WebhookState};

/// Handle a mutating admission review for PVCs.
///
/// A body that is not valid JSON for an AdmissionReview is rejected by the
/// extractor with a client error before this handler runs; together with
/// the Fail failure policy that makes malformed requests block the create.
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<PersistentVolumeClaim>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<PersistentVolumeClaim> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            let err = snapcycle_common::Error::invalid_review(e.to_string());
            error!(error = %err, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = mutate_pvc(&state, &request).await;
    Json(response.into_review())
}

/// Process a single PVC mutation request
async fn mutate_pvc(
    state: &WebhookState,
    request: &AdmissionRequest<PersistentVolumeClaim>,
) -> AdmissionResponse {
    let uid = request.uid.clone();

    let Some(pvc) = &request.object else {
        debug!(uid = %uid, "No PVC object in request, allowing unchanged");
        return AdmissionResponse::from(request);
    };

    let annotation = pvc
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(RESTORE_ANNOTATION))
        .map(String::as_str)
        .filter(|v| !v.is_empty());
    let Some(value) = annotation else {
        debug!(uid = %uid, pvc = ?pvc.metadata.name, "No restore annotation, allowing unchanged");
        return AdmissionResponse::from(request);
    };

    let identity = claim_identity(request, pvc);

    let data_source = match state.mode {
        RestoreMode::Static => Some(static_data_source(value)),
        RestoreMode::Latest => {
            let entity = state.registry.get_or_create(&identity);
            match state.scheduler.latest_snapshot(&identity).await {
                Ok(Some((name, at))) => {
                    // Seed the in-memory cache so the reference time is
                    // warm even if the snapshot watch lags
                    entity.observe_snapshot(at, &name);
                    Some(snapshot_data_source(&name))
                }
                Ok(None) => {
                    info!(uid = %uid, volume = %identity, "no snapshot recorded yet, not restoring");
                    None
                }
                Err(e) => {
                    // A read failure must not block PVC creation
                    error!(uid = %uid, volume = %identity, error = %e, "latest-snapshot lookup failed, allowing unchanged");
                    None
                }
            }
        }
    };

    let Some(data_source) = data_source else {
        return AdmissionResponse::from(request);
    };

    info!(
        uid = %uid,
        volume = %identity,
        snapshot = %data_source.name,
        "Restoring PVC from snapshot"
    );

    let patch = json_patch::Patch(build_patch_operations(&data_source));
    match AdmissionResponse::from(request).with_patch(patch) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to serialize patch");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
        }
    }
}

/// Identity of the claim being admitted.
///
/// On CREATE the object may not carry a namespace yet; fall back to the
/// request envelope.
fn claim_identity(
    request: &AdmissionRequest<PersistentVolumeClaim>,
    pvc: &PersistentVolumeClaim,
) -> VolumeIdentity {
    let namespace = pvc
        .metadata
        .namespace
        .clone()
        .or_else(|| request.namespace.clone())
        .unwrap_or_default();
    let name = pvc
        .metadata
        .name
        .clone()
        .unwrap_or_else(|| request.name.clone());
    VolumeIdentity::new(namespace, name)
}

/// Data source for a snapshot named directly by the annotation.
///
/// A three-part `group/kind/name` value selects an arbitrary provider;
/// anything else is taken as a VolumeSnapshot name.
fn static_data_source(value: &str) -> TypedLocalObjectReference {
    let parts: Vec<&str> = value.split('/').collect();
    if parts.len() == 3 {
        TypedLocalObjectReference {
            api_group: Some(parts[0].to_string()).filter(|g| !g.is_empty()),
            kind: parts[1].to_string(),
            name: parts[2].to_string(),
        }
    } else {
        snapshot_data_source(value)
    }
}

fn snapshot_data_source(name: &str) -> TypedLocalObjectReference {
    TypedLocalObjectReference {
        api_group: Some(SNAPSHOT_API_GROUP.to_string()),
        kind: SNAPSHOT_KIND.to_string(),
        name: name.to_string(),
    }
}

/// Build the JSON Patch setting the claim's data source
fn build_patch_operations(
    data_source: &TypedLocalObjectReference,
) -> Vec<json_patch::PatchOperation> {
    use json_patch::{AddOperation, PatchOperation};
    use jsonptr::PointerBuf;

    vec![PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(["spec", "dataSource"]),
        value: serde_json::to_value(data_source).unwrap_or_default(),
    })]
}
