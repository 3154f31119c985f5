//! VolumeSnapshot external CRD binding (snapshot.storage.k8s.io/v1)
//!
//! The snapshot CRD is owned by the external CSI snapshotter; this is a
//! typed binding for the fields snapcycle reads and writes. The operator
//! never installs this CRD.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use snapcycle_common::VolumeIdentity;

/// Spec of a VolumeSnapshot.
///
/// Only the source reference is interesting to snapcycle; the class name
/// is carried so snapshots created here round-trip cleanly.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshot",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    /// What the snapshot was (or is to be) taken from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<VolumeSnapshotSource>,

    /// Snapshot class to provision with; cluster default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

/// Source of a VolumeSnapshot - exactly one field is set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSource {
    /// Name of the PVC the snapshot is taken from (same namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_name: Option<String>,

    /// Pre-provisioned snapshot content (not created by snapcycle)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_content_name: Option<String>,
}

impl VolumeSnapshot {
    /// Build a snapshot object for a scheduled backup of the given volume
    pub fn for_volume(name: &str, identity: &VolumeIdentity) -> Self {
        let mut snapshot = VolumeSnapshot::new(
            name,
            VolumeSnapshotSpec {
                source: Some(VolumeSnapshotSource {
                    persistent_volume_claim_name: Some(identity.name.clone()),
                    volume_snapshot_content_name: None,
                }),
                volume_snapshot_class_name: None,
            },
        );
        snapshot.metadata.namespace = Some(identity.namespace.clone());
        snapshot
    }

    /// Name of the PVC this snapshot was taken from, if it has one
    pub fn source_volume(&self) -> Option<&str> {
        self.spec
            .source
            .as_ref()
            .and_then(|s| s.persistent_volume_claim_name.as_deref())
    }

    /// Server-assigned creation time
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.metadata.creation_timestamp.as_ref().map(|t| t.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    #[test]
    fn test_for_volume_tags_source_and_namespace() {
        let identity = VolumeIdentity::new("default", "data");
        let snapshot = VolumeSnapshot::for_volume("data-abc123", &identity);

        assert_eq!(snapshot.metadata.name.as_deref(), Some("data-abc123"));
        assert_eq!(snapshot.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(snapshot.source_volume(), Some("data"));
    }

    #[test]
    fn test_source_volume_absent_for_content_backed_snapshots() {
        let mut snapshot = VolumeSnapshot::new("imported", VolumeSnapshotSpec::default());
        snapshot.spec.source = Some(VolumeSnapshotSource {
            persistent_volume_claim_name: None,
            volume_snapshot_content_name: Some("content-1".to_string()),
        });

        assert_eq!(snapshot.source_volume(), None);
    }

    #[test]
    fn test_created_at_reads_metadata_timestamp() {
        let identity = VolumeIdentity::new("default", "data");
        let mut snapshot = VolumeSnapshot::for_volume("data-abc123", &identity);
        assert_eq!(snapshot.created_at(), None);

        let now = Utc::now();
        snapshot.metadata.creation_timestamp = Some(Time(now));
        assert_eq!(snapshot.created_at(), Some(now));
    }

    #[test]
    fn test_serializes_with_camel_case_fields() {
        let identity = VolumeIdentity::new("default", "data");
        let snapshot = VolumeSnapshot::for_volume("data-abc123", &identity);
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["apiVersion"], "snapshot.storage.k8s.io/v1");
        assert_eq!(json["kind"], "VolumeSnapshot");
        assert_eq!(
            json["spec"]["source"]["persistentVolumeClaimName"],
            "data"
        );
    }
}
