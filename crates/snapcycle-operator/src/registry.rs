//! Backup registry: per-volume schedule entities
//!
//! One [`ScheduleEntity`] exists per observed volume and lives for the
//! process lifetime. All mutable fields sit behind a per-entity mutex so
//! the PVC reconciler, the snapshot reconciler, the entity's own timer
//! task and the admission webhook can race safely. The registry map itself
//! is guarded by a separate lock held only for lookup/insert.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use tokio::task::JoinHandle;
use tracing::debug;

use snapcycle_common::{
    duration, Result, VolumeIdentity, FREQUENCY_ANNOTATION, RETENTION_ANNOTATION,
};

/// An armed backup timer. The epoch ties the spawned task to the arming
/// call that created it; a task whose epoch no longer matches has been
/// superseded and must not fire.
pub(crate) struct PendingTimer {
    pub(crate) epoch: u64,
    pub(crate) handle: JoinHandle<()>,
}

/// Mutable schedule state for one volume, guarded by the entity mutex.
#[derive(Default)]
pub struct ScheduleState {
    /// Creation time of the volume object, set on first observation
    pub volume_created_at: Option<DateTime<Utc>>,
    /// Timestamp of the most recent snapshot observed for this volume
    pub latest_snapshot_at: Option<DateTime<Utc>>,
    /// Name of the most recent snapshot observed for this volume
    pub latest_snapshot_id: Option<String>,
    /// Time between snapshots; unset means no scheduled backups
    pub interval: Option<Duration>,
    /// Maximum snapshot age; unset means never garbage-collect
    pub retention: Option<Duration>,
    pub(crate) pending: Option<PendingTimer>,
    pub(crate) timer_epoch: u64,
}

impl ScheduleState {
    /// The reference time the next backup is computed from: the latest
    /// snapshot if one is known, the volume creation time otherwise.
    pub fn reference(&self) -> Option<DateTime<Utc>> {
        self.latest_snapshot_at.or(self.volume_created_at)
    }
}

/// Per-volume schedule: creation time, latest snapshot, interval,
/// retention, and the armed timer.
pub struct ScheduleEntity {
    identity: VolumeIdentity,
    state: Mutex<ScheduleState>,
}

impl ScheduleEntity {
    /// Create an empty entity for a volume (no interval, no retention)
    pub fn new(identity: VolumeIdentity) -> Self {
        Self {
            identity,
            state: Mutex::new(ScheduleState::default()),
        }
    }

    /// The volume this entity schedules backups for
    pub fn identity(&self) -> &VolumeIdentity {
        &self.identity
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ScheduleState> {
        // A panic while holding the lock leaves plain data; the poison
        // marker carries no information we need.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ingest the current PVC object: record its creation time and parse
    /// the schedule annotations.
    ///
    /// Idempotent under repeated delivery of the same object. A malformed
    /// annotation leaves that field at its prior value and returns the
    /// parse error; an absent (or empty) annotation also leaves the prior
    /// value - once scheduling is enabled it is not disabled by removing
    /// the annotation.
    pub fn observe_volume(&self, pvc: &PersistentVolumeClaim) -> Result<()> {
        let created = pvc.metadata.creation_timestamp.as_ref().map(|t| t.0);
        let annotations = pvc.metadata.annotations.as_ref();
        let lookup = |key: &str| {
            annotations
                .and_then(|a| a.get(key))
                .map(String::as_str)
                .filter(|v| !v.trim().is_empty())
        };

        let interval = lookup(FREQUENCY_ANNOTATION)
            .map(|v| duration::parse_annotation(FREQUENCY_ANNOTATION, v));
        let retention = lookup(RETENTION_ANNOTATION)
            .map(|v| duration::parse_annotation(RETENTION_ANNOTATION, v));

        let mut st = self.state();
        if let Some(t) = created {
            st.volume_created_at = Some(t);
        }

        let mut first_err = None;
        match interval {
            Some(Ok(d)) => st.interval = Some(d),
            Some(Err(e)) => first_err = Some(e),
            None => {}
        }
        match retention {
            Some(Ok(d)) => st.retention = Some(d),
            Some(Err(e)) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
            None => {}
        }
        drop(st);

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Merge a snapshot observation into the "latest" pointer.
    ///
    /// Monotonic and duplicate-safe: only a strictly newer timestamp
    /// advances the pointer, so ties are first-observed-wins and delivery
    /// order does not matter. Returns whether the pointer moved.
    pub fn observe_snapshot(&self, at: DateTime<Utc>, id: &str) -> bool {
        let mut st = self.state();
        match st.latest_snapshot_at {
            Some(current) if at <= current => false,
            _ => {
                st.latest_snapshot_at = Some(at);
                st.latest_snapshot_id = Some(id.to_string());
                true
            }
        }
    }

    /// Whether this volume has scheduled backups
    pub fn has_schedule(&self) -> bool {
        self.state().interval.is_some()
    }
}

/// Process-wide map from volume identity to its schedule entity.
///
/// Entries are created lazily and never evicted; cardinality is bounded by
/// the live volume count.
#[derive(Default)]
pub struct BackupRegistry {
    entries: Mutex<HashMap<VolumeIdentity, Arc<ScheduleEntity>>>,
}

impl BackupRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared entity for a volume, inserting an empty one on
    /// first call. The map lock is held only for the lookup/insert, never
    /// for operations on the returned entity.
    pub fn get_or_create(&self, identity: &VolumeIdentity) -> Arc<ScheduleEntity> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(identity.clone())
            .or_insert_with(|| {
                debug!(volume = %identity, "tracking new volume");
                Arc::new(ScheduleEntity::new(identity.clone()))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn pvc_with(annotations: &[(&str, &str)]) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data".to_string()),
                namespace: Some("default".to_string()),
                creation_timestamp: Some(Time(ts(1_000))),
                annotations: if annotations.is_empty() {
                    None
                } else {
                    Some(
                        annotations
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect(),
                    )
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn entity() -> ScheduleEntity {
        ScheduleEntity::new(VolumeIdentity::new("default", "data"))
    }

    // =========================================================================
    // Monotonic merge
    // =========================================================================

    #[test]
    fn test_observe_snapshot_advances_on_newer() {
        let e = entity();
        assert!(e.observe_snapshot(ts(5), "snap-a"));
        assert!(e.observe_snapshot(ts(10), "snap-b"));

        let st = e.state();
        assert_eq!(st.latest_snapshot_at, Some(ts(10)));
        assert_eq!(st.latest_snapshot_id.as_deref(), Some("snap-b"));
    }

    /// Out-of-order delivery: (t=10, A) then (t=5, B) ends at (t=10, A)
    #[test]
    fn test_observe_snapshot_never_regresses() {
        let e = entity();
        assert!(e.observe_snapshot(ts(10), "snap-a"));
        assert!(!e.observe_snapshot(ts(5), "snap-b"));

        let st = e.state();
        assert_eq!(st.latest_snapshot_at, Some(ts(10)));
        assert_eq!(st.latest_snapshot_id.as_deref(), Some("snap-a"));
    }

    /// Ties are first-observed-wins: an equal timestamp does not replace
    /// the id already recorded.
    #[test]
    fn test_observe_snapshot_tie_keeps_first() {
        let e = entity();
        assert!(e.observe_snapshot(ts(10), "snap-a"));
        assert!(!e.observe_snapshot(ts(10), "snap-b"));

        let st = e.state();
        assert_eq!(st.latest_snapshot_id.as_deref(), Some("snap-a"));
    }

    /// The final state equals the maximum timestamp regardless of order.
    #[test]
    fn test_observe_snapshot_converges_in_any_order() {
        let observations = [(ts(3), "c"), (ts(9), "max"), (ts(1), "a"), (ts(9), "dup")];

        // A few representative delivery orders
        for order in [[0usize, 1, 2, 3], [3, 2, 1, 0], [1, 0, 3, 2]] {
            let e = entity();
            for idx in order {
                let (at, id) = observations[idx];
                e.observe_snapshot(at, id);
            }
            let st = e.state();
            assert_eq!(st.latest_snapshot_at, Some(ts(9)));
            // Whichever id arrived first with t=9 is retained
            let id = st.latest_snapshot_id.as_deref().unwrap();
            assert!(id == "max" || id == "dup");
        }
    }

    // =========================================================================
    // Volume observation
    // =========================================================================

    #[test]
    fn test_observe_volume_sets_schedule_from_annotations() {
        let e = entity();
        e.observe_volume(&pvc_with(&[
            (FREQUENCY_ANNOTATION, "1h"),
            (RETENTION_ANNOTATION, "24h"),
        ]))
        .unwrap();

        let st = e.state();
        assert_eq!(st.volume_created_at, Some(ts(1_000)));
        assert_eq!(st.interval, Some(Duration::from_secs(3600)));
        assert_eq!(st.retention, Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn test_observe_volume_is_idempotent() {
        let e = entity();
        let pvc = pvc_with(&[(FREQUENCY_ANNOTATION, "1h")]);
        e.observe_volume(&pvc).unwrap();
        e.observe_volume(&pvc).unwrap();

        let st = e.state();
        assert_eq!(st.volume_created_at, Some(ts(1_000)));
        assert_eq!(st.interval, Some(Duration::from_secs(3600)));
    }

    /// A malformed annotation aborts that field's update and leaves the
    /// prior value in place.
    #[test]
    fn test_observe_volume_malformed_interval_keeps_prior() {
        let e = entity();
        e.observe_volume(&pvc_with(&[(FREQUENCY_ANNOTATION, "1h")]))
            .unwrap();

        let err = e
            .observe_volume(&pvc_with(&[(FREQUENCY_ANNOTATION, "soon")]))
            .unwrap_err();
        assert!(!err.is_retryable());

        let st = e.state();
        assert_eq!(st.interval, Some(Duration::from_secs(3600)));
    }

    /// A malformed retention still applies a well-formed interval from the
    /// same object; the error is reported.
    #[test]
    fn test_observe_volume_fields_fail_independently() {
        let e = entity();
        let err = e
            .observe_volume(&pvc_with(&[
                (FREQUENCY_ANNOTATION, "30m"),
                (RETENTION_ANNOTATION, "yes please"),
            ]))
            .unwrap_err();
        assert!(err.to_string().contains(RETENTION_ANNOTATION));

        let st = e.state();
        assert_eq!(st.interval, Some(Duration::from_secs(1800)));
        assert_eq!(st.retention, None);
    }

    /// Removing (or emptying) the annotation does not clear a previously
    /// set schedule.
    #[test]
    fn test_observe_volume_absent_annotation_keeps_prior() {
        let e = entity();
        e.observe_volume(&pvc_with(&[
            (FREQUENCY_ANNOTATION, "1h"),
            (RETENTION_ANNOTATION, "24h"),
        ]))
        .unwrap();

        e.observe_volume(&pvc_with(&[])).unwrap();
        e.observe_volume(&pvc_with(&[(FREQUENCY_ANNOTATION, "")]))
            .unwrap();

        let st = e.state();
        assert_eq!(st.interval, Some(Duration::from_secs(3600)));
        assert_eq!(st.retention, Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn test_reference_prefers_latest_snapshot() {
        let e = entity();
        e.observe_volume(&pvc_with(&[])).unwrap();
        assert_eq!(e.state().reference(), Some(ts(1_000)));

        e.observe_snapshot(ts(2_000), "snap-a");
        assert_eq!(e.state().reference(), Some(ts(2_000)));
    }

    // =========================================================================
    // Registry
    // =========================================================================

    #[test]
    fn test_get_or_create_returns_shared_entity() {
        let registry = BackupRegistry::new();
        let id = VolumeIdentity::new("default", "data");

        let a = registry.get_or_create(&id);
        let b = registry.get_or_create(&id);
        assert!(Arc::ptr_eq(&a, &b));

        let other = registry.get_or_create(&VolumeIdentity::new("prod", "data"));
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[test]
    fn test_new_entity_is_unconfigured() {
        let registry = BackupRegistry::new();
        let e = registry.get_or_create(&VolumeIdentity::new("default", "data"));

        assert!(!e.has_schedule());
        let st = e.state();
        assert_eq!(st.volume_created_at, None);
        assert_eq!(st.latest_snapshot_at, None);
        assert!(st.pending.is_none());
    }
}
