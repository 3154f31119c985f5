//! Scheduling engine: timers, backup execution, retention
//!
//! One timer is armed per volume, always by cancel-then-arm so at most one
//! backup is pending per entity. The timer task re-checks that a backup is
//! still due before acting, which keeps a stale timer from producing a
//! spurious snapshot after the schedule changed underneath it. Failures
//! are never retried here; the next watch-driven reconcile or the 60s
//! heartbeat is the retry mechanism.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use snapcycle_common::{Error, VolumeIdentity};

use crate::crd::VolumeSnapshot;
use crate::events::{reasons, EventPublisher};
use crate::registry::{PendingTimer, ScheduleEntity};
use crate::store::SnapshotStore;

/// When the next backup of a volume fires
pub(crate) fn next_fire_at(reference: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    reference + interval
}

/// Whether a backup is due at `now`
pub(crate) fn snapshot_due(reference: DateTime<Utc>, interval: Duration, now: DateTime<Utc>) -> bool {
    next_fire_at(reference, interval) <= now
}

/// Whether a snapshot created at `created` has outlived `retention`
pub(crate) fn expired(created: DateTime<Utc>, retention: Duration, now: DateTime<Utc>) -> bool {
    created + retention <= now
}

fn volume_ref(identity: &VolumeIdentity) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("PersistentVolumeClaim".to_string()),
        namespace: Some(identity.namespace.clone()),
        name: Some(identity.name.clone()),
        ..Default::default()
    }
}

/// The scheduling engine. Operates on registry entities and talks to the
/// cluster only through the [`SnapshotStore`] seam. Cheap to clone; timer
/// tasks carry their own handle.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn SnapshotStore>,
    events: Arc<dyn EventPublisher>,
}

impl Scheduler {
    /// Create an engine over the given store and event sink
    pub fn new(store: Arc<dyn SnapshotStore>, events: Arc<dyn EventPublisher>) -> Self {
        Self { store, events }
    }

    /// (Re)arm the backup timer for an entity.
    ///
    /// No-op while the volume has no interval or no reference time yet.
    /// Otherwise cancels any pending timer and arms a new one for
    /// `reference + interval`; a fire time already in the past fires
    /// immediately rather than being skipped.
    pub fn reschedule(&self, entity: &Arc<ScheduleEntity>) {
        let mut st = entity.state();
        let Some(interval) = st.interval else {
            return;
        };
        let Some(reference) = st.reference() else {
            debug!(volume = %entity.identity(), "no reference time yet, not arming");
            return;
        };

        if let Some(previous) = st.pending.take() {
            previous.handle.abort();
        }
        st.timer_epoch += 1;
        let epoch = st.timer_epoch;

        let fire_at = next_fire_at(reference, interval);
        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(volume = %entity.identity(), fire_in = ?delay, "arming backup timer");

        let scheduler = self.clone();
        let target = Arc::clone(entity);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                // Claim the timer slot. Once `pending` is cleared under the
                // lock, a concurrent reschedule can no longer abort this
                // task mid-backup; it will arm the next cycle instead.
                let mut st = target.state();
                if st.timer_epoch != epoch {
                    return;
                }
                st.pending = None;
            }
            if let Err(e) = scheduler.backup(&target).await {
                warn!(
                    volume = %target.identity(),
                    error = %e,
                    "scheduled backup failed; next reconcile retries"
                );
            }
        });
        st.pending = Some(PendingTimer { epoch, handle });
    }

    /// Take a backup of the entity's volume if one is still due.
    ///
    /// The due re-check guards against a stale timer firing after the
    /// schedule already moved. On creation success the retention pass runs
    /// immediately; any failure aborts the cycle without retry.
    pub async fn backup(&self, entity: &Arc<ScheduleEntity>) -> Result<(), Error> {
        let due = {
            let st = entity.state();
            match (st.reference(), st.interval) {
                (Some(reference), Some(interval)) => snapshot_due(reference, interval, Utc::now()),
                _ => false,
            }
        };
        if !due {
            debug!(volume = %entity.identity(), "backup no longer due, skipping");
            return Ok(());
        }

        let identity = entity.identity();
        info!(volume = %identity, "time for a backup");

        let name = format!("{}-{}", identity.name, Uuid::new_v4());
        let snapshot = VolumeSnapshot::for_volume(&name, identity);
        self.store.create_snapshot(&snapshot).await?;

        self.events
            .publish(
                &volume_ref(identity),
                EventType::Normal,
                reasons::SNAPSHOT_CREATED,
                "Backup",
                Some(format!("Created snapshot {}", name)),
            )
            .await;

        self.garbage_collect(entity).await
    }

    /// Delete this volume's snapshots that have outlived the retention
    /// window. No-op while the volume has no retention configured.
    ///
    /// The store list is namespace-scoped, so the pass filters to
    /// snapshots sourced from this volume before applying the age test -
    /// a sibling volume's snapshots are never this entity's to expire.
    pub async fn garbage_collect(&self, entity: &Arc<ScheduleEntity>) -> Result<(), Error> {
        let Some(retention) = entity.state().retention else {
            return Ok(());
        };

        let identity = entity.identity();
        let now = Utc::now();
        let snapshots = self.store.list_snapshots(&identity.namespace).await?;

        for snapshot in &snapshots {
            if snapshot.source_volume() != Some(identity.name.as_str()) {
                continue;
            }
            let Some(created) = snapshot.created_at() else {
                continue;
            };
            if !expired(created, retention, now) {
                continue;
            }

            let name = snapshot.name_any();
            debug!(volume = %identity, snapshot = %name, "snapshot past retention, deleting");
            self.store.delete_snapshot(&identity.namespace, &name).await?;

            self.events
                .publish(
                    &volume_ref(identity),
                    EventType::Normal,
                    reasons::SNAPSHOT_EXPIRED,
                    "GarbageCollect",
                    Some(format!("Deleted expired snapshot {}", name)),
                )
                .await;
        }

        Ok(())
    }

    /// The authoritative most-recent snapshot for a volume.
    ///
    /// Recomputed from a store listing so it survives operator restarts;
    /// the in-memory pointer on the entity is only a cache of this. Ties
    /// keep the first-listed snapshot, consistent with the cached merge.
    pub async fn latest_snapshot(
        &self,
        identity: &VolumeIdentity,
    ) -> Result<Option<(String, DateTime<Utc>)>, Error> {
        let snapshots = self.store.list_snapshots(&identity.namespace).await?;

        let mut latest: Option<(String, DateTime<Utc>)> = None;
        for snapshot in snapshots {
            if snapshot.source_volume() != Some(identity.name.as_str()) {
                continue;
            }
            let Some(created) = snapshot.created_at() else {
                continue;
            };
            let newer = latest.as_ref().map(|(_, at)| created > *at).unwrap_or(true);
            if newer {
                latest = Some((snapshot.name_any(), created));
            }
        }
        Ok(latest)
    }
}
