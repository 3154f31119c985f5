//! snapcycle operator - periodic VolumeSnapshots for annotated PVCs
//!
//! The operator watches PersistentVolumeClaims and VolumeSnapshots,
//! derives a per-volume backup schedule from PVC annotations, fires
//! snapshot creation on per-volume timers, expires snapshots past their
//! retention window, and mutates incoming PVCs through an admission
//! webhook to restore from an existing snapshot.

pub mod controller;
pub mod crd;
pub mod events;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod webhook;
