//! Common types for snapcycle: errors, identity, and annotation parsing

#![deny(missing_docs)]

pub mod duration;
pub mod error;
pub mod identity;

pub use error::Error;
pub use identity::VolumeIdentity;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Annotation holding the Go-style duration between snapshots of a PVC
pub const FREQUENCY_ANNOTATION: &str = "snapcycle.dev/snapshot-frequency";

/// Annotation holding the Go-style duration a snapshot is retained for
pub const RETENTION_ANNOTATION: &str = "snapcycle.dev/snapshot-retention";

/// Annotation requesting that a new PVC be restored from a snapshot
pub const RESTORE_ANNOTATION: &str = "snapcycle.dev/restore-from";

/// API group of the external VolumeSnapshot CRD
pub const SNAPSHOT_API_GROUP: &str = "snapshot.storage.k8s.io";

/// Kind of the external snapshot resource
pub const SNAPSHOT_KIND: &str = "VolumeSnapshot";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "snapcycle-operator";

/// Default port for the admission webhook listener
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;

/// HTTP path the PVC mutating webhook is served on
pub const MUTATE_PATH: &str = "/mutate-pvc";
