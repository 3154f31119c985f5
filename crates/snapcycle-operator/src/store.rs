//! Object-store seam for VolumeSnapshots
//!
//! The scheduling engine talks to the cluster through this trait so tests
//! can mock the store. Only the engine's needs are surfaced: create, a
//! namespace-scoped list, and delete.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use snapcycle_common::Error;

use crate::crd::VolumeSnapshot;

/// Snapshot operations against the external object store.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Request creation of a new snapshot object
    async fn create_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<(), Error>;

    /// List all snapshots in a namespace
    async fn list_snapshots(&self, namespace: &str) -> Result<Vec<VolumeSnapshot>, Error>;

    /// Delete a snapshot; deleting one that is already gone is not an error
    async fn delete_snapshot(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Production implementation over the Kubernetes API.
pub struct KubeSnapshotStore {
    client: Client,
}

impl KubeSnapshotStore {
    /// Create a store backed by the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<VolumeSnapshot> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SnapshotStore for KubeSnapshotStore {
    async fn create_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<(), Error> {
        let namespace = snapshot.metadata.namespace.as_deref().ok_or_else(|| {
            Error::internal("store", "snapshot object is missing a namespace")
        })?;

        self.api(namespace)
            .create(&PostParams::default(), snapshot)
            .await?;
        Ok(())
    }

    async fn list_snapshots(&self, namespace: &str) -> Result<Vec<VolumeSnapshot>, Error> {
        let list = self
            .api(namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn delete_snapshot(&self, namespace: &str, name: &str) -> Result<(), Error> {
        match self
            .api(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(namespace, snapshot = name, "snapshot already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
