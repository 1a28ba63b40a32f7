//! Outbound API collaborator
//!
//! All writes and authoritative reads go through the [`ObjectClient`]
//! trait. Production wires the kube-backed implementation; tests use the
//! in-memory one. Conventions shared by both:
//!
//! - `get_*` returns `Ok(None)` for a missing object instead of an error,
//! - `create_*` returns the existing object when the name is already taken
//!   (AlreadyExists is how idempotent re-creation is expressed),
//! - `delete_*` treats a missing object as already deleted,
//! - `update_*_status` and `patch_*` surface version conflicts as
//!   [`Error::ConflictError`](crate::Error), which aborts the current pass
//!   and relies on the re-queue.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolume, PersistentVolumeClaim};

use crate::crd::{
    VolumeGroupSnapshot, VolumeGroupSnapshotClass, VolumeGroupSnapshotContent, VolumeSnapshot,
    VolumeSnapshotContent,
};
use crate::Result;

mod kube_client;

#[cfg(test)]
pub mod fake;

pub use kube_client::KubeObjectClient;

/// Event severity, mirroring the two Kubernetes event types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

#[async_trait]
pub trait ObjectClient: Send + Sync {
    // Group snapshot requests
    async fn get_group_snapshot(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeGroupSnapshot>>;
    async fn update_group_snapshot(
        &self,
        vgs: &VolumeGroupSnapshot,
    ) -> Result<VolumeGroupSnapshot>;
    async fn update_group_snapshot_status(
        &self,
        vgs: &VolumeGroupSnapshot,
    ) -> Result<VolumeGroupSnapshot>;
    async fn patch_group_snapshot(
        &self,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<VolumeGroupSnapshot>;

    // Group snapshot contents
    async fn get_group_snapshot_content(
        &self,
        name: &str,
    ) -> Result<Option<VolumeGroupSnapshotContent>>;
    async fn create_group_snapshot_content(
        &self,
        content: &VolumeGroupSnapshotContent,
    ) -> Result<VolumeGroupSnapshotContent>;
    async fn patch_group_snapshot_content(
        &self,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<VolumeGroupSnapshotContent>;
    async fn delete_group_snapshot_content(&self, name: &str) -> Result<()>;

    // Group snapshot classes
    async fn get_group_snapshot_class(&self, name: &str)
        -> Result<Option<VolumeGroupSnapshotClass>>;
    async fn list_group_snapshot_classes(&self) -> Result<Vec<VolumeGroupSnapshotClass>>;

    // Individual member snapshots
    async fn create_volume_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<VolumeSnapshot>;
    async fn update_volume_snapshot_status(
        &self,
        snapshot: &VolumeSnapshot,
    ) -> Result<VolumeSnapshot>;
    async fn patch_volume_snapshot(
        &self,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<VolumeSnapshot>;
    async fn delete_volume_snapshot(&self, namespace: &str, name: &str) -> Result<()>;

    // Individual member snapshot contents
    async fn get_volume_snapshot_content(&self, name: &str)
        -> Result<Option<VolumeSnapshotContent>>;
    async fn create_volume_snapshot_content(
        &self,
        content: &VolumeSnapshotContent,
    ) -> Result<VolumeSnapshotContent>;
    async fn update_volume_snapshot_content_status(
        &self,
        content: &VolumeSnapshotContent,
    ) -> Result<VolumeSnapshotContent>;
    async fn patch_volume_snapshot_content(
        &self,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<VolumeSnapshotContent>;

    // Read-only core/v1 lookups
    async fn list_persistent_volume_claims(
        &self,
        namespace: &str,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<PersistentVolumeClaim>>;
    async fn get_persistent_volume(&self, name: &str) -> Result<Option<PersistentVolume>>;

    /// Post a Kubernetes event about `involved`.
    async fn publish_event(
        &self,
        involved: ObjectReference,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<()>;
}

/// Render a `matchLabels` map as the API server's label selector string.
pub fn label_selector_string(match_labels: &BTreeMap<String, String>) -> String {
    match_labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
