//! Types shared between the group snapshot CRDs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What happens to the backend snapshot when its content object goes away.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Cascade the delete to the storage backend.
    Delete,
    /// Keep the backend snapshot; only the declarative object is removed.
    Retain,
}

impl Default for DeletionPolicy {
    fn default() -> Self {
        DeletionPolicy::Delete
    }
}

/// A weak reference to another object: names plus UID, never a pointer.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypedObjectRef {
    pub name: String,
    pub namespace: String,
    /// Set once the reference is bound; empty on a pre-provisioned object
    /// that has not been claimed yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Terminal or transient failure surfaced to the user through status.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotError {
    /// RFC 3339 timestamp of when the error was observed. Two errors with
    /// the same time are considered the same observation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One member result in a group snapshot content status, filled in by the
/// CSI sidecar after the group snapshot has been cut.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotInfo {
    /// CSI volume handle of the member volume.
    pub volume_handle: String,
    /// Backend handle of the member snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    /// Minimum volume size required to restore this member, e.g. "1Gi".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_to_use: Option<bool>,
}

/// Pairing of a claim with the member snapshot taken from it, surfaced on
/// the group snapshot request status.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PvcVolumeSnapshotPair {
    /// Name of the PersistentVolumeClaim; empty when the member volume could
    /// not be resolved to a claim.
    pub persistent_volume_claim_ref: String,
    /// Name of the member VolumeSnapshot.
    pub volume_snapshot_ref: String,
}
