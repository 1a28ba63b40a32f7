//! VolumeGroupSnapshotContent Custom Resource Definition
//!
//! The cluster-scoped, backend-facing twin of a VolumeGroupSnapshot. The
//! controller creates one per dynamic request; admins create them by hand
//! for pre-provisioned group snapshots. The CSI sidecar fills in the status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{DeletionPolicy, SnapshotError, TypedObjectRef, VolumeSnapshotInfo};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "groupsnapshot.storage.k8s.io",
    version = "v1beta1",
    kind = "VolumeGroupSnapshotContent",
    status = "VolumeGroupSnapshotContentStatus",
    shortname = "vgsc",
    printcolumn = r#"{"name":"ReadyToUse","type":"boolean","jsonPath":".status.readyToUse"}"#,
    printcolumn = r#"{"name":"Driver","type":"string","jsonPath":".spec.driver"}"#,
    printcolumn = r#"{"name":"DeletionPolicy","type":"string","jsonPath":".spec.deletionPolicy"}"#,
    printcolumn = r#"{"name":"VolumeGroupSnapshot","type":"string","jsonPath":".spec.volumeGroupSnapshotRef.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupSnapshotContentSpec {
    /// Name of the CSI driver that owns the member volumes
    pub driver: String,

    pub deletion_policy: DeletionPolicy,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_group_snapshot_class_name: Option<String>,

    /// Back-reference to the owning VolumeGroupSnapshot. A dynamically
    /// provisioned content always carries the UID; a pre-provisioned one may
    /// leave it empty until bound.
    pub volume_group_snapshot_ref: TypedObjectRef,

    /// Exactly one member must be set: `volumeHandles` for dynamic
    /// provisioning, `groupSnapshotHandle` for pre-provisioned contents.
    pub source: VolumeGroupSnapshotContentSource,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupSnapshotContentSource {
    /// CSI handles of the member volumes to snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_handles: Option<Vec<String>>,

    /// Backend handle of an existing group snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_snapshot_handle: Option<String>,
}

impl VolumeGroupSnapshotContentSpec {
    /// Exactly one of `volumeHandles` and `groupSnapshotHandle` must be set.
    pub fn validate(&self) -> Result<(), String> {
        match (
            &self.source.volume_handles,
            &self.source.group_snapshot_handle,
        ) {
            (Some(_), Some(_)) => Err(
                "source.volumeHandles and source.groupSnapshotHandle are mutually exclusive"
                    .to_string(),
            ),
            (None, None) => Err(
                "one of source.volumeHandles or source.groupSnapshotHandle is required".to_string(),
            ),
            _ => Ok(()),
        }
    }

    /// Dynamic contents are provisioned from volume handles; pre-provisioned
    /// ones import an existing backend group handle.
    pub fn is_dynamic(&self) -> bool {
        self.source.volume_handles.is_some()
    }
}

/// Status subresource, written by the CSI sidecar and the fan-out engine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupSnapshotContentStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_to_use: Option<bool>,

    /// Backend handle of the cut group snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_group_snapshot_handle: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SnapshotError>,

    /// Per-member results; its length dictates how many individual snapshot
    /// pairs fan-out produces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_snapshot_info_list: Vec<VolumeSnapshotInfo>,
}

impl VolumeGroupSnapshotContent {
    pub fn key(&self) -> String {
        self.metadata.name.clone().unwrap_or_default()
    }

    pub fn group_snapshot_handle(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.volume_group_snapshot_handle.as_deref())
    }

    /// UID recorded in the back-reference, if the content is bound.
    pub fn bound_uid(&self) -> Option<&str> {
        self.spec
            .volume_group_snapshot_ref
            .uid
            .as_deref()
            .filter(|uid| !uid.is_empty())
    }
}
