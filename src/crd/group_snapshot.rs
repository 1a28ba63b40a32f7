//! VolumeGroupSnapshot Custom Resource Definition
//!
//! A VolumeGroupSnapshot is the user-facing request for a crash-consistent
//! snapshot taken across a labeled group of PersistentVolumeClaims, or a
//! claim on a pre-provisioned VolumeGroupSnapshotContent.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{PvcVolumeSnapshotPair, SnapshotError};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "groupsnapshot.storage.k8s.io",
    version = "v1beta1",
    kind = "VolumeGroupSnapshot",
    namespaced,
    status = "VolumeGroupSnapshotStatus",
    shortname = "vgs",
    printcolumn = r#"{"name":"ReadyToUse","type":"boolean","jsonPath":".status.readyToUse"}"#,
    printcolumn = r#"{"name":"BoundContent","type":"string","jsonPath":".status.boundVolumeGroupSnapshotContentName"}"#,
    printcolumn = r#"{"name":"CreationTime","type":"string","jsonPath":".status.creationTime"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupSnapshotSpec {
    /// Where the group snapshot comes from; exactly one member must be set
    pub source: VolumeGroupSnapshotSource,

    /// Name of the VolumeGroupSnapshotClass used for dynamic provisioning.
    /// Defaulted by the controller when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_group_snapshot_class_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupSnapshotSource {
    /// Labels selecting the claims to snapshot together (dynamic provisioning)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<BTreeMap<String, String>>,

    /// Name of a pre-provisioned VolumeGroupSnapshotContent to claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_group_snapshot_content_name: Option<String>,
}

impl VolumeGroupSnapshotSpec {
    /// Exactly one of `selector` and `volumeGroupSnapshotContentName` must
    /// be set.
    pub fn validate(&self) -> Result<(), String> {
        match (
            &self.source.selector,
            &self.source.volume_group_snapshot_content_name,
        ) {
            (Some(_), Some(_)) => Err(
                "source.selector and source.volumeGroupSnapshotContentName are mutually exclusive"
                    .to_string(),
            ),
            (None, None) => Err(
                "one of source.selector or source.volumeGroupSnapshotContentName is required"
                    .to_string(),
            ),
            _ => Ok(()),
        }
    }

    /// True when this request claims an existing content instead of asking
    /// for a new one.
    pub fn is_pre_provisioned(&self) -> bool {
        self.source.volume_group_snapshot_content_name.is_some()
    }
}

/// Status subresource for VolumeGroupSnapshot
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupSnapshotStatus {
    /// Name of the bound VolumeGroupSnapshotContent. One half of the
    /// bi-directional binding; the other half is the content's back-ref.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_volume_group_snapshot_content_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_to_use: Option<bool>,

    /// When the backend cut the group snapshot. Never cleared once set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SnapshotError>,

    /// One entry per member volume, pairing the claim with the individual
    /// snapshot fanned out for it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pvc_volume_snapshot_ref_list: Vec<PvcVolumeSnapshotPair>,
}

impl VolumeGroupSnapshot {
    /// `namespace/name`, the form used in queues, logs and error messages.
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.namespace.as_deref().unwrap_or_default(),
            self.metadata.name.as_deref().unwrap_or_default()
        )
    }

    pub fn uid(&self) -> &str {
        self.metadata.uid.as_deref().unwrap_or_default()
    }

    pub fn bound_content_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.bound_volume_group_snapshot_content_name.as_deref())
    }

    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.ready_to_use)
            .unwrap_or(false)
    }
}
