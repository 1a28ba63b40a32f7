//! Fan-out of a ready group snapshot content into individual snapshot pairs
//!
//! Once the sidecar has filled in the content status (group handle plus one
//! info entry per member volume), each entry becomes a VolumeSnapshot /
//! VolumeSnapshotContent pair with deterministic, UID-derived names. Every
//! step tolerates re-running on partial progress: creates reuse existing
//! objects and the binding patches converge on the same values.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, instrument};

use crate::cache::{PvIndex, PvMatch};
use crate::client::ObjectClient;
use crate::controller::events::{
    DELETION_SECRET_NAMESPACE_ANNOTATION, DELETION_SECRET_NAME_ANNOTATION,
    GROUP_SNAPSHOT_HANDLE_ANNOTATION,
};
use crate::controller::finalizers::MEMBER_SNAPSHOT_FINALIZER;
use crate::controller::names;
use crate::crd::{
    TypedObjectRef, VolumeGroupSnapshot, VolumeGroupSnapshotContent, VolumeSnapshot,
    VolumeSnapshotContent, VolumeSnapshotContentSource, VolumeSnapshotContentSpec,
    VolumeSnapshotContentStatus, VolumeSnapshotInfo, VolumeSnapshotSource, VolumeSnapshotSpec,
    VolumeSnapshotStatus, GROUP_SNAPSHOT_NAME_LABEL,
};
use crate::{Error, Result};

/// A content is ready for fan-out once the sidecar has reported the group
/// handle and the per-member results.
pub fn ready_for_fanout(vgsc: &VolumeGroupSnapshotContent) -> bool {
    vgsc.status
        .as_ref()
        .map(|status| {
            status.volume_group_snapshot_handle.is_some()
                && !status.volume_snapshot_info_list.is_empty()
        })
        .unwrap_or(false)
}

/// Create, bind and seed the individual snapshot pair for every member of
/// `vgsc`. Members are independent; the first failure aborts the pass and
/// the parent stays un-ready until a later pass completes the remainder.
#[instrument(skip_all, fields(group_snapshot = %vgs.key(), content = %vgsc.name_any()))]
pub async fn fan_out(
    client: &dyn ObjectClient,
    pv_index: &PvIndex,
    vgs: &VolumeGroupSnapshot,
    vgsc: &VolumeGroupSnapshotContent,
) -> Result<()> {
    let key = vgs.key();
    let status = match vgsc.status.as_ref() {
        Some(status) if ready_for_fanout(vgsc) => status,
        _ => return Ok(()),
    };
    let group_handle = status
        .volume_group_snapshot_handle
        .clone()
        .unwrap_or_default();

    for info in &status.volume_snapshot_info_list {
        let claim_name = match pv_index.find(&vgsc.spec.driver, &info.volume_handle) {
            PvMatch::One(pv) => pv
                .spec
                .as_ref()
                .and_then(|s| s.claim_ref.as_ref())
                .and_then(|r| r.name.clone())
                .unwrap_or_default(),
            PvMatch::None => String::new(),
            PvMatch::Ambiguous(count) => {
                return Err(Error::validation(
                    &key,
                    format!(
                        "{} PVs found for volume handle {}, refusing to pick one",
                        count, info.volume_handle
                    ),
                ));
            }
        };
        create_member_pair(client, vgs, vgsc, info, &group_handle, &claim_name).await?;
    }

    Ok(())
}

async fn create_member_pair(
    client: &dyn ObjectClient,
    vgs: &VolumeGroupSnapshot,
    vgsc: &VolumeGroupSnapshotContent,
    info: &VolumeSnapshotInfo,
    group_handle: &str,
    claim_name: &str,
) -> Result<()> {
    let namespace = vgs.namespace().unwrap_or_default();
    let snapshot_name = names::member_snapshot_name(vgs.uid(), &info.volume_handle);
    let content_name = names::member_snapshot_content_name(vgs.uid(), &info.volume_handle);
    debug!(snapshot = %snapshot_name, handle = %info.volume_handle, "fanning out member");

    let content = member_content(vgsc, info, group_handle, &snapshot_name, &content_name, &namespace);
    let snapshot = member_snapshot(vgs, &snapshot_name, &namespace, claim_name);

    let content = client.create_volume_snapshot_content(&content).await?;
    let snapshot = client.create_volume_snapshot(&snapshot).await?;

    // Bind content -> snapshot through the UID the API server assigned.
    let uid_op = if content.spec.volume_snapshot_ref.uid.is_some() {
        "replace"
    } else {
        "add"
    };
    let bind = serde_json::from_value(json!([
        {
            "op": uid_op,
            "path": "/spec/volumeSnapshotRef/uid",
            "value": snapshot.metadata.uid.clone().unwrap_or_default(),
        }
    ]))?;
    client.patch_volume_snapshot_content(&content_name, bind).await?;

    // Bind snapshot -> content.
    let mut bound_snapshot = snapshot.clone();
    bound_snapshot.status = Some(VolumeSnapshotStatus {
        bound_volume_snapshot_content_name: Some(content_name.clone()),
        ..bound_snapshot.status.unwrap_or_default()
    });
    client.update_volume_snapshot_status(&bound_snapshot).await?;

    // Seed the member result the sidecar reported for this volume.
    let mut seeded_content = content.clone();
    seeded_content.status = Some(VolumeSnapshotContentStatus {
        snapshot_handle: info.snapshot_handle.clone(),
        volume_group_snapshot_handle: Some(group_handle.to_string()),
        creation_time: info.creation_time.clone(),
        restore_size: info.restore_size.clone(),
        ready_to_use: info.ready_to_use,
        error: None,
    });
    client
        .update_volume_snapshot_content_status(&seeded_content)
        .await?;

    Ok(())
}

fn member_content(
    vgsc: &VolumeGroupSnapshotContent,
    info: &VolumeSnapshotInfo,
    group_handle: &str,
    snapshot_name: &str,
    content_name: &str,
    namespace: &str,
) -> VolumeSnapshotContent {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        GROUP_SNAPSHOT_HANDLE_ANNOTATION.to_string(),
        group_handle.to_string(),
    );
    for secret_annotation in [
        DELETION_SECRET_NAME_ANNOTATION,
        DELETION_SECRET_NAMESPACE_ANNOTATION,
    ] {
        if let Some(value) = vgsc
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(secret_annotation))
        {
            annotations.insert(secret_annotation.to_string(), value.clone());
        }
    }

    VolumeSnapshotContent {
        metadata: ObjectMeta {
            name: Some(content_name.to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: VolumeSnapshotContentSpec {
            driver: vgsc.spec.driver.clone(),
            deletion_policy: vgsc.spec.deletion_policy.clone(),
            volume_snapshot_ref: TypedObjectRef {
                name: snapshot_name.to_string(),
                namespace: namespace.to_string(),
                uid: None,
            },
            source: VolumeSnapshotContentSource {
                volume_handle: Some(info.volume_handle.clone()),
                snapshot_handle: None,
            },
            volume_snapshot_class_name: None,
        },
        status: None,
    }
}

fn member_snapshot(
    vgs: &VolumeGroupSnapshot,
    snapshot_name: &str,
    namespace: &str,
    claim_name: &str,
) -> VolumeSnapshot {
    let mut labels = BTreeMap::new();
    labels.insert(GROUP_SNAPSHOT_NAME_LABEL.to_string(), vgs.name_any());

    VolumeSnapshot {
        metadata: ObjectMeta {
            name: Some(snapshot_name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            finalizers: Some(vec![MEMBER_SNAPSHOT_FINALIZER.to_string()]),
            owner_references: Some(vec![owner_reference(vgs)]),
            ..Default::default()
        },
        spec: VolumeSnapshotSpec {
            source: VolumeSnapshotSource {
                persistent_volume_claim_name: Some(claim_name.to_string()),
                volume_snapshot_content_name: None,
            },
            volume_snapshot_class_name: None,
        },
        status: None,
    }
}

fn owner_reference(vgs: &VolumeGroupSnapshot) -> OwnerReference {
    OwnerReference {
        api_version: "groupsnapshot.storage.k8s.io/v1beta1".to_string(),
        kind: "VolumeGroupSnapshot".to_string(),
        name: vgs.name_any(),
        uid: vgs.uid().to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
