//! Bi-directional binding between group snapshots and their contents
//!
//! The binding is a pair of weak references: the request's
//! `status.boundVolumeGroupSnapshotContentName` on one side and the
//! content's `spec.volumeGroupSnapshotRef` on the other. Neither side is
//! trusted alone; every reconcile pass re-checks both before acting.

use kube::ResourceExt;
use serde_json::json;

use crate::client::ObjectClient;
use crate::controller::names;
use crate::crd::{VolumeGroupSnapshot, VolumeGroupSnapshotContent};
use crate::{Error, Result};

/// Whether `vgsc` back-references `vgs`. A set-but-different UID means the
/// content belongs to an earlier incarnation of the request and must be
/// treated as a stranger.
pub fn binding_holds(vgs: &VolumeGroupSnapshot, vgsc: &VolumeGroupSnapshotContent) -> bool {
    let backref = &vgsc.spec.volume_group_snapshot_ref;
    if backref.name != vgs.name_any() || Some(backref.namespace.as_str()) != vgs.namespace().as_deref()
    {
        return false;
    }
    match vgsc.bound_uid() {
        Some(uid) => uid == vgs.uid(),
        None => true,
    }
}

/// Look up the content reserved for a dynamic request at its deterministic
/// name. `None` means the name is free and the content can be created.
pub async fn find_reserved_content(
    client: &dyn ObjectClient,
    vgs: &VolumeGroupSnapshot,
) -> Result<Option<VolumeGroupSnapshotContent>> {
    client
        .get_group_snapshot_content(&names::group_snapshot_content_name(vgs.uid()))
        .await
}

/// Claim `vgsc` for `vgs`: verify the back-reference, then patch in the UID
/// (and the class name, when the request carries one and the content does
/// not). Patching instead of updating keeps the claim atomic under version
/// conflicts. Already-bound contents are left untouched.
pub async fn check_and_bind(
    client: &dyn ObjectClient,
    vgs: &VolumeGroupSnapshot,
    vgsc: &VolumeGroupSnapshotContent,
) -> Result<VolumeGroupSnapshotContent> {
    let key = vgs.key();
    let content_name = vgsc.name_any();
    let backref = &vgsc.spec.volume_group_snapshot_ref;

    if backref.name != vgs.name_any()
        || Some(backref.namespace.as_str()) != vgs.namespace().as_deref()
    {
        return Err(Error::binding(
            &key,
            format!(
                "content {} back-references {}/{}, not this group snapshot",
                content_name, backref.namespace, backref.name
            ),
        ));
    }

    if let Some(uid) = vgsc.bound_uid() {
        if uid != vgs.uid() {
            return Err(Error::binding(
                &key,
                format!(
                    "content {} is bound to UID {}, not {}",
                    content_name,
                    uid,
                    vgs.uid()
                ),
            ));
        }
        if vgsc.spec.volume_group_snapshot_class_name.is_some() {
            // Already fully bound.
            return Ok(vgsc.clone());
        }
    }

    let uid_op = if backref.uid.is_some() { "replace" } else { "add" };
    let mut ops = vec![json!({
        "op": uid_op,
        "path": "/spec/volumeGroupSnapshotRef/uid",
        "value": vgs.uid(),
    })];
    if vgsc.spec.volume_group_snapshot_class_name.is_none() {
        if let Some(class_name) = &vgs.spec.volume_group_snapshot_class_name {
            ops.push(json!({
                "op": "add",
                "path": "/spec/volumeGroupSnapshotClassName",
                "value": class_name,
            }));
        }
    }

    let patch = serde_json::from_value(serde_json::Value::Array(ops))?;
    client.patch_group_snapshot_content(&content_name, patch).await
}
