//! Finalizer bookkeeping
//!
//! Finalizer edits are RFC 6902 JSON-Patches so that concurrent writers
//! cannot clobber each other's entries: adds append to the existing array,
//! removes name the exact index and are rejected by the API server if the
//! array shifted underneath us.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;

use crate::Result;

/// Blocks deletion of a VolumeGroupSnapshot while it is bound to a content.
pub const GROUP_SNAPSHOT_BOUND_FINALIZER: &str =
    "groupsnapshot.storage.k8s.io/volumegroupsnapshot-bound-protection";

/// Blocks deletion of a VolumeGroupSnapshotContent while the controller
/// needs it.
pub const GROUP_SNAPSHOT_CONTENT_FINALIZER: &str =
    "groupsnapshot.storage.k8s.io/volumegroupsnapshotcontent-bound-protection";

/// Blocks deletion of an individual member snapshot out from under its group.
pub const MEMBER_SNAPSHOT_FINALIZER: &str =
    "groupsnapshot.storage.k8s.io/volumegroupsnapshot-member-protection";

pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .map(|f| f.iter().any(|existing| existing == finalizer))
        .unwrap_or(false)
}

/// Patch appending `finalizer`, creating the array when absent.
pub fn add_finalizer_patch(meta: &ObjectMeta, finalizer: &str) -> Result<json_patch::Patch> {
    let ops = if meta.finalizers.as_ref().map(Vec::len).unwrap_or(0) == 0 {
        json!([
            { "op": "add", "path": "/metadata/finalizers", "value": [finalizer] }
        ])
    } else {
        json!([
            { "op": "add", "path": "/metadata/finalizers/-", "value": finalizer }
        ])
    };
    Ok(serde_json::from_value(ops)?)
}

/// Patch removing `finalizer` at its current index, or `None` when it is
/// not present. The test op pins the value so a concurrent reorder fails
/// the patch instead of removing a stranger's finalizer.
pub fn remove_finalizer_patch(
    meta: &ObjectMeta,
    finalizer: &str,
) -> Result<Option<json_patch::Patch>> {
    let index = match meta
        .finalizers
        .as_ref()
        .and_then(|f| f.iter().position(|existing| existing == finalizer))
    {
        Some(index) => index,
        None => return Ok(None),
    };
    let path = format!("/metadata/finalizers/{}", index);
    let ops = json!([
        { "op": "test", "path": path, "value": finalizer },
        { "op": "remove", "path": path }
    ]);
    Ok(Some(serde_json::from_value(ops)?))
}
