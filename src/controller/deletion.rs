//! Cascading deletion of a group snapshot
//!
//! Deletion is strictly top-down and finalizer-guarded: the content is
//! marked, deleted when its policy says so, the member snapshots go next,
//! and the request's bound finalizer comes off last. With a `Delete`
//! policy the finalizer stays on until the sidecar has actually removed
//! the content; the pass that observes the content gone finishes the job.

use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::cache::MemberIndex;
use crate::client::{EventType, ObjectClient};
use crate::controller::events::{
    object_reference, pointer_escape, BEING_DELETED_ANNOTATION, REASON_CONTENT_DELETE_ERROR,
    REASON_SNAPSHOT_DELETE_ERROR, REASON_SNAPSHOT_DELETE_PENDING,
};
use crate::controller::finalizers::{
    has_finalizer, remove_finalizer_patch, GROUP_SNAPSHOT_BOUND_FINALIZER,
    MEMBER_SNAPSHOT_FINALIZER,
};
use crate::controller::{binder, names};
use crate::crd::{DeletionPolicy, VolumeGroupSnapshot, VolumeGroupSnapshotContent, VolumeSnapshot};
use crate::{Error, Result};

/// Whether a member snapshot is currently the source of a PVC restore.
/// This is policy supplied by the surrounding deployment, not something the
/// controller can derive from its own caches.
pub trait RestorePolicy: Send + Sync {
    fn snapshot_in_use(&self, namespace: &str, snapshot_name: &str) -> bool;
}

/// Default policy: nothing is ever considered in use.
pub struct NoRestoresInFlight;

impl RestorePolicy for NoRestoresInFlight {
    fn snapshot_in_use(&self, _namespace: &str, _snapshot_name: &str) -> bool {
        false
    }
}

#[instrument(skip_all, fields(group_snapshot = %vgs.key()))]
pub async fn process_deletion(
    client: &dyn ObjectClient,
    member_index: &MemberIndex,
    restore_policy: &dyn RestorePolicy,
    vgs: &VolumeGroupSnapshot,
) -> Result<()> {
    let key = vgs.key();
    let namespace = vgs.namespace().unwrap_or_default();

    let content_name = vgs
        .bound_content_name()
        .map(str::to_string)
        .unwrap_or_else(|| names::group_snapshot_content_name(vgs.uid()));

    let mut content = client.get_group_snapshot_content(&content_name).await?;
    if let Some(c) = &content {
        if !binder::binding_holds(vgs, c) {
            warn!(
                content = %content_name,
                "content exists but does not back-reference this group snapshot, leaving it alone"
            );
            content = None;
        }
    }

    let members = member_index.members_of(&namespace, &vgs.name_any());

    // A restore reading from one of the members blocks the whole cascade.
    for member in &members {
        let member_name = member.name_any();
        if restore_policy.snapshot_in_use(&namespace, &member_name) {
            client
                .publish_event(
                    object_reference(vgs),
                    EventType::Warning,
                    REASON_SNAPSHOT_DELETE_PENDING,
                    &format!(
                        "member snapshot {}/{} is in use by a restore, delaying deletion of {}",
                        namespace, member_name, key
                    ),
                )
                .await?;
            return Ok(());
        }
    }

    let mut wait_for_cascade = false;
    if let Some(content) = &content {
        mark_being_deleted(client, content).await?;

        if content.spec.deletion_policy == DeletionPolicy::Delete {
            info!(content = %content_name, "deletion policy is Delete, removing content");
            if let Err(e) = client.delete_group_snapshot_content(&content_name).await {
                client
                    .publish_event(
                        object_reference(vgs),
                        EventType::Warning,
                        REASON_CONTENT_DELETE_ERROR,
                        &format!("failed to delete content {}: {}", content_name, e),
                    )
                    .await?;
                return Err(Error::cascade(&key, format!("deleting content {}: {}", content_name, e)));
            }
            // The sidecar removes the content finalizer once the backend
            // snapshot is gone; only then may the request let go.
            wait_for_cascade = true;
        }
    }

    for member in &members {
        let member_name = member.name_any();
        if let Err(e) = delete_member(client, &namespace, member).await {
            client
                .publish_event(
                    object_reference(vgs),
                    EventType::Warning,
                    REASON_SNAPSHOT_DELETE_ERROR,
                    &format!("failed to delete member snapshot {}/{}: {}", namespace, member_name, e),
                )
                .await?;
            return Err(Error::cascade(
                &key,
                format!("deleting member snapshot {}: {}", member_name, e),
            ));
        }
    }

    if wait_for_cascade {
        debug!("content delete in flight, keeping bound finalizer");
        return Ok(());
    }

    if let Some(patch) = remove_finalizer_patch(&vgs.metadata, GROUP_SNAPSHOT_BOUND_FINALIZER)? {
        info!("removing bound finalizer");
        client
            .patch_group_snapshot(&namespace, &vgs.name_any(), patch)
            .await?;
    }
    Ok(())
}

/// Stamp the being-deleted marker on the content so the sidecar knows the
/// deletion is a cascade and not an accidental content removal. Idempotent.
async fn mark_being_deleted(
    client: &dyn ObjectClient,
    content: &VolumeGroupSnapshotContent,
) -> Result<()> {
    let already = content
        .metadata
        .annotations
        .as_ref()
        .map(|a| a.contains_key(BEING_DELETED_ANNOTATION))
        .unwrap_or(false);
    if already {
        return Ok(());
    }

    let ops = if content.metadata.annotations.is_none() {
        json!([
            {
                "op": "add",
                "path": "/metadata/annotations",
                "value": { BEING_DELETED_ANNOTATION: "yes" }
            }
        ])
    } else {
        json!([
            {
                "op": "add",
                "path": format!("/metadata/annotations/{}", pointer_escape(BEING_DELETED_ANNOTATION)),
                "value": "yes"
            }
        ])
    };
    let patch = serde_json::from_value(ops)?;
    client
        .patch_group_snapshot_content(&content.name_any(), patch)
        .await?;
    Ok(())
}

/// Remove the member finalizer, then delete the snapshot. Both steps treat
/// a missing object as already handled.
async fn delete_member(
    client: &dyn ObjectClient,
    namespace: &str,
    member: &VolumeSnapshot,
) -> Result<()> {
    let name = member.name_any();
    if has_finalizer(&member.metadata, MEMBER_SNAPSHOT_FINALIZER) {
        if let Some(patch) = remove_finalizer_patch(&member.metadata, MEMBER_SNAPSHOT_FINALIZER)? {
            match client.patch_volume_snapshot(namespace, &name, patch).await {
                Ok(_) => {}
                // Gone already: nothing left to unprotect.
                Err(Error::KubeError(kube::Error::Api(e))) if e.code == 404 => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
    client.delete_volume_snapshot(namespace, &name).await
}
