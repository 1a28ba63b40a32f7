//! Reconciler for VolumeGroupSnapshotContent objects
//!
//! Contents mostly follow their request: this reconciler validates the
//! source shape, keeps the content finalizer on live objects, and nudges
//! the owning request's queue whenever the sidecar-written status has run
//! ahead of what the request shows.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, instrument, warn};

use crate::client::{EventType, ObjectClient};
use crate::controller::events::{object_reference, REASON_VALIDATION_ERROR};
use crate::controller::finalizers::{
    add_finalizer_patch, has_finalizer, GROUP_SNAPSHOT_CONTENT_FINALIZER,
};
use crate::queue::WorkQueue;
use crate::crd::{VolumeGroupSnapshot, VolumeGroupSnapshotContent};
use crate::{Error, Result};

pub struct ContentReconciler {
    client: Arc<dyn ObjectClient>,
    group_queue: Arc<WorkQueue>,
}

impl ContentReconciler {
    pub fn new(client: Arc<dyn ObjectClient>, group_queue: Arc<WorkQueue>) -> Self {
        ContentReconciler {
            client,
            group_queue,
        }
    }

    #[instrument(skip(self, vgsc), fields(name = %vgsc.name_any()))]
    pub async fn reconcile(&self, vgsc: &VolumeGroupSnapshotContent) -> Result<()> {
        let name = vgsc.name_any();

        if let Err(reason) = vgsc.spec.validate() {
            self.client
                .publish_event(
                    object_reference(vgsc),
                    EventType::Warning,
                    REASON_VALIDATION_ERROR,
                    &format!("content {}: {}", name, reason),
                )
                .await?;
            return Err(Error::validation(&name, reason));
        }

        let bound_uid = match vgsc.bound_uid() {
            Some(uid) => uid.to_string(),
            None => {
                // Reserved for a request that has not claimed it yet; the
                // request reconciler performs the bind.
                debug!("content has no bound UID yet, skipping");
                return Ok(());
            }
        };

        if vgsc.metadata.deletion_timestamp.is_none()
            && !has_finalizer(&vgsc.metadata, GROUP_SNAPSHOT_CONTENT_FINALIZER)
        {
            let patch = add_finalizer_patch(&vgsc.metadata, GROUP_SNAPSHOT_CONTENT_FINALIZER)?;
            self.client.patch_group_snapshot_content(&name, patch).await?;
        }

        let backref = &vgsc.spec.volume_group_snapshot_ref;
        let parent = self
            .client
            .get_group_snapshot(&backref.namespace, &backref.name)
            .await?;
        let parent = match parent {
            Some(parent) => parent,
            None => return Ok(()),
        };

        if parent.uid() != bound_uid {
            // The request was deleted and recreated under the same name;
            // this content belongs to the old incarnation.
            warn!(
                parent = %parent.key(),
                "parent UID differs from bound UID, treating content as orphaned"
            );
            return Ok(());
        }

        if needs_update(&parent, vgsc) {
            debug!(parent = %parent.key(), "content status ran ahead, re-queueing parent");
            self.group_queue.add(parent.key());
        }

        Ok(())
    }
}

/// Whether the request's status lags the content's and the request needs a
/// reconcile pass to catch up.
pub fn needs_update(vgs: &VolumeGroupSnapshot, vgsc: &VolumeGroupSnapshotContent) -> bool {
    let content_status = vgsc.status.as_ref();
    match vgs.status.as_ref() {
        None => content_status.is_some(),
        Some(status) => {
            status.bound_volume_group_snapshot_content_name.is_none()
                || (status.creation_time.is_none()
                    && content_status.and_then(|c| c.creation_time.as_ref()).is_some())
                || status.ready_to_use != content_status.and_then(|c| c.ready_to_use)
        }
    }
}
