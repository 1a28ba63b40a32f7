//! Reconciler for VolumeGroupSnapshot requests
//!
//! Drives a request from creation through binding, fan-out and readiness,
//! and hands deletions to the cascade. Every pass is idempotent; partial
//! progress from a crashed pass is picked up by recomputing the
//! deterministic names and re-checking both sides of the binding.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::cache::{MemberIndex, PvIndex, PvMatch};
use crate::client::{EventType, ObjectClient};
use crate::controller::deletion::{self, RestorePolicy};
use crate::controller::events::{
    object_reference, DELETION_SECRET_NAMESPACE_ANNOTATION, DELETION_SECRET_NAME_ANNOTATION,
    REASON_BIND_FAILED, REASON_CONTENT_MISBOUND, REASON_CONTENT_MISMATCH, REASON_CONTENT_MISSING,
    REASON_CREATED, REASON_CREATE_CONTENT_FAILED, REASON_CREATING, REASON_MISBOUND, REASON_READY,
    REASON_STATUS_UPDATE_FAILED, REASON_VALIDATION_ERROR,
};
use crate::controller::finalizers::{
    add_finalizer_patch, has_finalizer, GROUP_SNAPSHOT_BOUND_FINALIZER,
};
use crate::controller::{binder, class_resolver, fanout, names};
use crate::crd::{
    PvcVolumeSnapshotPair, SnapshotError, TypedObjectRef, VolumeGroupSnapshot,
    VolumeGroupSnapshotClass, VolumeGroupSnapshotContent, VolumeGroupSnapshotContentSource,
    VolumeGroupSnapshotContentSpec,
};
use crate::{Error, Result};

pub struct GroupSnapshotReconciler {
    client: Arc<dyn ObjectClient>,
    pv_index: PvIndex,
    member_index: MemberIndex,
    restore_policy: Arc<dyn RestorePolicy>,
}

impl GroupSnapshotReconciler {
    pub fn new(
        client: Arc<dyn ObjectClient>,
        pv_index: PvIndex,
        member_index: MemberIndex,
        restore_policy: Arc<dyn RestorePolicy>,
    ) -> Self {
        GroupSnapshotReconciler {
            client,
            pv_index,
            member_index,
            restore_policy,
        }
    }

    #[instrument(skip(self, vgs), fields(name = %vgs.name_any(), namespace = vgs.namespace()))]
    pub async fn reconcile(&self, vgs: &VolumeGroupSnapshot) -> Result<()> {
        if vgs.metadata.deletion_timestamp.is_some() {
            return deletion::process_deletion(
                self.client.as_ref(),
                &self.member_index,
                self.restore_policy.as_ref(),
                vgs,
            )
            .await;
        }

        if let Err(reason) = vgs.spec.validate() {
            self.record_failure(vgs, REASON_VALIDATION_ERROR, &reason).await?;
            return Err(Error::validation(vgs.key(), reason));
        }

        self.check_and_add_finalizer(vgs).await?;

        if vgs.is_ready() && vgs.bound_content_name().is_some() {
            self.sync_ready(vgs).await
        } else if vgs.spec.is_pre_provisioned() {
            self.sync_pre_provisioned(vgs).await
        } else {
            self.sync_dynamic(vgs).await
        }
    }

    /// The bound finalizer belongs on the request exactly while a matching
    /// content exists.
    async fn check_and_add_finalizer(&self, vgs: &VolumeGroupSnapshot) -> Result<()> {
        if has_finalizer(&vgs.metadata, GROUP_SNAPSHOT_BOUND_FINALIZER) {
            return Ok(());
        }
        let content_name = vgs
            .bound_content_name()
            .map(str::to_string)
            .or_else(|| vgs.spec.source.volume_group_snapshot_content_name.clone())
            .unwrap_or_else(|| names::group_snapshot_content_name(vgs.uid()));
        let content = self.client.get_group_snapshot_content(&content_name).await?;
        if let Some(content) = content {
            if binder::binding_holds(vgs, &content) {
                debug!(content = %content_name, "adding bound finalizer");
                let namespace = vgs.namespace().unwrap_or_default();
                let patch = add_finalizer_patch(&vgs.metadata, GROUP_SNAPSHOT_BOUND_FINALIZER)?;
                self.client
                    .patch_group_snapshot(&namespace, &vgs.name_any(), patch)
                    .await?;
            }
        }
        Ok(())
    }

    /// A ready request only needs its binding re-verified; a binding that
    /// went bad is surfaced and never silently repaired.
    async fn sync_ready(&self, vgs: &VolumeGroupSnapshot) -> Result<()> {
        let content_name = match vgs.bound_content_name() {
            Some(name) => name.to_string(),
            None => return Ok(()),
        };
        match self.client.get_group_snapshot_content(&content_name).await? {
            None => {
                let message = format!("bound content {} no longer exists", content_name);
                self.record_failure(vgs, REASON_CONTENT_MISSING, &message).await?;
                Err(Error::binding(vgs.key(), message))
            }
            Some(content) if !binder::binding_holds(vgs, &content) => {
                let message = format!(
                    "bound content {} does not back-reference this group snapshot",
                    content_name
                );
                self.record_failure(vgs, REASON_MISBOUND, &message).await?;
                Err(Error::binding(vgs.key(), message))
            }
            Some(_) => Ok(()),
        }
    }

    async fn sync_pre_provisioned(&self, vgs: &VolumeGroupSnapshot) -> Result<()> {
        let key = vgs.key();
        let content_name = match &vgs.spec.source.volume_group_snapshot_content_name {
            Some(name) => name.clone(),
            None => return Ok(()),
        };

        let content = match self.client.get_group_snapshot_content(&content_name).await? {
            Some(content) => content,
            None => {
                let message = format!("content {} not found", content_name);
                self.record_failure(vgs, REASON_CONTENT_MISSING, &message).await?;
                return Err(Error::validation(key, message));
            }
        };

        if content.spec.is_dynamic() {
            let message = format!(
                "content {} is dynamically provisioned while expecting a pre-provisioned one",
                content_name
            );
            self.record_failure(vgs, REASON_CONTENT_MISMATCH, &message).await?;
            return Err(Error::validation(key, message));
        }

        let bound = match binder::check_and_bind(self.client.as_ref(), vgs, &content).await {
            Ok(bound) => bound,
            Err(e @ Error::BindingError { .. }) => {
                self.record_failure(vgs, REASON_CONTENT_MISBOUND, &e.to_string()).await?;
                return Err(e);
            }
            Err(e) => {
                self.client
                    .publish_event(
                        object_reference(vgs),
                        EventType::Warning,
                        REASON_BIND_FAILED,
                        &format!("failed to bind content {}: {}", content_name, e),
                    )
                    .await?;
                return Err(e);
            }
        };

        self.propagate_status(vgs, &bound).await
    }

    async fn sync_dynamic(&self, vgs: &VolumeGroupSnapshot) -> Result<()> {
        let (class, vgs) = match class_resolver::resolve_class(self.client.as_ref(), vgs).await {
            Ok(resolved) => resolved,
            Err(e @ Error::ValidationError { .. }) => {
                self.record_failure(vgs, REASON_CREATE_CONTENT_FAILED, &e.to_string()).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        match binder::find_reserved_content(self.client.as_ref(), &vgs).await? {
            Some(content) => {
                let bound = match binder::check_and_bind(self.client.as_ref(), &vgs, &content).await
                {
                    Ok(bound) => bound,
                    Err(e @ Error::BindingError { .. }) => {
                        self.record_failure(&vgs, REASON_MISBOUND, &e.to_string()).await?;
                        return Err(e);
                    }
                    Err(e) => {
                        self.client
                            .publish_event(
                                object_reference(&vgs),
                                EventType::Warning,
                                REASON_BIND_FAILED,
                                &format!("failed to bind content: {}", e),
                            )
                            .await?;
                        return Err(e);
                    }
                };

                if fanout::ready_for_fanout(&bound) {
                    match fanout::fan_out(self.client.as_ref(), &self.pv_index, &vgs, &bound).await
                    {
                        Ok(()) => {}
                        Err(e @ Error::ValidationError { .. }) => {
                            self.record_failure(&vgs, REASON_CREATE_CONTENT_FAILED, &e.to_string())
                                .await?;
                            return Err(e);
                        }
                        Err(e) => return Err(e),
                    }
                }

                self.propagate_status(&vgs, &bound).await
            }
            None => {
                let class = match class.as_ref() {
                    Some(class) => class,
                    None => return Ok(()),
                };
                self.client
                    .publish_event(
                        object_reference(&vgs),
                        EventType::Normal,
                        REASON_CREATING,
                        &format!("creating group snapshot content for {}", vgs.key()),
                    )
                    .await?;

                let content = self.create_content(&vgs, class).await?;

                self.client
                    .publish_event(
                        object_reference(&vgs),
                        EventType::Normal,
                        REASON_CREATED,
                        &format!("group snapshot content {} created", content.name_any()),
                    )
                    .await?;

                self.propagate_status(&vgs, &content).await
            }
        }
    }

    /// Build and create the content for a dynamic request. AlreadyExists is
    /// success; the deterministic name means it is ours from a prior pass.
    async fn create_content(
        &self,
        vgs: &VolumeGroupSnapshot,
        class: &VolumeGroupSnapshotClass,
    ) -> Result<VolumeGroupSnapshotContent> {
        let content = match self.build_content(vgs, class).await {
            Ok(content) => content,
            Err(e @ Error::ValidationError { .. }) => {
                self.record_failure(vgs, REASON_CREATE_CONTENT_FAILED, &e.to_string()).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        info!(content = %content.name_any(), "creating group snapshot content");
        self.client.create_group_snapshot_content(&content).await
    }

    async fn build_content(
        &self,
        vgs: &VolumeGroupSnapshot,
        class: &VolumeGroupSnapshotClass,
    ) -> Result<VolumeGroupSnapshotContent> {
        let volume_handles = self.resolve_member_handles(vgs, class).await?;
        let namespace = vgs.namespace().unwrap_or_default();

        let mut annotations = BTreeMap::new();
        if let Some((secret_name, secret_namespace)) = class.deletion_secret() {
            annotations.insert(DELETION_SECRET_NAME_ANNOTATION.to_string(), secret_name);
            annotations.insert(
                DELETION_SECRET_NAMESPACE_ANNOTATION.to_string(),
                secret_namespace,
            );
        }

        Ok(VolumeGroupSnapshotContent {
            metadata: ObjectMeta {
                name: Some(names::group_snapshot_content_name(vgs.uid())),
                annotations: (!annotations.is_empty()).then_some(annotations),
                ..Default::default()
            },
            spec: VolumeGroupSnapshotContentSpec {
                driver: class.spec.driver.clone(),
                deletion_policy: class.spec.deletion_policy.clone(),
                volume_group_snapshot_class_name: Some(class.name_any()),
                volume_group_snapshot_ref: TypedObjectRef {
                    name: vgs.name_any(),
                    namespace,
                    uid: Some(vgs.uid().to_string()),
                },
                source: VolumeGroupSnapshotContentSource {
                    volume_handles: Some(volume_handles),
                    group_snapshot_handle: None,
                },
            },
            status: None,
        })
    }

    /// CSI volume handles of every claim the selector matches. Each claim
    /// must be bound to a CSI volume of the class's driver.
    async fn resolve_member_handles(
        &self,
        vgs: &VolumeGroupSnapshot,
        class: &VolumeGroupSnapshotClass,
    ) -> Result<Vec<String>> {
        let key = vgs.key();
        let selector = vgs.spec.source.selector.as_ref().ok_or_else(|| {
            Error::validation(&key, "source.selector is required for dynamic provisioning")
        })?;
        let namespace = vgs.namespace().unwrap_or_default();

        let claims = self
            .client
            .list_persistent_volume_claims(&namespace, selector)
            .await?;
        if claims.is_empty() {
            return Err(Error::validation(&key, "no claims match source.selector"));
        }

        let mut handles = Vec::with_capacity(claims.len());
        for claim in &claims {
            let claim_name = claim.name_any();
            let volume_name = claim
                .spec
                .as_ref()
                .and_then(|s| s.volume_name.as_deref())
                .ok_or_else(|| {
                    Error::validation(&key, format!("claim {} is not bound", claim_name))
                })?;
            let pv = self
                .client
                .get_persistent_volume(volume_name)
                .await?
                .ok_or_else(|| {
                    Error::validation(
                        &key,
                        format!("persistent volume {} of claim {} not found", volume_name, claim_name),
                    )
                })?;
            let csi = pv
                .spec
                .as_ref()
                .and_then(|s| s.csi.as_ref())
                .ok_or_else(|| {
                    Error::validation(
                        &key,
                        format!("persistent volume {} is not a CSI volume", volume_name),
                    )
                })?;
            if csi.driver != class.spec.driver {
                return Err(Error::validation(
                    &key,
                    format!(
                        "volume {} uses driver {} but class {} expects {}",
                        volume_name,
                        csi.driver,
                        class.name_any(),
                        class.spec.driver
                    ),
                ));
            }
            handles.push(csi.volume_handle.clone());
        }
        Ok(handles)
    }

    /// Mirror the content status onto the request (§status semantics: the
    /// creation time never clears, readiness going true wipes the error,
    /// and the member pair list is populated once and then preserved).
    async fn propagate_status(
        &self,
        vgs: &VolumeGroupSnapshot,
        vgsc: &VolumeGroupSnapshotContent,
    ) -> Result<()> {
        let mut status = vgs.status.clone().unwrap_or_default();
        let was_ready = status.ready_to_use == Some(true);
        let content_status = vgsc.status.as_ref();

        status.bound_volume_group_snapshot_content_name = Some(vgsc.name_any());
        if status.creation_time.is_none() {
            status.creation_time = content_status.and_then(|c| c.creation_time.clone());
        }

        let ready = content_status.and_then(|c| c.ready_to_use).unwrap_or(false);
        status.ready_to_use = Some(ready);
        if ready {
            status.error = None;
        } else if let Some(content_error) = content_status.and_then(|c| c.error.as_ref()) {
            let same_observation = status
                .error
                .as_ref()
                .map(|e| e.time == content_error.time)
                .unwrap_or(false);
            if !same_observation {
                status.error = Some(content_error.clone());
            }
        }

        if status.pvc_volume_snapshot_ref_list.is_empty() {
            status.pvc_volume_snapshot_ref_list = self.derive_member_pairs(vgs, vgsc);
        }

        let mut updated = vgs.clone();
        updated.status = Some(status);
        if let Err(e) = self.client.update_group_snapshot_status(&updated).await {
            self.client
                .publish_event(
                    object_reference(vgs),
                    EventType::Warning,
                    REASON_STATUS_UPDATE_FAILED,
                    &format!("failed to update status: {}", e),
                )
                .await?;
            return Err(e);
        }

        if ready && !was_ready {
            self.client
                .publish_event(
                    object_reference(vgs),
                    EventType::Normal,
                    REASON_READY,
                    &format!("group snapshot {} is ready to use", vgs.key()),
                )
                .await?;
        }
        Ok(())
    }

    /// Pair each member volume's claim with the deterministic name of the
    /// snapshot fanned out for it. An unresolvable volume leaves the claim
    /// side empty rather than failing the status write.
    fn derive_member_pairs(
        &self,
        vgs: &VolumeGroupSnapshot,
        vgsc: &VolumeGroupSnapshotContent,
    ) -> Vec<PvcVolumeSnapshotPair> {
        let info_list = match vgsc.status.as_ref() {
            Some(status) => &status.volume_snapshot_info_list,
            None => return Vec::new(),
        };
        info_list
            .iter()
            .map(|info| {
                let claim_name = match self.pv_index.find(&vgsc.spec.driver, &info.volume_handle) {
                    PvMatch::One(pv) => pv
                        .spec
                        .as_ref()
                        .and_then(|s| s.claim_ref.as_ref())
                        .and_then(|r| r.name.clone())
                        .unwrap_or_default(),
                    _ => String::new(),
                };
                PvcVolumeSnapshotPair {
                    persistent_volume_claim_ref: claim_name,
                    volume_snapshot_ref: names::member_snapshot_name(vgs.uid(), &info.volume_handle),
                }
            })
            .collect()
    }

    /// Record a terminal failure where the user can see it: once as an
    /// event, once in `status.error`.
    async fn record_failure(
        &self,
        vgs: &VolumeGroupSnapshot,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        self.client
            .publish_event(object_reference(vgs), EventType::Warning, reason, message)
            .await?;

        let mut updated = vgs.clone();
        let mut status = updated.status.take().unwrap_or_default();
        status.ready_to_use = Some(false);
        status.error = Some(SnapshotError {
            time: Some(Utc::now().to_rfc3339()),
            message: Some(message.to_string()),
        });
        updated.status = Some(status);
        self.client.update_group_snapshot_status(&updated).await?;
        Ok(())
    }
}
