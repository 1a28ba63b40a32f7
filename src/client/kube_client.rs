//! kube-backed implementation of the API collaborator

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{
    Event as CoreEvent, ObjectReference, PersistentVolume, PersistentVolumeClaim,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, error};

use crate::client::{label_selector_string, EventType, ObjectClient};
use crate::crd::{
    VolumeGroupSnapshot, VolumeGroupSnapshotClass, VolumeGroupSnapshotContent, VolumeSnapshot,
    VolumeSnapshotContent,
};
use crate::{Error, Result};

pub struct KubeObjectClient {
    client: Client,
    component: String,
}

impl KubeObjectClient {
    pub fn new(client: Client, component: impl Into<String>) -> Self {
        KubeObjectClient {
            client,
            component: component.into(),
        }
    }

    fn group_snapshots(&self, namespace: &str) -> Api<VolumeGroupSnapshot> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn contents(&self) -> Api<VolumeGroupSnapshotContent> {
        Api::all(self.client.clone())
    }

    fn classes(&self) -> Api<VolumeGroupSnapshotClass> {
        Api::all(self.client.clone())
    }

    fn snapshots(&self, namespace: &str) -> Api<VolumeSnapshot> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn snapshot_contents(&self) -> Api<VolumeSnapshotContent> {
        Api::all(self.client.clone())
    }
}

fn is_status_code(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == code)
}

fn map_write_error(err: kube::Error, key: &str) -> Error {
    if is_status_code(&err, 409) {
        Error::conflict(key, err.to_string())
    } else {
        Error::KubeError(err)
    }
}

/// `Ok(None)` for 404, so callers can distinguish "absent" from "broken".
fn absent_on_404<T>(result: kube::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if is_status_code(&e, 404) => Ok(None),
        Err(e) => Err(Error::KubeError(e)),
    }
}

#[async_trait]
impl ObjectClient for KubeObjectClient {
    async fn get_group_snapshot(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeGroupSnapshot>> {
        absent_on_404(self.group_snapshots(namespace).get(name).await)
    }

    async fn update_group_snapshot(
        &self,
        vgs: &VolumeGroupSnapshot,
    ) -> Result<VolumeGroupSnapshot> {
        let namespace = vgs.namespace().unwrap_or_default();
        self.group_snapshots(&namespace)
            .replace(&vgs.name_any(), &PostParams::default(), vgs)
            .await
            .map_err(|e| map_write_error(e, &vgs.key()))
    }

    async fn update_group_snapshot_status(
        &self,
        vgs: &VolumeGroupSnapshot,
    ) -> Result<VolumeGroupSnapshot> {
        let namespace = vgs.namespace().unwrap_or_default();
        self.group_snapshots(&namespace)
            .replace_status(
                &vgs.name_any(),
                &PostParams::default(),
                serde_json::to_vec(vgs)?,
            )
            .await
            .map_err(|e| map_write_error(e, &vgs.key()))
    }

    async fn patch_group_snapshot(
        &self,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<VolumeGroupSnapshot> {
        self.group_snapshots(namespace)
            .patch(
                name,
                &PatchParams::default(),
                &Patch::<VolumeGroupSnapshot>::Json(patch),
            )
            .await
            .map_err(|e| map_write_error(e, &format!("{}/{}", namespace, name)))
    }

    async fn get_group_snapshot_content(
        &self,
        name: &str,
    ) -> Result<Option<VolumeGroupSnapshotContent>> {
        absent_on_404(self.contents().get(name).await)
    }

    async fn create_group_snapshot_content(
        &self,
        content: &VolumeGroupSnapshotContent,
    ) -> Result<VolumeGroupSnapshotContent> {
        let name = content.name_any();
        match self.contents().create(&PostParams::default(), content).await {
            Ok(created) => Ok(created),
            Err(e) if is_status_code(&e, 409) => {
                debug!(name, "group snapshot content already exists, reusing");
                self.contents().get(&name).await.map_err(Error::KubeError)
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn patch_group_snapshot_content(
        &self,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<VolumeGroupSnapshotContent> {
        self.contents()
            .patch(
                name,
                &PatchParams::default(),
                &Patch::<VolumeGroupSnapshotContent>::Json(patch),
            )
            .await
            .map_err(|e| map_write_error(e, name))
    }

    async fn delete_group_snapshot_content(&self, name: &str) -> Result<()> {
        match self.contents().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status_code(&e, 404) => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn get_group_snapshot_class(
        &self,
        name: &str,
    ) -> Result<Option<VolumeGroupSnapshotClass>> {
        absent_on_404(self.classes().get(name).await)
    }

    async fn list_group_snapshot_classes(&self) -> Result<Vec<VolumeGroupSnapshotClass>> {
        Ok(self
            .classes()
            .list(&ListParams::default())
            .await
            .map_err(Error::KubeError)?
            .items)
    }

    async fn create_volume_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<VolumeSnapshot> {
        let namespace = snapshot.namespace().unwrap_or_default();
        let name = snapshot.name_any();
        let api = self.snapshots(&namespace);
        match api.create(&PostParams::default(), snapshot).await {
            Ok(created) => Ok(created),
            Err(e) if is_status_code(&e, 409) => {
                debug!(name, "volume snapshot already exists, reusing");
                api.get(&name).await.map_err(Error::KubeError)
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn update_volume_snapshot_status(
        &self,
        snapshot: &VolumeSnapshot,
    ) -> Result<VolumeSnapshot> {
        let namespace = snapshot.namespace().unwrap_or_default();
        self.snapshots(&namespace)
            .replace_status(
                &snapshot.name_any(),
                &PostParams::default(),
                serde_json::to_vec(snapshot)?,
            )
            .await
            .map_err(|e| map_write_error(e, &snapshot.key()))
    }

    async fn patch_volume_snapshot(
        &self,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<VolumeSnapshot> {
        self.snapshots(namespace)
            .patch(
                name,
                &PatchParams::default(),
                &Patch::<VolumeSnapshot>::Json(patch),
            )
            .await
            .map_err(|e| map_write_error(e, &format!("{}/{}", namespace, name)))
    }

    async fn delete_volume_snapshot(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .snapshots(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status_code(&e, 404) => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn get_volume_snapshot_content(
        &self,
        name: &str,
    ) -> Result<Option<VolumeSnapshotContent>> {
        absent_on_404(self.snapshot_contents().get(name).await)
    }

    async fn create_volume_snapshot_content(
        &self,
        content: &VolumeSnapshotContent,
    ) -> Result<VolumeSnapshotContent> {
        let name = content.name_any();
        let api = self.snapshot_contents();
        match api.create(&PostParams::default(), content).await {
            Ok(created) => Ok(created),
            Err(e) if is_status_code(&e, 409) => {
                debug!(name, "volume snapshot content already exists, reusing");
                api.get(&name).await.map_err(Error::KubeError)
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn update_volume_snapshot_content_status(
        &self,
        content: &VolumeSnapshotContent,
    ) -> Result<VolumeSnapshotContent> {
        self.snapshot_contents()
            .replace_status(
                &content.name_any(),
                &PostParams::default(),
                serde_json::to_vec(content)?,
            )
            .await
            .map_err(|e| map_write_error(e, &content.name_any()))
    }

    async fn patch_volume_snapshot_content(
        &self,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<VolumeSnapshotContent> {
        self.snapshot_contents()
            .patch(
                name,
                &PatchParams::default(),
                &Patch::<VolumeSnapshotContent>::Json(patch),
            )
            .await
            .map_err(|e| map_write_error(e, name))
    }

    async fn list_persistent_volume_claims(
        &self,
        namespace: &str,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<PersistentVolumeClaim>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&label_selector_string(match_labels));
        Ok(api.list(&params).await.map_err(Error::KubeError)?.items)
    }

    async fn get_persistent_volume(&self, name: &str) -> Result<Option<PersistentVolume>> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        absent_on_404(api.get(name).await)
    }

    /// Post an event about `involved`. Event names must be unique, so the
    /// object name is suffixed with the current timestamp.
    async fn publish_event(
        &self,
        involved: ObjectReference,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        let namespace = involved
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let api: Api<CoreEvent> = Api::namespaced(self.client.clone(), &namespace);
        let time = Utc::now();

        let event = CoreEvent {
            metadata: ObjectMeta {
                generate_name: Some(format!(
                    "{}.{:x}",
                    involved.name.as_deref().unwrap_or("unknown"),
                    time.timestamp()
                )),
                namespace: Some(namespace),
                ..Default::default()
            },
            event_time: Some(MicroTime(time)),
            involved_object: involved,
            reason: Some(reason.into()),
            message: Some(message.into()),
            type_: Some(event_type.as_str().into()),
            action: Some(reason.into()),
            reporting_component: Some(self.component.clone()),
            reporting_instance: Some(
                std::env::var("POD_NAME").unwrap_or_else(|_| self.component.clone()),
            ),
            ..Default::default()
        };

        if let Err(e) = api.create(&PostParams::default(), &event).await {
            // Events are best effort; losing one must not fail the pass.
            error!(error = ?e, reason, "failed to publish event");
        }
        Ok(())
    }
}
