//! In-memory API collaborator used by the reconciler tests
//!
//! Behaves like the kube-backed client as far as the reconcilers can tell:
//! numeric resource versions bumped on every write, AlreadyExists surfaces
//! the stored object, JSON-Patches are applied server-side, and version
//! conflicts can be injected to exercise the abort-and-requeue path.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolume, PersistentVolumeClaim};
use kube::core::ErrorResponse;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::{EventType, ObjectClient};
use crate::crd::{
    VolumeGroupSnapshot, VolumeGroupSnapshotClass, VolumeGroupSnapshotContent, VolumeSnapshot,
    VolumeSnapshotContent,
};
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub involved_name: String,
    pub event_type: String,
    pub reason: String,
    pub message: String,
}

#[derive(Default)]
pub struct FakeObjectClient {
    pub group_snapshots: Mutex<BTreeMap<String, VolumeGroupSnapshot>>,
    pub contents: Mutex<BTreeMap<String, VolumeGroupSnapshotContent>>,
    pub classes: Mutex<BTreeMap<String, VolumeGroupSnapshotClass>>,
    pub snapshots: Mutex<BTreeMap<String, VolumeSnapshot>>,
    pub snapshot_contents: Mutex<BTreeMap<String, VolumeSnapshotContent>>,
    pub pvcs: Mutex<BTreeMap<String, PersistentVolumeClaim>>,
    pub pvs: Mutex<BTreeMap<String, PersistentVolume>>,
    pub events: Mutex<Vec<RecordedEvent>>,
    /// Number of upcoming status updates that will fail with a conflict.
    pub fail_status_updates: AtomicU32,
    version: AtomicU64,
    uid_counter: AtomicU64,
}

fn not_found(key: &str) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} not found", key),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

fn namespaced_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

impl FakeObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn next_uid(&self) -> String {
        format!("uid-{}", self.uid_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn take_status_failure(&self, key: &str) -> Result<()> {
        let remaining = self.fail_status_updates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_status_updates.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::conflict(key, "injected version conflict"));
        }
        Ok(())
    }

    fn create_in<T>(&self, map: &Mutex<BTreeMap<String, T>>, key: String, obj: &T) -> Result<T>
    where
        T: kube::Resource + Clone,
    {
        let mut map = map.lock().expect("fake client mutex poisoned");
        if let Some(existing) = map.get(&key) {
            return Ok(existing.clone());
        }
        let mut stored = obj.clone();
        stored.meta_mut().resource_version = Some(self.next_version());
        if stored.meta().uid.is_none() {
            stored.meta_mut().uid = Some(self.next_uid());
        }
        map.insert(key, stored.clone());
        Ok(stored)
    }

    fn patch_in<T>(
        &self,
        map: &Mutex<BTreeMap<String, T>>,
        key: &str,
        patch: json_patch::Patch,
    ) -> Result<T>
    where
        T: kube::Resource + Clone + Serialize + DeserializeOwned,
    {
        let mut map = map.lock().expect("fake client mutex poisoned");
        let stored = map.get(key).ok_or_else(|| not_found(key))?;
        let mut doc = serde_json::to_value(stored)?;
        json_patch::patch(&mut doc, &patch)
            .map_err(|e| Error::conflict(key, format!("patch failed: {}", e)))?;
        let mut patched: T = serde_json::from_value(doc)?;
        patched.meta_mut().resource_version = Some(self.next_version());
        map.insert(key.to_string(), patched.clone());
        Ok(patched)
    }

    /// Every event recorded with the given reason.
    pub fn events_with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .expect("fake client mutex poisoned")
            .iter()
            .filter(|e| e.reason == reason)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ObjectClient for FakeObjectClient {
    async fn get_group_snapshot(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeGroupSnapshot>> {
        let key = namespaced_key(namespace, name);
        Ok(self
            .group_snapshots
            .lock()
            .expect("fake client mutex poisoned")
            .get(&key)
            .cloned())
    }

    async fn update_group_snapshot(
        &self,
        vgs: &VolumeGroupSnapshot,
    ) -> Result<VolumeGroupSnapshot> {
        let key = vgs.key();
        let mut map = self
            .group_snapshots
            .lock()
            .expect("fake client mutex poisoned");
        let stored = map.get(&key).ok_or_else(|| not_found(&key))?;
        let mut updated = vgs.clone();
        // The status subresource is untouched by a spec update.
        updated.status = stored.status.clone();
        updated.metadata.resource_version = Some(self.next_version());
        map.insert(key, updated.clone());
        Ok(updated)
    }

    async fn update_group_snapshot_status(
        &self,
        vgs: &VolumeGroupSnapshot,
    ) -> Result<VolumeGroupSnapshot> {
        let key = vgs.key();
        self.take_status_failure(&key)?;
        let mut map = self
            .group_snapshots
            .lock()
            .expect("fake client mutex poisoned");
        let stored = map.get(&key).ok_or_else(|| not_found(&key))?;
        let mut updated = stored.clone();
        updated.status = vgs.status.clone();
        updated.metadata.resource_version = Some(self.next_version());
        map.insert(key, updated.clone());
        Ok(updated)
    }

    async fn patch_group_snapshot(
        &self,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<VolumeGroupSnapshot> {
        self.patch_in(
            &self.group_snapshots,
            &namespaced_key(namespace, name),
            patch,
        )
    }

    async fn get_group_snapshot_content(
        &self,
        name: &str,
    ) -> Result<Option<VolumeGroupSnapshotContent>> {
        Ok(self
            .contents
            .lock()
            .expect("fake client mutex poisoned")
            .get(name)
            .cloned())
    }

    async fn create_group_snapshot_content(
        &self,
        content: &VolumeGroupSnapshotContent,
    ) -> Result<VolumeGroupSnapshotContent> {
        self.create_in(&self.contents, content.name_any(), content)
    }

    async fn patch_group_snapshot_content(
        &self,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<VolumeGroupSnapshotContent> {
        self.patch_in(&self.contents, name, patch)
    }

    async fn delete_group_snapshot_content(&self, name: &str) -> Result<()> {
        self.contents
            .lock()
            .expect("fake client mutex poisoned")
            .remove(name);
        Ok(())
    }

    async fn get_group_snapshot_class(
        &self,
        name: &str,
    ) -> Result<Option<VolumeGroupSnapshotClass>> {
        Ok(self
            .classes
            .lock()
            .expect("fake client mutex poisoned")
            .get(name)
            .cloned())
    }

    async fn list_group_snapshot_classes(&self) -> Result<Vec<VolumeGroupSnapshotClass>> {
        Ok(self
            .classes
            .lock()
            .expect("fake client mutex poisoned")
            .values()
            .cloned()
            .collect())
    }

    async fn create_volume_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<VolumeSnapshot> {
        self.create_in(&self.snapshots, snapshot.key(), snapshot)
    }

    async fn update_volume_snapshot_status(
        &self,
        snapshot: &VolumeSnapshot,
    ) -> Result<VolumeSnapshot> {
        let key = snapshot.key();
        self.take_status_failure(&key)?;
        let mut map = self.snapshots.lock().expect("fake client mutex poisoned");
        let stored = map.get(&key).ok_or_else(|| not_found(&key))?;
        let mut updated = stored.clone();
        updated.status = snapshot.status.clone();
        updated.metadata.resource_version = Some(self.next_version());
        map.insert(key, updated.clone());
        Ok(updated)
    }

    async fn patch_volume_snapshot(
        &self,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<VolumeSnapshot> {
        self.patch_in(&self.snapshots, &namespaced_key(namespace, name), patch)
    }

    async fn delete_volume_snapshot(&self, namespace: &str, name: &str) -> Result<()> {
        self.snapshots
            .lock()
            .expect("fake client mutex poisoned")
            .remove(&namespaced_key(namespace, name));
        Ok(())
    }

    async fn get_volume_snapshot_content(
        &self,
        name: &str,
    ) -> Result<Option<VolumeSnapshotContent>> {
        Ok(self
            .snapshot_contents
            .lock()
            .expect("fake client mutex poisoned")
            .get(name)
            .cloned())
    }

    async fn create_volume_snapshot_content(
        &self,
        content: &VolumeSnapshotContent,
    ) -> Result<VolumeSnapshotContent> {
        self.create_in(&self.snapshot_contents, content.name_any(), content)
    }

    async fn update_volume_snapshot_content_status(
        &self,
        content: &VolumeSnapshotContent,
    ) -> Result<VolumeSnapshotContent> {
        let key = content.name_any();
        self.take_status_failure(&key)?;
        let mut map = self
            .snapshot_contents
            .lock()
            .expect("fake client mutex poisoned");
        let stored = map.get(&key).ok_or_else(|| not_found(&key))?;
        let mut updated = stored.clone();
        updated.status = content.status.clone();
        updated.metadata.resource_version = Some(self.next_version());
        map.insert(key, updated.clone());
        Ok(updated)
    }

    async fn patch_volume_snapshot_content(
        &self,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<VolumeSnapshotContent> {
        self.patch_in(&self.snapshot_contents, name, patch)
    }

    async fn list_persistent_volume_claims(
        &self,
        namespace: &str,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<PersistentVolumeClaim>> {
        Ok(self
            .pvcs
            .lock()
            .expect("fake client mutex poisoned")
            .values()
            .filter(|pvc| pvc.metadata.namespace.as_deref() == Some(namespace))
            .filter(|pvc| {
                let labels = pvc.metadata.labels.clone().unwrap_or_default();
                match_labels
                    .iter()
                    .all(|(k, v)| labels.get(k).map(|actual| actual == v).unwrap_or(false))
            })
            .cloned()
            .collect())
    }

    async fn get_persistent_volume(&self, name: &str) -> Result<Option<PersistentVolume>> {
        Ok(self
            .pvs
            .lock()
            .expect("fake client mutex poisoned")
            .get(name)
            .cloned())
    }

    async fn publish_event(
        &self,
        involved: ObjectReference,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        self.events
            .lock()
            .expect("fake client mutex poisoned")
            .push(RecordedEvent {
                involved_name: involved.name.unwrap_or_default(),
                event_type: event_type.as_str().to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
            });
        Ok(())
    }
}
