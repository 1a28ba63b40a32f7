//! Shared fixture builders for the reconciler tests. No Kubernetes API
//! calls are made; everything runs against the in-memory client.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, ObjectReference, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

use crate::cache::{MemberIndex, ObjectStore, PvIndex};
use crate::client::fake::FakeObjectClient;
use crate::client::ObjectClient;
use crate::controller::deletion::{NoRestoresInFlight, RestorePolicy};
use crate::controller::finalizers::GROUP_SNAPSHOT_BOUND_FINALIZER;
use crate::controller::{ContentReconciler, GroupSnapshotReconciler};
use crate::crd::{
    DeletionPolicy, TypedObjectRef, VolumeGroupSnapshot, VolumeGroupSnapshotClass,
    VolumeGroupSnapshotClassSpec, VolumeGroupSnapshotContent, VolumeGroupSnapshotContentSource,
    VolumeGroupSnapshotContentSpec, VolumeGroupSnapshotSource, VolumeGroupSnapshotSpec,
    VolumeSnapshot, VolumeSnapshotInfo, IS_DEFAULT_CLASS_ANNOTATION,
};
use crate::queue::WorkQueue;

pub const NS: &str = "default";

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn group_snapshot(name: &str, uid: &str, selector: &[(&str, &str)]) -> VolumeGroupSnapshot {
    VolumeGroupSnapshot {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NS.to_string()),
            uid: Some(uid.to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: VolumeGroupSnapshotSpec {
            source: VolumeGroupSnapshotSource {
                selector: Some(labels(selector)),
                volume_group_snapshot_content_name: None,
            },
            volume_group_snapshot_class_name: None,
        },
        status: None,
    }
}

pub fn pre_provisioned_group_snapshot(
    name: &str,
    uid: &str,
    content_name: &str,
) -> VolumeGroupSnapshot {
    let mut vgs = group_snapshot(name, uid, &[]);
    vgs.spec.source = VolumeGroupSnapshotSource {
        selector: None,
        volume_group_snapshot_content_name: Some(content_name.to_string()),
    };
    vgs
}

/// A request in deletion: timestamp set, bound finalizer still on.
pub fn deleting_group_snapshot(vgs: &VolumeGroupSnapshot) -> VolumeGroupSnapshot {
    let mut vgs = vgs.clone();
    vgs.metadata.deletion_timestamp = Some(Time(Utc::now()));
    vgs.metadata.finalizers = Some(vec![GROUP_SNAPSHOT_BOUND_FINALIZER.to_string()]);
    vgs
}

pub fn group_snapshot_class(name: &str, driver: &str, default: bool) -> VolumeGroupSnapshotClass {
    let annotations = default.then(|| labels(&[(IS_DEFAULT_CLASS_ANNOTATION, "true")]));
    VolumeGroupSnapshotClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations,
            ..Default::default()
        },
        spec: VolumeGroupSnapshotClassSpec {
            driver: driver.to_string(),
            deletion_policy: DeletionPolicy::Delete,
            parameters: BTreeMap::new(),
        },
    }
}

pub fn bound_claim(name: &str, claim_labels: &[(&str, &str)], volume_name: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NS.to_string()),
            labels: Some(labels(claim_labels)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            volume_name: Some(volume_name.to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn csi_volume(name: &str, driver: &str, handle: &str, claim_name: &str) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            csi: Some(CSIPersistentVolumeSource {
                driver: driver.to_string(),
                volume_handle: handle.to_string(),
                ..Default::default()
            }),
            claim_ref: Some(ObjectReference {
                name: Some(claim_name.to_string()),
                namespace: Some(NS.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

/// Content in the shape the controller provisions for `vgs`.
pub fn dynamic_content(
    vgs: &VolumeGroupSnapshot,
    driver: &str,
    handles: &[&str],
) -> VolumeGroupSnapshotContent {
    VolumeGroupSnapshotContent {
        metadata: ObjectMeta {
            name: Some(super::names::group_snapshot_content_name(vgs.uid())),
            ..Default::default()
        },
        spec: VolumeGroupSnapshotContentSpec {
            driver: driver.to_string(),
            deletion_policy: DeletionPolicy::Delete,
            volume_group_snapshot_class_name: vgs.spec.volume_group_snapshot_class_name.clone(),
            volume_group_snapshot_ref: TypedObjectRef {
                name: vgs.metadata.name.clone().unwrap_or_default(),
                namespace: NS.to_string(),
                uid: Some(vgs.uid().to_string()),
            },
            source: VolumeGroupSnapshotContentSource {
                volume_handles: Some(handles.iter().map(|h| h.to_string()).collect()),
                group_snapshot_handle: None,
            },
        },
        status: None,
    }
}

/// Admin-created content importing an existing backend group snapshot.
pub fn pre_provisioned_content(
    name: &str,
    vgs_name: &str,
    uid: Option<&str>,
    group_handle: &str,
) -> VolumeGroupSnapshotContent {
    VolumeGroupSnapshotContent {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: VolumeGroupSnapshotContentSpec {
            driver: "mock".to_string(),
            deletion_policy: DeletionPolicy::Retain,
            volume_group_snapshot_class_name: None,
            volume_group_snapshot_ref: TypedObjectRef {
                name: vgs_name.to_string(),
                namespace: NS.to_string(),
                uid: uid.map(str::to_string),
            },
            source: VolumeGroupSnapshotContentSource {
                volume_handles: None,
                group_snapshot_handle: Some(group_handle.to_string()),
            },
        },
        status: None,
    }
}

pub fn member_info(
    handle: &str,
    snapshot_handle: &str,
    ready: bool,
    restore_size: &str,
) -> VolumeSnapshotInfo {
    VolumeSnapshotInfo {
        volume_handle: handle.to_string(),
        snapshot_handle: Some(snapshot_handle.to_string()),
        creation_time: Some("2024-01-01T00:00:00Z".to_string()),
        restore_size: Some(restore_size.to_string()),
        ready_to_use: Some(ready),
    }
}

/// Fake client plus the stores the indexes run over.
pub struct TestContext {
    pub client: Arc<FakeObjectClient>,
    pub pv_store: Arc<ObjectStore<PersistentVolume>>,
    pub snapshot_store: Arc<ObjectStore<VolumeSnapshot>>,
    pub group_queue: Arc<WorkQueue>,
}

impl TestContext {
    pub fn new() -> Self {
        TestContext {
            client: Arc::new(FakeObjectClient::new()),
            pv_store: Arc::new(ObjectStore::new()),
            snapshot_store: Arc::new(ObjectStore::new()),
            group_queue: WorkQueue::new(Duration::from_millis(1), Duration::from_millis(50)),
        }
    }

    pub fn request_reconciler(&self) -> GroupSnapshotReconciler {
        self.request_reconciler_with(Arc::new(NoRestoresInFlight))
    }

    pub fn request_reconciler_with(
        &self,
        restore_policy: Arc<dyn RestorePolicy>,
    ) -> GroupSnapshotReconciler {
        GroupSnapshotReconciler::new(
            self.client.clone() as Arc<dyn ObjectClient>,
            PvIndex::new(self.pv_store.clone()),
            MemberIndex::new(self.snapshot_store.clone()),
            restore_policy,
        )
    }

    pub fn content_reconciler(&self) -> ContentReconciler {
        ContentReconciler::new(
            self.client.clone() as Arc<dyn ObjectClient>,
            self.group_queue.clone(),
        )
    }

    pub fn pv_index(&self) -> PvIndex {
        PvIndex::new(self.pv_store.clone())
    }

    pub fn seed_group_snapshot(&self, vgs: &VolumeGroupSnapshot) {
        self.client
            .group_snapshots
            .lock()
            .unwrap()
            .insert(vgs.key(), vgs.clone());
    }

    pub fn seed_content(&self, content: &VolumeGroupSnapshotContent) {
        self.client
            .contents
            .lock()
            .unwrap()
            .insert(content.key(), content.clone());
    }

    pub fn seed_class(&self, class: &VolumeGroupSnapshotClass) {
        let name = class.metadata.name.clone().unwrap_or_default();
        self.client.classes.lock().unwrap().insert(name, class.clone());
    }

    pub fn seed_claim(&self, claim: &PersistentVolumeClaim) {
        let key = format!(
            "{}/{}",
            claim.metadata.namespace.as_deref().unwrap_or_default(),
            claim.metadata.name.as_deref().unwrap_or_default()
        );
        self.client.pvcs.lock().unwrap().insert(key, claim.clone());
    }

    /// Volumes go to both the fake API and the PV index store.
    pub fn seed_volume(&self, pv: &PersistentVolume) {
        let name = pv.metadata.name.clone().unwrap_or_default();
        self.client.pvs.lock().unwrap().insert(name, pv.clone());
        self.pv_store.put(pv.clone());
    }

    /// Member snapshots go to both the fake API and the member index store.
    pub fn seed_member_snapshot(&self, snapshot: &VolumeSnapshot) {
        self.client
            .snapshots
            .lock()
            .unwrap()
            .insert(snapshot.key(), snapshot.clone());
        self.snapshot_store.put(snapshot.clone());
    }

    pub fn stored_group_snapshot(&self, name: &str) -> VolumeGroupSnapshot {
        self.client
            .group_snapshots
            .lock()
            .unwrap()
            .get(&format!("{}/{}", NS, name))
            .cloned()
            .expect("group snapshot not stored")
    }

    pub fn stored_content(&self, name: &str) -> Option<VolumeGroupSnapshotContent> {
        self.client.contents.lock().unwrap().get(name).cloned()
    }
}
