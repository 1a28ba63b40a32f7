//! Controller wiring: watch streams, work queues and reconcile workers
//!
//! One watcher task per watched kind folds events into the object stores
//! and enqueues keys; a pool of workers per queue drains them through the
//! reconcilers. Per-key exclusion lives in the queues, so a reconciler is
//! never re-entered for the same object concurrently.

mod binder;
mod class_resolver;
mod content;
mod deletion;
mod events;
mod fanout;
mod finalizers;
mod group_snapshot;
mod names;

#[cfg(test)]
mod fixtures;

#[cfg(test)]
mod deletion_test;

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolume;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, PostParams};
use kube::runtime::watcher;
use kube::{Client, CustomResourceExt, ResourceExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{MemberIndex, ObjectStore, PvIndex, StoredObject};
use crate::client::{KubeObjectClient, ObjectClient};
use crate::config::Settings;
use crate::crd::{
    VolumeGroupSnapshot, VolumeGroupSnapshotClass, VolumeGroupSnapshotContent, VolumeSnapshot,
    VolumeSnapshotContent,
};
use crate::queue::WorkQueue;
use crate::{Error, Result};

pub use content::{needs_update, ContentReconciler};
pub use deletion::{NoRestoresInFlight, RestorePolicy};
pub use group_snapshot::GroupSnapshotReconciler;

/// Shared handles for everything the workers touch. Collaborators are
/// constructed first, reconcilers last; nothing in here is mutated outside
/// the stores and queues.
pub struct ControllerState {
    pub group_snapshots: Arc<ObjectStore<VolumeGroupSnapshot>>,
    pub contents: Arc<ObjectStore<VolumeGroupSnapshotContent>>,
    pub snapshots: Arc<ObjectStore<VolumeSnapshot>>,
    pub pvs: Arc<ObjectStore<PersistentVolume>>,
    pub group_queue: Arc<WorkQueue>,
    pub content_queue: Arc<WorkQueue>,
    pub snapshot_queue: Arc<WorkQueue>,
}

impl ControllerState {
    pub fn new(settings: &Settings) -> Self {
        let queue =
            || WorkQueue::new(settings.retry_interval_start, settings.retry_interval_max);
        ControllerState {
            group_snapshots: Arc::new(ObjectStore::new()),
            contents: Arc::new(ObjectStore::new()),
            snapshots: Arc::new(ObjectStore::new()),
            pvs: Arc::new(ObjectStore::new()),
            group_queue: queue(),
            content_queue: queue(),
            snapshot_queue: queue(),
        }
    }
}

/// Run the controller until a shutdown signal arrives. In-flight
/// reconciliations finish; queued keys are drained; watchers are aborted.
pub async fn run_controller(client: Client, settings: Settings) -> Result<()> {
    ensure_crds(&client).await?;

    let state = Arc::new(ControllerState::new(&settings));
    let api_client: Arc<dyn ObjectClient> = Arc::new(KubeObjectClient::new(
        client.clone(),
        settings.event_component.clone(),
    ));

    let request_reconciler = Arc::new(GroupSnapshotReconciler::new(
        api_client.clone(),
        PvIndex::new(state.pvs.clone()),
        MemberIndex::new(state.snapshots.clone()),
        Arc::new(NoRestoresInFlight),
    ));
    let content_reconciler = Arc::new(ContentReconciler::new(
        api_client.clone(),
        state.group_queue.clone(),
    ));

    let watchers = vec![
        spawn_watch(
            Api::<VolumeGroupSnapshot>::all(client.clone()),
            state.group_snapshots.clone(),
            Some(state.group_queue.clone()),
        ),
        spawn_watch(
            Api::<VolumeGroupSnapshotContent>::all(client.clone()),
            state.contents.clone(),
            Some(state.content_queue.clone()),
        ),
        spawn_watch(
            Api::<VolumeSnapshot>::all(client.clone()),
            state.snapshots.clone(),
            Some(state.snapshot_queue.clone()),
        ),
        spawn_watch(
            Api::<PersistentVolume>::all(client.clone()),
            state.pvs.clone(),
            None,
        ),
    ];

    let mut workers = Vec::with_capacity(settings.workers * 3);
    for _ in 0..settings.workers {
        workers.push(tokio::spawn(group_worker(
            state.clone(),
            request_reconciler.clone(),
        )));
        workers.push(tokio::spawn(content_worker(
            state.clone(),
            content_reconciler.clone(),
        )));
        workers.push(tokio::spawn(snapshot_worker(state.clone())));
    }

    let resync = spawn_resync(state.clone(), settings.resync);

    info!(workers = settings.workers, "controller started");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received, draining queues");

    state.group_queue.shut_down();
    state.content_queue.shut_down();
    state.snapshot_queue.shut_down();
    for worker in workers {
        let _ = worker.await;
    }
    resync.abort();
    for handle in watchers {
        handle.abort();
    }
    Ok(())
}

/// Install the CRDs this controller serves, tolerating already-installed
/// ones so upgrades do not clobber user edits.
async fn ensure_crds(client: &Client) -> Result<()> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let crds = [
        VolumeGroupSnapshot::crd(),
        VolumeGroupSnapshotContent::crd(),
        VolumeGroupSnapshotClass::crd(),
        VolumeSnapshot::crd(),
        VolumeSnapshotContent::crd(),
    ];
    for crd in crds {
        let name = crd.name_any();
        match api.get(&name).await {
            Ok(_) => debug!(crd = %name, "CRD present"),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                info!(crd = %name, "installing CRD");
                debug!(
                    manifest = %serde_yaml::to_string(&crd).unwrap_or_default(),
                    "CRD manifest"
                );
                match api.create(&PostParams::default(), &crd).await {
                    Ok(_) => {}
                    Err(kube::Error::Api(e)) if e.code == 409 => {}
                    Err(e) => return Err(Error::KubeError(e)),
                }
            }
            Err(e) => return Err(Error::KubeError(e)),
        }
    }
    Ok(())
}

/// Fold a watch stream into a store, enqueueing each touched key.
fn spawn_watch<K>(
    api: Api<K>,
    store: Arc<ObjectStore<K>>,
    queue: Option<Arc<WorkQueue>>,
) -> JoinHandle<()>
where
    K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned + Send + 'static,
{
    tokio::spawn(async move {
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(obj)) | Ok(watcher::Event::InitApply(obj)) => {
                    let key = obj.store_key();
                    store.put(obj);
                    if let Some(queue) = &queue {
                        queue.add(key);
                    }
                }
                Ok(watcher::Event::Delete(obj)) => {
                    let key = obj.store_key();
                    store.delete(&key);
                    if let Some(queue) = &queue {
                        queue.add(key);
                    }
                }
                Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => {}
                Err(e) => warn!(error = %e, "watch stream error"),
            }
        }
    })
}

async fn group_worker(state: Arc<ControllerState>, reconciler: Arc<GroupSnapshotReconciler>) {
    while let Some(key) = state.group_queue.get().await {
        let success = match state.group_snapshots.get(&key) {
            // Deleted since it was queued; the cascade already ran under its
            // finalizer.
            None => true,
            Some(vgs) => handle_result(&key, reconciler.reconcile(&vgs).await),
        };
        state.group_queue.done(&key, success);
    }
}

async fn content_worker(state: Arc<ControllerState>, reconciler: Arc<ContentReconciler>) {
    while let Some(key) = state.content_queue.get().await {
        let success = match state.contents.get(&key) {
            None => true,
            Some(vgsc) => handle_result(&key, reconciler.reconcile(&vgsc).await),
        };
        state.content_queue.done(&key, success);
    }
}

/// Member snapshots carry no reconcile logic of their own; a change simply
/// nudges the owning request so readiness and deletion observe it.
async fn snapshot_worker(state: Arc<ControllerState>) {
    while let Some(key) = state.snapshot_queue.get().await {
        if let Some(snapshot) = state.snapshots.get(&key) {
            if let (Some(namespace), Some(group)) = (
                snapshot.metadata.namespace.as_deref(),
                snapshot.group_snapshot_name(),
            ) {
                state.group_queue.add(format!("{}/{}", namespace, group));
            }
        }
        state.snapshot_queue.done(&key, true);
    }
}

fn handle_result(key: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) if e.is_retriable() => {
            warn!(key, error = %e, "reconcile failed, re-queueing with backoff");
            false
        }
        Err(e) => {
            // Terminal: surfaced via status and event, cleared by user edit.
            warn!(key, error = %e, "reconcile failed terminally");
            true
        }
    }
}

/// Periodically re-enqueue every known key, the informer-resync analog that
/// lets the controller converge even when an event was missed.
fn spawn_resync(state: Arc<ControllerState>, every: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            debug!("resync: re-enqueueing all known objects");
            for key in state.group_snapshots.keys() {
                state.group_queue.add(key);
            }
            for key in state.contents.keys() {
                state.content_queue.add(key);
            }
            for key in state.snapshots.keys() {
                state.snapshot_queue.add(key);
            }
        }
    })
}
