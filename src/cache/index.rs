//! Secondary indexes over the object stores

use std::sync::Arc;

use k8s_openapi::api::core::v1::PersistentVolume;

use crate::cache::ObjectStore;
use crate::crd::VolumeSnapshot;

/// Outcome of a PV lookup by `(driver, volumeHandle)`. Zero and multiple
/// matches are distinct conditions: the fan-out engine tolerates a missing
/// PV (the claim name is simply left empty) but must not guess between
/// several candidates.
pub enum PvMatch {
    None,
    One(Box<PersistentVolume>),
    Ambiguous(usize),
}

/// Index of PersistentVolumes by CSI `(driver, volumeHandle)`.
pub struct PvIndex {
    pvs: Arc<ObjectStore<PersistentVolume>>,
}

impl PvIndex {
    pub fn new(pvs: Arc<ObjectStore<PersistentVolume>>) -> Self {
        PvIndex { pvs }
    }

    pub fn find(&self, driver: &str, volume_handle: &str) -> PvMatch {
        let mut matches: Vec<PersistentVolume> = self
            .pvs
            .values()
            .into_iter()
            .filter(|pv| pv_matches(pv, driver, volume_handle))
            .collect();
        match matches.len() {
            0 => PvMatch::None,
            1 => PvMatch::One(Box::new(matches.remove(0))),
            n => PvMatch::Ambiguous(n),
        }
    }
}

fn pv_matches(pv: &PersistentVolume, driver: &str, volume_handle: &str) -> bool {
    pv.spec
        .as_ref()
        .and_then(|spec| spec.csi.as_ref())
        .map(|csi| csi.driver == driver && csi.volume_handle == volume_handle)
        .unwrap_or(false)
}

/// Index of member VolumeSnapshots by `(namespace, parent group name)`,
/// keyed on the group-snapshot-name label stamped by the fan-out engine.
pub struct MemberIndex {
    snapshots: Arc<ObjectStore<VolumeSnapshot>>,
}

impl MemberIndex {
    pub fn new(snapshots: Arc<ObjectStore<VolumeSnapshot>>) -> Self {
        MemberIndex { snapshots }
    }

    pub fn members_of(&self, namespace: &str, group_name: &str) -> Vec<VolumeSnapshot> {
        self.snapshots
            .values()
            .into_iter()
            .filter(|snap| {
                snap.metadata.namespace.as_deref() == Some(namespace)
                    && snap.group_snapshot_name() == Some(group_name)
            })
            .collect()
    }
}
