//! Custom Resource Definitions for the group snapshot API
//!
//! The group kinds live under `groupsnapshot.storage.k8s.io/v1beta1`; the
//! individual member kinds created by fan-out live under
//! `snapshot.storage.k8s.io/v1`.

mod group_snapshot;
mod group_snapshot_class;
mod group_snapshot_content;
mod types;
mod volume_snapshot;


pub use group_snapshot::{
    VolumeGroupSnapshot, VolumeGroupSnapshotSource, VolumeGroupSnapshotSpec,
    VolumeGroupSnapshotStatus,
};
pub use group_snapshot_class::{
    VolumeGroupSnapshotClass, VolumeGroupSnapshotClassSpec, IS_DEFAULT_CLASS_ANNOTATION,
    PARAM_DELETION_SECRET_NAME, PARAM_DELETION_SECRET_NAMESPACE,
};
pub use group_snapshot_content::{
    VolumeGroupSnapshotContent, VolumeGroupSnapshotContentSource, VolumeGroupSnapshotContentSpec,
    VolumeGroupSnapshotContentStatus,
};
pub use types::*;
pub use volume_snapshot::{
    VolumeSnapshot, VolumeSnapshotContent, VolumeSnapshotContentSource,
    VolumeSnapshotContentSpec, VolumeSnapshotContentStatus, VolumeSnapshotSource,
    VolumeSnapshotSpec, VolumeSnapshotStatus, GROUP_SNAPSHOT_NAME_LABEL,
};
