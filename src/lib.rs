//! Reconciliation core for CSI volume group snapshots.
//!
//! A VolumeGroupSnapshot names a set of PersistentVolumeClaims (by label
//! selector, or by pointing at a pre-provisioned content object); the
//! controller binds it to a VolumeGroupSnapshotContent, waits for the CSI
//! sidecar to cut the group snapshot, fans the result out into one
//! VolumeSnapshot / VolumeSnapshotContent pair per member volume, and
//! propagates readiness back to the request. Deletion cascades top-down,
//! guarded by finalizers.

pub mod cache;
pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod queue;

pub use error::{Error, Result};
