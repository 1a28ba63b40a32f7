//! Deterministic identifiers
//!
//! Object names are pure functions of the owning request's UID (plus the
//! member volume handle for the fanned-out pair), so a restarted controller
//! can recompute what it would have created and find it. The hash is fixed
//! at SHA-256, lowercase hex; changing it would orphan existing objects.

use sha2::{Digest, Sha256};

/// Content name for a dynamically provisioned group snapshot.
pub fn group_snapshot_content_name(uid: &str) -> String {
    format!("groupsnapcontent-{}", uid)
}

/// Name of the individual snapshot fanned out for one member volume.
pub fn member_snapshot_name(uid: &str, volume_handle: &str) -> String {
    format!("snapshot-{}", member_hash(uid, volume_handle))
}

/// Name of the individual snapshot content fanned out for one member volume.
pub fn member_snapshot_content_name(uid: &str, volume_handle: &str) -> String {
    format!("snapcontent-{}", member_hash(uid, volume_handle))
}

fn member_hash(uid: &str, volume_handle: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(uid.as_bytes());
    hasher.update(volume_handle.as_bytes());
    hex::encode(hasher.finalize())
}
