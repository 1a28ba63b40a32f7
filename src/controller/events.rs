//! Event reason tags and annotation keys persisted on objects
//!
//! The reason strings are part of the operator's user-facing surface;
//! dashboards and runbooks grep for them.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::ResourceExt;

pub const REASON_VALIDATION_ERROR: &str = "GroupSnapshotValidationError";
pub const REASON_CONTENT_MISSING: &str = "GroupSnapshotContentMissing";
pub const REASON_CONTENT_MISMATCH: &str = "GroupSnapshotContentMismatch";
pub const REASON_CONTENT_MISBOUND: &str = "GroupSnapshotContentMisbound";
pub const REASON_MISBOUND: &str = "GroupSnapshotMisbound";
pub const REASON_BIND_FAILED: &str = "GroupSnapshotBindFailed";
pub const REASON_STATUS_UPDATE_FAILED: &str = "GroupSnapshotStatusUpdateFailed";
pub const REASON_CREATE_CONTENT_FAILED: &str = "CreateGroupSnapshotContentFailed";
pub const REASON_CREATING: &str = "CreatingGroupSnapshot";
pub const REASON_CREATED: &str = "GroupSnapshotCreated";
pub const REASON_READY: &str = "GroupSnapshotReady";
pub const REASON_CONTENT_DELETE_ERROR: &str = "GroupSnapshotContentObjectDeleteError";
pub const REASON_SNAPSHOT_DELETE_PENDING: &str = "SnapshotDeletePending";
pub const REASON_SNAPSHOT_DELETE_ERROR: &str = "SnapshotDeleteError";

/// Set on a VolumeGroupSnapshotContent while its deletion cascades.
pub const BEING_DELETED_ANNOTATION: &str =
    "groupsnapshot.storage.k8s.io/volumegroupsnapshot-being-deleted";

/// Deletion-secret reference forwarded to the sidecar.
pub const DELETION_SECRET_NAME_ANNOTATION: &str =
    "groupsnapshot.storage.k8s.io/deletion-secret-name";
pub const DELETION_SECRET_NAMESPACE_ANNOTATION: &str =
    "groupsnapshot.storage.k8s.io/deletion-secret-namespace";

/// Backend group handle stamped on each fanned-out member content.
pub const GROUP_SNAPSHOT_HANDLE_ANNOTATION: &str =
    "groupsnapshot.storage.k8s.io/group-snapshot-handle";

/// Reference to `obj` for the `involvedObject` field of an event.
pub fn object_reference<K>(obj: &K) -> ObjectReference
where
    K: kube::Resource<DynamicType = ()>,
{
    ObjectReference {
        api_version: Some(K::api_version(&()).to_string()),
        kind: Some(K::kind(&()).to_string()),
        name: Some(obj.name_any()),
        namespace: obj.namespace(),
        uid: obj.uid(),
        resource_version: obj.resource_version(),
        ..Default::default()
    }
}

/// Escape a key for use inside a JSON pointer (RFC 6901): `~` then `/`.
pub fn pointer_escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}
