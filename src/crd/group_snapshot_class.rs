//! VolumeGroupSnapshotClass Custom Resource Definition

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::DeletionPolicy;

/// Annotation marking a class as the default for its driver.
pub const IS_DEFAULT_CLASS_ANNOTATION: &str = "groupsnapshot.storage.k8s.io/is-default-class";

/// Class parameter naming the secret the sidecar needs to delete snapshots.
pub const PARAM_DELETION_SECRET_NAME: &str = "deletion-secret-name";
/// Class parameter naming the namespace of the deletion secret.
pub const PARAM_DELETION_SECRET_NAMESPACE: &str = "deletion-secret-namespace";

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "groupsnapshot.storage.k8s.io",
    version = "v1beta1",
    kind = "VolumeGroupSnapshotClass",
    shortname = "vgsclass",
    printcolumn = r#"{"name":"Driver","type":"string","jsonPath":".spec.driver"}"#,
    printcolumn = r#"{"name":"DeletionPolicy","type":"string","jsonPath":".spec.deletionPolicy"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupSnapshotClassSpec {
    /// CSI driver this class provisions group snapshots for
    pub driver: String,

    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// Opaque driver parameters, passed through to the sidecar. The
    /// deletion-secret keys are additionally copied onto provisioned
    /// contents as annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl VolumeGroupSnapshotClass {
    /// Whether this class carries the default-class annotation.
    pub fn is_default(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(IS_DEFAULT_CLASS_ANNOTATION))
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    /// The deletion-secret reference from the class parameters, if any.
    pub fn deletion_secret(&self) -> Option<(String, String)> {
        let name = self.spec.parameters.get(PARAM_DELETION_SECRET_NAME)?;
        let namespace = self.spec.parameters.get(PARAM_DELETION_SECRET_NAMESPACE)?;
        Some((name.clone(), namespace.clone()))
    }
}
