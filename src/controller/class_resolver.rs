//! Group snapshot class lookup and defaulting

use kube::ResourceExt;
use tracing::info;

use crate::client::ObjectClient;
use crate::crd::{VolumeGroupSnapshot, VolumeGroupSnapshotClass};
use crate::{Error, Result};

/// Resolve the class a request provisions with.
///
/// Pre-provisioned requests need no class. A named class is fetched and
/// must exist. Without a name, the default class for the group's driver is
/// looked up and written back into the request spec, so later passes take
/// the named-class path; zero or several matching defaults are terminal
/// validation errors.
pub async fn resolve_class(
    client: &dyn ObjectClient,
    vgs: &VolumeGroupSnapshot,
) -> Result<(Option<VolumeGroupSnapshotClass>, VolumeGroupSnapshot)> {
    let key = vgs.key();

    if vgs.spec.is_pre_provisioned() {
        return Ok((None, vgs.clone()));
    }

    if let Some(class_name) = &vgs.spec.volume_group_snapshot_class_name {
        return match client.get_group_snapshot_class(class_name).await? {
            Some(class) => Ok((Some(class), vgs.clone())),
            None => Err(Error::validation(
                &key,
                format!("group snapshot class {} not found", class_name),
            )),
        };
    }

    let driver = driver_for_selector(client, vgs).await?;
    let classes = client.list_group_snapshot_classes().await?;
    let mut defaults: Vec<VolumeGroupSnapshotClass> = classes
        .into_iter()
        .filter(|class| class.is_default() && class.spec.driver == driver)
        .collect();

    match defaults.len() {
        0 => Err(Error::validation(
            &key,
            format!(
                "cannot find default group snapshot class for driver {}",
                driver
            ),
        )),
        1 => {
            let class = defaults.remove(0);
            info!(key, class = %class.name_any(), "defaulted group snapshot class");
            let mut updated = vgs.clone();
            updated.spec.volume_group_snapshot_class_name = Some(class.name_any());
            let persisted = client.update_group_snapshot(&updated).await?;
            Ok((Some(class), persisted))
        }
        n => Err(Error::validation(
            &key,
            format!(
                "ambiguous default: {} group snapshot classes are marked default for driver {}",
                n, driver
            ),
        )),
    }
}

/// CSI driver of the first bound claim matching the request's selector.
async fn driver_for_selector(
    client: &dyn ObjectClient,
    vgs: &VolumeGroupSnapshot,
) -> Result<String> {
    let key = vgs.key();
    let selector = vgs.spec.source.selector.as_ref().ok_or_else(|| {
        Error::validation(&key, "source.selector is required for dynamic provisioning")
    })?;
    let namespace = vgs.namespace().unwrap_or_default();

    let claims = client
        .list_persistent_volume_claims(&namespace, selector)
        .await?;
    for claim in &claims {
        let volume_name = match claim.spec.as_ref().and_then(|s| s.volume_name.as_deref()) {
            Some(name) => name,
            None => continue,
        };
        let pv = match client.get_persistent_volume(volume_name).await? {
            Some(pv) => pv,
            None => continue,
        };
        return match pv.spec.as_ref().and_then(|s| s.csi.as_ref()) {
            Some(csi) => Ok(csi.driver.clone()),
            None => Err(Error::validation(
                &key,
                format!("persistent volume {} is not a CSI volume", volume_name),
            )),
        };
    }

    Err(Error::validation(
        &key,
        "no bound claim matches source.selector, cannot determine driver",
    ))
}
