#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use crate::controller::deletion::RestorePolicy;
    use crate::controller::events::{
        BEING_DELETED_ANNOTATION, REASON_SNAPSHOT_DELETE_PENDING,
    };
    use crate::controller::finalizers::{
        has_finalizer, GROUP_SNAPSHOT_BOUND_FINALIZER, MEMBER_SNAPSHOT_FINALIZER,
    };
    use crate::controller::fixtures::{
        deleting_group_snapshot, dynamic_content, group_snapshot, TestContext, NS,
    };
    use crate::controller::names;
    use crate::crd::{
        DeletionPolicy, VolumeGroupSnapshot, VolumeGroupSnapshotStatus, VolumeSnapshot,
        VolumeSnapshotSource, VolumeSnapshotSpec, GROUP_SNAPSHOT_NAME_LABEL,
    };

    fn member_snapshot(name: &str, group: &str) -> VolumeSnapshot {
        let mut labels = BTreeMap::new();
        labels.insert(GROUP_SNAPSHOT_NAME_LABEL.to_string(), group.to_string());
        VolumeSnapshot {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NS.to_string()),
                labels: Some(labels),
                finalizers: Some(vec![MEMBER_SNAPSHOT_FINALIZER.to_string()]),
                ..Default::default()
            },
            spec: VolumeSnapshotSpec {
                source: VolumeSnapshotSource::default(),
                volume_snapshot_class_name: None,
            },
            status: None,
        }
    }

    /// Request bound to its content, mid-deletion, with two members.
    fn seed_deleting_group(
        ctx: &TestContext,
        policy: DeletionPolicy,
    ) -> (VolumeGroupSnapshot, String) {
        let mut vgs = group_snapshot("g", "u", &[("app", "pg")]);
        let content_name = names::group_snapshot_content_name("u");
        vgs.status = Some(VolumeGroupSnapshotStatus {
            bound_volume_group_snapshot_content_name: Some(content_name.clone()),
            ready_to_use: Some(true),
            ..Default::default()
        });
        let vgs = deleting_group_snapshot(&vgs);
        ctx.seed_group_snapshot(&vgs);

        let mut content = dynamic_content(&vgs, "mock", &["h1", "h2"]);
        content.spec.deletion_policy = policy;
        ctx.seed_content(&content);

        ctx.seed_member_snapshot(&member_snapshot("snap-1", "g"));
        ctx.seed_member_snapshot(&member_snapshot("snap-2", "g"));

        (vgs, content_name)
    }

    #[tokio::test]
    async fn delete_policy_cascades_and_keeps_the_finalizer() {
        let ctx = TestContext::new();
        let (vgs, content_name) = seed_deleting_group(&ctx, DeletionPolicy::Delete);

        ctx.request_reconciler().reconcile(&vgs).await.unwrap();

        // Content deletion was issued.
        assert!(ctx.stored_content(&content_name).is_none());
        // Both members are gone.
        assert!(ctx.client.snapshots.lock().unwrap().is_empty());
        // The bound finalizer must stay until the sidecar confirms by
        // removing the content.
        let stored = ctx.stored_group_snapshot("g");
        assert!(has_finalizer(&stored.metadata, GROUP_SNAPSHOT_BOUND_FINALIZER));
    }

    #[tokio::test]
    async fn second_pass_after_cascade_releases_the_finalizer() {
        let ctx = TestContext::new();
        let (vgs, _) = seed_deleting_group(&ctx, DeletionPolicy::Delete);

        let reconciler = ctx.request_reconciler();
        reconciler.reconcile(&vgs).await.unwrap();
        // The content is gone now; rerun as the content-deleted event would.
        let stored = ctx.stored_group_snapshot("g");
        reconciler.reconcile(&stored).await.unwrap();

        let stored = ctx.stored_group_snapshot("g");
        assert!(!has_finalizer(&stored.metadata, GROUP_SNAPSHOT_BOUND_FINALIZER));
    }

    #[tokio::test]
    async fn retain_policy_keeps_content_and_releases_immediately() {
        let ctx = TestContext::new();
        let (vgs, content_name) = seed_deleting_group(&ctx, DeletionPolicy::Retain);

        ctx.request_reconciler().reconcile(&vgs).await.unwrap();

        let content = ctx.stored_content(&content_name).expect("content retained");
        assert_eq!(
            content
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(BEING_DELETED_ANNOTATION))
                .map(String::as_str),
            Some("yes")
        );
        assert!(ctx.client.snapshots.lock().unwrap().is_empty());

        let stored = ctx.stored_group_snapshot("g");
        assert!(!has_finalizer(&stored.metadata, GROUP_SNAPSHOT_BOUND_FINALIZER));
    }

    #[tokio::test]
    async fn being_deleted_marker_is_set_before_the_delete() {
        let ctx = TestContext::new();
        let (vgs, content_name) = seed_deleting_group(&ctx, DeletionPolicy::Retain);

        // Run twice; the marker patch must be idempotent.
        let reconciler = ctx.request_reconciler();
        reconciler.reconcile(&vgs).await.unwrap();
        let marked = ctx.stored_content(&content_name).unwrap();
        let version = marked.metadata.resource_version.clone();
        let stored = ctx.stored_group_snapshot("g");
        reconciler.reconcile(&stored).await.unwrap();

        let still_marked = ctx.stored_content(&content_name).unwrap();
        assert_eq!(still_marked.metadata.resource_version, version);
    }

    struct RestoreInFlight;

    impl RestorePolicy for RestoreInFlight {
        fn snapshot_in_use(&self, _namespace: &str, _snapshot_name: &str) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn in_use_member_blocks_the_whole_cascade() {
        let ctx = TestContext::new();
        let (vgs, content_name) = seed_deleting_group(&ctx, DeletionPolicy::Delete);

        ctx.request_reconciler_with(Arc::new(RestoreInFlight))
            .reconcile(&vgs)
            .await
            .unwrap();

        assert_eq!(
            ctx.client
                .events_with_reason(REASON_SNAPSHOT_DELETE_PENDING)
                .len(),
            1
        );
        // Nothing was deleted and nothing released.
        assert!(ctx.stored_content(&content_name).is_some());
        assert_eq!(ctx.client.snapshots.lock().unwrap().len(), 2);
        let stored = ctx.stored_group_snapshot("g");
        assert!(has_finalizer(&stored.metadata, GROUP_SNAPSHOT_BOUND_FINALIZER));
    }

    #[tokio::test]
    async fn unbound_request_without_content_just_releases() {
        let ctx = TestContext::new();
        let vgs = deleting_group_snapshot(&group_snapshot("g", "u", &[("app", "pg")]));
        ctx.seed_group_snapshot(&vgs);

        ctx.request_reconciler().reconcile(&vgs).await.unwrap();

        let stored = ctx.stored_group_snapshot("g");
        assert!(!has_finalizer(&stored.metadata, GROUP_SNAPSHOT_BOUND_FINALIZER));
    }

    #[tokio::test]
    async fn foreign_content_at_the_deterministic_name_is_ignored() {
        let ctx = TestContext::new();
        let vgs = deleting_group_snapshot(&group_snapshot("g", "u", &[("app", "pg")]));
        ctx.seed_group_snapshot(&vgs);
        // A content at our deterministic name but bound elsewhere.
        let mut content = dynamic_content(&vgs, "mock", &["h1"]);
        content.spec.volume_group_snapshot_ref.uid = Some("someone-else".to_string());
        ctx.seed_content(&content);

        ctx.request_reconciler().reconcile(&vgs).await.unwrap();

        // Treated as absent: not deleted, not annotated, finalizer released.
        let untouched = ctx.stored_content(&content.key()).unwrap();
        assert!(untouched.metadata.annotations.is_none());
        let stored = ctx.stored_group_snapshot("g");
        assert!(!has_finalizer(&stored.metadata, GROUP_SNAPSHOT_BOUND_FINALIZER));
    }
}
