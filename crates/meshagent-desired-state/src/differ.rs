//! Manifest differ
//!
//! Converges live objects of ONE kind onto a desired set: prune what is no
//! longer wanted, apply what changed, leave everything else alone. Working
//! one kind at a time means a pass can never prune a kind it was not asked
//! to manage.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use tracing::{debug, error, info, warn};

use meshagent_common::kube_utils::{annotations_of, labels_of, name_of, namespace_of, spec_of};
use meshagent_common::{Error, Notifier, ObjectStore, Result};

use crate::manifest::DesiredObject;
use crate::messages;

/// What one `reconcile_kind` pass did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KindReport {
    /// `namespace/name` of applied objects
    pub applied: Vec<String>,
    /// `namespace/name` of pruned objects
    pub deleted: Vec<String>,
    /// Objects already in the desired state
    pub unchanged: usize,
    /// `namespace/name` of applies rejected as not yet configured
    pub rejected: Vec<String>,
}

impl KindReport {
    /// Whether the pass wrote anything
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && self.deleted.is_empty()
    }

    /// Fold another pass's results into this one
    pub fn merge(&mut self, other: KindReport) {
        self.applied.extend(other.applied);
        self.deleted.extend(other.deleted);
        self.unchanged += other.unchanged;
        self.rejected.extend(other.rejected);
    }
}

/// Result of a single-object create-or-update
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The object did not exist
    Created,
    /// The object existed and differed
    Updated,
    /// The object already matched
    Unchanged,
}

/// Whether a live object must be rewritten to match the desired one.
///
/// Labels, annotations and spec are compared structurally; anything else
/// (status, server-managed metadata) is ignored.
pub fn needs_update(live: &DynamicObject, desired: &DynamicObject) -> bool {
    let labels_equal = labels_of(live) == labels_of(desired);
    let annotations_equal = annotations_of(live) == annotations_of(desired);
    let spec_equal = spec_of(live) == spec_of(desired);
    !(labels_equal && annotations_equal && spec_equal)
}

/// Whether a live object of a kind no pass manages differs from the manifest.
///
/// Such kinds carry their payload anywhere (`data`, `rules`, ...), so every
/// top-level field except `status` is compared along with labels and
/// annotations.
pub fn payload_differs(live: &DynamicObject, desired: &DynamicObject) -> bool {
    labels_of(live) != labels_of(desired)
        || annotations_of(live) != annotations_of(desired)
        || without_status(&live.data) != without_status(&desired.data)
}

fn without_status(data: &serde_json::Value) -> serde_json::Value {
    let mut data = data.clone();
    if let Some(fields) = data.as_object_mut() {
        fields.remove("status");
    }
    data
}

fn object_key(obj: &DynamicObject) -> String {
    format!("{}/{}", namespace_of(obj), name_of(obj))
}

fn namespace_param(obj: &DynamicObject) -> Option<&str> {
    Some(namespace_of(obj)).filter(|ns| !ns.is_empty())
}

/// Prune/apply engine over an object store
#[derive(Clone)]
pub struct Differ {
    store: Arc<dyn ObjectStore>,
    notifier: Arc<dyn Notifier>,
    field_manager: String,
}

impl Differ {
    /// Create a differ writing under the given field manager
    pub fn new(
        store: Arc<dyn ObjectStore>,
        notifier: Arc<dyn Notifier>,
        field_manager: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            field_manager: field_manager.into(),
        }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Converge live objects of `ar` onto `desired`.
    ///
    /// - an empty `desired` deletes every live object of the kind
    /// - otherwise, in each namespace that appears in `desired`, live objects
    ///   whose name is absent are deleted
    /// - each desired object is applied only when [`needs_update`] says so
    ///
    /// A "not configured" apply rejection is not alerted on and does not stop
    /// the pass, but the pass still ends in `Error::NotConfigured`. Any other
    /// failure is reported and aborts the pass with the original error.
    pub async fn reconcile_kind(
        &self,
        ar: &ApiResource,
        desired: &[DynamicObject],
    ) -> Result<KindReport> {
        if let Some(stray) = desired
            .iter()
            .find(|o| o.types.as_ref().is_some_and(|t| t.kind != ar.kind))
        {
            return Err(Error::internal_with_context(
                "reconcile_kind",
                format!("{} passed to a {} pass", object_key(stray), ar.kind),
            ));
        }

        let mut report = KindReport::default();

        if desired.is_empty() {
            info!(kind = %ar.kind, "desired set is empty, deleting every live object of the kind");
            for live in self.store.list(ar, None, None).await? {
                self.prune(ar, &live, &mut report).await?;
            }
            return Ok(report);
        }

        let mut wanted: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for obj in desired {
            wanted
                .entry(namespace_of(obj))
                .or_default()
                .insert(name_of(obj));
        }

        for (namespace, names) in &wanted {
            let ns_param = Some(*namespace).filter(|ns| !ns.is_empty());
            for live in self.store.list(ar, ns_param, None).await? {
                if namespace_of(&live) == *namespace && !names.contains(name_of(&live)) {
                    self.prune(ar, &live, &mut report).await?;
                }
            }
        }

        let mut rejection = None;
        for obj in desired {
            self.apply_if_changed(ar, obj, needs_update, &mut report, &mut rejection)
                .await?;
        }

        match rejection {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Apply manifest documents of kinds no pass prunes.
    ///
    /// Each document is applied when [`payload_differs`] says so; nothing is
    /// ever deleted. Failures are handled as in [`Differ::reconcile_kind`].
    pub async fn apply_unmanaged(&self, documents: &[DesiredObject]) -> Result<KindReport> {
        let mut report = KindReport::default();
        let mut rejection = None;
        for doc in documents {
            self.apply_if_changed(
                &doc.meta.api_resource,
                &doc.object,
                payload_differs,
                &mut report,
                &mut rejection,
            )
            .await?;
        }

        match rejection {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Apply one desired object unless `differs` says its live counterpart
    /// already matches.
    ///
    /// The first "not configured" rejection is kept in `rejection` and the
    /// caller carries on; any other failure is reported and returned.
    async fn apply_if_changed(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
        differs: fn(&DynamicObject, &DynamicObject) -> bool,
        report: &mut KindReport,
        rejection: &mut Option<Error>,
    ) -> Result<()> {
        let key = object_key(obj);
        if let Some(live) = self.store.get(ar, namespace_param(obj), name_of(obj)).await? {
            if !differs(&live, obj) {
                debug!(kind = %ar.kind, object = %key, "unchanged, skipping apply");
                report.unchanged += 1;
                return Ok(());
            }
        }

        match self.store.apply(ar, obj, &self.field_manager).await {
            Ok(_) => {
                info!(kind = %ar.kind, object = %key, "applied");
                report.applied.push(key);
                self.notify(&messages::applied(&ar.kind, obj)).await;
                Ok(())
            }
            Err(e) if e.mentions_not_configured() => {
                warn!(kind = %ar.kind, object = %key, error = %e, "apply rejected, prerequisite not configured yet");
                report.rejected.push(key);
                if rejection.is_none() {
                    *rejection = Some(Error::not_configured(
                        &ar.kind,
                        namespace_of(obj),
                        name_of(obj),
                        e.to_string(),
                    ));
                }
                Ok(())
            }
            Err(e) => {
                error!(kind = %ar.kind, object = %key, error = %e, "apply failed");
                self.notify(&messages::apply_failed(&ar.kind, obj, &e)).await;
                Err(e)
            }
        }
    }

    /// Create `obj`, or update it carrying the live resource version forward.
    ///
    /// A stale version surfaces as `Error::Conflict`; it is never retried here.
    pub async fn create_or_update(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<WriteOutcome> {
        match self.store.get(ar, namespace_param(obj), name_of(obj)).await? {
            None => {
                self.store.create(ar, obj).await?;
                debug!(kind = %ar.kind, object = %object_key(obj), "created");
                Ok(WriteOutcome::Created)
            }
            Some(live) if !needs_update(&live, obj) => Ok(WriteOutcome::Unchanged),
            Some(live) => {
                let mut next = obj.clone();
                next.metadata.resource_version = live.metadata.resource_version.clone();
                self.store.update(ar, &next).await?;
                debug!(kind = %ar.kind, object = %object_key(obj), "updated");
                Ok(WriteOutcome::Updated)
            }
        }
    }

    async fn prune(
        &self,
        ar: &ApiResource,
        live: &DynamicObject,
        report: &mut KindReport,
    ) -> Result<()> {
        let (namespace, name) = (namespace_of(live), name_of(live));
        self.notify(&messages::deleted(&ar.kind, namespace, name))
            .await;
        if self.store.delete(ar, namespace_param(live), name).await? {
            info!(kind = %ar.kind, namespace = %namespace, name = %name, "pruned");
            report.deleted.push(object_key(live));
        }
        Ok(())
    }

    /// Best-effort delivery; a failed notification is logged and dropped
    async fn notify(&self, message: &str) {
        if let Err(e) = self.notifier.notify(message).await {
            warn!(error = %e, "failed to deliver notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshagent_common::kube_utils::{build_api_resource, from_value};
    use meshagent_common::{MemoryObjectStore, RecordingNotifier};
    use serde_json::json;

    fn route_ar() -> ApiResource {
        build_api_resource("mesh-manager.meshmanager.com/v1", "IstioRoute")
    }

    fn route(ns: &str, name: &str, ratio: u32) -> DynamicObject {
        from_value(json!({
            "apiVersion": "mesh-manager.meshmanager.com/v1",
            "kind": "IstioRoute",
            "metadata": {"name": name, "namespace": ns, "labels": {"team": "web"}},
            "spec": {"services": [{
                "name": name,
                "namespace": ns,
                "type": "Canary",
                "commitHashes": ["r1", "r2"],
                "ratio": ratio
            }]}
        }))
        .unwrap()
    }

    struct Fixture {
        store: Arc<MemoryObjectStore>,
        notifier: Arc<RecordingNotifier>,
        differ: Differ,
    }

    fn fixture_with(notifier: RecordingNotifier) -> Fixture {
        let store = Arc::new(MemoryObjectStore::new());
        let notifier = Arc::new(notifier);
        let differ = Differ::new(store.clone(), notifier.clone(), "mesh-agent");
        Fixture {
            store,
            notifier,
            differ,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingNotifier::new())
    }

    #[test]
    fn payload_differs_ignores_only_status() {
        let cm = |level: &str, phase: &str| -> DynamicObject {
            from_value(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "tuning", "namespace": "ns1"},
                "data": {"level": level},
                "status": {"phase": phase}
            }))
            .unwrap()
        };
        assert!(!payload_differs(&cm("one", "a"), &cm("one", "b")));
        assert!(payload_differs(&cm("one", "a"), &cm("two", "a")));
        assert!(!needs_update(&cm("one", "a"), &cm("two", "a")));
    }

    #[test]
    fn needs_update_compares_labels_annotations_and_spec() {
        let a = route("ns1", "a", 30);
        assert!(!needs_update(&a, &a.clone()));

        let mut relabeled = a.clone();
        relabeled.metadata.labels = None;
        assert!(needs_update(&a, &relabeled));

        let mut annotated = a.clone();
        annotated.metadata.annotations = Some([("k".to_string(), "v".to_string())].into());
        assert!(needs_update(&a, &annotated));

        assert!(needs_update(&a, &route("ns1", "a", 40)));

        let mut versioned = a.clone();
        versioned.metadata.resource_version = Some("99".into());
        versioned.data["status"] = json!({"phase": "Ready"});
        assert!(!needs_update(&versioned, &a));
    }

    #[tokio::test]
    async fn empty_desired_set_deletes_every_live_object() {
        let f = fixture();
        let ar = route_ar();
        f.store.insert(&ar, route("ns1", "a", 30));
        f.store.insert(&ar, route("ns2", "b", 30));

        let report = f.differ.reconcile_kind(&ar, &[]).await.unwrap();

        assert_eq!(report.deleted, vec!["ns1/a", "ns2/b"]);
        assert!(report.applied.is_empty());
        assert!(f.store.names(&ar).is_empty());
        assert!(f
            .store
            .writes()
            .iter()
            .all(|w| w.starts_with("delete ")));
        assert_eq!(f.notifier.messages().len(), 2);
    }

    #[tokio::test]
    async fn equal_live_object_means_zero_writes() {
        let f = fixture();
        let ar = route_ar();
        f.store.insert(&ar, route("ns1", "a", 30));

        let report = f
            .differ
            .reconcile_kind(&ar, &[route("ns1", "a", 30)])
            .await
            .unwrap();

        assert_eq!(report.unchanged, 1);
        assert!(report.is_noop());
        assert!(f.store.writes().is_empty());
        assert!(f.notifier.messages().is_empty());
    }

    /// Story: the manifest names `a` in ns1 while ns1 runs `a` and `b`; `b`
    /// is pruned and `a` is only rewritten when it differs
    #[tokio::test]
    async fn story_prune_absent_and_update_changed() {
        let f = fixture();
        let ar = route_ar();
        f.store.insert(&ar, route("ns1", "a", 30));
        f.store.insert(&ar, route("ns1", "b", 30));

        let report = f
            .differ
            .reconcile_kind(&ar, &[route("ns1", "a", 30)])
            .await
            .unwrap();
        assert_eq!(report.deleted, vec!["ns1/b"]);
        assert_eq!(report.unchanged, 1);
        assert_eq!(f.store.writes(), vec!["delete IstioRoute ns1/b"]);

        f.store.clear_writes();
        let report = f
            .differ
            .reconcile_kind(&ar, &[route("ns1", "a", 50)])
            .await
            .unwrap();
        assert_eq!(report.applied, vec!["ns1/a"]);
        assert_eq!(f.store.writes(), vec!["apply IstioRoute ns1/a"]);
        let live = f.store.object(&ar, "ns1", "a").unwrap();
        assert_eq!(live.data["spec"]["services"][0]["ratio"], 50);
    }

    #[tokio::test]
    async fn prune_is_scoped_to_namespaces_in_the_desired_set() {
        let f = fixture();
        let ar = route_ar();
        f.store.insert(&ar, route("ns1", "stale", 30));
        f.store.insert(&ar, route("ns2", "other", 30));

        f.differ
            .reconcile_kind(&ar, &[route("ns1", "a", 30)])
            .await
            .unwrap();

        assert_eq!(f.store.names(&ar), vec!["ns1/a", "ns2/other"]);
    }

    #[tokio::test]
    async fn prune_never_touches_other_kinds() {
        let f = fixture();
        let ar = route_ar();
        let vs = build_api_resource("networking.istio.io/v1beta1", "VirtualService");
        f.store.insert(
            &vs,
            from_value(json!({
                "apiVersion": "networking.istio.io/v1beta1",
                "kind": "VirtualService",
                "metadata": {"name": "b", "namespace": "ns1"},
                "spec": {"hosts": ["b"]}
            }))
            .unwrap(),
        );

        f.differ
            .reconcile_kind(&ar, &[route("ns1", "a", 30)])
            .await
            .unwrap();
        assert_eq!(f.store.names(&vs), vec!["ns1/b"]);

        let err = f
            .differ
            .reconcile_kind(&vs, &[route("ns1", "a", 30)])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("passed to a VirtualService pass"));
    }

    #[tokio::test]
    async fn second_pass_is_a_noop() {
        let f = fixture();
        let ar = route_ar();
        let desired = vec![route("ns1", "a", 30), route("ns2", "b", 10)];

        let first = f.differ.reconcile_kind(&ar, &desired).await.unwrap();
        assert_eq!(first.applied.len(), 2);
        let after_first: Vec<_> = ["ns1/a", "ns2/b"]
            .iter()
            .map(|k| {
                let (ns, name) = k.split_once('/').unwrap();
                f.store.object(&ar, ns, name).unwrap()
            })
            .collect();

        f.store.clear_writes();
        let second = f.differ.reconcile_kind(&ar, &desired).await.unwrap();
        assert!(second.is_noop());
        assert_eq!(second.unchanged, 2);
        assert!(f.store.writes().is_empty());
        assert_eq!(
            f.store.object(&ar, "ns1", "a").unwrap().metadata.resource_version,
            after_first[0].metadata.resource_version
        );
    }

    #[tokio::test]
    async fn not_configured_rejection_is_quiet_but_not_success() {
        let f = fixture();
        let ar = route_ar();
        f.store
            .fail_apply("a", "IstioRoute ns1/a: mesh is unconfigured for this namespace");

        let err = f
            .differ
            .reconcile_kind(&ar, &[route("ns1", "a", 30), route("ns1", "b", 30)])
            .await
            .unwrap_err();

        assert!(err.is_expected_rejection());
        assert_eq!(f.store.names(&ar), vec!["ns1/b"]);
        let messages = f.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("`b`"));
    }

    #[tokio::test]
    async fn apply_failure_is_reported_and_aborts() {
        let f = fixture();
        let ar = route_ar();
        f.store.fail_apply("a", "admission webhook denied the request");

        let err = f
            .differ
            .reconcile_kind(&ar, &[route("ns1", "a", 30), route("ns1", "b", 30)])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("admission webhook denied"));
        assert!(f.store.names(&ar).is_empty());
        let messages = f.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with(":exclamation:"));
    }

    #[tokio::test]
    async fn failed_notification_never_masks_the_apply_error() {
        let f = fixture_with(RecordingNotifier::failing());
        let ar = route_ar();
        f.store.fail_apply("a", "admission webhook denied the request");

        let err = f
            .differ
            .reconcile_kind(&ar, &[route("ns1", "a", 30)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Kube { .. }));
        assert_eq!(f.notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn failed_notification_does_not_fail_a_good_pass() {
        let f = fixture_with(RecordingNotifier::failing());
        let ar = route_ar();
        f.store.insert(&ar, route("ns1", "old", 30));
        let report = f
            .differ
            .reconcile_kind(&ar, &[route("ns1", "a", 30)])
            .await
            .unwrap();
        assert_eq!(report.applied, vec!["ns1/a"]);
        assert_eq!(report.deleted, vec!["ns1/old"]);
    }

    #[tokio::test]
    async fn delete_failure_aborts_the_pass() {
        let f = fixture();
        let ar = route_ar();
        f.store.insert(&ar, route("ns1", "old", 30));
        f.store.fail_delete("old", "etcd unavailable");

        let err = f
            .differ
            .reconcile_kind(&ar, &[route("ns1", "a", 30)])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(f.store.object(&ar, "ns1", "a").is_none());
    }

    #[tokio::test]
    async fn unmanaged_documents_are_applied_but_never_pruned() {
        let f = fixture();
        let gw_ar = build_api_resource("networking.istio.io/v1beta1", "Gateway");
        f.store.insert(
            &gw_ar,
            from_value(json!({
                "apiVersion": "networking.istio.io/v1beta1",
                "kind": "Gateway",
                "metadata": {"name": "stale", "namespace": "ns1"},
                "spec": {"selector": {"istio": "ingressgateway"}}
            }))
            .unwrap(),
        );
        let docs = crate::manifest::parse_manifest(
            "apiVersion: networking.istio.io/v1beta1\nkind: Gateway\nmetadata:\n  name: fresh\n  namespace: ns1\nspec:\n  selector:\n    istio: ingressgateway\n",
        )
        .unwrap();

        let report = f.differ.apply_unmanaged(&docs).await.unwrap();
        assert_eq!(report.applied, vec!["ns1/fresh"]);
        assert_eq!(f.store.names(&gw_ar), vec!["ns1/fresh", "ns1/stale"]);

        let again = f.differ.apply_unmanaged(&docs).await.unwrap();
        assert!(again.is_noop());
        assert_eq!(again.unchanged, 1);
    }

    #[tokio::test]
    async fn unmanaged_data_changes_reach_the_cluster() {
        let f = fixture();
        let cm_ar = build_api_resource("v1", "ConfigMap");
        let manifest = |level: &str| {
            crate::manifest::parse_manifest(&format!(
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: tuning\n  namespace: ns1\ndata:\n  level: {}\n",
                level
            ))
            .unwrap()
        };

        f.differ.apply_unmanaged(&manifest("one")).await.unwrap();
        let report = f.differ.apply_unmanaged(&manifest("two")).await.unwrap();

        assert_eq!(report.applied, vec!["ns1/tuning"]);
        assert_eq!(report.unchanged, 0);
        let live = f.store.object(&cm_ar, "ns1", "tuning").unwrap();
        assert_eq!(live.data["data"]["level"], "two");

        let again = f.differ.apply_unmanaged(&manifest("two")).await.unwrap();
        assert_eq!(again.unchanged, 1);
    }

    #[tokio::test]
    async fn create_or_update_carries_the_live_version() {
        let f = fixture();
        let ar = route_ar();

        let first = f
            .differ
            .create_or_update(&ar, &route("ns1", "a", 30))
            .await
            .unwrap();
        assert_eq!(first, WriteOutcome::Created);

        let again = f
            .differ
            .create_or_update(&ar, &route("ns1", "a", 30))
            .await
            .unwrap();
        assert_eq!(again, WriteOutcome::Unchanged);

        let changed = f
            .differ
            .create_or_update(&ar, &route("ns1", "a", 70))
            .await
            .unwrap();
        assert_eq!(changed, WriteOutcome::Updated);
        assert_eq!(
            f.store.writes(),
            vec!["create IstioRoute ns1/a", "update IstioRoute ns1/a"]
        );
    }
}
