//! Marker-based cleanup
//!
//! Edge filters live in the gateway's namespace, where an owner reference to
//! a route cannot reach. Every produced object therefore carries the route's
//! identity marker, and cleanup is an explicit list-by-marker-and-delete
//! across all namespaces instead of relying on garbage collection.

use std::collections::BTreeSet;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use meshagent_common::istio::{DestinationRule, EnvoyFilter, Gateway, VirtualService};
use meshagent_common::kube_utils::{labels_of, name_of, namespace_of, HasApiResource};
use meshagent_common::labels::OwnerMarker;
use meshagent_common::{Error, ObjectStore, Result};

/// `(kind, namespace, name)` of a produced object
pub type ObjectIdentity = (String, String, String);

/// Every kind the controller writes
pub fn managed_kinds() -> [ApiResource; 4] {
    [
        VirtualService::api_resource(),
        Gateway::api_resource(),
        DestinationRule::api_resource(),
        EnvoyFilter::api_resource(),
    ]
}

/// Identity of an object of the given kind
pub fn identity(ar: &ApiResource, obj: &DynamicObject) -> ObjectIdentity {
    (
        ar.kind.clone(),
        namespace_of(obj).to_string(),
        name_of(obj).to_string(),
    )
}

/// Fail with `Error::Cancelled` once the caller has cancelled
pub fn ensure_active(cancel: &CancellationToken, stage: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::cancelled(stage));
    }
    Ok(())
}

/// Delete every object carrying `marker` whose identity is not in `keep`.
///
/// Returns `Kind namespace/name` for each deleted object. With an empty
/// `keep` this removes everything the owner ever produced.
pub async fn sweep(
    store: &dyn ObjectStore,
    marker: &OwnerMarker,
    keep: &BTreeSet<ObjectIdentity>,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    let selector = marker.selector();
    let mut deleted = Vec::new();

    for ar in managed_kinds() {
        ensure_active(cancel, "sweep list")?;
        for obj in store.list(&ar, None, Some(&selector)).await? {
            if !marker.matches(&labels_of(&obj)) || keep.contains(&identity(&ar, &obj)) {
                continue;
            }
            ensure_active(cancel, "sweep delete")?;
            let (ns, name) = (namespace_of(&obj), name_of(&obj));
            let ns_param = Some(ns).filter(|n| !n.is_empty());
            if store.delete(&ar, ns_param, name).await? {
                info!(kind = %ar.kind, namespace = %ns, name = %name, "deleted object no longer produced");
                deleted.push(format!("{} {}/{}", ar.kind, ns, name));
            } else {
                debug!(kind = %ar.kind, namespace = %ns, name = %name, "object already gone");
            }
        }
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshagent_common::kube_utils::to_dynamic;
    use meshagent_common::kube_utils::ObjectMeta;
    use meshagent_common::istio::{EnvoyFilterSpec, VirtualServiceSpec};
    use meshagent_common::MemoryObjectStore;

    fn vs(ns: &str, name: &str, marker: &OwnerMarker) -> DynamicObject {
        to_dynamic(&VirtualService::new(
            ObjectMeta::new(name, ns).with_marker(marker),
            VirtualServiceSpec::default(),
        ))
        .unwrap()
    }

    fn filter(ns: &str, name: &str, marker: &OwnerMarker) -> DynamicObject {
        to_dynamic(&EnvoyFilter::new(
            ObjectMeta::new(name, ns).with_marker(marker),
            EnvoyFilterSpec::default(),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn sweep_keeps_current_objects_and_foreign_owners() {
        let store = MemoryObjectStore::new();
        let ours = OwnerMarker::new("rollout", "shop", "uid-1");
        let theirs = OwnerMarker::new("other", "shop", "uid-2");
        let vs_ar = VirtualService::api_resource();
        let ef_ar = EnvoyFilter::api_resource();

        store.insert(&vs_ar, vs("shop", "checkout", &ours));
        store.insert(&vs_ar, vs("shop", "gone", &ours));
        store.insert(&vs_ar, vs("shop", "foreign", &theirs));
        store.insert(&ef_ar, filter("istio-system", "shop.gone.bucketing", &ours));

        let keep = BTreeSet::from([(
            "VirtualService".to_string(),
            "shop".to_string(),
            "checkout".to_string(),
        )]);
        let deleted = sweep(&store, &ours, &keep, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            deleted,
            vec![
                "VirtualService shop/gone",
                "EnvoyFilter istio-system/shop.gone.bucketing"
            ]
        );
        assert_eq!(store.names(&vs_ar), vec!["shop/checkout", "shop/foreign"]);
        assert!(store.names(&ef_ar).is_empty());
    }

    #[tokio::test]
    async fn cancelled_sweep_deletes_nothing() {
        let store = MemoryObjectStore::new();
        let ours = OwnerMarker::new("rollout", "shop", "uid-1");
        store.insert(&VirtualService::api_resource(), vs("shop", "gone", &ours));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = sweep(&store, &ours, &BTreeSet::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(store.writes().is_empty());
    }
}
