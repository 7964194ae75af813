//! Identity markers, finalizer and managed-by labels
//!
//! Every object produced for an `IstioRoute` carries the owner's identity as
//! labels (name, namespace) plus an annotation (uid). Cross-namespace objects
//! cannot be garbage collected through owner references, so the controller
//! finds them again through these markers.

use std::collections::BTreeMap;

/// Label carrying the owning route's name
pub const OWNER_NAME_LABEL: &str = "meshmanager.com/owner-name";

/// Label carrying the owning route's namespace
pub const OWNER_NAMESPACE_LABEL: &str = "meshmanager.com/owner-namespace";

/// Annotation carrying the owning route's uid
pub const OWNER_UID_ANNOTATION: &str = "meshmanager.com/owner-uid";

/// Standard Kubernetes managed-by label
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value for the managed-by label
pub const MANAGED_BY_VALUE: &str = "mesh-agent";

/// Finalizer guarding cross-namespace cleanup
pub const EDGE_CLEANUP_FINALIZER: &str = "mesh-manager.meshmanager.com/edge-cleanup";

/// Logical owner of produced objects
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerMarker {
    /// Owner name
    pub name: String,
    /// Owner namespace
    pub namespace: String,
    /// Owner uid (may be empty for dry-run rendering)
    pub uid: String,
}

impl OwnerMarker {
    /// Create a marker for the given owner
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: uid.into(),
        }
    }

    /// Labels stamped onto every produced object
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (OWNER_NAME_LABEL.to_string(), self.name.clone()),
            (OWNER_NAMESPACE_LABEL.to_string(), self.namespace.clone()),
            (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        ])
    }

    /// Annotations stamped onto every produced object
    pub fn annotations(&self) -> BTreeMap<String, String> {
        if self.uid.is_empty() {
            return BTreeMap::new();
        }
        BTreeMap::from([(OWNER_UID_ANNOTATION.to_string(), self.uid.clone())])
    }

    /// Label selector matching every object produced for this owner
    pub fn selector(&self) -> String {
        format!(
            "{}={},{}={}",
            OWNER_NAME_LABEL, self.name, OWNER_NAMESPACE_LABEL, self.namespace
        )
    }

    /// Whether a live object's labels identify it as ours
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.get(OWNER_NAME_LABEL) == Some(&self.name)
            && labels.get(OWNER_NAMESPACE_LABEL) == Some(&self.namespace)
    }
}
