//! Common types for mesh-agent: CRDs, Istio objects, errors, and store seams

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod istio;
pub mod kube_utils;
pub mod labels;
pub mod notify;
pub mod store;
pub mod yaml;

pub use error::Error;
pub use notify::{LogNotifier, NoopNotifier, Notifier};
pub use store::{KubeObjectStore, ObjectStore};

// In-memory doubles for tests in this and dependent crates
#[cfg(any(test, feature = "test-utils"))]
pub use notify::RecordingNotifier;
#[cfg(any(test, feature = "test-utils"))]
pub use store::MemoryObjectStore;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default field manager for server-side apply
pub const DEFAULT_FIELD_MANAGER: &str = "mesh-agent";

/// Namespace where edge (ingress gateway) filters live by default
pub const DEFAULT_EDGE_NAMESPACE: &str = "istio-system";

/// Suffix of every in-cluster service FQDN
pub const CLUSTER_DOMAIN: &str = "svc.cluster.local";

/// Fully qualified in-mesh host for a service
pub fn service_host(name: &str, namespace: &str) -> String {
    format!("{}.{}.{}", name, namespace, CLUSTER_DOMAIN)
}
