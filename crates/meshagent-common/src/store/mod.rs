//! Object store seam
//!
//! The reconcilers never talk to the API server directly. They read and
//! write `DynamicObject`s keyed by kind + namespace + name through
//! [`ObjectStore`], which is backed by kube-rs in production and by an
//! in-memory map in tests.

mod kube_store;
#[cfg(any(test, feature = "test-utils"))]
mod memory;

pub use kube_store::KubeObjectStore;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryObjectStore;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;

use crate::Result;

/// Get/list/create/update/apply/delete over dynamic objects.
///
/// Every method is a single bounded call. A missing object is `Ok(None)` on
/// `get` and `Ok(false)` on `delete`, never an error.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object; `namespace` is None for cluster-scoped kinds
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// List objects of a kind; `namespace` None lists across all namespaces
    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    /// Create an object that must not exist yet
    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an object; a stale `resourceVersion` yields `Error::Conflict`
    async fn update(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Server-side apply under the given field manager
    async fn apply(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
        field_manager: &str,
    ) -> Result<DynamicObject>;

    /// Delete an object; returns whether it existed
    async fn delete(&self, ar: &ApiResource, namespace: Option<&str>, name: &str)
        -> Result<bool>;
}

/// Parse an equality-only label selector (`k=v,k2=v2`)
#[cfg(any(test, feature = "test-utils"))]
pub(crate) fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|term| {
            let (k, v) = term.split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}
