//! Shared Kubernetes utilities using kube-rs
//!
//! Typed objects produced by the route synthesizer and documents decoded from
//! desired-state manifests both end up as `DynamicObject`s in the object
//! store. This module holds the glue between the two worlds.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::Serialize;

use crate::labels::OwnerMarker;
use crate::{Error, Result};

// =============================================================================
// ObjectMeta - Canonical metadata for all synthesized resources
// =============================================================================

/// Kubernetes metadata for synthesized resources.
///
/// Serialization is stable (BTreeMap ordering, empty collections skipped) so
/// the same input always produces byte-identical documents.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name
    pub name: String,
    /// Resource namespace
    pub namespace: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Owner references (same-namespace owners only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Create new metadata with no labels
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            owner_references: Vec::new(),
        }
    }

    /// Stamp the owner's identity marker (labels and annotations)
    pub fn with_marker(mut self, marker: &OwnerMarker) -> Self {
        self.labels.extend(marker.labels());
        self.annotations.extend(marker.annotations());
        self
    }
}

// =============================================================================
// HasApiResource Trait
// =============================================================================

/// Trait for types that have a known API group, version, and kind.
///
/// Implement this for typed objects to derive their `ApiResource` from their
/// internal constants, keeping serialization and API calls consistent.
///
/// # Example
/// ```ignore
/// impl HasApiResource for VirtualService {
///     const API_VERSION: &'static str = "networking.istio.io/v1beta1";
///     const KIND: &'static str = "VirtualService";
/// }
///
/// let ar = VirtualService::api_resource();
/// ```
pub trait HasApiResource {
    /// Full API version (e.g., "networking.istio.io/v1beta1", "v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "VirtualService")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Build an ApiResource from an apiVersion string and kind.
///
/// ```ignore
/// let ar = build_api_resource("networking.istio.io/v1beta1", "Gateway");
/// let api: Api<DynamicObject> = Api::namespaced_with(client, "shop", &ar);
/// ```
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into (group, version); the core group is empty.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Kinds whose plural is not derivable by the simple rules below
const KIND_PLURALS: &[(&str, &str)] = &[("endpoints", "endpoints"), ("ingress", "ingresses")];

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

// =============================================================================
// Manifest / DynamicObject helpers
// =============================================================================

/// Identity of a decoded manifest document
#[derive(Debug, Clone)]
pub struct ManifestMetadata {
    /// Resource name
    pub name: String,
    /// Namespace (None for cluster-scoped documents)
    pub namespace: Option<String>,
    /// API resource definition
    pub api_resource: ApiResource,
}

impl ManifestMetadata {
    /// Extract apiVersion, kind, name and namespace from a decoded document
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let field = |path: &str| -> Option<&str> { value.pointer(path).and_then(|v| v.as_str()) };

        let api_version = field("/apiVersion")
            .ok_or_else(|| Error::serialization("manifest missing apiVersion"))?;
        let kind =
            field("/kind").ok_or_else(|| Error::serialization("manifest missing kind"))?;
        let name = field("/metadata/name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::serialization_for_kind(kind, "manifest missing metadata.name"))?;
        let namespace = field("/metadata/namespace")
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        Ok(Self {
            name: name.to_string(),
            namespace,
            api_resource: build_api_resource(api_version, kind),
        })
    }

    /// Namespace, or empty for cluster-scoped documents
    pub fn namespace_or_empty(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }
}

/// Convert a typed object into a `DynamicObject`
pub fn to_dynamic<T: Serialize>(obj: &T) -> Result<DynamicObject> {
    let value = serde_json::to_value(obj)?;
    from_value(value)
}

/// Convert a decoded document into a `DynamicObject`
pub fn from_value(value: serde_json::Value) -> Result<DynamicObject> {
    serde_json::from_value(value).map_err(|e| Error::serialization(e.to_string()))
}

/// Labels of a dynamic object (empty when unset)
pub fn labels_of(obj: &DynamicObject) -> BTreeMap<String, String> {
    obj.metadata.labels.clone().unwrap_or_default()
}

/// Annotations of a dynamic object (empty when unset)
pub fn annotations_of(obj: &DynamicObject) -> BTreeMap<String, String> {
    obj.metadata.annotations.clone().unwrap_or_default()
}

/// Name of a dynamic object (empty when unset)
pub fn name_of(obj: &DynamicObject) -> &str {
    obj.metadata.name.as_deref().unwrap_or_default()
}

/// Namespace of a dynamic object (empty when unset)
pub fn namespace_of(obj: &DynamicObject) -> &str {
    obj.metadata.namespace.as_deref().unwrap_or_default()
}

/// The `spec` payload of a dynamic object, if any
pub fn spec_of(obj: &DynamicObject) -> Option<&serde_json::Value> {
    obj.data.get("spec")
}
