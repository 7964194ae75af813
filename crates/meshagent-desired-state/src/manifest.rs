//! Manifest decoding
//!
//! A manifest is a `---`-separated stream of YAML documents. Every document
//! must decode to an object with apiVersion, kind and metadata.name; one bad
//! document fails the whole batch so a malformed bundle is never partially
//! applied.

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use tracing::debug;

use meshagent_common::kube_utils::{from_value, ManifestMetadata};
use meshagent_common::yaml::decode_documents;
use meshagent_common::{Error, Result};

/// One decoded manifest document
#[derive(Clone, Debug)]
pub struct DesiredObject {
    /// Identity and resource type
    pub meta: ManifestMetadata,
    /// Document payload
    pub object: DynamicObject,
}

impl DesiredObject {
    /// Whether this document is of the given kind
    pub fn is_kind(&self, ar: &ApiResource) -> bool {
        self.meta.api_resource.group == ar.group && self.meta.api_resource.kind == ar.kind
    }
}

/// Decode every document of a manifest
pub fn parse_manifest(text: &str) -> Result<Vec<DesiredObject>> {
    decode_documents(text)?
        .into_iter()
        .enumerate()
        .map(|(idx, value)| {
            let meta =
                ManifestMetadata::from_value(&value).map_err(|e| Error::decode(idx, e.to_string()))?;
            let object = from_value(value).map_err(|e| Error::decode(idx, e.to_string()))?;
            Ok(DesiredObject { meta, object })
        })
        .collect()
}

/// Split documents into those of the managed kind and everything else
pub fn partition_kind(
    objects: Vec<DesiredObject>,
    ar: &ApiResource,
) -> (Vec<DynamicObject>, Vec<DesiredObject>) {
    let (managed, others): (Vec<_>, Vec<_>) = objects.into_iter().partition(|doc| doc.is_kind(ar));
    for doc in &others {
        debug!(
            kind = %doc.meta.api_resource.kind,
            namespace = %doc.meta.namespace_or_empty(),
            name = %doc.meta.name,
            "document applied without pruning"
        );
    }
    (managed.into_iter().map(|doc| doc.object).collect(), others)
}
