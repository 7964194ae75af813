//! Dry-run rendering of IstioRoute manifests
//!
//! Produces exactly the objects the controller would write, in write order,
//! without touching a cluster. Owner references are omitted since there is
//! no live parent to point at; the identity marker is stamped as usual.

use tracing::warn;

use meshagent_common::crd::IstioRoute;
use meshagent_common::labels::OwnerMarker;
use meshagent_common::yaml::decode_documents;
use meshagent_common::{Error, Result};
use meshagent_route::{synthesize_with, SynthesisOptions};

const ISTIO_ROUTE_KIND: &str = "IstioRoute";

/// Render every IstioRoute in `text` as a multi-document YAML stream
pub fn render_manifest(text: &str, opts: &SynthesisOptions) -> Result<String> {
    let mut documents = Vec::new();

    for (idx, value) in decode_documents(text)?.into_iter().enumerate() {
        if value.get("kind").and_then(|k| k.as_str()) != Some(ISTIO_ROUTE_KIND) {
            warn!(document = idx, "skipping non-IstioRoute document");
            continue;
        }
        let route: IstioRoute =
            serde_json::from_value(value).map_err(|e| Error::decode(idx, e.to_string()))?;
        documents.extend(render_route(&route, opts)?);
    }

    Ok(documents.join("---\n"))
}

fn render_route(route: &IstioRoute, opts: &SynthesisOptions) -> Result<Vec<String>> {
    route.spec.validate()?;

    let marker = OwnerMarker::new(
        route.metadata.name.clone().unwrap_or_default(),
        route.metadata.namespace.clone().unwrap_or_default(),
        route.metadata.uid.clone().unwrap_or_default(),
    );

    let mut rendered = Vec::new();
    for svc in &route.spec.services {
        let bundle = synthesize_with(svc, opts)?.with_owner(&marker, None);
        for item in bundle.objects()? {
            let yaml = serde_yaml::to_string(&item.object).map_err(|e| {
                Error::serialization_for_kind(&item.api_resource.kind, e.to_string())
            })?;
            rendered.push(yaml);
        }
    }
    Ok(rendered)
}
