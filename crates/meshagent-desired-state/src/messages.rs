//! Notification message text
//!
//! Messages use chat markdown (quote blocks, inline code) so they read the
//! same in a log line and in a channel.

use kube::api::DynamicObject;

use meshagent_common::crd::IstioRouteSpec;
use meshagent_common::kube_utils::{name_of, namespace_of, spec_of};
use meshagent_common::Error;

const ISTIO_ROUTE_KIND: &str = "IstioRoute";

/// An object was pruned
pub fn deleted(kind: &str, namespace: &str, name: &str) -> String {
    format!(
        ":wastebasket: {} deleted\n> *Namespace*: `{}`\n> *Name*: `{}`",
        kind, namespace, name
    )
}

/// An object was applied.
///
/// Routes get a per-service breakdown; other kinds get their identity.
pub fn applied(kind: &str, obj: &DynamicObject) -> String {
    if kind == ISTIO_ROUTE_KIND {
        if let Some(spec) = spec_of(obj)
            .and_then(|v| serde_json::from_value::<IstioRouteSpec>(v.clone()).ok())
        {
            return route_applied(obj, &spec);
        }
    }
    format!(
        ":white_check_mark: {} applied\n> *Namespace*: `{}`\n> *Name*: `{}`",
        kind,
        namespace_of(obj),
        name_of(obj)
    )
}

/// An apply failed
pub fn apply_failed(kind: &str, obj: &DynamicObject, err: &Error) -> String {
    format!(
        ":exclamation: {} apply failed\n> *Namespace*: `{}`\n> *Name*: `{}`\n> *Error*: `{}`",
        kind,
        namespace_of(obj),
        name_of(obj),
        err
    )
}

fn route_applied(obj: &DynamicObject, spec: &IstioRouteSpec) -> String {
    let services: Vec<String> = spec
        .services
        .iter()
        .map(|svc| {
            let mut lines = vec![
                format!(">   - *Service*: `{}`", svc.key()),
                format!(">     - *Type*: `{}`", svc.route_type),
            ];
            if !svc.revisions.is_empty() {
                lines.push(format!(">     - *Revisions*: {}", backticked(&svc.revisions)));
            }
            if let Some(ratio) = svc.ratio {
                lines.push(format!(">     - *Ratio*: `{}%`", ratio));
            }
            if let Some(secs) = svc.session_duration_seconds.filter(|s| *s > 0) {
                lines.push(format!(">     - *Session*: `{}s`", secs));
            }
            if !svc.darkness_releases.is_empty() {
                let releases: Vec<String> = svc
                    .darkness_releases
                    .iter()
                    .map(|dr| format!("`{}` (IPs: {})", dr.revision, dr.ips.join(", ")))
                    .collect();
                lines.push(format!(">     - *Darkness*: {}", releases.join(", ")));
            }
            lines.join("\n")
        })
        .collect();

    format!(
        ":white_check_mark: *IstioRoute applied*\n> *Namespace*: `{}`\n> *Name*: `{}`\n> *Services*:\n{}",
        namespace_of(obj),
        name_of(obj),
        services.join("\n")
    )
}

fn backticked(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("`{}`", i))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshagent_common::kube_utils::from_value;
    use serde_json::json;

    fn route() -> DynamicObject {
        from_value(json!({
            "apiVersion": "mesh-manager.meshmanager.com/v1",
            "kind": "IstioRoute",
            "metadata": {"name": "checkout", "namespace": "shop"},
            "spec": {"services": [{
                "name": "checkout",
                "namespace": "shop",
                "type": "StickyCanary",
                "commitHashes": ["r1", "r2"],
                "ratio": 30,
                "sessionDuration": 600,
                "darknessReleases": [{"commitHash": "r3", "ips": ["10.0.0.1", "10.0.0.2"]}]
            }]}
        }))
        .unwrap()
    }

    #[test]
    fn route_success_lists_service_details() {
        let msg = applied("IstioRoute", &route());
        assert!(msg.contains("*IstioRoute applied*"));
        assert!(msg.contains("> *Name*: `checkout`"));
        assert!(msg.contains("*Service*: `shop/checkout`"));
        assert!(msg.contains("*Type*: `StickyCanary`"));
        assert!(msg.contains("*Revisions*: `r1`, `r2`"));
        assert!(msg.contains("*Ratio*: `30%`"));
        assert!(msg.contains("*Session*: `600s`"));
        assert!(msg.contains("`r3` (IPs: 10.0.0.1, 10.0.0.2)"));
    }

    #[test]
    fn other_kinds_get_identity_only() {
        let obj = from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "shop"}
        }))
        .unwrap();
        let msg = applied("ConfigMap", &obj);
        assert!(msg.starts_with(":white_check_mark: ConfigMap applied"));
        assert!(msg.contains("`settings`"));
    }

    #[test]
    fn failure_and_delete_messages_name_the_object() {
        let err = Error::internal("boom");
        let msg = apply_failed("IstioRoute", &route(), &err);
        assert!(msg.contains("`shop`") && msg.contains("`checkout`") && msg.contains("boom"));
        assert_eq!(
            deleted("IstioRoute", "shop", "old"),
            ":wastebasket: IstioRoute deleted\n> *Namespace*: `shop`\n> *Name*: `old`"
        );
    }
}
