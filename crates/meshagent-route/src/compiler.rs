//! Route synthesizer
//!
//! Turns one `ServiceConfig` into the full bundle of mesh objects that route
//! it. Synthesis is pure: the same input always yields byte-identical
//! objects, which is what lets the reconcilers skip no-op writes.
//!
//! Rule precedence, identical for mesh and ingress rules:
//! 1. dark launch (one rule per release and address)
//! 2. canary (one rule per revision, plus pinned dependency headers)
//! 3. dependency-only (Standard with pinned dependencies)
//! 4. default (absent for StickyCanary)

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use tracing::warn;

use meshagent_common::crd::{OutlierDetection, RouteType, ServiceConfig};
use meshagent_common::istio::{
    ConsistentHashLb, Destination, DestinationRule, DestinationRuleSpec, EnvoyConfigPatch,
    EnvoyFilter, EnvoyFilterSpec, EnvoyPatch, EnvoyPatchMatch, FilterChainMatch, FilterMatch,
    Gateway, GatewaySpec, HttpMatchRequest, HttpRoute, HttpRouteDestination, ListenerMatch,
    LoadBalancerSettings, LuaHttpFilter, OutlierDetectionPolicy, Port, Server, StringMatch,
    SubFilterMatch, Subset, TrafficPolicy, VirtualService, VirtualServiceSpec, WorkloadSelector,
};
use meshagent_common::kube_utils::{to_dynamic, HasApiResource, ObjectMeta};
use meshagent_common::labels::OwnerMarker;
use meshagent_common::{service_host, Error, Result, DEFAULT_EDGE_NAMESPACE};

use crate::duration::normalize_duration;
use crate::headers::{exact_ip_regex, pinned_dependencies, FORWARDED_FOR_HEADER, SELECTOR_HEADER, SESSION_HEADER};
use crate::script::ScriptGenerator;

/// Label key selecting a revision's pods
pub const REVISION_LABEL: &str = "revision";

/// Minimum ejection duration
pub const BASE_EJECTION_TIME: &str = "30s";

/// Maximum share of hosts that may be ejected
pub const MAX_EJECTION_PERCENT: u32 = 100;

/// Healthy share below which ejection stops
pub const MIN_HEALTH_PERCENT: u32 = 50;

/// Label selecting the ingress gateway pods
const INGRESS_GATEWAY_SELECTOR: (&str, &str) = ("istio", "ingressgateway");

/// Knobs that are not part of the service's intent
#[derive(Clone, Debug)]
pub struct SynthesisOptions {
    /// Namespace holding edge filters (the ingress gateway's namespace)
    pub edge_namespace: String,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            edge_namespace: DEFAULT_EDGE_NAMESPACE.to_string(),
        }
    }
}

/// Gateway plus the rules bound to it
#[derive(Clone, Debug, PartialEq)]
pub struct IngressRules {
    /// Ingress listener
    pub gateway: Gateway,
    /// Rules bound to the listener
    pub virtual_service: VirtualService,
}

/// Every object that routes one service
#[derive(Clone, Debug, PartialEq)]
pub struct RouteBundle {
    /// Mesh-internal host rules
    pub virtual_service: VirtualService,
    /// Ingress rules
    pub ingress: IngressRules,
    /// Subsets and traffic policy
    pub destination_rule: DestinationRule,
    /// Bucketing script; present for Canary and StickyCanary
    pub edge_script: Option<EnvoyFilter>,
}

/// One bundle object ready for the object store
#[derive(Clone, Debug)]
pub struct BundleObject {
    /// Resource type
    pub api_resource: ApiResource,
    /// Object payload
    pub object: DynamicObject,
}

impl RouteBundle {
    /// Stamp the owner's marker on every object and the owner reference on
    /// objects that live in the owner's namespace.
    pub fn with_owner(mut self, marker: &OwnerMarker, owner_ref: Option<OwnerReference>) -> Self {
        let stamp = |meta: &mut ObjectMeta| {
            meta.labels.extend(marker.labels());
            meta.annotations.extend(marker.annotations());
            if let Some(owner) = &owner_ref {
                if meta.namespace == marker.namespace {
                    meta.owner_references = vec![owner.clone()];
                }
            }
        };
        stamp(&mut self.virtual_service.metadata);
        stamp(&mut self.ingress.gateway.metadata);
        stamp(&mut self.ingress.virtual_service.metadata);
        stamp(&mut self.destination_rule.metadata);
        if let Some(filter) = self.edge_script.as_mut() {
            stamp(&mut filter.metadata);
        }
        self
    }

    /// Objects in write order: host rules, ingress rules, traffic split, edge script
    pub fn objects(&self) -> Result<Vec<BundleObject>> {
        let mut out = vec![
            BundleObject {
                api_resource: VirtualService::api_resource(),
                object: to_dynamic(&self.virtual_service)?,
            },
            BundleObject {
                api_resource: Gateway::api_resource(),
                object: to_dynamic(&self.ingress.gateway)?,
            },
            BundleObject {
                api_resource: VirtualService::api_resource(),
                object: to_dynamic(&self.ingress.virtual_service)?,
            },
            BundleObject {
                api_resource: DestinationRule::api_resource(),
                object: to_dynamic(&self.destination_rule)?,
            },
        ];
        if let Some(filter) = &self.edge_script {
            out.push(BundleObject {
                api_resource: EnvoyFilter::api_resource(),
                object: to_dynamic(filter)?,
            });
        }
        Ok(out)
    }
}

/// Synthesize with default options
pub fn synthesize(cfg: &ServiceConfig) -> Result<RouteBundle> {
    synthesize_with(cfg, &SynthesisOptions::default())
}

/// Synthesize the routing bundle for one service.
///
/// Fails with a validation error, before producing anything, when the
/// service configuration is invalid.
pub fn synthesize_with(cfg: &ServiceConfig, opts: &SynthesisOptions) -> Result<RouteBundle> {
    cfg.validate()?;

    let host = service_host(&cfg.name, &cfg.namespace);
    let rules = http_rules(cfg, &host);
    let gateway_name = format!("{}-gateway", cfg.name);

    let virtual_service = VirtualService::new(
        ObjectMeta::new(&cfg.name, &cfg.namespace),
        VirtualServiceSpec {
            hosts: vec![host.clone()],
            gateways: vec![],
            http: rules.clone(),
        },
    );

    let gateway = Gateway::new(
        ObjectMeta::new(&gateway_name, &cfg.namespace),
        GatewaySpec {
            selector: ingress_selector(),
            servers: vec![Server {
                port: Port {
                    number: 80,
                    name: "http".to_string(),
                    protocol: "HTTP".to_string(),
                },
                hosts: vec![host.clone()],
            }],
        },
    );

    let ingress_vs = VirtualService::new(
        ObjectMeta::new(format!("{}-ingress", cfg.name), &cfg.namespace),
        VirtualServiceSpec {
            hosts: vec![host.clone()],
            gateways: vec![gateway_name],
            http: rules,
        },
    );

    let destination_rule = DestinationRule::new(
        ObjectMeta::new(&cfg.name, &cfg.namespace),
        DestinationRuleSpec {
            host,
            traffic_policy: traffic_policy(cfg),
            subsets: subsets(cfg),
        },
    );

    let edge_script = if cfg.route_type.is_split() {
        let script = ScriptGenerator::new()?.generate(cfg)?.ok_or_else(|| {
            Error::validation_for_field(
                cfg.key(),
                "commitHashes",
                format!("{} requires exactly 2 revisions", cfg.route_type),
            )
        })?;
        Some(edge_filter(cfg, &opts.edge_namespace, script.source))
    } else {
        None
    };

    Ok(RouteBundle {
        virtual_service,
        ingress: IngressRules {
            gateway,
            virtual_service: ingress_vs,
        },
        destination_rule,
        edge_script,
    })
}

/// Name of the edge filter for a service.
///
/// Filters from every namespace share the edge namespace; the `.`
/// separators keep `a-b/c` and `a/b-c` apart.
pub fn edge_filter_name(cfg: &ServiceConfig) -> String {
    format!("{}.{}.bucketing", cfg.namespace, cfg.name)
}

/// Revision that serves unmatched traffic.
///
/// The first revision not covered by a darkness release, so dark-launched
/// code never doubles as the default path; `revisions[0]` when every
/// revision is dark.
pub fn default_revision(cfg: &ServiceConfig) -> Option<&str> {
    let dark = cfg.dark_revisions();
    cfg.revisions
        .iter()
        .map(String::as_str)
        .find(|rev| !dark.contains(rev))
        .or_else(|| cfg.revisions.first().map(String::as_str))
}

fn ingress_selector() -> BTreeMap<String, String> {
    BTreeMap::from([(
        INGRESS_GATEWAY_SELECTOR.0.to_string(),
        INGRESS_GATEWAY_SELECTOR.1.to_string(),
    )])
}

fn route_to(host: &str, subset: Option<&str>) -> Vec<HttpRouteDestination> {
    vec![HttpRouteDestination {
        destination: Destination {
            host: host.to_string(),
            subset: subset.map(str::to_string),
        },
        weight: None,
    }]
}

fn http_rules(cfg: &ServiceConfig, host: &str) -> Vec<HttpRoute> {
    let mut rules = Vec::new();
    let dependency_headers: BTreeMap<String, StringMatch> = pinned_dependencies(cfg)
        .into_iter()
        .map(|(header, rev)| (header, StringMatch::Exact(rev)))
        .collect();

    let mut dark_idx = 0;
    for release in &cfg.darkness_releases {
        for ip in &release.ips {
            rules.push(HttpRoute {
                name: format!("dark-{}-{}", release.revision, dark_idx),
                matches: vec![HttpMatchRequest {
                    headers: BTreeMap::from([(
                        FORWARDED_FOR_HEADER.to_string(),
                        StringMatch::Regex(exact_ip_regex(ip)),
                    )]),
                }],
                route: route_to(host, Some(&release.revision)),
            });
            dark_idx += 1;
        }
    }

    if cfg.route_type.is_split() {
        for rev in &cfg.revisions {
            let mut headers = dependency_headers.clone();
            headers.insert(SELECTOR_HEADER.to_string(), StringMatch::Exact(rev.clone()));
            rules.push(HttpRoute {
                name: format!("canary-{}", rev),
                matches: vec![HttpMatchRequest { headers }],
                route: route_to(host, Some(rev)),
            });
        }
    } else if !dependency_headers.is_empty() {
        rules.push(HttpRoute {
            name: "dependencies".to_string(),
            matches: vec![HttpMatchRequest {
                headers: dependency_headers,
            }],
            route: route_to(host, None),
        });
    }

    if cfg.route_type != RouteType::StickyCanary {
        if let Some(rev) = default_revision(cfg) {
            rules.push(HttpRoute {
                name: "default".to_string(),
                matches: vec![],
                route: route_to(host, Some(rev)),
            });
        }
    }

    rules
}

fn subsets(cfg: &ServiceConfig) -> Vec<Subset> {
    let mut seen: Vec<&str> = Vec::new();
    for rev in cfg
        .revisions
        .iter()
        .map(String::as_str)
        .chain(cfg.dark_revisions())
    {
        if !seen.contains(&rev) {
            seen.push(rev);
        }
    }
    seen.into_iter()
        .map(|rev| Subset {
            name: rev.to_string(),
            labels: BTreeMap::from([(REVISION_LABEL.to_string(), rev.to_string())]),
        })
        .collect()
}

/// Traffic policy for the destination rule.
///
/// A plain canary, or a service with an unpinned dependency, never gets
/// ejection settings. Sticky canaries always hash on the session header.
fn traffic_policy(cfg: &ServiceConfig) -> TrafficPolicy {
    let load_balancer = (cfg.route_type == RouteType::StickyCanary).then(|| LoadBalancerSettings {
        consistent_hash: ConsistentHashLb {
            http_header_name: SESSION_HEADER.to_string(),
        },
    });
    let unpinned = cfg
        .dependencies
        .iter()
        .any(|dep| dep.pinned_revision().is_none());
    let ejects = cfg.route_type != RouteType::Canary && !unpinned;
    TrafficPolicy {
        load_balancer,
        outlier_detection: cfg
            .outlier_detection
            .as_ref()
            .filter(|_| ejects)
            .map(|od| outlier_policy(cfg, od)),
    }
}

/// Translate the ejection policy.
///
/// An unparseable interval is dropped with a warning; the rest of the
/// policy and the bundle are still produced.
fn outlier_policy(cfg: &ServiceConfig, od: &OutlierDetection) -> OutlierDetectionPolicy {
    let interval = od.interval.as_deref().and_then(|raw| match normalize_duration(raw) {
        Ok(normalized) => Some(normalized),
        Err(e) => {
            warn!(service = %cfg.key(), interval = %raw, error = %e, "ignoring outlier detection interval");
            None
        }
    });
    OutlierDetectionPolicy {
        consecutive_5xx_errors: od.consecutive_5xx_errors,
        consecutive_gateway_errors: od.consecutive_gateway_errors,
        interval,
        base_ejection_time: BASE_EJECTION_TIME.to_string(),
        max_ejection_percent: MAX_EJECTION_PERCENT,
        min_health_percent: MIN_HEALTH_PERCENT,
    }
}

fn edge_filter(cfg: &ServiceConfig, edge_namespace: &str, source: String) -> EnvoyFilter {
    EnvoyFilter::new(
        ObjectMeta::new(edge_filter_name(cfg), edge_namespace),
        EnvoyFilterSpec {
            workload_selector: WorkloadSelector {
                labels: ingress_selector(),
            },
            config_patches: vec![EnvoyConfigPatch {
                apply_to: "HTTP_FILTER".to_string(),
                match_: EnvoyPatchMatch {
                    context: "GATEWAY".to_string(),
                    listener: ListenerMatch {
                        filter_chain: FilterChainMatch {
                            filter: FilterMatch {
                                name: "envoy.filters.network.http_connection_manager".to_string(),
                                sub_filter: Some(SubFilterMatch {
                                    name: "envoy.filters.http.router".to_string(),
                                }),
                            },
                        },
                    },
                },
                patch: EnvoyPatch {
                    operation: "INSERT_BEFORE".to_string(),
                    value: LuaHttpFilter::inline(source),
                },
            }],
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::tag_request;
    use meshagent_common::crd::{DarknessRelease, Dependency};

    fn svc(route_type: RouteType) -> ServiceConfig {
        ServiceConfig {
            name: "checkout".into(),
            namespace: "shop".into(),
            route_type,
            revisions: vec!["r1".into(), "r2".into()],
            ratio: if route_type.is_split() { Some(30) } else { None },
            ..Default::default()
        }
    }

    fn dark(rev: &str, ips: &[&str]) -> DarknessRelease {
        DarknessRelease {
            revision: rev.into(),
            ips: ips.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn rule_names(bundle: &RouteBundle) -> Vec<String> {
        bundle
            .virtual_service
            .spec
            .http
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    /// Evaluate host rules the way the proxy does: first match wins
    fn route_request<'a>(
        rules: &'a [HttpRoute],
        headers: &BTreeMap<String, String>,
    ) -> Option<&'a Destination> {
        let satisfied = |name: &String, matcher: &StringMatch| {
            let Some(value) = headers.get(name) else {
                return false;
            };
            match matcher {
                StringMatch::Exact(v) => value == v,
                StringMatch::Regex(re) => value
                    .split(',')
                    .any(|element| *re == exact_ip_regex(element.trim())),
            }
        };
        rules
            .iter()
            .find(|rule| {
                rule.matches.is_empty()
                    || rule
                        .matches
                        .iter()
                        .any(|m| m.headers.iter().all(|(n, v)| satisfied(n, v)))
            })
            .map(|rule| &rule.route[0].destination)
    }

    /// Story: the sticky canary scenario yields one rule per revision, no
    /// default rule, two subsets and a consistent-hash policy without ejection
    #[test]
    fn story_sticky_canary_scenario() {
        let bundle = synthesize(&svc(RouteType::StickyCanary)).unwrap();

        let rules = &bundle.virtual_service.spec.http;
        assert_eq!(rules.len(), 2);
        assert_eq!(rule_names(&bundle), vec!["canary-r1", "canary-r2"]);
        for (rule, rev) in rules.iter().zip(["r1", "r2"]) {
            assert_eq!(
                rule.matches[0].headers[SELECTOR_HEADER],
                StringMatch::Exact(rev.to_string())
            );
            assert_eq!(rule.route[0].destination.subset.as_deref(), Some(rev));
        }

        let subsets: Vec<_> = bundle
            .destination_rule
            .spec
            .subsets
            .iter()
            .map(|s| (s.name.as_str(), s.labels[REVISION_LABEL].as_str()))
            .collect();
        assert_eq!(subsets, vec![("r1", "r1"), ("r2", "r2")]);

        let policy = &bundle.destination_rule.spec.traffic_policy;
        assert_eq!(
            policy.load_balancer.as_ref().unwrap().consistent_hash.http_header_name,
            SESSION_HEADER
        );
        assert!(policy.outlier_detection.is_none());
        assert!(bundle.edge_script.is_some());
    }

    #[test]
    fn canary_and_standard_always_have_a_default_rule() {
        let canary = synthesize(&svc(RouteType::Canary)).unwrap();
        assert_eq!(rule_names(&canary), vec!["canary-r1", "canary-r2", "default"]);
        assert!(canary.destination_rule.spec.traffic_policy.is_empty());

        let mut standard = svc(RouteType::Standard);
        standard.revisions.pop();
        let bundle = synthesize(&standard).unwrap();
        assert_eq!(rule_names(&bundle), vec!["default"]);
        assert!(bundle.edge_script.is_none());
        assert_eq!(bundle.objects().unwrap().len(), 4);
    }

    #[test]
    fn synthesis_is_deterministic() {
        let mut cfg = svc(RouteType::StickyCanary);
        cfg.dependencies = vec![
            Dependency {
                name: "payments".into(),
                namespace: "pay".into(),
                revisions: vec!["p7".into()],
            },
            Dependency {
                name: "audit".into(),
                namespace: "pay".into(),
                revisions: vec!["a1".into()],
            },
        ];
        cfg.darkness_releases = vec![dark("r3", &["10.0.0.1", "10.0.0.2"])];
        cfg.outlier_detection = Some(OutlierDetection {
            consecutive_5xx_errors: Some(5),
            consecutive_gateway_errors: Some(3),
            interval: Some("1m30s".into()),
        });

        let render = |b: &RouteBundle| -> Vec<String> {
            b.objects()
                .unwrap()
                .iter()
                .map(|o| serde_json::to_string(&o.object).unwrap())
                .collect()
        };
        let first = render(&synthesize(&cfg).unwrap());
        for _ in 0..5 {
            assert_eq!(render(&synthesize(&cfg).unwrap()), first);
        }
    }

    #[test]
    fn dark_rules_precede_everything() {
        for route_type in [RouteType::Standard, RouteType::Canary, RouteType::StickyCanary] {
            let mut cfg = svc(route_type);
            if route_type == RouteType::Standard {
                cfg.revisions.pop();
            }
            cfg.darkness_releases = vec![
                dark("r9", &["10.0.0.1"]),
                dark("r8", &["10.0.0.2", "192.168.1.9"]),
            ];
            cfg.dependencies = vec![Dependency {
                name: "payments".into(),
                namespace: "pay".into(),
                revisions: vec!["p7".into()],
            }];
            let bundle = synthesize(&cfg).unwrap();
            for rules in [
                &bundle.virtual_service.spec.http,
                &bundle.ingress.virtual_service.spec.http,
            ] {
                let names: Vec<_> = rules.iter().map(|r| r.name.as_str()).collect();
                assert_eq!(&names[..3], &["dark-r9-0", "dark-r8-1", "dark-r8-2"]);
                assert!(names[3..].iter().all(|n| !n.starts_with("dark-")));
            }
        }
    }

    #[test]
    fn default_subset_avoids_dark_only_revisions() {
        let mut cfg = svc(RouteType::Canary);
        cfg.darkness_releases = vec![dark("r1", &["10.0.0.1"])];
        assert_eq!(default_revision(&cfg), Some("r2"));
        let bundle = synthesize(&cfg).unwrap();
        let default = bundle.virtual_service.spec.http.last().unwrap();
        assert_eq!(default.name, "default");
        assert_eq!(default.route[0].destination.subset.as_deref(), Some("r2"));

        cfg.darkness_releases.push(dark("r2", &["10.0.0.2"]));
        assert_eq!(default_revision(&cfg), Some("r1"));
    }

    #[test]
    fn subsets_are_deduplicated_across_dark_releases() {
        let mut cfg = svc(RouteType::Canary);
        cfg.darkness_releases = vec![dark("r2", &["10.0.0.1"]), dark("r3", &["10.0.0.2"])];
        let bundle = synthesize(&cfg).unwrap();
        let names: Vec<_> = bundle
            .destination_rule
            .spec
            .subsets
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["r1", "r2", "r3"]);
    }

    #[test]
    fn dependency_headers_join_canary_matches() {
        let mut cfg = svc(RouteType::Canary);
        cfg.dependencies = vec![
            Dependency {
                name: "payments".into(),
                namespace: "pay".into(),
                revisions: vec!["p7".into()],
            },
            Dependency {
                name: "ledger".into(),
                namespace: "pay".into(),
                revisions: vec![],
            },
        ];
        let bundle = synthesize(&cfg).unwrap();
        let headers = &bundle.virtual_service.spec.http[0].matches[0].headers;
        assert_eq!(headers.len(), 2);
        assert_eq!(
            headers["x-dep-pay.payments"],
            StringMatch::Exact("p7".into())
        );
        assert!(!headers.contains_key("x-dep-pay.ledger"));
    }

    #[test]
    fn standard_dependency_rule_only_when_pinned() {
        let mut cfg = svc(RouteType::Standard);
        cfg.revisions.pop();
        cfg.dependencies = vec![Dependency {
            name: "payments".into(),
            namespace: "pay".into(),
            revisions: vec![],
        }];
        assert_eq!(rule_names(&synthesize(&cfg).unwrap()), vec!["default"]);

        cfg.dependencies[0].revisions.push("p7".into());
        let bundle = synthesize(&cfg).unwrap();
        assert_eq!(rule_names(&bundle), vec!["dependencies", "default"]);
        let dep_rule = &bundle.virtual_service.spec.http[0];
        assert_eq!(dep_rule.route[0].destination.subset, None);
        assert!(bundle.destination_rule.spec.traffic_policy.is_empty());
    }

    #[test]
    fn outlier_detection_uses_fixed_ejection_settings() {
        let mut cfg = svc(RouteType::StickyCanary);
        cfg.outlier_detection = Some(OutlierDetection {
            consecutive_5xx_errors: Some(5),
            consecutive_gateway_errors: None,
            interval: Some("1m30s".into()),
        });
        let bundle = synthesize(&cfg).unwrap();
        let od = bundle
            .destination_rule
            .spec
            .traffic_policy
            .outlier_detection
            .unwrap();
        assert_eq!(od.consecutive_5xx_errors, Some(5));
        assert_eq!(od.interval.as_deref(), Some("90s"));
        assert_eq!(od.base_ejection_time, "30s");
        assert_eq!(od.max_ejection_percent, 100);
        assert_eq!(od.min_health_percent, 50);
        assert!(bundle.destination_rule.spec.traffic_policy.load_balancer.is_some());

        cfg.route_type = RouteType::Standard;
        cfg.ratio = None;
        cfg.revisions.pop();
        let policy = synthesize(&cfg).unwrap().destination_rule.spec.traffic_policy;
        assert!(policy.load_balancer.is_none());
        assert!(policy.outlier_detection.is_some());
    }

    #[test]
    fn canary_and_unpinned_dependencies_keep_the_policy_empty() {
        let ejection = OutlierDetection {
            consecutive_5xx_errors: Some(5),
            consecutive_gateway_errors: None,
            interval: Some("10s".into()),
        };
        let mut canary = svc(RouteType::Canary);
        canary.outlier_detection = Some(ejection.clone());
        let bundle = synthesize(&canary).unwrap();
        assert!(bundle.destination_rule.spec.traffic_policy.is_empty());

        let mut standard = svc(RouteType::Standard);
        standard.revisions.pop();
        standard.outlier_detection = Some(ejection.clone());
        standard.dependencies = vec![Dependency {
            name: "ledger".into(),
            namespace: "pay".into(),
            revisions: vec![],
        }];
        let bundle = synthesize(&standard).unwrap();
        assert!(bundle.destination_rule.spec.traffic_policy.is_empty());

        let mut sticky = svc(RouteType::StickyCanary);
        sticky.outlier_detection = Some(ejection);
        sticky.dependencies = standard.dependencies.clone();
        let policy = synthesize(&sticky).unwrap().destination_rule.spec.traffic_policy;
        assert!(policy.outlier_detection.is_none());
        assert!(policy.load_balancer.is_some());
    }

    #[test]
    fn names_stay_distinct_when_dashes_line_up() {
        let mut left = svc(RouteType::Canary);
        left.namespace = "a-b".into();
        left.name = "c".into();
        let mut right = svc(RouteType::Canary);
        right.namespace = "a".into();
        right.name = "b-c".into();

        let filter = |cfg: &ServiceConfig| synthesize(cfg).unwrap().edge_script.unwrap();
        assert_ne!(filter(&left).metadata.name, filter(&right).metadata.name);
        assert_eq!(filter(&left).metadata.name, "a-b.c.bucketing");

        let mut cfg = svc(RouteType::Canary);
        cfg.dependencies = vec![
            Dependency {
                name: "c".into(),
                namespace: "a-b".into(),
                revisions: vec!["x1".into()],
            },
            Dependency {
                name: "b-c".into(),
                namespace: "a".into(),
                revisions: vec!["y1".into()],
            },
        ];
        let bundle = synthesize(&cfg).unwrap();
        let headers = &bundle.virtual_service.spec.http[0].matches[0].headers;
        assert_eq!(headers["x-dep-a-b.c"], StringMatch::Exact("x1".into()));
        assert_eq!(headers["x-dep-a.b-c"], StringMatch::Exact("y1".into()));
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn malformed_interval_is_dropped_not_fatal() {
        let mut cfg = svc(RouteType::StickyCanary);
        cfg.outlier_detection = Some(OutlierDetection {
            consecutive_5xx_errors: Some(5),
            consecutive_gateway_errors: Some(2),
            interval: Some("every now and then".into()),
        });
        let bundle = synthesize(&cfg).unwrap();
        let od = bundle
            .destination_rule
            .spec
            .traffic_policy
            .outlier_detection
            .unwrap();
        assert_eq!(od.interval, None);
        assert_eq!(od.consecutive_gateway_errors, Some(2));
        assert!(bundle.edge_script.is_some());
    }

    #[test]
    fn canary_without_two_revisions_writes_nothing() {
        let mut cfg = svc(RouteType::Canary);
        cfg.revisions.pop();
        let err = synthesize(&cfg).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn ingress_mirrors_host_rules() {
        let mut cfg = svc(RouteType::Canary);
        cfg.darkness_releases = vec![dark("r3", &["10.0.0.1"])];
        let bundle = synthesize(&cfg).unwrap();
        assert_eq!(
            bundle.ingress.virtual_service.spec.http,
            bundle.virtual_service.spec.http
        );
        assert_eq!(bundle.ingress.virtual_service.metadata.name, "checkout-ingress");
        assert_eq!(bundle.ingress.virtual_service.spec.gateways, vec!["checkout-gateway"]);
        assert_eq!(bundle.ingress.gateway.metadata.name, "checkout-gateway");
        let server = &bundle.ingress.gateway.spec.servers[0];
        assert_eq!(server.port.number, 80);
        assert_eq!(server.hosts, vec!["checkout.shop.svc.cluster.local"]);
        assert!(bundle.virtual_service.spec.gateways.is_empty());
    }

    #[test]
    fn edge_filter_lives_in_edge_namespace() {
        let opts = SynthesisOptions {
            edge_namespace: "ingress".into(),
        };
        let bundle = synthesize_with(&svc(RouteType::Canary), &opts).unwrap();
        let filter = bundle.edge_script.unwrap();
        assert_eq!(filter.metadata.name, "shop.checkout.bucketing");
        assert_eq!(filter.metadata.namespace, "ingress");
        let patch = &filter.spec.config_patches[0];
        assert_eq!(patch.apply_to, "HTTP_FILTER");
        assert_eq!(patch.match_.context, "GATEWAY");
        assert_eq!(patch.patch.operation, "INSERT_BEFORE");
        assert!(patch.patch.value.typed_config.inline_code.contains("local RATIO = 30"));
    }

    #[test]
    fn objects_come_out_in_write_order() {
        let bundle = synthesize(&svc(RouteType::Canary)).unwrap();
        let order: Vec<_> = bundle
            .objects()
            .unwrap()
            .iter()
            .map(|o| {
                format!(
                    "{}/{}",
                    o.api_resource.kind,
                    o.object.metadata.name.clone().unwrap_or_default()
                )
            })
            .collect();
        assert_eq!(
            order,
            vec![
                "VirtualService/checkout",
                "Gateway/checkout-gateway",
                "VirtualService/checkout-ingress",
                "DestinationRule/checkout",
                "EnvoyFilter/shop.checkout.bucketing",
            ]
        );
    }

    #[test]
    fn owner_reference_only_in_owner_namespace() {
        let marker = OwnerMarker::new("rollout", "shop", "uid-7");
        let owner = OwnerReference {
            api_version: "mesh-manager.meshmanager.com/v1".into(),
            kind: "IstioRoute".into(),
            name: "rollout".into(),
            uid: "uid-7".into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        };
        let bundle = synthesize(&svc(RouteType::Canary))
            .unwrap()
            .with_owner(&marker, Some(owner));

        assert_eq!(bundle.virtual_service.metadata.owner_references.len(), 1);
        assert_eq!(bundle.destination_rule.metadata.owner_references.len(), 1);
        let filter = bundle.edge_script.as_ref().unwrap();
        assert!(filter.metadata.owner_references.is_empty());
        assert!(marker.matches(&filter.metadata.labels));
        for obj in bundle.objects().unwrap() {
            assert!(marker.matches(&obj.object.metadata.labels.clone().unwrap_or_default()));
        }
    }

    /// Story: whatever the script tags a request with, the host rules send it
    /// to the matching subset; callers on a dark-launch address win first
    #[test]
    fn story_script_tags_and_route_predicates_agree() {
        let mut cfg = svc(RouteType::StickyCanary);
        cfg.ratio = Some(50);
        cfg.dependencies = vec![Dependency {
            name: "payments".into(),
            namespace: "pay".into(),
            revisions: vec!["p7".into()],
        }];
        cfg.darkness_releases = vec![dark("r3", &["10.0.0.1"])];
        let bundle = synthesize(&cfg).unwrap();
        let rules = &bundle.virtual_service.spec.http;

        for token in ["alice", "bob", "carol", "dave", "erin", "frank"] {
            let tags = tag_request(&cfg, Some(&format!("Bearer {}", token))).unwrap();
            let mut headers = BTreeMap::from([(SELECTOR_HEADER.to_string(), tags.selector.clone())]);
            headers.extend(tags.dependencies.iter().cloned());

            let dest = route_request(rules, &headers).unwrap();
            assert_eq!(dest.subset.as_deref(), Some(tags.selector.as_str()));

            headers.insert(FORWARDED_FOR_HEADER.to_string(), "203.0.113.5, 10.0.0.1".into());
            let dest = route_request(rules, &headers).unwrap();
            assert_eq!(dest.subset.as_deref(), Some("r3"));
        }
    }
}
