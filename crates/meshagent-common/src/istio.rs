//! Istio traffic-management types
//!
//! Typed renditions of the mesh objects the route synthesizer emits:
//! - VirtualService: ordered host routing rules
//! - DestinationRule: revision subsets and traffic policy
//! - Gateway: ingress listener for the edge proxy
//! - EnvoyFilter: Lua bucketing script on the ingress gateway
//!
//! Maps are BTreeMaps and empty fields are skipped so serialization is
//! byte-for-byte reproducible.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::kube_utils::{HasApiResource, ObjectMeta};

/// Istio VirtualService: ordered routing rules for a host
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualService {
    /// API version
    #[serde(default = "VirtualService::api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "VirtualService::kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: VirtualServiceSpec,
}

impl HasApiResource for VirtualService {
    const API_VERSION: &'static str = "networking.istio.io/v1beta1";
    const KIND: &'static str = "VirtualService";
}

impl VirtualService {
    fn api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new VirtualService
    pub fn new(metadata: ObjectMeta, spec: VirtualServiceSpec) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata,
            spec,
        }
    }
}

/// Istio DestinationRule: revision subsets and traffic policy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRule {
    /// API version
    #[serde(default = "DestinationRule::api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "DestinationRule::kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: DestinationRuleSpec,
}

impl HasApiResource for DestinationRule {
    const API_VERSION: &'static str = "networking.istio.io/v1beta1";
    const KIND: &'static str = "DestinationRule";
}

impl DestinationRule {
    fn api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new DestinationRule
    pub fn new(metadata: ObjectMeta, spec: DestinationRuleSpec) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata,
            spec,
        }
    }
}

/// Istio Gateway bound to the ingress gateway pods
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Gateway {
    /// API version
    #[serde(default = "Gateway::api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Gateway::kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: GatewaySpec,
}

impl HasApiResource for Gateway {
    const API_VERSION: &'static str = "networking.istio.io/v1beta1";
    const KIND: &'static str = "Gateway";
}

impl Gateway {
    fn api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new Gateway
    pub fn new(metadata: ObjectMeta, spec: GatewaySpec) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata,
            spec,
        }
    }
}

/// Istio EnvoyFilter patching the ingress gateway's HTTP filter chain
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyFilter {
    /// API version
    #[serde(default = "EnvoyFilter::api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "EnvoyFilter::kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: EnvoyFilterSpec,
}

impl HasApiResource for EnvoyFilter {
    const API_VERSION: &'static str = "networking.istio.io/v1alpha3";
    const KIND: &'static str = "EnvoyFilter";
}

impl EnvoyFilter {
    fn api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new EnvoyFilter
    pub fn new(metadata: ObjectMeta, spec: EnvoyFilterSpec) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata,
            spec,
        }
    }
}

// =============================================================================
// VirtualService
// =============================================================================

/// VirtualService spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceSpec {
    /// Hosts this service answers for
    pub hosts: Vec<String>,
    /// Gateways the rules bind to (empty means mesh-internal)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,
    /// Ordered HTTP rules; the first match wins
    #[serde(default)]
    pub http: Vec<HttpRoute>,
}

/// One HTTP routing rule
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    /// Rule name, for readability in istioctl output
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Match conditions (ORed); empty matches everything
    #[serde(rename = "match", default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpMatchRequest>,
    /// Destinations
    pub route: Vec<HttpRouteDestination>,
}

/// Header conditions (ANDed)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpMatchRequest {
    /// Header name to string match
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, StringMatch>,
}

/// String matcher
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StringMatch {
    /// Exact value
    Exact(String),
    /// RE2 regular expression
    Regex(String),
}

/// Weighted destination of a rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteDestination {
    /// Destination
    pub destination: Destination,
    /// Weight (omitted for a single destination)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

/// Host and optional subset
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Service host
    pub host: String,
    /// DestinationRule subset name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset: Option<String>,
}

// =============================================================================
// DestinationRule
// =============================================================================

/// DestinationRule spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRuleSpec {
    /// Service host
    pub host: String,
    /// Traffic policy; always present, possibly empty
    #[serde(default)]
    pub traffic_policy: TrafficPolicy,
    /// Revision subsets
    #[serde(default)]
    pub subsets: Vec<Subset>,
}

/// Traffic policy
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPolicy {
    /// Load balancing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancerSettings>,
    /// Outlier detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlier_detection: Option<OutlierDetectionPolicy>,
}

impl TrafficPolicy {
    /// Whether the policy carries no settings
    pub fn is_empty(&self) -> bool {
        self.load_balancer.is_none() && self.outlier_detection.is_none()
    }
}

/// Load balancer settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSettings {
    /// Consistent hashing
    pub consistent_hash: ConsistentHashLb,
}

/// Consistent hash keyed on a request header
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsistentHashLb {
    /// Header whose value is hashed
    pub http_header_name: String,
}

/// Ejection policy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutlierDetectionPolicy {
    /// Consecutive 5xx before ejection
    #[serde(
        rename = "consecutive5xxErrors",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub consecutive_5xx_errors: Option<u32>,
    /// Consecutive gateway errors before ejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consecutive_gateway_errors: Option<u32>,
    /// Analysis interval (e.g. "10s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Minimum ejection duration
    pub base_ejection_time: String,
    /// Maximum share of hosts that may be ejected
    pub max_ejection_percent: u32,
    /// Outlier detection is disabled below this healthy share
    pub min_health_percent: u32,
}

/// Named subset selecting one revision
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subset {
    /// Subset name
    pub name: String,
    /// Pod label selector
    pub labels: BTreeMap<String, String>,
}

// =============================================================================
// Gateway
// =============================================================================

/// Gateway spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// Gateway pod selector
    pub selector: BTreeMap<String, String>,
    /// Listeners
    pub servers: Vec<Server>,
}

/// Gateway listener
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    /// Port
    pub port: Port,
    /// Hosts exposed on this listener
    pub hosts: Vec<String>,
}

/// Listener port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    /// Port number
    pub number: u16,
    /// Port name
    pub name: String,
    /// Protocol (HTTP, HTTPS, ...)
    pub protocol: String,
}

// =============================================================================
// EnvoyFilter
// =============================================================================

/// EnvoyFilter spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyFilterSpec {
    /// Proxies this filter applies to
    pub workload_selector: WorkloadSelector,
    /// Patches
    pub config_patches: Vec<EnvoyConfigPatch>,
}

/// Workload selector
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelector {
    /// Pod labels
    pub labels: BTreeMap<String, String>,
}

/// One config patch
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyConfigPatch {
    /// Patch target (e.g. HTTP_FILTER)
    pub apply_to: String,
    /// Where to patch
    #[serde(rename = "match")]
    pub match_: EnvoyPatchMatch,
    /// What to patch
    pub patch: EnvoyPatch,
}

/// Patch match on a listener filter chain
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyPatchMatch {
    /// Proxy context (GATEWAY, SIDECAR_INBOUND, ...)
    pub context: String,
    /// Listener match
    pub listener: ListenerMatch,
}

/// Listener match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerMatch {
    /// Filter chain
    pub filter_chain: FilterChainMatch,
}

/// Filter chain match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterChainMatch {
    /// Network filter
    pub filter: FilterMatch,
}

/// Network filter match, optionally narrowed to an HTTP sub-filter
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterMatch {
    /// Network filter name
    pub name: String,
    /// HTTP filter within the connection manager
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_filter: Option<SubFilterMatch>,
}

/// HTTP filter match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubFilterMatch {
    /// HTTP filter name
    pub name: String,
}

/// Patch operation and value
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyPatch {
    /// Operation (INSERT_BEFORE, MERGE, ...)
    pub operation: String,
    /// Inserted filter
    pub value: LuaHttpFilter,
}

/// Lua HTTP filter as Envoy expects it (proto field names)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LuaHttpFilter {
    /// Filter name
    pub name: String,
    /// Typed config
    pub typed_config: LuaTypedConfig,
}

/// Lua filter typed config
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LuaTypedConfig {
    /// Proto type URL
    #[serde(rename = "@type")]
    pub type_url: String,
    /// Script source
    pub inline_code: String,
}

/// Envoy type URL of the Lua filter config
pub const LUA_FILTER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.lua.v3.Lua";

impl LuaHttpFilter {
    /// Wrap an inline Lua script
    pub fn inline(code: impl Into<String>) -> Self {
        Self {
            name: "envoy.filters.http.lua".to_string(),
            typed_config: LuaTypedConfig {
                type_url: LUA_FILTER_TYPE_URL.to_string(),
                inline_code: code.into(),
            },
        }
    }
}
