//! IstioRoute CRD: progressive-delivery intent for one or more services
//!
//! Each `ServiceConfig` describes how traffic for one service is split across
//! at most two revisions, which callers are pinned to a dark launch, and which
//! dependency revisions must travel along as request headers.

use std::collections::BTreeSet;
use std::net::IpAddr;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use super::{validate_dns_label, validate_revision};
use crate::Error;

/// Upper bound for `sessionDuration`
pub const MAX_SESSION_DURATION_SECS: u32 = 3600;

// =============================================================================
// CRD
// =============================================================================

/// Spec for an IstioRoute
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "mesh-manager.meshmanager.com",
    version = "v1",
    kind = "IstioRoute",
    plural = "istioroutes",
    shortname = "ir",
    namespaced,
    status = "IstioRouteStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Message","type":"string","jsonPath":".status.message"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IstioRouteSpec {
    /// Services whose routing this route owns
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// Routing strategy for a service
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum RouteType {
    /// All traffic to the default revision
    #[default]
    Standard,
    /// Ratio split between two revisions
    Canary,
    /// Ratio split with the whole session pinned to one revision
    StickyCanary,
}

impl RouteType {
    /// Whether this strategy splits traffic between two revisions
    pub fn is_split(&self) -> bool {
        !matches!(self, RouteType::Standard)
    }
}

impl std::fmt::Display for RouteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "Standard"),
            Self::Canary => write!(f, "Canary"),
            Self::StickyCanary => write!(f, "StickyCanary"),
        }
    }
}

/// One service's rollout intent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Service namespace
    pub namespace: String,

    /// Routing strategy
    #[serde(rename = "type", default)]
    pub route_type: RouteType,

    /// Revision identifiers in play (commit hashes); index 1 is the canary
    #[serde(rename = "commitHashes", alias = "revisions", default)]
    pub revisions: Vec<String>,

    /// Percentage of traffic sent to `revisions[1]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<u32>,

    /// Services whose revision is pinned through request headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,

    /// Sticky session TTL in seconds
    #[serde(
        rename = "sessionDuration",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_duration_seconds: Option<u32>,

    /// Failure ejection policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlier_detection: Option<OutlierDetection>,

    /// IP-scoped dark launches, evaluated before any other rule
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub darkness_releases: Vec<DarknessRelease>,
}

/// A dependency whose revision travels with the request
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Dependency service name
    pub name: String,
    /// Dependency namespace
    pub namespace: String,
    /// Pinned revisions; the first one is used, none means unconstrained
    #[serde(rename = "commitHashes", alias = "revisions", default)]
    pub revisions: Vec<String>,
}

impl Dependency {
    /// Revision this dependency is pinned to, if any
    pub fn pinned_revision(&self) -> Option<&str> {
        self.revisions.first().map(String::as_str)
    }
}

/// Outlier detection (ejection) policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutlierDetection {
    /// Consecutive 5xx responses before ejection
    #[serde(
        rename = "consecutive5xxErrors",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub consecutive_5xx_errors: Option<u32>,
    /// Consecutive gateway errors before ejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consecutive_gateway_errors: Option<u32>,
    /// Analysis interval as a duration string (e.g. "10s", "1m30s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

/// Dark launch of a revision to an enumerated set of caller addresses
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DarknessRelease {
    /// Revision served to the listed callers
    #[serde(rename = "commitHash", alias = "revision")]
    pub revision: String,
    /// Caller addresses
    #[serde(default)]
    pub ips: Vec<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Status of an IstioRoute
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IstioRouteStatus {
    /// Current phase
    #[serde(default)]
    pub phase: RoutePhase,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Last observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Phase of an IstioRoute
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RoutePhase {
    /// Waiting for reconciliation
    #[default]
    Pending,
    /// All bundles applied
    Ready,
    /// Synthesis or apply failed
    Failed,
}

impl std::fmt::Display for RoutePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

impl IstioRouteSpec {
    /// Validate every service, and that no two services share an identity
    pub fn validate(&self) -> Result<(), Error> {
        let mut seen = BTreeSet::new();
        for (idx, svc) in self.services.iter().enumerate() {
            svc.validate().map_err(|e| match e {
                Error::Validation {
                    resource,
                    message,
                    field,
                } => Error::Validation {
                    resource,
                    message,
                    field: Some(match field {
                        Some(f) => format!("services[{}].{}", idx, f),
                        None => format!("services[{}]", idx),
                    }),
                },
                other => other,
            })?;
            if !seen.insert((svc.namespace.as_str(), svc.name.as_str())) {
                return Err(Error::validation_for_field(
                    svc.key(),
                    format!("services[{}]", idx),
                    "service listed more than once",
                ));
            }
        }
        Ok(())
    }
}

impl ServiceConfig {
    /// `namespace/name` identity used in logs and errors
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Ratio, treating an absent value as zero
    pub fn ratio_or_zero(&self) -> u32 {
        self.ratio.unwrap_or(0)
    }

    /// Revisions covered by a darkness release, in declaration order
    pub fn dark_revisions(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for dr in &self.darkness_releases {
            if !out.contains(&dr.revision.as_str()) {
                out.push(dr.revision.as_str());
            }
        }
        out
    }

    /// Validate the rollout intent.
    ///
    /// Failures are configuration errors: nothing is synthesized or written
    /// for an invalid service.
    pub fn validate(&self) -> Result<(), Error> {
        let key = self.key();
        let invalid = |field: &str, msg: String| Error::validation_for_field(&key, field, msg);

        validate_dns_label(&self.name, "name").map_err(|m| invalid("name", m))?;
        validate_dns_label(&self.namespace, "namespace").map_err(|m| invalid("namespace", m))?;

        if self.revisions.is_empty() || self.revisions.len() > 2 {
            return Err(invalid(
                "commitHashes",
                format!("expected 1 or 2 revisions, got {}", self.revisions.len()),
            ));
        }
        for rev in &self.revisions {
            validate_revision(rev).map_err(|m| invalid("commitHashes", m))?;
        }
        if self.revisions.len() == 2 && self.revisions[0] == self.revisions[1] {
            return Err(invalid(
                "commitHashes",
                format!("revisions must be distinct: {}", self.revisions[0]),
            ));
        }

        match (self.route_type.is_split(), self.ratio) {
            (true, None) => {
                return Err(invalid(
                    "ratio",
                    format!("ratio is required for {}", self.route_type),
                ))
            }
            (false, Some(_)) => {
                return Err(invalid("ratio", "ratio is only valid for canary types".into()))
            }
            (true, Some(r)) if r > 100 => {
                return Err(invalid("ratio", format!("ratio must be 0-100, got {}", r)))
            }
            _ => {}
        }
        if self.route_type.is_split() && self.revisions.len() != 2 {
            return Err(invalid(
                "commitHashes",
                format!("{} requires exactly 2 revisions", self.route_type),
            ));
        }

        if let Some(secs) = self.session_duration_seconds {
            if secs == 0 || secs > MAX_SESSION_DURATION_SECS {
                return Err(invalid(
                    "sessionDuration",
                    format!(
                        "sessionDuration must be 1-{}, got {}",
                        MAX_SESSION_DURATION_SECS, secs
                    ),
                ));
            }
        }

        let mut deps = BTreeSet::new();
        for (i, dep) in self.dependencies.iter().enumerate() {
            let field = format!("dependencies[{}]", i);
            validate_dns_label(&dep.name, "dependency name").map_err(|m| invalid(&field, m))?;
            validate_dns_label(&dep.namespace, "dependency namespace")
                .map_err(|m| invalid(&field, m))?;
            if !deps.insert((dep.namespace.as_str(), dep.name.as_str())) {
                return Err(invalid(
                    &field,
                    format!("dependency {}/{} listed more than once", dep.namespace, dep.name),
                ));
            }
            for rev in &dep.revisions {
                validate_revision(rev).map_err(|m| invalid(&field, m))?;
            }
        }

        for (i, dr) in self.darkness_releases.iter().enumerate() {
            let field = format!("darknessReleases[{}]", i);
            validate_revision(&dr.revision).map_err(|m| invalid(&field, m))?;
            if dr.ips.is_empty() {
                return Err(invalid(&field, "darkness release needs at least one ip".into()));
            }
            for ip in &dr.ips {
                ip.parse::<IpAddr>()
                    .map_err(|_| invalid(&field, format!("invalid ip address: {}", ip)))?;
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
