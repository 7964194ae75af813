//! Header names and the bucketing hash
//!
//! The edge script tags requests and the routing rules match those tags, so
//! every header name and the hash formula live here and nowhere else. The
//! script templates receive these values as render context; the route
//! synthesizer uses them to build match predicates.

use meshagent_common::crd::{Dependency, ServiceConfig};

/// Header carrying the revision selected for the request
pub const SELECTOR_HEADER: &str = "x-canary-version";

/// Header carrying the bucket, hashed by the sticky load balancer
pub const SESSION_HEADER: &str = "x-session-id";

/// Header carrying the caller credential
pub const CREDENTIAL_HEADER: &str = "authorization";

/// Prefix stripped from the credential before hashing
pub const BEARER_PREFIX: &str = "Bearer ";

/// Header carrying the caller address chain
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Prefix of per-dependency revision headers
pub const DEPENDENCY_HEADER_PREFIX: &str = "x-dep-";

/// Rolling hash multiplier
pub const HASH_MULTIPLIER: u32 = 31;

/// Number of buckets; the ratio is a percentage of these
pub const BUCKET_COUNT: u32 = 100;

/// Header pinning the revision of a dependency.
///
/// `.` cannot occur in a namespace or service name, so distinct
/// dependencies never share a header.
pub fn dependency_header(dep: &Dependency) -> String {
    format!("{}{}.{}", DEPENDENCY_HEADER_PREFIX, dep.namespace, dep.name)
}

/// Extract the credential from an `authorization` header value.
///
/// A leading `Bearer ` is stripped; an empty remainder is no credential.
pub fn credential_from_header(value: &str) -> Option<&str> {
    let token = value.strip_prefix(BEARER_PREFIX).unwrap_or(value);
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Bucket of a credential: `h = (h * 31 + byte) % 100` over its bytes
pub fn bucket_for(credential: &str) -> u32 {
    credential
        .bytes()
        .fold(0u32, |h, b| (h * HASH_MULTIPLIER + u32::from(b)) % BUCKET_COUNT)
}

/// Revision selected for a bucket: `revisions[1]` below the ratio
pub fn revision_for_bucket<'a>(bucket: u32, ratio: u32, stable: &'a str, canary: &'a str) -> &'a str {
    if bucket < ratio {
        canary
    } else {
        stable
    }
}

/// Anchored regex matching `ip` as a whole element of `x-forwarded-for`
pub fn exact_ip_regex(ip: &str) -> String {
    format!(r"^(.*,\s*)?{}(\s*,.*)?$", escape_regex(ip))
}

/// Whether `ip` is one of the comma-separated elements of a forwarded-for value.
///
/// Element-wise equivalent of [`exact_ip_regex`].
pub fn forwarded_for_contains(value: &str, ip: &str) -> bool {
    value.split(',').any(|element| element.trim() == ip)
}

fn escape_regex(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for c in s.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Headers the edge script sets on one request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestTags {
    /// Selected revision
    pub selector: String,
    /// Bucket, for sticky variants with a credential
    pub session: Option<String>,
    /// `(header, revision)` per pinned dependency, for dependency-aware variants
    pub dependencies: Vec<(String, String)>,
}

/// What the edge script does to a request, computed natively.
///
/// Returns None for configurations without a script (Standard, or fewer
/// than two revisions).
pub fn tag_request(cfg: &ServiceConfig, authorization: Option<&str>) -> Option<RequestTags> {
    if !cfg.route_type.is_split() || cfg.revisions.len() < 2 {
        return None;
    }
    let stable = cfg.revisions[0].as_str();
    let canary = cfg.revisions[1].as_str();
    let sticky = matches!(
        cfg.route_type,
        meshagent_common::crd::RouteType::StickyCanary
    );

    let bucket = authorization
        .and_then(credential_from_header)
        .map(bucket_for);
    let selector = match bucket {
        Some(b) => revision_for_bucket(b, cfg.ratio_or_zero(), stable, canary),
        None => stable,
    };

    Some(RequestTags {
        selector: selector.to_string(),
        session: if sticky {
            bucket.map(|b| b.to_string())
        } else {
            None
        },
        dependencies: pinned_dependencies(cfg),
    })
}

/// `(header, revision)` for every dependency with a pinned revision
pub fn pinned_dependencies(cfg: &ServiceConfig) -> Vec<(String, String)> {
    cfg.dependencies
        .iter()
        .filter_map(|dep| {
            dep.pinned_revision()
                .map(|rev| (dependency_header(dep), rev.to_string()))
        })
        .collect()
}
