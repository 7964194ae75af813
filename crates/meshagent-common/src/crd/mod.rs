//! Custom Resource Definitions for mesh-agent

mod istio_route;
mod types;

pub use istio_route::{
    DarknessRelease, Dependency, IstioRoute, IstioRouteSpec, IstioRouteStatus, OutlierDetection,
    RoutePhase, RouteType, ServiceConfig, MAX_SESSION_DURATION_SECS,
};
pub use types::{Condition, ConditionStatus, CONDITION_READY};

/// Maximum length of a DNS label
pub const MAX_DNS_LABEL_LEN: usize = 63;

/// Validate an RFC 1123 DNS label (lowercase alphanumeric with inner hyphens).
///
/// Used for service and namespace names, which end up in object names and hosts.
pub fn validate_dns_label(s: &str, what: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err(format!("{} cannot be empty", what));
    }
    if s.len() > MAX_DNS_LABEL_LEN {
        return Err(format!(
            "{} must be at most {} characters: {}",
            what, MAX_DNS_LABEL_LEN, s
        ));
    }

    for c in s.chars() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return Err(format!(
                "{} must be lowercase alphanumeric with hyphens: {}",
                what, s
            ));
        }
    }

    if s.starts_with('-') || s.ends_with('-') {
        return Err(format!("{} cannot start or end with a hyphen: {}", what, s));
    }

    Ok(())
}

/// Validate a revision identifier.
///
/// Revisions are embedded in subset names, header values and the edge
/// script, so only `[A-Za-z0-9._-]` is accepted.
pub fn validate_revision(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("revision cannot be empty".to_string());
    }
    if s.len() > MAX_DNS_LABEL_LEN {
        return Err(format!(
            "revision must be at most {} characters: {}",
            MAX_DNS_LABEL_LEN, s
        ));
    }
    if let Some(c) = s
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '_' | '-'))
    {
        return Err(format!("revision contains invalid character {:?}: {}", c, s));
    }
    Ok(())
}
