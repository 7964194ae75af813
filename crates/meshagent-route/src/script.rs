//! Bucketing script generator
//!
//! The edge proxy runs a Lua filter that hashes the caller credential into a
//! bucket and tags the request with the selected revision. Four templates
//! cover {Canary, StickyCanary} x {independent, dependency-aware}; all of
//! them share one prelude and take every header name and hash constant from
//! [`crate::headers`].

use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use serde::Serialize;

use meshagent_common::crd::{RouteType, ServiceConfig};
use meshagent_common::{service_host, Error, Result};

use crate::headers::{
    pinned_dependencies, BEARER_PREFIX, BUCKET_COUNT, CREDENTIAL_HEADER, HASH_MULTIPLIER,
    SELECTOR_HEADER, SESSION_HEADER,
};

const PRELUDE: &str = include_str!("templates/prelude.lua.j2");
const CANARY: &str = include_str!("templates/canary.lua.j2");
const STICKY_CANARY: &str = include_str!("templates/sticky_canary.lua.j2");
const DEPENDENT_CANARY: &str = include_str!("templates/dependent_canary.lua.j2");
const DEPENDENT_STICKY_CANARY: &str = include_str!("templates/dependent_sticky_canary.lua.j2");

/// Script template variant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptVariant {
    /// Ratio split
    Canary,
    /// Ratio split with a session header for consistent hashing
    StickyCanary,
    /// Ratio split that also pins dependency revisions
    DependentCanary,
    /// Sticky split that also pins dependency revisions
    DependentStickyCanary,
}

impl ScriptVariant {
    /// Variant for a service; None for strategies without a script
    pub fn for_service(cfg: &ServiceConfig) -> Option<Self> {
        let dependent = !cfg.dependencies.is_empty();
        match (cfg.route_type, dependent) {
            (RouteType::Standard, _) => None,
            (RouteType::Canary, false) => Some(Self::Canary),
            (RouteType::Canary, true) => Some(Self::DependentCanary),
            (RouteType::StickyCanary, false) => Some(Self::StickyCanary),
            (RouteType::StickyCanary, true) => Some(Self::DependentStickyCanary),
        }
    }

    /// Template name
    pub fn template_name(&self) -> &'static str {
        match self {
            Self::Canary => "canary.lua.j2",
            Self::StickyCanary => "sticky_canary.lua.j2",
            Self::DependentCanary => "dependent_canary.lua.j2",
            Self::DependentStickyCanary => "dependent_sticky_canary.lua.j2",
        }
    }

    /// Whether the variant emits the session header
    pub fn is_sticky(&self) -> bool {
        matches!(self, Self::StickyCanary | Self::DependentStickyCanary)
    }
}

impl std::fmt::Display for ScriptVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Canary => write!(f, "canary"),
            Self::StickyCanary => write!(f, "sticky-canary"),
            Self::DependentCanary => write!(f, "dependent-canary"),
            Self::DependentStickyCanary => write!(f, "dependent-sticky-canary"),
        }
    }
}

/// A rendered script
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeScript {
    /// Template variant used
    pub variant: ScriptVariant,
    /// Lua source
    pub source: String,
}

#[derive(Serialize)]
struct DependencyContext {
    header: String,
    revision: String,
}

#[derive(Serialize)]
struct ScriptContext<'a> {
    variant: String,
    host: String,
    ratio: u32,
    stable: &'a str,
    canary: &'a str,
    credential_header: &'static str,
    bearer_prefix: &'static str,
    selector_header: &'static str,
    session_header: &'static str,
    hash_multiplier: u32,
    bucket_count: u32,
    dependencies: Vec<DependencyContext>,
}

/// Renders bucketing scripts from the fixed template set
pub struct ScriptGenerator {
    env: Environment<'static>,
}

impl ScriptGenerator {
    /// Load the templates
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);

        for (name, source) in [
            ("prelude.lua.j2", PRELUDE),
            (ScriptVariant::Canary.template_name(), CANARY),
            (ScriptVariant::StickyCanary.template_name(), STICKY_CANARY),
            (ScriptVariant::DependentCanary.template_name(), DEPENDENT_CANARY),
            (
                ScriptVariant::DependentStickyCanary.template_name(),
                DEPENDENT_STICKY_CANARY,
            ),
        ] {
            env.add_template(name, source).map_err(|e| {
                Error::internal_with_context("script templates", format!("{}: {}", name, e))
            })?;
        }

        Ok(Self { env })
    }

    /// Render the script for a service.
    ///
    /// Returns `Ok(None)` when there is nothing to split: Standard routing,
    /// or fewer than two revisions. Callers synthesizing a canary must treat
    /// that as a configuration error.
    pub fn generate(&self, cfg: &ServiceConfig) -> Result<Option<EdgeScript>> {
        let Some(variant) = ScriptVariant::for_service(cfg) else {
            return Ok(None);
        };
        if cfg.revisions.len() < 2 {
            return Ok(None);
        }

        let ctx = ScriptContext {
            variant: variant.to_string(),
            host: service_host(&cfg.name, &cfg.namespace),
            ratio: cfg.ratio_or_zero(),
            stable: &cfg.revisions[0],
            canary: &cfg.revisions[1],
            credential_header: CREDENTIAL_HEADER,
            bearer_prefix: BEARER_PREFIX,
            selector_header: SELECTOR_HEADER,
            session_header: SESSION_HEADER,
            hash_multiplier: HASH_MULTIPLIER,
            bucket_count: BUCKET_COUNT,
            dependencies: pinned_dependencies(cfg)
                .into_iter()
                .map(|(header, revision)| DependencyContext { header, revision })
                .collect(),
        };

        let source = self
            .env
            .get_template(variant.template_name())
            .and_then(|t| t.render(&ctx))
            .map_err(|e| {
                Error::internal_with_context(
                    "script render",
                    format!("{} for {}: {}", variant, cfg.key(), e),
                )
            })?;

        Ok(Some(EdgeScript { variant, source }))
    }
}
