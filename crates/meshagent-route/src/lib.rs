//! Route synthesis for mesh-agent
//!
//! This crate turns a service's rollout intent into mesh objects:
//!
//! - **Compiler**: VirtualServices, Gateway, DestinationRule and EnvoyFilter for one service
//! - **Headers**: header names and the bucketing hash shared by scripts and rules
//! - **Script**: Lua bucketing scripts rendered from templates
//! - **Duration**: ejection-interval parsing

pub mod compiler;
pub mod duration;
pub mod headers;
pub mod script;

pub use compiler::{
    default_revision, edge_filter_name, synthesize, synthesize_with, BundleObject, IngressRules,
    RouteBundle, SynthesisOptions,
};
pub use script::{EdgeScript, ScriptGenerator, ScriptVariant};
