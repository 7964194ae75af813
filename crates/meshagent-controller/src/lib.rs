//! IstioRoute controller for mesh-agent
//!
//! - **Controller**: the per-route state machine (finalizer, synthesis,
//!   ordered writes, status) and its kube client seam
//! - **Cleanup**: marker-based sweeps for stale and deleted routes

pub mod cleanup;
pub mod controller;

pub use controller::{
    error_policy, reconcile, RouteContext, RouteKubeClient, RouteKubeClientImpl,
};
