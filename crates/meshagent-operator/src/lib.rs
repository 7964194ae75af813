//! mesh-agent operator: wiring for the IstioRoute controller and the
//! desired-state sync loop

#![deny(missing_docs)]

/// Startup configuration from flags and environment
pub mod config;
/// IstioRoute controller construction
pub mod controller_runner;
/// Dry-run bundle rendering
pub mod render;
/// Periodic desired-state sync
pub mod sync_loop;

pub use config::OperatorConfig;
