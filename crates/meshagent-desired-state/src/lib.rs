//! Desired-state reconciliation for mesh-agent
//!
//! An external backend publishes the routes this cluster should run as a
//! multi-document manifest. This crate decodes it and converges the cluster
//! onto it one kind at a time:
//!
//! - **Manifest**: splitting and decoding of `---`-separated documents
//! - **Differ**: prune/apply of one kind, and single-object create-or-update
//! - **Messages**: notification text for prunes, applies and failures
//! - **Source**: where the manifest comes from (HTTP in production)
//! - **Sync**: one fetch-decode-reconcile pass

pub mod differ;
pub mod manifest;
pub mod messages;
pub mod source;
pub mod sync;

pub use differ::{needs_update, payload_differs, Differ, KindReport, WriteOutcome};
pub use manifest::{parse_manifest, partition_kind, DesiredObject};
pub use source::{HttpManifestSource, ManifestSource};
pub use sync::DesiredStateSync;
