//! One desired-state pass: fetch, decode, reconcile routes

use std::sync::Arc;

use kube::discovery::ApiResource;
use tracing::{info, instrument, warn};

use meshagent_common::crd::IstioRoute;
use meshagent_common::{Error, Result};

use crate::differ::{Differ, KindReport};
use crate::manifest::{parse_manifest, partition_kind};
use crate::source::ManifestSource;

/// Converges the cluster's IstioRoutes onto the published manifest
pub struct DesiredStateSync {
    source: Arc<dyn ManifestSource>,
    differ: Differ,
}

impl DesiredStateSync {
    /// Create a sync over the given source and differ
    pub fn new(source: Arc<dyn ManifestSource>, differ: Differ) -> Self {
        Self { source, differ }
    }

    /// Run one pass.
    ///
    /// IstioRoutes are converged (pruned and applied); documents of any other
    /// kind are applied but never pruned. A manifest with no routes deletes
    /// every route in the cluster. A decode failure anywhere in the manifest
    /// fails the pass before any write. A "not configured" rejection in one
    /// half does not stop the other; the pass still reports it at the end.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<KindReport> {
        let text = self.source.fetch().await?;
        let documents = parse_manifest(&text)?;
        let ar = ApiResource::erase::<IstioRoute>(&());
        let (routes, others) = partition_kind(documents, &ar);

        let mut report = KindReport::default();
        let mut rejection = None;
        absorb(
            self.differ.reconcile_kind(&ar, &routes).await,
            &mut report,
            &mut rejection,
        )?;
        absorb(
            self.differ.apply_unmanaged(&others).await,
            &mut report,
            &mut rejection,
        )?;

        info!(
            applied = report.applied.len(),
            deleted = report.deleted.len(),
            unchanged = report.unchanged,
            "desired-state pass complete"
        );
        match rejection {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

/// Merge a successful half into `report`; keep an expected rejection aside
fn absorb(
    outcome: Result<KindReport>,
    report: &mut KindReport,
    rejection: &mut Option<Error>,
) -> Result<()> {
    match outcome {
        Ok(part) => report.merge(part),
        Err(e) if e.is_expected_rejection() => {
            warn!(error = %e, "desired state partially rejected");
            rejection.get_or_insert(e);
        }
        Err(e) => return Err(e),
    }
    Ok(())
}
