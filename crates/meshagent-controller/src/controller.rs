//! IstioRoute controller implementation
//!
//! One pass per route, re-entrant and idempotent:
//!
//! ```text
//! fetch route -> gone? done
//!             -> no finalizer? add it, requeue now
//!             -> deleting? sweep everything we produced, drop finalizer, done
//!             -> synthesize every service, then write each bundle in order,
//!                sweep objects no longer produced, report status
//! ```
//!
//! All bundles are synthesized before the first write, so an invalid
//! service never leaves a half-applied route behind.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use meshagent_common::crd::{
    Condition, ConditionStatus, IstioRoute, IstioRouteStatus, RoutePhase, CONDITION_READY,
};
use meshagent_common::labels::{OwnerMarker, EDGE_CLEANUP_FINALIZER};
use meshagent_common::{Error, Notifier};
use meshagent_desired_state::{Differ, WriteOutcome};
use meshagent_route::{synthesize_with, RouteBundle, SynthesisOptions};

use crate::cleanup::{ensure_active, identity, sweep, ObjectIdentity};

/// Requeue interval after a successful pass
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Requeue interval after a retryable failure
const RETRY_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// Traits for dependency injection and testability
// =============================================================================

/// Kubernetes operations on the IstioRoute itself.
///
/// Writes of produced objects go through the [`Differ`]; this trait only
/// covers the parent's lifecycle.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RouteKubeClient: Send + Sync {
    /// Get an IstioRoute by name and namespace
    async fn get_route(&self, name: &str, namespace: &str) -> Result<Option<IstioRoute>, Error>;

    /// Add a finalizer if it is not present yet
    async fn add_finalizer(&self, name: &str, namespace: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Remove a finalizer if present
    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Patch the status subresource
    async fn patch_route_status(
        &self,
        name: &str,
        namespace: &str,
        status: &IstioRouteStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct RouteKubeClientImpl {
    client: Client,
    field_manager: String,
}

impl RouteKubeClientImpl {
    /// Wrap a client, patching under the given field manager
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, namespace: &str) -> Api<IstioRoute> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(
        &self,
        name: &str,
        namespace: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        self.api(namespace)
            .patch(
                name,
                &PatchParams::apply(&self.field_manager),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RouteKubeClient for RouteKubeClientImpl {
    async fn get_route(&self, name: &str, namespace: &str) -> Result<Option<IstioRoute>, Error> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn add_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let route = self.api(namespace).get(name).await?;
        let mut finalizers = route.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());
        self.patch_finalizers(name, namespace, finalizers).await
    }

    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let Some(route) = self.api(namespace).get_opt(name).await? else {
            return Ok(());
        };
        let current = route.metadata.finalizers.unwrap_or_default();
        if !current.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        let finalizers = current.into_iter().filter(|f| f != finalizer).collect();
        self.patch_finalizers(name, namespace, finalizers).await
    }

    async fn patch_route_status(
        &self,
        name: &str,
        namespace: &str,
        status: &IstioRouteStatus,
    ) -> Result<(), Error> {
        let status_patch = serde_json::json!({ "status": status });
        self.api(namespace)
            .patch_status(
                name,
                &PatchParams::apply(&self.field_manager),
                &Patch::Merge(&status_patch),
            )
            .await?;
        Ok(())
    }
}

// =============================================================================
// Controller context
// =============================================================================

/// Shared state for every reconciliation
pub struct RouteContext {
    /// Route lifecycle operations
    pub kube: Arc<dyn RouteKubeClient>,
    /// Produced-object writes
    pub differ: Differ,
    /// Phase transition notifications
    pub notifier: Arc<dyn Notifier>,
    /// Synthesis knobs
    pub synthesis: SynthesisOptions,
    /// Cancelled when the operator shuts down
    pub cancel: CancellationToken,
}

impl RouteContext {
    /// Create a new context
    pub fn new(
        kube: Arc<dyn RouteKubeClient>,
        differ: Differ,
        notifier: Arc<dyn Notifier>,
        synthesis: SynthesisOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            kube,
            differ,
            notifier,
            synthesis,
            cancel,
        }
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Reconcile an IstioRoute
#[instrument(skip(route, ctx), fields(route = %route.name_any()))]
pub async fn reconcile(route: Arc<IstioRoute>, ctx: Arc<RouteContext>) -> Result<Action, Error> {
    let name = route.name_any();
    let Some(namespace) = route.namespace() else {
        error!("IstioRoute is missing namespace");
        return Ok(Action::await_change());
    };

    ensure_active(&ctx.cancel, "fetch")?;
    let Some(route) = ctx.kube.get_route(&name, &namespace).await? else {
        debug!("route no longer exists");
        return Ok(Action::await_change());
    };

    let marker = OwnerMarker::new(&name, &namespace, route.uid().unwrap_or_default());

    if route.meta().deletion_timestamp.is_some() {
        if has_finalizer(&route) {
            finalize(&route, &marker, &ctx).await?;
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer(&route) {
        info!("adding edge cleanup finalizer");
        ensure_active(&ctx.cancel, "add finalizer")?;
        ctx.kube
            .add_finalizer(&name, &namespace, EDGE_CLEANUP_FINALIZER)
            .await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    match apply_route(&route, &marker, &ctx).await {
        Ok(services) => {
            let message = format!("{} service(s) routed", services);
            update_status(&route, &ctx, StatusUpdate::ready(&message)).await?;
            Ok(Action::requeue(RESYNC_INTERVAL))
        }
        Err(e @ Error::Cancelled { .. }) => {
            debug!(error = %e, "reconcile interrupted by shutdown");
            Err(e)
        }
        Err(e) => {
            let message = e.to_string();
            if e.is_expected_rejection() {
                debug!(error = %message, "prerequisite not configured yet");
            } else if !is_status_unchanged(&route, RoutePhase::Failed, &message) {
                warn!(error = %message, "route failed");
            }
            let update = StatusUpdate::failed(&message, !e.is_expected_rejection());
            if let Err(status_err) = update_status(&route, &ctx, update).await {
                warn!(error = %status_err, "failed to record failure status");
            }
            Err(e)
        }
    }
}

/// Error policy for the route controller
///
/// - Retryable errors: requeue after 30 seconds
/// - Configuration errors: await a spec change
pub fn error_policy(route: Arc<IstioRoute>, error: &Error, _ctx: Arc<RouteContext>) -> Action {
    error!(
        ?error,
        route = %route.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(RETRY_INTERVAL)
    } else {
        Action::await_change()
    }
}

fn has_finalizer(route: &IstioRoute) -> bool {
    route
        .finalizers()
        .iter()
        .any(|f| f == EDGE_CLEANUP_FINALIZER)
}

/// Remove everything the route produced, then release it.
///
/// Cancellation is honoured while sweeping; once the sweep is complete the
/// finalizer is always removed so deletion can finish.
async fn finalize(route: &IstioRoute, marker: &OwnerMarker, ctx: &RouteContext) -> Result<(), Error> {
    let deleted = sweep(
        ctx.differ.store().as_ref(),
        marker,
        &BTreeSet::new(),
        &ctx.cancel,
    )
    .await?;
    info!(deleted = deleted.len(), "cleaned up produced objects");

    ctx.kube
        .remove_finalizer(
            &route.name_any(),
            marker.namespace.as_str(),
            EDGE_CLEANUP_FINALIZER,
        )
        .await
}

/// Synthesize, write and sweep; returns the number of services routed
async fn apply_route(
    route: &IstioRoute,
    marker: &OwnerMarker,
    ctx: &RouteContext,
) -> Result<usize, Error> {
    route.spec.validate()?;

    let owner_ref = route.controller_owner_ref(&());
    let bundles = route
        .spec
        .services
        .iter()
        .map(|svc| {
            synthesize_with(svc, &ctx.synthesis)
                .map(|bundle| bundle.with_owner(marker, owner_ref.clone()))
        })
        .collect::<Result<Vec<RouteBundle>, Error>>()?;

    let mut produced: BTreeSet<ObjectIdentity> = BTreeSet::new();
    let mut written = 0;
    for bundle in &bundles {
        for item in bundle.objects()? {
            ensure_active(&ctx.cancel, "write bundle")?;
            let outcome = ctx
                .differ
                .create_or_update(&item.api_resource, &item.object)
                .await?;
            debug!(
                kind = %item.api_resource.kind,
                name = %item.object.name_any(),
                ?outcome,
                "bundle object written"
            );
            if outcome != WriteOutcome::Unchanged {
                written += 1;
            }
            produced.insert(identity(&item.api_resource, &item.object));
        }
    }

    let swept = sweep(ctx.differ.store().as_ref(), marker, &produced, &ctx.cancel).await?;
    info!(
        services = bundles.len(),
        written,
        swept = swept.len(),
        "route applied"
    );
    Ok(bundles.len())
}

// =============================================================================
// Status update helpers
// =============================================================================

struct StatusUpdate<'a> {
    phase: RoutePhase,
    message: &'a str,
    condition_status: ConditionStatus,
    reason: &'a str,
    notify: bool,
}

impl<'a> StatusUpdate<'a> {
    fn ready(message: &'a str) -> Self {
        Self {
            phase: RoutePhase::Ready,
            message,
            condition_status: ConditionStatus::True,
            reason: "BundlesApplied",
            notify: true,
        }
    }

    fn failed(message: &'a str, notify: bool) -> Self {
        Self {
            phase: RoutePhase::Failed,
            message,
            condition_status: ConditionStatus::False,
            reason: "ReconcileFailed",
            notify,
        }
    }
}

/// Check if the route status already matches, avoiding a self-triggered
/// reconcile loop (every condition carries a fresh timestamp).
///
/// A spec edit bumps the generation, so the status is rewritten even when
/// phase and message come out the same.
fn is_status_unchanged(route: &IstioRoute, phase: RoutePhase, message: &str) -> bool {
    route
        .status
        .as_ref()
        .map(|s| {
            s.phase == phase
                && s.message.as_deref() == Some(message)
                && s.observed_generation == route.meta().generation
        })
        .unwrap_or(false)
}

/// Patch status when phase or message changed, announcing phase transitions
async fn update_status(
    route: &IstioRoute,
    ctx: &RouteContext,
    update: StatusUpdate<'_>,
) -> Result<(), Error> {
    if is_status_unchanged(route, update.phase, update.message) {
        debug!("status unchanged, skipping update");
        return Ok(());
    }

    let name = route.name_any();
    let namespace = route.namespace().unwrap_or_default();
    let previous = route.status.as_ref().map(|s| s.phase);
    let previous_conditions = route
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();

    let status = IstioRouteStatus {
        phase: update.phase,
        message: Some(update.message.to_string()),
        observed_generation: route.meta().generation,
        conditions: vec![Condition::new(
            CONDITION_READY,
            update.condition_status,
            update.reason,
            update.message,
        )
        .since(previous_conditions)],
    };
    ctx.kube
        .patch_route_status(&name, &namespace, &status)
        .await?;

    if update.notify && previous != Some(update.phase) {
        let message = format!(
            "IstioRoute `{}/{}` is {}: {}",
            namespace, name, update.phase, update.message
        );
        if let Err(e) = ctx.notifier.notify(&message).await {
            warn!(error = %e, "failed to deliver phase notification");
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
