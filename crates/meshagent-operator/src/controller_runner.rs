//! Controller runner - builds the IstioRoute controller future
//!
//! Produced objects are watched by identity marker rather than owner
//! reference, so a drifted or deleted edge filter in the gateway namespace
//! re-triggers its route just like an object next to it.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;

use meshagent_common::crd::IstioRoute;
use meshagent_common::labels::{
    MANAGED_BY_LABEL, MANAGED_BY_VALUE, OWNER_NAMESPACE_LABEL, OWNER_NAME_LABEL,
};
use meshagent_common::{KubeObjectStore, LogNotifier, Notifier};
use meshagent_controller::cleanup::managed_kinds;
use meshagent_controller::{error_policy, reconcile, RouteContext, RouteKubeClientImpl};
use meshagent_desired_state::Differ;

use crate::config::OperatorConfig;

/// Server-side watch timeout, kept under the client's 30s read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the shared route context from a live client
pub fn build_route_context(
    client: Client,
    config: &OperatorConfig,
    cancel: CancellationToken,
) -> RouteContext {
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let differ = Differ::new(
        Arc::new(KubeObjectStore::new(client.clone())),
        notifier.clone(),
        config.field_manager.clone(),
    );
    RouteContext::new(
        Arc::new(RouteKubeClientImpl::new(client, config.field_manager.clone())),
        differ,
        notifier,
        config.synthesis_options(),
        cancel,
    )
}

/// Build the IstioRoute controller future
pub fn build_route_controller(
    client: Client,
    config: &OperatorConfig,
    cancel: CancellationToken,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let ctx = Arc::new(build_route_context(client.clone(), config, cancel));
    let routes: Api<IstioRoute> = Api::all(client.clone());
    let produced = WatcherConfig::default()
        .labels(&format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY_VALUE))
        .timeout(WATCH_TIMEOUT_SECS);

    let mut controller = Controller::new(
        routes,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    );
    for ar in managed_kinds() {
        tracing::info!(kind = %ar.kind, "- watching produced objects");
        let api: Api<DynamicObject> = Api::all_with(client.clone(), &ar);
        controller = controller.watches_with(api, ar, produced.clone(), |obj| {
            route_for(obj.labels())
        });
    }

    tracing::info!("- IstioRoute controller");
    Box::pin(
        controller
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(|result| {
                match result {
                    Ok((route, action)) => {
                        tracing::debug!(route = %route, ?action, "IstioRoute reconciled")
                    }
                    Err(e) => tracing::warn!(error = %e, "IstioRoute reconcile failed"),
                }
                std::future::ready(())
            }),
    )
}

/// Route that produced an object, read from its identity marker
pub fn route_for(labels: &BTreeMap<String, String>) -> Option<ObjectRef<IstioRoute>> {
    let name = labels.get(OWNER_NAME_LABEL)?;
    let namespace = labels.get(OWNER_NAMESPACE_LABEL)?;
    Some(ObjectRef::new(name).within(namespace))
}
