#![warn(
    // Base lints.
    clippy::all,
    // Some pedantic lints.
    clippy::pedantic,
    // New lints which are cool.
    clippy::nursery,
)]
#![
    allow(
        // I don't care about this.
        clippy::module_name_repetitions,
        // Yo, the hell you should put
        // it in docs, if signature is clear as sky.
        clippy::missing_errors_doc
    )
]

use clap::Parser;
use config::OperatorConfig;
use do_api::DoClient;
use error::{LBControllerError, LBControllerResult};
use futures::StreamExt;
use k8s_openapi::{
    api::core::v1::{Node, Service},
    serde_json::json,
};
use kube::{
    api::{ListParams, Patch, PatchParams},
    runtime::{controller::Action, watcher, Controller},
    Resource, ResourceExt,
};
use lb::{CloudLoadBalancer, LoadBalancers};
use patcher::KubeServiceApi;
use std::{collections::BTreeSet, sync::Arc, time::Duration};

pub mod config;
pub mod consts;
pub mod do_api;
pub mod error;
pub mod finalizers;
pub mod forwarding;
pub mod health_check;
pub mod lb;
pub mod lb_config;
pub mod locator;
pub mod models;
pub mod nodes;
pub mod patcher;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> LBControllerResult<()> {
    dotenvy::dotenv().ok();
    let operator_config = config::OperatorConfig::parse();
    tracing_subscriber::fmt()
        .with_max_level(operator_config.log_level)
        .init();

    tracing::info!("Starting do-lb-controller v{}", env!("CARGO_PKG_VERSION"));
    let do_client = DoClient::new(
        operator_config.api_url.clone(),
        operator_config.access_token.clone(),
    )
    .map_err(|err| LBControllerError::api("failed to build DigitalOcean client", err))?;
    let kube_client = kube::Client::try_default().await?;
    tracing::info!("Kube client is connected");

    let load_balancers = LoadBalancers::new(
        Arc::new(do_client),
        Arc::new(KubeServiceApi::new(kube_client.clone())),
        operator_config.region.clone(),
        operator_config.cluster_id.clone(),
        operator_config.vpc_id.clone(),
    );
    let context = Arc::new(CurrentContext::new(
        kube_client.clone(),
        operator_config,
        Arc::new(load_balancers),
    ));

    tokio::spawn(sync_nodes(context.clone()));

    tracing::info!("Starting the controller");
    Controller::new(
        kube::Api::<Service>::all(kube_client),
        watcher::Config::default(),
    )
    .run(reconcile_service, on_error, context)
    .for_each(|reconcilation_result| async move {
        match reconcilation_result {
            Ok((service, _action)) => {
                tracing::info!("Reconcilation of a service {} was successful", service.name);
            }
            Err(err) => match err {
                // During reconcilation process,
                // the controller has decided to skip the service.
                kube::runtime::controller::Error::ReconcilerFailed(
                    LBControllerError::SkipService,
                    _,
                ) => {}
                _ => {
                    tracing::error!("Error reconciling service: {:#?}", err);
                }
            },
        }
    })
    .await;
    Ok(())
}

#[derive(Clone)]
pub struct CurrentContext {
    pub client: kube::Client,
    pub config: OperatorConfig,
    pub load_balancers: Arc<dyn CloudLoadBalancer>,
}
impl CurrentContext {
    #[must_use]
    pub fn new(
        client: kube::Client,
        config: OperatorConfig,
        load_balancers: Arc<dyn CloudLoadBalancer>,
    ) -> Self {
        Self {
            client,
            config,
            load_balancers,
        }
    }
}

fn is_load_balancer(svc: &Service) -> bool {
    svc.spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .is_some_and(|type_| type_ == "LoadBalancer")
}

/// Whether the load balancer of a service has to be torn down: the service
/// still holds the cleanup finalizer but is being deleted or is no longer of
/// type `LoadBalancer`.
fn needs_cleanup(svc: &Service) -> bool {
    finalizers::check(svc) && (svc.meta().deletion_timestamp.is_some() || !is_load_balancer(svc))
}

fn is_eligible(node: &Node) -> bool {
    !node
        .labels()
        .contains_key(consts::EXCLUDE_FROM_LB_LABEL_NAME)
}

/// Nodes that may receive load balancer traffic.
async fn eligible_nodes(client: kube::Client) -> LBControllerResult<Vec<Node>> {
    let nodes = kube::Api::<Node>::all(client)
        .list(&ListParams::default())
        .await?
        .into_iter()
        .filter(is_eligible)
        .collect::<Vec<_>>();
    Ok(nodes)
}

/// Reconcile the service.
/// This function is called by the controller for each service.
/// It will create or update the load balancer based on the service.
/// If the service is being deleted, it will clean up the resources.
#[tracing::instrument(skip(svc,context), fields(service=svc.name_any()))]
pub async fn reconcile_service(
    svc: Arc<Service>,
    context: Arc<CurrentContext>,
) -> LBControllerResult<Action> {
    let mut svc = svc.as_ref().clone();
    let cluster_name = context.config.cluster_name.as_str();

    if needs_cleanup(&svc) {
        tracing::info!("Service deletion or type change detected. Cleaning up resources.");
        match context
            .load_balancers
            .get_load_balancer(cluster_name, &mut svc)
            .await?
        {
            Some(_) => tracing::info!("Deleting load-balancer of the service"),
            None => tracing::info!("Service has no load-balancer left"),
        }
        context
            .load_balancers
            .ensure_load_balancer_deleted(cluster_name, &mut svc)
            .await?;
        finalizers::remove(context.client.clone(), &svc).await?;
        if is_load_balancer(&svc) {
            return Ok(Action::await_change());
        }
    }

    if !is_load_balancer(&svc) {
        tracing::debug!("Service type is not LoadBalancer. Skipping...");
        return Err(LBControllerError::SkipService);
    }
    if svc.meta().deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    tracing::info!("Starting service reconcilation");

    // Add finalizer if it's not there yet.
    if !finalizers::check(&svc) {
        finalizers::add(context.client.clone(), &svc).await?;
    }

    let nodes = eligible_nodes(context.client.clone()).await?;
    let status = context
        .load_balancers
        .ensure_load_balancer(cluster_name, &mut svc, &nodes)
        .await?;

    let namespace = svc
        .namespace()
        .ok_or(LBControllerError::MissingObjectKey("namespace"))?;
    kube::Api::<Service>::namespaced(context.client.clone(), &namespace)
        .patch_status(
            svc.name_any().as_str(),
            &PatchParams::default(),
            &Patch::Merge(json!({
                "status": {
                    "loadBalancer": status
                }
            })),
        )
        .await?;

    Ok(Action::requeue(Duration::from_secs(context.config.requeue_seconds)))
}

/// What node membership depends on: the node name and its provider id.
fn node_keys(nodes: &[Node]) -> BTreeSet<(String, Option<String>)> {
    nodes
        .iter()
        .map(|node| {
            let provider_id = node.spec.as_ref().and_then(|spec| spec.provider_id.clone());
            (node.name_any(), provider_id)
        })
        .collect()
}

/// Push node membership changes to every managed load balancer.
///
/// The first listing only records the current node set.
async fn sync_nodes(context: Arc<CurrentContext>) {
    let mut interval =
        tokio::time::interval(Duration::from_secs(context.config.node_sync_seconds));
    let mut known: Option<BTreeSet<(String, Option<String>)>> = None;
    loop {
        interval.tick().await;
        let nodes = match eligible_nodes(context.client.clone()).await {
            Ok(nodes) => nodes,
            Err(err) => {
                tracing::warn!("Failed to list nodes for synchronization: {}", err);
                continue;
            }
        };
        let keys = node_keys(&nodes);
        if known.as_ref() == Some(&keys) {
            continue;
        }
        let first_run = known.replace(keys).is_none();
        if first_run {
            continue;
        }
        tracing::info!("Node set changed, updating load-balancers");
        if let Err(err) = update_all(&context, &nodes).await {
            tracing::error!("Failed to synchronize nodes: {}", err);
        }
    }
}

async fn update_all(context: &CurrentContext, nodes: &[Node]) -> LBControllerResult<()> {
    let services = kube::Api::<Service>::all(context.client.clone())
        .list(&ListParams::default())
        .await?;
    let managed = services
        .into_iter()
        .filter(|svc| finalizers::check(svc) && !needs_cleanup(svc));
    for mut svc in managed {
        let result = context
            .load_balancers
            .update_load_balancer(&context.config.cluster_name, &mut svc, nodes)
            .await;
        match result {
            Ok(()) => tracing::debug!("Updated load-balancer of {}", svc.name_any()),
            Err(LBControllerError::LoadBalancerNotFound) => {
                tracing::debug!("Service {} has no load-balancer yet", svc.name_any());
            }
            Err(err) => {
                tracing::error!(
                    "Failed to update load-balancer of {}: {}",
                    svc.name_any(),
                    err
                );
            }
        }
    }
    Ok(())
}

/// Handle the error during reconcilation.
#[allow(clippy::needless_pass_by_value)]
fn on_error(_: Arc<Service>, error: &LBControllerError, context: Arc<CurrentContext>) -> Action {
    error_action(error, &context.config)
}

fn error_action(error: &LBControllerError, config: &OperatorConfig) -> Action {
    if error.is_not_yet_active() {
        return Action::requeue(Duration::from_secs(config.not_active_requeue_seconds));
    }
    match error {
        LBControllerError::SkipService => Action::await_change(),
        _ => Action::requeue(Duration::from_secs(config.error_requeue_seconds)),
    }
}
