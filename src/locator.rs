use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;

use crate::{
    consts,
    do_api::DoApi,
    error::{LBControllerError, LBControllerResult},
    models::RemoteLoadBalancer,
};

/// Outcome of looking up the load balancer of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(RemoteLoadBalancer),
    Missing,
}

/// Name the load balancer of `svc` should carry: the custom name annotation
/// if set, the legacy name otherwise.
#[must_use]
pub fn load_balancer_name(svc: &Service) -> String {
    svc.annotations()
        .get(consts::LB_NAME_ANN_NAME)
        .filter(|name| !name.is_empty())
        .cloned()
        .unwrap_or_else(|| legacy_load_balancer_name(svc))
}

/// `a` followed by the service UID without dashes, at most 32 characters.
#[must_use]
pub fn legacy_load_balancer_name(svc: &Service) -> String {
    let mut name = format!("a{}", svc.uid().unwrap_or_default().replace('-', ""));
    name.truncate(consts::LEGACY_NAME_MAX_LEN);
    name
}

fn cached_id(svc: &Service) -> Option<&str> {
    svc.annotations()
        .get(consts::LB_ID_ANN_NAME)
        .map(String::as_str)
        .filter(|id| !id.is_empty())
}

/// Find the remote load balancer backing `svc`.
///
/// A cached id annotation is looked up directly; without one, all load
/// balancers are listed and matched by current or legacy name.
pub async fn locate(api: &dyn DoApi, svc: &Service) -> LBControllerResult<Lookup> {
    if let Some(id) = cached_id(svc) {
        tracing::debug!("Looking up load-balancer by ID {}", id);
        return match api.get_load_balancer(id).await {
            Ok(lb) => Ok(Lookup::Found(lb)),
            Err(err) if err.is_not_found() => Ok(Lookup::Missing),
            Err(err) => Err(LBControllerError::api(
                format!("failed to get load-balancer by ID {id}"),
                err,
            )),
        };
    }

    let name = load_balancer_name(svc);
    let legacy_name = legacy_load_balancer_name(svc);
    tracing::debug!(
        "Looking up load-balancer by either {} or {} name",
        name,
        legacy_name
    );
    let all = api
        .list_load_balancers()
        .await
        .map_err(|err| LBControllerError::api("failed to list load-balancers", err))?;

    Ok(all
        .into_iter()
        .find(|lb| lb.name == name || lb.name == legacy_name)
        .map_or(Lookup::Missing, Lookup::Found))
}
