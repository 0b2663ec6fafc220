use k8s_openapi::{api::core::v1::Service, serde_json::json};
use kube::{
    api::{Patch, PatchParams},
    Api, Client, ResourceExt,
};

use crate::{
    consts,
    error::{LBControllerError, LBControllerResult},
};

/// Add the cleanup finalizer to the service.
/// This keeps the service around until its load balancer is deleted.
pub async fn add(client: Client, svc: &Service) -> LBControllerResult<()> {
    let mut finalizers = svc.finalizers().to_vec();
    finalizers.push(consts::FINALIZER_NAME.to_string());
    set(client, svc, &finalizers).await
}

/// Check if service has the finalizer.
#[must_use]
pub fn check(service: &Service) -> bool {
    service
        .finalizers()
        .iter()
        .any(|finalizer| finalizer == consts::FINALIZER_NAME)
}

/// Remove the cleanup finalizer from the service.
///
/// If service does not have the finalizer, this function will do nothing.
pub async fn remove(client: Client, svc: &Service) -> LBControllerResult<()> {
    if !check(svc) {
        return Ok(());
    }
    set(client, svc, &without_cleanup(svc)).await
}

fn without_cleanup(svc: &Service) -> Vec<String> {
    svc.finalizers()
        .iter()
        .filter(|item| item.as_str() != consts::FINALIZER_NAME)
        .cloned()
        .collect()
}

async fn set(client: Client, svc: &Service, finalizers: &[String]) -> LBControllerResult<()> {
    let api = Api::<Service>::namespaced(
        client,
        svc.namespace()
            .ok_or(LBControllerError::MissingObjectKey("namespace"))?
            .as_str(),
    );
    let patch = json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    api.patch(
        svc.name_any().as_str(),
        &PatchParams::default(),
        &Patch::Merge(patch),
    )
    .await?;
    Ok(())
}
