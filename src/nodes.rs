use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;

use crate::{
    consts,
    do_api::DoApi,
    error::{LBControllerError, LBControllerResult},
};

/// Extract the droplet id from a provider id of the form `digitalocean://<id>`.
pub fn droplet_id_from_provider_id(provider_id: &str) -> LBControllerResult<u64> {
    let invalid = |reason: &str| {
        LBControllerError::Validation(format!(
            "failed to parse provider ID {provider_id:?}: {reason}"
        ))
    };
    let Some((scheme, id)) = provider_id.split_once("://") else {
        return Err(invalid("unexpected format"));
    };
    if scheme != consts::PROVIDER_ID_SCHEME {
        return Err(invalid("provider name should be digitalocean"));
    }
    id.parse::<u64>()
        .map_err(|_| invalid("droplet id is not a number"))
}

/// Resolve cluster nodes to droplet ids.
///
/// Nodes with a provider id are resolved locally. The rest are matched
/// against a single listing of all droplets, by droplet name first and then
/// by any droplet address equal to the node name. Nodes that match nothing
/// are logged and left out.
pub async fn droplet_ids(api: &dyn DoApi, nodes: &[Node]) -> LBControllerResult<Vec<u64>> {
    let mut ids = Vec::with_capacity(nodes.len());
    let mut missing = BTreeSet::new();

    for node in nodes {
        match node.spec.as_ref().and_then(|spec| spec.provider_id.as_deref()) {
            Some(provider_id) if !provider_id.is_empty() => {
                ids.push(droplet_id_from_provider_id(provider_id)?);
            }
            _ => {
                missing.insert(node.name_any());
            }
        }
    }

    if missing.is_empty() {
        return Ok(ids);
    }

    tracing::debug!(
        "Listing droplets to resolve {} node(s) without provider ID",
        missing.len()
    );
    let droplets = api
        .list_droplets()
        .await
        .map_err(|err| LBControllerError::api("failed to list all droplets", err))?;

    for droplet in &droplets {
        if missing.remove(&droplet.name) {
            ids.push(droplet.id);
            continue;
        }
        let matched = droplet
            .addresses()
            .find(|address| missing.contains(*address))
            .map(ToString::to_string);
        if let Some(address) = matched {
            missing.remove(&address);
            ids.push(droplet.id);
        }
    }

    if !missing.is_empty() {
        tracing::error!(
            "Failed to find droplets for nodes {}",
            missing.into_iter().collect::<Vec<_>>().join(" ")
        );
    }

    Ok(ids)
}
