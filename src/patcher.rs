use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::{api::core::v1::Service, serde_json::json};
use kube::{
    api::{Patch, PatchParams},
    Api, Client, ResourceExt,
};

#[cfg(test)]
use mockall::automock;

use crate::error::{LBControllerError, LBControllerResult};

/// Annotation changes to submit: `None` removes a key.
pub type AnnotationPatch = BTreeMap<String, Option<String>>;

/// Write access to Service objects.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceApi: Send + Sync {
    /// Merge `annotations` into the service's annotation map in one call.
    async fn patch_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: &AnnotationPatch,
    ) -> Result<(), kube::Error>;
}

pub struct KubeServiceApi {
    client: Client,
}

impl KubeServiceApi {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceApi for KubeServiceApi {
    async fn patch_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: &AnnotationPatch,
    ) -> Result<(), kube::Error> {
        let api = Api::<Service>::namespaced(self.client.clone(), namespace);
        let patch = json!({
            "metadata": {
                "annotations": annotations
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }
}

/// Snapshot of a service's annotations taken before reconciling it.
///
/// Once the operation finishes, [`ServicePatcher::finish`] writes back
/// whatever annotations changed in between, and nothing if none did.
#[derive(Debug, Clone)]
pub struct ServicePatcher {
    base: BTreeMap<String, String>,
}

impl ServicePatcher {
    #[must_use]
    pub fn new(svc: &Service) -> Self {
        Self {
            base: svc.annotations().clone(),
        }
    }

    /// Keys whose value differs between the snapshot and `svc`.
    #[must_use]
    pub fn diff(&self, svc: &Service) -> AnnotationPatch {
        let current = svc.annotations();
        let mut patch = current
            .iter()
            .filter(|(key, value)| self.base.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), Some(value.clone())))
            .collect::<AnnotationPatch>();
        patch.extend(
            self.base
                .keys()
                .filter(|key| !current.contains_key(*key))
                .map(|key| (key.clone(), None)),
        );
        patch
    }

    /// Patch the changed annotations onto the service and fold a patch
    /// failure into `result` without hiding the primary error.
    pub async fn finish<T>(
        self,
        api: &dyn ServiceApi,
        svc: &Service,
        result: LBControllerResult<T>,
    ) -> LBControllerResult<T> {
        let changes = self.diff(svc);
        if changes.is_empty() {
            return result;
        }
        match (result, submit(api, svc, &changes).await) {
            (result, Ok(())) => result,
            (Ok(_), Err(patch_err)) => Err(patch_err),
            (Err(err), Err(patch_err)) => Err(LBControllerError::combine(Some(err), patch_err)),
        }
    }
}

async fn submit(
    api: &dyn ServiceApi,
    svc: &Service,
    changes: &AnnotationPatch,
) -> LBControllerResult<()> {
    let namespace = svc
        .namespace()
        .ok_or(LBControllerError::MissingObjectKey("namespace"))?;
    tracing::debug!("Patching {} annotation(s) of the service", changes.len());
    api.patch_annotations(&namespace, &svc.name_any(), changes)
        .await?;
    Ok(())
}
