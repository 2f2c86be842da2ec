//! Resource discovery, deployments, services and storage.

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service, ServiceAccount};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::core::GroupVersionKind;
use kube::discovery::{self, verbs, Discovery, Scope};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{AstraError, PlatformError, Result};
use crate::labels::MANAGER;
use crate::platform::{ClusterResource, ResourceClient, LIST_PAGE_SIZE};

use super::KubeClient;

/// Polling interval of wait loops.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long `delete --wait` waits for a resource to go away.
const DELETE_TIMEOUT: Duration = Duration::from_secs(180);

impl KubeClient {
    fn dynamic_api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }

    /// Lists one API kind page by page; errors yield an empty list.
    async fn query_api(&self, resource: ApiResource, namespace: &str, selector: &str) -> Vec<ClusterResource> {
        let api = self.dynamic_api(&resource, namespace);
        let mut out = Vec::new();
        let mut lp = ListParams::default().labels(selector).limit(LIST_PAGE_SIZE);

        loop {
            let page = match api.list(&lp).await {
                Ok(page) => page,
                Err(e) => {
                    debug!("Listing {} failed: {}", resource.plural, e);
                    return Vec::new();
                }
            };
            let next = page.metadata.continue_.clone().filter(|c| !c.is_empty());
            out.extend(
                page.items
                    .into_iter()
                    .map(|object| ClusterResource::new(resource.clone(), object)),
            );
            match next {
                Some(token) => lp = lp.continue_token(&token),
                None => break,
            }
        }
        out
    }

    /// Resolves the API of a manifest object.
    async fn resolve(&self, object: &DynamicObject) -> Result<ApiResource> {
        let types = object
            .types
            .as_ref()
            .ok_or_else(|| PlatformError::api("manifest object has no apiVersion/kind"))?;
        let gvk = GroupVersionKind::try_from(types)
            .map_err(|e| PlatformError::api(format!("invalid apiVersion {:?}: {e}", types.api_version)))?;
        let (resource, _caps) = discovery::pinned_kind(&self.client, &gvk).await?;
        Ok(resource)
    }

    fn object_namespace(&self, object: &DynamicObject) -> String {
        object
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| self.namespace.clone())
    }
}

#[async_trait]
impl ResourceClient for KubeClient {
    fn current_namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_all_resources_from_selector(
        &self,
        selector: &str,
        namespace: &str,
    ) -> Result<Vec<ClusterResource>> {
        let discovered = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| PlatformError::api(format!("failed to fetch api groups from kubernetes: {e}")))?;

        let apis: Vec<ApiResource> = discovered
            .groups()
            .flat_map(|group| group.recommended_resources())
            .filter(|(_, caps)| caps.scope == Scope::Namespaced && caps.supports_operation(verbs::LIST))
            .map(|(resource, _)| resource)
            .collect();
        debug!("Querying {} APIs with concurrency {}", apis.len(), self.concurrency);

        let found: Vec<Vec<ClusterResource>> = futures::stream::iter(apis)
            .map(|resource| self.query_api(resource, namespace, selector))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let out: Vec<ClusterResource> = found.into_iter().flatten().collect();
        debug!("Query result: objects={}", out.len());
        Ok(out)
    }

    async fn delete_dynamic_resource(&self, resource: &ClusterResource, wait: bool) -> Result<()> {
        let namespace = self.object_namespace(&resource.object);
        let api = self.dynamic_api(&resource.resource, &namespace);
        let dp = DeleteParams::foreground();

        match api.delete(resource.name(), &dp).await {
            Ok(_) => {}
            Err(kube::Error::Api(status)) if status.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        if wait {
            let uid = resource.object.metadata.uid.clone();
            let name = resource.name();
            let poll = async {
                loop {
                    match api.get_opt(name).await? {
                        Some(live) if live.metadata.uid == uid => tokio::time::sleep(POLL_INTERVAL).await,
                        _ => return Ok::<(), AstraError>(()),
                    }
                }
            };
            tokio::time::timeout(DELETE_TIMEOUT, poll)
                .await
                .map_err(|_| PlatformError::Timeout {
                    operation: format!("deletion of {} {name}", resource.kind()),
                    seconds: DELETE_TIMEOUT.as_secs(),
                })??;
        }
        Ok(())
    }

    async fn get_dynamic_resource(&self, object: &DynamicObject) -> Result<Option<ClusterResource>> {
        let resource = self.resolve(object).await?;
        let name = object.metadata.name.as_deref().unwrap_or_default();
        let api = self.dynamic_api(&resource, &self.object_namespace(object));
        Ok(api
            .get_opt(name)
            .await?
            .map(|live| ClusterResource::new(resource, live)))
    }

    async fn apply_dynamic_resource(&self, object: &DynamicObject) -> Result<ClusterResource> {
        let resource = self.resolve(object).await?;
        let name = object
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| PlatformError::api("manifest object has no name"))?;
        let api = self.dynamic_api(&resource, &self.object_namespace(object));
        let pp = PatchParams::apply(MANAGER).force();
        let applied = api.patch(name, &pp, &Patch::Apply(object)).await?;
        info!("Applied {} {}", resource.kind, name);
        Ok(ClusterResource::new(resource, applied))
    }

    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>> {
        Ok(self.api::<Deployment>().get_opt(name).await?)
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        Ok(self
            .api::<Deployment>()
            .create(&PostParams::default(), deployment)
            .await?)
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let name = deployment
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| AstraError::internal("deployment has no name"))?;
        let pp = PatchParams::apply(MANAGER).force();
        Ok(self
            .api::<Deployment>()
            .patch(name, &pp, &Patch::Apply(deployment))
            .await?)
    }

    async fn get_service(&self, name: &str) -> Result<Option<Service>> {
        Ok(self.api::<Service>().get_opt(name).await?)
    }

    async fn apply_service(&self, service: &Service) -> Result<Service> {
        let name = service
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| AstraError::internal("service has no name"))?;
        let pp = PatchParams::apply(MANAGER).force();
        Ok(self
            .api::<Service>()
            .patch(name, &pp, &Patch::Apply(service))
            .await?)
    }

    async fn get_pvcs_from_selector(&self, selector: &str) -> Result<Vec<PersistentVolumeClaim>> {
        let lp = ListParams::default().labels(selector);
        Ok(self.api::<PersistentVolumeClaim>().list(&lp).await?.items)
    }

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<()> {
        self.api::<PersistentVolumeClaim>()
            .create(&PostParams::default(), pvc)
            .await?;
        Ok(())
    }

    async fn delete_pvc(&self, name: &str) -> Result<()> {
        match self
            .api::<PersistentVolumeClaim>()
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(status)) if status.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for_service_account(&self, name: &str, timeout: Duration) -> Result<()> {
        let api = self.api::<ServiceAccount>();
        let poll = async {
            loop {
                if api.get_opt(name).await?.is_some() {
                    return Ok::<(), AstraError>(());
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| PlatformError::Timeout {
                operation: format!("service account {name}"),
                seconds: timeout.as_secs(),
            })?
    }
}
