//! Finding and deleting the resources of a component.
//!
//! Everything is rediscovered from labels: there is no inventory of what
//! astra created.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ApiResource, DynamicObject};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::devfile::DevfileObj;
use crate::error::{AstraError, PlatformError, Result};
use crate::labels;
use crate::platform::{references, ClusterResource, ExecClient, PodClient, PodmanClient, ResourceClient};

use super::{container_names, exec_pre_stop_events, manifest, ComponentContext, HandlerOptions, RunHandler};

/// Resources of `component` of `app` in `mode`, skipping those already
/// terminating and those owned by another listed resource.
///
/// # Errors
///
/// Returns an error if the resources cannot be listed.
pub async fn list_cluster_resources_to_delete(
    resources: &dyn ResourceClient,
    component: &str,
    app: &str,
    namespace: &str,
    mode: &str,
) -> Result<Vec<ClusterResource>> {
    let selector = labels::get_selector(component, app, mode, false);
    let list = resources.get_all_resources_from_selector(&selector, namespace).await?;

    let result: Vec<ClusterResource> = list
        .iter()
        .filter(|r| !r.is_terminating())
        .filter(|r| !references(&list, r))
        .cloned()
        .collect();
    debug!("Found {} resources to delete for component {}", result.len(), component);
    Ok(result)
}

/// Deletes `list` one by one and returns the resources that could not be
/// deleted.
pub async fn delete_resources(
    resources: &dyn ResourceClient,
    list: &[ClusterResource],
    wait: bool,
) -> Vec<ClusterResource> {
    let mut failed = Vec::new();
    for resource in list {
        match resources.delete_dynamic_resource(resource, wait).await {
            Ok(()) => info!("Deleted {}/{}", resource.kind(), resource.name()),
            Err(e) => {
                debug!("Failed to delete {}/{}: {}", resource.kind(), resource.name(), e);
                failed.push(resource.clone());
            }
        }
    }
    failed
}

fn deployment_resource(deployment: &Deployment) -> Result<ClusterResource> {
    let value = serde_json::to_value(deployment)
        .map_err(|e| AstraError::internal(format!("unable to convert deployment: {e}")))?;
    let object: DynamicObject = serde_json::from_value(value)
        .map_err(|e| AstraError::internal(format!("unable to convert deployment: {e}")))?;
    Ok(ClusterResource::new(ApiResource::erase::<Deployment>(&()), object))
}

/// Resources declared by the devfile that exist on the cluster.
///
/// Returns whether the dev deployment exists, and the resources found. A
/// devfile resource found in another mode is left out.
///
/// # Errors
///
/// Returns a warning when the deployment cannot be fetched, and an error
/// when the manifests of the devfile cannot be read.
pub async fn list_cluster_resources_to_delete_from_devfile(
    resources: &dyn ResourceClient,
    devfile: &DevfileObj,
    context: &ComponentContext,
    mode: &str,
) -> Result<(bool, Vec<ClusterResource>)> {
    let mut is_inner_loop_deployed = false;
    let mut found = Vec::new();

    if mode == labels::COMPONENT_DEV_MODE || mode == labels::COMPONENT_ANY_MODE {
        let name = context.workload_name();
        match resources.get_deployment(&name).await {
            Ok(Some(deployment)) => {
                is_inner_loop_deployed = true;
                found.push(deployment_resource(&deployment)?);
            }
            Ok(None) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(AstraError::warning(format!("failed to get deployment {name:?}: {e}"))),
        }
    }

    for (name, component) in devfile.k8s_and_oc_components_to_push(true) {
        let objects = manifest::component_objects(component, &context.devfile_dir)
            .map_err(|e| AstraError::internal(format!("failed to gather resources for deletion: {e}")))?;
        for object in objects {
            let live = match resources.get_dynamic_resource(&object).await {
                Ok(Some(live)) => live,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Unable to get resource of component {}: {}", name, e);
                    continue;
                }
            };
            if mode != labels::COMPONENT_ANY_MODE {
                let live_mode = live.object.metadata.labels.as_ref().and_then(|l| labels::get_mode(l));
                if live_mode != Some(mode) {
                    continue;
                }
            }
            found.push(live);
        }
    }

    Ok((is_inner_loop_deployed, found))
}

/// Runs the pre-stop events in the running dev pod, if any.
///
/// Best effort: a missing pod, missing permissions or a failing command
/// only produce warnings.
///
/// # Errors
///
/// Returns an error if the pod lookup fails for another reason.
pub async fn execute_pre_stop_events(
    pods: &dyn PodClient,
    exec: Arc<dyn ExecClient>,
    devfile: Arc<DevfileObj>,
    context: &ComponentContext,
) -> Result<()> {
    if !devfile.has_pre_stop_events() {
        return Ok(());
    }

    let selector = labels::get_selector(&context.component_name, &context.app_name, labels::COMPONENT_DEV_MODE, false);
    let pod = match pods.get_running_pod_from_selector(&selector).await {
        Ok(pod) => pod,
        Err(AstraError::Platform(PlatformError::Forbidden { .. })) => {
            warn!("You are forbidden from accessing the resource. Please check if you the right permissions and try again.");
            return Ok(());
        }
        Err(AstraError::Platform(PlatformError::PodNotFound { .. })) => {
            warn!("Resources not found on the cluster. Run `astra delete component -v <DEBUG_LEVEL_0-9>` to know more.");
            return Ok(());
        }
        Err(e) => {
            return Err(AstraError::internal(format!(
                "unable to determine if component {} exists; cause: {e}",
                context.component_name
            )));
        }
    };

    let options = HandlerOptions {
        pod_name: pod.metadata.name.clone().unwrap_or_default(),
        containers_running: container_names(&pod),
        msg: String::from("Executing pre-stop command in container"),
        direct_run: false,
        component_exists: false,
    };
    let handler = RunHandler::new(exec, devfile.clone(), context.clone(), options);
    if let Err(e) = exec_pre_stop_events(&devfile, &handler).await {
        warn!("Failed to execute preStop event commands for component {}: {}", context.component_name, e);
    }
    Ok(())
}

/// The Podman pod of the component, when it exists.
///
/// Deploy mode never runs on Podman, so nothing is returned for it.
///
/// # Errors
///
/// Returns a warning when the pods cannot be listed.
pub async fn list_podman_resources_to_delete(
    podman: &dyn PodmanClient,
    context: &ComponentContext,
    mode: &str,
) -> Result<Option<Pod>> {
    if mode == labels::COMPONENT_DEPLOY_MODE {
        return Ok(None);
    }
    let pods = podman
        .pod_ls()
        .await
        .map_err(|e| AstraError::warning(format!("failed to get pods on podman: {e}")))?;

    let name = context.workload_name();
    if !pods.contains(&name) {
        return Ok(None);
    }
    Ok(Some(podman.kube_generate(&name).await?))
}
