//! Platform access.
//!
//! Narrow capability traits over what the reconcilers and command handlers
//! need from Kubernetes or Podman. Each trait can be implemented by a small
//! in-memory stand-in in tests.

pub mod kube;
pub mod podman;
mod resource;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use ::kube::api::DynamicObject;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::error::Result;
use crate::state::ForwardedPort;

pub use resource::{references, ClusterResource};

/// Default number of API kinds listed concurrently.
pub const DEFAULT_DISCOVERY_CONCURRENCY: usize = 8;

/// Page size when listing resources.
pub const LIST_PAGE_SIZE: u32 = 250;

/// Lines captured from a command: stdout, then stderr.
pub type ExecOutput = (Vec<String>, Vec<String>);

/// Pod lookups and logs.
#[async_trait]
pub trait PodClient: Send + Sync {
    /// Returns the running dev pod of `component` in `app`.
    async fn get_pod_using_component_name(&self, component: &str, app: &str) -> Result<Pod>;

    /// Returns the running pod matching `selector`.
    ///
    /// Fails with `PlatformError::PodNotFound` when there is none.
    async fn get_running_pod_from_selector(&self, selector: &str) -> Result<Pod>;

    /// Returns every pod matching `selector`.
    async fn get_all_pods_from_selector(&self, selector: &str) -> Result<Vec<Pod>>;

    /// Feeds the log lines of `container` in `pod` to `on_line`.
    ///
    /// With `follow`, returns once the container stops or the stream breaks.
    async fn pod_logs(
        &self,
        pod: &str,
        container: &str,
        follow: bool,
        tail: Option<i64>,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<()>;
}

/// Command execution in running containers.
#[async_trait]
pub trait ExecClient: Send + Sync {
    /// Runs `command` in `container` of `pod` and waits for it.
    ///
    /// A non-zero exit is `ExecError::CommandFailed` carrying the output tail.
    async fn execute_command(
        &self,
        command: &[String],
        pod: &str,
        container: &str,
        show_output: bool,
    ) -> Result<ExecOutput>;

    /// Runs `command` with `stdin` piped in.
    async fn execute_command_with_stdin(
        &self,
        command: &[String],
        pod: &str,
        container: &str,
        stdin: Vec<u8>,
    ) -> Result<()>;
}

/// Kubernetes resource access.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Namespace the client works in.
    fn current_namespace(&self) -> &str;

    /// Every listable namespaced resource matching `selector` in `namespace`.
    async fn get_all_resources_from_selector(
        &self,
        selector: &str,
        namespace: &str,
    ) -> Result<Vec<ClusterResource>>;

    /// Deletes a resource; not-found is success.
    async fn delete_dynamic_resource(&self, resource: &ClusterResource, wait: bool) -> Result<()>;

    /// Fetches the live counterpart of a manifest object, if it exists.
    async fn get_dynamic_resource(&self, object: &DynamicObject) -> Result<Option<ClusterResource>>;

    /// Server-side applies a manifest object.
    async fn apply_dynamic_resource(&self, object: &DynamicObject) -> Result<ClusterResource>;

    /// Fetches a deployment.
    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>>;

    /// Creates a deployment.
    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment>;

    /// Server-side applies a deployment.
    async fn apply_deployment(&self, deployment: &Deployment) -> Result<Deployment>;

    /// Fetches a service.
    async fn get_service(&self, name: &str) -> Result<Option<Service>>;

    /// Server-side applies a service.
    async fn apply_service(&self, service: &Service) -> Result<Service>;

    /// Persistent volume claims matching `selector`.
    async fn get_pvcs_from_selector(&self, selector: &str) -> Result<Vec<PersistentVolumeClaim>>;

    /// Creates a persistent volume claim.
    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<()>;

    /// Deletes a persistent volume claim; not-found is success.
    async fn delete_pvc(&self, name: &str) -> Result<()>;

    /// Waits until the service account exists.
    async fn wait_for_service_account(&self, name: &str, timeout: Duration) -> Result<()>;
}

/// Kubernetes jobs.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Creates a job.
    async fn create_job(&self, job: &Job) -> Result<Job>;

    /// Waits until the job succeeds or fails, and returns its final state.
    async fn wait_for_job_to_complete(&self, name: &str) -> Result<Job>;

    /// Last `tail` log lines of the job's pod.
    async fn get_job_logs(&self, job: &Job, tail: i64) -> Result<String>;

    /// Deletes every job matching `selector`.
    async fn delete_jobs(&self, selector: &str) -> Result<()>;

    /// Deletes one job and its pods.
    async fn delete_job(&self, name: &str) -> Result<()>;
}

/// A pod managed by Podman, as listed by `podman pod ps`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodmanPod {
    /// Pod name.
    pub name: String,
    /// Pod labels.
    pub labels: BTreeMap<String, String>,
}

/// Podman pod and volume management.
#[async_trait]
pub trait PodmanClient: Send + Sync {
    /// Creates and starts a pod from its Kubernetes definition.
    async fn play_kube(&self, pod: &Pod) -> Result<()>;

    /// Names of existing pods.
    async fn pod_ls(&self) -> Result<HashSet<String>>;

    /// Kubernetes definition of an existing pod.
    async fn kube_generate(&self, name: &str) -> Result<Pod>;

    /// Stops and removes the pod, and its volumes when `cleanup_volumes`.
    async fn cleanup_pod_resources(&self, pod: &Pod, cleanup_volumes: bool) -> Result<()>;

    /// Names of existing volumes.
    async fn volume_ls(&self) -> Result<HashSet<String>>;

    /// Removes a pod.
    async fn pod_rm(&self, name: &str) -> Result<()>;

    /// Removes a volume.
    async fn volume_rm(&self, name: &str) -> Result<()>;

    /// Every pod with labels, for component discovery.
    async fn list_all_components(&self) -> Result<Vec<PodmanPod>>;
}

/// Local port forwarding to a pod.
#[async_trait]
pub trait PortForwarder: Send + Sync {
    /// Starts forwarding `ports` to `pod`, replacing any previous forwarding.
    async fn start_port_forwarding(&self, pod: &str, ports: &[ForwardedPort]) -> Result<()>;

    /// Stops all forwarding.
    async fn stop_port_forwarding(&self);
}
