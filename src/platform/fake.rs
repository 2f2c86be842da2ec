//! In-memory stand-ins for the platform traits.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, PodSpec, PodStatus, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{ExecError, PlatformError, Result};
use crate::labels;
use crate::state::ForwardedPort;

use super::{
    ClusterResource, ExecClient, ExecOutput, JobClient, PodClient, PodmanClient, PodmanPod,
    PortForwarder, ResourceClient,
};

/// One command run through a fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    /// Pod name.
    pub pod: String,
    /// Container name.
    pub container: String,
    /// Command, joined with spaces.
    pub command: String,
}

fn matches_selector(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    let empty = BTreeMap::new();
    let labels = labels.unwrap_or(&empty);
    selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .all(|(k, v)| labels.get(k).is_some_and(|value| value == v))
}

/// Shared exec recording and failure injection.
#[derive(Debug, Default)]
struct ExecRecorder {
    calls: Vec<ExecCall>,
    /// Command substrings that fail, with their exit code.
    failures: Vec<(String, i32)>,
    /// Canned stdout per command substring.
    outputs: Vec<(String, Vec<String>)>,
}

impl ExecRecorder {
    fn run(&mut self, command: &[String], pod: &str, container: &str) -> Result<ExecOutput> {
        let joined = command.join(" ");
        self.calls.push(ExecCall {
            pod: pod.to_string(),
            container: container.to_string(),
            command: joined.clone(),
        });
        if let Some((_, code)) = self.failures.iter().find(|(s, _)| joined.contains(s.as_str())) {
            return Err(ExecError::CommandFailed {
                command: joined,
                container: container.to_string(),
                exit_code: *code,
                logs: vec![String::from("simulated failure")],
            }
            .into());
        }
        let stdout = self
            .outputs
            .iter()
            .find(|(s, _)| joined.contains(s.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        Ok((stdout, Vec::new()))
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    pods: Vec<Pod>,
    deployments: BTreeMap<String, Deployment>,
    services: BTreeMap<String, Service>,
    pvcs: BTreeMap<String, PersistentVolumeClaim>,
    resources: Vec<ClusterResource>,
    deleted: Vec<String>,
    jobs: BTreeMap<String, Job>,
    exec: ExecRecorder,
    forwarded: Vec<ForwardedPort>,
    mutations: usize,
    unreachable: bool,
}

/// Fake Kubernetes cluster.
///
/// Creating or applying a deployment starts a running pod with the labels
/// and containers of its template.
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
    namespace: String,
}

impl FakeCluster {
    /// Creates an empty cluster with namespace `default`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClusterState::default()),
            namespace: String::from("default"),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ClusterState) -> T) -> T {
        let mut state = self.state.lock().expect("fake cluster lock poisoned");
        f(&mut state)
    }

    /// Adds a pod.
    pub fn add_pod(&self, pod: Pod) {
        self.with_state(|s| s.pods.push(pod));
    }

    /// Adds a listable resource.
    pub fn add_resource(&self, resource: ClusterResource) {
        self.with_state(|s| s.resources.push(resource));
    }

    /// Makes commands containing `substring` fail with `exit_code`.
    pub fn fail_command(&self, substring: &str, exit_code: i32) {
        self.with_state(|s| s.exec.failures.push((substring.to_string(), exit_code)));
    }

    /// Sets the stdout of commands containing `substring`.
    pub fn set_command_output(&self, substring: &str, stdout: Vec<String>) {
        self.with_state(|s| s.exec.outputs.push((substring.to_string(), stdout)));
    }

    /// Makes every list call fail as if the cluster were unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.with_state(|s| s.unreachable = unreachable);
    }

    /// Commands run so far.
    #[must_use]
    pub fn exec_calls(&self) -> Vec<ExecCall> {
        self.with_state(|s| s.exec.calls.clone())
    }

    /// Number of create, apply and delete calls.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.with_state(|s| s.mutations)
    }

    /// Names of deleted resources, in order.
    #[must_use]
    pub fn deleted(&self) -> Vec<String> {
        self.with_state(|s| s.deleted.clone())
    }

    /// Names of existing PVCs.
    #[must_use]
    pub fn pvc_names(&self) -> Vec<String> {
        self.with_state(|s| s.pvcs.keys().cloned().collect())
    }

    /// Ports currently forwarded.
    #[must_use]
    pub fn forwarded_ports(&self) -> Vec<ForwardedPort> {
        self.with_state(|s| s.forwarded.clone())
    }

    /// Stored deployment.
    #[must_use]
    pub fn deployment(&self, name: &str) -> Option<Deployment> {
        self.with_state(|s| s.deployments.get(name).cloned())
    }

    /// Stored jobs.
    #[must_use]
    pub fn jobs(&self) -> Vec<Job> {
        self.with_state(|s| s.jobs.values().cloned().collect())
    }

    fn start_pod_for(state: &mut ClusterState, deployment: &Deployment) {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let template = deployment.spec.as_ref().map(|s| s.template.clone()).unwrap_or_default();
        state
            .pods
            .retain(|p| p.metadata.name.as_deref() != Some(&format!("{name}-pod")));
        state.pods.push(Pod {
            metadata: ObjectMeta {
                name: Some(format!("{name}-pod")),
                labels: template.metadata.and_then(|m| m.labels),
                ..ObjectMeta::default()
            },
            spec: template.spec.or_else(|| Some(PodSpec::default())),
            status: Some(PodStatus {
                phase: Some(String::from("Running")),
                ..PodStatus::default()
            }),
        });
    }
}

fn unreachable_error() -> crate::error::AstraError {
    PlatformError::api("unable to connect to the cluster").into()
}

#[async_trait]
impl PodClient for FakeCluster {
    async fn get_pod_using_component_name(&self, component: &str, app: &str) -> Result<Pod> {
        let selector = labels::get_selector(component, app, labels::COMPONENT_DEV_MODE, false);
        self.get_running_pod_from_selector(&selector).await
    }

    async fn get_running_pod_from_selector(&self, selector: &str) -> Result<Pod> {
        self.with_state(|s| {
            s.pods
                .iter()
                .find(|p| {
                    matches_selector(p.metadata.labels.as_ref(), selector)
                        && p.status.as_ref().and_then(|st| st.phase.as_deref()) == Some("Running")
                })
                .cloned()
                .ok_or_else(|| {
                    PlatformError::PodNotFound {
                        selector: selector.to_string(),
                    }
                    .into()
                })
        })
    }

    async fn get_all_pods_from_selector(&self, selector: &str) -> Result<Vec<Pod>> {
        Ok(self.with_state(|s| {
            s.pods
                .iter()
                .filter(|p| matches_selector(p.metadata.labels.as_ref(), selector))
                .cloned()
                .collect()
        }))
    }

    async fn pod_logs(
        &self,
        _pod: &str,
        container: &str,
        _follow: bool,
        _tail: Option<i64>,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<()> {
        on_line(&format!("log line from {container}"));
        Ok(())
    }
}

#[async_trait]
impl ExecClient for FakeCluster {
    async fn execute_command(
        &self,
        command: &[String],
        pod: &str,
        container: &str,
        _show_output: bool,
    ) -> Result<ExecOutput> {
        self.with_state(|s| s.exec.run(command, pod, container))
    }

    async fn execute_command_with_stdin(
        &self,
        command: &[String],
        pod: &str,
        container: &str,
        _stdin: Vec<u8>,
    ) -> Result<()> {
        self.with_state(|s| s.exec.run(command, pod, container)).map(|_| ())
    }
}

#[async_trait]
impl ResourceClient for FakeCluster {
    fn current_namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_all_resources_from_selector(
        &self,
        selector: &str,
        _namespace: &str,
    ) -> Result<Vec<ClusterResource>> {
        self.with_state(|s| {
            if s.unreachable {
                return Err(unreachable_error());
            }
            Ok(s.resources
                .iter()
                .filter(|r| matches_selector(r.object.metadata.labels.as_ref(), selector))
                .cloned()
                .collect())
        })
    }

    async fn delete_dynamic_resource(&self, resource: &ClusterResource, _wait: bool) -> Result<()> {
        self.with_state(|s| {
            s.mutations += 1;
            s.deleted.push(format!("{}/{}", resource.kind(), resource.name()));
            s.resources
                .retain(|r| !(r.kind() == resource.kind() && r.name() == resource.name()));
        });
        Ok(())
    }

    async fn get_dynamic_resource(&self, object: &DynamicObject) -> Result<Option<ClusterResource>> {
        let kind = object.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
        let name = object.metadata.name.clone().unwrap_or_default();
        self.with_state(|s| {
            if s.unreachable {
                return Err(unreachable_error());
            }
            Ok(s.resources
                .iter()
                .find(|r| r.kind() == kind && r.name() == name)
                .cloned())
        })
    }

    async fn apply_dynamic_resource(&self, object: &DynamicObject) -> Result<ClusterResource> {
        let types = object.types.clone().unwrap_or_default();
        let (group, version) = types
            .api_version
            .split_once('/')
            .map_or((String::new(), types.api_version.clone()), |(g, v)| (g.to_string(), v.to_string()));
        let ar = kube::api::ApiResource::from_gvk(&kube::core::GroupVersionKind::gvk(&group, &version, &types.kind));
        let resource = ClusterResource::new(ar, object.clone());
        self.with_state(|s| {
            s.mutations += 1;
            s.resources
                .retain(|r| !(r.kind() == resource.kind() && r.name() == resource.name()));
            s.resources.push(resource.clone());
        });
        Ok(resource)
    }

    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>> {
        Ok(self.deployment(name))
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        self.with_state(|s| {
            if s.deployments.contains_key(&name) {
                return Err(PlatformError::Conflict {
                    kind: String::from("Deployment"),
                    name: name.clone(),
                }
                .into());
            }
            s.mutations += 1;
            s.deployments.insert(name.clone(), deployment.clone());
            Self::start_pod_for(s, deployment);
            Ok(deployment.clone())
        })
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        self.with_state(|s| {
            s.mutations += 1;
            s.deployments.insert(name, deployment.clone());
            Self::start_pod_for(s, deployment);
        });
        Ok(deployment.clone())
    }

    async fn get_service(&self, name: &str) -> Result<Option<Service>> {
        Ok(self.with_state(|s| s.services.get(name).cloned()))
    }

    async fn apply_service(&self, service: &Service) -> Result<Service> {
        let name = service.metadata.name.clone().unwrap_or_default();
        self.with_state(|s| {
            s.mutations += 1;
            s.services.insert(name, service.clone());
        });
        Ok(service.clone())
    }

    async fn get_pvcs_from_selector(&self, selector: &str) -> Result<Vec<PersistentVolumeClaim>> {
        Ok(self.with_state(|s| {
            s.pvcs
                .values()
                .filter(|p| matches_selector(p.metadata.labels.as_ref(), selector))
                .cloned()
                .collect()
        }))
    }

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<()> {
        let name = pvc.metadata.name.clone().unwrap_or_default();
        self.with_state(|s| {
            s.mutations += 1;
            s.pvcs.insert(name, pvc.clone());
        });
        Ok(())
    }

    async fn delete_pvc(&self, name: &str) -> Result<()> {
        self.with_state(|s| {
            s.mutations += 1;
            s.pvcs.remove(name);
            s.deleted.push(format!("PersistentVolumeClaim/{name}"));
        });
        Ok(())
    }

    async fn wait_for_service_account(&self, _name: &str, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl JobClient for FakeCluster {
    async fn create_job(&self, job: &Job) -> Result<Job> {
        let name = job.metadata.name.clone().unwrap_or_default();
        let command = job
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|s| s.containers.first())
            .and_then(|c| c.args.clone())
            .unwrap_or_default()
            .join(" ");
        self.with_state(|s| {
            s.mutations += 1;
            let failed = s.exec.failures.iter().any(|(sub, _)| command.contains(sub.as_str()));
            let mut stored = job.clone();
            stored.status = Some(JobStatus {
                succeeded: (!failed).then_some(1),
                failed: failed.then_some(1),
                ..JobStatus::default()
            });
            s.jobs.insert(name, stored);
        });
        Ok(job.clone())
    }

    async fn wait_for_job_to_complete(&self, name: &str) -> Result<Job> {
        self.with_state(|s| {
            s.jobs.get(name).cloned().ok_or_else(|| {
                PlatformError::NotFound {
                    kind: String::from("Job"),
                    name: name.to_string(),
                }
                .into()
            })
        })
    }

    async fn get_job_logs(&self, job: &Job, _tail: i64) -> Result<String> {
        Ok(format!(
            "logs of {}",
            job.metadata.name.as_deref().unwrap_or_default()
        ))
    }

    async fn delete_jobs(&self, selector: &str) -> Result<()> {
        self.with_state(|s| {
            s.jobs
                .retain(|_, j| !matches_selector(j.metadata.labels.as_ref(), selector));
        });
        Ok(())
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        self.with_state(|s| {
            s.jobs.remove(name);
            s.deleted.push(format!("Job/{name}"));
        });
        Ok(())
    }
}

#[async_trait]
impl PortForwarder for FakeCluster {
    async fn start_port_forwarding(&self, _pod: &str, ports: &[ForwardedPort]) -> Result<()> {
        self.with_state(|s| s.forwarded = ports.to_vec());
        Ok(())
    }

    async fn stop_port_forwarding(&self) {
        self.with_state(|s| s.forwarded.clear());
    }
}

#[derive(Debug, Default)]
struct PodmanState {
    pods: BTreeMap<String, Pod>,
    volumes: BTreeSet<String>,
    exec: ExecRecorder,
    play_kube_calls: usize,
    removed: Vec<String>,
    forwarded: Vec<ForwardedPort>,
    fail_play_kube: bool,
}

/// Fake Podman.
#[derive(Debug, Default)]
pub struct FakePodman {
    state: Mutex<PodmanState>,
}

impl FakePodman {
    /// Creates an empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut PodmanState) -> T) -> T {
        let mut state = self.state.lock().expect("fake podman lock poisoned");
        f(&mut state)
    }

    /// Adds a running pod.
    pub fn add_pod(&self, pod: Pod) {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.with_state(|s| s.pods.insert(name, pod));
    }

    /// Adds a volume.
    pub fn add_volume(&self, name: &str) {
        self.with_state(|s| s.volumes.insert(name.to_string()));
    }

    /// Makes `play_kube` fail after creating the pod.
    pub fn fail_play_kube(&self) {
        self.with_state(|s| s.fail_play_kube = true);
    }

    /// Makes commands containing `substring` fail with `exit_code`.
    pub fn fail_command(&self, substring: &str, exit_code: i32) {
        self.with_state(|s| s.exec.failures.push((substring.to_string(), exit_code)));
    }

    /// Sets the stdout of commands containing `substring`.
    pub fn set_command_output(&self, substring: &str, stdout: Vec<String>) {
        self.with_state(|s| s.exec.outputs.push((substring.to_string(), stdout)));
    }

    /// Commands run so far.
    #[must_use]
    pub fn exec_calls(&self) -> Vec<ExecCall> {
        self.with_state(|s| s.exec.calls.clone())
    }

    /// Number of `play_kube` calls.
    #[must_use]
    pub fn play_kube_calls(&self) -> usize {
        self.with_state(|s| s.play_kube_calls)
    }

    /// Stored pod.
    #[must_use]
    pub fn pod(&self, name: &str) -> Option<Pod> {
        self.with_state(|s| s.pods.get(name).cloned())
    }

    /// Removed pods and volumes, in order.
    #[must_use]
    pub fn removed(&self) -> Vec<String> {
        self.with_state(|s| s.removed.clone())
    }

    /// Ports currently forwarded.
    #[must_use]
    pub fn forwarded_ports(&self) -> Vec<ForwardedPort> {
        self.with_state(|s| s.forwarded.clone())
    }
}

#[async_trait]
impl PodmanClient for FakePodman {
    async fn play_kube(&self, pod: &Pod) -> Result<()> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.with_state(|s| {
            s.play_kube_calls += 1;
            for volume in super::podman::pod_volume_names(pod) {
                s.volumes.insert(volume);
            }
            s.pods.insert(name, pod.clone());
            if s.fail_play_kube {
                return Err(PlatformError::podman("simulated play kube failure").into());
            }
            Ok(())
        })
    }

    async fn pod_ls(&self) -> Result<HashSet<String>> {
        Ok(self.with_state(|s| s.pods.keys().cloned().collect()))
    }

    async fn kube_generate(&self, name: &str) -> Result<Pod> {
        self.pod(name).ok_or_else(|| {
            PlatformError::PodNotFound {
                selector: name.to_string(),
            }
            .into()
        })
    }

    async fn cleanup_pod_resources(&self, pod: &Pod, cleanup_volumes: bool) -> Result<()> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.pod_rm(&name).await?;
        if cleanup_volumes {
            for volume in super::podman::pod_volume_names(pod) {
                self.volume_rm(&volume).await?;
            }
        }
        Ok(())
    }

    async fn volume_ls(&self) -> Result<HashSet<String>> {
        Ok(self.with_state(|s| s.volumes.iter().cloned().collect()))
    }

    async fn pod_rm(&self, name: &str) -> Result<()> {
        self.with_state(|s| {
            s.pods.remove(name);
            s.removed.push(format!("pod/{name}"));
        });
        Ok(())
    }

    async fn volume_rm(&self, name: &str) -> Result<()> {
        self.with_state(|s| {
            s.volumes.remove(name);
            s.removed.push(format!("volume/{name}"));
        });
        Ok(())
    }

    async fn list_all_components(&self) -> Result<Vec<PodmanPod>> {
        Ok(self.with_state(|s| {
            s.pods
                .iter()
                .map(|(name, pod)| PodmanPod {
                    name: name.clone(),
                    labels: pod.metadata.labels.clone().unwrap_or_default(),
                })
                .collect()
        }))
    }
}

#[async_trait]
impl PodClient for FakePodman {
    async fn get_pod_using_component_name(&self, component: &str, app: &str) -> Result<Pod> {
        self.kube_generate(&format!("{component}-{app}")).await
    }

    async fn get_running_pod_from_selector(&self, selector: &str) -> Result<Pod> {
        self.with_state(|s| {
            s.pods
                .values()
                .find(|p| matches_selector(p.metadata.labels.as_ref(), selector))
                .cloned()
                .ok_or_else(|| {
                    PlatformError::PodNotFound {
                        selector: selector.to_string(),
                    }
                    .into()
                })
        })
    }

    async fn get_all_pods_from_selector(&self, selector: &str) -> Result<Vec<Pod>> {
        Ok(self.with_state(|s| {
            s.pods
                .values()
                .filter(|p| matches_selector(p.metadata.labels.as_ref(), selector))
                .cloned()
                .collect()
        }))
    }

    async fn pod_logs(
        &self,
        _pod: &str,
        container: &str,
        _follow: bool,
        _tail: Option<i64>,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<()> {
        on_line(&format!("log line from {container}"));
        Ok(())
    }
}

#[async_trait]
impl ExecClient for FakePodman {
    async fn execute_command(
        &self,
        command: &[String],
        pod: &str,
        container: &str,
        _show_output: bool,
    ) -> Result<ExecOutput> {
        self.with_state(|s| s.exec.run(command, pod, container))
    }

    async fn execute_command_with_stdin(
        &self,
        command: &[String],
        pod: &str,
        container: &str,
        _stdin: Vec<u8>,
    ) -> Result<()> {
        self.with_state(|s| s.exec.run(command, pod, container)).map(|_| ())
    }
}

#[async_trait]
impl PortForwarder for FakePodman {
    async fn start_port_forwarding(&self, _pod: &str, ports: &[ForwardedPort]) -> Result<()> {
        self.with_state(|s| s.forwarded = ports.to_vec());
        Ok(())
    }

    async fn stop_port_forwarding(&self) {
        self.with_state(|s| s.forwarded.clear());
    }
}
