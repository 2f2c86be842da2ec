//! Dev mode on a Kubernetes cluster.
//!
//! The component runs as a one-replica deployment. A reconcile pass brings
//! the deployment, its volumes and its service in line with the devfile,
//! waits for the pod, then runs the inner loop in it: sync, commands and
//! port forwarding.

pub mod deployment;
pub mod storage;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::component::{self, delete, manifest, CommandHandler, HandlerOptions, RunHandler};
use crate::error::{AstraError, ReconcileError, Result};
use crate::image::ImageBackend;
use crate::labels;
use crate::platform::{ExecClient, JobClient, PodClient, PortForwarder, ResourceClient};
use crate::state::{Platform, StateStore};
use crate::sync::{SyncClient, SyncParameters};
use crate::watch::{ComponentStatus, State};

use super::common::{self, announce_forwarded_ports};
use super::ports::{self, PortOptions};
use super::{DevClient, PushParameters};
use deployment::DeploymentDiff;

/// How long a reconcile waits for the dev pod before reporting it as waiting.
pub const DEFAULT_POD_TIMEOUT: Duration = Duration::from_secs(60);

/// Service account the dev pod runs as.
const SERVICE_ACCOUNT: &str = "default";

/// How long to wait for the service account of a new namespace.
const SERVICE_ACCOUNT_TIMEOUT: Duration = Duration::from_secs(60);

const POD_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The dev pod, as found after the resources were created.
struct DeployedPod {
    pod: Pod,
    /// Whether the pod is not the one the previous pass worked with.
    changed: bool,
}

/// Identity of a pod across passes.
type PodIdentity = (String, Option<String>);

fn identity(pod: &Pod) -> PodIdentity {
    (
        pod.metadata.name.clone().unwrap_or_default(),
        pod.metadata.uid.clone(),
    )
}

/// Kubernetes dev client.
pub struct KubeDevClient {
    resources: Arc<dyn ResourceClient>,
    pods: Arc<dyn PodClient>,
    exec: Arc<dyn ExecClient>,
    jobs: Arc<dyn JobClient>,
    forwarder: Arc<dyn PortForwarder>,
    sync: Arc<dyn SyncClient>,
    images: Arc<dyn ImageBackend>,
    state: Arc<dyn StateStore>,
    ephemeral_source: bool,
    pod_timeout: Duration,
    last_pod: Mutex<Option<PodIdentity>>,
}

impl std::fmt::Debug for KubeDevClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeDevClient")
            .field("namespace", &self.resources.current_namespace())
            .field("ephemeral_source", &self.ephemeral_source)
            .field("pod_timeout", &self.pod_timeout)
            .finish_non_exhaustive()
    }
}

impl KubeDevClient {
    /// Creates a client working on `cluster`.
    #[must_use]
    pub fn new<C>(
        cluster: Arc<C>,
        forwarder: Arc<dyn PortForwarder>,
        sync: Arc<dyn SyncClient>,
        images: Arc<dyn ImageBackend>,
        state: Arc<dyn StateStore>,
    ) -> Self
    where
        C: ResourceClient + PodClient + ExecClient + JobClient + 'static,
    {
        Self {
            resources: cluster.clone(),
            pods: cluster.clone(),
            exec: cluster.clone(),
            jobs: cluster,
            forwarder,
            sync,
            images,
            state,
            ephemeral_source: false,
            pod_timeout: DEFAULT_POD_TIMEOUT,
            last_pod: Mutex::new(None),
        }
    }

    /// Keeps the sources in an `emptyDir` instead of a claim.
    #[must_use]
    pub const fn with_ephemeral_source(mut self, ephemeral: bool) -> Self {
        self.ephemeral_source = ephemeral;
        self
    }

    /// Sets how long a pass waits for the dev pod.
    #[must_use]
    pub const fn with_pod_timeout(mut self, timeout: Duration) -> Self {
        self.pod_timeout = timeout;
        self
    }

    fn handler(&self, params: &PushParameters, options: HandlerOptions) -> RunHandler {
        RunHandler::new(self.exec.clone(), params.devfile.clone(), params.context.clone(), options)
            .with_jobs(self.jobs.clone())
            .with_resources(self.resources.clone())
            .with_image_backend(self.images.clone())
    }

    /// Applies the Kubernetes components deployed by default, skipping the
    /// ones already applied unchanged in this session.
    async fn apply_kubernetes_components(&self, params: &PushParameters, status: &mut ComponentStatus) -> Result<()> {
        let components = params.devfile.k8s_and_oc_components_to_push(false);
        if components.is_empty() {
            return Ok(());
        }
        let handler = self.handler(params, HandlerOptions::default());
        for (name, component) in components {
            let manifest = manifest::load_manifest(component, &params.context.devfile_dir)?;
            if status.kubernetes_applied(name, &manifest) {
                continue;
            }
            handler.apply_kubernetes(name, component).await?;
            status.record_kubernetes_applied(name, &manifest);
        }
        Ok(())
    }

    async fn wait_for_pod(&self, selector: &str, replaced: bool) -> Result<Option<Pod>> {
        let deadline = Instant::now() + self.pod_timeout;
        loop {
            match self.pods.get_all_pods_from_selector(selector).await {
                Ok(pods) => {
                    let running = pods.into_iter().find(|p| {
                        let phase = p.status.as_ref().and_then(|s| s.phase.as_deref());
                        phase == Some("Running") && !(replaced && p.metadata.deletion_timestamp.is_some())
                    });
                    if let Some(pod) = running {
                        return Ok(Some(pod));
                    }
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POD_POLL_INTERVAL).await;
        }
    }

    /// Creates or updates the workload, and returns the running pod once it
    /// is there.
    async fn create_components(
        &self,
        params: &PushParameters,
        status: &mut ComponentStatus,
    ) -> Result<Option<DeployedPod>> {
        let devfile = &params.devfile;
        let context = &params.context;

        self.apply_kubernetes_components(params, status).await?;

        let infos = storage::volume_infos(devfile, context, self.ephemeral_source);
        let mut containers = common::build_containers(devfile);
        storage::add_volume_mounts(&mut containers, devfile);
        deployment::add_container_ports(&mut containers, devfile);
        let desired = deployment::build_deployment(devfile, context, containers, storage::pod_volumes(&infos));
        let name = context.workload_name();

        let (live, changed) = match self.resources.get_deployment(&name).await? {
            None => {
                self.resources
                    .wait_for_service_account(SERVICE_ACCOUNT, SERVICE_ACCOUNT_TIMEOUT)
                    .await?;
                info!("Creating deployment {}", name);
                (self.resources.create_deployment(&desired).await?, true)
            }
            Some(live) => {
                let diff = DeploymentDiff::between(&desired, &live);
                if diff.is_empty() {
                    debug!("Deployment {} is up to date", name);
                    (live, false)
                } else {
                    info!("Updating deployment {} ({} changed)", name, diff.changed.join(", "));
                    (self.resources.apply_deployment(&desired).await?, true)
                }
            }
        };

        let owner = deployment::owner_reference(&live);
        storage::ensure_pvcs(self.resources.as_ref(), &infos, context, owner.as_ref()).await?;

        if let Some(service) = deployment::build_service(devfile, context, &live) {
            let up_to_date = self
                .resources
                .get_service(&name)
                .await?
                .is_some_and(|s| deployment::service_matches(&service, &s));
            if !up_to_date {
                self.resources.apply_service(&service).await?;
            }
        }

        let selector = labels::get_selector(&context.component_name, &context.app_name, labels::COMPONENT_DEV_MODE, false);
        let Some(pod) = self.wait_for_pod(&selector, changed).await? else {
            info!("Waiting for the pod of {} to be running", name);
            return Ok(None);
        };

        let mut last = self.last_pod.lock().await;
        let current = identity(&pod);
        let pod_changed = changed || last.as_ref() != Some(&current);
        *last = Some(current);
        Ok(Some(DeployedPod {
            pod,
            changed: pod_changed,
        }))
    }

    async fn inner_loop(&self, params: &PushParameters, status: &mut ComponentStatus, deployed: DeployedPod) -> Result<()> {
        let devfile = &params.devfile;
        let options = &params.options;
        let pod_name = deployed.pod.metadata.name.clone().unwrap_or_default();

        let mut exec_required = deployed.changed || !status.commands_executed();
        if let Some((container, component)) = devfile.container_components().find(|(_, c)| c.mounts_sources()) {
            let sync_params = SyncParameters {
                path: params.context.devfile_dir.clone(),
                pod_name: pod_name.clone(),
                container_name: container.to_string(),
                sync_folder: component.source_mapping().to_string(),
                ignores: options.ignore_paths.clone(),
                force_write: deployed.changed || !status.files_synced(),
            };
            let synced = self.sync.sync_files(&sync_params).await?;
            status.mark_files_synced();
            exec_required |= synced;
        }

        let handler = self.handler(
            params,
            HandlerOptions {
                pod_name: pod_name.clone(),
                containers_running: component::container_names(&deployed.pod),
                msg: String::new(),
                direct_run: false,
                component_exists: status.run_executed() && !deployed.changed,
            },
        );

        if !status.post_start_events_done() && devfile.has_post_start_events() {
            component::exec_post_start_events(devfile, &handler).await?;
            status.mark_post_start_events_done();
        }

        if options.skip_commands {
            debug!("Skipping the build and run commands");
        } else if exec_required {
            common::exec_commands(&handler, devfile, options, status).await?;
        }

        self.forward_ports(params, status, &pod_name, deployed.changed).await?;
        status.set_state(State::Ready);
        Ok(())
    }

    async fn forward_ports(
        &self,
        params: &PushParameters,
        status: &mut ComponentStatus,
        pod_name: &str,
        pod_changed: bool,
    ) -> Result<()> {
        let options = &params.options;
        let used: Vec<u16> = self
            .state
            .get_other_forwarded_ports()
            .await?
            .iter()
            .map(|p| p.local_port)
            .collect();
        let containers: Vec<_> = params.devfile.container_components().collect();
        let port_options = PortOptions {
            debug: options.debug,
            random: options.random_ports,
            custom: &options.custom_forwarded_ports,
            used: &used,
            address: options.address(),
            platform: Platform::Cluster,
            ..PortOptions::default()
        };
        let mut forwarded = ports::assign(&containers, &port_options)?;
        if options.random_ports && ports::same_endpoints(status.endpoints_forwarded(), &forwarded) {
            forwarded = status.endpoints_forwarded().to_vec();
        }

        if !pod_changed && forwarded == status.endpoints_forwarded() {
            return Ok(());
        }
        self.forwarder
            .start_port_forwarding(pod_name, &forwarded)
            .await
            .map_err(|e| ReconcileError::PortForward { message: e.to_string() })?;
        announce_forwarded_ports(&forwarded);
        self.state.set_forwarded_ports(forwarded.clone()).await?;
        status.set_endpoints_forwarded(forwarded);
        Ok(())
    }
}

#[async_trait]
impl DevClient for KubeDevClient {
    async fn reconcile(&self, params: &PushParameters, status: &mut ComponentStatus) -> Result<()> {
        let devfile = &params.devfile;
        info!("Reconciling component {}", params.context.component_name);

        let applied: HashSet<&str> = devfile
            .k8s_and_oc_components_to_push(false)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        let skipped: Vec<&str> = devfile
            .k8s_and_oc_components_to_push(true)
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| !applied.contains(name))
            .collect();
        if !skipped.is_empty() {
            warn!(
                "Kubernetes components not deployed by default are not applied: {}. Run them with an apply command",
                skipped.join(", ")
            );
        }

        common::apply_auto_images(self.images.as_ref(), params, status).await?;

        let Some(deployed) = self.create_components(params, status).await? else {
            status.set_state(State::Waiting);
            return Ok(());
        };
        self.inner_loop(params, status, deployed).await
    }

    async fn run(&self, params: &PushParameters, command_name: &str) -> Result<()> {
        common::run(
            self.pods.as_ref(),
            self.exec.clone(),
            Some(self.jobs.clone()),
            params,
            command_name,
        )
        .await
    }

    async fn clean_up(&self, params: &PushParameters) -> Result<()> {
        self.forwarder.stop_port_forwarding().await;

        let (inner_loop_deployed, resources) = match delete::list_cluster_resources_to_delete_from_devfile(
            self.resources.as_ref(),
            &params.devfile,
            &params.context,
            labels::COMPONENT_DEV_MODE,
        )
        .await
        {
            Ok(found) => found,
            Err(e) if e.is_warning() => {
                warn!("{}", e);
                (false, Vec::new())
            }
            Err(e) => return Err(e),
        };

        if inner_loop_deployed {
            delete::execute_pre_stop_events(
                self.pods.as_ref(),
                self.exec.clone(),
                params.devfile.clone(),
                &params.context,
            )
            .await?;
        }

        let failed = delete::delete_resources(self.resources.as_ref(), &resources, false).await;
        for resource in &failed {
            warn!("Failed to delete the {} {:?}", resource.kind(), resource.name());
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(AstraError::warning(format!(
                "{} resource(s) of component {} could not be deleted",
                failed.len(),
                params.context.component_name
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::testing;
    use crate::dev::StartOptions;
    use crate::image::MockImageBackend;
    use crate::platform::fake::FakeCluster;
    use crate::state::DevstateStore;
    use crate::sync::TarSync;
    use std::fs;
    use tempfile::TempDir;

    const DEVFILE: &str = "
schemaVersion: 2.2.0
metadata:
  name: api
components:
  - name: runtime
    container:
      image: node:20
      endpoints:
        - name: http
          targetPort: 3000
commands:
  - id: install
    exec:
      component: runtime
      commandLine: npm install
      group:
        kind: build
  - id: start
    exec:
      component: runtime
      commandLine: npm start
      group:
        kind: run
  - id: greet
    exec:
      component: runtime
      commandLine: echo hello
  - id: bye
    exec:
      component: runtime
      commandLine: echo bye
events:
  postStart:
    - greet
  preStop:
    - bye
";

    struct Setup {
        dir: TempDir,
        cluster: Arc<FakeCluster>,
        client: KubeDevClient,
        params: PushParameters,
    }

    async fn setup() -> Setup {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("index.js"), "console.log(1)").expect("write");
        let cluster = Arc::new(FakeCluster::new());
        let state = Arc::new(DevstateStore::new(dir.path().join(".astra")));
        state.init(Platform::Cluster).await.expect("init");

        let client = KubeDevClient::new(
            cluster.clone(),
            cluster.clone(),
            Arc::new(TarSync::new(cluster.clone(), ".astra")),
            Arc::new(MockImageBackend::new()),
            state,
        )
        .with_pod_timeout(Duration::ZERO);

        let mut context = testing::context();
        context.devfile_dir = dir.path().to_path_buf();
        let params = PushParameters {
            options: StartOptions::default(),
            devfile: Arc::new(testing::devfile(DEVFILE)),
            devfile_path: dir.path().join("devfile.yaml"),
            context,
        };
        Setup {
            dir,
            cluster,
            client,
            params,
        }
    }

    fn commands(cluster: &FakeCluster) -> Vec<String> {
        cluster.exec_calls().into_iter().map(|c| c.command).collect()
    }

    #[tokio::test]
    async fn test_first_reconcile_deploys_and_runs() {
        let s = setup().await;
        let mut status = ComponentStatus::new();
        s.client.reconcile(&s.params, &mut status).await.expect("reconcile");

        assert_eq!(status.state(), State::Ready);
        assert!(s.cluster.deployment("api-app").is_some());
        assert_eq!(s.cluster.pvc_names(), vec![String::from("astra-projects-api-app")]);

        let commands = commands(&s.cluster);
        assert_eq!(commands[0], "tar xf - -C /projects");
        assert!(commands.iter().any(|c| c.contains("echo hello")));
        assert!(commands.iter().any(|c| c.contains("npm install")));
        assert!(commands.iter().any(|c| c.contains("npm start")));

        let forwarded = s.cluster.forwarded_ports();
        assert_eq!(forwarded.len(), 1);
        assert_eq!((forwarded[0].local_port, forwarded[0].container_port), (20001, 3000));
        assert_eq!(status.endpoints_forwarded(), forwarded.as_slice());
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let s = setup().await;
        let mut status = ComponentStatus::new();
        s.client.reconcile(&s.params, &mut status).await.expect("first");
        let mutations = s.cluster.mutations();
        let execs = s.cluster.exec_calls().len();

        s.client.reconcile(&s.params, &mut status).await.expect("second");
        assert_eq!(s.cluster.mutations(), mutations);
        assert_eq!(s.cluster.exec_calls().len(), execs);
        assert_eq!(status.state(), State::Ready);
    }

    #[tokio::test]
    async fn test_file_change_rebuilds_without_post_start() {
        let s = setup().await;
        let mut status = ComponentStatus::new();
        s.client.reconcile(&s.params, &mut status).await.expect("first");
        let before = commands(&s.cluster).len();

        fs::write(s.dir.path().join("index.js"), "console.log(\"changed\")").expect("write");
        s.client.reconcile(&s.params, &mut status).await.expect("second");

        let after = commands(&s.cluster);
        let new: Vec<&String> = after[before..].iter().collect();
        assert!(new.iter().any(|c| c.contains("npm install")));
        assert!(new.iter().any(|c| c.contains("npm start")));
        assert!(!new.iter().any(|c| c.contains("echo hello")));
    }

    #[tokio::test]
    async fn test_build_only_devfile_is_built_once() {
        let mut s = setup().await;
        s.params.devfile = Arc::new(testing::devfile(
            "
schemaVersion: 2.2.0
metadata:
  name: api
components:
  - name: runtime
    container:
      image: node:20
commands:
  - id: install
    exec:
      component: runtime
      commandLine: npm install
      group:
        kind: build
",
        ));
        let mut status = ComponentStatus::new();
        s.client.reconcile(&s.params, &mut status).await.expect("first");
        s.client.reconcile(&s.params, &mut status).await.expect("second");

        let builds = commands(&s.cluster).iter().filter(|c| c.contains("npm install")).count();
        assert_eq!(builds, 1);
        assert!(!status.run_executed());
        assert_eq!(status.state(), State::Ready);
    }

    #[tokio::test]
    async fn test_skip_commands_only_syncs() {
        let mut s = setup().await;
        s.params.options.skip_commands = true;
        let mut status = ComponentStatus::new();
        s.client.reconcile(&s.params, &mut status).await.expect("reconcile");

        assert!(!status.run_executed());
        assert!(!commands(&s.cluster).iter().any(|c| c.contains("npm")));
    }

    #[tokio::test]
    async fn test_clean_up_runs_pre_stop_and_deletes() {
        let s = setup().await;
        let mut status = ComponentStatus::new();
        s.client.reconcile(&s.params, &mut status).await.expect("reconcile");

        s.client.clean_up(&s.params).await.expect("clean up");
        assert!(commands(&s.cluster).iter().any(|c| c.contains("echo bye")));
        assert_eq!(s.cluster.deleted(), vec![String::from("Deployment/api-app")]);
        assert!(s.cluster.forwarded_ports().is_empty());
    }

    #[tokio::test]
    async fn test_run_executes_in_dev_pod() {
        let s = setup().await;
        let mut status = ComponentStatus::new();
        s.client.reconcile(&s.params, &mut status).await.expect("reconcile");

        s.client.run(&s.params, "greet").await.expect("run");
        let last = s.cluster.exec_calls().pop().expect("call");
        assert_eq!(last.pod, "api-app-pod");
        assert!(last.command.contains("echo hello"));
    }
}
