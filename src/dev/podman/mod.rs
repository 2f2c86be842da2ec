//! Dev mode on Podman.
//!
//! The component runs as a single pod created with `podman play kube`.
//! Podman publishes the forwarded ports itself, so port forwarding is part
//! of the pod definition: a changed port means a new pod.

pub mod pod;
pub mod sockets;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::component::{self, delete, HandlerOptions, RunHandler};
use crate::devfile::DevfileObj;
use crate::error::{PlatformError, ReconcileError, Result};
use crate::image::ImageBackend;
use crate::labels;
use crate::platform::{podman::pod_volume_names, ExecClient, PodClient, PodmanClient, PortForwarder};
use crate::state::{ForwardedPort, Platform, StateStore};
use crate::sync::{SyncClient, SyncParameters};
use crate::watch::{ComponentStatus, State};

use super::common::{self, announce_forwarded_ports};
use super::ports::{self, PortOptions};
use super::{DevClient, PushParameters, StartOptions};
use sockets::{is_listening, is_loopback_only, parse_listeners, Listener, PROC_NET_TCP_COMMAND};

/// How long to wait for the application to listen on its ports.
pub const DEFAULT_APP_PORTS_TIMEOUT: Duration = Duration::from_secs(60);

const APP_PORTS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Kubernetes components a cluster would apply on its own; apply commands
/// referencing the others fail when they run.
fn skipped_kubernetes_components(devfile: &DevfileObj) -> Vec<&str> {
    devfile
        .k8s_and_oc_components_to_push(false)
        .into_iter()
        .map(|(name, _)| name)
        .collect()
}

/// Podman dev client.
pub struct PodmanDevClient {
    podman: Arc<dyn PodmanClient>,
    pods: Arc<dyn PodClient>,
    exec: Arc<dyn ExecClient>,
    forwarder: Arc<dyn PortForwarder>,
    sync: Arc<dyn SyncClient>,
    images: Arc<dyn ImageBackend>,
    state: Arc<dyn StateStore>,
    app_ports_timeout: Duration,
    /// Pod deployed by the last pass.
    deployed_pod: Mutex<Option<Pod>>,
}

impl std::fmt::Debug for PodmanDevClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodmanDevClient")
            .field("app_ports_timeout", &self.app_ports_timeout)
            .finish_non_exhaustive()
    }
}

impl PodmanDevClient {
    /// Creates a client working with `podman`.
    #[must_use]
    pub fn new<C>(
        podman: Arc<C>,
        forwarder: Arc<dyn PortForwarder>,
        sync: Arc<dyn SyncClient>,
        images: Arc<dyn ImageBackend>,
        state: Arc<dyn StateStore>,
    ) -> Self
    where
        C: PodmanClient + PodClient + ExecClient + 'static,
    {
        Self {
            podman: podman.clone(),
            pods: podman.clone(),
            exec: podman,
            forwarder,
            sync,
            images,
            state,
            app_ports_timeout: DEFAULT_APP_PORTS_TIMEOUT,
            deployed_pod: Mutex::new(None),
        }
    }

    /// Sets how long to wait for the application ports.
    #[must_use]
    pub const fn with_app_ports_timeout(mut self, timeout: Duration) -> Self {
        self.app_ports_timeout = timeout;
        self
    }

    async fn assign_ports(&self, params: &PushParameters, status: &ComponentStatus) -> Result<Vec<ForwardedPort>> {
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
            platform: Platform::Podman,
            ..PortOptions::default()
        };
        let forwarded = ports::assign(&containers, &port_options)?;
        if options.random_ports && ports::same_endpoints(status.endpoints_forwarded(), &forwarded) {
            return Ok(status.endpoints_forwarded().to_vec());
        }
        Ok(forwarded)
    }

    /// Fails when volumes of `pod` already exist, left over by another
    /// session or an unclean exit.
    async fn check_volumes_free(&self, pod: &Pod) -> Result<()> {
        let existing = self.podman.volume_ls().await?;
        let taken: Vec<String> = pod_volume_names(pod)
            .into_iter()
            .filter(|v| existing.contains(v))
            .collect();
        if taken.is_empty() {
            return Ok(());
        }
        Err(ReconcileError::Aborted {
            reason: format!(
                "volumes already exist, please remove them before to run astra dev: {}",
                taken.join(", ")
            ),
        }
        .into())
    }

    /// Deploys the pod unless the one deployed last is identical.
    ///
    /// Returns the pod and whether it was replaced.
    async fn deploy_pod(&self, params: &PushParameters, forwarded: &[ForwardedPort]) -> Result<(Pod, bool)> {
        let pod = pod::create_pod_from_component(
            &params.devfile,
            &params.context,
            forwarded,
            params.options.forward_localhost,
        );

        let mut deployed = self.deployed_pod.lock().await;
        if deployed.as_ref() == Some(&pod) {
            debug!("Pod is already deployed as required");
            return Ok((pod, false));
        }

        match deployed.as_ref() {
            Some(old) => self.podman.cleanup_pod_resources(old, false).await?,
            None => self.check_volumes_free(&pod).await?,
        }

        let name = params.context.workload_name();
        info!("Deploying pod {}", name);
        if let Err(e) = self.podman.play_kube(&pod).await {
            if self.podman.pod_ls().await.is_ok_and(|pods| pods.contains(&name)) {
                *deployed = Some(Pod {
                    metadata: ObjectMeta {
                        name: Some(name),
                        ..ObjectMeta::default()
                    },
                    ..Pod::default()
                });
            }
            return Err(e);
        }

        *deployed = Some(pod.clone());
        Ok((pod, true))
    }

    async fn listeners(&self, pod_name: &str, container: &str) -> Result<BTreeSet<Listener>> {
        let command: Vec<String> = PROC_NET_TCP_COMMAND.iter().map(ToString::to_string).collect();
        let (stdout, _) = self.exec.execute_command(&command, pod_name, container, false).await?;
        Ok(parse_listeners(&stdout))
    }

    /// Waits until the application listens on every forwarded port.
    async fn check_app_ports(&self, pod_name: &str, forwarded: &[ForwardedPort]) -> Result<()> {
        let mut by_container: BTreeMap<&str, Vec<u16>> = BTreeMap::new();
        for port in forwarded {
            by_container
                .entry(port.container_name.as_str())
                .or_default()
                .push(port.container_port);
        }

        let deadline = Instant::now() + self.app_ports_timeout;
        loop {
            let mut ready = true;
            for (container, container_ports) in &by_container {
                let listeners = self.listeners(pod_name, container).await?;
                ready &= container_ports.iter().all(|p| is_listening(&listeners, *p));
            }
            if ready {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PlatformError::Timeout {
                    operation: String::from("waiting for the application to listen on its ports"),
                    seconds: self.app_ports_timeout.as_secs(),
                }
                .into());
            }
            tokio::time::sleep(APP_PORTS_POLL_INTERVAL).await;
        }
    }

    /// Podman does not forward to applications listening on the container
    /// loopback only. Such ports are an error unless the user chose to
    /// ignore them.
    async fn handle_loopback_ports(&self, options: &StartOptions, pod: &Pod, forwarded: &[ForwardedPort]) -> Result<()> {
        if options.forward_localhost || forwarded.is_empty() {
            return Ok(());
        }
        let Some(first) = pod.spec.as_ref().and_then(|s| s.containers.first()) else {
            return Ok(());
        };
        let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
        let listeners = match self.listeners(pod_name, &first.name).await {
            Ok(listeners) => listeners,
            Err(e) => {
                warn!("unable to detect container ports bound on the loopback interface: {}", e);
                return Ok(());
            }
        };

        let loopback: Vec<String> = forwarded
            .iter()
            .filter(|p| is_loopback_only(&listeners, p.container_port))
            .map(|p| format!("{} ({})", p.port_name, p.container_port))
            .collect();
        if loopback.is_empty() {
            return Ok(());
        }

        let mut msg = format!(
            "Detected that the following port(s) can be reached only via the container loopback interface: {}.\n\
             Port forwarding on Podman currently does not work with applications listening on the loopback interface.\n\
             Either change the application to make those port(s) reachable on all interfaces (0.0.0.0), or rerun 'astra dev' with ",
            loopback.join(", ")
        );
        if options.ignore_localhost {
            msg.push_str("'--forward-localhost' to make port-forwarding work with such ports.");
            warn!("{}", msg);
            return Ok(());
        }
        msg.push_str(
            "any of the following options:\n\
             - --ignore-localhost: no error will be returned by astra, but forwarding to those ports might not work on Podman.\n\
             - --forward-localhost: astra will inject a dedicated side container to redirect traffic to such ports.",
        );
        error!("{}", msg);
        Err(ReconcileError::LoopbackPorts.into())
    }
}

#[async_trait]
impl DevClient for PodmanDevClient {
    async fn reconcile(&self, params: &PushParameters, status: &mut ComponentStatus) -> Result<()> {
        let devfile = &params.devfile;
        let options = &params.options;
        info!("Reconciling component {} on Podman", params.context.component_name);

        let skipped = skipped_kubernetes_components(devfile);
        if !skipped.is_empty() {
            warn!("Kubernetes components are not supported on Podman. Skipping: {}.", skipped.join(", "));
        }

        common::apply_auto_images(self.images.as_ref(), params, status).await?;

        let forwarded = self.assign_ports(params, status).await?;
        let (pod, pod_changed) = self.deploy_pod(params, &forwarded).await?;
        status.set_state(State::Ready);
        let pod_name = pod.metadata.name.clone().unwrap_or_default();

        let mut exec_required = pod_changed || !status.commands_executed();
        if let Some((container, component)) = devfile.container_components().find(|(_, c)| c.mounts_sources()) {
            let sync_params = SyncParameters {
                path: params.context.devfile_dir.clone(),
                pod_name: pod_name.clone(),
                container_name: container.to_string(),
                sync_folder: component.source_mapping().to_string(),
                ignores: options.ignore_paths.clone(),
                force_write: pod_changed || !status.files_synced(),
            };
            exec_required |= self.sync.sync_files(&sync_params).await?;
            status.mark_files_synced();
        }

        let handler = RunHandler::new(
            self.exec.clone(),
            devfile.clone(),
            params.context.clone(),
            HandlerOptions {
                pod_name: pod_name.clone(),
                containers_running: component::container_names(&pod),
                msg: String::new(),
                direct_run: false,
                component_exists: status.run_executed() && !pod_changed,
            },
        )
        .with_image_backend(self.images.clone());

        if !status.post_start_events_done() && devfile.has_post_start_events() {
            component::exec_post_start_events(devfile, &handler).await?;
        }
        status.mark_post_start_events_done();

        let mut ran = false;
        if !options.skip_commands && exec_required {
            ran = common::exec_commands(&handler, devfile, options, status).await?;
        }

        if ran && !forwarded.is_empty() {
            info!("Waiting for the application to be ready");
            if let Err(e) = self.check_app_ports(&pod_name, &forwarded).await {
                warn!("Port forwarding might not work correctly: {}", e);
                warn!("Running `astra logs --follow --platform podman` might help in identifying the problem.");
            }
        }

        if ran || pod_changed {
            self.handle_loopback_ports(options, &pod, &forwarded).await?;
        }

        if pod_changed || forwarded != status.endpoints_forwarded() {
            if options.forward_localhost {
                self.forwarder
                    .start_port_forwarding(&pod_name, &forwarded)
                    .await
                    .map_err(|e| ReconcileError::PortForward { message: e.to_string() })?;
            }
            announce_forwarded_ports(&forwarded);
            self.state.set_forwarded_ports(forwarded.clone()).await?;
            status.set_endpoints_forwarded(forwarded);
        }

        status.set_state(State::Ready);
        Ok(())
    }

    async fn run(&self, params: &PushParameters, command_name: &str) -> Result<()> {
        common::run(self.pods.as_ref(), self.exec.clone(), None, params, command_name).await
    }

    async fn clean_up(&self, params: &PushParameters) -> Result<()> {
        self.forwarder.stop_port_forwarding().await;

        delete::execute_pre_stop_events(
            self.pods.as_ref(),
            self.exec.clone(),
            params.devfile.clone(),
            &params.context,
        )
        .await?;

        let deployed = self.deployed_pod.lock().await.take();
        let pod = match deployed {
            Some(pod) => Some(pod),
            None => delete::list_podman_resources_to_delete(
                self.podman.as_ref(),
                &params.context,
                labels::COMPONENT_DEV_MODE,
            )
            .await?,
        };
        if let Some(pod) = pod {
            info!("Deleting pod {}", pod.metadata.name.as_deref().unwrap_or_default());
            self.podman.cleanup_pod_resources(&pod, true).await?;
        }
        Ok(())
    }
}
