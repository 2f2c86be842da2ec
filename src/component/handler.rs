//! Running single devfile commands against a platform.

use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::devfile::{Command, CommandGroupKind, DevfileObj, EnvVar, ExecCommand, ImageComponent, KubernetesComponent};
use crate::error::{AstraError, ExecError, Result};
use crate::image::{build_push_specific_image, ImageBackend};
use crate::labels;
use crate::platform::{ExecClient, JobClient, ResourceClient};

use super::{execute_in_new_container, manifest, ComponentContext};

/// Mount path of the volume shared with astra, holding the pid files.
pub const SHARED_DATA_MOUNT_PATH: &str = "/opt/astra/";

/// Runs the leaves of a devfile command tree.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Builds, and possibly pushes, an image component.
    async fn apply_image(&self, component: &str, image: &ImageComponent) -> Result<()>;

    /// Applies the manifest of a Kubernetes component.
    async fn apply_kubernetes(&self, component: &str, kubernetes: &KubernetesComponent) -> Result<()>;

    /// Applies the manifest of an OpenShift component.
    async fn apply_openshift(&self, component: &str, openshift: &KubernetesComponent) -> Result<()>;

    /// Runs an exec command.
    ///
    /// `group` is the group of the command, or of the composite command it
    /// was reached through.
    async fn execute(&self, command: &Command, exec: &ExecCommand, group: Option<CommandGroupKind>) -> Result<()>;
}

/// Per-invocation settings of a [`RunHandler`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerOptions {
    /// Pod running the component.
    pub pod_name: String,
    /// Containers currently running in the pod.
    pub containers_running: Vec<String>,
    /// Message shown before running a command.
    pub msg: String,
    /// Run in the foreground and stream the output (`astra run`).
    pub direct_run: bool,
    /// The run command already ran in this session.
    pub component_exists: bool,
}

/// Command handler backed by the platform clients.
///
/// Without a job client, commands for containers that are not running are
/// skipped with a warning. Without a resource client, Kubernetes components
/// cannot be applied.
pub struct RunHandler {
    exec: Arc<dyn ExecClient>,
    jobs: Option<Arc<dyn JobClient>>,
    resources: Option<Arc<dyn ResourceClient>>,
    image: Option<Arc<dyn ImageBackend>>,
    devfile: Arc<DevfileObj>,
    context: ComponentContext,
    options: HandlerOptions,
}

impl std::fmt::Debug for RunHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandler")
            .field("context", &self.context)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RunHandler {
    /// Creates a handler executing through `exec`.
    #[must_use]
    pub fn new(
        exec: Arc<dyn ExecClient>,
        devfile: Arc<DevfileObj>,
        context: ComponentContext,
        options: HandlerOptions,
    ) -> Self {
        Self {
            exec,
            jobs: None,
            resources: None,
            image: None,
            devfile,
            context,
            options,
        }
    }

    /// Runs commands of stopped containers as Kubernetes jobs.
    #[must_use]
    pub fn with_jobs(mut self, jobs: Arc<dyn JobClient>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Enables applying Kubernetes and OpenShift components.
    #[must_use]
    pub fn with_resources(mut self, resources: Arc<dyn ResourceClient>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Enables building image components.
    #[must_use]
    pub fn with_image_backend(mut self, image: Arc<dyn ImageBackend>) -> Self {
        self.image = Some(image);
        self
    }

    fn is_container_running(&self, container: &str) -> bool {
        self.options.containers_running.iter().any(|c| c == container)
    }

    async fn apply_manifest(&self, component: &str, kubernetes: &KubernetesComponent) -> Result<()> {
        let Some(resources) = &self.resources else {
            return Err(ExecError::Unsupported {
                command: component.to_string(),
                reason: String::from("Kubernetes components can only be applied on a cluster"),
            }
            .into());
        };

        let mut component_labels =
            labels::get_labels(&self.context.component_name, &self.context.app_name, labels::COMPONENT_DEV_MODE, false);
        labels::add_project_type(&mut component_labels, self.devfile.metadata.project_type.as_deref());

        for mut object in manifest::component_objects(kubernetes, &self.context.devfile_dir)? {
            object
                .metadata
                .labels
                .get_or_insert_with(Default::default)
                .extend(component_labels.clone());
            let applied = resources.apply_dynamic_resource(&object).await?;
            info!("Applied {}/{}", applied.kind(), applied.name());
        }
        Ok(())
    }

    /// Runs a command that terminates, waiting for it.
    async fn run_terminating(&self, command: &Command, exec: &ExecCommand) -> Result<()> {
        let script = command_script(exec);
        let cmd = vec![String::from("/bin/sh"), String::from("-c"), script];
        match self
            .exec
            .execute_command(&cmd, &self.options.pod_name, &exec.component, self.options.direct_run)
            .await
        {
            Ok(_) => Ok(()),
            Err(AstraError::Exec(ExecError::CommandFailed { exit_code, logs, .. })) => {
                if !self.options.direct_run && !logs.is_empty() {
                    error!("Output of command {}:\n{}", command.id, logs.join("\n"));
                }
                Err(ExecError::CommandFailed {
                    command: command.id.clone(),
                    container: exec.component.clone(),
                    exit_code,
                    logs,
                }
                .into())
            }
            Err(e) => Err(e),
        }
    }

    /// Starts a long-running command in the background, replacing any
    /// previous instance.
    async fn run_detached(&self, command: &Command, exec: &ExecCommand) -> Result<()> {
        let pid_file = pid_file(&command.id);
        let kill = vec![String::from("/bin/sh"), String::from("-c"), kill_script(&pid_file)];
        self.exec
            .execute_command(&kill, &self.options.pod_name, &exec.component, false)
            .await?;

        let inner = format!(
            "echo $$ > {pid} && ({script}) 1>>/proc/1/fd/1 2>>/proc/1/fd/2; echo $? >> {pid}",
            pid = pid_file,
            script = command_script(exec)
        );
        let start = vec![
            String::from("/bin/sh"),
            String::from("-c"),
            String::from("nohup /bin/sh -c \"$0\" >/dev/null 2>&1 &"),
            inner,
        ];
        self.exec
            .execute_command(&start, &self.options.pod_name, &exec.component, false)
            .await?;
        debug!("Started command {} in container {}", command.id, exec.component);
        Ok(())
    }
}

/// File where the PID of a detached command is recorded.
fn pid_file(command_id: &str) -> String {
    format!("{SHARED_DATA_MOUNT_PATH}.astra_cmd_{command_id}.pid")
}

fn kill_script(pid_file: &str) -> String {
    format!(
        "if [ -f {pid_file} ]; then PID=$(head -n 1 {pid_file}); pkill -P \"$PID\" 2>/dev/null; kill \"$PID\" 2>/dev/null; rm -f {pid_file}; fi; exit 0"
    )
}

/// `export A="1" B="2"`, or an empty string without variables.
pub(crate) fn env_exports(env: &[EnvVar]) -> String {
    if env.is_empty() {
        return String::new();
    }
    let mut out = String::from("export");
    for var in env {
        let _ = write!(out, " {}=\"{}\"", var.name, var.value.replace('"', "\\\""));
    }
    out
}

/// Shell script running `exec` in its working directory with its environment.
pub(crate) fn command_script(exec: &ExecCommand) -> String {
    let mut parts = Vec::new();
    if let Some(dir) = exec.working_dir.as_deref().filter(|d| !d.is_empty()) {
        parts.push(format!("cd {dir}"));
    }
    let exports = env_exports(&exec.env);
    if !exports.is_empty() {
        parts.push(exports);
    }
    parts.push(exec.command_line.clone());
    parts.join(" && ")
}

#[async_trait]
impl CommandHandler for RunHandler {
    async fn apply_image(&self, component: &str, image: &ImageComponent) -> Result<()> {
        let Some(backend) = &self.image else {
            return Err(ExecError::Unsupported {
                command: component.to_string(),
                reason: String::from("no image build backend is available"),
            }
            .into());
        };
        build_push_specific_image(backend.as_ref(), image, &self.context.devfile_dir, self.context.push_images).await
    }

    async fn apply_kubernetes(&self, component: &str, kubernetes: &KubernetesComponent) -> Result<()> {
        self.apply_manifest(component, kubernetes).await
    }

    async fn apply_openshift(&self, component: &str, openshift: &KubernetesComponent) -> Result<()> {
        self.apply_manifest(component, openshift).await
    }

    async fn execute(&self, command: &Command, exec: &ExecCommand, group: Option<CommandGroupKind>) -> Result<()> {
        if !self.is_container_running(&exec.component) {
            let Some(jobs) = &self.jobs else {
                warn!("Container {:?} is not running, cannot execute command {}", exec.component, command.id);
                return Ok(());
            };
            return execute_in_new_container(jobs.as_ref(), &self.devfile, &self.context, command, exec).await;
        }

        let long_running =
            !self.options.direct_run && matches!(group, Some(CommandGroupKind::Run | CommandGroupKind::Debug));

        if long_running && self.options.component_exists && exec.hot_reload_capable.unwrap_or(false) {
            info!("Command {} is hot reload capable, not restarting it", command.id);
            return Ok(());
        }

        let msg = if self.options.msg.is_empty() {
            "Executing command in container"
        } else {
            self.options.msg.as_str()
        };
        info!("{} (command: {})", msg, command.id);

        if long_running {
            self.run_detached(command, exec).await
        } else {
            self.run_terminating(command, exec).await
        }
    }
}
