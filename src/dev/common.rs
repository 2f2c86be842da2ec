//! Reconcile steps shared by the Kubernetes and Podman dev clients.

use k8s_openapi::api::core::v1::{Container, EnvVar, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::component::{self, CommandHandler, HandlerOptions, RunHandler};
use crate::devfile::{CommandGroupKind, CommandKind, ContainerComponent, DevfileObj};
use crate::error::{AstraError, Result};
use crate::image::{build_push_specific_image, ImageBackend};
use crate::platform::{ExecClient, JobClient, PodClient};
use crate::state::ForwardedPort;
use crate::watch::ComponentStatus;

use super::{PushParameters, StartOptions};

/// Volume holding the synchronized sources.
pub const SOURCE_VOLUME: &str = "astra-projects";

/// Volume shared between astra and the containers, holding the pid files.
pub const SHARED_DATA_VOLUME: &str = "astra-shared-data";

/// Where the sources are mounted when the devfile does not say.
pub const PROJECTS_ROOT: &str = "/projects";

/// Keeps a container without its own entrypoint running.
const KEEP_ALIVE: [&str; 3] = ["tail", "-f", "/dev/null"];

/// Names of the containers exec commands run in.
fn containers_running_commands(devfile: &DevfileObj) -> HashSet<&str> {
    devfile
        .commands
        .iter()
        .filter_map(|c| match &c.kind {
            CommandKind::Exec(exec) => Some(exec.component.as_str()),
            _ => None,
        })
        .collect()
}

fn resources(container: &ContainerComponent) -> Option<ResourceRequirements> {
    let quantities = |memory: &Option<String>, cpu: &Option<String>| {
        let mut map = BTreeMap::new();
        if let Some(m) = memory.as_ref().filter(|m| !m.is_empty()) {
            map.insert(String::from("memory"), Quantity(m.clone()));
        }
        if let Some(c) = cpu.as_ref().filter(|c| !c.is_empty()) {
            map.insert(String::from("cpu"), Quantity(c.clone()));
        }
        (!map.is_empty()).then_some(map)
    };
    let limits = quantities(&container.memory_limit, &container.cpu_limit);
    let requests = quantities(&container.memory_request, &container.cpu_request);
    (limits.is_some() || requests.is_some()).then(|| ResourceRequirements {
        limits,
        requests,
        ..ResourceRequirements::default()
    })
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..EnvVar::default()
    }
}

/// Containers of the dev workload, without ports or volume mounts.
///
/// A container exec commands run in, that declares neither command nor
/// args, is kept alive with `tail -f /dev/null`.
#[must_use]
pub fn build_containers(devfile: &DevfileObj) -> Vec<Container> {
    let running_commands = containers_running_commands(devfile);
    devfile
        .container_components()
        .map(|(name, c)| {
            let (command, args) = if c.command.is_empty() && c.args.is_empty() && running_commands.contains(name) {
                (
                    vec![KEEP_ALIVE[0].to_string()],
                    KEEP_ALIVE[1..].iter().map(ToString::to_string).collect(),
                )
            } else {
                (c.command.clone(), c.args.clone())
            };

            let mut env = vec![
                env_var("PROJECTS_ROOT", PROJECTS_ROOT),
                env_var("PROJECT_SOURCE", c.source_mapping()),
            ];
            env.extend(c.env.iter().map(|e| env_var(&e.name, &e.value)));

            Container {
                name: name.to_string(),
                image: Some(c.image.clone()),
                command: (!command.is_empty()).then_some(command),
                args: (!args.is_empty()).then_some(args),
                env: Some(env),
                resources: resources(c),
                ..Container::default()
            }
        })
        .collect()
}

/// Builds, and pushes if configured, the images built automatically.
///
/// Images already built in this session with the same definition are
/// skipped.
///
/// # Errors
///
/// Returns an error if a build or push fails.
pub async fn apply_auto_images(
    backend: &dyn ImageBackend,
    params: &PushParameters,
    status: &mut ComponentStatus,
) -> Result<()> {
    for (name, image) in params.devfile.image_components_to_push_automatically() {
        if status.image_applied(name, image) {
            debug!("Image component {} is unchanged, not building it again", name);
            continue;
        }
        build_push_specific_image(backend, image, &params.context.devfile_dir, params.context.push_images).await?;
        status.record_image_applied(name, image);
    }
    Ok(())
}

/// Runs the build command, then the run or debug command.
///
/// A missing run or debug command is only a warning, and the phase still
/// counts as done. Returns whether the run or debug command was executed.
///
/// # Errors
///
/// Returns an error if a command fails.
pub async fn exec_commands(
    handler: &dyn CommandHandler,
    devfile: &DevfileObj,
    options: &StartOptions,
    status: &mut ComponentStatus,
) -> Result<bool> {
    component::build(devfile, options.build_command.as_deref(), handler).await?;

    let (kind, name) = if options.debug {
        (CommandGroupKind::Debug, options.debug_command.as_deref())
    } else {
        (CommandGroupKind::Run, options.run_command.as_deref())
    };
    let Some(command) = devfile.get_command(name, kind)? else {
        match name {
            Some(name) => warn!("Missing {} command with name {:?}", kind, name),
            None => warn!("Missing default {} command", kind),
        }
        status.mark_commands_executed();
        return Ok(false);
    };

    component::execute_command_by_name(devfile, &command.id, handler).await?;
    status.mark_commands_executed();
    status.mark_run_executed();
    Ok(true)
}

/// Runs a command in the running dev pod, streaming its output.
///
/// # Errors
///
/// Returns an error if the pod is not running or the command fails.
pub async fn run(
    pods: &dyn PodClient,
    exec: Arc<dyn ExecClient>,
    jobs: Option<Arc<dyn JobClient>>,
    params: &PushParameters,
    command_name: &str,
) -> Result<()> {
    let context = &params.context;
    let pod = pods
        .get_pod_using_component_name(&context.component_name, &context.app_name)
        .await
        .map_err(|e| {
            AstraError::internal(format!(
                "unable to get pod for component {}: {e}. Please check the command 'astra dev' is running",
                context.component_name
            ))
        })?;

    let options = HandlerOptions {
        pod_name: pod.metadata.name.clone().unwrap_or_default(),
        containers_running: component::container_names(&pod),
        msg: String::from("Executing command in container"),
        direct_run: true,
        component_exists: false,
    };
    let mut handler = RunHandler::new(exec, params.devfile.clone(), context.clone(), options);
    if let Some(jobs) = jobs {
        handler = handler.with_jobs(jobs);
    }
    component::execute_command_by_name(&params.devfile, command_name, &handler).await
}

/// Logs where each port is forwarded.
pub fn announce_forwarded_ports(ports: &[ForwardedPort]) {
    for port in ports {
        info!("Forwarding from {}", port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::testing;
    use crate::image::MockImageBackend;
    use crate::platform::fake::FakeCluster;

    const DEVFILE: &str = "
schemaVersion: 2.2.0
metadata:
  name: api
components:
  - name: runtime
    container:
      image: golang:1.22
      memoryLimit: 1Gi
      env:
        - name: GOFLAGS
          value: -mod=vendor
  - name: db
    container:
      image: postgres:16
  - name: api-image
    image:
      imageName: api:dev
      dockerfile:
        uri: Dockerfile
commands:
  - id: build
    exec:
      component: runtime
      commandLine: go build
      group:
        kind: build
  - id: run
    exec:
      component: runtime
      commandLine: ./api
      group:
        kind: run
";

    fn params() -> PushParameters {
        PushParameters {
            options: StartOptions::default(),
            devfile: Arc::new(testing::devfile(DEVFILE)),
            devfile_path: std::path::PathBuf::from("/src/api/devfile.yaml"),
            context: testing::context(),
        }
    }

    #[test]
    fn test_build_containers() {
        let containers = build_containers(&testing::devfile(DEVFILE));
        assert_eq!(containers.len(), 2);

        let runtime = &containers[0];
        assert_eq!(runtime.command.as_deref(), Some(&[String::from("tail")][..]));
        assert_eq!(
            runtime.args.as_deref(),
            Some(&[String::from("-f"), String::from("/dev/null")][..])
        );
        let env = runtime.env.as_ref().expect("env");
        assert_eq!(env[0].name, "PROJECTS_ROOT");
        assert_eq!(env[1].value.as_deref(), Some("/projects"));
        assert_eq!(env[2].name, "GOFLAGS");
        let limits = runtime.resources.as_ref().and_then(|r| r.limits.as_ref()).expect("limits");
        assert_eq!(limits.get("memory"), Some(&Quantity(String::from("1Gi"))));

        let db = &containers[1];
        assert!(db.command.is_none());
        assert!(db.resources.is_none());
    }

    #[tokio::test]
    async fn test_images_are_built_once_per_definition() {
        let mut backend = MockImageBackend::new();
        backend.expect_build().times(1).returning(|_, _| Ok(()));
        backend.expect_push().times(1).returning(|_| Ok(()));
        let params = params();
        let mut status = ComponentStatus::new();

        apply_auto_images(&backend, &params, &mut status).await.expect("first");
        apply_auto_images(&backend, &params, &mut status).await.expect("second");
    }

    #[tokio::test]
    async fn test_exec_commands_marks_run_executed() {
        let cluster = Arc::new(FakeCluster::new());
        let params = params();
        let options = HandlerOptions {
            pod_name: String::from("api-app-pod"),
            containers_running: vec![String::from("runtime")],
            ..HandlerOptions::default()
        };
        let handler = RunHandler::new(cluster.clone(), params.devfile.clone(), params.context.clone(), options);
        let mut status = ComponentStatus::new();

        let ran = exec_commands(&handler, &params.devfile, &params.options, &mut status)
            .await
            .expect("commands");
        assert!(ran);
        assert!(status.run_executed());
        let calls = cluster.exec_calls();
        assert!(calls[0].command.contains("go build"));
        assert!(calls.last().expect("call").command.contains("./api"));
    }

    #[tokio::test]
    async fn test_missing_debug_command_is_a_warning() {
        let cluster = Arc::new(FakeCluster::new());
        let mut params = params();
        params.options.debug = true;
        let handler = RunHandler::new(cluster.clone(), params.devfile.clone(), params.context.clone(), HandlerOptions::default());
        let mut status = ComponentStatus::new();

        let ran = exec_commands(&handler, &params.devfile, &params.options, &mut status)
            .await
            .expect("commands");
        assert!(!ran);
        assert!(!status.run_executed());
        assert!(status.commands_executed());
    }

    #[tokio::test]
    async fn test_run_requires_dev_pod() {
        let cluster = Arc::new(FakeCluster::new());
        let err = run(cluster.as_ref(), cluster.clone(), None, &params(), "build")
            .await
            .expect_err("no pod");
        assert!(err.to_string().contains("Please check the command 'astra dev' is running"));
    }
}
