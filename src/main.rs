//! astra CLI entrypoint.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use astra::apiserver::{self, ApiState};
use astra::cli::{Cli, Commands, DeleteCommands, DescribeCommands, DevArgs, LogFormat, OutputFormatter, RunningIn};
use astra::component::delete::{
    delete_resources, execute_pre_stop_events, list_cluster_resources_to_delete,
    list_cluster_resources_to_delete_from_devfile, list_podman_resources_to_delete,
};
use astra::component::describe::{describe_devfile_component, filter_by_platform};
use astra::component::{container_names, ComponentContext};
use astra::config::{load_dotenv, parse_duration, EnvConfig, Preferences};
use astra::dev::kube::KubeDevClient;
use astra::dev::podman::PodmanDevClient;
use astra::dev::{ports, DevClient, DevSession, PushParameters, StartOptions};
use astra::devfile::{find_devfile, parse_and_validate, parse_var_flags, DevfileObj};
use astra::error::{AstraError, ConfigError, PlatformError, Result};
use astra::image::{CliImageBackend, ImageBackend};
use astra::labels;
use astra::platform::kube::{KubeClient, KubePortForwarder};
use astra::platform::podman::{PodmanCli, PodmanPortForwarder, PORT_FORWARDING_HELPER_CONTAINER};
use astra::platform::{ClusterResource, PodClient, PodmanClient, ResourceClient};
use astra::state::{DevstateStore, Platform, StateStore};
use astra::sync::TarSync;

use clap::Parser;
use colored::Colorize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "Error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("warn,astra=debug")
        } else {
            EnvFilter::new("warn,astra=info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let devfile = cli.devfile.as_deref();

    match cli.command {
        Commands::Dev(args) => cmd_dev(devfile, &cli.app, args).await,
        Commands::Run { command, platform } => cmd_run(devfile, &cli.app, &command, platform).await,
        Commands::Delete { command } => cmd_delete(devfile, &cli.app, command, &formatter).await,
        Commands::Describe {
            command: DescribeCommands::Component { platform },
        } => cmd_describe(devfile, &cli.app, platform, &formatter).await,
        Commands::Logs { follow, tail, platform } => cmd_logs(devfile, &cli.app, follow, tail, platform).await,
    }
}

/// Settings and devfile of the component in the working directory.
struct Workspace {
    devfile_path: PathBuf,
    env: EnvConfig,
    prefs: Preferences,
    variables: BTreeMap<String, String>,
    devfile: Arc<DevfileObj>,
    context: ComponentContext,
}

impl Workspace {
    fn devstate(&self) -> DevstateStore {
        DevstateStore::new(self.context.devfile_dir.join(&self.env.devstate_dir))
    }
}

/// Loads `.env`, the environment and the preferences for `dir`.
fn load_settings(dir: &Path) -> Result<(EnvConfig, Preferences)> {
    load_dotenv(dir)?;
    let env = EnvConfig::from_env()?;
    let prefs = Preferences::load(env.global_config.as_deref().map(Path::new))?;
    Ok((env, prefs))
}

fn load_workspace(devfile: Option<&Path>, app: &str, vars: &[String]) -> Result<Workspace> {
    let devfile_path = match devfile {
        Some(path) => path.to_path_buf(),
        None => find_devfile(std::env::current_dir()?)?,
    };
    let devfile_path = std::path::absolute(&devfile_path)?;
    let dir = devfile_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let (env, prefs) = load_settings(&dir)?;
    let variables = parse_var_flags(vars)?;
    let devfile = Arc::new(parse_and_validate(&devfile_path, variables.clone())?);
    let context = ComponentContext {
        component_name: devfile.component_name(&dir),
        app_name: app.to_string(),
        devfile_dir: dir,
        push_images: env.push_images,
    };
    debug!("Component {} from {}", context.component_name, devfile_path.display());

    Ok(Workspace {
        devfile_path,
        env,
        prefs,
        variables,
        devfile,
        context,
    })
}

async fn connect_cluster(prefs: &Preferences) -> Result<Arc<KubeClient>> {
    let client = tokio::time::timeout(prefs.timeout, KubeClient::try_default(None))
        .await
        .map_err(|_| PlatformError::Timeout {
            operation: String::from("connecting to the cluster"),
            seconds: prefs.timeout.as_secs(),
        })??;
    Ok(Arc::new(client))
}

async fn connect_podman(env: &EnvConfig) -> Result<Arc<PodmanCli>> {
    let podman = PodmanCli::new(env);
    podman.version().await?;
    Ok(Arc::new(podman))
}

/// Keeps a platform connection, or logs why it is not available.
fn available<T>(result: Result<T>, platform: Platform) -> Option<T> {
    match result {
        Ok(client) => Some(client),
        Err(e) => {
            debug!("Platform {} not available: {}", platform, e);
            None
        }
    }
}

/// Dev client of a platform, with the clients the API server describes
/// the component with.
struct PlatformClients {
    dev: Box<dyn DevClient>,
    cluster: Option<Arc<dyn ResourceClient>>,
    podman: Option<Arc<dyn PodmanClient>>,
}

async fn platform_clients(platform: Platform, ws: &Workspace, state: Arc<dyn StateStore>) -> Result<PlatformClients> {
    let images: Arc<dyn ImageBackend> =
        Arc::new(CliImageBackend::select(&ws.env).with_push_timeout(ws.prefs.push_timeout));

    match platform {
        Platform::Cluster => {
            let kube = connect_cluster(&ws.prefs).await?;
            let forwarder = Arc::new(KubePortForwarder::new(&kube));
            let sync = Arc::new(TarSync::new(kube.clone(), ws.env.devstate_dir.clone()));
            let dev = KubeDevClient::new(kube.clone(), forwarder, sync, images, state)
                .with_ephemeral_source(ws.prefs.ephemeral);
            let cluster: Arc<dyn ResourceClient> = kube;
            Ok(PlatformClients {
                dev: Box::new(dev),
                cluster: Some(cluster),
                podman: None,
            })
        }
        Platform::Podman => {
            let podman = connect_podman(&ws.env).await?;
            let forwarder = Arc::new(PodmanPortForwarder::new(PodmanCli::clone(&podman)));
            let sync = Arc::new(TarSync::new(podman.clone(), ws.env.devstate_dir.clone()));
            let dev = PodmanDevClient::new(podman.clone(), forwarder, sync, images, state);
            let listed: Arc<dyn PodmanClient> = podman;
            Ok(PlatformClients {
                dev: Box::new(dev),
                cluster: None,
                podman: Some(listed),
            })
        }
    }
}

fn start_options(args: &DevArgs, variables: BTreeMap<String, String>) -> Result<StartOptions> {
    let watch_delay = parse_duration(&args.watch_delay).ok_or_else(|| ConfigError::InvalidValue {
        name: String::from("--watch-delay"),
        value: args.watch_delay.clone(),
    })?;
    let custom_forwarded_ports = args
        .port_forward
        .iter()
        .map(|p| ports::parse_port_forward(p))
        .collect::<Result<Vec<_>>>()?;

    Ok(StartOptions {
        ignore_paths: Vec::new(),
        debug: args.debug,
        build_command: args.build_command.clone(),
        run_command: args.run_command.clone(),
        debug_command: args.debug_command.clone(),
        skip_commands: args.no_commands,
        random_ports: args.random_ports,
        watch_files: !args.no_watch,
        variables,
        custom_forwarded_ports,
        custom_address: args.address.clone(),
        forward_localhost: args.forward_localhost,
        ignore_localhost: args.ignore_localhost,
        watch_delay,
    })
}

/// Deploy the component in dev mode until Ctrl+c.
async fn cmd_dev(devfile: Option<&Path>, app: &str, args: DevArgs) -> Result<()> {
    let ws = load_workspace(devfile, app, &args.vars)?;
    let options = start_options(&args, ws.variables.clone())?;

    let store = Arc::new(ws.devstate());
    store.init(args.platform).await?;
    let session = Arc::new(DevSession::new(store.clone()));
    let clients = platform_clients(args.platform, &ws, store.clone()).await?;

    let server = if args.api_server_enabled() {
        let state = ApiState::new(session.clone(), ws.devfile_path.clone(), ws.context.component_name.clone())
            .with_variables(ws.variables.clone())
            .with_platform(args.platform, clients.cluster.clone(), clients.podman.clone());
        Some(apiserver::start(state, args.api_server_port).await?)
    } else {
        None
    };

    let interrupt = {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Cleaning resources, please wait");
                session.cancel();
            }
        })
    };

    let params = PushParameters {
        options,
        devfile: ws.devfile.clone(),
        devfile_path: ws.devfile_path.clone(),
        context: ws.context.clone(),
    };
    let result = clients.dev.start(&session, params.clone()).await;

    session.cancel();
    interrupt.abort();
    if let Err(e) = clients.dev.clean_up(&params).await {
        warn!("Failed to delete the dev resources: {}", e);
    }
    if let Some((_, handle)) = server {
        if let Err(e) = handle.await {
            debug!("API server task ended abnormally: {}", e);
        }
    }
    store.save_exit().await?;
    result
}

/// Run a devfile command in the running dev component.
async fn cmd_run(devfile: Option<&Path>, app: &str, command: &str, platform: Platform) -> Result<()> {
    let ws = load_workspace(devfile, app, &[])?;
    let state: Arc<dyn StateStore> = Arc::new(ws.devstate());
    let clients = platform_clients(platform, &ws, state).await?;
    let params = PushParameters {
        options: StartOptions::default(),
        devfile: ws.devfile.clone(),
        devfile_path: ws.devfile_path.clone(),
        context: ws.context.clone(),
    };
    clients.dev.run(&params, command).await
}

/// Platforms `platform` selects: both when unset.
fn wants(platform: Option<Platform>, candidate: Platform) -> bool {
    platform.is_none_or(|p| p == candidate)
}

/// Delete the resources of a component.
async fn cmd_delete(devfile: Option<&Path>, app: &str, command: DeleteCommands, formatter: &OutputFormatter) -> Result<()> {
    let DeleteCommands::Component {
        name,
        running_in,
        wait,
        force,
        platform,
    } = command;
    let mode = match running_in {
        None => labels::COMPONENT_ANY_MODE,
        Some(RunningIn::Dev) => labels::COMPONENT_DEV_MODE,
        Some(RunningIn::Deploy) => labels::COMPONENT_DEPLOY_MODE,
    };
    if formatter.is_json() && !force {
        return Err(AstraError::internal("--force is required with --output json"));
    }

    // Without --name the devfile tells which component, and what it deploys.
    let (env, prefs, devfile, context) = match name {
        Some(name) => {
            let dir = std::env::current_dir()?;
            let (env, prefs) = load_settings(&dir)?;
            let context = ComponentContext {
                component_name: name,
                app_name: app.to_string(),
                devfile_dir: dir,
                push_images: env.push_images,
            };
            (env, prefs, None, context)
        }
        None => {
            let ws = load_workspace(devfile, app, &[])?;
            (ws.env, ws.prefs, Some(ws.devfile), ws.context)
        }
    };

    let cluster = if wants(platform, Platform::Cluster) {
        let connected = connect_cluster(&prefs).await;
        if platform.is_some() {
            Some(connected?)
        } else {
            available(connected, Platform::Cluster)
        }
    } else {
        None
    };
    let podman = if wants(platform, Platform::Podman) {
        let connected = connect_podman(&env).await;
        if platform.is_some() {
            Some(connected?)
        } else {
            available(connected, Platform::Podman)
        }
    } else {
        None
    };

    let mut inner_loop_deployed = false;
    let mut resources: Vec<ClusterResource> = Vec::new();
    if let Some(kube) = &cluster {
        if let Some(devfile) = &devfile {
            match list_cluster_resources_to_delete_from_devfile(kube.as_ref(), devfile, &context, mode).await {
                Ok((deployed, found)) => {
                    inner_loop_deployed = deployed;
                    resources = found;
                }
                Err(e) if e.is_warning() => warn!("{}", e),
                Err(e) => return Err(e),
            }
        }
        let labelled = list_cluster_resources_to_delete(
            kube.as_ref(),
            &context.component_name,
            &context.app_name,
            kube.current_namespace(),
            mode,
        )
        .await?;
        for resource in labelled {
            if !resources
                .iter()
                .any(|r| r.kind() == resource.kind() && r.name() == resource.name())
            {
                resources.push(resource);
            }
        }
    }

    let podman_pod = match &podman {
        Some(client) => match list_podman_resources_to_delete(client.as_ref(), &context, mode).await {
            Ok(pod) => pod,
            Err(e) if e.is_warning() => {
                warn!("{}", e);
                None
            }
            Err(e) => return Err(e),
        },
        None => None,
    };

    if resources.is_empty() && podman_pod.is_none() {
        println!(
            "{}",
            formatter.format_resources_to_delete(&context.component_name, &[], None)
        );
        return Ok(());
    }

    if !force {
        eprintln!(
            "{}",
            formatter.format_resources_to_delete(&context.component_name, &resources, podman_pod.as_ref())
        );
        eprint!("Are you sure you want to delete these resources? [y/N]: ");
        std::io::stderr().flush()?;
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !matches!(input.trim(), "y" | "Y" | "yes") {
            eprintln!("Aborted by the user.");
            return Ok(());
        }
    } else if formatter.is_json() {
        println!(
            "{}",
            formatter.format_resources_to_delete(&context.component_name, &resources, podman_pod.as_ref())
        );
    }

    let mut failed = Vec::new();
    if let Some(kube) = &cluster {
        if let (true, Some(devfile)) = (inner_loop_deployed, &devfile) {
            execute_pre_stop_events(kube.as_ref(), kube.clone(), devfile.clone(), &context).await?;
        }
        failed = delete_resources(kube.as_ref(), &resources, wait).await;
    }
    if let (Some(client), Some(pod)) = (&podman, &podman_pod) {
        if let Some(devfile) = &devfile {
            execute_pre_stop_events(client.as_ref(), client.clone(), devfile.clone(), &context).await?;
        }
        client.cleanup_pod_resources(pod, true).await?;
    }

    if failed.is_empty() {
        println!(
            "{}",
            formatter.format_success(&format!(
                "The component {:?} is successfully deleted",
                context.component_name
            ))
        );
        return Ok(());
    }
    let names: Vec<String> = failed.iter().map(|r| format!("{}/{}", r.kind(), r.name())).collect();
    println!(
        "{}",
        formatter.format_warning(&format!("Failed to delete: {}", names.join(", ")))
    );
    Err(AstraError::internal(format!(
        "failed to delete {} resources of component {}",
        failed.len(),
        context.component_name
    )))
}

/// Describe the component of the devfile.
async fn cmd_describe(
    devfile: Option<&Path>,
    app: &str,
    platform: Option<Platform>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let ws = load_workspace(devfile, app, &[])?;

    let cluster = if wants(platform, Platform::Cluster) {
        available(connect_cluster(&ws.prefs).await, Platform::Cluster)
    } else {
        None
    };
    let podman = if wants(platform, Platform::Podman) {
        available(connect_podman(&ws.env).await, Platform::Podman)
    } else {
        None
    };

    let forwarded = match ws.devstate().get_other_forwarded_ports().await {
        Ok(ports) => filter_by_platform(ports, platform),
        Err(e) => {
            warn!("Unable to read the forwarded ports of running sessions: {}", e);
            Vec::new()
        }
    };

    let description = describe_devfile_component(
        &ws.devfile,
        &ws.devfile_path,
        &ws.context.component_name,
        forwarded,
        cluster.as_deref().map(|c| c as &dyn ResourceClient),
        podman.as_deref().map(|p| p as &dyn PodmanClient),
    )
    .await;
    println!("{}", formatter.format_description(&description));
    Ok(())
}

/// Print the logs of the dev containers.
async fn cmd_logs(
    devfile: Option<&Path>,
    app: &str,
    follow: bool,
    tail: Option<i64>,
    platform: Platform,
) -> Result<()> {
    let ws = load_workspace(devfile, app, &[])?;
    let pods: Arc<dyn PodClient> = match platform {
        Platform::Cluster => connect_cluster(&ws.prefs).await?,
        Platform::Podman => connect_podman(&ws.env).await?,
    };

    let component = &ws.context.component_name;
    let pod = pods
        .get_pod_using_component_name(component, &ws.context.app_name)
        .await
        .map_err(|e| AstraError::internal(format!("no dev pod found for component {component}: {e}")))?;
    let pod_name = pod.metadata.name.clone().unwrap_or_default();

    let streams = container_names(&pod)
        .into_iter()
        .filter(|c| c != PORT_FORWARDING_HELPER_CONTAINER)
        .map(|container| {
            let pods = pods.clone();
            let pod_name = pod_name.clone();
            async move {
                let prefix = format!("{container}:").cyan();
                let mut on_line = |line: &str| println!("{prefix} {line}");
                pods.pod_logs(&pod_name, &container, follow, tail, &mut on_line).await
            }
        });
    for result in futures::future::join_all(streams).await {
        result?;
    }
    Ok(())
}
