//! Description of a component: what its devfile offers and where it runs.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::devfile::{CommandGroupKind, CommandKind, ComponentKind, DevfileObj};
use crate::labels;
use crate::platform::{PodmanClient, ResourceClient};
use crate::state::{ForwardedPort, Platform};

/// Modes a component runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunningModes {
    /// Dev mode resources exist.
    pub dev: bool,
    /// Deploy mode resources exist.
    pub deploy: bool,
}

impl RunningModes {
    /// Whether the component runs in any mode.
    #[must_use]
    pub const fn any(&self) -> bool {
        self.dev || self.deploy
    }

    const fn merge(self, other: Self) -> Self {
        Self {
            dev: self.dev || other.dev,
            deploy: self.deploy || other.deploy,
        }
    }

    fn record(&mut self, mode: Option<&String>) {
        match mode.map(String::as_str) {
            Some(labels::COMPONENT_DEV_MODE) => self.dev = true,
            Some(labels::COMPONENT_DEPLOY_MODE) => self.deploy = true,
            _ => {}
        }
    }
}

impl std::fmt::Display for RunningModes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.dev, self.deploy) {
            (true, true) => f.write_str("Dev, Deploy"),
            (true, false) => f.write_str("Dev"),
            (false, true) => f.write_str("Deploy"),
            (false, false) => f.write_str("None"),
        }
    }
}

/// Features the devfile supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SupportedFeatures {
    /// A run command exists.
    pub dev: bool,
    /// A deploy command exists.
    pub deploy: bool,
    /// A debug command exists.
    pub debug: bool,
}

/// One devfile command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSummary {
    /// Command id.
    pub name: String,
    /// `exec`, `composite` or `apply`.
    pub kind: &'static str,
    /// Group kind, when the command belongs to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Whether the command is the default of its group.
    pub is_default: bool,
}

/// One devfile component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentSummary {
    /// Component name.
    pub name: String,
    /// `container`, `volume`, `image`, `kubernetes` or `openshift`.
    pub kind: &'static str,
}

/// Everything `astra describe component` shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDescription {
    /// Devfile the description comes from.
    pub devfile_path: PathBuf,
    /// Component name.
    pub name: String,
    /// Display name of the devfile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Project type of the devfile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_type: Option<String>,
    /// Language of the devfile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Supported features.
    pub supported_features: SupportedFeatures,
    /// Commands.
    pub commands: Vec<CommandSummary>,
    /// Components.
    pub components: Vec<ComponentSummary>,
    /// Ports forwarded by running dev sessions.
    pub dev_forwarded_ports: Vec<ForwardedPort>,
    /// Modes the component runs in, all platforms merged.
    pub running_in: RunningModes,
    /// Modes the component runs in, per platform.
    pub running_on: BTreeMap<String, RunningModes>,
    /// Tool managing the component.
    pub managed_by: &'static str,
}

const fn command_kind(kind: &CommandKind) -> &'static str {
    match kind {
        CommandKind::Exec(_) => "exec",
        CommandKind::Composite(_) => "composite",
        CommandKind::Apply(_) => "apply",
    }
}

const fn component_kind(kind: &ComponentKind) -> &'static str {
    match kind {
        ComponentKind::Container(_) => "container",
        ComponentKind::Volume(_) => "volume",
        ComponentKind::Image(_) => "image",
        ComponentKind::Kubernetes(_) => "kubernetes",
        ComponentKind::Openshift(_) => "openshift",
    }
}

fn supported_features(devfile: &DevfileObj) -> SupportedFeatures {
    let has = |kind: CommandGroupKind| devfile.commands.iter().any(|c| c.group().is_some_and(|g| g.kind == kind));
    SupportedFeatures {
        dev: has(CommandGroupKind::Run),
        deploy: has(CommandGroupKind::Deploy),
        debug: has(CommandGroupKind::Debug),
    }
}

/// Where `component` runs, per platform.
///
/// A platform that cannot be queried is skipped with a warning.
pub async fn running_on(
    component: &str,
    cluster: Option<&dyn ResourceClient>,
    podman: Option<&dyn PodmanClient>,
) -> BTreeMap<String, RunningModes> {
    let mut result = BTreeMap::new();

    if let Some(cluster) = cluster {
        let selector = labels::selector_from(&BTreeMap::from([
            (labels::INSTANCE_LABEL.to_string(), component.to_string()),
            (labels::MANAGED_BY_LABEL.to_string(), labels::MANAGER.to_string()),
        ]));
        match cluster
            .get_all_resources_from_selector(&selector, cluster.current_namespace())
            .await
        {
            Ok(resources) => {
                let mut modes = RunningModes::default();
                for resource in &resources {
                    modes.record(resource.object.metadata.labels.as_ref().and_then(|l| l.get(labels::MODE_LABEL)));
                }
                if modes.any() {
                    result.insert(Platform::Cluster.to_string(), modes);
                }
            }
            Err(e) => warn!("Unable to get the resources of {} on the cluster: {}", component, e),
        }
    }

    if let Some(podman) = podman {
        match podman.list_all_components().await {
            Ok(pods) => {
                let mut modes = RunningModes::default();
                for pod in pods
                    .iter()
                    .filter(|p| p.labels.get(labels::INSTANCE_LABEL).is_some_and(|i| i == component))
                {
                    modes.record(pod.labels.get(labels::MODE_LABEL));
                }
                if modes.any() {
                    result.insert(Platform::Podman.to_string(), modes);
                }
            }
            Err(e) => warn!("Unable to get the pods of {} on Podman: {}", component, e),
        }
    }
    result
}

/// Describes the component defined by `devfile`.
///
/// `forwarded_ports` are the ports of the dev sessions to show, already
/// filtered by platform.
pub async fn describe_devfile_component(
    devfile: &DevfileObj,
    devfile_path: &Path,
    component_name: &str,
    forwarded_ports: Vec<ForwardedPort>,
    cluster: Option<&dyn ResourceClient>,
    podman: Option<&dyn PodmanClient>,
) -> ComponentDescription {
    let running_on = running_on(component_name, cluster, podman).await;
    let running_in = running_on
        .values()
        .fold(RunningModes::default(), |acc, m| acc.merge(*m));

    ComponentDescription {
        devfile_path: devfile_path.to_path_buf(),
        name: component_name.to_string(),
        display_name: devfile.metadata.display_name.clone(),
        project_type: devfile.metadata.project_type.clone(),
        language: devfile.metadata.language.clone(),
        supported_features: supported_features(devfile),
        commands: devfile
            .commands
            .iter()
            .map(|c| CommandSummary {
                name: c.id.clone(),
                kind: command_kind(&c.kind),
                group: c.group().map(|g| format!("{:?}", g.kind).to_lowercase()),
                is_default: c.group().is_some_and(|g| g.is_default.unwrap_or(false)),
            })
            .collect(),
        components: devfile
            .components
            .iter()
            .map(|c| ComponentSummary {
                name: c.name.clone(),
                kind: component_kind(&c.kind),
            })
            .collect(),
        dev_forwarded_ports: forwarded_ports,
        running_in,
        running_on,
        managed_by: labels::MANAGER,
    }
}

/// Keeps the ports forwarded on `platform`, or all of them when `None`.
#[must_use]
pub fn filter_by_platform(ports: Vec<ForwardedPort>, platform: Option<Platform>) -> Vec<ForwardedPort> {
    match platform {
        None => ports,
        Some(p) => ports
            .into_iter()
            .filter(|port| port.platform.unwrap_or_default() == p)
            .collect(),
    }
}
