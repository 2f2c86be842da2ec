//! Devfile model.
//!
//! Serde types for the subset of the devfile 2.x schema astra acts on.
//! A parsed [`DevfileObj`] is immutable for the duration of one reconcile
//! pass; the watch loop re-parses it from disk on every trigger.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default mount path of the project sources in a container.
pub const DEFAULT_SOURCE_MAPPING: &str = "/projects";

/// The root structure of a devfile.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DevfileObj {
    /// Devfile schema version, e.g. "2.2.0".
    pub schema_version: String,
    /// Component metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Default values for `{{VAR}}` substitution.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    /// Components: containers, volumes, images, Kubernetes manifests.
    #[serde(default)]
    pub components: Vec<Component>,
    /// Commands.
    #[serde(default)]
    pub commands: Vec<Command>,
    /// Lifecycle events.
    #[serde(default, skip_serializing_if = "Events::is_empty")]
    pub events: Events,
}

/// Devfile metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Component name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Version of the devfile itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Project type, e.g. "Node.js".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_type: Option<String>,
    /// Language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// A named devfile component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Component {
    /// Component name.
    pub name: String,
    /// Free-form attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_yaml::Value>,
    /// Component body.
    #[serde(flatten)]
    pub kind: ComponentKind,
}

/// The component union.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ComponentKind {
    /// A container the inner loop runs in.
    Container(ContainerComponent),
    /// A volume shared between containers.
    Volume(VolumeComponent),
    /// An image to build.
    Image(ImageComponent),
    /// A Kubernetes manifest.
    Kubernetes(KubernetesComponent),
    /// An OpenShift manifest.
    Openshift(KubernetesComponent),
}

/// A container component.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerComponent {
    /// Container image.
    pub image: String,
    /// Entrypoint override.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Endpoints exposed by the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<Endpoint>,
    /// Volume mounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    /// Whether project sources are mounted. Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_sources: Option<bool>,
    /// Where project sources are mounted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_mapping: Option<String>,
    /// Memory limit, e.g. "512Mi".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
    /// Memory request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<String>,
    /// CPU limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    /// CPU request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,
}

impl ContainerComponent {
    /// Whether sources are mounted in this container.
    #[must_use]
    pub fn mounts_sources(&self) -> bool {
        self.mount_sources.unwrap_or(true)
    }

    /// Mount path of the project sources.
    #[must_use]
    pub fn source_mapping(&self) -> &str {
        self.source_mapping
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SOURCE_MAPPING)
    }
}

/// An environment variable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVar {
    /// Name.
    pub name: String,
    /// Value.
    #[serde(default)]
    pub value: String,
}

/// A container endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Endpoint name, unique within the devfile.
    pub name: String,
    /// Port the application listens on in the container.
    pub target_port: u16,
    /// Exposure level.
    #[serde(default)]
    pub exposure: Exposure,
    /// Protocol, e.g. "http".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// URL path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Endpoint exposure level.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Exposure {
    /// Reachable from outside the cluster.
    #[default]
    Public,
    /// Reachable inside the cluster.
    Internal,
    /// Not exposed, not forwarded.
    None,
}

/// A container volume mount.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeMount {
    /// Name of the volume component.
    pub name: String,
    /// Mount path; defaults to `/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl VolumeMount {
    /// Resolved mount path.
    #[must_use]
    pub fn mount_path(&self) -> String {
        self.path
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| format!("/{}", self.name))
    }
}

/// A volume component.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeComponent {
    /// Requested size, e.g. "1Gi".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// Whether the volume lives only as long as the pod.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral: Option<bool>,
}

/// An image component.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageComponent {
    /// Image name, including registry and tag.
    pub image_name: String,
    /// Whether the image is built automatically by `astra dev`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_build: Option<bool>,
    /// Dockerfile build parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<Dockerfile>,
}

/// Dockerfile build parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Dockerfile {
    /// Path of the Dockerfile, relative to the devfile.
    pub uri: String,
    /// Build context directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_context: Option<String>,
    /// Extra build arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Whether the build requires root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_required: Option<bool>,
}

/// A Kubernetes or OpenShift manifest component.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesComponent {
    /// Path or URL of the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Inlined manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inlined: Option<String>,
    /// Whether `astra deploy` applies it without an apply command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_by_default: Option<bool>,
}

/// A named devfile command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Command {
    /// Command id.
    pub id: String,
    /// Command body.
    #[serde(flatten)]
    pub kind: CommandKind,
}

/// The command union.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CommandKind {
    /// Runs a command line in a container component.
    Exec(ExecCommand),
    /// Runs other commands.
    Composite(CompositeCommand),
    /// Applies an image or Kubernetes component.
    Apply(ApplyCommand),
}

/// An exec command.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecCommand {
    /// Shell command line.
    pub command_line: String,
    /// Container component the command runs in.
    pub component: String,
    /// Working directory, may reference `${PROJECT_SOURCE}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Extra environment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Whether the running process reloads changed sources by itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hot_reload_capable: Option<bool>,
    /// Command group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<CommandGroup>,
}

/// A composite command.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompositeCommand {
    /// Child command ids, in order.
    #[serde(default)]
    pub commands: Vec<String>,
    /// Run children concurrently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
    /// Command group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<CommandGroup>,
}

/// An apply command.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCommand {
    /// Component to apply.
    pub component: String,
    /// Command group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<CommandGroup>,
}

/// Command group membership.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandGroup {
    /// Group kind.
    pub kind: CommandGroupKind,
    /// Whether this is the default command of its kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
}

/// Command group kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CommandGroupKind {
    /// Build.
    Build,
    /// Run.
    Run,
    /// Test.
    Test,
    /// Debug.
    Debug,
    /// Deploy.
    Deploy,
}

impl std::fmt::Display for CommandGroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Build => "build",
            Self::Run => "run",
            Self::Test => "test",
            Self::Debug => "debug",
            Self::Deploy => "deploy",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Events {
    /// Commands run before the containers start.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_start: Vec<String>,
    /// Commands run once the containers are up.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_start: Vec<String>,
    /// Commands run before the component is deleted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_stop: Vec<String>,
    /// Commands run after the component is deleted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_stop: Vec<String>,
}

impl Events {
    /// Returns true when no event is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pre_start.is_empty()
            && self.post_start.is_empty()
            && self.pre_stop.is_empty()
            && self.post_stop.is_empty()
    }
}

impl Command {
    /// Group of the command, whatever its type.
    #[must_use]
    pub const fn group(&self) -> Option<&CommandGroup> {
        match &self.kind {
            CommandKind::Exec(c) => c.group.as_ref(),
            CommandKind::Composite(c) => c.group.as_ref(),
            CommandKind::Apply(c) => c.group.as_ref(),
        }
    }

    /// Whether the command belongs to `kind`.
    #[must_use]
    pub fn is_kind(&self, kind: CommandGroupKind) -> bool {
        self.group().is_some_and(|g| g.kind == kind)
    }

    /// Whether the command is the default of its group.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.group().and_then(|g| g.is_default).unwrap_or(false)
    }
}
