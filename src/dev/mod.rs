//! Dev mode: keeping a running component in sync with the local sources.
//!
//! A [`DevClient`] reconciles the component on one platform. The
//! platform-agnostic parts (port assignment, command sequencing, container
//! construction) live in [`ports`] and [`common`], so the Kubernetes and
//! Podman reconcilers behave the same from the outside.

pub mod common;
pub mod kube;
pub mod podman;
pub mod ports;
mod session;

pub use session::DevSession;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::component::ComponentContext;
use crate::devfile::DevfileObj;
use crate::error::Result;
use crate::state::ForwardedPort;
use crate::watch::{ComponentStatus, WatchClient};

/// Default delay between a file change and the reconcile it triggers.
pub const DEFAULT_WATCH_DELAY: Duration = Duration::from_millis(100);

/// Options of `astra dev`.
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Extra paths excluded from sync and watch.
    pub ignore_paths: Vec<String>,
    /// Run the debug command instead of the run command.
    pub debug: bool,
    /// Build command to run instead of the default one.
    pub build_command: Option<String>,
    /// Run command to run instead of the default one.
    pub run_command: Option<String>,
    /// Debug command to run instead of the default one.
    pub debug_command: Option<String>,
    /// Only sync files, never run commands.
    pub skip_commands: bool,
    /// Pick local ports at random.
    pub random_ports: bool,
    /// Reconcile again when files change.
    pub watch_files: bool,
    /// Devfile variable overrides.
    pub variables: BTreeMap<String, String>,
    /// Explicit local port mapping.
    pub custom_forwarded_ports: Vec<ForwardedPort>,
    /// Local address to forward on.
    pub custom_address: Option<String>,
    /// Podman: redirect traffic to ports bound on the container loopback.
    pub forward_localhost: bool,
    /// Podman: only warn about ports bound on the container loopback.
    pub ignore_localhost: bool,
    /// Debounce delay of file events.
    pub watch_delay: Duration,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            ignore_paths: Vec::new(),
            debug: false,
            build_command: None,
            run_command: None,
            debug_command: None,
            skip_commands: false,
            random_ports: false,
            watch_files: true,
            variables: BTreeMap::new(),
            custom_forwarded_ports: Vec::new(),
            custom_address: None,
            forward_localhost: false,
            ignore_localhost: false,
            watch_delay: DEFAULT_WATCH_DELAY,
        }
    }
}

impl StartOptions {
    /// Address local ports are bound on.
    #[must_use]
    pub fn address(&self) -> &str {
        self.custom_address
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or(ports::DEFAULT_ADDRESS)
    }
}

/// Everything a reconcile pass works from.
#[derive(Debug, Clone)]
pub struct PushParameters {
    /// Options of the session.
    pub options: StartOptions,
    /// Parsed devfile.
    pub devfile: Arc<DevfileObj>,
    /// Path of the devfile.
    pub devfile_path: PathBuf,
    /// Component identity.
    pub context: ComponentContext,
}

/// Dev mode on one platform.
#[async_trait]
pub trait DevClient: Send + Sync {
    /// Brings the component in line with the devfile and the local files.
    async fn reconcile(&self, params: &PushParameters, status: &mut ComponentStatus) -> Result<()>;

    /// Runs a devfile command in the running component (`astra run`).
    async fn run(&self, params: &PushParameters, command_name: &str) -> Result<()>;

    /// Runs the pre-stop events and deletes the dev resources.
    async fn clean_up(&self, params: &PushParameters) -> Result<()>;

    /// Reconciles, then keeps reconciling on file changes and push requests
    /// until the session is cancelled.
    async fn start(&self, session: &DevSession, params: PushParameters) -> Result<()> {
        WatchClient::new().watch_and_push(self, session, params).await
    }
}
