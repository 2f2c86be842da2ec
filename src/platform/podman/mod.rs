//! Podman implementation of the platform traits.
//!
//! Every operation shells out to the podman binary. Pods are created from
//! Kubernetes pod definitions with `podman play kube`, so containers are
//! named `<pod>-<container>`.

mod exec;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::EnvConfig;
use crate::error::{AstraError, PlatformError, Result};
use crate::platform::{PodmanClient, PodmanPod};

pub use exec::PodmanPortForwarder;

/// Helper container added to the pod when forwarding to localhost.
pub const PORT_FORWARDING_HELPER_CONTAINER: &str = "astra-helper-port-forwarding";

/// Image of the port forwarding helper; provides `socat`.
pub const PORT_FORWARDING_HELPER_IMAGE: &str = "quay.io/devfile/base-developer-image:ubi8-latest";

/// Podman CLI client.
#[derive(Debug, Clone)]
pub struct PodmanCli {
    /// Podman binary.
    cmd: String,
    /// Arguments passed before every subcommand.
    global_args: Vec<String>,
    /// Timeout of the availability check.
    init_timeout: Duration,
}

/// Row of `podman pod ps --format json`.
#[derive(Debug, Deserialize)]
struct PodPsEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Labels", default)]
    labels: Option<BTreeMap<String, String>>,
}

impl PodmanCli {
    /// Creates a client from the environment configuration.
    #[must_use]
    pub fn new(config: &EnvConfig) -> Self {
        Self {
            cmd: config.podman_cmd.clone(),
            global_args: config.container_backend_global_args.clone(),
            init_timeout: config.podman_cmd_init_timeout,
        }
    }

    /// Checks that podman answers, and returns its version.
    ///
    /// # Errors
    ///
    /// Returns an error if podman is missing or does not answer in time.
    pub async fn version(&self) -> Result<String> {
        let version = tokio::time::timeout(self.init_timeout, self.run(&["version", "--format", "{{.Client.Version}}"], None))
            .await
            .map_err(|_| PlatformError::Timeout {
                operation: format!("{} version", self.cmd),
                seconds: self.init_timeout.as_secs(),
            })??;
        let version = version.trim().to_string();
        debug!("Podman version: {}", version);
        Ok(version)
    }

    /// Runs podman with `args`, returning stdout.
    async fn run(&self, args: &[&str], stdin: Option<Vec<u8>>) -> Result<String> {
        let output = self.output(args, stdin).await?;
        if !output.status.success() {
            return Err(PlatformError::podman(format!(
                "{} {}: {}",
                self.cmd,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Runs podman with `args` and returns the raw output, whatever the exit status.
    async fn output(&self, args: &[&str], stdin: Option<Vec<u8>>) -> Result<std::process::Output> {
        debug!("Running: {} {}", self.cmd, args.join(" "));
        let mut child = self
            .command(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PlatformError::podman(format!("unable to run {}: {e}", self.cmd)))?;

        if let Some(data) = stdin {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| AstraError::internal("podman stdin not available"))?;
            pipe.write_all(&data).await?;
            pipe.shutdown().await?;
        }

        Ok(child.wait_with_output().await?)
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.cmd);
        command.args(&self.global_args).args(args).kill_on_drop(true);
        command
    }

    async fn pod_ps(&self) -> Result<Vec<PodPsEntry>> {
        let out = self.run(&["pod", "ps", "--format", "json"], None).await?;
        if out.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&out)
            .map_err(|e| PlatformError::podman(format!("unable to parse pod list: {e}")).into())
    }

    /// Pods whose labels contain every `key=value` of `selector`.
    async fn pods_matching(&self, selector: &str, running_only: bool) -> Result<Vec<String>> {
        let wanted = parse_selector(selector);
        Ok(self
            .pod_ps()
            .await?
            .into_iter()
            .filter(|p| !running_only || p.status.eq_ignore_ascii_case("running"))
            .filter(|p| {
                let labels = p.labels.clone().unwrap_or_default();
                wanted.iter().all(|(k, v)| labels.get(k) == Some(v))
            })
            .map(|p| p.name)
            .collect())
    }
}

/// Parses `k=v,k=v` into pairs.
fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Splits command output into non-empty lines.
fn lines(out: &str) -> HashSet<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// Claim names of the persistent volumes of `pod`.
pub(crate) fn pod_volume_names(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .map(|volumes| {
            volumes
                .iter()
                .filter_map(|v| v.persistent_volume_claim.as_ref())
                .map(|pvc| pvc.claim_name.clone())
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl PodmanClient for PodmanCli {
    async fn play_kube(&self, pod: &Pod) -> Result<()> {
        let yaml = serde_yaml::to_string(pod)
            .map_err(|e| AstraError::internal(format!("unable to serialize pod: {e}")))?;
        self.run(&["play", "kube", "--start=true", "-"], Some(yaml.into_bytes()))
            .await?;
        info!(
            "Pod {} started",
            pod.metadata.name.as_deref().unwrap_or_default()
        );
        Ok(())
    }

    async fn pod_ls(&self) -> Result<HashSet<String>> {
        let out = self
            .run(&["pod", "list", "--format", "{{.Name}}", "--noheading"], None)
            .await?;
        Ok(lines(&out))
    }

    async fn kube_generate(&self, name: &str) -> Result<Pod> {
        let out = self.run(&["generate", "kube", name], None).await?;
        serde_yaml::from_str(&out)
            .map_err(|e| PlatformError::podman(format!("unable to parse definition of pod {name}: {e}")).into())
    }

    async fn cleanup_pod_resources(&self, pod: &Pod, cleanup_volumes: bool) -> Result<()> {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        self.run(&["pod", "stop", name], None).await?;
        self.pod_rm(name).await?;

        if cleanup_volumes {
            for volume in pod_volume_names(pod) {
                self.volume_rm(&volume).await?;
            }
        }
        Ok(())
    }

    async fn volume_ls(&self) -> Result<HashSet<String>> {
        let out = self
            .run(&["volume", "ls", "--format", "{{.Name}}", "--noheading"], None)
            .await?;
        Ok(lines(&out))
    }

    async fn pod_rm(&self, name: &str) -> Result<()> {
        self.run(&["pod", "rm", "--force", name], None).await?;
        Ok(())
    }

    async fn volume_rm(&self, name: &str) -> Result<()> {
        self.run(&["volume", "rm", name], None).await?;
        Ok(())
    }

    async fn list_all_components(&self) -> Result<Vec<PodmanPod>> {
        Ok(self
            .pod_ps()
            .await?
            .into_iter()
            .map(|p| PodmanPod {
                name: p.name,
                labels: p.labels.unwrap_or_default(),
            })
            .collect())
    }
}
