//! Pod lookups, logs, exec and localhost forwarding on Podman.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{AstraError, ExecError, PlatformError, Result};
use crate::platform::{ExecClient, ExecOutput, PodClient, PodmanClient, PortForwarder};
use crate::state::ForwardedPort;

use super::{PodmanCli, PORT_FORWARDING_HELPER_CONTAINER};

/// Output lines kept for error reports.
const OUTPUT_TAIL_LINES: usize = 100;

fn container_name(pod: &str, container: &str) -> String {
    format!("{pod}-{container}")
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes).lines().map(String::from).collect()
}

#[async_trait]
impl PodClient for PodmanCli {
    async fn get_pod_using_component_name(&self, component: &str, app: &str) -> Result<Pod> {
        let name = format!("{component}-{app}");
        if !self.pod_ls().await?.contains(&name) {
            return Err(PlatformError::PodNotFound { selector: name }.into());
        }
        self.kube_generate(&name).await
    }

    async fn get_running_pod_from_selector(&self, selector: &str) -> Result<Pod> {
        let Some(name) = self.pods_matching(selector, true).await?.into_iter().next() else {
            return Err(PlatformError::PodNotFound {
                selector: selector.to_string(),
            }
            .into());
        };
        self.kube_generate(&name).await
    }

    async fn get_all_pods_from_selector(&self, selector: &str) -> Result<Vec<Pod>> {
        let mut pods = Vec::new();
        for name in self.pods_matching(selector, false).await? {
            pods.push(self.kube_generate(&name).await?);
        }
        Ok(pods)
    }

    async fn pod_logs(
        &self,
        pod: &str,
        container: &str,
        follow: bool,
        tail: Option<i64>,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<()> {
        let mut args = vec![String::from("logs")];
        if follow {
            args.push(String::from("--follow"));
        }
        if let Some(tail) = tail {
            args.push(format!("--tail={tail}"));
        }
        args.push(container_name(pod, container));

        let mut child = {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            self.command(&args)
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| PlatformError::podman(format!("unable to run podman logs: {e}")))?
        };
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AstraError::internal("podman logs stdout not available"))?;

        let mut lines = BufReader::new(stdout).lines();
        loop {
            let next: std::io::Result<Option<String>> = lines.next_line().await;
            let Some(line) = next? else {
                break;
            };
            on_line(line.as_str());
        }
        child.wait().await?;
        Ok(())
    }
}

#[async_trait]
impl ExecClient for PodmanCli {
    #[allow(clippy::print_stdout)]
    async fn execute_command(
        &self,
        command: &[String],
        pod: &str,
        container: &str,
        show_output: bool,
    ) -> Result<ExecOutput> {
        let target = container_name(pod, container);
        let mut args = vec!["exec", target.as_str()];
        args.extend(command.iter().map(String::as_str));

        let output = self.output(&args, None).await?;
        let stdout = split_lines(&output.stdout);
        let stderr = split_lines(&output.stderr);
        // Output of the user's command, not a log event.
        if show_output {
            for line in stdout.iter().chain(stderr.iter()) {
                println!("{line}");
            }
        }

        if !output.status.success() {
            let mut logs: Vec<String> = stdout.iter().chain(stderr.iter()).cloned().collect();
            let skip = logs.len().saturating_sub(OUTPUT_TAIL_LINES);
            logs.drain(..skip);
            return Err(ExecError::CommandFailed {
                command: command.join(" "),
                container: container.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                logs,
            }
            .into());
        }
        Ok((stdout, stderr))
    }

    async fn execute_command_with_stdin(
        &self,
        command: &[String],
        pod: &str,
        container: &str,
        stdin: Vec<u8>,
    ) -> Result<()> {
        let target = container_name(pod, container);
        let mut args = vec!["exec", "-i", target.as_str()];
        args.extend(command.iter().map(String::as_str));

        let output = self.output(&args, Some(stdin)).await?;
        if !output.status.success() {
            return Err(ExecError::CommandFailed {
                command: command.join(" "),
                container: container.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                logs: split_lines(&output.stderr),
            }
            .into());
        }
        Ok(())
    }
}

/// Forwards pod ports bound on localhost through the helper container.
///
/// Each forwarded port gets a `socat` relay in the helper container,
/// listening on the local port published by the pod.
#[derive(Debug)]
pub struct PodmanPortForwarder {
    podman: PodmanCli,
    /// Pod currently forwarded.
    current: Mutex<Option<String>>,
}

impl PodmanPortForwarder {
    /// Creates a forwarder.
    #[must_use]
    pub fn new(podman: PodmanCli) -> Self {
        Self {
            podman,
            current: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PortForwarder for PodmanPortForwarder {
    async fn start_port_forwarding(&self, pod: &str, ports: &[ForwardedPort]) -> Result<()> {
        self.stop_port_forwarding().await;

        let helper = container_name(pod, PORT_FORWARDING_HELPER_CONTAINER);
        for port in ports {
            let listen = format!("TCP-LISTEN:{},fork,reuseaddr", port.local_port);
            let target = format!("TCP:127.0.0.1:{}", port.container_port);
            self.podman
                .run(&["exec", "-d", helper.as_str(), "socat", listen.as_str(), target.as_str()], None)
                .await?;
            debug!("Relaying {} to 127.0.0.1:{}", port.local_port, port.container_port);
        }

        *self.current.lock().await = Some(pod.to_string());
        Ok(())
    }

    async fn stop_port_forwarding(&self) {
        let Some(pod) = self.current.lock().await.take() else {
            return;
        };
        let helper = container_name(&pod, PORT_FORWARDING_HELPER_CONTAINER);
        if let Err(e) = self.podman.run(&["exec", helper.as_str(), "pkill", "socat"], None).await {
            warn!("Unable to stop port forwarding in {}: {}", helper, e);
        }
    }
}
