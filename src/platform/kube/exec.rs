//! Pod lookups, logs and exec.

use async_trait::async_trait;
use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{AttachParams, ListParams, LogParams};
use tokio::io::{AsyncBufReadExt as _, AsyncRead, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::error::{AstraError, ExecError, PlatformError, Result};
use crate::labels;
use crate::platform::{ExecClient, ExecOutput, PodClient};

use super::KubeClient;

/// Output lines kept for error reports.
pub(crate) const OUTPUT_TAIL_LINES: usize = 100;

#[async_trait]
impl PodClient for KubeClient {
    async fn get_pod_using_component_name(&self, component: &str, app: &str) -> Result<Pod> {
        let selector = labels::get_selector(component, app, labels::COMPONENT_DEV_MODE, false);
        self.get_running_pod_from_selector(&selector).await
    }

    async fn get_running_pod_from_selector(&self, selector: &str) -> Result<Pod> {
        let lp = ListParams::default()
            .labels(selector)
            .fields("status.phase=Running");
        let pods = self.pods().list(&lp).await?;

        pods.items
            .into_iter()
            .find(|p| p.metadata.deletion_timestamp.is_none())
            .ok_or_else(|| {
                PlatformError::PodNotFound {
                    selector: selector.to_string(),
                }
                .into()
            })
    }

    async fn get_all_pods_from_selector(&self, selector: &str) -> Result<Vec<Pod>> {
        let lp = ListParams::default().labels(selector);
        Ok(self.pods().list(&lp).await?.items)
    }

    async fn pod_logs(
        &self,
        pod: &str,
        container: &str,
        follow: bool,
        tail: Option<i64>,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<()> {
        let lp = LogParams {
            container: Some(container.to_string()),
            follow,
            tail_lines: tail,
            ..LogParams::default()
        };
        let mut lines = self.pods().log_stream(pod, &lp).await?.lines();
        while let Some(line) = lines.try_next().await? {
            on_line(&line);
        }
        Ok(())
    }
}

#[async_trait]
impl ExecClient for KubeClient {
    async fn execute_command(
        &self,
        command: &[String],
        pod: &str,
        container: &str,
        show_output: bool,
    ) -> Result<ExecOutput> {
        debug!("Executing {:?} in {}/{}", command, pod, container);
        let ap = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);
        let mut attached = self.pods().exec(pod, command.to_vec(), &ap).await?;

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let status = attached.take_status();

        let (stdout, stderr) = tokio::join!(
            read_lines(stdout, show_output),
            read_lines(stderr, show_output)
        );
        let status = match status {
            Some(status) => status.await,
            None => None,
        };

        let (stdout, stderr) = (stdout?, stderr?);
        check_status(status.as_ref(), command, container, &stdout, &stderr)?;
        Ok((stdout, stderr))
    }

    async fn execute_command_with_stdin(
        &self,
        command: &[String],
        pod: &str,
        container: &str,
        stdin: Vec<u8>,
    ) -> Result<()> {
        let ap = AttachParams::default()
            .container(container)
            .stdin(true)
            .stdout(false)
            .stderr(true);
        let mut attached = self.pods().exec(pod, command.to_vec(), &ap).await?;

        let mut writer = attached
            .stdin()
            .ok_or_else(|| AstraError::internal("exec stdin not available"))?;
        let stderr = attached.stderr();
        let status = attached.take_status();

        writer.write_all(&stdin).await?;
        writer.shutdown().await?;
        drop(writer);

        let stderr = read_lines(stderr, false).await?;
        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        check_status(status.as_ref(), command, container, &[], &stderr)
    }
}

/// Collects the lines of `reader`, echoing them on stdout when `echo` is set.
#[allow(clippy::print_stdout)]
async fn read_lines<R>(reader: Option<R>, echo: bool) -> Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(Vec::new());
    };
    let mut lines = BufReader::new(reader).lines();
    let mut out = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if echo {
            println!("{line}");
        }
        out.push(line);
    }
    Ok(out)
}

/// Exit code reported by the exec status, `-1` when unknown.
fn exit_code(status: Option<&Status>) -> i32 {
    let Some(status) = status else {
        return -1;
    };
    if status.status.as_deref() == Some("Success") {
        return 0;
    }
    status
        .details
        .as_ref()
        .and_then(|d| d.causes.as_ref())
        .and_then(|causes| causes.iter().find(|c| c.reason.as_deref() == Some("ExitCode")))
        .and_then(|c| c.message.as_deref())
        .and_then(|m| m.parse().ok())
        .unwrap_or(-1)
}

fn check_status(
    status: Option<&Status>,
    command: &[String],
    container: &str,
    stdout: &[String],
    stderr: &[String],
) -> Result<()> {
    let code = exit_code(status);
    if code == 0 {
        return Ok(());
    }
    Err(ExecError::CommandFailed {
        command: command.join(" "),
        container: container.to_string(),
        exit_code: code,
        logs: output_tail(stdout, stderr),
    }
    .into())
}

/// Last lines of the combined output.
pub(crate) fn output_tail(stdout: &[String], stderr: &[String]) -> Vec<String> {
    let all: Vec<&String> = stdout.iter().chain(stderr.iter()).collect();
    let skip = all.len().saturating_sub(OUTPUT_TAIL_LINES);
    all.into_iter().skip(skip).cloned().collect()
}
