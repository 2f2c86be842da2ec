//! Running commands of stopped containers as Kubernetes jobs.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar as KubeEnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::time::Duration;
use tracing::{info, warn};

use crate::devfile::{Command, ComponentKind, DevfileObj, ExecCommand};
use crate::error::{DevfileError, ExecError, Result};
use crate::labels;
use crate::platform::JobClient;

use super::handler::command_script;
use super::ComponentContext;

/// Longest name given to a job.
pub const JOB_NAME_MAX_LENGTH: usize = 60;

/// Delay before suggesting how to follow a long command.
const TIP_DELAY: Duration = Duration::from_secs(60);

/// Lines of output shown when the job fails.
const FAILURE_LOG_LINES: i64 = 100;

/// Seconds a finished job is kept before Kubernetes removes it.
const JOB_TTL_SECONDS: i32 = 60;

/// Projects directory seen by the commands.
const PROJECTS_ROOT: &str = "/projects";

/// Arguments given to `/bin/sh` to run `exec`.
#[must_use]
pub fn job_cmdline(exec: &ExecCommand) -> Vec<String> {
    vec![String::from("-c"), command_script(exec)]
}

/// `<component>-<app>-<command>`, shortening the workload part to fit.
fn job_name(context: &ComponentContext, command_id: &str) -> String {
    let suffix = format!("-{}", command_id.to_lowercase());
    let budget = JOB_NAME_MAX_LENGTH.saturating_sub(suffix.len());
    let workload: String = context.workload_name().chars().take(budget).collect();
    format!("{}{suffix}", workload.trim_end_matches('-'))
}

fn build_job(
    name: &str,
    image: &str,
    container_env: &[crate::devfile::EnvVar],
    context: &ComponentContext,
    devfile: &DevfileObj,
    exec: &ExecCommand,
) -> Job {
    let mut job_labels =
        labels::get_labels(&context.component_name, &context.app_name, labels::COMPONENT_DEPLOY_MODE, false);
    labels::add_project_type(&mut job_labels, devfile.metadata.project_type.as_deref());

    let mut env: Vec<KubeEnvVar> = [("PROJECTS_ROOT", PROJECTS_ROOT), ("PROJECT_SOURCE", PROJECTS_ROOT)]
        .into_iter()
        .map(|(n, v)| KubeEnvVar {
            name: n.to_string(),
            value: Some(v.to_string()),
            ..KubeEnvVar::default()
        })
        .collect();
    env.extend(container_env.iter().map(|e| KubeEnvVar {
        name: e.name.clone(),
        value: Some(e.value.clone()),
        ..KubeEnvVar::default()
    }));

    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(job_labels),
            ..ObjectMeta::default()
        },
        spec: Some(JobSpec {
            completion_mode: Some(String::from("Indexed")),
            ttl_seconds_after_finished: Some(JOB_TTL_SECONDS),
            backoff_limit: Some(1),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    restart_policy: Some(String::from("Never")),
                    containers: vec![Container {
                        name: exec.component.clone(),
                        image: Some(image.to_string()),
                        command: Some(vec![String::from("/bin/sh")]),
                        args: Some(job_cmdline(exec)),
                        env: Some(env),
                        ..Container::default()
                    }],
                    ..PodSpec::default()
                }),
            },
            ..JobSpec::default()
        }),
        ..Job::default()
    }
}

/// Runs `exec` in a new job built from its container component, waits for
/// it and deletes it.
///
/// # Errors
///
/// Returns an error if the container component is unknown, the job cannot
/// be created, or the command fails.
pub async fn execute_in_new_container(
    jobs: &dyn JobClient,
    devfile: &DevfileObj,
    context: &ComponentContext,
    command: &Command,
    exec: &ExecCommand,
) -> Result<()> {
    let Some(ComponentKind::Container(container)) = devfile.find_component(&exec.component).map(|c| &c.kind) else {
        return Err(DevfileError::ComponentNotFound {
            name: exec.component.clone(),
        }
        .into());
    };

    let name = job_name(context, &command.id);
    jobs.delete_job(&name).await?;

    let job = build_job(&name, &container.image, &container.env, context, devfile, exec);
    info!("Executing command {} in a new container", command.id);
    jobs.create_job(&job).await?;

    let wait = jobs.wait_for_job_to_complete(&name);
    tokio::pin!(wait);
    let mut tip_shown = false;
    let finished = loop {
        tokio::select! {
            result = &mut wait => break result,
            () = tokio::time::sleep(TIP_DELAY), if !tip_shown => {
                info!("Tip: Run `astra logs --follow` to get the logs of the command output.");
                tip_shown = true;
            }
        }
    };

    let outcome = match finished {
        Ok(done) if done.status.as_ref().and_then(|s| s.failed).unwrap_or(0) > 0 => {
            let logs = jobs.get_job_logs(&done, FAILURE_LOG_LINES).await.unwrap_or_default();
            Err(ExecError::CommandFailed {
                command: command.id.clone(),
                container: exec.component.clone(),
                exit_code: -1,
                logs: logs.lines().map(String::from).collect(),
            }
            .into())
        }
        Ok(_) => Ok(()),
        Err(e) => Err(e),
    };

    if let Err(e) = jobs.delete_job(&name).await {
        warn!("Unable to delete job {}: {}", name, e);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::testing;
    use crate::devfile::CommandKind;
    use crate::platform::fake::FakeCluster;

    const DEVFILE: &str = "
schemaVersion: 2.2.0
metadata:
  name: api
components:
  - name: tests
    container:
      image: node:20
      env:
        - name: CI
          value: \"true\"
commands:
  - id: unit
    exec:
      component: tests
      commandLine: npm test
      workingDir: /projects
";

    fn unit(devfile: &DevfileObj) -> (Command, ExecCommand) {
        let command = devfile.find_command("unit").expect("command").clone();
        let CommandKind::Exec(exec) = command.kind.clone() else {
            panic!("not exec");
        };
        (command, exec)
    }

    #[test]
    fn test_job_name_fits() {
        let mut context = testing::context();
        context.component_name = "c".repeat(80);
        let name = job_name(&context, "Unit");
        assert!(name.len() <= JOB_NAME_MAX_LENGTH);
        assert!(name.ends_with("-unit"));
        assert_eq!(job_name(&testing::context(), "unit"), "api-app-unit");
    }

    #[test]
    fn test_job_shape() {
        let devfile = testing::devfile(DEVFILE);
        let (_, exec) = unit(&devfile);
        let job = build_job("api-app-unit", "node:20", &[], &testing::context(), &devfile, &exec);

        let spec = job.spec.expect("spec");
        assert_eq!(spec.completion_mode.as_deref(), Some("Indexed"));
        assert_eq!(spec.backoff_limit, Some(1));
        let pod = spec.template.spec.expect("pod spec");
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(
            pod.containers[0].args.as_deref(),
            Some(&[String::from("-c"), String::from("cd /projects && npm test")][..])
        );
        let job_labels = job.metadata.labels.expect("labels");
        assert_eq!(job_labels.get(labels::MODE_LABEL).map(String::as_str), Some(labels::COMPONENT_DEPLOY_MODE));
    }

    #[tokio::test]
    async fn test_successful_job_is_deleted() {
        let cluster = FakeCluster::new();
        let devfile = testing::devfile(DEVFILE);
        let (command, exec) = unit(&devfile);

        execute_in_new_container(&cluster, &devfile, &testing::context(), &command, &exec)
            .await
            .expect("job succeeds");
        assert!(cluster.jobs().is_empty());
        assert_eq!(cluster.deleted().last().map(String::as_str), Some("Job/api-app-unit"));
    }

    #[tokio::test]
    async fn test_failed_job_reports_logs() {
        let cluster = FakeCluster::new();
        cluster.fail_command("npm test", 1);
        let devfile = testing::devfile(DEVFILE);
        let (command, exec) = unit(&devfile);

        let err = execute_in_new_container(&cluster, &devfile, &testing::context(), &command, &exec)
            .await
            .expect_err("job fails");
        assert!(matches!(err, crate::error::AstraError::Exec(ExecError::CommandFailed { .. })));
        assert!(cluster.jobs().is_empty());
    }
}
