//! Jobs running commands in new containers.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, LogParams, PostParams};
use std::time::Duration;
use tracing::debug;

use crate::error::{AstraError, PlatformError, Result};
use crate::labels::selector_from;
use crate::platform::JobClient;

use super::KubeClient;

/// Polling interval while waiting for a job.
const JOB_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Whether the job has finished, successfully or not.
pub(crate) fn is_job_finished(job: &Job) -> bool {
    job.status
        .as_ref()
        .is_some_and(|s| s.succeeded.unwrap_or(0) > 0 || s.failed.unwrap_or(0) > 0)
}

#[async_trait]
impl JobClient for KubeClient {
    async fn create_job(&self, job: &Job) -> Result<Job> {
        Ok(self.api::<Job>().create(&PostParams::default(), job).await?)
    }

    async fn wait_for_job_to_complete(&self, name: &str) -> Result<Job> {
        let api = self.api::<Job>();
        loop {
            let job = api.get(name).await?;
            if is_job_finished(&job) {
                debug!("Job {} finished", name);
                return Ok(job);
            }
            tokio::time::sleep(JOB_POLL_INTERVAL).await;
        }
    }

    async fn get_job_logs(&self, job: &Job, tail: i64) -> Result<String> {
        let match_labels = job
            .spec
            .as_ref()
            .and_then(|s| s.selector.as_ref())
            .and_then(|s| s.match_labels.clone())
            .ok_or_else(|| AstraError::internal("job has no selector"))?;
        let selector = selector_from(&match_labels);

        let pods = self
            .api::<Pod>()
            .list(&ListParams::default().labels(&selector))
            .await?;
        let pod_name = pods
            .items
            .first()
            .and_then(|p| p.metadata.name.clone())
            .ok_or(PlatformError::PodNotFound { selector })?;

        let lp = LogParams {
            tail_lines: Some(tail),
            ..LogParams::default()
        };
        Ok(self.pods().logs(&pod_name, &lp).await?)
    }

    async fn delete_jobs(&self, selector: &str) -> Result<()> {
        self.api::<Job>()
            .delete_collection(&DeleteParams::background(), &ListParams::default().labels(selector))
            .await?;
        Ok(())
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        match self.api::<Job>().delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(status)) if status.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobStatus;

    #[test]
    fn test_is_job_finished() {
        let mut job = Job::default();
        assert!(!is_job_finished(&job));

        job.status = Some(JobStatus {
            active: Some(1),
            ..Default::default()
        });
        assert!(!is_job_finished(&job));

        job.status = Some(JobStatus {
            failed: Some(1),
            ..Default::default()
        });
        assert!(is_job_finished(&job));
    }
}
