//! Devfile command execution and component deletion.
//!
//! [`RunHandler`] runs one devfile command against a platform. The walk
//! over composite commands and events lives in [`execute`], independent of
//! the platform. [`delete`] computes what belongs to a component and
//! removes it.

pub mod delete;
pub mod describe;
mod execute;
mod handler;
pub mod manifest;
mod new_container;

pub use execute::{
    build, exec_post_start_events, exec_pre_stop_events, execute_command_by_name,
    execute_command_by_name_and_kind,
};
pub use handler::{CommandHandler, HandlerOptions, RunHandler, SHARED_DATA_MOUNT_PATH};
pub use new_container::{execute_in_new_container, job_cmdline, JOB_NAME_MAX_LENGTH};

use k8s_openapi::api::core::v1::Pod;
use std::path::PathBuf;

/// Where a component comes from and what it is called on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentContext {
    /// Component name.
    pub component_name: String,
    /// Application name.
    pub app_name: String,
    /// Directory holding the devfile.
    pub devfile_dir: PathBuf,
    /// Push images after building them.
    pub push_images: bool,
}

impl ComponentContext {
    /// Name of the dev workload: `<component>-<app>`.
    #[must_use]
    pub fn workload_name(&self) -> String {
        format!("{}-{}", self.component_name, self.app_name)
    }
}

/// Names of the containers of `pod`.
#[must_use]
pub fn container_names(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default()
}


#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec};

    #[test]
    fn test_container_names() {
        let pod = Pod {
            spec: Some(PodSpec {
                containers: vec![
                    Container {
                        name: String::from("runtime"),
                        ..Container::default()
                    },
                    Container {
                        name: String::from("tools"),
                        ..Container::default()
                    },
                ],
                ..PodSpec::default()
            }),
            ..Pod::default()
        };
        assert_eq!(container_names(&pod), vec!["runtime", "tools"]);
        assert!(container_names(&Pod::default()).is_empty());
    }

    #[test]
    fn test_workload_name() {
        assert_eq!(testing::context().workload_name(), "api-app");
    }
}
