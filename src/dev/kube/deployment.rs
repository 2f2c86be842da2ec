//! Deployment and service of the Kubernetes dev workload.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::component::ComponentContext;
use crate::devfile::DevfileObj;
use crate::labels;

/// Labels of the dev workload and its pod.
#[must_use]
pub fn workload_labels(devfile: &DevfileObj, context: &ComponentContext) -> BTreeMap<String, String> {
    let mut labels = labels::get_labels(
        &context.component_name,
        &context.app_name,
        labels::COMPONENT_DEV_MODE,
        false,
    );
    labels::add_project_type(&mut labels, devfile.metadata.project_type.as_deref());
    labels
}

/// Adds the container ports of the devfile endpoints.
pub fn add_container_ports(containers: &mut [Container], devfile: &DevfileObj) {
    let components: BTreeMap<&str, _> = devfile.container_components().collect();
    for container in containers {
        let Some(component) = components.get(container.name.as_str()) else {
            continue;
        };
        let ports: Vec<ContainerPort> = component
            .endpoints
            .iter()
            .map(|e| ContainerPort {
                name: Some(e.name.clone()),
                container_port: i32::from(e.target_port),
                protocol: Some(String::from("TCP")),
                ..ContainerPort::default()
            })
            .collect();
        container.ports = (!ports.is_empty()).then_some(ports);
    }
}

/// Desired dev deployment: one replica, recreated on change.
#[must_use]
pub fn build_deployment(
    devfile: &DevfileObj,
    context: &ComponentContext,
    containers: Vec<Container>,
    volumes: Vec<Volume>,
) -> Deployment {
    let labels = workload_labels(devfile, context);
    let selector = labels::get_labels(&context.component_name, &context.app_name, labels::COMPONENT_DEV_MODE, false)
        .into_iter()
        .filter(|(k, _)| k == labels::INSTANCE_LABEL || k == labels::MODE_LABEL)
        .collect();

    Deployment {
        metadata: ObjectMeta {
            name: Some(context.workload_name()),
            labels: Some(labels.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..LabelSelector::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some(String::from("Recreate")),
                ..DeploymentStrategy::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers,
                    volumes: Some(volumes),
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

/// Reference making a resource garbage collected with `deployment`.
///
/// `None` until the deployment exists on the cluster.
#[must_use]
pub fn owner_reference(deployment: &Deployment) -> Option<OwnerReference> {
    let uid = deployment.metadata.uid.clone()?;
    Some(OwnerReference {
        api_version: String::from("apps/v1"),
        kind: String::from("Deployment"),
        name: deployment.metadata.name.clone().unwrap_or_default(),
        uid,
        controller: Some(true),
        block_owner_deletion: None,
    })
}

/// Desired service exposing every endpoint, or `None` without endpoints.
#[must_use]
pub fn build_service(devfile: &DevfileObj, context: &ComponentContext, deployment: &Deployment) -> Option<Service> {
    let ports: Vec<ServicePort> = devfile
        .container_components()
        .flat_map(|(_, c)| c.endpoints.iter())
        .map(|e| ServicePort {
            name: Some(format!("port-{}", e.target_port)),
            port: i32::from(e.target_port),
            target_port: Some(IntOrString::Int(i32::from(e.target_port))),
            protocol: Some(String::from("TCP")),
            ..ServicePort::default()
        })
        .collect();
    if ports.is_empty() {
        return None;
    }
    let selector = deployment
        .spec
        .as_ref()
        .and_then(|s| s.selector.match_labels.clone());

    Some(Service {
        metadata: ObjectMeta {
            name: Some(context.workload_name()),
            labels: deployment.metadata.labels.clone(),
            owner_references: owner_reference(deployment).map(|o| vec![o]),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(ports),
            selector,
            ..ServiceSpec::default()
        }),
        ..Service::default()
    })
}

/// Fields of a container the reconciler owns. Defaults filled in by the API
/// server stay out of the comparison.
fn container_view(c: &Container) -> Value {
    json!({
        "name": c.name,
        "image": c.image,
        "command": c.command,
        "args": c.args,
        "env": c.env.as_ref().map(|env| env
            .iter()
            .map(|e| json!([e.name, e.value]))
            .collect::<Vec<_>>()),
        "ports": c.ports.as_ref().map(|ports| ports
            .iter()
            .map(|p| json!([p.name, p.container_port]))
            .collect::<Vec<_>>()),
        "volumeMounts": c.volume_mounts.as_ref().map(|mounts| mounts
            .iter()
            .map(|m| json!([m.name, m.mount_path]))
            .collect::<Vec<_>>()),
        "resources": c.resources.as_ref().map(|r| json!([r.limits, r.requests])),
    })
}

fn volume_view(v: &Volume) -> Value {
    json!([
        v.name,
        v.persistent_volume_claim.as_ref().map(|p| p.claim_name.clone()),
        v.empty_dir.is_some(),
    ])
}

fn pod_spec(deployment: &Deployment) -> Option<&PodSpec> {
    deployment.spec.as_ref().and_then(|s| s.template.spec.as_ref())
}

/// What differs between the desired and the live deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentDiff {
    /// Names of the parts that changed, in a fixed order.
    pub changed: Vec<&'static str>,
}

impl DeploymentDiff {
    /// Compares the parts of `desired` the reconciler owns with `live`.
    #[must_use]
    pub fn between(desired: &Deployment, live: &Deployment) -> Self {
        let mut changed = Vec::new();

        let template_labels =
            |d: &Deployment| d.spec.as_ref().and_then(|s| s.template.metadata.as_ref()).and_then(|m| m.labels.clone());
        if desired.metadata.labels != live.metadata.labels || template_labels(desired) != template_labels(live) {
            changed.push("labels");
        }

        let containers = |d: &Deployment| -> Vec<Value> {
            pod_spec(d)
                .map(|s| s.containers.iter().map(container_view).collect())
                .unwrap_or_default()
        };
        if containers(desired) != containers(live) {
            changed.push("containers");
        }

        let volumes = |d: &Deployment| -> Vec<Value> {
            pod_spec(d)
                .and_then(|s| s.volumes.as_ref())
                .map(|v| v.iter().map(volume_view).collect())
                .unwrap_or_default()
        };
        if volumes(desired) != volumes(live) {
            changed.push("volumes");
        }

        Self { changed }
    }

    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Whether the live service already matches the desired one.
#[must_use]
pub fn service_matches(desired: &Service, live: &Service) -> bool {
    let view = |s: &Service| {
        s.spec.as_ref().map(|spec| {
            json!([
                spec.selector,
                spec.ports.as_ref().map(|ports| ports
                    .iter()
                    .map(|p| json!([p.name, p.port]))
                    .collect::<Vec<_>>()),
            ])
        })
    };
    view(desired) == view(live) && desired.metadata.labels == live.metadata.labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::testing;
    use crate::dev::common::build_containers;
    use k8s_openapi::api::core::v1::EnvVar;

    const DEVFILE: &str = "
schemaVersion: 2.2.0
metadata:
  name: api
  projectType: nodejs
components:
  - name: runtime
    container:
      image: node:20
      endpoints:
        - name: http
          targetPort: 3000
";

    fn desired() -> Deployment {
        let devfile = testing::devfile(DEVFILE);
        let mut containers = build_containers(&devfile);
        add_container_ports(&mut containers, &devfile);
        build_deployment(&devfile, &testing::context(), containers, Vec::new())
    }

    #[test]
    fn test_deployment_shape() {
        let deployment = desired();
        assert_eq!(deployment.metadata.name.as_deref(), Some("api-app"));
        let labels = deployment.metadata.labels.as_ref().expect("labels");
        assert_eq!(labels.get(labels::MODE_LABEL).map(String::as_str), Some("Dev"));
        assert_eq!(labels.get(labels::PROJECT_TYPE_LABEL).map(String::as_str), Some("nodejs"));

        let container = &pod_spec(&deployment).expect("spec").containers[0];
        assert_eq!(container.ports.as_ref().expect("ports")[0].container_port, 3000);
    }

    #[test]
    fn test_server_defaults_are_not_a_diff() {
        let desired = desired();
        let mut live = desired.clone();
        if let Some(spec) = live.spec.as_mut().and_then(|s| s.template.spec.as_mut()) {
            spec.containers[0].image_pull_policy = Some(String::from("IfNotPresent"));
            spec.containers[0].termination_message_path = Some(String::from("/dev/termination-log"));
            spec.restart_policy = Some(String::from("Always"));
        }
        assert!(DeploymentDiff::between(&desired, &live).is_empty());
    }

    #[test]
    fn test_env_change_is_a_diff() {
        let desired = desired();
        let mut live = desired.clone();
        if let Some(spec) = live.spec.as_mut().and_then(|s| s.template.spec.as_mut()) {
            spec.containers[0].env = Some(vec![EnvVar {
                name: String::from("DEBUG"),
                value: Some(String::from("1")),
                ..EnvVar::default()
            }]);
        }
        assert_eq!(DeploymentDiff::between(&desired, &live).changed, vec!["containers"]);
    }

    #[test]
    fn test_service() {
        let devfile = testing::devfile(DEVFILE);
        let deployment = desired();
        let service = build_service(&devfile, &testing::context(), &deployment).expect("service");
        let ports = service.spec.as_ref().and_then(|s| s.ports.as_ref()).expect("ports");
        assert_eq!(ports[0].port, 3000);
        assert!(service_matches(&service, &service.clone()));
        assert!(service.metadata.owner_references.is_none());
    }

    #[test]
    fn test_owner_reference_needs_uid() {
        let mut deployment = desired();
        assert!(owner_reference(&deployment).is_none());
        deployment.metadata.uid = Some(String::from("0f6c"));
        let owner = owner_reference(&deployment).expect("owner");
        assert_eq!((owner.kind.as_str(), owner.name.as_str()), ("Deployment", "api-app"));
    }
}
