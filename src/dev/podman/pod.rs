//! Pod definition of a component running on Podman.

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, PersistentVolumeClaimVolumeSource, Pod, PodSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::component::{ComponentContext, SHARED_DATA_MOUNT_PATH};
use crate::dev::common::{build_containers, SHARED_DATA_VOLUME, SOURCE_VOLUME};
use crate::devfile::{ComponentKind, DevfileObj};
use crate::labels;
use crate::platform::podman::{PORT_FORWARDING_HELPER_CONTAINER, PORT_FORWARDING_HELPER_IMAGE};
use crate::state::ForwardedPort;

fn claim_volume(name: &str, claim: String) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim,
            read_only: None,
        }),
        ..Volume::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..VolumeMount::default()
    }
}

/// Volumes of the pod. Podman creates a named volume for each claim.
fn volumes(devfile: &DevfileObj, workload: &str) -> Vec<Volume> {
    let mut volumes = vec![
        claim_volume(SOURCE_VOLUME, format!("{SOURCE_VOLUME}-{workload}")),
        claim_volume(SHARED_DATA_VOLUME, format!("{SHARED_DATA_VOLUME}-{workload}")),
    ];
    for component in devfile.volume_components() {
        let ComponentKind::Volume(volume) = &component.kind else {
            continue;
        };
        if volume.ephemeral.unwrap_or(false) {
            volumes.push(Volume {
                name: component.name.clone(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Volume::default()
            });
        } else {
            volumes.push(claim_volume(&component.name, format!("{}-{workload}", component.name)));
        }
    }
    volumes
}

fn helper_container() -> Container {
    Container {
        name: PORT_FORWARDING_HELPER_CONTAINER.to_string(),
        image: Some(PORT_FORWARDING_HELPER_IMAGE.to_string()),
        command: Some(vec![String::from("tail")]),
        args: Some(vec![String::from("-f"), String::from("/dev/null")]),
        ..Container::default()
    }
}

/// Builds the pod running the component.
///
/// Without `forward_localhost`, each forwarded port is published by the
/// container declaring it. With it, the pod always gets a helper container,
/// which publishes the ports and relays them to the application over the
/// pod loopback.
#[must_use]
pub fn create_pod_from_component(
    devfile: &DevfileObj,
    context: &ComponentContext,
    forwarded: &[ForwardedPort],
    forward_localhost: bool,
) -> Pod {
    let workload = context.workload_name();
    let components: Vec<_> = devfile.container_components().collect();

    let mut containers = build_containers(devfile);
    for container in &mut containers {
        container.image_pull_policy = Some(String::from("Always"));
        let Some((_, component)) = components.iter().find(|(name, _)| *name == container.name) else {
            continue;
        };

        let mut mounts = Vec::new();
        if component.mounts_sources() {
            mounts.push(mount(SOURCE_VOLUME, component.source_mapping()));
        }
        mounts.push(mount(SHARED_DATA_VOLUME, SHARED_DATA_MOUNT_PATH));
        mounts.extend(component.volume_mounts.iter().map(|vm| mount(&vm.name, &vm.mount_path())));
        container.volume_mounts = Some(mounts);

        if !forward_localhost {
            let ports: Vec<ContainerPort> = forwarded
                .iter()
                .filter(|p| p.container_name == container.name)
                .map(|p| ContainerPort {
                    name: Some(p.port_name.clone()),
                    container_port: i32::from(p.container_port),
                    host_port: Some(i32::from(p.local_port)),
                    host_ip: Some(p.local_address.clone()),
                    protocol: Some(String::from("TCP")),
                })
                .collect();
            container.ports = (!ports.is_empty()).then_some(ports);
        }
    }

    if forward_localhost {
        let mut helper = helper_container();
        let ports: Vec<ContainerPort> = forwarded
            .iter()
            .map(|p| ContainerPort {
                name: Some(p.port_name.clone()),
                container_port: i32::from(p.local_port),
                host_port: Some(i32::from(p.local_port)),
                host_ip: Some(p.local_address.clone()),
                protocol: None,
            })
            .collect();
        helper.ports = (!ports.is_empty()).then_some(ports);
        containers.push(helper);
    }

    let mut pod_labels = labels::get_labels(&context.component_name, &context.app_name, labels::COMPONENT_DEV_MODE, true);
    labels::add_project_type(&mut pod_labels, devfile.metadata.project_type.as_deref());

    Pod {
        metadata: ObjectMeta {
            name: Some(workload.clone()),
            labels: Some(pod_labels),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers,
            volumes: Some(volumes(devfile, &workload)),
            ..PodSpec::default()
        }),
        status: None,
    }
}
