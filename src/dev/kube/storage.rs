//! Volumes of the Kubernetes dev workload.

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::{BTreeMap, HashSet};
use tracing::info;

use crate::component::{ComponentContext, SHARED_DATA_MOUNT_PATH};
use crate::devfile::{ComponentKind, DevfileObj};
use crate::dev::common::{SHARED_DATA_VOLUME, SOURCE_VOLUME};
use crate::error::Result;
use crate::labels;
use crate::platform::ResourceClient;

/// Size of a devfile volume that does not give one.
pub const DEFAULT_VOLUME_SIZE: &str = "1Gi";

/// Size of the source volume when it is persistent.
pub const SOURCE_VOLUME_SIZE: &str = "2Gi";

/// A volume of the pod, and the claim backing it when it is persistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    /// Volume name inside the pod: the devfile volume name.
    pub name: String,
    /// Claim name, `None` for an `emptyDir`.
    pub claim_name: Option<String>,
    /// Requested size of the claim.
    pub size: String,
    /// Whether the claim holds the sources.
    pub is_source: bool,
}

impl VolumeInfo {
    fn volume(&self) -> Volume {
        match &self.claim_name {
            Some(claim) => Volume {
                name: self.name.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: claim.clone(),
                    read_only: None,
                }),
                ..Volume::default()
            },
            None => Volume {
                name: self.name.clone(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Volume::default()
            },
        }
    }
}

/// Volumes of the workload: sources, shared data, then devfile volumes.
///
/// The sources live in an `emptyDir` when `ephemeral_source` is set, in a
/// claim otherwise. Shared data is always ephemeral.
#[must_use]
pub fn volume_infos(devfile: &DevfileObj, context: &ComponentContext, ephemeral_source: bool) -> Vec<VolumeInfo> {
    let workload = context.workload_name();
    let mut infos = vec![
        VolumeInfo {
            name: SOURCE_VOLUME.to_string(),
            claim_name: (!ephemeral_source).then(|| format!("{SOURCE_VOLUME}-{workload}")),
            size: SOURCE_VOLUME_SIZE.to_string(),
            is_source: true,
        },
        VolumeInfo {
            name: SHARED_DATA_VOLUME.to_string(),
            claim_name: None,
            size: String::new(),
            is_source: false,
        },
    ];

    for component in devfile.volume_components() {
        let ComponentKind::Volume(volume) = &component.kind else {
            continue;
        };
        let ephemeral = volume.ephemeral.unwrap_or(false);
        infos.push(VolumeInfo {
            name: component.name.clone(),
            claim_name: (!ephemeral).then(|| format!("{}-{workload}", component.name)),
            size: volume
                .size
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_VOLUME_SIZE.to_string()),
            is_source: false,
        });
    }
    infos
}

/// Pod volumes for `infos`.
#[must_use]
pub fn pod_volumes(infos: &[VolumeInfo]) -> Vec<Volume> {
    infos.iter().map(VolumeInfo::volume).collect()
}

/// Claim of a persistent volume, owned by `owner` when given.
#[must_use]
pub fn build_pvc(
    info: &VolumeInfo,
    claim_name: &str,
    context: &ComponentContext,
    owner: Option<&OwnerReference>,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(claim_name.to_string()),
            owner_references: owner.map(|o| vec![o.clone()]),
            labels: Some(labels::storage_labels(
                &info.name,
                &context.component_name,
                &context.app_name,
                labels::COMPONENT_DEV_MODE,
                info.is_source,
            )),
            ..ObjectMeta::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![String::from("ReadWriteOnce")]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    String::from("storage"),
                    Quantity(info.size.clone()),
                )])),
                ..VolumeResourceRequirements::default()
            }),
            ..PersistentVolumeClaimSpec::default()
        }),
        ..PersistentVolumeClaim::default()
    }
}

/// Creates the claims of `infos` that do not exist yet.
///
/// Returns the number of claims created.
///
/// # Errors
///
/// Returns an error if listing or creating claims fails.
pub async fn ensure_pvcs(
    resources: &dyn ResourceClient,
    infos: &[VolumeInfo],
    context: &ComponentContext,
    owner: Option<&OwnerReference>,
) -> Result<usize> {
    let selector = labels::get_selector(
        &context.component_name,
        &context.app_name,
        labels::COMPONENT_DEV_MODE,
        false,
    );
    let existing: HashSet<String> = resources
        .get_pvcs_from_selector(&selector)
        .await?
        .into_iter()
        .filter_map(|p| p.metadata.name)
        .collect();

    let mut created = 0;
    for info in infos {
        let Some(claim) = &info.claim_name else {
            continue;
        };
        if existing.contains(claim) {
            continue;
        }
        info!("Creating volume {} for {}", claim, info.name);
        resources.create_pvc(&build_pvc(info, claim, context, owner)).await?;
        created += 1;
    }
    Ok(created)
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..VolumeMount::default()
    }
}

/// Adds the volume mounts of the devfile to `containers`.
///
/// Every container gets the shared data volume. Containers mounting sources
/// get the source volume at their source mapping.
pub fn add_volume_mounts(containers: &mut [Container], devfile: &DevfileObj) {
    let components: BTreeMap<&str, _> = devfile.container_components().collect();
    for container in containers {
        let Some(component) = components.get(container.name.as_str()) else {
            continue;
        };
        let mut mounts = Vec::new();
        if component.mounts_sources() {
            mounts.push(mount(SOURCE_VOLUME, component.source_mapping()));
        }
        mounts.push(mount(SHARED_DATA_VOLUME, SHARED_DATA_MOUNT_PATH));
        mounts.extend(
            component
                .volume_mounts
                .iter()
                .map(|vm| mount(&vm.name, &vm.mount_path())),
        );
        container.volume_mounts = Some(mounts);
    }
}
