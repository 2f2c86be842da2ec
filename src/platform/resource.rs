//! Dynamic cluster resources.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DynamicObject};

/// A resource found on the cluster, with the API it was listed from.
#[derive(Debug, Clone)]
pub struct ClusterResource {
    /// API of the resource.
    pub resource: ApiResource,
    /// The object itself.
    pub object: DynamicObject,
}

impl ClusterResource {
    /// Wraps an object listed from `resource`.
    #[must_use]
    pub const fn new(resource: ApiResource, object: DynamicObject) -> Self {
        Self { resource, object }
    }

    /// Object name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.object.metadata.name.as_deref().unwrap_or_default()
    }

    /// Resource kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.resource.kind
    }

    /// `group/version`, or `version` for the core group.
    #[must_use]
    pub fn api_version(&self) -> &str {
        &self.resource.api_version
    }

    /// Whether deletion is already in progress.
    #[must_use]
    pub const fn is_terminating(&self) -> bool {
        self.object.metadata.deletion_timestamp.is_some()
    }

    /// Owner references of the object.
    #[must_use]
    pub fn owner_references(&self) -> &[OwnerReference] {
        self.object.metadata.owner_references.as_deref().unwrap_or_default()
    }

    /// Whether `owner` designates this resource.
    #[must_use]
    pub fn is_referenced_by(&self, owner: &OwnerReference) -> bool {
        owner.api_version == self.api_version() && owner.kind == self.kind() && owner.name == self.name()
    }
}

/// Whether one of the owners of `resource` is in `list`.
#[must_use]
pub fn references(list: &[ClusterResource], resource: &ClusterResource) -> bool {
    resource
        .owner_references()
        .iter()
        .any(|owner| list.iter().any(|r| r.is_referenced_by(owner)))
}
