//! Labels put on every resource astra manages.
//!
//! The label set is the only inventory astra keeps: deletion and
//! discovery re-find a component's resources through [`get_selector`].

use std::collections::BTreeMap;

/// `app.kubernetes.io/instance`: the component name.
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
/// `app.kubernetes.io/managed-by`.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// `app.kubernetes.io/managed-by-version`.
pub const MANAGED_BY_VERSION_LABEL: &str = "app.kubernetes.io/managed-by-version";
/// `app.kubernetes.io/part-of`: the application name.
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
/// Storage name label on PVCs.
pub const KUBERNETES_STORAGE_NAME_LABEL: &str = "app.kubernetes.io/storage-name";
/// Dev or Deploy.
pub const MODE_LABEL: &str = "astra.dev/mode";
/// Project type, from the devfile metadata.
pub const PROJECT_TYPE_LABEL: &str = "astra.dev/project-type";
/// `app`.
pub const APP_LABEL: &str = "app";
/// `component`.
pub const COMPONENT_LABEL: &str = "component";
/// Devfile volume name on PVCs.
pub const DEVFILE_STORAGE_LABEL: &str = "storage-name";
/// Marks the PVC holding the project sources.
pub const SOURCE_PVC_LABEL: &str = "astra-source-pvc";

/// Value of the managed-by label.
pub const MANAGER: &str = "astra";

/// Mode of resources created by `astra dev`.
pub const COMPONENT_DEV_MODE: &str = "Dev";
/// Mode of resources created by `astra deploy`.
pub const COMPONENT_DEPLOY_MODE: &str = "Deploy";
/// Matches any mode.
pub const COMPONENT_ANY_MODE: &str = "";

/// Project type used when the devfile does not declare one.
pub const PROJECT_TYPE_NOT_AVAILABLE: &str = "Not available";

/// Returns the labels for a resource of `component` in `app`.
///
/// `is_part_of_component` adds the `component` label, which the
/// component's own workload carries but standalone resources do not.
#[must_use]
pub fn get_labels(
    component: &str,
    app: &str,
    mode: &str,
    is_part_of_component: bool,
) -> BTreeMap<String, String> {
    let mut labels = base_labels(component, app, mode, is_part_of_component);
    labels.insert(MANAGED_BY_VERSION_LABEL.to_string(), env!("CARGO_PKG_VERSION").to_string());
    labels.insert(APP_LABEL.to_string(), app.to_string());
    labels
}

/// Adds the project type label, falling back to "Not available".
pub fn add_project_type(labels: &mut BTreeMap<String, String>, project_type: Option<&str>) {
    let value = project_type
        .filter(|p| !p.is_empty())
        .unwrap_or(PROJECT_TYPE_NOT_AVAILABLE);
    labels.insert(PROJECT_TYPE_LABEL.to_string(), value.to_string());
}

/// Returns a label selector string matching resources of `component`.
///
/// An empty `mode` ([`COMPONENT_ANY_MODE`]) matches both Dev and Deploy.
#[must_use]
pub fn get_selector(component: &str, app: &str, mode: &str, is_part_of_component: bool) -> String {
    selector_from(&base_labels(component, app, mode, is_part_of_component))
}

/// Formats a label map as `k=v,k=v`, keys sorted.
#[must_use]
pub fn selector_from(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn base_labels(
    component: &str,
    app: &str,
    mode: &str,
    is_part_of_component: bool,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(INSTANCE_LABEL.to_string(), component.to_string());
    labels.insert(PART_OF_LABEL.to_string(), app.to_string());
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGER.to_string());
    if !mode.is_empty() {
        labels.insert(MODE_LABEL.to_string(), mode.to_string());
    }
    if is_part_of_component {
        labels.insert(COMPONENT_LABEL.to_string(), component.to_string());
    }
    labels
}

/// Labels for a PVC backing devfile volume `storage_name`.
#[must_use]
pub fn storage_labels(
    storage_name: &str,
    component: &str,
    app: &str,
    mode: &str,
    is_source: bool,
) -> BTreeMap<String, String> {
    let mut labels = get_labels(component, app, mode, false);
    labels.insert(KUBERNETES_STORAGE_NAME_LABEL.to_string(), storage_name.to_string());
    labels.insert(DEVFILE_STORAGE_LABEL.to_string(), storage_name.to_string());
    if is_source {
        labels.insert(SOURCE_PVC_LABEL.to_string(), storage_name.to_string());
    }
    labels
}

/// Component name carried by a resource.
#[must_use]
pub fn get_component_name(labels: &BTreeMap<String, String>) -> Option<&str> {
    labels.get(INSTANCE_LABEL).map(String::as_str)
}

/// Application name carried by a resource.
#[must_use]
pub fn get_app_name(labels: &BTreeMap<String, String>) -> Option<&str> {
    labels.get(PART_OF_LABEL).map(String::as_str)
}

/// Mode carried by a resource.
#[must_use]
pub fn get_mode(labels: &BTreeMap<String, String>) -> Option<&str> {
    labels.get(MODE_LABEL).map(String::as_str)
}

/// Whether astra manages this resource.
#[must_use]
pub fn is_managed_by_astra(labels: &BTreeMap<String, String>) -> bool {
    labels.get(MANAGED_BY_LABEL).is_some_and(|m| m == MANAGER)
}
