//! Kubernetes manifests carried by devfile components.

use kube::api::DynamicObject;
use serde::Deserialize;
use std::path::Path;

use crate::devfile::KubernetesComponent;
use crate::error::{DevfileError, Result};

/// Manifest text of `component`, inlined or read from its local `uri`.
///
/// # Errors
///
/// Returns an error if the component has no manifest, references a remote
/// URI, or the file cannot be read.
pub fn load_manifest(component: &KubernetesComponent, devfile_dir: &Path) -> Result<String> {
    if let Some(inlined) = component.inlined.as_ref().filter(|s| !s.trim().is_empty()) {
        return Ok(inlined.clone());
    }
    let Some(uri) = component.uri.as_deref().filter(|u| !u.is_empty()) else {
        return Err(DevfileError::validation("kubernetes component has neither inlined nor uri", "components").into());
    };
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Err(DevfileError::validation(format!("remote manifest {uri:?} is not supported"), "components").into());
    }
    Ok(std::fs::read_to_string(devfile_dir.join(uri))?)
}

/// Parses a multi-document manifest, skipping empty documents.
///
/// # Errors
///
/// Returns an error if a document is not a Kubernetes object.
pub fn parse_objects(manifest: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = serde_yaml::Value::deserialize(document).map_err(parse_error)?;
        if value.is_null() {
            continue;
        }
        let object: DynamicObject = serde_yaml::from_value(value).map_err(parse_error)?;
        if object.types.is_none() {
            return Err(DevfileError::ParseError {
                message: String::from("manifest object without apiVersion and kind"),
                location: None,
            }
            .into());
        }
        objects.push(object);
    }
    Ok(objects)
}

fn parse_error(e: serde_yaml::Error) -> crate::error::AstraError {
    DevfileError::ParseError {
        message: format!("invalid kubernetes manifest: {e}"),
        location: None,
    }
    .into()
}

/// Objects declared by `component`.
///
/// # Errors
///
/// Returns an error if the manifest cannot be loaded or parsed.
pub fn component_objects(component: &KubernetesComponent, devfile_dir: &Path) -> Result<Vec<DynamicObject>> {
    parse_objects(&load_manifest(component, devfile_dir)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = "
apiVersion: v1
kind: Service
metadata:
  name: api
---
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: api-prod
spec:
  replicas: 1
";

    #[test]
    fn test_parse_multi_document() {
        let objects = parse_objects(MANIFEST).expect("parse");
        let names: Vec<_> = objects.iter().map(|o| o.metadata.name.clone().unwrap_or_default()).collect();
        assert_eq!(names, vec!["api", "api-prod"]);
        assert_eq!(objects[1].types.as_ref().map(|t| t.kind.as_str()), Some("Deployment"));
    }

    #[test]
    fn test_object_without_kind_is_rejected() {
        assert!(parse_objects("metadata:\n  name: x\n").is_err());
    }

    #[test]
    fn test_load_from_uri() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("kubernetes")).expect("mkdir");
        std::fs::write(dir.path().join("kubernetes/svc.yaml"), MANIFEST).expect("write");

        let component = KubernetesComponent {
            uri: Some(String::from("kubernetes/svc.yaml")),
            ..KubernetesComponent::default()
        };
        assert_eq!(component_objects(&component, dir.path()).expect("objects").len(), 2);

        let remote = KubernetesComponent {
            uri: Some(String::from("https://example.com/svc.yaml")),
            ..KubernetesComponent::default()
        };
        assert!(load_manifest(&remote, dir.path()).is_err());
    }
}
