//! Devfile validation.
//!
//! Structural checks run after parsing: references between commands,
//! components and events must resolve, and names must be usable as
//! Kubernetes identifiers.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::{DevfileError, Result};

use super::spec::{CommandKind, ComponentKind, DevfileObj};

/// Longest endpoint name Kubernetes accepts as a port name.
const MAX_ENDPOINT_NAME_LEN: usize = 15;

/// Validator for devfiles.
#[derive(Debug, Default)]
pub struct DevfileValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl DevfileValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a devfile.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, devfile: &DevfileObj) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        if devfile.schema_version.is_empty() {
            result.push("schemaVersion", "schemaVersion is required");
        }

        Self::validate_components(devfile, &mut result);
        Self::validate_commands(devfile, &mut result);
        Self::validate_events(devfile, &mut result);

        if result.errors.is_empty() {
            debug!("Devfile validation passed");
            Ok(result)
        } else {
            let first = &result.errors[0];
            Err(DevfileError::validation(first.message.clone(), first.field.clone()).into())
        }
    }

    fn validate_components(devfile: &DevfileObj, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        let mut endpoint_names = HashSet::new();
        let volumes: HashSet<&str> = devfile
            .components
            .iter()
            .filter(|c| matches!(c.kind, ComponentKind::Volume(_)))
            .map(|c| c.name.as_str())
            .collect();

        if devfile.components.is_empty() {
            result.warnings.push(String::from("No components defined in devfile"));
        }

        for (i, component) in devfile.components.iter().enumerate() {
            let prefix = format!("components[{i}]");

            if !seen.insert(component.name.as_str()) {
                result.push(format!("{prefix}.name"), format!("Duplicate component name: {}", component.name));
            }
            if !is_valid_name(&component.name) {
                result.push(
                    format!("{prefix}.name"),
                    format!(
                        "Component name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        component.name
                    ),
                );
            }

            match &component.kind {
                ComponentKind::Container(container) => {
                    if container.image.is_empty() {
                        result.push(format!("{prefix}.container.image"), "Container image cannot be empty");
                    }
                    for (j, endpoint) in container.endpoints.iter().enumerate() {
                        let field = format!("{prefix}.container.endpoints[{j}]");
                        if !endpoint_names.insert(endpoint.name.as_str()) {
                            result.push(&field, format!("Duplicate endpoint name: {}", endpoint.name));
                        }
                        if endpoint.name.len() > MAX_ENDPOINT_NAME_LEN || !is_valid_name(&endpoint.name) {
                            result.push(
                                &field,
                                format!(
                                    "Endpoint name '{}' must be lowercase alphanumeric with hyphens, at most {MAX_ENDPOINT_NAME_LEN} characters",
                                    endpoint.name
                                ),
                            );
                        }
                        if endpoint.target_port == 0 {
                            result.push(&field, format!("Endpoint '{}' has an invalid port 0", endpoint.name));
                        }
                    }
                    for (j, mount) in container.volume_mounts.iter().enumerate() {
                        if !volumes.contains(mount.name.as_str()) {
                            result.push(
                                format!("{prefix}.container.volumeMounts[{j}]"),
                                format!("Volume mount '{}' does not reference a volume component", mount.name),
                            );
                        }
                    }
                }
                ComponentKind::Kubernetes(k) | ComponentKind::Openshift(k) => {
                    if k.uri.is_none() && k.inlined.is_none() {
                        result.push(&prefix, format!("Component '{}' needs either uri or inlined", component.name));
                    }
                }
                ComponentKind::Image(image) => {
                    if image.image_name.is_empty() {
                        result.push(format!("{prefix}.image.imageName"), "Image name cannot be empty");
                    }
                }
                ComponentKind::Volume(_) => {}
            }
        }
    }

    fn validate_commands(devfile: &DevfileObj, result: &mut ValidationResult) {
        let components: HashMap<&str, &ComponentKind> = devfile
            .components
            .iter()
            .map(|c| (c.name.as_str(), &c.kind))
            .collect();
        let mut seen = HashSet::new();

        for (i, command) in devfile.commands.iter().enumerate() {
            let prefix = format!("commands[{i}]");
            if !seen.insert(command.id.as_str()) {
                result.push(format!("{prefix}.id"), format!("Duplicate command id: {}", command.id));
            }

            match &command.kind {
                CommandKind::Exec(exec) => match components.get(exec.component.as_str()) {
                    Some(ComponentKind::Container(_)) => {}
                    Some(_) => result.push(
                        format!("{prefix}.exec.component"),
                        format!("Command '{}' must reference a container component", command.id),
                    ),
                    None => result.push(
                        format!("{prefix}.exec.component"),
                        format!("Command '{}' references unknown component '{}'", command.id, exec.component),
                    ),
                },
                CommandKind::Apply(apply) => {
                    if !components.contains_key(apply.component.as_str()) {
                        result.push(
                            format!("{prefix}.apply.component"),
                            format!("Command '{}' references unknown component '{}'", command.id, apply.component),
                        );
                    }
                }
                CommandKind::Composite(composite) => {
                    for child in &composite.commands {
                        if devfile.find_command(child).is_none() {
                            result.push(
                                format!("{prefix}.composite.commands"),
                                format!("Composite command '{}' references unknown command '{child}'", command.id),
                            );
                        }
                    }
                    if has_cycle(devfile, &command.id, &mut Vec::new()) {
                        result.push(
                            format!("{prefix}.composite"),
                            format!("Composite command '{}' references itself", command.id),
                        );
                    }
                }
            }
        }
    }

    fn validate_events(devfile: &DevfileObj, result: &mut ValidationResult) {
        let events = [
            ("preStart", &devfile.events.pre_start),
            ("postStart", &devfile.events.post_start),
            ("preStop", &devfile.events.pre_stop),
            ("postStop", &devfile.events.post_stop),
        ];
        for (name, ids) in events {
            for id in ids {
                if devfile.find_command(id).is_none() {
                    result.push(
                        format!("events.{name}"),
                        format!("Event {name} references unknown command '{id}'"),
                    );
                }
            }
        }
    }
}

fn has_cycle(devfile: &DevfileObj, id: &str, path: &mut Vec<String>) -> bool {
    if path.iter().any(|p| p == id) {
        return true;
    }
    let Some(command) = devfile.find_command(id) else {
        return false;
    };
    let CommandKind::Composite(composite) = &command.kind else {
        return false;
    };
    path.push(id.to_string());
    let cyclic = composite.commands.iter().any(|child| has_cycle(devfile, child, path));
    path.pop();
    cyclic
}

/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') && !name.ends_with('-')
}

impl ValidationResult {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devfile::DevfileParser;

    fn parse(yaml: &str) -> DevfileObj {
        DevfileParser::new().parse_yaml(yaml, None).expect("devfile should parse")
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("runtime"));
        assert!(is_valid_name("http-8080"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Runtime"));
        assert!(!is_valid_name("8080-http"));
        assert!(!is_valid_name("http_port"));
        assert!(!is_valid_name("http-"));
    }

    #[test]
    fn test_unknown_component_reference() {
        let devfile = parse(
            r"
schemaVersion: 2.2.0
components:
  - name: runtime
    container:
      image: alpine
commands:
  - id: run
    exec:
      commandLine: ./run
      component: tools
",
        );
        let err = DevfileValidator::new().validate(&devfile).unwrap_err();
        assert!(err.to_string().contains("unknown component 'tools'"));
    }

    #[test]
    fn test_composite_cycle() {
        let devfile = parse(
            r"
schemaVersion: 2.2.0
components:
  - name: runtime
    container:
      image: alpine
commands:
  - id: a
    composite:
      commands: [b]
  - id: b
    composite:
      commands: [a]
",
        );
        assert!(DevfileValidator::new().validate(&devfile).is_err());
    }

    #[test]
    fn test_duplicate_endpoint_names() {
        let devfile = parse(
            r"
schemaVersion: 2.2.0
components:
  - name: runtime
    container:
      image: alpine
      endpoints:
        - name: http
          targetPort: 8080
  - name: tools
    container:
      image: alpine
      endpoints:
        - name: http
          targetPort: 9090
",
        );
        let err = DevfileValidator::new().validate(&devfile).unwrap_err();
        assert!(err.to_string().contains("Duplicate endpoint name"));
    }

    #[test]
    fn test_event_references() {
        let devfile = parse(
            r"
schemaVersion: 2.2.0
components:
  - name: runtime
    container:
      image: alpine
commands:
  - id: init
    exec:
      commandLine: echo init
      component: runtime
events:
  postStart: [init]
  preStop: [missing]
",
        );
        let err = DevfileValidator::new().validate(&devfile).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
