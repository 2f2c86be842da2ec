//! Devfile parser.
//!
//! Loads a devfile from disk, substitutes `{{VAR}}` references and
//! deserializes the result into a [`DevfileObj`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{AstraError, DevfileError, Result};

use super::spec::DevfileObj;

/// File names searched for, in order.
pub const DEVFILE_NAMES: &[&str] = &["devfile.yaml", ".devfile.yaml", "devfile.yml", ".devfile.yml"];

/// Parser for devfiles.
#[derive(Debug, Default)]
pub struct DevfileParser {
    /// Variable overrides, applied over the devfile's own `variables`.
    variables: BTreeMap<String, String>,
}

impl DevfileParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            variables: BTreeMap::new(),
        }
    }

    /// Sets variable overrides (from `--var`).
    #[must_use]
    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    /// Loads a devfile from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DevfileObj> {
        let path = path.as_ref();
        debug!("Loading devfile from: {}", path.display());

        if !path.exists() {
            return Err(DevfileError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| DevfileError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a devfile from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or references an undefined variable.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DevfileObj> {
        let location = source.map(|p| p.display().to_string());
        let parse_err = |e: serde_yaml::Error| -> AstraError {
            DevfileError::ParseError {
                message: e.to_string(),
                location: location.clone(),
            }
            .into()
        };

        let mut raw: serde_yaml::Value = serde_yaml::from_str(content).map_err(parse_err)?;

        let mut variables: BTreeMap<String, String> = raw
            .get("variables")
            .cloned()
            .map(serde_yaml::from_value)
            .transpose()
            .map_err(parse_err)?
            .unwrap_or_default();
        variables.extend(self.variables.clone());

        substitute_variables(&mut raw, &variables)?;

        let devfile: DevfileObj = serde_yaml::from_value(raw).map_err(parse_err)?;
        debug!(
            "Parsed devfile {} with {} components and {} commands",
            devfile.metadata.name.as_deref().unwrap_or("<unnamed>"),
            devfile.components.len(),
            devfile.commands.len()
        );
        Ok(devfile)
    }
}

/// Replaces `{{NAME}}` in every string of `value`.
fn substitute_variables(
    value: &mut serde_yaml::Value,
    variables: &BTreeMap<String, String>,
) -> Result<()> {
    match value {
        serde_yaml::Value::String(s) => {
            if s.contains("{{") {
                *s = substitute_str(s, variables)?;
            }
        }
        serde_yaml::Value::Sequence(items) => {
            for item in items {
                substitute_variables(item, variables)?;
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                substitute_variables(v, variables)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn substitute_str(input: &str, variables: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = after[..end].trim();
        let value = variables
            .get(name)
            .ok_or_else(|| DevfileError::VariableNotFound {
                name: name.to_string(),
            })?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Finds the devfile in `dir`.
///
/// # Errors
///
/// Returns an error if no devfile is present.
pub fn find_devfile(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    for name in DEVFILE_NAMES {
        let path = dir.join(name);
        if path.exists() {
            info!("Found devfile: {}", path.display());
            return Ok(path);
        }
    }

    Err(DevfileError::FileNotFound {
        path: dir.join(DEVFILE_NAMES[0]),
    }
    .into())
}

/// Parses `--var NAME=VALUE` pairs.
///
/// # Errors
///
/// Returns an error for entries without `=`.
pub fn parse_var_flags(vars: &[String]) -> Result<BTreeMap<String, String>> {
    vars.iter()
        .map(|v| {
            v.split_once('=')
                .map(|(k, val)| (k.trim().to_string(), val.to_string()))
                .ok_or_else(|| {
                    DevfileError::validation(format!("invalid variable {v:?}, expected NAME=VALUE"), "var")
                        .into()
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devfile::spec::{CommandKind, ComponentKind};

    const NODEJS: &str = r"
schemaVersion: 2.2.0
metadata:
  name: nodejs
  projectType: Node.js
variables:
  NODE_IMAGE: registry.access.redhat.com/ubi8/nodejs-16:latest
components:
  - name: runtime
    container:
      image: '{{NODE_IMAGE}}'
      memoryLimit: 1024Mi
      endpoints:
        - name: http-node
          targetPort: 3000
        - name: debug
          targetPort: 5858
          exposure: none
commands:
  - id: install
    exec:
      commandLine: npm install
      component: runtime
      workingDir: ${PROJECT_SOURCE}
      group:
        kind: build
        isDefault: true
  - id: run
    exec:
      commandLine: npm start
      component: runtime
      group:
        kind: run
        isDefault: true
";

    #[test]
    fn test_parse_with_variables() {
        let devfile = DevfileParser::new()
            .parse_yaml(NODEJS, None)
            .expect("devfile should parse");

        assert_eq!(devfile.metadata.name.as_deref(), Some("nodejs"));
        assert_eq!(devfile.components.len(), 1);
        let ComponentKind::Container(container) = &devfile.components[0].kind else {
            panic!("expected a container component");
        };
        assert_eq!(container.image, "registry.access.redhat.com/ubi8/nodejs-16:latest");
        assert_eq!(container.endpoints[0].target_port, 3000);
        assert_eq!(devfile.commands.len(), 2);
        assert!(matches!(devfile.commands[0].kind, CommandKind::Exec(_)));
    }

    #[test]
    fn test_variable_override() {
        let mut vars = BTreeMap::new();
        vars.insert(String::from("NODE_IMAGE"), String::from("quay.io/me/node:20"));
        let devfile = DevfileParser::new()
            .with_variables(vars)
            .parse_yaml(NODEJS, None)
            .expect("devfile should parse");

        let ComponentKind::Container(container) = &devfile.components[0].kind else {
            panic!("expected a container component");
        };
        assert_eq!(container.image, "quay.io/me/node:20");
    }

    #[test]
    fn test_undefined_variable() {
        let yaml = "schemaVersion: 2.2.0\ncomponents:\n  - name: c\n    container:\n      image: '{{IMAGE}}'\n";
        let err = DevfileParser::new().parse_yaml(yaml, None).unwrap_err();
        assert!(err.to_string().contains("IMAGE"));
    }

    #[test]
    fn test_find_devfile() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        assert!(find_devfile(dir.path()).is_err());

        std::fs::write(dir.path().join(".devfile.yaml"), NODEJS).expect("write devfile");
        let found = find_devfile(dir.path()).expect("devfile should be found");
        assert!(found.ends_with(".devfile.yaml"));
    }

    #[test]
    fn test_parse_var_flags() {
        let vars = parse_var_flags(&[String::from("A=1"), String::from("B=x=y")]).expect("valid vars");
        assert_eq!(vars["A"], "1");
        assert_eq!(vars["B"], "x=y");
        assert!(parse_var_flags(&[String::from("broken")]).is_err());
    }
}
