//! Typed lookups over a parsed devfile.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{DevfileError, Result};

use super::spec::{
    Command, CommandGroupKind, CommandKind, Component, ComponentKind, ContainerComponent, DevfileObj,
    Endpoint, Exposure, ImageComponent, KubernetesComponent,
};

/// Returns true for endpoint names reserved for debuggers.
#[must_use]
pub fn is_debug_port(name: &str) -> bool {
    name == "debug" || name.starts_with("debug-")
}

impl DevfileObj {
    /// Looks up a command by id.
    #[must_use]
    pub fn find_command(&self, id: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.id.eq_ignore_ascii_case(id))
    }

    /// Resolves the command to run for `kind`.
    ///
    /// With a `name`, the command must exist and belong to `kind`. Without
    /// one, the only command of that kind is used, or the one marked
    /// `isDefault` when there are several. `Ok(None)` means no command.
    ///
    /// # Errors
    ///
    /// Returns an error on group mismatch or ambiguous defaults.
    pub fn get_command(&self, name: Option<&str>, kind: CommandGroupKind) -> Result<Option<&Command>> {
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            let Some(command) = self.find_command(name) else {
                return Ok(None);
            };
            if command.group().is_some_and(|g| g.kind != kind) {
                return Err(DevfileError::validation(
                    format!(
                        "command group mismatched, command {name} is of group {} in devfile.yaml",
                        command.group().map_or_else(String::new, |g| g.kind.to_string())
                    ),
                    "commands",
                )
                .into());
            }
            return Ok(Some(command));
        }

        let of_kind: Vec<&Command> = self.commands.iter().filter(|c| c.is_kind(kind)).collect();
        match of_kind.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(*only)),
            many => {
                let defaults: Vec<&&Command> = many.iter().filter(|c| c.is_default()).collect();
                match defaults.as_slice() {
                    [one] => Ok(Some(**one)),
                    [] => Err(DevfileError::validation(
                        format!("there should be exactly one default command for command group {kind}, currently there is no default command"),
                        "commands",
                    )
                    .into()),
                    _ => Err(DevfileError::validation(
                        format!("there should be exactly one default command for command group {kind}, currently there are multiple default commands"),
                        "commands",
                    )
                    .into()),
                }
            }
        }
    }

    /// Looks up a component by name.
    #[must_use]
    pub fn find_component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Container components, in declaration order.
    pub fn container_components(&self) -> impl Iterator<Item = (&str, &ContainerComponent)> {
        self.components.iter().filter_map(|c| match &c.kind {
            ComponentKind::Container(container) => Some((c.name.as_str(), container)),
            _ => None,
        })
    }

    /// Volume components, in declaration order.
    pub fn volume_components(&self) -> impl Iterator<Item = &Component> {
        self.components
            .iter()
            .filter(|c| matches!(c.kind, ComponentKind::Volume(_)))
    }

    /// Names of components referenced by an apply command.
    fn applied_components(&self) -> HashSet<&str> {
        self.commands
            .iter()
            .filter_map(|c| match &c.kind {
                CommandKind::Apply(apply) => Some(apply.component.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Image components `astra dev` builds before deploying.
    ///
    /// `autoBuild: true`, or `autoBuild` unset and no apply command
    /// references the component.
    #[must_use]
    pub fn image_components_to_push_automatically(&self) -> Vec<(&str, &ImageComponent)> {
        let applied = self.applied_components();
        self.components
            .iter()
            .filter_map(|c| match &c.kind {
                ComponentKind::Image(image) => {
                    let auto = image
                        .auto_build
                        .unwrap_or_else(|| !applied.contains(c.name.as_str()));
                    auto.then_some((c.name.as_str(), image))
                }
                _ => None,
            })
            .collect()
    }

    /// Kubernetes and OpenShift components.
    ///
    /// With `all`, every such component; otherwise only those applied by
    /// default (`deployByDefault: true`, or unset and not referenced by an
    /// apply command).
    #[must_use]
    pub fn k8s_and_oc_components_to_push(&self, all: bool) -> Vec<(&str, &KubernetesComponent)> {
        let applied = self.applied_components();
        self.components
            .iter()
            .filter_map(|c| match &c.kind {
                ComponentKind::Kubernetes(k) | ComponentKind::Openshift(k) => {
                    let push = all
                        || k
                            .deploy_by_default
                            .unwrap_or_else(|| !applied.contains(c.name.as_str()));
                    push.then_some((c.name.as_str(), k))
                }
                _ => None,
            })
            .collect()
    }

    /// Whether post-start events are declared.
    #[must_use]
    pub fn has_post_start_events(&self) -> bool {
        !self.events.post_start.is_empty()
    }

    /// Whether pre-stop events are declared.
    #[must_use]
    pub fn has_pre_stop_events(&self) -> bool {
        !self.events.pre_stop.is_empty()
    }

    /// Endpoints of all containers, skipping the given exposures.
    #[must_use]
    pub fn get_endpoints(&self, ignore_exposures: &[Exposure]) -> Vec<&Endpoint> {
        self.container_components()
            .flat_map(|(_, c)| c.endpoints.iter())
            .filter(|e| !ignore_exposures.contains(&e.exposure))
            .collect()
    }

    /// Component name: devfile metadata, or the directory name.
    #[must_use]
    pub fn component_name(&self, dir: &Path) -> String {
        self.metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| {
                dir.file_name()
                    .map(|n| n.to_string_lossy().to_lowercase().replace(['_', ' ', '.'], "-"))
            })
            .unwrap_or_else(|| String::from("component"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devfile::DevfileParser;

    const DEVFILE: &str = r"
schemaVersion: 2.2.0
metadata:
  name: go
components:
  - name: runtime
    container:
      image: golang
      endpoints:
        - name: http
          targetPort: 8080
        - name: debug
          targetPort: 5858
        - name: metrics
          targetPort: 9090
          exposure: none
  - name: prod-image
    image:
      imageName: quay.io/me/go:latest
      dockerfile:
        uri: Dockerfile
  - name: auto-image
    image:
      imageName: quay.io/me/tools:latest
      autoBuild: true
  - name: outerloop-deploy
    kubernetes:
      inlined: 'kind: Deployment'
commands:
  - id: build
    exec:
      commandLine: go build
      component: runtime
      group:
        kind: build
  - id: run
    exec:
      commandLine: ./main
      component: runtime
      group:
        kind: run
        isDefault: true
  - id: run-alt
    exec:
      commandLine: ./main --alt
      component: runtime
      group:
        kind: run
  - id: build-image
    apply:
      component: prod-image
  - id: deploy
    apply:
      component: outerloop-deploy
      group:
        kind: deploy
";

    fn devfile() -> DevfileObj {
        DevfileParser::new().parse_yaml(DEVFILE, None).expect("devfile should parse")
    }

    #[test]
    fn test_default_command_resolution() {
        let devfile = devfile();
        let build = devfile.get_command(None, CommandGroupKind::Build).expect("lookup");
        assert_eq!(build.map(|c| c.id.as_str()), Some("build"));

        let run = devfile.get_command(None, CommandGroupKind::Run).expect("lookup");
        assert_eq!(run.map(|c| c.id.as_str()), Some("run"));

        let debug = devfile.get_command(None, CommandGroupKind::Debug).expect("lookup");
        assert!(debug.is_none());
    }

    #[test]
    fn test_named_command_group_mismatch() {
        let devfile = devfile();
        assert!(devfile.get_command(Some("build"), CommandGroupKind::Run).is_err());
        let named = devfile.get_command(Some("run-alt"), CommandGroupKind::Run).expect("lookup");
        assert_eq!(named.map(|c| c.id.as_str()), Some("run-alt"));
        assert!(devfile.get_command(Some("nope"), CommandGroupKind::Run).expect("lookup").is_none());
    }

    #[test]
    fn test_auto_build_images() {
        let devfile = devfile();
        let images: Vec<&str> = devfile
            .image_components_to_push_automatically()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(images, vec!["auto-image"]);
    }

    #[test]
    fn test_k8s_components_referenced_by_apply_are_not_pushed() {
        let devfile = devfile();
        assert!(devfile.k8s_and_oc_components_to_push(false).is_empty());
        assert_eq!(devfile.k8s_and_oc_components_to_push(true).len(), 1);
    }

    #[test]
    fn test_endpoints_and_debug_ports() {
        let devfile = devfile();
        let names: Vec<&str> = devfile
            .get_endpoints(&[Exposure::None])
            .into_iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["http", "debug"]);
        assert!(is_debug_port("debug"));
        assert!(is_debug_port("debug-1"));
        assert!(!is_debug_port("debugger"));
    }

    #[test]
    fn test_component_name_fallback() {
        let mut devfile = devfile();
        assert_eq!(devfile.component_name(Path::new("/tmp/x")), "go");
        devfile.metadata.name = None;
        assert_eq!(devfile.component_name(Path::new("/home/me/My_App")), "my-app");
    }
}
