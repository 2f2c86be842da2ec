//! Output formatting for CLI commands.
//!
//! Command results are rendered here, as text for people or JSON for
//! scripts. Progress of long-running commands goes through `tracing`.

use colored::Colorize;
use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::component::describe::ComponentDescription;
use crate::platform::ClusterResource;
use crate::state::ForwardedPort;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Forwarded port row for table display.
#[derive(Tabled)]
struct ForwardedPortRow {
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Endpoint")]
    endpoint: String,
    #[tabled(rename = "Local")]
    local: String,
    #[tabled(rename = "Container port")]
    container_port: u16,
    #[tabled(rename = "Platform")]
    platform: String,
}

/// Devfile command row for table display.
#[derive(Tabled)]
struct CommandRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Default")]
    default: String,
}

/// Resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Platform")]
    platform: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceJson {
    platform: &'static str,
    kind: String,
    name: String,
}

#[derive(Serialize)]
struct MessageJson<'a> {
    message: &'a str,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Whether results are rendered as JSON.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Formats a success message.
    #[must_use]
    pub fn format_success(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&MessageJson { message }).unwrap_or_default(),
            OutputFormat::Text => format!("{} {message}", "✓".green()),
        }
    }

    /// Formats a warning.
    #[must_use]
    pub fn format_warning(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&MessageJson { message }).unwrap_or_default(),
            OutputFormat::Text => format!("{} {message}", "⚠".yellow()),
        }
    }

    fn forwarded_ports_text(ports: &[ForwardedPort]) -> String {
        if ports.is_empty() {
            return String::from("   No forwarded ports.\n");
        }
        let rows: Vec<ForwardedPortRow> = ports
            .iter()
            .map(|p| ForwardedPortRow {
                container: p.container_name.clone(),
                endpoint: p.port_name.clone(),
                local: format!("{}:{}", p.local_address, p.local_port),
                container_port: p.container_port,
                platform: p.platform.unwrap_or_default().to_string(),
            })
            .collect();
        let mut output = Table::new(rows).to_string();
        output.push('\n');
        output
    }

    /// Formats the resources `astra delete component` is about to delete.
    #[must_use]
    pub fn format_resources_to_delete(&self, component: &str, cluster: &[ClusterResource], podman: Option<&Pod>) -> String {
        let rows = Self::resource_rows(cluster, podman);
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&rows).unwrap_or_default(),
            OutputFormat::Text => {
                if rows.is_empty() {
                    return format!("No resource found for component {}.\n", component.bold());
                }
                let mut output = String::new();
                let _ = writeln!(
                    output,
                    "The following resources of component {} will be deleted:\n",
                    component.bold()
                );
                let table = Table::new(rows.into_iter().map(|r| ResourceRow {
                    platform: r.platform.to_string(),
                    kind: r.kind,
                    name: r.name,
                }))
                .to_string();
                output.push_str(&table);
                output.push('\n');
                output
            }
        }
    }

    fn resource_rows(cluster: &[ClusterResource], podman: Option<&Pod>) -> Vec<ResourceJson> {
        let mut rows: Vec<ResourceJson> = cluster
            .iter()
            .map(|r| ResourceJson {
                platform: "cluster",
                kind: r.kind().to_string(),
                name: r.name().to_string(),
            })
            .collect();
        if let Some(pod) = podman {
            rows.push(ResourceJson {
                platform: "podman",
                kind: String::from("Pod"),
                name: pod.metadata.name.clone().unwrap_or_default(),
            });
        }
        rows
    }

    /// Formats the description of a component.
    #[must_use]
    pub fn format_description(&self, description: &ComponentDescription) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(description).unwrap_or_default(),
            OutputFormat::Text => Self::description_text(description),
        }
    }

    fn description_text(d: &ComponentDescription) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "\n{} {}", "Name:".bold(), d.name);
        if let Some(display_name) = &d.display_name {
            let _ = writeln!(output, "{} {display_name}", "Display Name:".bold());
        }
        if let Some(project_type) = &d.project_type {
            let _ = writeln!(output, "{} {project_type}", "Project Type:".bold());
        }
        if let Some(language) = &d.language {
            let _ = writeln!(output, "{} {language}", "Language:".bold());
        }
        let _ = writeln!(output, "{} {}", "Devfile:".bold(), d.devfile_path.display());
        let _ = writeln!(output, "{} {}", "Running in:".bold(), d.running_in);
        for (platform, modes) in &d.running_on {
            let _ = writeln!(output, "   {platform}: {modes}");
        }
        let _ = writeln!(output, "{} {}", "Managed by:".bold(), d.managed_by);

        let f = d.supported_features;
        let _ = writeln!(output, "\n{}", "Supported features:".bold());
        for (name, supported) in [("Dev", f.dev), ("Deploy", f.deploy), ("Debug", f.debug)] {
            let mark = if supported { "✓".green() } else { "✗".red() };
            let _ = writeln!(output, "   {mark} {name}");
        }

        if !d.commands.is_empty() {
            let _ = writeln!(output, "\n{}", "Commands:".bold());
            let rows = d.commands.iter().map(|c| CommandRow {
                name: c.name.clone(),
                kind: c.kind.to_string(),
                group: c.group.clone().unwrap_or_default(),
                default: if c.is_default { String::from("yes") } else { String::new() },
            });
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if !d.components.is_empty() {
            let _ = writeln!(output, "\n{}", "Components:".bold());
            for component in &d.components {
                let _ = writeln!(output, "   - {} ({})", component.name, component.kind);
            }
        }

        if d.running_in.dev {
            let _ = writeln!(output, "\n{}", "Forwarded ports:".bold());
            output.push_str(&Self::forwarded_ports_text(&d.dev_forwarded_ports));
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::describe::{CommandSummary, RunningModes, SupportedFeatures};
    use crate::state::Platform;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn port() -> ForwardedPort {
        ForwardedPort {
            platform: Some(Platform::Podman),
            container_name: String::from("runtime"),
            port_name: String::from("http"),
            local_address: String::from("127.0.0.1"),
            local_port: 20001,
            container_port: 3000,
            ..ForwardedPort::default()
        }
    }

    fn description() -> ComponentDescription {
        ComponentDescription {
            devfile_path: PathBuf::from("/src/api/devfile.yaml"),
            name: String::from("api"),
            display_name: Some(String::from("Node.js Runtime")),
            project_type: None,
            language: None,
            supported_features: SupportedFeatures {
                dev: true,
                deploy: false,
                debug: true,
            },
            commands: vec![CommandSummary {
                name: String::from("run"),
                kind: "exec",
                group: Some(String::from("run")),
                is_default: true,
            }],
            components: Vec::new(),
            dev_forwarded_ports: vec![port()],
            running_in: RunningModes { dev: true, deploy: false },
            running_on: BTreeMap::from([(String::from("podman"), RunningModes { dev: true, deploy: false })]),
            managed_by: "astra",
        }
    }

    #[test]
    fn test_forwarded_ports_text() {
        let output = OutputFormatter::forwarded_ports_text(&[port()]);
        assert!(output.contains("127.0.0.1:20001"));
        assert!(output.contains("podman"));
        assert!(OutputFormatter::forwarded_ports_text(&[]).contains("No forwarded ports"));
    }

    #[test]
    fn test_description_text_and_json() {
        let text = OutputFormatter::new(OutputFormat::Text).format_description(&description());
        assert!(text.contains("Node.js Runtime"));
        assert!(text.contains("podman: Dev"));
        assert!(text.contains("127.0.0.1:20001"));

        let json = OutputFormatter::new(OutputFormat::Json).format_description(&description());
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["name"], "api");
        assert_eq!(value["supportedFeatures"]["debug"], true);
        assert_eq!(value["devForwardedPorts"][0]["localPort"], 20001);
    }

    #[test]
    fn test_resources_to_delete() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(String::from("api-app")),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        };
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let json = formatter.format_resources_to_delete("api", &[], Some(&pod));
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value[0]["platform"], "podman");
        assert_eq!(value[0]["name"], "api-app");

        let text = OutputFormatter::new(OutputFormat::Text).format_resources_to_delete("api", &[], None);
        assert!(text.contains("No resource found"));
    }
}
