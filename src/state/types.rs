//! Devstate content.
//!
//! One JSON document per `astra dev` process, listing the forwarded ports
//! and the API server port of the session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Platform a dev session runs on.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// A Kubernetes or OpenShift cluster.
    #[default]
    Cluster,
    /// Local Podman.
    Podman,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => write!(f, "cluster"),
            Self::Podman => write!(f, "podman"),
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cluster" => Ok(Self::Cluster),
            "podman" => Ok(Self::Podman),
            other => Err(format!("unknown platform {other:?}, expected cluster or podman")),
        }
    }
}

/// A local port forwarded to a container port.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedPort {
    /// Platform of the session that forwards the port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// Container the port belongs to.
    pub container_name: String,
    /// Endpoint name.
    pub port_name: String,
    /// Whether the endpoint is a debug endpoint.
    pub is_debug: bool,
    /// Local address the port is bound on.
    pub local_address: String,
    /// Local port.
    pub local_port: u16,
    /// Container port.
    pub container_port: u16,
    /// Endpoint exposure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure: Option<String>,
    /// Endpoint protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl fmt::Display for ForwardedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} -> {}", self.local_address, self.local_port, self.container_port)
    }
}

/// Content of a devstate file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    /// PID of the owning process, 0 once the session has exited.
    pub pid: u32,
    /// Platform of the session.
    pub platform: Platform,
    /// Ports forwarded by the session.
    #[serde(default)]
    pub forwarded_ports: Vec<ForwardedPort>,
    /// Port of the local API server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_json_shape() {
        let content = Content {
            pid: 42,
            platform: Platform::Podman,
            forwarded_ports: vec![ForwardedPort {
                platform: Some(Platform::Podman),
                container_name: String::from("runtime"),
                port_name: String::from("http"),
                local_address: String::from("127.0.0.1"),
                local_port: 20001,
                container_port: 8080,
                ..Default::default()
            }],
            api_server_port: None,
        };

        let json: serde_json::Value = serde_json::to_value(&content).expect("serialize");
        assert_eq!(json["pid"], 42);
        assert_eq!(json["platform"], "podman");
        assert_eq!(json["forwardedPorts"][0]["containerName"], "runtime");
        assert_eq!(json["forwardedPorts"][0]["localPort"], 20001);
        assert_eq!(json["forwardedPorts"][0]["isDebug"], false);
        assert!(json.get("apiServerPort").is_none());
        assert!(json["forwardedPorts"][0].get("exposure").is_none());
    }

    #[test]
    fn test_platform_from_str() {
        assert_eq!("podman".parse::<Platform>(), Ok(Platform::Podman));
        assert!("docker".parse::<Platform>().is_err());
    }
}
