//! Local port assignment for container endpoints.
//!
//! Shared by both platforms. Ports come from the user's explicit mapping
//! when one matches, otherwise from an ascending range that skips ports
//! already taken by other sessions and the container ports of the
//! component itself.

use std::collections::HashSet;

use crate::devfile::{is_debug_port, ContainerComponent, Endpoint, Exposure};
use crate::error::{ConfigError, DevfileError, PlatformError, Result};
use crate::state::{ForwardedPort, Platform};

/// First local port of the default range.
pub const DEFAULT_START_PORT: u16 = 20001;

/// Last local port of the default range.
pub const DEFAULT_END_PORT: u16 = 30001;

/// Address ports are bound on when none is given.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";

/// Inputs of [`assign`].
#[derive(Debug, Clone)]
pub struct PortOptions<'a> {
    /// Include debug endpoints.
    pub debug: bool,
    /// Pick ports at random in the range instead of in order.
    pub random: bool,
    /// Explicit mapping given by the user.
    pub custom: &'a [ForwardedPort],
    /// Local ports already taken.
    pub used: &'a [u16],
    /// Local address.
    pub address: &'a str,
    /// Platform recorded on the forwarded ports.
    pub platform: Platform,
    /// First port of the range.
    pub start: u16,
    /// Last port of the range, inclusive.
    pub end: u16,
}

impl Default for PortOptions<'_> {
    fn default() -> Self {
        Self {
            debug: false,
            random: false,
            custom: &[],
            used: &[],
            address: DEFAULT_ADDRESS,
            platform: Platform::Cluster,
            start: DEFAULT_START_PORT,
            end: DEFAULT_END_PORT,
        }
    }
}

const fn exposure_name(exposure: Exposure) -> &'static str {
    match exposure {
        Exposure::Public => "public",
        Exposure::Internal => "internal",
        Exposure::None => "none",
    }
}

/// Endpoints to forward for `container`: application endpoints first, then
/// debug endpoints when `debug` is set.
pub fn forwarded_endpoints(container: &ContainerComponent, debug: bool) -> Vec<&Endpoint> {
    let forwarded = container.endpoints.iter().filter(|e| e.exposure != Exposure::None);
    let (debug_eps, app_eps): (Vec<&Endpoint>, Vec<&Endpoint>) = forwarded.partition(|e| is_debug_port(&e.name));
    let mut endpoints = app_eps;
    if debug {
        endpoints.extend(debug_eps);
    }
    endpoints
}

/// Whether both lists forward the same endpoints, whatever the local ports.
#[must_use]
pub fn same_endpoints(a: &[ForwardedPort], b: &[ForwardedPort]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.container_name == y.container_name && x.port_name == y.port_name && x.container_port == y.container_port
        })
}

/// Matches a custom entry to an endpoint: an entry naming the container
/// first, then one giving only the container port.
fn custom_for<'a>(custom: &'a [ForwardedPort], container: &str, endpoint: &Endpoint) -> Option<&'a ForwardedPort> {
    let by_port = |c: &&ForwardedPort| c.container_port != 0 && c.container_port == endpoint.target_port;
    custom
        .iter()
        .filter(by_port)
        .find(|c| c.container_name == container)
        .or_else(|| custom.iter().filter(by_port).find(|c| c.container_name.is_empty()))
}

/// Picks a free port from the range.
struct PortPicker {
    taken: HashSet<u16>,
    next: u16,
    start: u16,
    end: u16,
    random: bool,
}

impl PortPicker {
    fn pick(&mut self) -> Result<u16> {
        let (start, end) = (self.start, self.end);
        let exhausted = || PlatformError::api(format!("no free port in range {start}-{end}")).into();
        let port = if self.random {
            let span = u128::from(self.end.saturating_sub(self.start)) + 1;
            let first = self.start + u16::try_from(uuid::Uuid::new_v4().as_u128() % span).unwrap_or(0);
            (first..=self.end)
                .chain(self.start..first)
                .find(|p| !self.taken.contains(p))
        } else {
            (self.next..=self.end).find(|p| !self.taken.contains(p))
        };
        let Some(port) = port else {
            return Err(exhausted());
        };
        self.taken.insert(port);
        self.next = port.saturating_add(1);
        Ok(port)
    }
}

/// Assigns local ports to the endpoints of `containers`.
///
/// Containers are visited in declaration order. Within a container,
/// application endpoints come before debug endpoints. The same inputs give
/// the same result unless `random` is set.
///
/// Custom entries without a container port are positional: they go, in
/// order, to the endpoints no other entry maps.
///
/// # Errors
///
/// Returns an error if the range is empty, if a custom mapping names a
/// container port no endpoint declares, or if the range has no free port
/// left.
pub fn assign(containers: &[(&str, &ContainerComponent)], options: &PortOptions<'_>) -> Result<Vec<ForwardedPort>> {
    if options.start > options.end {
        return Err(ConfigError::InvalidValue {
            name: String::from("port range"),
            value: format!("{}-{}", options.start, options.end),
        }
        .into());
    }
    for custom in options.custom.iter().filter(|c| c.container_port != 0) {
        let declared = containers
            .iter()
            .filter(|(name, _)| custom.container_name.is_empty() || custom.container_name == *name)
            .flat_map(|(_, c)| c.endpoints.iter())
            .any(|e| e.target_port == custom.container_port);
        if !declared {
            return Err(DevfileError::validation(
                format!("container port {} is not defined in the Devfile", custom.container_port),
                "endpoints",
            )
            .into());
        }
    }

    let container_ports = containers.iter().flat_map(|(_, c)| c.endpoints.iter().map(|e| e.target_port));
    let mut picker = PortPicker {
        taken: options
            .used
            .iter()
            .copied()
            .chain(options.custom.iter().map(|c| c.local_port))
            .chain(container_ports)
            .collect(),
        next: options.start,
        start: options.start,
        end: options.end,
        random: options.random,
    };

    let mut positional = options.custom.iter().filter(|c| c.container_port == 0);
    let mut ports = Vec::new();
    for (name, container) in containers {
        for endpoint in forwarded_endpoints(container, options.debug) {
            let local_port = match custom_for(options.custom, name, endpoint).or_else(|| positional.next()) {
                Some(custom) => custom.local_port,
                None => picker.pick()?,
            };
            ports.push(ForwardedPort {
                platform: Some(options.platform),
                container_name: (*name).to_string(),
                port_name: endpoint.name.clone(),
                is_debug: is_debug_port(&endpoint.name),
                local_address: options.address.to_string(),
                local_port,
                container_port: endpoint.target_port,
                exposure: Some(exposure_name(endpoint.exposure).to_string()),
                protocol: endpoint.protocol.clone(),
            });
        }
    }
    Ok(ports)
}

/// Parses `--port-forward` values: `LOCAL:CONTAINER`,
/// `CONTAINER_NAME:LOCAL:CONTAINER`, or a bare `LOCAL` taken positionally.
///
/// # Errors
///
/// Returns an error on a malformed value.
pub fn parse_port_forward(value: &str) -> Result<ForwardedPort> {
    let invalid = || {
        crate::error::ConfigError::InvalidValue {
            name: String::from("--port-forward"),
            value: value.to_string(),
        }
        .into()
    };
    let parts: Vec<&str> = value.split(':').collect();
    let (container_name, local, remote) = match parts.as_slice() {
        [local] => ("", *local, None),
        [local, remote] => ("", *local, Some(*remote)),
        [name, local, remote] => (*name, *local, Some(*remote)),
        _ => return Err(invalid()),
    };
    let container_port = match remote {
        Some(remote) => remote.parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(invalid)?,
        None => 0,
    };
    Ok(ForwardedPort {
        container_name: container_name.to_string(),
        local_port: local.parse().map_err(|_| invalid())?,
        container_port,
        ..ForwardedPort::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(endpoints: &[(&str, u16)]) -> ContainerComponent {
        ContainerComponent {
            image: String::from("node:20"),
            endpoints: endpoints
                .iter()
                .map(|(name, port)| Endpoint {
                    name: (*name).to_string(),
                    target_port: *port,
                    ..Endpoint::default()
                })
                .collect(),
            ..ContainerComponent::default()
        }
    }

    fn summary(ports: &[ForwardedPort]) -> Vec<(String, u16)> {
        ports.iter().map(|p| (p.port_name.clone(), p.local_port)).collect()
    }

    #[test]
    fn test_assignment_is_deterministic() {
        let runtime = container(&[("debug", 5858), ("http", 8080)]);
        let containers = [("runtime", &runtime)];
        let options = PortOptions {
            debug: true,
            ..PortOptions::default()
        };

        let first = assign(&containers, &options).expect("assign");
        assert_eq!(
            summary(&first),
            vec![(String::from("http"), 20001), (String::from("debug"), 20002)]
        );
        assert!(first[1].is_debug);
        assert_eq!(first, assign(&containers, &options).expect("assign"));
    }

    #[test]
    fn test_debug_endpoints_need_debug_mode() {
        let runtime = container(&[("http", 8080), ("debug", 5858)]);
        let ports = assign(&[("runtime", &runtime)], &PortOptions::default()).expect("assign");
        assert_eq!(summary(&ports), vec![(String::from("http"), 20001)]);
    }

    #[test]
    fn test_custom_mapping_is_honoured() {
        let runtime = container(&[("http", 8080), ("debug", 5858)]);
        let custom = [ForwardedPort {
            container_port: 8080,
            local_port: 8080,
            ..ForwardedPort::default()
        }];
        let options = PortOptions {
            debug: true,
            custom: &custom,
            ..PortOptions::default()
        };
        let ports = assign(&[("runtime", &runtime)], &options).expect("assign");
        assert_eq!(
            summary(&ports),
            vec![(String::from("http"), 8080), (String::from("debug"), 20001)]
        );
    }

    #[test]
    fn test_used_ports_are_skipped() {
        let runtime = container(&[("http", 8080), ("admin", 9000)]);
        let options = PortOptions {
            used: &[20001, 20003],
            ..PortOptions::default()
        };
        let ports = assign(&[("runtime", &runtime)], &options).expect("assign");
        assert_eq!(
            summary(&ports),
            vec![(String::from("http"), 20002), (String::from("admin"), 20004)]
        );
    }

    #[test]
    fn test_container_ports_are_never_local_ports() {
        let runtime = container(&[("http", 20001), ("debug", 20002), ("debug-1", 5858)]);
        let options = PortOptions {
            debug: true,
            ..PortOptions::default()
        };
        let ports = assign(&[("runtime", &runtime)], &options).expect("assign");
        assert_eq!(
            summary(&ports),
            vec![
                (String::from("http"), 20003),
                (String::from("debug"), 20004),
                (String::from("debug-1"), 20005)
            ]
        );
    }

    #[test]
    fn test_custom_mapping_across_containers() {
        let runtime = container(&[("http-8080", 8080), ("debug", 5858)]);
        let tools = container(&[("http-9000", 9000), ("http-5000", 5000)]);
        let custom = [
            ForwardedPort {
                local_port: 20001,
                container_port: 8080,
                ..ForwardedPort::default()
            },
            ForwardedPort {
                container_name: String::from("tools"),
                local_port: 20002,
                container_port: 9000,
                ..ForwardedPort::default()
            },
            ForwardedPort {
                local_port: 5000,
                container_port: 5000,
                ..ForwardedPort::default()
            },
        ];
        let options = PortOptions {
            debug: true,
            custom: &custom,
            ..PortOptions::default()
        };
        let ports = assign(&[("runtime", &runtime), ("tools", &tools)], &options).expect("assign");
        assert_eq!(
            summary(&ports),
            vec![
                (String::from("http-8080"), 20001),
                (String::from("debug"), 20003),
                (String::from("http-9000"), 20002),
                (String::from("http-5000"), 5000)
            ]
        );
    }

    #[test]
    fn test_named_custom_entry_wins_over_port_only_entry() {
        let runtime = container(&[("http", 8080)]);
        let custom = [
            ForwardedPort {
                local_port: 9001,
                container_port: 8080,
                ..ForwardedPort::default()
            },
            ForwardedPort {
                container_name: String::from("runtime"),
                local_port: 9002,
                container_port: 8080,
                ..ForwardedPort::default()
            },
        ];
        let options = PortOptions {
            custom: &custom,
            ..PortOptions::default()
        };
        let ports = assign(&[("runtime", &runtime)], &options).expect("assign");
        assert_eq!(summary(&ports), vec![(String::from("http"), 9002)]);
    }

    #[test]
    fn test_positional_custom_entries() {
        let runtime = container(&[("http", 8080), ("admin", 9000), ("metrics", 9100)]);
        let custom = [
            ForwardedPort {
                local_port: 9000,
                container_port: 9000,
                ..ForwardedPort::default()
            },
            parse_port_forward("3000").expect("parse"),
        ];
        let options = PortOptions {
            custom: &custom,
            ..PortOptions::default()
        };
        let ports = assign(&[("runtime", &runtime)], &options).expect("assign");
        assert_eq!(
            summary(&ports),
            vec![
                (String::from("http"), 3000),
                (String::from("admin"), 9000),
                (String::from("metrics"), 20001)
            ]
        );
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let runtime = container(&[("http", 8080)]);
        let options = PortOptions {
            random: true,
            start: 30001,
            end: 20001,
            ..PortOptions::default()
        };
        assert!(assign(&[("runtime", &runtime)], &options).is_err());
    }

    #[test]
    fn test_unknown_custom_port_is_rejected() {
        let runtime = container(&[("http", 8080)]);
        let custom = [ForwardedPort {
            container_port: 3000,
            local_port: 3000,
            ..ForwardedPort::default()
        }];
        let options = PortOptions {
            custom: &custom,
            ..PortOptions::default()
        };
        assert!(assign(&[("runtime", &runtime)], &options).is_err());
    }

    #[test]
    fn test_random_ports_stay_in_range() {
        let runtime = container(&[("http", 8080), ("admin", 9000)]);
        let options = PortOptions {
            random: true,
            start: 30000,
            end: 30001,
            ..PortOptions::default()
        };
        let mut ports: Vec<u16> = assign(&[("runtime", &runtime)], &options)
            .expect("assign")
            .iter()
            .map(|p| p.local_port)
            .collect();
        ports.sort_unstable();
        assert_eq!(ports, vec![30000, 30001]);
    }

    #[test]
    fn test_parse_port_forward() {
        let plain = parse_port_forward("3000:8080").expect("parse");
        assert_eq!((plain.local_port, plain.container_port), (3000, 8080));
        let named = parse_port_forward("runtime:3000:8080").expect("parse");
        assert_eq!(named.container_name, "runtime");
        let positional = parse_port_forward("3000").expect("parse");
        assert_eq!((positional.local_port, positional.container_port), (3000, 0));
        assert!(parse_port_forward("abc").is_err());
        assert!(parse_port_forward("3000:0").is_err());
    }
}
