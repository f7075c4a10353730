//! Parsing for the `-mode` and `-resource` CLI options into typed specs.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use fanrelay_core::endpoint::{Capability, Endpoint};
use fanrelay_core::error::EndpointError;

use crate::error::ConfigError;

/// Parsed `-mode KIND:OPT` value: where the coordinator listens for
/// downstream clients.
#[derive(Debug, Clone)]
pub enum ListenSpec {
    /// `TCP:<port>`. Binds all interfaces on that port.
    Tcp(u16),
    /// `UNIX:<path>`.
    Unix(PathBuf),
}

impl Default for ListenSpec {
    fn default() -> Self {
        Self::Tcp(6060)
    }
}

/// Parses a `-mode` value, e.g. `"TCP:6060"` or `"UNIX:/tmp/fanrelay.sock"`.
pub fn parse_listen_spec(s: &str) -> Result<ListenSpec, ConfigError> {
    let (kind, opt) = s
        .split_once(':')
        .ok_or_else(|| ConfigError::InvalidListenOption(s.to_string()))?;

    match kind {
        "TCP" => {
            let port = opt
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidListenOption(s.to_string()))?;
            Ok(ListenSpec::Tcp(port))
        }
        "UNIX" => {
            if opt.is_empty() {
                return Err(ConfigError::InvalidListenOption(s.to_string()));
            }
            Ok(ListenSpec::Unix(PathBuf::from(opt)))
        }
        "UDP" => Err(ConfigError::UnknownListenKind(
            "UDP listening is not supported".to_string(),
        )),
        other => Err(ConfigError::UnknownListenKind(other.to_string())),
    }
}

/// One upstream resource kind, address/path resolved but not yet opened.
#[derive(Debug, Clone)]
pub enum ResourceKind {
    Tcp(SocketAddr),
    Udp(SocketAddr),
    Unix(PathBuf),
    Fifo(PathBuf),
}

/// A fully parsed `-resource` entry: kind plus capability mode.
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    pub capability: Capability,
}

impl ResourceSpec {
    /// Builds the (unopened) endpoint this spec describes.
    #[must_use]
    pub fn into_endpoint(self) -> Endpoint {
        match self.kind {
            ResourceKind::Tcp(addr) => Endpoint::tcp(addr, self.capability),
            ResourceKind::Udp(addr) => Endpoint::udp(addr, self.capability),
            #[cfg(unix)]
            ResourceKind::Unix(path) => Endpoint::unix(path, self.capability),
            #[cfg(not(unix))]
            ResourceKind::Unix(_) => unreachable!("UNIX resources require a unix target"),
            ResourceKind::Fifo(path) => Endpoint::fifo(path, self.capability),
        }
    }
}

/// Parses the comma-separated `-resource` list into individual specs.
pub fn parse_resource_list(s: &str) -> Result<Vec<ResourceSpec>, ConfigError> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_resource_spec)
        .collect()
}

/// Parses one `TYPE:loc1[:loc2][:MODE]` resource entry.
pub fn parse_resource_spec(s: &str) -> Result<ResourceSpec, ConfigError> {
    let parts: Vec<&str> = s.split(':').collect();
    let spec_err = |reason: &str| ConfigError::InvalidResourceSpec {
        spec: s.to_string(),
        reason: reason.to_string(),
    };

    let kind_tag = *parts.first().ok_or_else(|| spec_err("empty resource spec"))?;

    match kind_tag {
        "TCP" | "UDP" => {
            let (ip_s, port_s, mode_s) = match parts.as_slice() {
                [_, ip, port] => (*ip, *port, None),
                [_, ip, port, mode] => (*ip, *port, Some(*mode)),
                _ => return Err(spec_err("expected TYPE:ip:port[:MODE]")),
            };
            let ip = ip_s
                .parse::<IpAddr>()
                .map_err(|_| spec_err("invalid IP address"))?;
            let port = port_s
                .parse::<u16>()
                .map_err(|_| spec_err("invalid port"))?;
            let capability = parse_capability(mode_s, s)?;
            let addr = SocketAddr::new(ip, port);
            let kind = if kind_tag == "TCP" {
                ResourceKind::Tcp(addr)
            } else {
                ResourceKind::Udp(addr)
            };
            Ok(ResourceSpec { kind, capability })
        }
        "UNIX" | "FIFO" => {
            let (path_s, mode_s) = match parts.as_slice() {
                [_, path] => (*path, None),
                [_, path, mode] => (*path, Some(*mode)),
                _ => return Err(spec_err("expected TYPE:path[:MODE]")),
            };
            if path_s.is_empty() {
                return Err(spec_err("empty path"));
            }
            if !(path_s.starts_with('/') || path_s.starts_with('.')) {
                return Err(EndpointError::WrongResourceInfo(format!(
                    "path {path_s:?} must begin with '/' or '.'"
                ))
                .into());
            }
            let capability = parse_capability(mode_s, s)?;
            let kind = if kind_tag == "UNIX" {
                ResourceKind::Unix(PathBuf::from(path_s))
            } else {
                ResourceKind::Fifo(PathBuf::from(path_s))
            };
            Ok(ResourceSpec { kind, capability })
        }
        other => Err(ConfigError::UnknownResourceType(other.to_string())),
    }
}

fn parse_capability(mode_s: Option<&str>, spec: &str) -> Result<Capability, ConfigError> {
    match mode_s {
        None => Ok(Capability::default()),
        Some(mode) => Capability::from_str(mode).map_err(|_| ConfigError::InvalidResourceSpec {
            spec: spec.to_string(),
            reason: format!("invalid mode {mode:?}, expected R/W/RW/WR"),
        }),
    }
}
