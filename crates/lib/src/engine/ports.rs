//! Port-mapping specs.
//!
//! Syntax: `[HOST_IP:][HOST_PORT:]CONTAINER_PORT[/PROTO]`, protocol
//! defaulting to tcp. Exposed-port keys use the engine's
//! `<port>/<proto>` form.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

/// Errors raised while parsing a port spec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
  #[error("invalid port spec '{spec}': bad port '{port}'")]
  InvalidPort { spec: String, port: String },

  #[error("invalid port spec '{spec}': unknown protocol '{proto}'")]
  InvalidProtocol { spec: String, proto: String },

  #[error("invalid port spec '{spec}': too many ':' separators")]
  TooManyParts { spec: String },
}

/// One host-side binding for an exposed container port.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortBinding {
  pub host_ip: Option<String>,
  /// `None` lets the engine pick an ephemeral host port.
  pub host_port: Option<String>,
}

/// Parsed port mappings for one container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortMap {
  /// Exposed container ports as `<port>/<proto>` keys.
  pub exposed: BTreeSet<String>,
  /// Host bindings per exposed port key.
  pub bindings: BTreeMap<String, Vec<PortBinding>>,
}

impl PortMap {
  pub fn is_empty(&self) -> bool {
    self.exposed.is_empty()
  }
}

fn parse_port(spec: &str, raw: &str) -> Result<u16, PortError> {
  raw.parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(|| {
    PortError::InvalidPort {
      spec: spec.to_string(),
      port: raw.to_string(),
    }
  })
}

/// Parse a sequence of port specs into a [`PortMap`].
pub fn parse_port_specs(specs: &[String]) -> Result<PortMap, PortError> {
  let mut map = PortMap::default();

  for spec in specs {
    let (addr, proto) = match spec.split_once('/') {
      Some((addr, proto)) => (addr, proto),
      None => (spec.as_str(), "tcp"),
    };
    if !matches!(proto, "tcp" | "udp" | "sctp") {
      return Err(PortError::InvalidProtocol {
        spec: spec.clone(),
        proto: proto.to_string(),
      });
    }

    let parts: Vec<&str> = addr.split(':').collect();
    let (host_ip, host_port, container_port) = match parts.as_slice() {
      [container] => (None, None, *container),
      [host, container] => (None, Some(*host), *container),
      [ip, host, container] => (Some(*ip), Some(*host), *container),
      _ => {
        return Err(PortError::TooManyParts { spec: spec.clone() });
      }
    };

    let container_port = parse_port(spec, container_port)?;
    let host_port = match host_port {
      Some("") | None => None,
      Some(raw) => Some(parse_port(spec, raw)?.to_string()),
    };

    let key = format!("{container_port}/{proto}");
    map.exposed.insert(key.clone());
    map.bindings.entry(key).or_default().push(PortBinding {
      host_ip: host_ip.map(str::to_string),
      host_port,
    });
  }

  Ok(map)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn specs(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn empty_specs() {
    let map = parse_port_specs(&[]).unwrap();
    assert!(map.is_empty());
  }

  #[test]
  fn host_and_container_port() {
    let map = parse_port_specs(&specs(&["8080:80/tcp"])).unwrap();

    assert!(map.exposed.contains("80/tcp"));
    let bindings = &map.bindings["80/tcp"];
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].host_port.as_deref(), Some("8080"));
    assert_eq!(bindings[0].host_ip, None);
  }

  #[test]
  fn protocol_defaults_to_tcp() {
    let map = parse_port_specs(&specs(&["8080:80"])).unwrap();
    assert!(map.exposed.contains("80/tcp"));
  }

  #[test]
  fn container_port_only_gets_ephemeral_binding() {
    let map = parse_port_specs(&specs(&["53/udp"])).unwrap();

    assert!(map.exposed.contains("53/udp"));
    assert_eq!(map.bindings["53/udp"][0].host_port, None);
  }

  #[test]
  fn host_ip_is_carried() {
    let map = parse_port_specs(&specs(&["127.0.0.1:8443:443"])).unwrap();

    let binding = &map.bindings["443/tcp"][0];
    assert_eq!(binding.host_ip.as_deref(), Some("127.0.0.1"));
    assert_eq!(binding.host_port.as_deref(), Some("8443"));
  }

  #[test]
  fn host_ip_with_empty_host_port() {
    let map = parse_port_specs(&specs(&["127.0.0.1::80"])).unwrap();

    let binding = &map.bindings["80/tcp"][0];
    assert_eq!(binding.host_ip.as_deref(), Some("127.0.0.1"));
    assert_eq!(binding.host_port, None);
  }

  #[test]
  fn multiple_bindings_for_one_port() {
    let map = parse_port_specs(&specs(&["8080:80", "8081:80"])).unwrap();

    assert_eq!(map.exposed.len(), 1);
    assert_eq!(map.bindings["80/tcp"].len(), 2);
  }

  #[test]
  fn bad_port_is_rejected() {
    let result = parse_port_specs(&specs(&["eighty:80"]));
    assert!(matches!(result, Err(PortError::InvalidPort { .. })));

    let result = parse_port_specs(&specs(&["8080:0"]));
    assert!(matches!(result, Err(PortError::InvalidPort { .. })));
  }

  #[test]
  fn bad_protocol_is_rejected() {
    let result = parse_port_specs(&specs(&["80/icmp"]));
    assert!(matches!(result, Err(PortError::InvalidProtocol { .. })));
  }

  #[test]
  fn too_many_separators_is_rejected() {
    let result = parse_port_specs(&specs(&["a:b:c:80"]));
    assert!(matches!(result, Err(PortError::TooManyParts { .. })));
  }
}
