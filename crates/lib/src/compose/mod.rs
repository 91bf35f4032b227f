//! Composition manifest: parsing and validation.
//!
//! The manifest is YAML in the compose dialect the reconciler
//! understands (services, networks, volumes). Parsing produces a
//! [`Composition`]; [`validate`] then checks the semantic invariants
//! before any engine action is taken:
//!
//! 1. service names are non-empty and `[A-Za-z0-9_.-]+`
//! 2. every service has a non-empty image reference
//! 3. every `depends_on` target is a declared service
//! 4. the dependency graph is acyclic
//! 5. every service network is declared in the `networks` map
//! 6. every named-volume binding source is declared in the `volumes` map
//! 7. healthcheck durations parse

pub mod types;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::order::{resolve_order, OrderError};

pub use types::{Composition, DurationError, HealthCheck, Network, Service, Volume};

/// Errors raised while reading, parsing or validating a manifest.
#[derive(Debug, Error)]
pub enum ComposeError {
  #[error("failed to read compose file '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse compose file: {0}")]
  Yaml(#[from] serde_yaml::Error),

  #[error("invalid service name '{0}'")]
  InvalidServiceName(String),

  #[error("service '{0}' has no image reference")]
  MissingImage(String),

  #[error(transparent)]
  Order(#[from] OrderError),

  #[error("service '{service}' attaches to undeclared network '{network}'")]
  UndeclaredNetwork { service: String, network: String },

  #[error("service '{service}' mounts undeclared volume '{volume}'")]
  UndeclaredVolume { service: String, volume: String },

  #[error("service '{service}' healthcheck: {source}")]
  Healthcheck {
    service: String,
    #[source]
    source: DurationError,
  },
}

/// Read, parse and validate the manifest at `path`.
pub fn load_composition(path: &Path) -> Result<Composition, ComposeError> {
  let raw = std::fs::read_to_string(path).map_err(|e| ComposeError::Read {
    path: path.to_path_buf(),
    source: e,
  })?;
  parse_composition(&raw)
}

/// Parse and validate manifest text.
pub fn parse_composition(raw: &str) -> Result<Composition, ComposeError> {
  let composition: Composition = serde_yaml::from_str(raw)?;
  validate(&composition)?;
  Ok(composition)
}

fn valid_service_name(name: &str) -> bool {
  !name.is_empty()
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Whether a volume binding source refers to a declared named volume
/// rather than a host path.
pub fn is_named_volume(source: &str) -> bool {
  !source.starts_with('/') && !source.starts_with('.')
}

/// Check the semantic invariants of a parsed composition.
pub fn validate(composition: &Composition) -> Result<(), ComposeError> {
  for (name, service) in &composition.services {
    if !valid_service_name(name) {
      return Err(ComposeError::InvalidServiceName(name.clone()));
    }
    if service.image.is_empty() {
      return Err(ComposeError::MissingImage(name.clone()));
    }

    for network in &service.networks {
      if !composition.networks.contains_key(network) {
        return Err(ComposeError::UndeclaredNetwork {
          service: name.clone(),
          network: network.clone(),
        });
      }
    }

    for binding in &service.volumes {
      // Malformed bindings (no ':') are skipped at create time.
      let Some((source, _target)) = binding.split_once(':') else {
        continue;
      };
      if is_named_volume(source) && !composition.volumes.contains_key(source) {
        return Err(ComposeError::UndeclaredVolume {
          service: name.clone(),
          volume: source.to_string(),
        });
      }
    }

    if let Some(check) = &service.healthcheck {
      let wrap = |source| ComposeError::Healthcheck {
        service: name.clone(),
        source,
      };
      check.interval().map_err(wrap)?;
      check.timeout().map_err(wrap)?;
      check.start_period().map_err(wrap)?;
    }
  }

  // Dependency references and cycles are both surfaced by the resolver.
  let deps = composition
    .services
    .iter()
    .map(|(name, service)| (name.clone(), service.depends_on.iter().cloned().collect()))
    .collect();
  resolve_order(&deps)?;

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const BASIC_MANIFEST: &str = r#"
services:
  web:
    image: nginx:1
    ports:
      - "8080:80"
    networks:
      - frontend
    depends_on:
      - api
  api:
    image: registry.example.com/acme/api:2.4
    environment:
      - RUST_LOG=info
    volumes:
      - data:/var/lib/api
      - /srv/certs:/etc/certs:ro
    healthcheck:
      test: ["CMD", "curl", "-f", "http://localhost/health"]
      interval: 10s
      timeout: 2s
      retries: 3
networks:
  frontend:
    driver: bridge
volumes:
  data: {}
"#;

  #[test]
  fn parse_basic_manifest() {
    let composition = parse_composition(BASIC_MANIFEST).unwrap();

    assert_eq!(composition.services.len(), 2);
    assert_eq!(composition.networks.len(), 1);
    assert_eq!(composition.volumes.len(), 1);

    let web = &composition.services["web"];
    assert_eq!(web.image, "nginx:1");
    assert_eq!(web.ports, vec!["8080:80"]);
    assert_eq!(web.depends_on.len(), 1);
    assert!(web.depends_on.contains("api"));

    let api = &composition.services["api"];
    assert!(api.has_healthcheck());
    assert_eq!(api.environment, vec!["RUST_LOG=info"]);
  }

  #[test]
  fn empty_manifest_parses() {
    let composition = parse_composition("{}").unwrap();
    assert!(composition.services.is_empty());
  }

  #[test]
  fn unknown_dependency_is_rejected() {
    let result = parse_composition(
      r#"
services:
  web:
    image: nginx:1
    depends_on: [db]
"#,
    );
    assert!(matches!(
      result,
      Err(ComposeError::Order(OrderError::UnknownDependency { .. }))
    ));
  }

  #[test]
  fn dependency_cycle_is_rejected() {
    let result = parse_composition(
      r#"
services:
  a:
    image: img:1
    depends_on: [b]
  b:
    image: img:1
    depends_on: [a]
"#,
    );
    assert!(matches!(
      result,
      Err(ComposeError::Order(OrderError::CycleDetected(_)))
    ));
  }

  #[test]
  fn repeated_dependencies_collapse_to_one() {
    let composition = parse_composition(
      r#"
services:
  db:
    image: pg:15
  api:
    image: api:1
    depends_on: [db, db]
"#,
    )
    .unwrap();
    assert_eq!(composition.services["api"].depends_on.len(), 1);
  }

  #[test]
  fn undeclared_network_is_rejected() {
    let result = parse_composition(
      r#"
services:
  web:
    image: nginx:1
    networks: [frontend]
"#,
    );
    assert!(matches!(result, Err(ComposeError::UndeclaredNetwork { .. })));
  }

  #[test]
  fn undeclared_named_volume_is_rejected() {
    let result = parse_composition(
      r#"
services:
  web:
    image: nginx:1
    volumes:
      - data:/var/lib/web
"#,
    );
    assert!(matches!(result, Err(ComposeError::UndeclaredVolume { .. })));
  }

  #[test]
  fn host_path_bindings_need_no_declaration() {
    let manifest = r#"
services:
  web:
    image: nginx:1
    volumes:
      - /srv/web:/usr/share/nginx/html
      - ./conf:/etc/nginx/conf.d
"#;
    assert!(parse_composition(manifest).is_ok());
  }

  #[test]
  fn missing_image_is_rejected() {
    let result = parse_composition(
      r#"
services:
  web: {}
"#,
    );
    assert!(matches!(result, Err(ComposeError::MissingImage(_))));
  }

  #[test]
  fn invalid_service_name_is_rejected() {
    let result = parse_composition(
      r#"
services:
  "web app":
    image: nginx:1
"#,
    );
    assert!(matches!(result, Err(ComposeError::InvalidServiceName(_))));
  }

  #[test]
  fn malformed_healthcheck_duration_is_rejected() {
    let result = parse_composition(
      r#"
services:
  db:
    image: pg:15
    healthcheck:
      test: ["CMD", "pg_isready"]
      interval: whenever
"#,
    );
    assert!(matches!(result, Err(ComposeError::Healthcheck { .. })));
  }
}
