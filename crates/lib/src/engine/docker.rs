//! Docker implementation of [`EngineClient`] on top of bollard.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use bollard::container::{
  Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
  NetworkingConfig, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointSettings, HealthConfig, HealthStatusEnum, HostConfig};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions, RemoveVolumeOptions};
use bollard::{ClientVersion, Docker};
use futures_util::TryStreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::types::{
  ContainerDetail, ContainerSpec, ContainerSummary, HealthStatus, ImageDetail, NetworkRecord,
  NetworkSpec, VolumeRecord, VolumeSpec,
};
use crate::engine::{EngineClient, EngineError};

const DOCKER_SOCKET: &str = "unix:///var/run/docker.sock";
const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Engine client backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerEngine {
  docker: Docker,
}

impl DockerEngine {
  /// Connect to the local daemon.
  ///
  /// With `api_version` set the client is pinned to that version;
  /// otherwise the version is negotiated with the daemon.
  pub async fn connect(api_version: Option<&str>) -> Result<Self, EngineError> {
    let docker = match api_version {
      Some(pin) => {
        debug!(version = pin, "pinning engine api version");
        let version = parse_client_version(pin)?;
        Docker::connect_with_unix(DOCKER_SOCKET, CONNECT_TIMEOUT_SECS, &version)
          .map_err(map_engine_err)?
      }
      None => {
        let docker = Docker::connect_with_local_defaults().map_err(map_engine_err)?;
        docker.negotiate_version().await.map_err(map_engine_err)?
      }
    };
    Ok(Self { docker })
  }
}

fn parse_client_version(pin: &str) -> Result<ClientVersion, EngineError> {
  let parsed = pin.split_once('.').and_then(|(major, minor)| {
    Some(ClientVersion {
      major_version: major.parse().ok()?,
      minor_version: minor.parse().ok()?,
    })
  });
  parsed.ok_or_else(|| EngineError::Api(format!("invalid api version pin '{pin}'")))
}

fn map_engine_err(err: bollard::errors::Error) -> EngineError {
  match err {
    bollard::errors::Error::DockerResponseServerError {
      status_code: 404,
      message,
    } => EngineError::NotFound(message),
    bollard::errors::Error::DockerResponseServerError {
      status_code: 409,
      message,
    } => EngineError::Conflict(message),
    bollard::errors::Error::DockerResponseServerError {
      status_code,
      message,
    } => EngineError::Api(format!("status {status_code}: {message}")),
    other => EngineError::Unavailable(other.to_string()),
  }
}

/// Run an engine call, aborting early when cancellation is requested.
async fn with_cancel<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, EngineError>
where
  F: Future<Output = Result<T, bollard::errors::Error>>,
{
  tokio::select! {
    _ = cancel.cancelled() => Err(EngineError::Cancelled),
    result = fut => result.map_err(map_engine_err),
  }
}

fn label_filters(label_selector: &str) -> HashMap<String, Vec<String>> {
  HashMap::from([("label".to_string(), vec![label_selector.to_string()])])
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
  let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
    .ports
    .exposed
    .iter()
    .map(|key| (key.clone(), HashMap::new()))
    .collect();

  let port_bindings: HashMap<String, Option<Vec<bollard::models::PortBinding>>> = spec
    .ports
    .bindings
    .iter()
    .map(|(key, bindings)| {
      let mapped = bindings
        .iter()
        .map(|b| bollard::models::PortBinding {
          host_ip: b.host_ip.clone(),
          host_port: b.host_port.clone(),
        })
        .collect();
      (key.clone(), Some(mapped))
    })
    .collect();

  let healthcheck = spec.healthcheck.as_ref().map(|check| HealthConfig {
    test: Some(check.test.clone()),
    interval: Some(check.interval.as_nanos() as i64),
    timeout: Some(check.timeout.as_nanos() as i64),
    retries: Some(i64::from(check.retries)),
    start_period: Some(check.start_period.as_nanos() as i64),
    ..Default::default()
  });

  let host_config = HostConfig {
    binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
    port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
    ..Default::default()
  };

  let networking_config = (!spec.endpoints.is_empty()).then(|| NetworkingConfig {
    endpoints_config: spec
      .endpoints
      .iter()
      .map(|endpoint| {
        (
          endpoint.network.clone(),
          EndpointSettings {
            aliases: Some(endpoint.aliases.clone()),
            ..Default::default()
          },
        )
      })
      .collect(),
  });

  Config {
    image: Some(spec.image.clone()),
    env: (!spec.env.is_empty()).then(|| spec.env.clone()),
    cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
    exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
    labels: Some(spec.labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
    healthcheck,
    host_config: Some(host_config),
    networking_config,
    ..Default::default()
  }
}

#[async_trait]
impl EngineClient for DockerEngine {
  async fn ping(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
    with_cancel(cancel, self.docker.ping()).await?;
    Ok(())
  }

  async fn list_containers(
    &self,
    label_selector: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<ContainerSummary>, EngineError> {
    let options = ListContainersOptions::<String> {
      all: true,
      filters: label_filters(label_selector),
      ..Default::default()
    };
    let listed = with_cancel(cancel, self.docker.list_containers(Some(options))).await?;

    Ok(
      listed
        .into_iter()
        .map(|c| ContainerSummary {
          id: c.id.unwrap_or_default(),
          name: c
            .names
            .unwrap_or_default()
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
          image: c.image.unwrap_or_default(),
          image_id: c.image_id.unwrap_or_default(),
          state: c.state.unwrap_or_default(),
          labels: c.labels.unwrap_or_default(),
        })
        .collect(),
    )
  }

  async fn inspect_container(
    &self,
    id: &str,
    cancel: &CancellationToken,
  ) -> Result<ContainerDetail, EngineError> {
    let detail = with_cancel(
      cancel,
      self
        .docker
        .inspect_container(id, None::<InspectContainerOptions>),
    )
    .await?;

    let health = detail
      .state
      .and_then(|state| state.health)
      .and_then(|health| health.status)
      .and_then(|status| match status {
        HealthStatusEnum::STARTING => Some(HealthStatus::Starting),
        HealthStatusEnum::HEALTHY => Some(HealthStatus::Healthy),
        HealthStatusEnum::UNHEALTHY => Some(HealthStatus::Unhealthy),
        HealthStatusEnum::NONE | HealthStatusEnum::EMPTY => None,
      });

    Ok(ContainerDetail {
      id: detail.id.unwrap_or_default(),
      health,
    })
  }

  async fn create_container(
    &self,
    spec: ContainerSpec,
    cancel: &CancellationToken,
  ) -> Result<String, EngineError> {
    let options = CreateContainerOptions {
      name: spec.name.clone(),
      platform: None,
    };
    let config = container_config(&spec);
    let response = with_cancel(
      cancel,
      self.docker.create_container(Some(options), config),
    )
    .await?;
    Ok(response.id)
  }

  async fn start_container(
    &self,
    id: &str,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    with_cancel(
      cancel,
      self
        .docker
        .start_container(id, None::<StartContainerOptions<String>>),
    )
    .await
  }

  async fn stop_container(&self, id: &str, cancel: &CancellationToken) -> Result<(), EngineError> {
    with_cancel(
      cancel,
      self.docker.stop_container(id, None::<StopContainerOptions>),
    )
    .await
  }

  async fn remove_container(
    &self,
    id: &str,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    with_cancel(
      cancel,
      self
        .docker
        .remove_container(id, None::<RemoveContainerOptions>),
    )
    .await
  }

  async fn pull_image(&self, image: &str, cancel: &CancellationToken) -> Result<(), EngineError> {
    let options = CreateImageOptions::<String> {
      from_image: image.to_string(),
      ..Default::default()
    };
    let drain = async {
      let mut stream = self.docker.create_image(Some(options), None, None);
      while stream.try_next().await?.is_some() {}
      Ok(())
    };
    with_cancel(cancel, drain).await
  }

  async fn inspect_image(
    &self,
    image: &str,
    cancel: &CancellationToken,
  ) -> Result<ImageDetail, EngineError> {
    let inspected = with_cancel(cancel, self.docker.inspect_image(image)).await?;
    Ok(ImageDetail {
      id: inspected.id.unwrap_or_default(),
    })
  }

  async fn list_networks(
    &self,
    label_selector: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<NetworkRecord>, EngineError> {
    let options = ListNetworksOptions::<String> {
      filters: label_filters(label_selector),
    };
    let listed = with_cancel(cancel, self.docker.list_networks(Some(options))).await?;

    Ok(
      listed
        .into_iter()
        .map(|n| NetworkRecord {
          id: n.id.unwrap_or_default(),
          name: n.name.unwrap_or_default(),
          labels: n.labels.unwrap_or_default(),
        })
        .collect(),
    )
  }

  async fn create_network(
    &self,
    name: &str,
    spec: NetworkSpec,
    cancel: &CancellationToken,
  ) -> Result<String, EngineError> {
    let options = CreateNetworkOptions::<String> {
      name: name.to_string(),
      driver: spec.driver.unwrap_or_else(|| "bridge".to_string()),
      labels: spec.labels.into_iter().collect(),
      ..Default::default()
    };
    with_cancel(cancel, self.docker.create_network(options)).await?;
    Ok(name.to_string())
  }

  async fn remove_network(&self, id: &str, cancel: &CancellationToken) -> Result<(), EngineError> {
    with_cancel(cancel, self.docker.remove_network(id)).await
  }

  async fn list_volumes(
    &self,
    label_selector: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<VolumeRecord>, EngineError> {
    let options = ListVolumesOptions::<String> {
      filters: label_filters(label_selector),
    };
    let response = with_cancel(cancel, self.docker.list_volumes(Some(options))).await?;

    Ok(
      response
        .volumes
        .unwrap_or_default()
        .into_iter()
        .map(|v| VolumeRecord {
          name: v.name,
          labels: v.labels,
        })
        .collect(),
    )
  }

  async fn create_volume(
    &self,
    name: &str,
    spec: VolumeSpec,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    let options = CreateVolumeOptions::<String> {
      name: name.to_string(),
      driver: spec.driver.unwrap_or_else(|| "local".to_string()),
      labels: spec.labels.into_iter().collect(),
      ..Default::default()
    };
    with_cancel(cancel, self.docker.create_volume(options)).await?;
    Ok(())
  }

  async fn remove_volume(
    &self,
    name: &str,
    force: bool,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    let options = RemoveVolumeOptions { force };
    with_cancel(cancel, self.docker.remove_volume(name, Some(options))).await
  }
}
