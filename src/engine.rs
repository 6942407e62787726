//! # Container Engine
//!
//! Thin seam over the Docker Engine API used to run the K3s container.
//!
//! [`ContainerEngine`] carries exactly the calls the environment lifecycle needs,
//! so tests can substitute a recording engine. [`DockerEngine`] is the bollard-backed
//! implementation connected from ambient settings (`DOCKER_HOST`, local socket).

use crate::error::{EnvtestError, Result};
use crate::port::PortSpec;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerCreateResponse, ContainerInspectResponse, HostConfig, PortBinding,
};
use bollard::Docker;
use futures::TryStreamExt;
use std::collections::HashMap;
use tracing::{debug, info};

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Pull `image`, returning once the pull stream is exhausted
    async fn pull_image(&self, image: &str) -> Result<(), DockerError>;

    /// Create a container with an engine-assigned name
    async fn create_container(
        &self,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, DockerError>;

    async fn start_container(&self, id: &str) -> Result<(), DockerError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspectResponse, DockerError>;

    /// Stop using the engine's default grace period
    async fn stop_container(&self, id: &str) -> Result<(), DockerError>;

    async fn remove_container(
        &self,
        id: &str,
        options: RemoveContainerOptions,
    ) -> Result<(), DockerError>;
}

/// Docker Engine API client
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Wrap an already configured bollard client
    #[must_use]
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect using ambient settings and verify the daemon answers
    ///
    /// # Errors
    ///
    /// Returns [`EnvtestError::EngineConnection`] when the client cannot be built or the
    /// daemon does not respond to a ping.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(EnvtestError::EngineConnection)?;
        docker.ping().await.map_err(EnvtestError::EngineConnection)?;
        debug!("Connected to container engine");
        Ok(Self::new(docker))
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn pull_image(&self, image: &str) -> Result<(), DockerError> {
        info!(image = %image, "Pulling image");

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.try_next().await? {
            if let Some(status) = progress.status {
                debug!(image = %image, status = %status, "Pull progress");
            }
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    async fn create_container(
        &self,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, DockerError> {
        self.docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspectResponse, DockerError> {
        self.docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
    }

    async fn stop_container(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
    }

    async fn remove_container(
        &self,
        id: &str,
        options: RemoveContainerOptions,
    ) -> Result<(), DockerError> {
        self.docker.remove_container(id, Some(options)).await
    }
}

/// K3s server command line with the insecure API server pinned to `spec` and `bind_address`
#[must_use]
pub fn container_command(spec: PortSpec, bind_address: &str) -> Vec<String> {
    vec![
        "server".to_string(),
        "--kube-apiserver-arg".to_string(),
        format!("insecure-port={}", spec.port()),
        "--kube-apiserver-arg".to_string(),
        format!("insecure-bind-address={bind_address}"),
    ]
}

/// Container and host configuration for the K3s container
///
/// Privileged (K3s runs containerd inside) with the insecure port exposed and bound to
/// an engine-chosen host port on `bind_address`.
#[must_use]
pub fn container_config(image: &str, spec: PortSpec, bind_address: &str) -> Config<String> {
    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(spec.key(), HashMap::new());

    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        spec.key(),
        Some(vec![PortBinding {
            host_ip: Some(bind_address.to_string()),
            host_port: None,
        }]),
    );

    Config {
        image: Some(image.to_string()),
        cmd: Some(container_command(spec, bind_address)),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            privileged: Some(true),
            port_bindings: Some(port_bindings),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Removal flags used on teardown: volumes, force, and links unless disabled
#[must_use]
pub fn removal_options(remove_links: bool) -> RemoveContainerOptions {
    RemoveContainerOptions {
        v: true,
        force: true,
        link: remove_links,
    }
}
