//! # Errors
//!
//! Error taxonomy for provisioning and tearing down the backing cluster.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T, E = EnvtestError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EnvtestError {
    #[error("failed to connect to container engine: {0}")]
    EngineConnection(#[source] bollard::errors::Error),

    #[error("failed to pull image {image}: {source}")]
    ImagePull {
        image: String,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("invalid port specification {port:?}: {reason}")]
    PortSpec { port: String, reason: String },

    #[error("failed to create container from {image}: {source}")]
    ContainerCreate {
        image: String,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("failed to start container {id}: {source}")]
    ContainerStart {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("failed to inspect container {id}: {source}")]
    ContainerInspect {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("no host port bound to {port} on container {id}")]
    PortResolution { id: String, port: String },

    #[error("cluster did not become available")]
    ClusterNotReady { url: String, attempts: u32 },

    #[error("invalid cluster url {url}: {reason}")]
    ClusterConfig { url: String, reason: String },

    #[error("CRD path does not exist: {}", .0.display())]
    CrdPathMissing(PathBuf),

    #[error("failed to read CRD manifest {}: {reason}", .path.display())]
    CrdManifest { path: PathBuf, reason: String },

    #[error("failed to install CRDs: {0}")]
    CrdInstall(String),

    #[error("failed to stop container {id}: {source}")]
    ContainerStop {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("failed to remove container {id}: {source}")]
    ContainerRemove {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("environment has not been started")]
    NotStarted,

    #[error("environment already started with container {0}")]
    AlreadyStarted(String),

    #[error("container {0} has already been stopped")]
    AlreadyStopped(String),
}
