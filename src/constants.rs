//! # Constants
//!
//! Defaults shared by the environment, the CLI and the tests.
//!
//! These values represent the known-good K3s setup and can be overridden via
//! [`EnvironmentConfig`](crate::config::EnvironmentConfig) or environment variables.

/// Image used when the caller does not pick one
pub const DEFAULT_IMAGE: &str = "docker.io/rancher/k3s:v0.4.0";

/// Insecure API server port inside the K3s container
pub const DEFAULT_INSECURE_PORT: &str = "8080";

/// Insecure bind address of the API server, also used as the host binding IP
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Delay between two `/healthz` probes (seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Number of `/healthz` probes before giving up
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 20;

/// How long to wait for installed CRDs to become established (seconds)
pub const DEFAULT_CRD_READY_TIMEOUT_SECS: u64 = 10;

/// Health endpoint path of the API server
pub const HEALTH_PATH: &str = "/healthz";

/// Host used when building the API server URL from the resolved port
pub const API_HOST: &str = "localhost";

/// Field manager for server-side apply of CRDs
pub const FIELD_MANAGER: &str = "k3s-envtest";

/// Manifest file extensions picked up from CRD directories
pub const CRD_FILE_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];
