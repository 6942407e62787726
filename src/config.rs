//! # Environment Configuration
//!
//! Tunables for provisioning the backing cluster, loaded from environment variables.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// What to do when CRD installation fails after the cluster became ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrdInstallPolicy {
    /// Fail `start` with the installation error
    #[default]
    Propagate,
    /// Log the failure and hand the connection config back anyway
    BestEffort,
}

impl CrdInstallPolicy {
    /// Get string representation as accepted by `ENVTEST_CRD_INSTALL_POLICY`
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CrdInstallPolicy::Propagate => "propagate",
            CrdInstallPolicy::BestEffort => "best-effort",
        }
    }
}

impl fmt::Display for CrdInstallPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrdInstallPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "propagate" => Ok(CrdInstallPolicy::Propagate),
            "best-effort" => Ok(CrdInstallPolicy::BestEffort),
            other => Err(format!("unknown CRD install policy: {other}")),
        }
    }
}

/// Environment-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables,
/// which lets CI tune timeouts without touching test code.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Container image running K3s
    pub image: String,
    /// Insecure API server port inside the container (textual, e.g. "8080")
    pub insecure_port: String,
    /// Insecure bind address for the API server and the host port binding
    pub bind_address: String,
    /// Delay between readiness probes (seconds)
    pub poll_interval_secs: u64,
    /// Maximum readiness probes before `start` fails
    pub max_poll_attempts: u32,
    /// Whether CRD installation failures fail `start`
    pub crd_install_policy: CrdInstallPolicy,
    /// Tear the container down when `start` fails after creating it
    pub cleanup_on_failure: bool,
    /// Request link removal when removing the container
    pub remove_links: bool,
    /// How long to wait for CRDs to report `Established` (seconds)
    pub crd_ready_timeout_secs: u64,
    /// Fail instead of skipping when a CRD path does not exist
    pub error_if_crd_path_missing: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            image: DEFAULT_IMAGE.to_string(),
            insecure_port: DEFAULT_INSECURE_PORT.to_string(),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            crd_install_policy: CrdInstallPolicy::default(),
            cleanup_on_failure: false,
            remove_links: true,
            crd_ready_timeout_secs: DEFAULT_CRD_READY_TIMEOUT_SECS,
            error_if_crd_path_missing: false,
        }
    }
}

impl EnvironmentConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_or(&Self::default())
    }

    /// Load configuration from environment variables, falling back to `defaults`
    /// for anything unset or unparseable
    #[must_use]
    pub fn from_env_or(defaults: &Self) -> Self {
        Self {
            image: env_var_or_default_str("ENVTEST_IMAGE", &defaults.image),
            insecure_port: env_var_or_default_str("ENVTEST_INSECURE_PORT", &defaults.insecure_port),
            bind_address: env_var_or_default_str("ENVTEST_BIND_ADDRESS", &defaults.bind_address),
            poll_interval_secs: env_var_or_default(
                "ENVTEST_POLL_INTERVAL_SECS",
                defaults.poll_interval_secs,
            ),
            max_poll_attempts: env_var_or_default(
                "ENVTEST_MAX_POLL_ATTEMPTS",
                defaults.max_poll_attempts,
            ),
            crd_install_policy: env_var_or_default(
                "ENVTEST_CRD_INSTALL_POLICY",
                defaults.crd_install_policy,
            ),
            cleanup_on_failure: env_var_or_default_bool(
                "ENVTEST_CLEANUP_ON_FAILURE",
                defaults.cleanup_on_failure,
            ),
            remove_links: env_var_or_default_bool("ENVTEST_REMOVE_LINKS", defaults.remove_links),
            crd_ready_timeout_secs: env_var_or_default(
                "ENVTEST_CRD_READY_TIMEOUT_SECS",
                defaults.crd_ready_timeout_secs,
            ),
            error_if_crd_path_missing: env_var_or_default_bool(
                "ENVTEST_ERROR_IF_CRD_PATH_MISSING",
                defaults.error_if_crd_path_missing,
            ),
        }
    }

    /// Get readiness poll interval duration
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Get CRD establishment timeout duration
    #[must_use]
    pub fn crd_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.crd_ready_timeout_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
///
/// Empty values fall back to the default so `ENVTEST_IMAGE=` behaves like unset.
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
