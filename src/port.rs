//! # Port Mapping
//!
//! Parses the exposed API server port and resolves the host port the engine bound it to.

use crate::error::{EnvtestError, Result};
use bollard::models::ContainerInspectResponse;
use std::fmt;

/// A TCP port exposed by the K3s container, keyed like the Docker API does (`8080/tcp`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    port: u16,
}

impl PortSpec {
    /// Parse a textual port number into a TCP port spec
    ///
    /// # Errors
    ///
    /// Returns [`EnvtestError::PortSpec`] when the value is not a port in `1..=65535`.
    pub fn parse(port: &str) -> Result<Self> {
        let invalid = |reason: &str| EnvtestError::PortSpec {
            port: port.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = port.trim();
        if trimmed.is_empty() {
            return Err(invalid("port is empty"));
        }

        let number: u16 = trimmed
            .parse()
            .map_err(|e: std::num::ParseIntError| invalid(&e.to_string()))?;
        if number == 0 {
            return Err(invalid("port must be greater than zero"));
        }

        Ok(Self { port: number })
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Key used in `ExposedPorts`, `PortBindings` and `NetworkSettings.Ports`
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/tcp", self.port)
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/tcp", self.port)
    }
}

/// Find the host port the engine published `spec` on
///
/// Takes the first binding with a usable host port; bindings without one (or with
/// a non-numeric one) are skipped.
///
/// # Errors
///
/// Returns [`EnvtestError::PortResolution`] when no usable binding exists.
pub fn resolve_host_port(
    container_id: &str,
    inspect: &ContainerInspectResponse,
    spec: PortSpec,
) -> Result<u16> {
    let key = spec.key();

    inspect
        .network_settings
        .as_ref()
        .and_then(|settings| settings.ports.as_ref())
        .and_then(|ports| ports.get(&key))
        .and_then(Option::as_ref)
        .and_then(|bindings| {
            bindings
                .iter()
                .filter_map(|binding| binding.host_port.as_deref())
                .find_map(|host_port| host_port.trim().parse::<u16>().ok())
                .filter(|port| *port != 0)
        })
        .ok_or_else(|| EnvtestError::PortResolution {
            id: container_id.to_string(),
            port: key,
        })
}
