//! Common utilities for integration tests
//!
//! Provides shared functionality for:
//! - A recording container engine standing in for Docker
//! - A recording CRD installer
//! - A local `/healthz` server standing in for the K3s API server

#![allow(dead_code, reason = "each test binary uses a different subset of helpers")]

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use bollard::container::{Config, RemoveContainerOptions};
use bollard::errors::Error as DockerError;
use bollard::models::{
    ContainerCreateResponse, ContainerInspectResponse, NetworkSettings, PortBinding,
};
use k3s_envtest::{
    ContainerEngine, CrdInstallOptions, CrdInstallReport, CrdInstaller, EnvtestError,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub const CONTAINER_ID: &str = "k3s-test-container";

/// One call made against the engine, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Pull(String),
    Create {
        image: Option<String>,
        cmd: Option<Vec<String>>,
        privileged: Option<bool>,
    },
    Start(String),
    Inspect(String),
    Stop(String),
    Remove {
        id: String,
        volumes: bool,
        force: bool,
        links: bool,
    },
}

/// Which engine calls should fail
#[derive(Debug, Clone, Copy, Default)]
pub struct Failures {
    pub pull: bool,
    pub create: bool,
    pub start: bool,
    pub inspect: bool,
    pub stop: bool,
    pub remove: bool,
}

/// Engine double that records every call and publishes the exposed port on `host_port`
#[derive(Debug, Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<EngineCall>>,
    host_port: Option<u16>,
    failures: Failures,
}

impl RecordingEngine {
    pub fn publishing(host_port: u16) -> Self {
        Self {
            host_port: Some(host_port),
            ..Default::default()
        }
    }

    pub fn unpublished() -> Self {
        Self::default()
    }

    pub fn failing(mut self, failures: Failures) -> Self {
        self.failures = failures;
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

fn injected_failure() -> DockerError {
    DockerError::DockerResponseServerError {
        status_code: 500,
        message: "injected failure".to_string(),
    }
}

#[async_trait]
impl ContainerEngine for RecordingEngine {
    async fn pull_image(&self, image: &str) -> Result<(), DockerError> {
        self.record(EngineCall::Pull(image.to_string()));
        if self.failures.pull {
            return Err(injected_failure());
        }
        Ok(())
    }

    async fn create_container(
        &self,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, DockerError> {
        self.record(EngineCall::Create {
            image: config.image.clone(),
            cmd: config.cmd.clone(),
            privileged: config.host_config.as_ref().and_then(|h| h.privileged),
        });
        if self.failures.create {
            return Err(injected_failure());
        }
        Ok(ContainerCreateResponse {
            id: CONTAINER_ID.to_string(),
            warnings: vec![],
        })
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.record(EngineCall::Start(id.to_string()));
        if self.failures.start {
            return Err(injected_failure());
        }
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspectResponse, DockerError> {
        self.record(EngineCall::Inspect(id.to_string()));
        if self.failures.inspect {
            return Err(injected_failure());
        }

        let mut ports = HashMap::new();
        if let Some(host_port) = self.host_port {
            ports.insert(
                "8080/tcp".to_string(),
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }

        Ok(ContainerInspectResponse {
            id: Some(id.to_string()),
            network_settings: Some(NetworkSettings {
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn stop_container(&self, id: &str) -> Result<(), DockerError> {
        self.record(EngineCall::Stop(id.to_string()));
        if self.failures.stop {
            return Err(injected_failure());
        }
        Ok(())
    }

    async fn remove_container(
        &self,
        id: &str,
        options: RemoveContainerOptions,
    ) -> Result<(), DockerError> {
        self.record(EngineCall::Remove {
            id: id.to_string(),
            volumes: options.v,
            force: options.force,
            links: options.link,
        });
        if self.failures.remove {
            return Err(injected_failure());
        }
        Ok(())
    }
}

/// CRD installer double recording what it was asked to install
#[derive(Debug, Default)]
pub struct RecordingCrdInstaller {
    requests: Mutex<Vec<(String, Vec<PathBuf>)>>,
    fail: bool,
}

impl RecordingCrdInstaller {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// `(cluster_url, paths)` for every install call
    pub fn requests(&self) -> Vec<(String, Vec<PathBuf>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CrdInstaller for RecordingCrdInstaller {
    async fn install(
        &self,
        config: &kube::Config,
        options: &CrdInstallOptions,
    ) -> k3s_envtest::Result<CrdInstallReport> {
        self.requests
            .lock()
            .unwrap()
            .push((config.cluster_url.to_string(), options.paths.clone()));

        if self.fail {
            return Err(EnvtestError::CrdInstall("injected failure".to_string()));
        }
        Ok(CrdInstallReport {
            installed: options
                .paths
                .iter()
                .map(|p| format!("{}.example.com", p.display()))
                .collect(),
        })
    }
}

/// Local stand-in for the API server health endpoint
#[derive(Debug)]
pub struct HealthServer {
    pub port: u16,
    hits: Arc<AtomicU32>,
}

impl HealthServer {
    /// Answer `/healthz` with 503 until the `ready_on`-th request, 200 from then on
    pub async fn ready_on(ready_on: u32) -> Self {
        let hits = Arc::new(AtomicU32::new(0));
        let state = (Arc::clone(&hits), ready_on);

        let app = Router::new()
            .route(
                "/healthz",
                get(
                    |State((hits, ready_on)): State<(Arc<AtomicU32>, u32)>| async move {
                        let hit = hits.fetch_add(1, Ordering::SeqCst) + 1;
                        if hit >= ready_on {
                            StatusCode::OK
                        } else {
                            StatusCode::SERVICE_UNAVAILABLE
                        }
                    },
                ),
            )
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { port, hits }
    }

    /// Never answers with success
    pub async fn never_ready() -> Self {
        Self::ready_on(u32::MAX).await
    }

    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }
}

/// A port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
