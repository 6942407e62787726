//! # Environment
//!
//! Lifecycle of one K3s test cluster backed by a single container.
//!
//! ## Start sequence
//!
//! 1. Connect to the container engine and pull the image
//! 2. Create the privileged K3s container with the insecure API port exposed
//! 3. Start and inspect it to find the host port the engine picked
//! 4. Poll `/healthz` until the API server answers
//! 5. Install CRDs and hand back a `kube::Config` for `http://localhost:<port>`
//!
//! The container id is recorded as soon as creation succeeds, so a failed `start`
//! can always be followed by `stop`. Unless `cleanup_on_failure` is set the container
//! is left running on failure, which keeps it around for inspection.

use crate::config::{CrdInstallPolicy, EnvironmentConfig};
use crate::constants::{API_HOST, DEFAULT_IMAGE};
use crate::crd::{CrdInstallOptions, CrdInstallReport, CrdInstaller, KubeCrdInstaller};
use crate::engine::{container_config, removal_options, ContainerEngine, DockerEngine};
use crate::error::{EnvtestError, Result};
use crate::health::HealthProbe;
use crate::port::{resolve_host_port, PortSpec};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Where an environment is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnvironmentState {
    /// No container has been created yet
    #[default]
    Uninitialized,
    /// A container exists (created, possibly not yet healthy)
    Running { container_id: String },
    /// The container was stopped and removed
    Stopped { container_id: String },
}

impl EnvironmentState {
    #[must_use]
    pub fn container_id(&self) -> Option<&str> {
        match self {
            EnvironmentState::Uninitialized => None,
            EnvironmentState::Running { container_id }
            | EnvironmentState::Stopped { container_id } => Some(container_id),
        }
    }
}

/// A K3s cluster provisioned for a test suite
///
/// # Example
///
/// ```no_run
/// use k3s_envtest::Environment;
///
/// # async fn run() -> k3s_envtest::Result<()> {
/// let mut env = Environment::new().with_crd_paths(["config/crd"]);
/// let config = env.start().await?;
/// let client = kube::Client::try_from(config).expect("client");
/// // ... run tests against `client` ...
/// env.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Environment {
    /// Files or directories with CRD manifests installed once the cluster is ready
    pub crd_paths: Vec<PathBuf>,
    config: EnvironmentConfig,
    state: EnvironmentState,
    engine: Option<Arc<dyn ContainerEngine>>,
    crd_installer: Arc<dyn CrdInstaller>,
    crd_report: Option<CrdInstallReport>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("image", &self.image())
            .field("crd_paths", &self.crd_paths)
            .field("state", &self.state)
            .field("engine_injected", &self.engine.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::with_config(EnvironmentConfig::default())
    }
}

impl Environment {
    /// Environment with the default image and no CRDs
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment configured from `ENVTEST_*` variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_config(EnvironmentConfig::from_env())
    }

    #[must_use]
    pub fn with_config(config: EnvironmentConfig) -> Self {
        Self {
            crd_paths: Vec::new(),
            config,
            state: EnvironmentState::Uninitialized,
            engine: None,
            crd_installer: Arc::new(KubeCrdInstaller),
            crd_report: None,
        }
    }

    /// Refer to a container created earlier (e.g. by `k3s-envtest up --keep`) so it can be stopped
    #[must_use]
    pub fn attach(container_id: impl Into<String>, config: EnvironmentConfig) -> Self {
        let mut env = Self::with_config(config);
        env.state = EnvironmentState::Running {
            container_id: container_id.into(),
        };
        env
    }

    /// Use `image` instead of the default; an empty string keeps the default
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.config.image = image.into();
        self
    }

    #[must_use]
    pub fn with_crd_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.crd_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Use an already connected engine instead of connecting from ambient settings
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<dyn ContainerEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    #[must_use]
    pub fn with_crd_installer(mut self, installer: Arc<dyn CrdInstaller>) -> Self {
        self.crd_installer = installer;
        self
    }

    /// Image that `start` pulls and runs
    #[must_use]
    pub fn image(&self) -> &str {
        if self.config.image.is_empty() {
            DEFAULT_IMAGE
        } else {
            &self.config.image
        }
    }

    #[must_use]
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> &EnvironmentState {
        &self.state
    }

    /// Id of the backing container, once one has been created
    #[must_use]
    pub fn container_id(&self) -> Option<&str> {
        self.state.container_id()
    }

    /// Result of the last CRD installation, if it succeeded
    #[must_use]
    pub fn crd_report(&self) -> Option<&CrdInstallReport> {
        self.crd_report.as_ref()
    }

    /// Provision the cluster and return its connection configuration
    ///
    /// # Errors
    ///
    /// Fails with the [`EnvtestError`] of the first step that went wrong. Once the
    /// container has been created its id stays recorded, so `stop` can clean it up.
    pub async fn start(&mut self) -> Result<kube::Config> {
        if let Some(id) = self.state.container_id() {
            return Err(EnvtestError::AlreadyStarted(id.to_string()));
        }

        let engine = self.engine().await?;
        let image = self.image().to_string();

        engine
            .pull_image(&image)
            .await
            .map_err(|source| EnvtestError::ImagePull {
                image: image.clone(),
                source,
            })?;

        let spec = PortSpec::parse(&self.config.insecure_port)?;

        let created = engine
            .create_container(container_config(&image, spec, &self.config.bind_address))
            .await
            .map_err(|source| EnvtestError::ContainerCreate {
                image: image.clone(),
                source,
            })?;
        let container_id = created.id;
        for warning in &created.warnings {
            warn!(container_id = %container_id, "Engine warning: {}", warning);
        }
        info!(container_id = %container_id, image = %image, "Created container");

        self.state = EnvironmentState::Running {
            container_id: container_id.clone(),
        };

        match self.provision(engine.as_ref(), &container_id, spec).await {
            Ok(config) => Ok(config),
            Err(e) if self.config.cleanup_on_failure => {
                warn!(container_id = %container_id, error = %e, "Start failed, removing container");
                match teardown(engine.as_ref(), &container_id, self.config.remove_links).await {
                    Ok(()) => self.state = EnvironmentState::Stopped { container_id },
                    Err(cleanup) => {
                        warn!(container_id = %container_id, error = %cleanup, "Cleanup after failed start failed");
                    }
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Everything after container creation
    async fn provision(
        &mut self,
        engine: &dyn ContainerEngine,
        container_id: &str,
        spec: PortSpec,
    ) -> Result<kube::Config> {
        engine
            .start_container(container_id)
            .await
            .map_err(|source| EnvtestError::ContainerStart {
                id: container_id.to_string(),
                source,
            })?;

        let inspect = engine
            .inspect_container(container_id)
            .await
            .map_err(|source| EnvtestError::ContainerInspect {
                id: container_id.to_string(),
                source,
            })?;

        let host_port = resolve_host_port(container_id, &inspect, spec)?;
        let host = format!("http://{API_HOST}:{host_port}");

        HealthProbe::new(
            &host,
            self.config.max_poll_attempts,
            self.config.poll_interval(),
        )
        .wait_until_ready()
        .await?;

        let uri = host.parse::<http::Uri>().map_err(|e| EnvtestError::ClusterConfig {
            url: host.clone(),
            reason: e.to_string(),
        })?;
        let config = kube::Config::new(uri);

        let options = CrdInstallOptions {
            paths: self.crd_paths.clone(),
            error_if_path_missing: self.config.error_if_crd_path_missing,
            ready_timeout: self.config.crd_ready_timeout(),
        };
        match self.crd_installer.install(&config, &options).await {
            Ok(report) => {
                if !report.is_empty() {
                    info!("Installed {} CRD(s)", report.installed.len());
                }
                self.crd_report = Some(report);
            }
            Err(e) => match self.config.crd_install_policy {
                CrdInstallPolicy::Propagate => return Err(e),
                CrdInstallPolicy::BestEffort => {
                    warn!(error = %e, "CRD installation failed, continuing (best-effort)");
                }
            },
        }

        info!(host = %host, container_id = %container_id, "Cluster ready");
        Ok(config)
    }

    /// Stop and remove the backing container
    ///
    /// # Errors
    ///
    /// [`EnvtestError::NotStarted`] / [`EnvtestError::AlreadyStopped`] for invalid states,
    /// otherwise the engine error of the failing stop or remove call. A failed stop
    /// skips removal.
    pub async fn stop(&mut self) -> Result<()> {
        let container_id = match &self.state {
            EnvironmentState::Uninitialized => return Err(EnvtestError::NotStarted),
            EnvironmentState::Stopped { container_id } => {
                return Err(EnvtestError::AlreadyStopped(container_id.clone()))
            }
            EnvironmentState::Running { container_id } => container_id.clone(),
        };

        let engine = self.engine().await?;

        info!("removing container: {}", container_id);
        teardown(engine.as_ref(), &container_id, self.config.remove_links).await?;

        self.state = EnvironmentState::Stopped { container_id };
        Ok(())
    }

    async fn engine(&self) -> Result<Arc<dyn ContainerEngine>> {
        match &self.engine {
            Some(engine) => Ok(Arc::clone(engine)),
            None => Ok(Arc::new(DockerEngine::connect().await?)),
        }
    }
}

/// Stop, then force-remove with volumes; removal is skipped if stopping fails
async fn teardown(engine: &dyn ContainerEngine, container_id: &str, remove_links: bool) -> Result<()> {
    engine
        .stop_container(container_id)
        .await
        .map_err(|source| EnvtestError::ContainerStop {
            id: container_id.to_string(),
            source,
        })?;

    engine
        .remove_container(container_id, removal_options(remove_links))
        .await
        .map_err(|source| EnvtestError::ContainerRemove {
            id: container_id.to_string(),
            source,
        })
}
