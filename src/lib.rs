//! K3s Envtest Library
//!
//! Spins up a throwaway single-node K3s cluster in Docker for controller test suites,
//! installs CRDs into it and hands back a `kube::Config`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use k3s_envtest::Environment;
//!
//! # async fn run() -> k3s_envtest::Result<()> {
//! let mut env = Environment::from_env().with_crd_paths(["config/crd"]);
//! let config = env.start().await?;
//! println!("API server at {}", config.cluster_url);
//! env.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod crd;
pub mod engine;
pub mod environment;
pub mod error;
pub mod health;
pub mod port;

pub use config::{CrdInstallPolicy, EnvironmentConfig};
pub use crd::{CrdInstallOptions, CrdInstallReport, CrdInstaller, KubeCrdInstaller};
pub use engine::{ContainerEngine, DockerEngine};
pub use environment::{Environment, EnvironmentState};
pub use error::{EnvtestError, Result};
