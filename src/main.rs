//! # k3s-envtest CLI
//!
//! Runs the same environment the library provides, for poking at a cluster by hand
//! or for keeping one alive across several test runs.
//!
//! ## Usage
//!
//! ```bash
//! # Start a cluster, install CRDs, stop it again on Ctrl-C
//! k3s-envtest up --crd-path config/crd
//!
//! # Start a cluster and leave it running
//! k3s-envtest up --keep
//!
//! # Tear down a cluster started with --keep
//! k3s-envtest down <CONTAINER_ID>
//! ```
//!
//! Tunables (`ENVTEST_IMAGE`, `ENVTEST_MAX_POLL_ATTEMPTS`, ...) are read from the environment.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use k3s_envtest::{Environment, EnvironmentConfig};
use std::path::PathBuf;
use tracing::info;

/// Ephemeral K3s clusters for Kubernetes controller tests
#[derive(Parser)]
#[command(name = "k3s-envtest")]
#[command(
    about = "Ephemeral K3s clusters for Kubernetes controller tests",
    long_about = None,
    after_help = "\
Examples:
  k3s-envtest up --crd-path config/crd
  k3s-envtest up --image docker.io/rancher/k3s:v0.4.0 --keep
  k3s-envtest down 4f1c2b3a9d0e
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a cluster and print its API server URL
    Up {
        /// Container image running K3s (defaults to ENVTEST_IMAGE or the built-in image)
        #[arg(long)]
        image: Option<String>,

        /// File or directory with CRD manifests (repeatable)
        #[arg(long = "crd-path", value_name = "PATH")]
        crd_paths: Vec<PathBuf>,

        /// Leave the cluster running and exit instead of waiting for Ctrl-C
        #[arg(long)]
        keep: bool,
    },
    /// Stop and remove a cluster container
    Down {
        /// Id of the container printed by `up --keep`
        #[arg(value_name = "CONTAINER_ID")]
        container_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "k3s_envtest=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Up {
            image,
            crd_paths,
            keep,
        } => up_command(image, crd_paths, keep).await,
        Commands::Down { container_id } => down_command(container_id).await,
    }
}

/// Environment settings for the CLI
///
/// Link removal defaults to off here: the Docker daemon refuses to remove a
/// container's own name as a link, which would leave `up`/`down` unable to
/// remove anything. `ENVTEST_REMOVE_LINKS` still overrides it.
fn cli_config() -> EnvironmentConfig {
    EnvironmentConfig::from_env_or(&EnvironmentConfig {
        remove_links: false,
        ..Default::default()
    })
}

async fn up_command(image: Option<String>, crd_paths: Vec<PathBuf>, keep: bool) -> Result<()> {
    let mut env = Environment::with_config(cli_config()).with_crd_paths(crd_paths);
    if let Some(image) = image {
        env = env.with_image(image);
    }

    let config = match env.start().await {
        Ok(config) => config,
        Err(e) => {
            if let Some(id) = env.container_id() {
                eprintln!("Container {id} was left behind, remove it with: k3s-envtest down {id}");
            }
            return Err(e).context("Failed to start K3s environment");
        }
    };

    println!("API server: {}", config.cluster_url);
    if let Some(report) = env.crd_report() {
        for name in &report.installed {
            println!("CRD installed: {name}");
        }
    }

    let container_id = env
        .container_id()
        .context("Environment started without a container id")?
        .to_string();

    if keep {
        println!("Container: {container_id}");
        println!("Stop it with: k3s-envtest down {container_id}");
        return Ok(());
    }

    println!("Press Ctrl-C to stop the cluster");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down environment");
    env.stop()
        .await
        .with_context(|| format!("Failed to stop container {container_id}"))?;
    println!("Removed container {container_id}");
    Ok(())
}

async fn down_command(container_id: String) -> Result<()> {
    let mut env = Environment::attach(container_id.clone(), cli_config());
    env.stop()
        .await
        .with_context(|| format!("Failed to stop container {container_id}"))?;
    println!("Removed container {container_id}");
    Ok(())
}
