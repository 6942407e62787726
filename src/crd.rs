//! # CRD Installation
//!
//! Discovers CustomResourceDefinition manifests on disk and installs them into the
//! freshly provisioned cluster.
//!
//! ## Manifest discovery
//!
//! - A path pointing at a file is read as-is
//! - A directory is scanned (non-recursively) for `.yaml`, `.yml` and `.json` files in name order
//! - Files may contain several YAML documents separated by `---`
//! - Only documents with `kind: CustomResourceDefinition` are kept, everything else is skipped
//! - Missing paths are skipped with a warning unless `error_if_path_missing` is set
//!
//! ## Installation
//!
//! CRDs are server-side applied (so re-running against an existing cluster updates them)
//! and then awaited until the API server reports them `Established`.

use crate::constants::{CRD_FILE_EXTENSIONS, FIELD_MANAGER};
use crate::error::{EnvtestError, Result};
use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use kube_runtime::wait::{await_condition, conditions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const CRD_KIND: &str = "CustomResourceDefinition";

/// Where to find CRDs and how strictly to treat them
#[derive(Debug, Clone, Default)]
pub struct CrdInstallOptions {
    /// Files or directories holding CRD manifests, in installation order
    pub paths: Vec<PathBuf>,
    /// Fail instead of skipping paths that do not exist
    pub error_if_path_missing: bool,
    /// Upper bound for all installed CRDs to become established
    pub ready_timeout: Duration,
}

/// Outcome of a CRD installation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrdInstallReport {
    /// Names of the CRDs applied and established, in installation order
    pub installed: Vec<String>,
}

impl CrdInstallReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }
}

#[async_trait]
pub trait CrdInstaller: Send + Sync {
    /// Install every CRD found under `options.paths` into the cluster behind `config`
    async fn install(
        &self,
        config: &kube::Config,
        options: &CrdInstallOptions,
    ) -> Result<CrdInstallReport>;
}

/// Installs CRDs through the Kubernetes API
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeCrdInstaller;

#[async_trait]
impl CrdInstaller for KubeCrdInstaller {
    async fn install(
        &self,
        config: &kube::Config,
        options: &CrdInstallOptions,
    ) -> Result<CrdInstallReport> {
        let crds = read_crds(&options.paths, options.error_if_path_missing)?;
        if crds.is_empty() {
            debug!("No CRDs to install");
            return Ok(CrdInstallReport::default());
        }

        // Required for rustls 0.23+ before the client builds its connector.
        // Already installed by the embedding process is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let client = Client::try_from(config.clone())
            .map_err(|e| EnvtestError::CrdInstall(format!("failed to create client: {e}")))?;
        let installed = apply_crds(client, &crds, options.ready_timeout).await?;

        Ok(CrdInstallReport { installed })
    }
}

/// Server-side apply `crds` in order, then wait until all of them are established
///
/// Returns the applied CRD names in order.
///
/// # Errors
///
/// Returns [`EnvtestError::CrdInstall`] for a CRD without a name, a rejected apply,
/// or when the CRDs are not established within `ready_timeout`.
pub async fn apply_crds(
    client: Client,
    crds: &[CustomResourceDefinition],
    ready_timeout: Duration,
) -> Result<Vec<String>> {
    let api: Api<CustomResourceDefinition> = Api::all(client);

    let mut names = Vec::with_capacity(crds.len());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    for crd in crds {
        let name = crd.metadata.name.clone().ok_or_else(|| {
            EnvtestError::CrdInstall("CRD manifest without metadata.name".to_string())
        })?;

        api.patch(&name, &params, &Patch::Apply(crd))
            .await
            .map_err(|e| EnvtestError::CrdInstall(format!("failed to apply {name}: {e}")))?;
        info!(crd = %name, "Applied CRD");
        names.push(name);
    }

    wait_for_established(&api, &names, ready_timeout).await?;

    Ok(names)
}

async fn wait_for_established(
    api: &Api<CustomResourceDefinition>,
    names: &[String],
    ready_timeout: Duration,
) -> Result<()> {
    let established = async {
        for name in names {
            await_condition(api.clone(), name, conditions::is_crd_established())
                .await
                .map_err(|e| {
                    EnvtestError::CrdInstall(format!("failed waiting for {name}: {e}"))
                })?;
            debug!(crd = %name, "CRD established");
        }
        Ok(())
    };

    timeout(ready_timeout, established).await.map_err(|elapsed| {
        EnvtestError::CrdInstall(format!(
            "CRDs did not become established within {ready_timeout:?}: {elapsed}"
        ))
    })?
}

/// Collect CRDs from every path, in order
///
/// # Errors
///
/// Returns [`EnvtestError::CrdPathMissing`] for a missing path when `error_if_missing`
/// is set, and [`EnvtestError::CrdManifest`] for unreadable or malformed manifests.
pub fn read_crds(paths: &[PathBuf], error_if_missing: bool) -> Result<Vec<CustomResourceDefinition>> {
    let mut crds = Vec::new();

    for path in paths {
        if !path.exists() {
            if error_if_missing {
                return Err(EnvtestError::CrdPathMissing(path.clone()));
            }
            warn!("CRD path does not exist, skipping: {}", path.display());
            continue;
        }

        for file in manifest_files(path)? {
            let content = std::fs::read_to_string(&file).map_err(|e| EnvtestError::CrdManifest {
                path: file.clone(),
                reason: e.to_string(),
            })?;
            let found = parse_crds(&file, &content)?;
            debug!("Found {} CRD(s) in {}", found.len(), file.display());
            crds.extend(found);
        }
    }

    Ok(crds)
}

/// Manifest files for a path: the file itself, or the matching files directly inside a directory
fn manifest_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| EnvtestError::CrdManifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let is_manifest = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| CRD_FILE_EXTENSIONS.contains(&ext));
        if entry.file_type().is_file() && is_manifest {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// Parse every `CustomResourceDefinition` document out of a (multi-document) manifest
///
/// # Errors
///
/// Returns [`EnvtestError::CrdManifest`] if the content is not valid YAML/JSON or a
/// CRD document does not match the apiextensions v1 schema.
pub fn parse_crds(path: &Path, content: &str) -> Result<Vec<CustomResourceDefinition>> {
    let malformed = |reason: String| EnvtestError::CrdManifest {
        path: path.to_path_buf(),
        reason,
    };

    let mut crds = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| malformed(e.to_string()))?;
        if value.is_null() {
            continue;
        }

        let kind = value.get("kind").and_then(serde_yaml::Value::as_str);
        if kind != Some(CRD_KIND) {
            debug!("Skipping non-CRD document ({:?}) in {}", kind, path.display());
            continue;
        }

        let crd: CustomResourceDefinition =
            serde_yaml::from_value(value).map_err(|e| malformed(e.to_string()))?;
        crds.push(crd);
    }

    Ok(crds)
}
