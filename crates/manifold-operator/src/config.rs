//! Command line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use manifold_common::DEFAULT_FIELD_OWNER;

use crate::workers::DEFAULT_WORKERS_COUNT;

/// manifold - renders Manifest bundles and keeps them applied
#[derive(Parser, Debug, Clone)]
#[command(name = "manifold-operator", version, about, long_about = None)]
pub struct OperatorConfig {
    /// Print the Manifest CRD as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Install or upgrade the Manifest CRD on startup
    #[arg(long, env = "MANIFOLD_INSTALL_CRD")]
    pub install_crd: bool,

    /// Number of reconciliation workers; zero or less uses the default
    #[arg(long, env = "MANIFOLD_WORKERS", default_value_t = DEFAULT_WORKERS_COUNT as i64, allow_negative_numbers = true)]
    pub workers: i64,

    /// Field manager for every write
    #[arg(long, env = "MANIFOLD_FIELD_OWNER", default_value = DEFAULT_FIELD_OWNER)]
    pub field_owner: String,

    /// Directory holding cached remote chart and overlay content
    #[arg(long, env = "MANIFOLD_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Seconds to wait for one job before failing the reconciliation
    #[arg(long, env = "MANIFOLD_JOB_TIMEOUT_SECS", default_value_t = 300)]
    pub job_timeout_secs: u64,

    /// Seconds between periodic reconciliations of a healthy Manifest
    #[arg(long, env = "MANIFOLD_REQUEUE_SECS", default_value_t = 300)]
    pub requeue_secs: u64,

    /// Only watch Manifests in this namespace
    #[arg(long, env = "MANIFOLD_NAMESPACE")]
    pub namespace: Option<String>,
}

impl OperatorConfig {
    /// Cache directory, defaulting to `manifold` under the system temp dir
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("manifold"))
    }

    /// Per-job deadline
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Resync interval for healthy Manifests
    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }
}
