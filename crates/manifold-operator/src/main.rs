//! manifold operator - reconciles Manifest resources into live cluster objects

use std::sync::Arc;

use clap::Parser;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use manifold_common::crd::Manifest;
use manifold_common::hash::HashCache;
use manifold_operator::controller::{self, Context};
use manifold_operator::{
    JobQueue, KubeManifestStore, ManifestJobHandler, ManifestStore, OperatorConfig, WorkerPool,
};
use manifold_render::{Applier, DiscoveryRestMapper, KubeDynamicClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = OperatorConfig::parse();

    if config.crd {
        let crd = serde_yaml::to_string(&Manifest::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    run(config).await
}

/// Install or upgrade the Manifest CRD with server-side apply
async fn ensure_crd_installed(client: &Client, field_owner: &str) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    tracing::info!("Installing Manifest CRD...");
    crds.patch(
        "manifests.operator.manifold.dev",
        &PatchParams::apply(field_owner).force(),
        &Patch::Apply(&Manifest::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Manifest CRD: {}", e))?;
    Ok(())
}

async fn run(config: OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create kube client: {}", e))?;

    if config.install_crd {
        ensure_crd_installed(&client, &config.field_owner).await?;
    }

    let applier = Arc::new(Applier::new(
        Arc::new(KubeDynamicClient::new(client.clone())),
        Arc::new(DiscoveryRestMapper::new(client.clone())),
        config.field_owner.clone(),
    ));
    let store: Arc<dyn ManifestStore> = Arc::new(KubeManifestStore::new(client.clone()));
    let handler = Arc::new(ManifestJobHandler::new(
        applier,
        store.clone(),
        Arc::new(HashCache::new()),
        config.cache_dir(),
    ));

    let pool = WorkerPool::new();
    pool.set_size(config.workers);
    let (queue, jobs) = JobQueue::new();
    let token = CancellationToken::new();
    let workers = pool.start(token.clone(), jobs, handler);

    let ctx = Arc::new(Context {
        store,
        queue,
        field_owner: config.field_owner.clone(),
        job_timeout: config.job_timeout(),
        requeue_interval: config.requeue_interval(),
    });

    let manifests: Api<Manifest> = match config.namespace.as_deref() {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    tracing::info!(
        workers = pool.size(),
        namespace = config.namespace.as_deref().unwrap_or("*"),
        "Starting Manifest controller"
    );
    controller::run(manifests, ctx).await;

    tracing::info!("Controller stopped, draining workers");
    token.cancel();
    futures::future::join_all(workers).await;
    Ok(())
}
