//! Manifest controller
//!
//! Reconciles Manifest resources by handing jobs to the worker pool:
//! - no operator finalizer: add it, then come back
//! - live: report Processing for a new generation, Install, then report Ready
//!   with the applied content hash
//! - being deleted: Uninstall until every object is gone, then release the
//!   operator finalizer

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use manifold_common::crd::{Manifest, ManifestState, ManifestStatus};
use manifold_common::kube_utils::{add_finalizer, has_finalizer, remove_finalizer};
use manifold_common::OPERATOR_FINALIZER;

use crate::error::JobError;
use crate::store::ManifestStore;
use crate::workers::{JobOutcome, JobQueue, JobResult, Operation};

/// Watcher timeout (seconds), kept below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Requeue after adding the operator finalizer
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Requeue while bundle deletions are still completing
const DELETION_REQUEUE: Duration = Duration::from_secs(5);

/// Requeue after a retryable failure
const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Shared context for the Manifest controller
pub struct Context {
    /// Control-plane view of Manifests
    pub store: Arc<dyn ManifestStore>,
    /// Submission side of the worker pool
    pub queue: JobQueue,
    /// Field manager for Manifest writes
    pub field_owner: String,
    /// How long to wait for a job result
    pub job_timeout: Duration,
    /// Periodic resync interval for healthy Manifests
    pub requeue_interval: Duration,
}

/// Submit a job and wait for its single result
async fn run_job(ctx: &Context, manifest: Arc<Manifest>, operation: Operation) -> JobResult {
    let rx = ctx.queue.submit(manifest, operation)?;
    match tokio::time::timeout(ctx.job_timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(JobError::Dropped),
        Err(_) => Err(JobError::Timeout(ctx.job_timeout)),
    }
}

/// Reconcile a Manifest resource
pub async fn reconcile(manifest: Arc<Manifest>, ctx: Arc<Context>) -> Result<Action, JobError> {
    let name = manifest.name_any();
    let namespace = manifest
        .metadata
        .namespace
        .clone()
        .ok_or(JobError::MissingNamespace)?;

    if manifest.is_being_deleted() {
        return cleanup(manifest, &ctx, &namespace, &name).await;
    }

    let mut meta = manifest.metadata.clone();
    if add_finalizer(&mut meta, OPERATOR_FINALIZER) {
        ctx.store
            .apply_finalizers(&manifest, meta.finalizers.unwrap_or_default(), &ctx.field_owner)
            .await?;
        info!(manifest = %name, namespace = %namespace, "added operator finalizer");
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    let observed = manifest.status.as_ref();
    if observed.and_then(|s| s.observed_generation) != manifest.metadata.generation {
        let status = ManifestStatus {
            state: ManifestState::Processing,
            observed_hash: observed.and_then(|s| s.observed_hash),
            message: None,
            observed_generation: manifest.metadata.generation,
        };
        update_status(&manifest, &ctx, &namespace, &name, status).await?;
    }

    match run_job(&ctx, manifest.clone(), Operation::Install).await {
        Ok(JobOutcome::Installed { hash }) | Ok(JobOutcome::Unchanged { hash }) => {
            let status = ManifestStatus {
                state: ManifestState::Ready,
                observed_hash: Some(hash),
                message: None,
                observed_generation: manifest.metadata.generation,
            };
            update_status(&manifest, &ctx, &namespace, &name, status).await?;
            Ok(Action::requeue(ctx.requeue_interval))
        }
        Ok(other) => Err(JobError::Internal(format!(
            "unexpected install outcome {other:?}"
        ))),
        Err(e) => {
            report_failure(&manifest, &ctx, &namespace, &name, &e).await;
            Err(e)
        }
    }
}

/// Uninstall a Manifest that is being deleted
async fn cleanup(
    manifest: Arc<Manifest>,
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<Action, JobError> {
    if !has_finalizer(&manifest.metadata, OPERATOR_FINALIZER) {
        return Ok(Action::await_change());
    }

    let status = ManifestStatus {
        state: ManifestState::Deleting,
        observed_hash: manifest.status.as_ref().and_then(|s| s.observed_hash),
        message: None,
        observed_generation: manifest.metadata.generation,
    };
    update_status(&manifest, ctx, namespace, name, status).await?;

    match run_job(ctx, manifest.clone(), Operation::Uninstall).await {
        Ok(JobOutcome::Uninstalled) => {
            release_finalizer(ctx, namespace, name).await?;
            info!(manifest = %name, namespace = %namespace, "manifest uninstalled, finalizer removed");
            Ok(Action::await_change())
        }
        Ok(JobOutcome::Uninstalling) => {
            debug!(manifest = %name, namespace = %namespace, "waiting for bundle deletion");
            Ok(Action::requeue(DELETION_REQUEUE))
        }
        Ok(other) => Err(JobError::Internal(format!(
            "unexpected uninstall outcome {other:?}"
        ))),
        Err(e) => {
            report_failure(&manifest, ctx, namespace, name, &e).await;
            Err(e)
        }
    }
}

/// Drop the operator finalizer from the latest copy of the Manifest
async fn release_finalizer(ctx: &Context, namespace: &str, name: &str) -> Result<(), JobError> {
    let Some(mut current) = ctx.store.get(namespace, name).await? else {
        return Ok(());
    };
    if !remove_finalizer(&mut current.metadata, OPERATOR_FINALIZER) {
        return Ok(());
    }
    match ctx.store.update(&current, &ctx.field_owner).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Patch status unless it already matches
async fn update_status(
    manifest: &Manifest,
    ctx: &Context,
    namespace: &str,
    name: &str,
    status: ManifestStatus,
) -> Result<(), JobError> {
    if manifest.status.as_ref() == Some(&status) {
        return Ok(());
    }
    ctx.store
        .patch_status(namespace, name, &status, &ctx.field_owner)
        .await?;
    Ok(())
}

/// Record a failure in status; the job error stays the one returned
async fn report_failure(
    manifest: &Manifest,
    ctx: &Context,
    namespace: &str,
    name: &str,
    err: &JobError,
) {
    let status = ManifestStatus {
        state: ManifestState::Error,
        observed_hash: manifest.status.as_ref().and_then(|s| s.observed_hash),
        message: Some(err.status_message()),
        observed_generation: manifest.metadata.generation,
    };
    if let Err(e) = update_status(manifest, ctx, namespace, name, status).await {
        warn!(manifest = %name, namespace = %namespace, error = %e, "failed to record error status");
    }
}

/// Error policy for Manifest reconciliation
///
/// Retryable errors come back after [`ERROR_REQUEUE`]. Permanent ones (bad
/// spec or bundle content) back off to the resync interval, since a fix to
/// on-disk content does not change the Manifest.
pub fn error_policy(manifest: Arc<Manifest>, error: &JobError, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        manifest = %manifest.name_any(),
        retryable = error.is_retryable(),
        "manifest reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ERROR_REQUEUE)
    } else {
        Action::requeue(ctx.requeue_interval)
    }
}

/// Run the Manifest controller until a shutdown signal arrives
pub async fn run(api: Api<Manifest>, ctx: Arc<Context>) {
    Controller::new(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            match result {
                Ok(action) => debug!(?action, "manifest reconciliation completed"),
                Err(e) => error!(error = ?e, "manifest reconciliation error"),
            }
            std::future::ready(())
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockManifestStore;
    use crate::testing::{manifest, FakeStore, FIELD_OWNER};
    use crate::workers::{JobHandler, WorkerPool};
    use async_trait::async_trait;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use manifold_common::crd::RendererKind;
    use manifold_common::{Error, COMPANION_FINALIZER};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    type Script = Box<dyn Fn(Operation) -> JobResult + Send + Sync>;

    /// Answers every job from a script and counts calls
    struct Scripted {
        script: Script,
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl JobHandler for Scripted {
        async fn handle(&self, _manifest: Arc<Manifest>, operation: Operation) -> JobResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            (self.script)(operation)
        }
    }

    fn scripted(script: impl Fn(Operation) -> JobResult + Send + Sync + 'static) -> Arc<Scripted> {
        Arc::new(Scripted {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }

    fn context(
        store: Arc<dyn ManifestStore>,
        handler: Arc<Scripted>,
    ) -> (Arc<Context>, CancellationToken) {
        let (queue, rx) = JobQueue::new();
        let token = CancellationToken::new();
        let pool = WorkerPool::new();
        pool.set_size(1);
        pool.start(token.clone(), rx, handler);
        let ctx = Arc::new(Context {
            store,
            queue,
            field_owner: FIELD_OWNER.to_string(),
            job_timeout: Duration::from_secs(5),
            requeue_interval: Duration::from_secs(300),
        });
        (ctx, token)
    }

    fn live(name: &str) -> Manifest {
        let mut m = manifest(name, "/charts/web", RendererKind::Helm);
        m.metadata.finalizers = Some(vec![OPERATOR_FINALIZER.to_string()]);
        m
    }

    fn deleting(name: &str) -> Manifest {
        let mut m = live(name);
        m.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        m
    }

    // =========================================================================
    // Finalizer bootstrap
    // =========================================================================

    #[tokio::test]
    async fn test_adds_operator_finalizer_before_installing() {
        let store = Arc::new(FakeStore::default());
        let m = manifest("web", "/charts/web", RendererKind::Helm);
        store.insert(m.clone());
        let handler = scripted(|_| Ok(JobOutcome::Installed { hash: 1 }));
        let (ctx, token) = context(store.clone(), handler.clone());

        let action = reconcile(Arc::new(m), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(FINALIZER_REQUEUE));
        assert_eq!(
            store.finalizers("default/web"),
            vec![OPERATOR_FINALIZER.to_string()]
        );
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        token.cancel();
    }

    #[tokio::test]
    async fn test_missing_namespace_is_rejected() {
        let store = Arc::new(MockManifestStore::new());
        let handler = scripted(|_| Ok(JobOutcome::Uninstalled));
        let (ctx, token) = context(store, handler);

        let mut m = live("web");
        m.metadata.namespace = None;
        let err = reconcile(Arc::new(m), ctx).await.unwrap_err();
        assert!(matches!(err, JobError::MissingNamespace));
        token.cancel();
    }

    // =========================================================================
    // Install
    // =========================================================================

    /// Story: a healthy Manifest reports Ready once and is not re-patched
    #[tokio::test]
    async fn story_install_reports_ready_with_hash() {
        let store = Arc::new(FakeStore::default());
        store.insert(live("web"));
        let handler = scripted(|op| {
            assert_eq!(op, Operation::Install);
            Ok(JobOutcome::Installed { hash: 42 })
        });
        let (ctx, token) = context(store.clone(), handler.clone());

        let action = reconcile(Arc::new(live("web")), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(300)));

        let status = store.snapshot("default/web").unwrap().status.unwrap();
        assert_eq!(status.state, ManifestState::Ready);
        assert_eq!(status.observed_hash, Some(42));
        assert_eq!(status.observed_generation, Some(1));

        // Reconciling the updated object does not patch an identical status
        let updated = store.snapshot("default/web").unwrap();
        reconcile(Arc::new(updated), ctx).await.unwrap();
        let states: Vec<_> = store
            .statuses
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.state.clone())
            .collect();
        assert_eq!(states, vec![ManifestState::Processing, ManifestState::Ready]);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        token.cancel();
    }

    #[tokio::test]
    async fn test_install_failure_is_recorded_in_status() {
        let store = Arc::new(FakeStore::default());
        store.insert(live("web"));
        let handler =
            scripted(|_| Err(Error::render("helm", "template exploded").into()));
        let (ctx, token) = context(store.clone(), handler);

        let err = reconcile(Arc::new(live("web")), ctx).await.unwrap_err();
        assert!(matches!(err, JobError::Common(Error::Render { .. })));

        let status = store.snapshot("default/web").unwrap().status.unwrap();
        assert_eq!(status.state, ManifestState::Error);
        assert!(status.message.unwrap().contains("template exploded"));
        token.cancel();
    }

    #[tokio::test]
    async fn test_slow_job_times_out() {
        let store = Arc::new(FakeStore::default());
        store.insert(live("web"));
        let handler = Arc::new(Scripted {
            script: Box::new(|_| Ok(JobOutcome::Installed { hash: 1 })),
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(30),
        });
        let (queue, rx) = JobQueue::new();
        let token = CancellationToken::new();
        WorkerPool::new().start(token.clone(), rx, handler);
        let ctx = Arc::new(Context {
            store: store.clone(),
            queue,
            field_owner: FIELD_OWNER.to_string(),
            job_timeout: Duration::from_millis(50),
            requeue_interval: Duration::from_secs(300),
        });

        let err = reconcile(Arc::new(live("web")), ctx).await.unwrap_err();
        assert!(matches!(err, JobError::Timeout(_)));
        token.cancel();
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    #[tokio::test]
    async fn test_deletion_waits_while_objects_remain() {
        let store = Arc::new(FakeStore::default());
        store.insert(deleting("web"));
        let handler = scripted(|op| {
            assert_eq!(op, Operation::Uninstall);
            Ok(JobOutcome::Uninstalling)
        });
        let (ctx, token) = context(store.clone(), handler);

        let action = reconcile(Arc::new(deleting("web")), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(DELETION_REQUEUE));
        assert_eq!(
            store.finalizers("default/web"),
            vec![OPERATOR_FINALIZER.to_string()]
        );
        let status = store.snapshot("default/web").unwrap().status.unwrap();
        assert_eq!(status.state, ManifestState::Deleting);
        token.cancel();
    }

    /// Story: once everything is gone only the operator finalizer is released
    #[tokio::test]
    async fn story_uninstalled_releases_operator_finalizer() {
        let store = Arc::new(FakeStore::default());
        let mut m = deleting("web");
        m.metadata.finalizers = Some(vec![
            OPERATOR_FINALIZER.to_string(),
            "other.dev/keep".to_string(),
        ]);
        store.insert(m.clone());
        let handler = scripted(|_| Ok(JobOutcome::Uninstalled));
        let (ctx, token) = context(store.clone(), handler);

        let action = reconcile(Arc::new(m), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(
            store.finalizers("default/web"),
            vec!["other.dev/keep".to_string()]
        );
        token.cancel();
    }

    #[tokio::test]
    async fn test_deletion_without_operator_finalizer_does_nothing() {
        let mut store = MockManifestStore::new();
        store.expect_patch_status().times(0);
        let handler = scripted(|_| Ok(JobOutcome::Uninstalled));
        let (ctx, token) = context(Arc::new(store), handler.clone());

        let mut m = deleting("web");
        m.metadata.finalizers = Some(vec![COMPANION_FINALIZER.to_string()]);
        let action = reconcile(Arc::new(m), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        token.cancel();
    }

    /// Story: a new generation shows Processing, then the failure, keeping the last hash
    #[tokio::test]
    async fn story_new_generation_reports_processing_first() {
        let store = Arc::new(FakeStore::default());
        let mut m = live("web");
        m.metadata.generation = Some(2);
        m.status = Some(ManifestStatus {
            state: ManifestState::Ready,
            observed_hash: Some(7),
            message: None,
            observed_generation: Some(1),
        });
        store.insert(m.clone());
        let handler = scripted(|_| Err(Error::render("helm", "missing chart").into()));
        let (ctx, token) = context(store.clone(), handler);

        reconcile(Arc::new(m), ctx).await.unwrap_err();

        let statuses = store.statuses.lock().unwrap().clone();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].state, ManifestState::Processing);
        assert_eq!(statuses[0].observed_generation, Some(2));
        assert_eq!(statuses[0].observed_hash, Some(7));
        assert_eq!(statuses[1].state, ManifestState::Error);
        assert_eq!(statuses[1].observed_hash, Some(7));
        token.cancel();
    }

    #[test]
    fn test_error_policy_backs_off_permanent_errors() {
        let (queue, _rx) = JobQueue::new();
        let ctx = Arc::new(Context {
            store: Arc::new(MockManifestStore::new()),
            queue,
            field_owner: FIELD_OWNER.to_string(),
            job_timeout: Duration::from_secs(1),
            requeue_interval: Duration::from_secs(300),
        });
        let m = Arc::new(live("web"));

        let action = error_policy(m.clone(), &JobError::Dropped, ctx.clone());
        assert_eq!(action, Action::requeue(ERROR_REQUEUE));

        let render = JobError::from(Error::render("helm", "chart not cached"));
        assert_eq!(error_policy(m.clone(), &render, ctx.clone()), Action::requeue(ERROR_REQUEUE));

        let invalid = JobError::from(Error::validation_for_field("spec.values", "values must be an object"));
        assert_eq!(error_policy(m.clone(), &invalid, ctx.clone()), Action::requeue(Duration::from_secs(300)));

        assert_eq!(
            error_policy(m, &JobError::MissingNamespace, ctx),
            Action::requeue(Duration::from_secs(300))
        );
    }
}
