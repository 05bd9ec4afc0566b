//! Bounded worker pool consuming reconciliation jobs
//!
//! Workers share one multi-consumer queue and one cancellation token. Each
//! worker is either waiting for the next job or processing exactly one; on
//! cancellation it stops picking up work but never interrupts a job in
//! flight. Every job gets exactly one result on its own oneshot channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use manifold_common::crd::Manifest;

use crate::error::JobError;

/// Pool size used when none (or a non-positive one) is configured
pub const DEFAULT_WORKERS_COUNT: usize = 4;

/// What a job should drive the Manifest toward
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Render and apply the bundle, then run the post-creation hook
    Install,
    /// Run the pre-deletion hook, then render and delete the bundle
    Uninstall,
}

/// Successful job outcome
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The bundle was applied; carries the applied content hash
    Installed {
        /// Content hash recorded for the applied state
        hash: u32,
    },
    /// The content hash matched the last apply; nothing was written
    Unchanged {
        /// Content hash that matched
        hash: u32,
    },
    /// Deletions were issued and may still be in progress
    Uninstalling,
    /// Every bundle object is confirmed absent
    Uninstalled,
}

/// Result delivered on a job's response channel
pub type JobResult = Result<JobOutcome, JobError>;

/// One unit of work plus its private response channel
pub struct ReconcileJob {
    /// Manifest snapshot the job works on
    pub manifest: Arc<Manifest>,
    /// Requested operation
    pub operation: Operation,
    respond_to: oneshot::Sender<JobResult>,
}

impl ReconcileJob {
    /// Create a job and the receiver its result will arrive on
    pub fn new(
        manifest: Arc<Manifest>,
        operation: Operation,
    ) -> (Self, oneshot::Receiver<JobResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                manifest,
                operation,
                respond_to: tx,
            },
            rx,
        )
    }
}

/// Processes one job; shared by every worker
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Run `operation` for `manifest`
    async fn handle(&self, manifest: Arc<Manifest>, operation: Operation) -> JobResult;
}

/// Producer side of the job queue
#[derive(Clone)]
pub struct JobQueue {
    tx: flume::Sender<ReconcileJob>,
}

impl JobQueue {
    /// Create an unbounded queue; the receiver is handed to `WorkerPool::start`
    pub fn new() -> (Self, flume::Receiver<ReconcileJob>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }

    /// Enqueue a job and return the channel its result arrives on
    pub fn submit(
        &self,
        manifest: Arc<Manifest>,
        operation: Operation,
    ) -> Result<oneshot::Receiver<JobResult>, JobError> {
        let (job, rx) = ReconcileJob::new(manifest, operation);
        self.tx.send(job).map_err(|_| JobError::QueueClosed)?;
        Ok(rx)
    }

    /// Jobs waiting for a worker
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// Fixed-size set of long-lived workers.
///
/// `set_size` only affects later `start` calls; a running pool is never
/// resized.
#[derive(Debug)]
pub struct WorkerPool {
    size: AtomicUsize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    /// Pool with [`DEFAULT_WORKERS_COUNT`] workers
    pub fn new() -> Self {
        Self {
            size: AtomicUsize::new(DEFAULT_WORKERS_COUNT),
        }
    }

    /// Configured pool size
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Set the pool size; a non-positive value resets it to the default
    pub fn set_size(&self, size: i64) {
        let size = usize::try_from(size)
            .ok()
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_WORKERS_COUNT);
        self.size.store(size, Ordering::Relaxed);
    }

    /// Spawn `size()` workers draining `jobs` until `token` is cancelled
    pub fn start(
        &self,
        token: CancellationToken,
        jobs: flume::Receiver<ReconcileJob>,
        handler: Arc<dyn JobHandler>,
    ) -> Vec<JoinHandle<()>> {
        let size = self.size();
        info!(workers = size, "starting worker pool");
        (0..size)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    token.clone(),
                    jobs.clone(),
                    handler.clone(),
                ))
            })
            .collect()
    }
}

async fn run_worker(
    id: usize,
    token: CancellationToken,
    jobs: flume::Receiver<ReconcileJob>,
    handler: Arc<dyn JobHandler>,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(worker = id, "worker stopped");
                return;
            }
            job = jobs.recv_async() => match job {
                Ok(job) => process(id, job, &handler).await,
                Err(_) => {
                    debug!(worker = id, "job queue closed, worker stopped");
                    return;
                }
            }
        }
    }
}

async fn process(id: usize, job: ReconcileJob, handler: &Arc<dyn JobHandler>) {
    let ReconcileJob {
        manifest,
        operation,
        respond_to,
    } = job;
    let key = manifest.cache_key();
    debug!(worker = id, manifest = %key, ?operation, "processing job");

    // Run on its own task so a panicking handler still produces a result
    let handler = handler.clone();
    let result = match tokio::spawn(async move { handler.handle(manifest, operation).await }).await
    {
        Ok(result) => result,
        Err(e) => {
            error!(worker = id, manifest = %key, error = %e, "job handler failed");
            Err(JobError::Internal(e.to_string()))
        }
    };

    if respond_to.send(result).is_err() {
        debug!(worker = id, manifest = %key, "job caller went away before the result");
    }
}
