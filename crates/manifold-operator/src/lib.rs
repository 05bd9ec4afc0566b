//! Manifest reconciler for manifold
//!
//! Wires the render pipeline into a Kubernetes controller. Reconciliations are
//! turned into jobs on a shared queue and processed by a fixed-size worker
//! pool; each job renders, change-checks and applies one Manifest and runs its
//! companion resource hooks.

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod error;
pub mod handler;
pub mod hooks;
pub mod store;
pub mod workers;

#[cfg(test)]
mod testing;

pub use config::OperatorConfig;
pub use error::JobError;
pub use handler::ManifestJobHandler;
pub use store::{KubeManifestStore, ManifestStore};
pub use workers::{JobQueue, WorkerPool, DEFAULT_WORKERS_COUNT};
