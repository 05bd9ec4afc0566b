//! Render sources and the applier for manifold
//!
//! Turns a [`DesiredState`](manifold_common::DesiredState) into manifest text
//! (templated chart or overlay), transforms the parsed objects, and writes
//! them to the target cluster with forced server-side apply.

#![deny(missing_docs)]

pub mod applier;
pub mod cache;
pub mod client;
pub mod factory;
pub mod helm;
pub mod kustomize;
pub mod mapper;
pub mod source;
pub mod transform;

pub use applier::Applier;
pub use client::{DynamicClient, KubeDynamicClient};
pub use factory::new_render_source;
pub use mapper::{DiscoveryRestMapper, RestMapper, RestMapping, StaticRestMapper};
pub use source::{RenderResult, RenderSource};
pub use transform::{ManagedByLabels, ObjectTransform, SetNamespace};
