//! Common types for manifold: CRDs, errors, parsing and hashing

#![deny(missing_docs)]

pub mod crd;
pub mod desired;
pub mod error;
pub mod hash;
pub mod kube_utils;
pub mod parse;
pub mod yaml;

pub use desired::{BaseResource, DesiredState};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager identity for every write against the target cluster
pub const DEFAULT_FIELD_OWNER: &str = "manifold.dev/manifest-operator";

/// Finalizer guarding uninstall of a Manifest's rendered bundle
pub const OPERATOR_FINALIZER: &str = "operator.manifold.dev/manifest";

/// Finalizer binding the companion resource to its Manifest
pub const COMPANION_FINALIZER: &str = "resource.manifold.dev/finalizer";

/// Label naming the controller that manages an applied object
pub const MANAGED_BY_LABEL_KEY: &str = "manifold.dev/managed-by";

/// Value of [`MANAGED_BY_LABEL_KEY`]
pub const MANAGED_BY_LABEL_VALUE: &str = "manifold";

/// Label carrying the owning Manifest's name
pub const OWNER_NAME_LABEL_KEY: &str = "manifold.dev/owner-name";

/// Label carrying the owning Manifest's namespace
pub const OWNER_NAMESPACE_LABEL_KEY: &str = "manifold.dev/owner-namespace";
