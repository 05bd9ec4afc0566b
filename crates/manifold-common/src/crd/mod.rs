//! Custom Resource Definitions for manifold

mod manifest;

pub use manifest::{
    ContentSource, InstallSpec, Manifest, ManifestSpec, ManifestState, ManifestStatus,
    RendererKind,
};
