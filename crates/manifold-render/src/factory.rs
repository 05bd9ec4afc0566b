//! Backend selection

use std::path::PathBuf;
use std::sync::Arc;

use manifold_common::crd::RendererKind;

use crate::applier::Applier;
use crate::helm::HelmRenderSource;
use crate::kustomize::KustomizeRenderSource;
use crate::source::RenderSource;

/// Build the render source for a renderer kind.
///
/// Selection happens once here; nothing downstream inspects the backend type.
pub fn new_render_source(
    kind: RendererKind,
    applier: Arc<Applier>,
    cache_dir: impl Into<PathBuf>,
) -> Arc<dyn RenderSource> {
    match kind {
        RendererKind::Helm => Arc::new(HelmRenderSource::new(applier, cache_dir)),
        RendererKind::Kustomize => Arc::new(KustomizeRenderSource::new(applier, cache_dir)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockDynamicClient;
    use crate::mapper::StaticRestMapper;

    #[test]
    fn test_factory_picks_backend_by_kind() {
        let applier = Arc::new(Applier::new(
            Arc::new(MockDynamicClient::new()),
            Arc::new(StaticRestMapper::new()),
            "owner",
        ));
        let helm = new_render_source(RendererKind::Helm, applier.clone(), "/tmp/manifold");
        let kustomize = new_render_source(RendererKind::Kustomize, applier, "/tmp/manifold");
        assert_eq!(helm.name(), "helm");
        assert_eq!(kustomize.name(), "kustomize");
        assert_eq!(helm.applier().field_owner(), "owner");
    }
}
