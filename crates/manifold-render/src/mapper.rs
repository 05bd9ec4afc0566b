//! REST mapping resolution from group/version/kind
//!
//! One process-wide cache shared by every worker through `Arc<dyn RestMapper>`.
//! Invalidation is a best-effort hint: a worker that resets the cache while
//! another is reading only causes one extra discovery pass.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use kube::api::GroupVersionKind;
use kube::discovery::{ApiResource, Discovery, Scope};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, warn};

use manifold_common::kube_utils::gvk_display;
use manifold_common::Error;

/// Where a kind is served and whether its objects live in a namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestMapping {
    /// Endpoint description (group, version, plural)
    pub resource: ApiResource,
    /// True for namespaced kinds
    pub namespaced: bool,
}

impl RestMapping {
    /// Mapping for a kind whose scope is already known
    pub fn new(resource: ApiResource, namespaced: bool) -> Self {
        Self {
            resource,
            namespaced,
        }
    }
}

/// Resolves kinds to REST endpoints
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RestMapper: Send + Sync {
    /// Resolve a kind; an unknown kind is `Error::NoMatch`
    async fn mapping(&self, gvk: &GroupVersionKind) -> Result<RestMapping, Error>;

    /// Drop every cached mapping so the next lookup rediscovers
    fn reset(&self);
}

/// Mapper backed by API discovery.
///
/// Discovery runs lazily on the first lookup after construction or after
/// `reset()`. A miss on a populated cache is reported as `NoMatch` without a
/// new discovery pass; callers decide whether to reset and retry.
pub struct DiscoveryRestMapper {
    client: Client,
    entries: DashMap<GroupVersionKind, RestMapping>,
    populated: AtomicBool,
}

impl DiscoveryRestMapper {
    /// Create an empty mapper; nothing is discovered until the first lookup
    pub fn new(client: Client) -> Self {
        Self {
            client,
            entries: DashMap::new(),
            populated: AtomicBool::new(false),
        }
    }

    async fn refresh(&self) -> Result<(), Error> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| {
                warn!(error = %e, "API discovery failed");
                Error::from(e)
            })?;

        let mut found = 0usize;
        for group in discovery.groups() {
            for version in group.versions() {
                for (resource, caps) in group.versioned_resources(version) {
                    let gvk =
                        GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
                    let namespaced = matches!(caps.scope, Scope::Namespaced);
                    self.entries.insert(gvk, RestMapping::new(resource, namespaced));
                    found += 1;
                }
            }
        }
        self.populated.store(true, Ordering::Release);
        info!(resources = found, "REST mapper populated via API discovery");
        Ok(())
    }
}

#[async_trait]
impl RestMapper for DiscoveryRestMapper {
    async fn mapping(&self, gvk: &GroupVersionKind) -> Result<RestMapping, Error> {
        if !self.populated.load(Ordering::Acquire) {
            self.refresh().await?;
        }

        if let Some(mapping) = self.entries.get(gvk) {
            return Ok(mapping.clone());
        }

        debug!(gvk = %gvk_display(gvk), "no REST mapping");
        Err(Error::no_match(
            gvk_display(gvk),
            "kind is not served by the API server",
        ))
    }

    fn reset(&self) {
        self.entries.clear();
        self.populated.store(false, Ordering::Release);
        debug!("REST mapper cache reset");
    }
}

/// Mapper over a fixed table, for offline use and tests
#[derive(Default)]
pub struct StaticRestMapper {
    entries: DashMap<GroupVersionKind, RestMapping>,
}

impl StaticRestMapper {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind; `plural` is the URL resource name
    pub fn with(self, api_version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        let (group, version) = manifold_common::kube_utils::parse_api_version(api_version);
        let gvk = GroupVersionKind::gvk(&group, &version, kind);
        let resource = ApiResource {
            group,
            version,
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
        };
        self.entries.insert(gvk, RestMapping::new(resource, namespaced));
        self
    }
}

#[async_trait]
impl RestMapper for StaticRestMapper {
    async fn mapping(&self, gvk: &GroupVersionKind) -> Result<RestMapping, Error> {
        self.entries
            .get(gvk)
            .map(|m| m.clone())
            .ok_or_else(|| Error::no_match(gvk_display(gvk), "kind is not registered"))
    }

    fn reset(&self) {}
}
