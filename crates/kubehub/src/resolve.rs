use kube::core::ApiResource;
use tracing::debug;

use crate::{ClusterApi, ClusterError};

/// Where an object of a given kind lives on this cluster. Valid for one reconciliation only.
#[derive(Debug, Clone)]
pub struct ResourceCoordinates {
    pub api_resource: ApiResource,
    pub namespaced: bool,
}

impl ResourceCoordinates {
    /// `group/version/resource`, or `version/resource` for the core group.
    pub fn gvr(&self) -> String {
        let ar = &self.api_resource;
        if ar.group.is_empty() {
            format!("{}/{}", ar.version, ar.plural)
        } else {
            format!("{}/{}/{}", ar.group, ar.version, ar.plural)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("discovery for {api_version} failed: {source}")]
    Discovery { api_version: String, source: ClusterError },
    #[error("kind {kind} is not served by {api_version}")]
    NotFound { api_version: String, kind: String },
}

/// Split `group/version` (or a bare core version like `v1`) into its parts.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    api_version.split_once('/').unwrap_or(("", api_version))
}

/// Resolve `kind` in `api_version` via live discovery. Not cached: every call hits the API server.
pub async fn resolve_kind(cluster: &dyn ClusterApi, api_version: &str, kind: &str) -> Result<ResourceCoordinates, ResolveError> {
    let resources = cluster
        .server_resources(api_version)
        .await
        .map_err(|source| ResolveError::Discovery { api_version: api_version.to_string(), source })?;
    let found = resources
        .into_iter()
        .find(|r| r.kind == kind && !r.is_subresource())
        .ok_or_else(|| ResolveError::NotFound { api_version: api_version.to_string(), kind: kind.to_string() })?;
    let (group, version) = split_api_version(api_version);
    debug!(api_version, kind, resource = %found.name, namespaced = found.namespaced, "kind resolved");
    Ok(ResourceCoordinates {
        api_resource: ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            plural: found.name,
        },
        namespaced: found.namespaced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Call, InMemoryCluster};
    use crate::DiscoveredResource;

    #[test]
    fn split_core_and_grouped() {
        assert_eq!(split_api_version("v1"), ("", "v1"));
        assert_eq!(split_api_version("apps/v1"), ("apps", "v1"));
        assert_eq!(split_api_version("tf.isaaguilar.com/v1alpha2"), ("tf.isaaguilar.com", "v1alpha2"));
    }

    #[test]
    fn gvr_rendering() {
        let core = ResourceCoordinates {
            api_resource: ApiResource { group: String::new(), version: "v1".into(), api_version: "v1".into(), kind: "ConfigMap".into(), plural: "configmaps".into() },
            namespaced: true,
        };
        assert_eq!(core.gvr(), "v1/configmaps");
        let apps = ResourceCoordinates {
            api_resource: ApiResource { group: "apps".into(), version: "v1".into(), api_version: "apps/v1".into(), kind: "Deployment".into(), plural: "deployments".into() },
            namespaced: true,
        };
        assert_eq!(apps.gvr(), "apps/v1/deployments");
    }

    #[tokio::test]
    async fn resolves_core_kind() {
        let cluster = InMemoryCluster::standard();
        let coords = resolve_kind(&cluster, "v1", "ConfigMap").await.unwrap();
        assert_eq!(coords.gvr(), "v1/configmaps");
        assert!(coords.namespaced);
        assert_eq!(coords.api_resource.group, "");
        assert_eq!(coords.api_resource.kind, "ConfigMap");
    }

    #[tokio::test]
    async fn resolves_cluster_scoped_kind() {
        let cluster = InMemoryCluster::standard();
        let coords = resolve_kind(&cluster, "v1", "Namespace").await.unwrap();
        assert_eq!(coords.gvr(), "v1/namespaces");
        assert!(!coords.namespaced);
    }

    #[tokio::test]
    async fn skips_subresource_entries_listed_first() {
        let cluster = InMemoryCluster::standard();
        // `pods/log` precedes `pods` in the discovery document
        let coords = resolve_kind(&cluster, "v1", "Pod").await.unwrap();
        assert_eq!(coords.api_resource.plural, "pods");
    }

    #[tokio::test]
    async fn kind_served_only_as_subresource_is_not_found() {
        let cluster = InMemoryCluster::standard();
        let err = resolve_kind(&cluster, "apps/v1", "Scale").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { ref kind, .. } if kind == "Scale"));
    }

    #[tokio::test]
    async fn unknown_group_version_is_a_discovery_error() {
        let cluster = InMemoryCluster::standard();
        let err = resolve_kind(&cluster, "example.com/v1", "Widget").await.unwrap_err();
        assert!(matches!(err, ResolveError::Discovery { .. }), "err={err}");
    }

    #[tokio::test]
    async fn every_call_queries_discovery() {
        let cluster = InMemoryCluster::new();
        cluster.serve("example.com/v1", vec![DiscoveredResource::new("widgets", "Widget", false)]);
        for _ in 0..3 {
            let coords = resolve_kind(&cluster, "example.com/v1", "Widget").await.unwrap();
            assert_eq!(coords.gvr(), "example.com/v1/widgets");
        }
        let discovers = cluster.calls().into_iter().filter(|c| matches!(c, Call::Discover(_))).count();
        assert_eq!(discovers, 3);
    }

    #[tokio::test]
    async fn discovery_outage_surfaces() {
        let cluster = InMemoryCluster::standard();
        cluster.set_discovery_down(true);
        assert!(matches!(resolve_kind(&cluster, "v1", "ConfigMap").await, Err(ResolveError::Discovery { .. })));
    }
}
