//! tfo kubehub – discovery, dynamic create/replace, and Terraform job listing

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, PostParams},
    core::DynamicObject,
    Client,
};
use tracing::debug;

mod jobs;
mod resolve;
#[cfg(any(test, feature = "fake"))]
pub mod fake;

pub use jobs::{job_from_terraform, list_jobs, terraform_resource, JobLister, KubeJobLister};
pub use resolve::{resolve_kind, split_api_version, ResolveError, ResourceCoordinates};

/// One entry of a group/version discovery document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredResource {
    /// Plural resource name; subresources look like `pods/log`.
    pub name: String,
    pub kind: String,
    pub namespaced: bool,
}

impl DiscoveredResource {
    pub fn new(name: &str, kind: &str, namespaced: bool) -> Self {
        Self { name: name.to_string(), kind: kind.to_string(), namespaced }
    }

    pub fn is_subresource(&self) -> bool {
        self.name.contains('/')
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("object has no metadata.name")]
    MissingName,
    #[error("api error {code} ({reason}): {message}")]
    Api { code: u16, reason: String, message: String },
    #[error(transparent)]
    Kube(kube::Error),
}

impl ClusterError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) if ae.reason == "AlreadyExists" => ClusterError::AlreadyExists(ae.message),
            kube::Error::Api(ae) => ClusterError::Api { code: ae.code, reason: ae.reason, message: ae.message },
            other => ClusterError::Kube(other),
        }
    }
}

/// The cluster operations the reconciler needs. Kind-agnostic: objects are routed by coordinates.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Resources served for `api_version` (`v1` for the core group, `group/version` otherwise).
    async fn server_resources(&self, api_version: &str) -> Result<Vec<DiscoveredResource>, ClusterError>;

    async fn create(&self, coords: &ResourceCoordinates, namespace: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject, ClusterError>;

    /// Full overwrite (PUT) of an existing object, addressed by `obj`'s name.
    async fn replace(&self, coords: &ResourceCoordinates, namespace: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject, ClusterError>;
}

pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from default config")
}

/// `ClusterApi` backed by a live kube client.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(get_kube_client().await?))
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn api(&self, coords: &ResourceCoordinates, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if coords.namespaced => Api::namespaced_with(self.client.clone(), ns, &coords.api_resource),
            _ => Api::all_with(self.client.clone(), &coords.api_resource),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn server_resources(&self, api_version: &str) -> Result<Vec<DiscoveredResource>, ClusterError> {
        let list = if api_version.contains('/') {
            self.client.list_api_group_resources(api_version).await?
        } else {
            self.client.list_core_api_resources(api_version).await?
        };
        debug!(api_version, count = list.resources.len(), "discovery");
        Ok(list
            .resources
            .into_iter()
            .map(|r| DiscoveredResource { name: r.name, kind: r.kind, namespaced: r.namespaced })
            .collect())
    }

    async fn create(&self, coords: &ResourceCoordinates, namespace: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        Ok(self.api(coords, namespace).create(&PostParams::default(), obj).await?)
    }

    async fn replace(&self, coords: &ResourceCoordinates, namespace: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let name = obj.metadata.name.as_deref().ok_or(ClusterError::MissingName)?;
        Ok(self.api(coords, namespace).replace(name, &PostParams::default(), obj).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: "m".into(), reason: reason.into(), code })
    }

    #[test]
    fn already_exists_is_classified_by_reason() {
        assert!(ClusterError::from(api_err(409, "AlreadyExists")).is_already_exists());
        // Optimistic-lock conflicts share the status code but are not "already exists".
        let e = ClusterError::from(api_err(409, "Conflict"));
        assert!(!e.is_already_exists());
        assert!(matches!(e, ClusterError::Api { code: 409, .. }));
    }

    #[test]
    fn subresources_are_detected() {
        assert!(DiscoveredResource::new("pods/log", "Pod", true).is_subresource());
        assert!(!DiscoveredResource::new("pods", "Pod", true).is_subresource());
    }
}
