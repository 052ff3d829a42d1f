use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use tfo_core::{JobRef, TERRAFORM_GROUP, TERRAFORM_KIND, TERRAFORM_PLURAL, TERRAFORM_VERSION};
use tracing::{debug, info};

pub fn terraform_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(TERRAFORM_GROUP, TERRAFORM_VERSION, TERRAFORM_KIND);
    ApiResource::from_gvk_with_plural(&gvk, TERRAFORM_PLURAL)
}

/// Build a job reference from a Terraform custom resource. Objects without a uid are skipped.
pub fn job_from_terraform(obj: &DynamicObject) -> Option<JobRef> {
    let uid = obj.metadata.uid.clone()?;
    let outputs_secret = obj
        .data
        .pointer("/spec/outputsSecret")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    Some(
        JobRef::new(uid, obj.metadata.namespace.clone().unwrap_or_default(), outputs_secret)
            .with_name(obj.metadata.name.clone().unwrap_or_default()),
    )
}

/// List Terraform resources (all namespaces or one) as job references.
pub async fn list_jobs(client: Client, namespace: Option<&str>) -> Result<Vec<JobRef>> {
    let ar = terraform_resource();
    let api: Api<DynamicObject> = match namespace {
        Some(ns) => Api::namespaced_with(client, ns, &ar),
        None => Api::all_with(client, &ar),
    };
    let list = api.list(&ListParams::default()).await.context("listing Terraform resources")?;
    let total = list.items.len();
    let jobs: Vec<JobRef> = list.items.iter().filter_map(job_from_terraform).collect();
    if jobs.len() < total {
        debug!(skipped = total - jobs.len(), "terraform objects without uid");
    }
    info!(ns = ?namespace, count = jobs.len(), "listed terraform jobs");
    Ok(jobs)
}

/// Producer of job references for the work queue.
#[async_trait]
pub trait JobLister: Send + Sync {
    async fn list(&self) -> Result<Vec<JobRef>>;
}

/// Lists Terraform resources from the cluster, optionally limited to one namespace.
#[derive(Clone)]
pub struct KubeJobLister {
    client: Client,
    namespace: Option<String>,
}

impl KubeJobLister {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }
}

#[async_trait]
impl JobLister for KubeJobLister {
    async fn list(&self) -> Result<Vec<JobRef>> {
        list_jobs(self.client.clone(), self.namespace.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tf(value: serde_json::Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn job_reads_uid_namespace_and_outputs_secret() {
        let obj = tf(serde_json::json!({
            "apiVersion": "tf.isaaguilar.com/v1alpha2",
            "kind": "Terraform",
            "metadata": {"name": "vpc", "namespace": "infra", "uid": "0b4c-11"},
            "spec": {"outputsSecret": "vpc-outputs"}
        }));
        let job = job_from_terraform(&obj).unwrap();
        assert_eq!(job.uid, "0b4c-11");
        assert_eq!(job.name, "vpc");
        assert_eq!(job.namespace, "infra");
        assert_eq!(job.outputs_secret, "vpc-outputs");
        assert!(job.should_poll());
    }

    #[test]
    fn missing_outputs_secret_yields_unpollable_job() {
        let obj = tf(serde_json::json!({
            "apiVersion": "tf.isaaguilar.com/v1alpha2",
            "kind": "Terraform",
            "metadata": {"name": "vpc", "namespace": "infra", "uid": "u"},
            "spec": {}
        }));
        assert!(!job_from_terraform(&obj).unwrap().should_poll());
    }

    #[test]
    fn missing_uid_is_skipped() {
        let obj = tf(serde_json::json!({
            "apiVersion": "tf.isaaguilar.com/v1alpha2",
            "kind": "Terraform",
            "metadata": {"name": "vpc"}
        }));
        assert!(job_from_terraform(&obj).is_none());
    }

    #[test]
    fn terraform_resource_routing() {
        let ar = terraform_resource();
        assert_eq!(ar.api_version, "tf.isaaguilar.com/v1alpha2");
        assert_eq!(ar.plural, "terraforms");
    }
}
