//! tfo apply: turn one polled object description into a create-or-update on the target cluster.
//!
//! Update is a blind full replace, not a merge or patch. Failures are logged and
//! reported as an outcome; nothing is retried here.

#![forbid(unsafe_code)]

use std::sync::Arc;

use kube::core::DynamicObject;
use metrics::counter;
use tfo_core::ORIGINAL_NAME_LABEL;
use tfo_kubehub::{resolve_kind, ClusterApi};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    /// Never reached the create call (undecodable or unroutable object).
    Skipped,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("could not decode object: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("object has no apiVersion/kind")]
    MissingType,
    #[error("{kind} object has no metadata.name")]
    MissingName { kind: String },
}

impl ApplyError {
    /// Kind of the rejected object, when decoding got that far.
    pub fn kind(&self) -> &str {
        match self {
            ApplyError::MissingName { kind } => kind,
            _ => "",
        }
    }
}

/// An object ready to be written, with the type it routes by.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub obj: DynamicObject,
    pub api_version: String,
    pub kind: String,
}

/// Decode an object description and make it fit for a fresh create in the target cluster.
pub fn prepare_object(raw: &[u8]) -> Result<Prepared, ApplyError> {
    let mut obj: DynamicObject = serde_json::from_slice(raw)?;
    let (api_version, kind) = match obj.types.as_ref() {
        Some(t) if !t.api_version.is_empty() && !t.kind.is_empty() => (t.api_version.clone(), t.kind.clone()),
        _ => return Err(ApplyError::MissingType),
    };
    restore_original_name(&mut obj);
    strip_identity(&mut obj);
    match obj.metadata.name.as_deref() {
        Some(n) if !n.is_empty() => Ok(Prepared { obj, api_version, kind }),
        _ => Err(ApplyError::MissingName { kind }),
    }
}

/// Objects are renamed on the hub to avoid collisions; the label records the real name.
pub fn restore_original_name(obj: &mut DynamicObject) {
    let original = obj.metadata.labels.as_ref().and_then(|l| l.get(ORIGINAL_NAME_LABEL)).cloned();
    if let Some(name) = original {
        obj.metadata.name = Some(name);
    }
}

/// Drop fields assigned by the cluster the object was read from.
pub fn strip_identity(obj: &mut DynamicObject) {
    let meta = &mut obj.metadata;
    meta.resource_version = None;
    meta.uid = None;
    meta.owner_references = None;
    meta.managed_fields = None;
}

/// Applies object descriptions, one create-or-update per object.
#[derive(Clone)]
pub struct Reconciler {
    cluster: Arc<dyn ClusterApi>,
}

impl Reconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    pub async fn apply(&self, raw: &[u8], namespace: &str) -> ApplyOutcome {
        let Prepared { mut obj, api_version, kind } = match prepare_object(raw) {
            Ok(p) => p,
            Err(e) => {
                warn!(kind = e.kind(), namespace, error = %e, "skipping object");
                counter!("objects_skipped_total", 1u64);
                return ApplyOutcome::Skipped;
            }
        };
        let name = obj.metadata.name.clone().unwrap_or_default();

        let coords = match resolve_kind(self.cluster.as_ref(), &api_version, &kind).await {
            Ok(c) => c,
            Err(e) => {
                warn!(kind = %kind, namespace, name = %name, error = %e, "no route for object; skipping");
                counter!("objects_skipped_total", 1u64);
                return ApplyOutcome::Skipped;
            }
        };
        let target_ns = if coords.namespaced {
            obj.metadata.namespace = Some(namespace.to_string());
            Some(namespace)
        } else {
            obj.metadata.namespace = None;
            None
        };
        let ns_label = target_ns.unwrap_or("");

        match self.cluster.create(&coords, target_ns, &obj).await {
            Ok(_) => {
                info!(kind = %kind, namespace = ns_label, name = %name, "created");
                counter!("objects_created_total", 1u64);
                ApplyOutcome::Created
            }
            Err(e) if e.is_already_exists() => {
                info!(kind = %kind, namespace = ns_label, name = %name, "already exists; updating");
                match self.cluster.replace(&coords, target_ns, &obj).await {
                    Ok(_) => {
                        info!(kind = %kind, namespace = ns_label, name = %name, "updated");
                        counter!("objects_updated_total", 1u64);
                        ApplyOutcome::Updated
                    }
                    Err(e) => {
                        error!(kind = %kind, namespace = ns_label, name = %name, error = %e, "update failed");
                        counter!("objects_failed_total", 1u64);
                        ApplyOutcome::Failed
                    }
                }
            }
            Err(e) => {
                error!(kind = %kind, namespace = ns_label, name = %name, error = %e, "create failed");
                counter!("objects_failed_total", 1u64);
                ApplyOutcome::Failed
            }
        }
    }
}
