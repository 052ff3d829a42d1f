//! In-memory `ClusterApi` for tests. Mirrors API-server create/replace semantics closely
//! enough to observe idempotence: create on an existing name fails with `AlreadyExists`,
//! replace on a missing name fails with 404.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use kube::core::DynamicObject;

use crate::{ClusterApi, ClusterError, DiscoveredResource, ResourceCoordinates};

/// Recorded call against the fake, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Discover(String),
    Create { gvr: String, namespace: Option<String>, name: String },
    Replace { gvr: String, namespace: Option<String>, name: String },
}

/// (gvr, namespace, name)
pub type ObjectKey = (String, Option<String>, String);

#[derive(Default)]
struct State {
    served: BTreeMap<String, Vec<DiscoveredResource>>,
    objects: BTreeMap<ObjectKey, DynamicObject>,
    calls: Vec<Call>,
    rejected_kinds: Vec<String>,
    rejected_replaces: Vec<String>,
    discovery_down: bool,
    next_rv: u64,
}

#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Core configmaps/secrets/namespaces/pods and apps deployments, including subresource entries.
    pub fn standard() -> Self {
        let me = Self::new();
        me.serve(
            "v1",
            vec![
                DiscoveredResource::new("configmaps", "ConfigMap", true),
                DiscoveredResource::new("namespaces", "Namespace", false),
                DiscoveredResource::new("namespaces/status", "Namespace", false),
                DiscoveredResource::new("pods/log", "Pod", true),
                DiscoveredResource::new("pods", "Pod", true),
                DiscoveredResource::new("secrets", "Secret", true),
            ],
        );
        me.serve(
            "apps/v1",
            vec![
                DiscoveredResource::new("deployments/scale", "Scale", true),
                DiscoveredResource::new("deployments", "Deployment", true),
            ],
        );
        me
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn serve(&self, api_version: &str, resources: Vec<DiscoveredResource>) {
        self.lock().served.insert(api_version.to_string(), resources);
    }

    /// Every create/replace of `kind` fails with a 422.
    pub fn reject_kind(&self, kind: &str) {
        self.lock().rejected_kinds.push(kind.to_string());
    }

    /// Creates of `kind` still go through, but every replace fails with a 409 conflict.
    pub fn reject_replace(&self, kind: &str) {
        self.lock().rejected_replaces.push(kind.to_string());
    }

    pub fn set_discovery_down(&self, down: bool) {
        self.lock().discovery_down = down;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn objects(&self) -> BTreeMap<ObjectKey, DynamicObject> {
        self.lock().objects.clone()
    }

    pub fn get(&self, gvr: &str, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        self.lock().objects.get(&(gvr.to_string(), namespace.map(str::to_string), name.to_string())).cloned()
    }

    fn key(coords: &ResourceCoordinates, namespace: Option<&str>, obj: &DynamicObject) -> Result<ObjectKey, ClusterError> {
        let name = obj.metadata.name.clone().ok_or(ClusterError::MissingName)?;
        let ns = if coords.namespaced { namespace.map(str::to_string) } else { None };
        Ok((coords.gvr(), ns, name))
    }

    fn check_kind(state: &State, coords: &ResourceCoordinates) -> Result<(), ClusterError> {
        if state.rejected_kinds.contains(&coords.api_resource.kind) {
            return Err(ClusterError::Api { code: 422, reason: "Invalid".into(), message: format!("{} rejected", coords.api_resource.kind) });
        }
        Ok(())
    }

    fn stamp(state: &mut State, obj: &DynamicObject) -> DynamicObject {
        state.next_rv += 1;
        let mut stored = obj.clone();
        stored.metadata.resource_version = Some(state.next_rv.to_string());
        stored
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn server_resources(&self, api_version: &str) -> Result<Vec<DiscoveredResource>, ClusterError> {
        let mut s = self.lock();
        s.calls.push(Call::Discover(api_version.to_string()));
        if s.discovery_down {
            return Err(ClusterError::Api { code: 503, reason: "ServiceUnavailable".into(), message: "discovery unavailable".into() });
        }
        s.served.get(api_version).cloned().ok_or_else(|| ClusterError::Api {
            code: 404,
            reason: "NotFound".into(),
            message: format!("the server could not find the requested resource ({api_version})"),
        })
    }

    async fn create(&self, coords: &ResourceCoordinates, namespace: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let key = Self::key(coords, namespace, obj)?;
        let mut s = self.lock();
        s.calls.push(Call::Create { gvr: key.0.clone(), namespace: key.1.clone(), name: key.2.clone() });
        Self::check_kind(&s, coords)?;
        if s.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!("{} \"{}\" already exists", coords.api_resource.plural, key.2)));
        }
        let stored = Self::stamp(&mut s, obj);
        s.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(&self, coords: &ResourceCoordinates, namespace: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let key = Self::key(coords, namespace, obj)?;
        let mut s = self.lock();
        s.calls.push(Call::Replace { gvr: key.0.clone(), namespace: key.1.clone(), name: key.2.clone() });
        Self::check_kind(&s, coords)?;
        if s.rejected_replaces.contains(&coords.api_resource.kind) {
            return Err(ClusterError::Api {
                code: 409,
                reason: "Conflict".into(),
                message: format!("Operation cannot be fulfilled on {} \"{}\"", coords.api_resource.plural, key.2),
            });
        }
        if !s.objects.contains_key(&key) {
            return Err(ClusterError::Api { code: 404, reason: "NotFound".into(), message: format!("{} \"{}\" not found", coords.api_resource.plural, key.2) });
        }
        let stored = Self::stamp(&mut s, obj);
        s.objects.insert(key, stored.clone());
        Ok(stored)
    }
}
