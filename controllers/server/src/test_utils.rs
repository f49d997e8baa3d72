//! Test utilities for unit testing the reconciler
//!
//! This module provides fixtures and an in-memory `ClusterStore`.

use crate::error::ControllerError;
use crate::ownership::{OwnerIndex, ServerKey};
use crate::store::ClusterStore;
use crds::{Server, ServerSpec, ServerStatus};
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::core::ErrorResponse;
use kube_runtime::watcher;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Helper to create a Server as the API server would return it
pub fn create_test_server(name: &str, namespace: &str, spec: ServerSpec) -> Server {
    Server {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// Helper to create a Pod with no owner
pub fn create_test_pod(name: &str, namespace: &str, phase: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        status: phase.map(|phase| PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Helper to create a Pod controlled by the named Server
pub fn create_test_pod_owned_by(
    name: &str,
    namespace: &str,
    owner: &str,
    phase: Option<&str>,
) -> Pod {
    let mut pod = create_test_pod(name, namespace, phase);
    pod.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "minecraft.tgik.io/v1alpha1".to_string(),
        kind: "Server".to_string(),
        name: owner.to_string(),
        uid: format!("uid-{owner}"),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }]);
    pod
}

/// Store operation a `MockClusterStore` can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    GetServer,
    CreatePod,
    UpdateStatus,
}

/// API error as the Kubernetes client reports it.
pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} (injected)"),
        reason: reason.to_string(),
        code,
    })
}

/// Whether `err` is an API error with the given status code.
pub fn is_api_error(err: &ControllerError, code: u16) -> bool {
    matches!(err, ControllerError::Kube(kube::Error::Api(resp)) if resp.code == code)
}

/// In-memory `ClusterStore`.
///
/// Created Pods get a generated name and, when an index is attached, are
/// fed into it the way the Pod watcher would. Status writes are checked
/// against the stored resource version like the API server does, and bump it.
#[derive(Debug, Clone, Default)]
pub struct MockClusterStore {
    servers: Arc<Mutex<HashMap<ServerKey, Server>>>,
    created_pods: Arc<Mutex<Vec<Pod>>>,
    status_writes: Arc<Mutex<Vec<(ServerKey, ServerStatus)>>>,
    failing: Arc<Mutex<Vec<StoreOp>>>,
    edit_after_fetch: Arc<Mutex<bool>>,
    index: Option<OwnerIndex>,
}

fn bump_resource_version(server: &mut Server) {
    let next = server
        .metadata
        .resource_version
        .as_deref()
        .and_then(|rv| rv.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    server.metadata.resource_version = Some(next.to_string());
}

impl MockClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds created Pods into `index`.
    pub fn with_index(mut self, index: OwnerIndex) -> Self {
        self.index = Some(index);
        self
    }

    pub fn add_server(&self, server: Server) {
        let key = ServerKey::from_server(&server).unwrap();
        self.servers.lock().unwrap().insert(key, server);
    }

    pub fn server(&self, key: &ServerKey) -> Option<Server> {
        self.servers.lock().unwrap().get(key).cloned()
    }

    /// Makes the next fetch be followed by another writer's update.
    pub fn edit_after_next_fetch(&self) {
        *self.edit_after_fetch.lock().unwrap() = true;
    }

    pub fn fail_on(&self, op: StoreOp) {
        self.failing.lock().unwrap().push(op);
    }

    pub fn created_pods(&self) -> Vec<Pod> {
        self.created_pods.lock().unwrap().clone()
    }

    pub fn status_writes(&self) -> Vec<(ServerKey, ServerStatus)> {
        self.status_writes.lock().unwrap().clone()
    }

    fn check(&self, op: StoreOp) -> Result<(), ControllerError> {
        if self.failing.lock().unwrap().contains(&op) {
            tracing::debug!(?op, "injecting store failure");
            return Err(api_error(503, "ServiceUnavailable").into());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterStore for MockClusterStore {
    async fn get_server(&self, key: &ServerKey) -> Result<Option<Server>, ControllerError> {
        self.check(StoreOp::GetServer)?;
        let mut servers = self.servers.lock().unwrap();
        let fetched = servers.get(key).cloned();
        if std::mem::take(&mut *self.edit_after_fetch.lock().unwrap()) {
            if let Some(stored) = servers.get_mut(key) {
                stored.spec.server_name.push_str(" (edited)");
                bump_resource_version(stored);
            }
        }
        Ok(fetched)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ControllerError> {
        self.check(StoreOp::CreatePod)?;

        let mut created = self.created_pods.lock().unwrap();
        let mut pod = pod.clone();
        let prefix = pod.metadata.generate_name.clone().unwrap_or_default();
        pod.metadata.name = Some(format!("{prefix}{:05}", created.len()));
        pod.metadata.namespace = Some(namespace.to_string());
        pod.metadata.uid = Some(format!("pod-uid-{}", created.len()));
        created.push(pod.clone());
        drop(created);

        if let Some(index) = &self.index {
            index.apply_event(watcher::Event::Apply(pod.clone()));
        }
        Ok(pod)
    }

    async fn update_server_status(
        &self,
        server: &Server,
        status: &ServerStatus,
    ) -> Result<(), ControllerError> {
        self.check(StoreOp::UpdateStatus)?;

        let key = ServerKey::from_server(server)?;
        let mut servers = self.servers.lock().unwrap();
        let Some(stored) = servers.get_mut(&key) else {
            return Err(api_error(404, "NotFound").into());
        };
        if server.metadata.resource_version.is_some()
            && server.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(api_error(409, "Conflict").into());
        }
        stored.status = Some(status.clone());
        bump_resource_version(stored);
        drop(servers);

        self.status_writes
            .lock()
            .unwrap()
            .push((key, status.clone()));
        Ok(())
    }
}
