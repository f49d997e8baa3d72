//! Cluster store access for the reconciler.
//!
//! `ClusterStore` is the narrow set of API server calls reconciliation
//! needs. `KubeClusterStore` implements it over `kube::Api`; unit tests use
//! the in-memory mock in `test_utils`.

use crate::error::ControllerError;
use crate::ownership::ServerKey;
use crds::{Server, ServerStatus};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::{json, Value};

/// Field manager recorded on every write.
pub const FIELD_MANAGER: &str = "server-controller";

/// Store operations used by the reconciler.
///
/// Each call is a single round trip; none of them retry.
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetches a Server, or `None` if it does not exist.
    async fn get_server(&self, key: &ServerKey) -> Result<Option<Server>, ControllerError>;

    /// Creates a Pod and returns it as stored, with its generated name.
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ControllerError>;

    /// Writes the status subresource of `server`.
    ///
    /// The write is made against `server`'s resource version, so it is
    /// rejected with a conflict if the Server changed since it was read.
    async fn update_server_status(
        &self,
        server: &Server,
        status: &ServerStatus,
    ) -> Result<(), ControllerError>;
}

/// Merge patch for the status subresource.
///
/// Every status field is written explicitly so that a `false` or empty value
/// clears the previous one, and the resource version is included so the API
/// server applies optimistic concurrency.
pub fn status_patch(server: &Server, status: &ServerStatus) -> Value {
    let mut patch = json!({
        "status": {
            "podName": status.pod_name,
            "running": status.running,
        }
    });
    if let Some(resource_version) = server.resource_version() {
        patch["metadata"] = json!({ "resourceVersion": resource_version });
    }
    patch
}

/// `ClusterStore` backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClusterStore {
    client: Client,
}

impl std::fmt::Debug for KubeClusterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterStore").finish_non_exhaustive()
    }
}

impl KubeClusterStore {
    /// Creates a store using the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ClusterStore for KubeClusterStore {
    async fn get_server(&self, key: &ServerKey) -> Result<Option<Server>, ControllerError> {
        let api: Api<Server> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ControllerError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(api.create(&pp, pod).await?)
    }

    async fn update_server_status(
        &self,
        server: &Server,
        status: &ServerStatus,
    ) -> Result<(), ControllerError> {
        let namespace = server
            .namespace()
            .ok_or(ControllerError::MissingObjectKey(".metadata.namespace"))?;
        let api: Api<Server> = Api::namespaced(self.client.clone(), &namespace);

        let pp = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let patch = status_patch(server, status);
        api.patch_status(&server.name_any(), &pp, &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
