//! Server CRD
//!
//! Declares a Minecraft server that the server controller realizes as a Pod.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Phase value a Pod reports once its containers are up.
pub const POD_PHASE_RUNNING: &str = "Running";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "minecraft.tgik.io",
    version = "v1alpha1",
    kind = "Server",
    namespaced,
    status = "ServerStatus",
    shortname = "mc",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.serverType"}"#,
    printcolumn = r#"{"name":"Pod","type":"string","jsonPath":".status.podName"}"#,
    printcolumn = r#"{"name":"Running","type":"boolean","jsonPath":".status.running"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    /// The type of Minecraft server to run (VANILLA, PAPER, ...)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_type: String,

    /// The name of the server shown when a user connects
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_name: String,

    /// Users that are ops/admins on the server
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ops: Vec<String>,

    /// Users allowed to join. Empty means the server is open to the public.
    #[serde(default, rename = "allowList", skip_serializing_if = "Vec::is_empty")]
    pub allowlist: Vec<String>,

    /// Acceptance of the Minecraft EULA
    #[serde(default, rename = "EULA", skip_serializing_if = "is_false")]
    pub eula: bool,
}

/// Observed state, written only by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// Name of the Pod realizing this server
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pod_name: String,

    /// Whether that Pod is in the Running phase
    #[serde(default, skip_serializing_if = "is_false")]
    pub running: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}
