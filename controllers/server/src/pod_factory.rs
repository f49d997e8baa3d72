//! Renders a `Server` into the Pod that runs it.
//!
//! The Pod is never given a fixed name: it carries a `generateName` of
//! `mc-<server>-` so the API server assigns a unique suffix, and two
//! overlapping reconciliations cannot collide on a name.

use crate::error::ControllerError;
use crds::Server;
use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

/// Image every server Pod runs.
pub const SERVER_IMAGE: &str = "itzg/minecraft-server";

/// Name of the single container in a server Pod.
pub const CONTAINER_NAME: &str = "minecraft-server";

/// Port the Minecraft server listens on.
pub const SERVER_PORT: i32 = 25565;

/// Symbolic name of [`SERVER_PORT`].
pub const SERVER_PORT_NAME: &str = "minecraft";

/// Prefix the API server extends with a random suffix to name the Pod.
pub fn generate_name(server: &Server) -> String {
    format!("mc-{}-", server.name_any())
}

/// Environment for the server container, derived from the Server spec.
///
/// Empty strings are emitted rather than omitted: an empty `WHITELIST` is
/// what tells the image to run a public server.
pub fn server_env(server: &Server) -> Vec<EnvVar> {
    let spec = &server.spec;
    let eula = if spec.eula { "TRUE" } else { "FALSE" };

    [
        ("EULA", eula.to_string()),
        ("TYPE", spec.server_type.clone()),
        ("SERVER_NAME", spec.server_name.clone()),
        ("OPS", spec.ops.join(",")),
        ("WHITELIST", spec.allowlist.join(",")),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    })
    .collect()
}

/// Builds the Pod for a Server, owned by it as controller.
///
/// Fails only when the Server lacks the metadata (name, uid) needed for an
/// owner reference, which means it was not read from the API server.
pub fn render(server: &Server) -> Result<Pod, ControllerError> {
    let owner_ref = server
        .controller_owner_ref(&())
        .ok_or_else(|| ControllerError::OwnerReference(server.name_any()))?;

    Ok(Pod {
        metadata: ObjectMeta {
            generate_name: Some(generate_name(server)),
            namespace: server.namespace(),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: CONTAINER_NAME.to_string(),
                image: Some(SERVER_IMAGE.to_string()),
                env: Some(server_env(server)),
                ports: Some(vec![ContainerPort {
                    container_port: SERVER_PORT,
                    name: Some(SERVER_PORT_NAME.to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    })
}
