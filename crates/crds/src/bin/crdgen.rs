//! Prints the CustomResourceDefinition YAML for every Kinecraft CRD.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/servers.yaml`

use crds::Server;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Server::crd())?);
    Ok(())
}
