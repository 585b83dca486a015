//! Prints the ManagedServer CustomResourceDefinition as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/managedserver.yaml`

use crds::ManagedServer;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = serde_yaml::to_string(&ManagedServer::crd())?;
    print!("{crd}");
    Ok(())
}
