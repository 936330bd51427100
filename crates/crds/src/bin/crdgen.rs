//! Prints the Chart CRD manifest as YAML, for `kubectl apply -f -`.

use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&crds::Chart::crd())?);
    Ok(())
}
