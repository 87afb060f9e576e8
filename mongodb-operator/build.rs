use kube::CustomResourceExt;
use mongodb_operator_types::MongoDBCluster;
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/operator.kubestack.com_mongodbs_crd.yaml",
        serde_yaml::to_string(&MongoDBCluster::crd()).unwrap(),
    )
    .unwrap();
}
