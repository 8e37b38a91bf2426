use kube::CustomResourceExt;

fn main() {
    print!(
        "{}",
        serde_yaml::to_string(&pullup_operator::resources::resourcesets::ResourceSet::crd())
            .unwrap()
    )
}
