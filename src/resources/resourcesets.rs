use kube::{CustomResource, Resource, ResourceExt};
use schemars::{schema::Schema, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A group of templated Kubernetes objects that make up the preview environment of one
/// pull request.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "ResourceSet",
    group = "pullup.dev",
    version = "v1alpha1",
    namespaced,
    status = "ResourceSetStatus",
    shortname = "rs",
    printcolumn = r#"{"name":"PR", "type":"integer", "jsonPath":".spec.number"}"#,
    printcolumn = r#"{"name":"Head", "type":"string", "jsonPath":".spec.head.sha"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSetSpec {
    /// Manifests to materialize. String values may contain template expressions, which are
    /// rendered against this ResourceSet before the objects are applied.
    #[serde(default)]
    #[schemars(schema_with = "resources_schema")]
    pub resources: Vec<Value>,
    /// The pull request number.
    #[serde(default)]
    pub number: i64,
    /// The branch the pull request merges into.
    #[serde(default)]
    pub base: Commit,
    /// The pull request branch.
    #[serde(default)]
    pub head: Commit,
}

fn resources_schema(_: &mut schemars::gen::SchemaGenerator) -> Schema {
    serde_json::from_value(json!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        }
    }))
    .unwrap()
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct Commit {
    /// Git reference, e.g. a branch name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<String>,
    /// Commit SHA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

impl Commit {
    fn template_value(&self) -> Value {
        json!({
            "Ref": self.r#ref.as_deref().unwrap_or_default(),
            "SHA": self.sha.as_deref().unwrap_or_default(),
        })
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct ResourceSetStatus {}

impl ResourceSet {
    /// The data that resource templates are rendered against.
    ///
    /// Besides the serialized object under `metadata` and `spec`, these fields are
    /// exposed with capitalized names: `APIVersion`, `Kind`, `Name`, `Namespace`, `UID`,
    /// `CreationTimestamp`, `Labels`, `Annotations` and `Spec` (`Number`, `Base`, `Head`,
    /// `Resources`). So `{{ .Spec.Head.SHA }}` and `{{ spec.head.sha }}` both work.
    pub fn render_context(&self) -> Value {
        json!({
            "APIVersion": Self::api_version(&()),
            "Kind": Self::kind(&()),
            "Name": self.name_any(),
            "Namespace": self.namespace().unwrap_or_default(),
            "UID": self.uid().unwrap_or_default(),
            "CreationTimestamp": self.creation_timestamp(),
            "Labels": self.labels(),
            "Annotations": self.annotations(),
            "Spec": {
                "Number": self.spec.number,
                "Base": self.spec.base.template_value(),
                "Head": self.spec.head.template_value(),
                "Resources": self.spec.resources,
            },
            "metadata": self.metadata,
            "spec": self.spec,
        })
    }
}
