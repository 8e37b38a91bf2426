use std::collections::HashMap;
use std::future::Future;

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DynamicObject, PostParams};
use kube::client::Client;
use kube::core::{ApiResource, GroupVersionKind};
use kube::discovery::{ApiCapabilities, Scope};
use kube::runtime::events::{Event, EventType, Recorder};
use kube::ResourceExt;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// Read and write access to cluster objects of arbitrary kinds.
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, returning `None` if it does not exist.
    fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<Value>, kube::Error>> + Send;

    fn create(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        object: &Value,
    ) -> impl Future<Output = Result<(), kube::Error>> + Send;

    fn update(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        object: &Value,
    ) -> impl Future<Output = Result<(), kube::Error>> + Send;
}

/// Records events against an object.
pub trait EventRecorder: Send + Sync {
    fn record(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        message: &str,
    ) -> impl Future<Output = Result<(), kube::Error>> + Send;
}

/// [`ObjectStore`] backed by the Kubernetes API.
pub struct KubeObjectStore {
    client: Client,
    resources: RwLock<HashMap<GroupVersionKind, (ApiResource, ApiCapabilities)>>,
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: RwLock::new(HashMap::new()),
        }
    }

    async fn api(&self, gvk: &GroupVersionKind, namespace: &str) -> Result<Api<DynamicObject>, kube::Error> {
        let cached = self.resources.read().await.get(gvk).cloned();
        let (resource, caps) = match cached {
            Some(discovered) => discovered,
            None => {
                debug!("Discovering API resource for {gvk:?}");
                let discovered = kube::discovery::pinned_kind(&self.client, gvk).await?;
                self.resources
                    .write()
                    .await
                    .insert(gvk.clone(), discovered.clone());
                discovered
            }
        };

        Ok(match scoped_namespace(&caps, namespace) {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        })
    }
}

/// The namespace to address objects of a kind in, or `None` for cluster-scoped kinds.
fn scoped_namespace<'a>(caps: &ApiCapabilities, namespace: &'a str) -> Option<&'a str> {
    match caps.scope {
        Scope::Namespaced => Some(namespace),
        Scope::Cluster => None,
    }
}

fn to_dynamic(object: &Value) -> Result<DynamicObject, kube::Error> {
    serde_json::from_value(object.clone()).map_err(kube::Error::SerdeError)
}

impl ObjectStore for KubeObjectStore {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>, kube::Error> {
        let api = self.api(gvk, namespace).await?;
        api.get_opt(name)
            .await?
            .map(serde_json::to_value)
            .transpose()
            .map_err(kube::Error::SerdeError)
    }

    async fn create(&self, gvk: &GroupVersionKind, namespace: &str, object: &Value) -> Result<(), kube::Error> {
        let api = self.api(gvk, namespace).await?;
        api.create(&PostParams::default(), &to_dynamic(object)?).await?;
        Ok(())
    }

    async fn update(&self, gvk: &GroupVersionKind, namespace: &str, object: &Value) -> Result<(), kube::Error> {
        let api = self.api(gvk, namespace).await?;
        let object = to_dynamic(object)?;
        api.replace(&object.name_any(), &PostParams::default(), &object)
            .await?;
        Ok(())
    }
}

/// [`EventRecorder`] that publishes Kubernetes events.
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        Self {
            recorder: Recorder::new(client, "pullup-operator".into()),
        }
    }
}

impl EventRecorder for KubeEventRecorder {
    async fn record(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), kube::Error> {
        self.recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note: Some(message.into()),
                    action: "Reconcile".into(),
                    secondary: None,
                },
                regarding,
            )
            .await
    }
}

/// Whether `object` has a controller reference pointing at `owner`.
pub fn is_controlled_by(object: &Value, owner: &OwnerReference) -> bool {
    object
        .pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .and_then(|refs| {
            refs.iter()
                .find(|r| r.get("controller").and_then(Value::as_bool) == Some(true))
        })
        .and_then(|r| r.get("uid"))
        .and_then(Value::as_str)
        .is_some_and(|uid| uid == owner.uid)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "pullup.dev/v1alpha1".into(),
            kind: "ResourceSet".into(),
            name: "rs-1".into(),
            uid: "uid-1".into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    #[test]
    fn controlled_by_matching_controller_ref() {
        let object = json!({"metadata": {"ownerReferences": [
            {"uid": "other", "controller": false},
            {"uid": "uid-1", "controller": true},
        ]}});
        assert!(is_controlled_by(&object, &owner()));
    }

    #[test]
    fn not_controlled_without_refs() {
        assert!(!is_controlled_by(&json!({"metadata": {"name": "x"}}), &owner()));
        assert!(!is_controlled_by(&json!({}), &owner()));
    }

    #[test]
    fn not_controlled_by_plain_owner_or_other_controller() {
        let owned = json!({"metadata": {"ownerReferences": [{"uid": "uid-1"}]}});
        assert!(!is_controlled_by(&owned, &owner()));

        let foreign = json!({"metadata": {"ownerReferences": [
            {"uid": "uid-2", "controller": true},
            {"uid": "uid-1", "controller": true},
        ]}});
        assert!(!is_controlled_by(&foreign, &owner()));
    }

    fn capabilities(scope: Scope) -> ApiCapabilities {
        ApiCapabilities {
            scope,
            subresources: vec![],
            operations: vec![],
        }
    }

    #[test]
    fn cluster_scoped_kinds_ignore_namespace() {
        assert_eq!(scoped_namespace(&capabilities(Scope::Namespaced), "ns"), Some("ns"));
        assert_eq!(scoped_namespace(&capabilities(Scope::Cluster), "ns"), None);
    }
}
