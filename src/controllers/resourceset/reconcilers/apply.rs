use kube::core::GroupVersionKind;
use kube::Resource;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::controllers::resourceset::reconcilers::compare::equal;
use crate::controllers::resourceset::reconcilers::store::{is_controlled_by, EventRecorder, ObjectStore};
use crate::controllers::resourceset::reconcilers::{ApplyResult, ApplyTarget, Reason};
use crate::reducer::{
    self, deep_map_value, delete_keys, delete_nested, map_value, merge_with, reduce_nested,
    set_nested, when_present, NamedArrayMerge, Reducer, ReducerError, Reducers,
};
use crate::resources::resourcesets::ResourceSet;
use crate::template::TemplateEngine;
use crate::Error;

/// Server-assigned metadata that must not be copied from a pre-existing object.
const SERVER_METADATA: [&str; 6] = [
    "creationTimestamp",
    "resourceVersion",
    "selfLink",
    "uid",
    "generation",
    "managedFields",
];

const BOOKKEEPING_ANNOTATIONS: [&str; 2] = [
    "deployment.kubernetes.io/revision",
    "kubectl.kubernetes.io/last-applied-configuration",
];

#[derive(thiserror::Error, Debug)]
pub enum ApplyError {
    #[error("resource is not an object")]
    NotAnObject,

    #[error("invalid API version {0:?}")]
    InvalidApiVersion(String),

    #[error("resource has no kind")]
    MissingKind,

    #[error("failed to render template: {0}")]
    Render(#[source] ReducerError),

    #[error("failed to get original resource: {0}")]
    GetOriginal(#[source] kube::Error),

    #[error("failed to get last applied resource: {0}")]
    GetApplied(#[source] kube::Error),

    #[error("resource already exists and is not managed by pullup: {0}")]
    NotControlled(String),

    #[error("failed to reduce patches: {0}")]
    Reduce(#[source] ReducerError),

    #[error("failed to create resource: {0}")]
    Create(#[source] kube::Error),

    #[error("failed to update resource: {0}")]
    Update(#[source] kube::Error),
}

impl ApplyError {
    pub fn reason(&self) -> Reason {
        match self {
            ApplyError::NotAnObject
            | ApplyError::InvalidApiVersion(_)
            | ApplyError::MissingKind
            | ApplyError::Render(_)
            | ApplyError::Reduce(_) => Reason::InvalidResource,
            ApplyError::GetOriginal(_) | ApplyError::GetApplied(_) => Reason::Failed,
            ApplyError::NotControlled(_) => Reason::ResourceExists,
            ApplyError::Create(_) => Reason::CreateFailed,
            ApplyError::Update(_) => Reason::UpdateFailed,
        }
    }

    /// API failures are worth retrying. Everything else needs the ResourceSet, or the
    /// conflicting object, to change first.
    pub fn requeue(&self) -> bool {
        matches!(
            self,
            ApplyError::GetOriginal(_)
                | ApplyError::GetApplied(_)
                | ApplyError::Create(_)
                | ApplyError::Update(_)
        )
    }
}

/// Apply every resource of a ResourceSet in order, recording an event for each.
///
/// Stops at the first resource that fails; resources before it stay applied.
pub async fn reconcile_resources<S, R>(
    store: &S,
    recorder: &R,
    engine: &TemplateEngine,
    rs: &ResourceSet,
) -> Result<Vec<Reason>, Error>
where
    S: ObjectStore,
    R: EventRecorder,
{
    let target = ApplyTarget::for_resource_set(rs)?;
    let context = rs.render_context();
    let regarding = rs.object_ref(&());
    let mut reasons = Vec::with_capacity(rs.spec.resources.len());

    for (index, declaration) in rs.spec.resources.iter().enumerate() {
        let result = apply_resource(store, engine, &target, &context, declaration).await;

        if let Err(err) = recorder
            .record(
                &regarding,
                result.event_type(),
                result.reason.as_str(),
                &result.message,
            )
            .await
        {
            warn!("Failed to record {} event for ResourceSet {}: {err}", result.reason, target.name);
        }

        match result.error {
            Some(source) => {
                warn!(reason = %result.reason, requeue = result.requeue, "{}", result.message);
                return Err(Error::ResourceApply {
                    index,
                    reason: result.reason,
                    requeue: result.requeue,
                    source,
                });
            }
            None => {
                info!(reason = %result.reason, "{}", result.message);
                reasons.push(result.reason);
            }
        }
    }

    Ok(reasons)
}

/// Render one resource declaration and create or update the object it describes.
///
/// The object is built by merging, in order: the pre-existing object with the same
/// name as the declaration (stripped of server-assigned fields), the object applied in a
/// previous pass, and the rendered declaration. It is then renamed after the
/// ResourceSet and owned by it.
///
/// The pre-existing object is looked up by the name in the rendered declaration rather
/// than the raw one, so a templated `metadata.name` finds the object it renders to.
pub async fn apply_resource<S: ObjectStore>(
    store: &S,
    engine: &TemplateEngine,
    target: &ApplyTarget,
    context: &Value,
    declaration: &Value,
) -> ApplyResult {
    match try_apply(store, engine, target, context, declaration).await {
        Ok(result) => result,
        Err(err) => err.into(),
    }
}

async fn try_apply<S: ObjectStore>(
    store: &S,
    engine: &TemplateEngine,
    target: &ApplyTarget,
    context: &Value,
    declaration: &Value,
) -> Result<ApplyResult, ApplyError> {
    if !declaration.is_object() {
        return Err(ApplyError::NotAnObject);
    }
    let gvk = group_version_kind(declaration)?;

    let rendered = engine
        .reducer(context)
        .reduce(declaration.clone())
        .map_err(ApplyError::Render)?;

    let original = match rendered.pointer("/metadata/name").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => store
            .get(&gvk, &target.namespace, name)
            .await
            .map_err(ApplyError::GetOriginal)?,
        _ => None,
    };

    let applied = store
        .get(&gvk, &target.namespace, &target.name)
        .await
        .map_err(ApplyError::GetApplied)?;

    if let Some(applied) = &applied {
        if !is_controlled_by(applied, &target.owner) {
            return Err(ApplyError::NotControlled(resource_name(applied)));
        }
    }

    let object = pipeline(&gvk, original, applied.clone(), rendered, target)
        .debug()
        .reduce(Value::Null)
        .map_err(ApplyError::Reduce)?;
    debug!(patch = %object, "Ready to apply resource");

    let name = resource_name(&object);
    match applied {
        Some(applied) if equal(&object, &applied) => Ok(ApplyResult::success(
            Reason::Unchanged,
            format!("Skipped resource {name}"),
        )),
        Some(_) => {
            store
                .update(&gvk, &target.namespace, &object)
                .await
                .map_err(ApplyError::Update)?;
            Ok(ApplyResult::success(
                Reason::Updated,
                format!("Updated resource {name}"),
            ))
        }
        None => {
            store
                .create(&gvk, &target.namespace, &object)
                .await
                .map_err(ApplyError::Create)?;
            Ok(ApplyResult::success(
                Reason::Created,
                format!("Created resource {name}"),
            ))
        }
    }
}

fn pipeline(
    gvk: &GroupVersionKind,
    original: Option<Value>,
    applied: Option<Value>,
    rendered: Value,
    target: &ApplyTarget,
) -> Reducers<'static> {
    let mut reducers = Reducers::new();

    if let Some(original) = original {
        reducers.push(merge_resource(original));
        reducers.push(delete_nested(["status"]));
        reducers.push(reduce_nested(["metadata"], delete_keys(SERVER_METADATA)));
        reducers.push(reduce_nested(
            ["metadata", "annotations"],
            delete_keys(BOOKKEEPING_ANNOTATIONS),
        ));

        if is_service(gvk) {
            reducers.push(delete_nested(["spec", "clusterIP"]));
            reducers.push(delete_nested(["spec", "clusterIPs"]));
            reducers.push(reduce_nested(
                ["spec", "ports"],
                when_present(map_value(delete_keys(["nodePort"]))),
            ));
        }
    }

    if let Some(applied) = applied {
        reducers.push(merge_resource(applied));
    }

    let owner = &target.owner;
    reducers
        .with(merge_resource(rendered))
        .with(set_nested(["metadata", "name"], json!(target.name)))
        .with(set_nested(["metadata", "namespace"], json!(target.namespace)))
        .with(set_nested(
            ["metadata", "ownerReferences"],
            json!([{
                "apiVersion": owner.api_version,
                "kind": owner.kind,
                "name": owner.name,
                "uid": owner.uid,
                "controller": true,
                "blockOwnerDeletion": true,
            }]),
        ))
        .with(deep_map_value(normalize_value))
}

fn merge_resource(data: Value) -> impl Reducer {
    merge_with(data, NamedArrayMerge)
}

/// Whole numbers decoded as floats (e.g. `replicas: 2.0`) are stored by the API server as
/// integers, so they are converted before comparing against the applied object.
fn normalize_value(value: Value) -> reducer::Result<Value> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

    Ok(match value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < MAX_EXACT => Value::from(f as i64),
            _ => Value::Number(n),
        },
        other => other,
    })
}

fn group_version_kind(declaration: &Value) -> Result<GroupVersionKind, ApplyError> {
    let api_version = declaration
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));

    if version.is_empty() || version.contains('/') || (group.is_empty() && api_version.contains('/')) {
        return Err(ApplyError::InvalidApiVersion(api_version.to_owned()));
    }

    let kind = declaration
        .get("kind")
        .and_then(Value::as_str)
        .filter(|kind| !kind.is_empty())
        .ok_or(ApplyError::MissingKind)?;

    Ok(GroupVersionKind::gvk(group, version, kind))
}

fn is_service(gvk: &GroupVersionKind) -> bool {
    gvk.group.is_empty() && gvk.version == "v1" && gvk.kind == "Service"
}

fn resource_name(object: &Value) -> String {
    let field = |pointer: &str| object.pointer(pointer).and_then(Value::as_str).unwrap_or_default();
    format!(
        "{} {}: {:?}",
        field("/apiVersion"),
        field("/kind"),
        field("/metadata/name")
    )
}
