//! Composable transformations over decoded manifests.
//!
//! A [`Reducer`] takes a [`Value`] and returns a new one. Primitives in this module
//! are combined into a [`Reducers`] pipeline, which runs its stages left to right and
//! stops at the first failure.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{trace, Level};

use crate::template::TemplateError;

pub mod merge;
pub mod named_array;

pub use merge::{merge, DefaultMerge, MergeStrategy, NamedArrayMerge};
pub use named_array::NamedArray;

#[derive(Error, Debug)]
pub enum ReducerError {
    #[error("expected a map")]
    NotMap,

    #[error("expected an array or a map")]
    NotArrayOrMap,

    #[error("error at index {index}: {source}")]
    AtIndex {
        index: usize,
        source: Box<ReducerError>,
    },

    #[error("error at key {key:?}: {source}")]
    AtKey {
        key: String,
        source: Box<ReducerError>,
    },

    #[error("error at name {name:?}: {source}")]
    AtName {
        name: String,
        source: Box<ReducerError>,
    },

    #[error("reduce error at path {path}: {source}")]
    AtPath {
        path: String,
        source: Box<ReducerError>,
    },

    #[error("reducer #{stage} returns an error: {source}")]
    Stage {
        stage: usize,
        source: Box<ReducerError>,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),
}

pub type Result<T, E = ReducerError> = std::result::Result<T, E>;

impl ReducerError {
    /// The innermost error, with all positional context removed.
    pub fn root(&self) -> &ReducerError {
        match self {
            ReducerError::AtIndex { source, .. }
            | ReducerError::AtKey { source, .. }
            | ReducerError::AtName { source, .. }
            | ReducerError::AtPath { source, .. }
            | ReducerError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_map(&self) -> bool {
        matches!(self.root(), ReducerError::NotMap)
    }

    pub fn is_not_array_or_map(&self) -> bool {
        matches!(self.root(), ReducerError::NotArrayOrMap)
    }

    pub(crate) fn at_index(self, index: usize) -> Self {
        ReducerError::AtIndex {
            index,
            source: Box::new(self),
        }
    }

    pub(crate) fn at_key(self, key: impl Into<String>) -> Self {
        ReducerError::AtKey {
            key: key.into(),
            source: Box::new(self),
        }
    }

    pub(crate) fn at_name(self, name: impl Into<String>) -> Self {
        ReducerError::AtName {
            name: name.into(),
            source: Box::new(self),
        }
    }

    fn at_path(self, path: &[String]) -> Self {
        ReducerError::AtPath {
            path: path.join("."),
            source: Box::new(self),
        }
    }

    fn at_stage(self, stage: usize) -> Self {
        ReducerError::Stage {
            stage,
            source: Box::new(self),
        }
    }
}

/// A fallible transformation of a manifest tree.
///
/// Any `Fn(Value) -> Result<Value>` closure is a reducer.
pub trait Reducer: Send + Sync {
    fn reduce(&self, input: Value) -> Result<Value>;
}

impl<F> Reducer for F
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    fn reduce(&self, input: Value) -> Result<Value> {
        self(input)
    }
}

/// Turns a closure into a reducer, pinning down its signature for type inference.
pub fn from_fn<F>(f: F) -> impl Reducer
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    f
}

/// An ordered pipeline of reducers.
#[derive(Default)]
pub struct Reducers<'a> {
    stages: Vec<Box<dyn Reducer + 'a>>,
}

impl<'a> Reducers<'a> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn push(&mut self, reducer: impl Reducer + 'a) {
        self.stages.push(Box::new(reducer));
    }

    pub fn with(mut self, reducer: impl Reducer + 'a) -> Self {
        self.push(reducer);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Wrap every stage so that its input and output are traced.
    pub fn debug(self) -> Self {
        let stages = self
            .stages
            .into_iter()
            .enumerate()
            .map(|(stage, reducer)| -> Box<dyn Reducer + 'a> {
                Box::new(move |input: Value| -> Result<Value> {
                    traced(&format!("#{stage}"), reducer.as_ref(), input)
                })
            })
            .collect();

        Self { stages }
    }
}

impl Reducer for Reducers<'_> {
    fn reduce(&self, input: Value) -> Result<Value> {
        self.stages
            .iter()
            .enumerate()
            .try_fold(input, |value, (stage, reducer)| {
                reducer.reduce(value).map_err(|e| e.at_stage(stage))
            })
    }
}

fn traced(label: &str, reducer: &dyn Reducer, input: Value) -> Result<Value> {
    if !tracing::enabled!(Level::TRACE) {
        return reducer.reduce(input);
    }

    let before = input.to_string();
    let output = reducer.reduce(input)?;
    trace!(reducer = label, input = %before, output = %output, "reducer applied");
    Ok(output)
}

/// Traces the input and output of `reducer` under `label`.
pub fn debug<R: Reducer>(label: impl Into<String>, reducer: R) -> impl Reducer {
    let label = label.into();
    from_fn(move |input| traced(&label, &reducer, input))
}

/// Applies `reducer` to every element of an array or every value of a map.
pub fn map_value<R: Reducer>(reducer: R) -> impl Reducer {
    from_fn(move |input| match input {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| reducer.reduce(item).map_err(|e| e.at_index(i)))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| match reducer.reduce(v) {
                Ok(v) => Ok((k, v)),
                Err(e) => Err(e.at_key(k)),
            })
            .collect::<Result<Map<_, _>>>()
            .map(Value::Object),
        _ => Err(ReducerError::NotArrayOrMap),
    })
}

/// Keeps only the map entries whose key satisfies `predicate`.
pub fn filter_key<F>(predicate: F) -> impl Reducer
where
    F: Fn(&str) -> bool + Send + Sync,
{
    from_fn(move |input| match input {
        Value::Object(mut map) => {
            map.retain(|k, _| predicate(k));
            Ok(Value::Object(map))
        }
        _ => Err(ReducerError::NotMap),
    })
}

/// Keeps only the array elements (or map values) that satisfy `predicate`.
pub fn filter_value<F>(predicate: F) -> impl Reducer
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    from_fn(move |input| match input {
        Value::Array(mut items) => {
            items.retain(|v| predicate(v));
            Ok(Value::Array(items))
        }
        Value::Object(mut map) => {
            map.retain(|_, v| predicate(v));
            Ok(Value::Object(map))
        }
        _ => Err(ReducerError::NotArrayOrMap),
    })
}

/// Applies `f` to a value and then to every nested value below it, at any depth.
pub fn deep_map_value<F>(f: F) -> impl Reducer
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    from_fn(move |input| deep_map(&f, input))
}

fn deep_map<F>(f: &F, input: Value) -> Result<Value>
where
    F: Fn(Value) -> Result<Value>,
{
    match f(input)? {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| deep_map(f, item).map_err(|e| e.at_index(i)))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| match deep_map(f, v) {
                Ok(v) => Ok((k, v)),
                Err(e) => Err(e.at_key(k)),
            })
            .collect::<Result<Map<_, _>>>()
            .map(Value::Object),
        scalar => Ok(scalar),
    }
}

/// Applies `reducer` to the value found under the nested map `keys`.
///
/// The reducer sees `null` when the path does not exist. Missing (or `null`)
/// intermediate maps are created on demand, but only if the reducer produces a
/// non-null value; a present intermediate that is not a map fails with
/// [`ReducerError::NotMap`].
pub fn reduce_nested<R, K>(keys: K, reducer: R) -> impl Reducer
where
    R: Reducer,
    K: IntoIterator,
    K::Item: Into<String>,
{
    let keys: Vec<String> = keys.into_iter().map(Into::into).collect();

    from_fn(move |input| {
        let reduced = reduce_path(Some(input), &keys, &reducer).map_err(|e| {
            if keys.is_empty() {
                e
            } else {
                e.at_path(&keys)
            }
        })?;
        Ok(reduced.unwrap_or(Value::Null))
    })
}

fn reduce_path(input: Option<Value>, keys: &[String], reducer: &dyn Reducer) -> Result<Option<Value>> {
    let Some((key, rest)) = keys.split_first() else {
        let absent = input.is_none();
        let output = reducer.reduce(input.unwrap_or(Value::Null))?;
        return Ok(if absent && output.is_null() {
            None
        } else {
            Some(output)
        });
    };

    let (mut map, absent) = match input {
        None | Some(Value::Null) => (Map::new(), true),
        Some(Value::Object(map)) => (map, false),
        Some(_) => return Err(ReducerError::NotMap),
    };

    match reduce_path(map.remove(key), rest, reducer)? {
        Some(value) => {
            map.insert(key.clone(), value);
        }
        None if absent && map.is_empty() => return Ok(None),
        None => {}
    }

    Ok(Some(Value::Object(map)))
}

/// Sets the value under the nested map `keys`.
pub fn set_nested<K>(keys: K, value: Value) -> impl Reducer
where
    K: IntoIterator,
    K::Item: Into<String>,
{
    reduce_nested(keys, from_fn(move |_| Ok(value.clone())))
}

/// Removes the last of `keys` from the nested map addressed by the others.
///
/// With a single key this is a plain [`filter_key`] on the input. Otherwise a
/// missing parent leaves the input untouched.
pub fn delete_nested<K>(keys: K) -> impl Reducer
where
    K: IntoIterator,
    K::Item: Into<String>,
{
    let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
    let last = keys.pop();
    let top_level = keys.is_empty();
    let filter = filter_key(move |k| last.as_deref() != Some(k));

    reduce_nested(
        keys,
        from_fn(move |input| {
            if top_level || !input.is_null() {
                filter.reduce(input)
            } else {
                Ok(input)
            }
        }),
    )
}

/// Removes `keys` from a map, returning anything that is not a map unchanged.
pub fn delete_keys<K>(keys: K) -> impl Reducer
where
    K: IntoIterator,
    K::Item: Into<String>,
{
    let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
    let filter = filter_key(move |k| !keys.iter().any(|key| key == k));

    from_fn(move |input| match input {
        map @ Value::Object(_) => filter.reduce(map),
        // not a map, so there is nothing to delete
        other => Ok(other),
    })
}

/// Runs `reducer` unless the input is `null`.
pub fn when_present<R: Reducer>(reducer: R) -> impl Reducer {
    from_fn(move |input| {
        if input.is_null() {
            Ok(input)
        } else {
            reducer.reduce(input)
        }
    })
}

/// Merges `source` on top of the input with the given strategy.
pub fn merge_with<S: MergeStrategy>(source: Value, strategy: S) -> impl Reducer {
    from_fn(move |input| strategy.merge(input, source.clone()))
}

/// Merges `source` on top of the input with [`DefaultMerge`].
pub fn merge_value(source: Value) -> impl Reducer {
    merge_with(source, DefaultMerge)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fail_on_two() -> impl Reducer {
        from_fn(|v| {
            if v == json!(2) {
                Err(ReducerError::NotMap)
            } else {
                Ok(v)
            }
        })
    }

    #[test]
    fn map_value_over_array_preserves_order() {
        let double = map_value(from_fn(|v| Ok(json!(v.as_i64().unwrap_or_default() * 2))));
        assert_eq!(double.reduce(json!([1, 2, 3])).unwrap(), json!([2, 4, 6]));
    }

    #[test]
    fn map_value_over_map_preserves_keys() {
        let upper = map_value(from_fn(|v| {
            Ok(json!(v.as_str().unwrap_or_default().to_uppercase()))
        }));
        assert_eq!(
            upper.reduce(json!({"a": "x", "b": "y"})).unwrap(),
            json!({"a": "X", "b": "Y"})
        );
    }

    #[test]
    fn map_value_rejects_scalars() {
        let err = map_value(from_fn(Ok)).reduce(json!("foo")).unwrap_err();
        assert!(matches!(err, ReducerError::NotArrayOrMap));
    }

    #[test]
    fn map_value_reports_failing_index() {
        let err = map_value(fail_on_two()).reduce(json!([1, 2])).unwrap_err();
        assert!(matches!(err, ReducerError::AtIndex { index: 1, .. }));
        assert!(err.is_not_map());
    }

    #[test]
    fn filter_key_keeps_matching_keys() {
        let reducer = filter_key(|k| k != "b");
        assert_eq!(
            reducer.reduce(json!({"a": 1, "b": 2, "c": 3})).unwrap(),
            json!({"a": 1, "c": 3})
        );
    }

    #[test]
    fn filter_key_rejects_non_maps() {
        let reducer = filter_key(|_| true);
        assert!(matches!(
            reducer.reduce(json!([1])).unwrap_err(),
            ReducerError::NotMap
        ));
        assert!(matches!(
            reducer.reduce(Value::Null).unwrap_err(),
            ReducerError::NotMap
        ));
    }

    #[test]
    fn filter_value_on_arrays_and_maps() {
        let reducer = filter_value(|v| !v.is_null());
        assert_eq!(
            reducer.reduce(json!([1, null, 3])).unwrap(),
            json!([1, 3])
        );
        assert_eq!(
            reducer.reduce(json!({"a": null, "b": true})).unwrap(),
            json!({"b": true})
        );
        assert!(reducer.reduce(json!(1)).unwrap_err().is_not_array_or_map());
    }

    #[test]
    fn deep_map_reaches_every_leaf() {
        let reducer = deep_map_value(|v| match v {
            Value::String(s) => Ok(Value::String(format!("<{s}>"))),
            other => Ok(other),
        });

        let output = reducer
            .reduce(json!({
                "a": "x",
                "b": [{"c": "y"}, 1, ["z"]],
                "d": null,
            }))
            .unwrap();

        assert_eq!(
            output,
            json!({
                "a": "<x>",
                "b": [{"c": "<y>"}, 1, ["<z>"]],
                "d": null,
            })
        );
    }

    #[test]
    fn deep_map_on_scalar_returns_mapped_scalar() {
        let reducer = deep_map_value(|_| Ok(json!(42)));
        assert_eq!(reducer.reduce(json!("x")).unwrap(), json!(42));
    }

    #[test]
    fn set_nested_creates_missing_maps() {
        let reducer = set_nested(["metadata", "name"], json!("foo"));
        assert_eq!(
            reducer.reduce(json!({"kind": "Pod"})).unwrap(),
            json!({"kind": "Pod", "metadata": {"name": "foo"}})
        );
        assert_eq!(
            reducer.reduce(Value::Null).unwrap(),
            json!({"metadata": {"name": "foo"}})
        );
    }

    #[test]
    fn set_nested_overwrites_and_keeps_siblings() {
        let reducer = set_nested(["metadata", "name"], json!("foo"));
        assert_eq!(
            reducer
                .reduce(json!({"metadata": {"name": "bar", "labels": {"a": "b"}}}))
                .unwrap(),
            json!({"metadata": {"name": "foo", "labels": {"a": "b"}}})
        );
    }

    #[test]
    fn set_nested_fails_on_non_map_parent() {
        let reducer = set_nested(["metadata", "name"], json!("foo"));
        let err = reducer.reduce(json!({"metadata": "oops"})).unwrap_err();
        assert!(matches!(err, ReducerError::AtPath { .. }));
        assert!(err.is_not_map());
    }

    #[test]
    fn delete_nested_removes_leaf() {
        let reducer = delete_nested(["metadata", "uid"]);
        assert_eq!(
            reducer
                .reduce(json!({"metadata": {"uid": "123", "name": "a"}}))
                .unwrap(),
            json!({"metadata": {"name": "a"}})
        );
    }

    #[test]
    fn delete_nested_without_parent_is_a_no_op() {
        let reducer = delete_nested(["metadata", "uid"]);
        let input = json!({"kind": "Pod"});
        assert_eq!(reducer.reduce(input.clone()).unwrap(), input);
    }

    #[test]
    fn delete_nested_with_single_key_filters_top_level() {
        let reducer = delete_nested(["status"]);
        assert_eq!(
            reducer.reduce(json!({"status": {}, "spec": {}})).unwrap(),
            json!({"spec": {}})
        );
        assert!(reducer.reduce(json!("x")).unwrap_err().is_not_map());
    }

    #[test]
    fn delete_keys_tolerates_non_maps() {
        let reducer = delete_keys(["a"]);
        assert_eq!(reducer.reduce(json!({"a": 1, "b": 2})).unwrap(), json!({"b": 2}));
        assert_eq!(reducer.reduce(json!("x")).unwrap(), json!("x"));
        assert_eq!(reducer.reduce(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn reduce_nested_does_not_create_empty_parents() {
        let reducer = reduce_nested(["metadata", "annotations"], delete_keys(["a"]));
        let input = json!({"kind": "Pod"});
        assert_eq!(reducer.reduce(input.clone()).unwrap(), input);
    }

    #[test]
    fn pipeline_runs_in_order() {
        let reducers = Reducers::new()
            .with(set_nested(["a"], json!(1)))
            .with(set_nested(["b"], json!(2)))
            .with(delete_nested(["a"]));

        assert_eq!(reducers.len(), 3);
        assert_eq!(reducers.reduce(json!({})).unwrap(), json!({"b": 2}));
    }

    #[test]
    fn pipeline_reports_failing_stage() {
        let reducers = Reducers::new()
            .with(set_nested(["a"], json!(1)))
            .with(map_value(fail_on_two()))
            .debug();

        let err = reducers.reduce(json!({"b": 2})).unwrap_err();
        assert!(matches!(err, ReducerError::Stage { stage: 1, .. }));
        assert!(err.is_not_map());
        assert_eq!(
            err.to_string(),
            "reducer #1 returns an error: error at key \"b\": expected a map"
        );
    }

    #[test]
    fn merge_with_uses_input_as_base() {
        let reducer = merge_value(json!({"b": 2}));
        assert_eq!(
            reducer.reduce(json!({"a": 1})).unwrap(),
            json!({"a": 1, "b": 2})
        );
    }
}
