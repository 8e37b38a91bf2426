use serde_json::{Map, Value};

use super::{NamedArray, Result};

/// How two trees are combined.
///
/// The default method is a structural merge that calls back into the strategy for
/// every overlapping map key and array position. That lets an implementation
/// override the behavior for particular shapes and keep the structural rules for
/// everything else.
pub trait MergeStrategy: Send + Sync {
    fn merge(&self, base: Value, patch: Value) -> Result<Value> {
        merge_structural(self, base, patch)
    }
}

/// Structural merge: maps are unioned, arrays are merged position by position, and
/// anything else is replaced by the patch. A `null` patch value clears the key it is
/// set on, and an empty map patch leaves the base alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultMerge;

impl MergeStrategy for DefaultMerge {}

/// Like [`DefaultMerge`], except arrays on both sides that qualify as a
/// [`NamedArray`] are merged by element name instead of position.
#[derive(Clone, Copy, Debug, Default)]
pub struct NamedArrayMerge;

impl MergeStrategy for NamedArrayMerge {
    fn merge(&self, base: Value, patch: Value) -> Result<Value> {
        match (base, patch) {
            (Value::Array(base), Value::Array(patch)) => {
                match (NamedArray::try_from(base), NamedArray::try_from(patch)) {
                    (Ok(base), Ok(patch)) => merge_named(self, base, patch).map(Value::from),
                    (base, patch) => {
                        let base = base.map_or_else(|items| items, NamedArray::into_vec);
                        let patch = patch.map_or_else(|items| items, NamedArray::into_vec);
                        merge_positional(self, base, patch).map(Value::Array)
                    }
                }
            }
            (base, patch) => merge_structural(self, base, patch),
        }
    }
}

/// Merges `patch` on top of `base` with [`DefaultMerge`].
pub fn merge(base: Value, patch: Value) -> Result<Value> {
    DefaultMerge.merge(base, patch)
}

/// The structural merge, recursing through `strategy` for nested values.
pub fn merge_structural<M>(strategy: &M, base: Value, patch: Value) -> Result<Value>
where
    M: MergeStrategy + ?Sized,
{
    match (base, patch) {
        (_, Value::Null) => Ok(Value::Null),
        (base, Value::Object(patch)) if patch.is_empty() && !base.is_null() => Ok(base),
        (Value::Object(base), Value::Object(patch)) => merge_maps(strategy, base, patch).map(Value::Object),
        (Value::Array(base), Value::Array(patch)) => merge_positional(strategy, base, patch).map(Value::Array),
        (_, patch) => Ok(patch),
    }
}

fn merge_maps<M>(strategy: &M, mut base: Map<String, Value>, patch: Map<String, Value>) -> Result<Map<String, Value>>
where
    M: MergeStrategy + ?Sized,
{
    for (key, value) in patch {
        let merged = match base.remove(&key) {
            Some(existing) => strategy.merge(existing, value).map_err(|e| e.at_key(&key))?,
            None => value,
        };
        if !merged.is_null() {
            base.insert(key, merged);
        }
    }

    Ok(base)
}

fn merge_positional<M>(strategy: &M, base: Vec<Value>, patch: Vec<Value>) -> Result<Vec<Value>>
where
    M: MergeStrategy + ?Sized,
{
    let mut output = Vec::with_capacity(base.len().max(patch.len()));
    let mut base = base.into_iter();
    let mut patch = patch.into_iter();

    loop {
        let merged = match (base.next(), patch.next()) {
            (Some(b), Some(p)) => strategy
                .merge(b, p)
                .map_err(|e| e.at_index(output.len()))?,
            (Some(b), None) => b,
            (None, Some(p)) => p,
            (None, None) => break,
        };
        output.push(merged);
    }

    Ok(output)
}

fn merge_named<M>(strategy: &M, mut base: NamedArray, patch: NamedArray) -> Result<NamedArray>
where
    M: MergeStrategy + ?Sized,
{
    for (name, value) in patch {
        match base.get_mut(&name) {
            Some(slot) => {
                let existing = std::mem::take(slot);
                *slot = strategy.merge(existing, value).map_err(|e| e.at_name(&name))?;
            }
            None => {
                base.set(name, value);
            }
        }
    }

    Ok(base)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn null_patch_clears_base() {
        assert_eq!(merge(json!({"a": [1, {"b": true}]}), Value::Null).unwrap(), Value::Null);
        assert_eq!(
            merge(json!({"a": 1, "b": 2}), json!({"a": null, "c": null})).unwrap(),
            json!({"b": 2})
        );
        assert_eq!(merge(json!([1, 2]), json!([null])).unwrap(), json!([null, 2]));
        assert_eq!(
            NamedArrayMerge
                .merge(json!({"spec": {"replicas": 5, "x": 1}}), json!({"spec": {"replicas": null}}))
                .unwrap(),
            json!({"spec": {"x": 1}})
        );
    }

    #[test]
    fn empty_patch_is_identity() {
        for value in [json!({"a": {"b": 1}}), json!([1, 2]), json!("x"), json!(3)] {
            assert_eq!(merge(value.clone(), json!({})).unwrap(), value);
        }
        assert_eq!(merge(json!([1, 2]), json!([])).unwrap(), json!([1, 2]));
    }

    #[test]
    fn merge_is_idempotent() {
        let base = json!({"a": [1, 2, 3], "b": {"c": "d"}});
        let patch = json!({"a": [9, 9], "b": {"e": "f"}});
        let once = merge(base, patch.clone()).unwrap();
        assert_eq!(once, json!({"a": [9, 9, 3], "b": {"c": "d", "e": "f"}}));
        assert_eq!(merge(once.clone(), patch).unwrap(), once);
    }

    #[test]
    fn null_base_takes_patch() {
        let patch = json!({"a": [1, 2]});
        assert_eq!(merge(Value::Null, patch.clone()).unwrap(), patch);
    }

    #[test]
    fn maps_are_unioned_recursively() {
        let base = json!({"a": 1, "b": {"c": 2, "d": 3}});
        let patch = json!({"b": {"d": 4, "e": 5}, "f": 6});
        assert_eq!(
            merge(base, patch).unwrap(),
            json!({"a": 1, "b": {"c": 2, "d": 4, "e": 5}, "f": 6})
        );
    }

    #[test]
    fn merging_with_itself_is_identity() {
        let value = json!({"a": [1, {"name": "x", "v": 2}], "b": "c"});
        assert_eq!(merge(value.clone(), value.clone()).unwrap(), value);
        assert_eq!(
            NamedArrayMerge.merge(value.clone(), value.clone()).unwrap(),
            value
        );
    }

    #[test]
    fn arrays_merge_by_position() {
        assert_eq!(
            merge(json!([{"a": 1}, 2, 3]), json!([{"b": 1}])).unwrap(),
            json!([{"a": 1, "b": 1}, 2, 3])
        );
        assert_eq!(merge(json!([1]), json!([4, 5])).unwrap(), json!([4, 5]));
    }

    #[test]
    fn mismatched_shapes_take_patch() {
        assert_eq!(merge(json!({"a": 1}), json!([1])).unwrap(), json!([1]));
        assert_eq!(merge(json!([1]), json!("x")).unwrap(), json!("x"));
        assert_eq!(merge(json!(1), json!({"a": 1})).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn named_arrays_merge_by_name() {
        let base = json!([
            {"name": "a", "image": "nginx", "port": 80},
            {"name": "b", "image": "redis"},
        ]);
        let patch = json!([
            {"name": "b", "image": "redis:7"},
            {"name": "c", "image": "busybox"},
            {"name": "a", "port": 8080},
        ]);

        assert_eq!(
            NamedArrayMerge.merge(base, patch).unwrap(),
            json!([
                {"name": "a", "image": "nginx", "port": 8080},
                {"name": "b", "image": "redis:7"},
                {"name": "c", "image": "busybox"},
            ])
        );
    }

    #[test]
    fn named_merge_recurses_into_nested_named_arrays() {
        let base = json!({"containers": [
            {"name": "app", "env": [{"name": "A", "value": "1"}, {"name": "B", "value": "2"}]},
        ]});
        let patch = json!({"containers": [
            {"name": "app", "env": [{"name": "B", "value": "3"}]},
        ]});

        assert_eq!(
            NamedArrayMerge.merge(base, patch).unwrap(),
            json!({"containers": [
                {"name": "app", "env": [{"name": "A", "value": "1"}, {"name": "B", "value": "3"}]},
            ]})
        );
    }

    #[test]
    fn unnamed_arrays_fall_back_to_positions() {
        let base = json!([{"name": "a", "v": 1}, {"v": 2}]);
        let patch = json!([{"name": "b"}]);
        assert_eq!(
            NamedArrayMerge.merge(base, patch).unwrap(),
            json!([{"name": "b", "v": 1}, {"v": 2}])
        );
    }

    #[test]
    fn duplicate_names_fall_back_to_positions() {
        let base = json!([{"name": "a", "v": 1}, {"name": "a", "v": 2}]);
        let patch = json!([{"name": "a", "v": 3}]);
        assert_eq!(
            NamedArrayMerge.merge(base, patch).unwrap(),
            json!([{"name": "a", "v": 3}, {"name": "a", "v": 2}])
        );
    }

    #[test]
    fn empty_named_patch_keeps_base() {
        let base = json!([{"name": "a"}]);
        assert_eq!(NamedArrayMerge.merge(base.clone(), json!([])).unwrap(), base);
    }
}
