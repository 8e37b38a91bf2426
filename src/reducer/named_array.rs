use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

/// An array of maps that each carry a unique string `name`, viewed as a mapping
/// from name to element.
///
/// Elements keep the order in which their name was first seen. Setting an existing
/// name replaces the element in place, and a new name is appended at the end.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamedArray {
    entries: IndexMap<String, Value>,
}

impl NamedArray {
    /// The name of an array element, if it is a map with a string `name`.
    pub fn name_of(value: &Value) -> Option<&str> {
        value.as_object()?.get("name")?.as_str()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.entries.get_mut(name)
    }

    pub fn get_index(&self, index: usize) -> Option<(&str, &Value)> {
        self.entries
            .get_index(index)
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Stores `value` under `name`, returning the element it replaced.
    pub fn set(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(name.into(), value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.entries.into_values().collect()
    }
}

impl TryFrom<Vec<Value>> for NamedArray {
    /// The input, handed back untouched.
    type Error = Vec<Value>;

    fn try_from(items: Vec<Value>) -> Result<Self, Self::Error> {
        let mut names = IndexSet::with_capacity(items.len());
        let qualified = items.iter().all(|item| {
            Self::name_of(item).is_some_and(|name| names.insert(name.to_owned()))
        });
        if !qualified {
            return Err(items);
        }

        Ok(Self {
            entries: names.into_iter().zip(items).collect(),
        })
    }
}

impl IntoIterator for NamedArray {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl From<NamedArray> for Value {
    fn from(array: NamedArray) -> Self {
        Value::Array(array.into_vec())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn named(value: Value) -> NamedArray {
        match value {
            Value::Array(items) => NamedArray::try_from(items).unwrap(),
            _ => panic!("not an array"),
        }
    }

    #[test]
    fn accepts_uniquely_named_maps() {
        let array = named(json!([{"name": "a", "v": 1}, {"name": "b"}]));
        assert_eq!(array.len(), 2);
        assert_eq!(array.get("a"), Some(&json!({"name": "a", "v": 1})));
        assert_eq!(array.get_index(1).map(|(name, _)| name), Some("b"));
        assert!(array.get("c").is_none());
    }

    #[test]
    fn empty_array_qualifies() {
        assert!(named(json!([])).is_empty());
    }

    #[test]
    fn rejects_and_returns_unqualified_input() {
        for input in [
            json!([{"name": "a"}, "b"]),
            json!([{"name": 1}]),
            json!([{"v": 1}]),
            json!([{"name": "a"}, {"name": "a"}]),
        ] {
            let Value::Array(items) = input else { unreachable!() };
            let returned = NamedArray::try_from(items.clone()).unwrap_err();
            assert_eq!(returned, items);
        }
    }

    #[test]
    fn set_replaces_in_place_and_appends_new_names() {
        let mut array = named(json!([{"name": "a"}, {"name": "b"}]));

        let replaced = array.set("a", json!({"name": "a", "v": 2}));
        assert_eq!(replaced, Some(json!({"name": "a"})));
        assert!(array.set("c", json!({"name": "c"})).is_none());

        assert_eq!(
            Value::from(array),
            json!([{"name": "a", "v": 2}, {"name": "b"}, {"name": "c"}])
        );
    }

    #[test]
    fn iterates_in_first_seen_order() {
        let array = named(json!([{"name": "z"}, {"name": "a"}, {"name": "m"}]));
        let names: Vec<&str> = array.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["z", "a", "m"]);
    }
}
