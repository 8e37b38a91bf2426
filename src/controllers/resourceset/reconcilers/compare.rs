use serde_json::{Map, Value};

/// Deep equality where a map entry holding `null` counts as absent.
///
/// Numbers are compared by value, so `1` and `1.0` are equal.
pub fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => maps_equal(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| equal(a, b))
        }
        (Value::Number(a), Value::Number(b)) => a == b || a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

fn maps_equal(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    let present = |map: &Map<String, Value>| map.values().filter(|v| !v.is_null()).count();
    if present(a) != present(b) {
        return false;
    }

    a.iter()
        .filter(|(_, v)| !v.is_null())
        .all(|(k, v)| b.get(k).is_some_and(|other| equal(v, other)))
}
