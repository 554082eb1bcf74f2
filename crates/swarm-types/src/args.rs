//! Argument maps passed between actions.

use serde_json::Value;

/// Arguments of an action: a JSON object keyed by underscore-form names.
pub type ArgMap = serde_json::Map<String, Value>;

/// Lenient typed accessors for argument maps.
///
/// Values coming from the command line are strings while values coming from
/// an LLM are typed JSON, so accessors coerce between the two.
pub trait ArgMapExt {
    /// String form of a value; numbers and booleans are stringified.
    fn get_string(&self, key: &str) -> Option<String>;

    /// Integer value, parsing strings when needed.
    fn get_int(&self, key: &str) -> Option<i64>;

    /// Boolean value, accepting `true/false/1/0/yes/no` strings.
    fn get_bool(&self, key: &str) -> Option<bool>;

    /// String value or empty string.
    fn string_or_empty(&self, key: &str) -> String {
        self.get_string(key).unwrap_or_default()
    }

    /// Integer value or the given default; zero counts as unset.
    fn int_or(&self, key: &str, default: i64) -> i64 {
        match self.get_int(key) {
            Some(v) if v != 0 => v,
            _ => default,
        }
    }
}

impl ArgMapExt for ArgMap {
    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(value_to_string)
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|v| v != 0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" | "on" => Some(true),
                "false" | "0" | "no" | "n" | "off" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Render a JSON value as a plain string.
///
/// Strings are returned unquoted; `null` yields `None`; arrays and objects
/// are JSON-encoded.
pub fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Merge `src` into `dst`, overwriting existing keys.
pub fn merge_args(dst: &mut ArgMap, src: &ArgMap) {
    for (k, v) in src {
        dst.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> ArgMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_coercion() {
        let a = args(json!({
            "n": "42",
            "m": 7,
            "b": "yes",
            "s": 3.5,
            "o": {"k": 1},
            "z": null
        }));
        assert_eq!(a.get_int("n"), Some(42));
        assert_eq!(a.get_int("m"), Some(7));
        assert_eq!(a.get_bool("b"), Some(true));
        assert_eq!(a.get_string("s").as_deref(), Some("3.5"));
        assert_eq!(a.get_string("o").as_deref(), Some(r#"{"k":1}"#));
        assert_eq!(a.get_string("z"), None);
        assert_eq!(a.get_string("missing"), None);
    }

    #[test]
    fn test_int_or_treats_zero_as_unset() {
        let a = args(json!({"zero": 0, "five": 5}));
        assert_eq!(a.int_or("zero", 9), 9);
        assert_eq!(a.int_or("five", 9), 5);
        assert_eq!(a.int_or("missing", 9), 9);
    }

    #[test]
    fn test_merge_overwrites() {
        let mut a = args(json!({"x": 1, "y": 2}));
        merge_args(&mut a, &args(json!({"y": 3})));
        assert_eq!(a.get_int("y"), Some(3));
        assert_eq!(a.get_int("x"), Some(1));
    }
}
