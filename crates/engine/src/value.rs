//! Lenient readers for values in schema-less config maps.
//!
//! Configs are written by hand or by web forms, so numbers arrive either as
//! JSON numbers or as numeric strings.

use serde_json::Value;

use effects::DataMap;

/// Read `key` as a float, accepting numeric strings.  `None` when absent,
/// `null` or not numeric.
pub(crate) fn number(config: &DataMap, key: &str) -> Option<f64> {
    match config.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

/// Read `key` as an integer (fractions are truncated).
pub(crate) fn integer(config: &DataMap, key: &str) -> Option<i64> {
    number(config, key).map(|n| n.trunc() as i64)
}

/// Read `key` as a non-empty string.
pub(crate) fn string<'a>(config: &'a DataMap, key: &str) -> Option<&'a str> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> DataMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn numbers_accept_strings() {
        let cfg = map(json!({ "a": 5, "b": "7", "c": " 2.5 ", "d": true, "e": "x" }));
        assert_eq!(integer(&cfg, "a"), Some(5));
        assert_eq!(integer(&cfg, "b"), Some(7));
        assert_eq!(number(&cfg, "c"), Some(2.5));
        assert_eq!(number(&cfg, "d"), None);
        assert_eq!(number(&cfg, "e"), None);
        assert_eq!(number(&cfg, "missing"), None);
    }

    #[test]
    fn blank_strings_are_absent() {
        let cfg = map(json!({ "a": "  ", "b": "hi", "c": 3 }));
        assert_eq!(string(&cfg, "a"), None);
        assert_eq!(string(&cfg, "b"), Some("hi"));
        assert_eq!(string(&cfg, "c"), None);
    }
}
