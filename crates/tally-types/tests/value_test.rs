use std::collections::HashMap;
use std::convert::TryFrom;

use tally_types::Value;

#[test]
fn json_round_trip_preserves_structure() {
    let json: serde_json::Value = serde_json::from_str(
        r#"{"name": "relay", "size": 4, "rate": 91.5, "active": true, "tags": ["a", "b"], "meta": {"k": null}}"#,
    )
    .unwrap();

    let value = Value::try_from(&json).unwrap();
    let back: serde_json::Value = (&value).into();
    assert_eq!(json, back);
}

#[test]
fn integers_and_floats_compare_by_numeric_value() {
    assert_eq!(Value::Integer(4), Value::Float(4.0));
    assert_eq!(Value::Float(4.0), Value::Integer(4));
    assert_ne!(Value::Integer(4), Value::Float(4.5));
    assert_ne!(Value::Integer(4), Value::String("4".to_string()));
}

#[test]
fn nested_equality_unifies_numeric_types() {
    let a = Value::Array(vec![Value::Integer(1), Value::Integer(2)]);
    let b = Value::Array(vec![Value::Float(1.0), Value::Float(2.0)]);
    assert_eq!(a, b);

    let mut obj_a = HashMap::new();
    obj_a.insert("count".to_string(), Value::Integer(3));
    let mut obj_b = HashMap::new();
    obj_b.insert("count".to_string(), Value::Float(3.0));
    assert_eq!(Value::Object(obj_a), Value::Object(obj_b));
}

#[test]
fn emptiness_covers_containers_but_not_zero() {
    assert!(Value::Null.is_empty());
    assert!(Value::String(String::new()).is_empty());
    assert!(Value::Array(vec![]).is_empty());
    assert!(Value::Object(HashMap::new()).is_empty());

    assert!(!Value::Integer(0).is_empty());
    assert!(!Value::Float(0.0).is_empty());
    assert!(!Value::Boolean(false).is_empty());
    assert!(!Value::String("x".to_string()).is_empty());
}

#[test]
fn datetime_coercion_accepts_dates_and_rfc3339_strings() {
    let from_string = Value::String("2025-10-01T00:00:00Z".to_string());
    let parsed = from_string.as_datetime().unwrap();

    let from_date = Value::date_from_iso("2025-10-01T00:00:00Z").unwrap();
    assert_eq!(from_date.as_datetime().unwrap(), parsed);

    assert!(Value::String("yesterday".to_string()).as_datetime().is_none());
    assert!(Value::Integer(0).as_datetime().is_none());
}

#[test]
fn numeric_coercions() {
    assert_eq!(Value::Integer(7).as_f64(), Some(7.0));
    assert_eq!(Value::Float(7.5).as_f64(), Some(7.5));
    assert_eq!(Value::String("7".to_string()).as_f64(), None);
    assert_eq!(Value::Float(4.9).as_i64(), Some(4));
    assert_eq!(Value::Boolean(true).as_i64(), None);
}
