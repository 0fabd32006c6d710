use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;

/// Possible values a context field, variable or data-source element can hold.
#[derive(Debug, Clone)]
pub enum Value {
    /// String value
    String(String),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// Array of `Value`s
    Array(Vec<Value>),
    /// Object/map of string keys to `Value`s
    Object(HashMap<String, Value>),
    /// UTC date/time value
    Date(DateTime<Utc>),
    /// Null value
    Null,
}

// -------------------------------------------------------------------------------------------------
// Conversions between internal `Value` and `serde_json::Value`.
// Contexts and data sources arrive as plain JSON; keeping the mapping logic next to
// the data type it concerns lets every caller reuse the same conversion rules.
// -------------------------------------------------------------------------------------------------

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => serde_json::Value::String(s),
            Value::Integer(i) => serde_json::Value::Number(serde_json::Number::from(i)),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Boolean(b) => serde_json::Value::Bool(b),
            Value::Array(arr) => {
                let vec: Vec<serde_json::Value> = arr.into_iter().map(|v| v.into()).collect();
                serde_json::Value::Array(vec)
            }
            Value::Object(map) => {
                let json_map = map
                    .into_iter()
                    .map(|(k, v)| (k, v.into()))
                    .collect::<serde_json::Map<String, serde_json::Value>>();
                serde_json::Value::Object(json_map)
            }
            Value::Date(dt) => serde_json::Value::String(dt.to_rfc3339()),
            Value::Null => serde_json::Value::Null,
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        value.clone().into()
    }
}

impl TryFrom<&serde_json::Value> for Value {
    type Error = anyhow::Error;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        Ok(match value {
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    return Err(anyhow!("Unsupported number value: {}", n));
                }
            }
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Array(arr) => {
                let inner = arr.iter().map(Value::try_from).collect::<Result<Vec<_>, _>>()?;
                Value::Array(inner)
            }
            serde_json::Value::Object(map) => {
                let mut inner = HashMap::new();
                for (k, v) in map {
                    inner.insert(k.clone(), Value::try_from(v)?);
                }
                Value::Object(inner)
            }
            serde_json::Value::Null => Value::Null,
        })
    }
}

// Equality unifies integers and floats by numeric value before falling back to
// structural comparison; arrays and objects compare element-wise under the
// same rules.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Array(arr) => {
                write!(f, "[")?;
                for (i, item) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Object(obj) => {
                write!(f, "{{")?;
                let mut first = true;
                for (key, value) in obj {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                    first = false;
                }
                write!(f, "}}")
            }
            Value::Date(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Null => write!(f, "null"),
        }
    }
}

impl Value {
    /// Numeric coercion used by comparisons and aggregations. Returns `None`
    /// when the variant is not `Integer` or `Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer coercion for quantity-style fields. Floats truncate toward
    /// zero; non-numeric variants return `None`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) => Some(f.trunc() as i64),
            _ => None,
        }
    }

    /// Emptiness for conditional logic: null, the empty string, the empty
    /// array and the empty object are empty. Numeric zero and `false` are not.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(arr) => arr.is_empty(),
            Value::Object(obj) => obj.is_empty(),
            _ => false,
        }
    }

    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Date(_) => "date",
            Value::Null => "null",
        }
    }

    /// Interpret this value as a UTC timestamp. `Date` values pass through;
    /// strings must parse as RFC3339.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(dt) => Some(*dt),
            Value::String(s) => {
                DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
            }
            _ => None,
        }
    }

    /// Create date from ISO string
    ///
    /// # Errors
    ///
    /// Returns a `chrono::ParseError` if the ISO string cannot be parsed.
    pub fn date_from_iso(iso_string: &str) -> Result<Self, chrono::ParseError> {
        Ok(Value::Date(
            DateTime::parse_from_rfc3339(iso_string)?.with_timezone(&Utc),
        ))
    }
}
