use serde::{Deserialize, Deserializer, Serialize};

use crate::util::f64_to_i64_safe;
use crate::version::Version;

/// A HackleValue is a loosely typed value found on either side of a condition: match values
/// declared in the workspace, and the user, event or remote config values they are compared to.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HackleValue {
    Str(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    /// Only produced for user or event properties; workspace match values are never arrays.
    Array(Vec<HackleValue>),
    Null,
}

/// The declared type of a condition's match values, or of a remote config parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HackleValueType {
    Null,
    String,
    Number,
    #[serde(rename = "BOOLEAN")]
    Bool,
    Version,
    Json,
}

impl HackleValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HackleValueType::Null => "NULL",
            HackleValueType::String => "STRING",
            HackleValueType::Number => "NUMBER",
            HackleValueType::Bool => "BOOLEAN",
            HackleValueType::Version => "VERSION",
            HackleValueType::Json => "JSON",
        }
    }
}

impl<'de> Deserialize<'de> for HackleValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        serde_json::Value::deserialize(deserializer).map(HackleValue::from)
    }
}

impl From<serde_json::Value> for HackleValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => HackleValue::Null,
            Value::Bool(b) => HackleValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    HackleValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    HackleValue::Double(f)
                } else {
                    HackleValue::Str(n.to_string())
                }
            }
            Value::String(s) => HackleValue::Str(s),
            Value::Array(values) => {
                HackleValue::Array(values.into_iter().map(HackleValue::from).collect())
            }
            // objects are compared as their JSON text
            Value::Object(_) => HackleValue::Str(v.to_string()),
        }
    }
}

impl From<HackleValue> for serde_json::Value {
    fn from(v: HackleValue) -> Self {
        use serde_json::Value;
        match v {
            HackleValue::Str(s) => Value::String(s),
            HackleValue::Int(i) => i.into(),
            HackleValue::Double(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            HackleValue::Bool(b) => Value::Bool(b),
            HackleValue::Array(values) => {
                Value::Array(values.into_iter().map(Value::from).collect())
            }
            HackleValue::Null => Value::Null,
        }
    }
}

impl From<&str> for HackleValue {
    fn from(s: &str) -> Self {
        HackleValue::Str(s.to_string())
    }
}

impl From<String> for HackleValue {
    fn from(s: String) -> Self {
        HackleValue::Str(s)
    }
}

impl From<i64> for HackleValue {
    fn from(i: i64) -> Self {
        HackleValue::Int(i)
    }
}

impl From<i32> for HackleValue {
    fn from(i: i32) -> Self {
        HackleValue::Int(i as i64)
    }
}

impl From<f64> for HackleValue {
    fn from(f: f64) -> Self {
        HackleValue::Double(f)
    }
}

impl From<bool> for HackleValue {
    fn from(b: bool) -> Self {
        HackleValue::Bool(b)
    }
}

impl<T: Into<HackleValue>> From<Vec<T>> for HackleValue {
    fn from(values: Vec<T>) -> Self {
        HackleValue::Array(values.into_iter().map(Into::into).collect())
    }
}

impl HackleValue {
    pub fn value_type(&self) -> HackleValueType {
        match self {
            HackleValue::Str(_) => HackleValueType::String,
            HackleValue::Int(_) | HackleValue::Double(_) => HackleValueType::Number,
            HackleValue::Bool(_) => HackleValueType::Bool,
            HackleValue::Array(_) => HackleValueType::Json,
            HackleValue::Null => HackleValueType::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HackleValue::Null)
    }

    /// Returns the contained string without any conversion.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HackleValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a string for string comparison. Numbers are stringified; booleans,
    /// arrays and null are not.
    pub fn to_string_value(&self) -> Option<String> {
        match self {
            HackleValue::Str(s) => Some(s.clone()),
            HackleValue::Int(i) => Some(i.to_string()),
            HackleValue::Double(f) => Some(format_double(*f)),
            _ => None,
        }
    }

    /// Returns the value as a number. Numeric strings are parsed.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            HackleValue::Str(s) => s.trim().parse::<f64>().ok(),
            HackleValue::Int(i) => Some(*i as f64),
            HackleValue::Double(f) => Some(*f),
            _ => None,
        }
    }

    pub fn to_i64(&self) -> Option<i64> {
        match self {
            HackleValue::Int(i) => Some(*i),
            HackleValue::Double(f) if f.fract() == 0.0 => f64_to_i64_safe(*f),
            _ => None,
        }
    }

    /// Returns the value as a boolean. The strings "true" and "false" are accepted in any case.
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            HackleValue::Bool(b) => Some(*b),
            HackleValue::Str(s) if s.len() <= 5 => match s.to_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn to_version(&self) -> Option<Version> {
        self.as_str().and_then(Version::parse)
    }
}

fn format_double(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test]
    fn deserializes_json_scalars() {
        let values: Vec<HackleValue> =
            serde_json::from_str(r#"["a", 42, 4.2, true, null, [1, "b"]]"#).unwrap();
        assert_that!(values).is_equal_to(vec![
            HackleValue::Str("a".into()),
            HackleValue::Int(42),
            HackleValue::Double(4.2),
            HackleValue::Bool(true),
            HackleValue::Null,
            HackleValue::Array(vec![HackleValue::Int(1), HackleValue::Str("b".into())]),
        ]);
    }

    #[test]
    fn objects_become_json_text() {
        let value = HackleValue::from(json!({"a": 1}));
        assert_that!(value.as_str()).contains_value(r#"{"a":1}"#);
    }

    #[test_case(HackleValue::Str("s".into()), HackleValueType::String)]
    #[test_case(HackleValue::Int(1), HackleValueType::Number)]
    #[test_case(HackleValue::Double(1.5), HackleValueType::Number)]
    #[test_case(HackleValue::Bool(false), HackleValueType::Bool)]
    #[test_case(HackleValue::Null, HackleValueType::Null)]
    fn value_type(value: HackleValue, expected: HackleValueType) {
        assert_eq!(expected, value.value_type());
    }

    #[test]
    fn string_conversion() {
        assert_that!(HackleValue::from("abc").to_string_value()).contains_value("abc".to_string());
        assert_that!(HackleValue::Int(42).to_string_value()).contains_value("42".to_string());
        assert_that!(HackleValue::Double(42.0).to_string_value())
            .contains_value("42.0".to_string());
        assert_that!(HackleValue::Double(0.5).to_string_value()).contains_value("0.5".to_string());
        assert_that!(HackleValue::Bool(true).to_string_value()).is_none();
        assert_that!(HackleValue::Null.to_string_value()).is_none();
    }

    #[test]
    fn number_conversion() {
        assert_that!(HackleValue::from("42").to_f64()).contains_value(42.0);
        assert_that!(HackleValue::from("4.2").to_f64()).contains_value(4.2);
        assert_that!(HackleValue::from("forty two").to_f64()).is_none();
        assert_that!(HackleValue::Int(3).to_f64()).contains_value(3.0);
        assert_that!(HackleValue::Bool(true).to_f64()).is_none();
    }

    #[test_case("true", Some(true) ; "lowercase true")]
    #[test_case("TRUE", Some(true) ; "uppercase true")]
    #[test_case("False", Some(false))]
    #[test_case("yes", None)]
    #[test_case("truefalse", None)]
    fn bool_conversion(s: &str, expected: Option<bool>) {
        assert_eq!(expected, HackleValue::from(s).to_bool());
    }

    #[test]
    fn round_trips_through_json_value() {
        let value: serde_json::Value = HackleValue::from(vec!["a", "b"]).into();
        assert_eq!(json!(["a", "b"]), value);
    }
}
