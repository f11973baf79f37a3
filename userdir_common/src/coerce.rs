//! Tools to coerce loosely typed JSON payload values.
//!
//! Browser clients send form fields as whatever the widget produced: numbers
//! may arrive as strings, booleans as numbers. These helpers apply the same
//! lenient rules the web client relies on, and fail where the result could
//! not be stored faithfully.

pub use serde_json::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoerceError {
    #[error("Required field {0} is missing")]
    MissingField(String),
    #[error("Field {field} is not a number (found {found})")]
    NotANumber { field: String, found: String },
    #[error("Field {field} must be a whole number")]
    NotInteger { field: String },
    #[error("Field {field} must not be negative")]
    Negative { field: String },
    #[error("Field {field} is out of range")]
    OutOfRange { field: String },
    #[error("Type Mismatch on {field}: expected {expected}, found {found}")]
    WrongType {
        field: String,
        expected: String,
        found: String,
    },
}

/// Get a string corresponding to a JSON type
pub fn get_value_type(value: &Value) -> String {
    match value {
        Value::Null => "Null".into(),
        Value::Bool(_) => "Bool".into(),
        Value::Number(_) => "Number".into(),
        Value::String(_) => "String".into(),
        Value::Array(_) => "Array".into(),
        Value::Object(_) => "Object".into(),
    }
}

/// Convert a value to a number the way `Number(x)` does in a browser.
///
/// Null and the empty string are zero; booleans are one or zero. Containers
/// and unparsable strings are rejected rather than turned into NaN.
pub fn to_number(field: &str, value: &Value) -> Result<f64, CoerceError> {
    let not_a_number = || CoerceError::NotANumber {
        field: field.to_string(),
        found: get_value_type(value),
    };

    let n = match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().ok_or_else(not_a_number)?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse::<f64>().map_err(|_| not_a_number())?
            }
        }
        Value::Array(_) | Value::Object(_) => return Err(not_a_number()),
    };

    if !n.is_finite() {
        return Err(not_a_number());
    }

    Ok(n)
}

/// Coerce to a whole number.
pub fn to_integer(field: &str, value: &Value) -> Result<i64, CoerceError> {
    if let Value::Number(n) = value {
        if let Some(i) = n.as_i64() {
            return Ok(i);
        }
    }

    let n = to_number(field, value)?;

    if n.fract() != 0.0 {
        return Err(CoerceError::NotInteger {
            field: field.to_string(),
        });
    }

    if n < i64::MIN as f64 || n >= i64::MAX as f64 {
        return Err(CoerceError::OutOfRange {
            field: field.to_string(),
        });
    }

    Ok(n as i64)
}

/// Coerce to a whole number that fits a `u32`.
pub fn to_unsigned(field: &str, value: &Value) -> Result<u32, CoerceError> {
    let i = to_integer(field, value)?;

    if i < 0 {
        return Err(CoerceError::Negative {
            field: field.to_string(),
        });
    }

    u32::try_from(i).map_err(|_| CoerceError::OutOfRange {
        field: field.to_string(),
    })
}

/// Browser truthiness: null, false, zero, NaN and the empty string are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Parse the leading integer of a value the way `parseInt` does.
///
/// `"12abc"` is 12, `" 3"` is 3, `3.9` is 3. Returns [None] when there is no
/// leading integer at all.
pub fn leading_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i);
            }
            let f = n.as_f64()?.trunc();
            if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                Some(f as i64)
            } else {
                None
            }
        }
        Value::String(s) => {
            let s = s.trim_start();
            let (negative, digits) = match s.as_bytes().first() {
                Some(b'-') => (true, &s[1..]),
                Some(b'+') => (false, &s[1..]),
                _ => (false, s),
            };
            let end = digits
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(digits.len());
            let magnitude: i64 = digits[..end].parse().ok()?;
            Some(if negative { -magnitude } else { magnitude })
        }
        _ => None,
    }
}

/// Extract an optional string field. Absent and null both mean "not given".
pub fn optional_string(
    field: &str,
    value: Option<&Value>,
) -> Result<Option<String>, CoerceError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(CoerceError::WrongType {
            field: field.to_string(),
            expected: "String".into(),
            found: get_value_type(other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_like_a_browser() {
        assert_eq!(to_number("f", &json!(4.5)).unwrap(), 4.5);
        assert_eq!(to_number("f", &json!(" 12 ")).unwrap(), 12.0);
        assert_eq!(to_number("f", &json!("")).unwrap(), 0.0);
        assert_eq!(to_number("f", &json!(null)).unwrap(), 0.0);
        assert_eq!(to_number("f", &json!(true)).unwrap(), 1.0);
        assert!(to_number("f", &json!("abc")).is_err());
        assert!(to_number("f", &json!("inf")).is_err());
        assert!(to_number("f", &json!([1])).is_err());
    }

    #[test]
    fn integers() {
        assert_eq!(to_integer("taxId", &json!("9999")).unwrap(), 9999);
        assert_eq!(to_integer("taxId", &json!(12.0)).unwrap(), 12);
        assert_eq!(
            to_integer("taxId", &json!(1.5)),
            Err(CoerceError::NotInteger {
                field: "taxId".into()
            })
        );
        assert_eq!(to_unsigned("age", &json!("33")).unwrap(), 33);
        assert!(matches!(
            to_unsigned("age", &json!(-1)),
            Err(CoerceError::Negative { .. })
        ));
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!("false")));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!({})));
    }

    #[test]
    fn parse_int_prefix() {
        assert_eq!(leading_integer(&json!(2)), Some(2));
        assert_eq!(leading_integer(&json!(2.7)), Some(2));
        assert_eq!(leading_integer(&json!("  7 pages")), Some(7));
        assert_eq!(leading_integer(&json!("-3")), Some(-3));
        assert_eq!(leading_integer(&json!("x1")), None);
        assert_eq!(leading_integer(&json!("")), None);
        assert_eq!(leading_integer(&json!(null)), None);
        assert_eq!(leading_integer(&json!(true)), None);
    }

    #[test]
    fn strings() {
        assert_eq!(optional_string("post", None).unwrap(), None);
        assert_eq!(
            optional_string("post", Some(&json!("Boss"))).unwrap(),
            Some("Boss".to_string())
        );
        assert!(optional_string("post", Some(&json!(5))).is_err());
    }
}
