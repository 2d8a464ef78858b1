//! Type affinity for arithmetic and comparison opcodes.
//!
//! Arithmetic coerces both operands to integers: numbers pass through, a
//! text operand contributes its trailing run of digits (`"foo5"` counts
//! as 5), and anything else counts as 0. Equality treats a text equal to
//! the decimal form of an integer as that integer; ordering places
//! numbers before strings.

use std::cmp::Ordering;
use types::Value;

/// Integer interpretation of a cell for arithmetic.
pub fn numeric_value(value: &Value) -> i64 {
    match value {
        Value::Int(v) => *v,
        Value::Text(s) => integer_suffix(s),
        Value::Blob(_) | Value::Null => 0,
    }
}

fn integer_suffix(text: &str) -> i64 {
    let digits: &str = {
        let bytes = text.as_bytes();
        let mut start = bytes.len();
        while start > 0 && bytes[start - 1].is_ascii_digit() {
            start -= 1;
        }
        &text[start..]
    };
    digits.parse().unwrap_or(0)
}

/// Equality under affinity.
pub fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Int(a), Value::Text(b)) | (Value::Text(b), Value::Int(a)) => {
            *b == a.to_string()
        }
        (Value::Blob(a), Value::Blob(b)) => a == b,
        // NULL compares equal to nothing, itself included.
        _ => false,
    }
}

/// Ordering under affinity: NULL sorts first, then numbers, then strings,
/// then blobs.
pub fn compare_values(lhs: &Value, rhs: &Value) -> Ordering {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
        _ => rank(lhs).cmp(&rank(rhs)),
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Int(_) => 1,
        Value::Text(_) => 2,
        Value::Blob(_) => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_value_parses_trailing_digits() {
        assert_eq!(numeric_value(&Value::Text("foo5".into())), 5);
        assert_eq!(numeric_value(&Value::Text("12".into())), 12);
        assert_eq!(numeric_value(&Value::Text("a1b23".into())), 23);
        assert_eq!(numeric_value(&Value::Text("foo".into())), 0);
        assert_eq!(numeric_value(&Value::Text("".into())), 0);
        assert_eq!(numeric_value(&Value::Int(-4)), -4);
        assert_eq!(numeric_value(&Value::Null), 0);
    }

    #[test]
    fn text_equals_decimal_form_of_integer() {
        assert!(values_equal(&Value::Int(7), &Value::Text("7".into())));
        assert!(!values_equal(&Value::Int(7), &Value::Text("07".into())));
        assert!(!values_equal(&Value::Int(7), &Value::Text("7x".into())));
        assert!(!values_equal(&Value::Null, &Value::Null));
    }

    #[test]
    fn numbers_sort_before_strings() {
        assert_eq!(
            compare_values(&Value::Int(999), &Value::Text("1".into())),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::Text("a".into()), &Value::Int(0)),
            Ordering::Greater
        );
        assert_eq!(
            compare_values(&Value::Int(2), &Value::Int(10)),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::Text("b".into()), &Value::Text("a".into())),
            Ordering::Greater
        );
    }
}
