//! JSON-safe value conversion.
//!
//! Single conversion layer at the engine boundary: NaN and ±Inf become null,
//! byte strings already decoded upstream stay strings, complex values are
//! stringified, and N-D arrays become nested lists. Nothing else in the crate
//! hand-rolls these rules.

use serde_json::Value as JsonValue;

use crate::hfile::{Array, Values};

/// A finite float as a JSON number; NaN/±Inf as null.
pub fn safe_number(value: f64) -> JsonValue {
    if value.is_finite() {
        serde_json::Number::from_f64(value).map(JsonValue::Number).unwrap_or(JsonValue::Null)
    } else {
        JsonValue::Null
    }
}

fn element_to_json(values: &Values, index: usize) -> JsonValue {
    match values {
        Values::Int(v) => JsonValue::from(v[index]),
        Values::UInt(v) => JsonValue::from(v[index]),
        Values::Float(v) => safe_number(v[index]),
        Values::Bool(v) => JsonValue::from(v[index]),
        Values::Text(v) => JsonValue::from(v[index].clone()),
        Values::Complex(v) => {
            let (re, im) = v[index];
            JsonValue::from(format!("({re}{im:+}j)"))
        }
    }
}

/// Render an array as nested JSON lists following its shape. A rank-0 array
/// renders as a bare scalar.
pub fn array_to_json(arr: &Array) -> JsonValue {
    let mut offset = 0usize;
    build(&arr.shape, &arr.values, &mut offset)
}

fn build(shape: &[usize], values: &Values, offset: &mut usize) -> JsonValue {
    match shape {
        [] => {
            let index = *offset;
            *offset += 1;
            element_to_json(values, index)
        }
        [n, rest @ ..] => {
            JsonValue::Array((0..*n).map(|_| build(rest, values, offset)).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(safe_number(1.5), json!(1.5));
        assert_eq!(safe_number(f64::NAN), JsonValue::Null);
        assert_eq!(safe_number(f64::INFINITY), JsonValue::Null);
        assert_eq!(safe_number(f64::NEG_INFINITY), JsonValue::Null);
    }

    #[test]
    fn arrays_nest_by_shape() {
        let arr = Array {
            shape: vec![2, 3],
            values: Values::Float(vec![1.0, 2.0, f64::NAN, 4.0, 5.0, 6.0]),
        };
        assert_eq!(array_to_json(&arr), json!([[1.0, 2.0, null], [4.0, 5.0, 6.0]]));
    }

    #[test]
    fn rank_zero_renders_as_scalar() {
        let arr = Array { shape: vec![], values: Values::Int(vec![42]) };
        assert_eq!(array_to_json(&arr), json!(42));
    }

    #[test]
    fn complex_values_stringify() {
        let arr = Array { shape: vec![2], values: Values::Complex(vec![(1.0, 2.0), (0.5, -1.0)]) };
        assert_eq!(array_to_json(&arr), json!(["(1+2j)", "(0.5-1j)"]));
    }

    #[test]
    fn empty_leading_axis_renders_empty() {
        let arr = Array { shape: vec![0, 5], values: Values::Float(vec![]) };
        assert_eq!(array_to_json(&arr), json!([]));
    }
}
