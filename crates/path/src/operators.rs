//! Comparison and arithmetic over value sequences.

use crate::ast::BinaryOperator;
use crate::error::PathError;
use crate::value::{Item, Value};

/// Existential comparison: true iff some pair of items, one from each side,
/// satisfies `op`. Either side empty yields false.
pub fn compare(op: BinaryOperator, left: &Value, right: &Value) -> bool {
    left.items()
        .iter()
        .any(|l| right.items().iter().any(|r| compare_items(op, l, r)))
}

fn compare_items(op: BinaryOperator, left: &Item, right: &Item) -> bool {
    match op {
        BinaryOperator::Equals | BinaryOperator::NotEquals => {
            let equal = if left.is_boolean() || right.is_boolean() {
                Some(left.to_boolean() == right.to_boolean())
            } else if left.is_number() || right.is_number() {
                let (l, r) = (left.to_number(), right.to_number());
                if l.is_nan() || r.is_nan() {
                    None
                } else {
                    Some(l == r)
                }
            } else {
                Some(left.string_value() == right.string_value())
            };
            match (op, equal) {
                (_, None) => op == BinaryOperator::NotEquals,
                (BinaryOperator::Equals, Some(eq)) => eq,
                (_, Some(eq)) => !eq,
            }
        }
        _ => {
            let (l, r) = (left.to_number(), right.to_number());
            match op {
                BinaryOperator::LessThan => l < r,
                BinaryOperator::LessThanOrEqual => l <= r,
                BinaryOperator::GreaterThan => l > r,
                BinaryOperator::GreaterThanOrEqual => l >= r,
                _ => false,
            }
        }
    }
}

/// Numeric operation on the first items of both operands. An empty operand
/// yields the empty sequence.
pub fn arithmetic(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value, PathError> {
    if left.is_empty() || right.is_empty() {
        return Ok(Value::empty());
    }
    let (l, r) = (left.to_number(), right.to_number());
    let result = match op {
        BinaryOperator::Plus => l + r,
        BinaryOperator::Minus => l - r,
        BinaryOperator::Multiply => l * r,
        BinaryOperator::Divide => l / r,
        BinaryOperator::Modulo => l % r,
        other => {
            return Err(PathError::TypeError(format!(
                "{:?} is not an arithmetic operator",
                other
            )));
        }
    };
    Ok(Value::number(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(ns: &[f64]) -> Value {
        Value::from_items(ns.iter().map(|n| Item::Number(*n)).collect())
    }

    #[test]
    fn test_existential_equality() {
        assert!(compare(
            BinaryOperator::Equals,
            &numbers(&[1.0, 2.0]),
            &numbers(&[2.0, 3.0])
        ));
        assert!(!compare(
            BinaryOperator::Equals,
            &numbers(&[1.0, 2.0]),
            &numbers(&[3.0, 4.0])
        ));
        // Both sides contain differing pairs.
        assert!(compare(
            BinaryOperator::NotEquals,
            &numbers(&[1.0]),
            &numbers(&[1.0, 2.0])
        ));
    }

    #[test]
    fn test_nan_never_equal() {
        let nan = Value::number(f64::NAN);
        assert!(!compare(BinaryOperator::Equals, &nan, &nan));
        assert!(!compare(BinaryOperator::Equals, &nan, &Value::string("NaN")));
        assert!(!compare(BinaryOperator::LessThan, &nan, &Value::number(1.0)));
        assert!(!compare(BinaryOperator::GreaterThanOrEqual, &nan, &nan));
    }

    #[test]
    fn test_empty_side_is_false() {
        let empty = Value::empty();
        assert!(!compare(BinaryOperator::Equals, &empty, &empty));
        assert!(!compare(BinaryOperator::NotEquals, &empty, &Value::number(1.0)));
    }

    #[test]
    fn test_type_precedence() {
        // boolean beats number
        assert!(compare(
            BinaryOperator::Equals,
            &Value::boolean(true),
            &Value::number(5.0)
        ));
        // number beats string
        assert!(compare(
            BinaryOperator::Equals,
            &Value::number(1.0),
            &Value::string(" 1.0 ")
        ));
        // strings compare as strings
        assert!(!compare(
            BinaryOperator::Equals,
            &Value::string("1"),
            &Value::string("1.0")
        ));
    }

    #[test]
    fn test_arithmetic() {
        let result = arithmetic(BinaryOperator::Modulo, &numbers(&[10.0]), &numbers(&[3.0]));
        assert_eq!(result.map(|v| v.to_number()), Ok(1.0));
        let neg = arithmetic(BinaryOperator::Modulo, &numbers(&[-7.0]), &numbers(&[3.0]));
        assert_eq!(neg.map(|v| v.to_number()), Ok(-1.0));
        let empty = arithmetic(BinaryOperator::Plus, &numbers(&[1.0]), &Value::empty());
        assert_eq!(empty.map(|v| v.is_empty()), Ok(true));
    }
}
