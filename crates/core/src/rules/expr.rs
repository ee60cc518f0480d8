//! Restricted comparison-expression evaluation.
//!
//! Expression rule values are strings like `">= 60"` or `"== safari"`. The
//! grammar is deliberately tiny: one comparison operator followed by one
//! number/string/boolean literal. Anything else is a configuration error.

use serde_json::Value;

use crate::error::{Error, Result};

/// Longest-first so `<=` is not read as `<` followed by `= 60`.
const OPERATORS: &[&str] = &["===", "!==", "==", "!=", "<=", ">=", "<", ">"];

/// Whether a string value is an expression node.
pub(crate) fn starts_with_operator(s: &str) -> bool {
	let trimmed = s.trim_start();
	OPERATORS.iter().any(|op| trimmed.starts_with(op))
}

/// Evaluates `actual <op> <literal>` for an expression source string.
pub(crate) fn eval(source: &str, actual: &Value) -> Result<bool> {
	let trimmed = source.trim();
	let op = OPERATORS
		.iter()
		.find(|op| trimmed.starts_with(**op))
		.ok_or_else(|| Error::BadExpression(source.into()))?;
	let operand_src = trimmed[op.len()..].trim();
	if operand_src.is_empty() {
		return Err(Error::BadExpression(source.into()));
	}
	let operand = parse_literal(operand_src);

	match *op {
		"===" => Ok(same_type(actual, &operand) && loose_eq(actual, &operand)),
		"!==" => Ok(!(same_type(actual, &operand) && loose_eq(actual, &operand))),
		"==" => Ok(loose_eq(actual, &operand)),
		"!=" => Ok(!loose_eq(actual, &operand)),
		relational => relational_cmp(relational, actual, &operand),
	}
}

/// Parses the operand literal. Quoted strings keep their spelling; `true`/
/// `false` and numbers get their natural types; everything else is a bare
/// string.
fn parse_literal(src: &str) -> Value {
	for quote in ['\'', '"'] {
		if src.len() >= 2 && src.starts_with(quote) && src.ends_with(quote) {
			return Value::String(src[1..src.len() - 1].to_string());
		}
	}
	match src {
		"true" => Value::Bool(true),
		"false" => Value::Bool(false),
		_ => {
			if let Ok(n) = src.parse::<i64>() {
				Value::Number(n.into())
			} else if let Some(n) = src.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
				Value::Number(n)
			} else {
				Value::String(src.to_string())
			}
		}
	}
}

fn numeric(v: &Value) -> Option<f64> {
	v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

/// Equality with numeric coercion, so `"60"` and `60` compare equal under
/// `==` but not under `===`.
fn loose_eq(a: &Value, b: &Value) -> bool {
	match (numeric(a), numeric(b)) {
		(Some(x), Some(y)) => x == y,
		_ => match (a, b) {
			(Value::String(x), Value::String(y)) => x == y,
			(Value::Bool(x), Value::Bool(y)) => x == y,
			_ => a == b,
		},
	}
}

fn same_type(a: &Value, b: &Value) -> bool {
	matches!(
		(a, b),
		(Value::String(_), Value::String(_))
			| (Value::Number(_), Value::Number(_))
			| (Value::Bool(_), Value::Bool(_))
	)
}

fn relational_cmp(op: &str, actual: &Value, operand: &Value) -> Result<bool> {
	if let (Some(a), Some(b)) = (numeric(actual), numeric(operand)) {
		return Ok(match op {
			"<" => a < b,
			"<=" => a <= b,
			">" => a > b,
			">=" => a >= b,
			_ => unreachable!("relational operators only"),
		});
	}
	if let (Value::String(a), Value::String(b)) = (actual, operand) {
		return Ok(match op {
			"<" => a < b,
			"<=" => a <= b,
			">" => a > b,
			">=" => a >= b,
			_ => unreachable!("relational operators only"),
		});
	}
	Ok(false)
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn numeric_relations() {
		assert!(eval(">= 60", &json!(60)).unwrap());
		assert!(eval(">= 60", &json!(90.5)).unwrap());
		assert!(!eval(">= 60", &json!(30)).unwrap());
		assert!(eval("< 10", &json!(9)).unwrap());
		// String-typed numbers coerce for relational comparison.
		assert!(eval("> 5", &json!("6")).unwrap());
	}

	#[test]
	fn equality_loose_and_strict() {
		assert!(eval("== 60", &json!("60")).unwrap());
		assert!(!eval("=== 60", &json!("60")).unwrap());
		assert!(eval("=== 60", &json!(60)).unwrap());
		assert!(eval("!= safari", &json!("chrome")).unwrap());
		assert!(eval("!== true", &json!("true")).unwrap());
		assert!(eval("== 'quoted value'", &json!("quoted value")).unwrap());
	}

	#[test]
	fn booleans() {
		assert!(eval("== true", &json!(true)).unwrap());
		assert!(!eval("== true", &json!(false)).unwrap());
	}

	#[test]
	fn mismatched_relational_types_do_not_match() {
		assert!(!eval("> 5", &json!(true)).unwrap());
		assert!(!eval("<= 5", &json!({"a": 1})).unwrap());
	}

	#[test]
	fn lexicographic_strings() {
		assert!(eval("< b", &json!("a")).unwrap());
		assert!(!eval("> b", &json!("a")).unwrap());
	}

	#[test]
	fn empty_operand_is_rejected() {
		assert!(matches!(eval(">=", &json!(1)).unwrap_err(), Error::BadExpression(_)));
		assert!(matches!(eval(">=   ", &json!(1)).unwrap_err(), Error::BadExpression(_)));
	}
}
