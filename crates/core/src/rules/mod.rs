//! Conditional rule-tree interpreter.
//!
//! Platform rule files are JSON documents whose values encode a small
//! directive grammar. Each node is typed by shape or prefix:
//!
//! - scalar: any plain JSON value
//! - set: a JSON array of values (ordered)
//! - alias: a string prefixed `#`, referencing a sibling key
//! - keyword: a string of the form `<type>` naming a runtime type
//! - expression: a string beginning with a comparison operator
//! - rule: an object carrying `@if`/`@key`/`@values`/`@restrict` directives
//!
//! A rule node that does not resolve evaluates to "undefined" (`Ok(None)`),
//! never an error. Errors are reserved for malformed trees and missing
//! context: those are configuration bugs and must propagate.

mod expr;

use serde_json::{Map, Value};
use tracing::trace;

use crate::error::{Error, Result};

/// Interpreter over one platform's rule tree.
pub struct RuleEngine {
	tree: Value,
}

/// A rule-tree node classified by shape/prefix.
enum Node<'a> {
	Scalar(&'a Value),
	Set(&'a [Value]),
	Alias(&'a str),
	Keyword(&'a str),
	Expr(&'a str),
	Rule(&'a Map<String, Value>),
}

fn classify(value: &Value) -> Node<'_> {
	match value {
		Value::Array(items) => Node::Set(items),
		Value::String(s) => {
			if let Some(name) = s.strip_prefix('#') {
				Node::Alias(name)
			} else if let Some(keyword) = as_keyword(s) {
				Node::Keyword(keyword)
			} else if expr::starts_with_operator(s) {
				Node::Expr(s)
			} else {
				Node::Scalar(value)
			}
		}
		Value::Object(map) => {
			if map.keys().any(|k| k.starts_with('@')) {
				Node::Rule(map)
			} else {
				Node::Scalar(value)
			}
		}
		_ => Node::Scalar(value),
	}
}

/// `<type>` keyword shape: angle brackets around a bare word.
fn as_keyword(s: &str) -> Option<&str> {
	let inner = s.strip_prefix('<')?.strip_suffix('>')?;
	if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_alphabetic()) {
		Some(inner)
	} else {
		None
	}
}

impl RuleEngine {
	/// Wraps a parsed rule tree. The root must be an object.
	pub fn new(tree: Value) -> Result<Self> {
		if !tree.is_object() {
			return Err(Error::NotAnObject("<root>".into()));
		}
		Ok(Self { tree })
	}

	/// Parses a rule file.
	pub fn from_json(raw: &str) -> Result<Self> {
		Self::new(serde_json::from_str(raw)?)
	}

	/// Resolves `key` inside the sub-tree at dotted `path`, given context
	/// `input`. `Ok(None)` means the rule did not resolve ("undefined").
	pub fn get(&self, path: &str, key: &str, input: &Value) -> Result<Option<Value>> {
		let level = self.level(path)?;
		self.resolve_key(level, key, input)
	}

	/// Resolves the expected value of `key` at `path` and matches it against
	/// `input[key]` by the type-appropriate rule. A `@restrict` sibling that
	/// resolves to a defined value must additionally match.
	pub fn validate(&self, path: &str, key: &str, input: &Value) -> Result<bool> {
		let level = self.level(path)?;
		let Some(raw) = level.get(key) else {
			return Err(Error::Config(format!("no rule for '{key}' in section '{path}'")));
		};
		let actual = context_value(input, key)?;

		let ok = match self.resolve_value(level, raw, input)? {
			None => false,
			Some(expected) => self.match_value(level, &expected, actual, input)?,
		};
		if !ok {
			trace!(target = "cbt", path, key, "value failed its rule");
			return Ok(false);
		}

		if let Some(restrict) = raw.as_object().and_then(|m| m.get("@restrict")) {
			let rule = restrict
				.as_object()
				.ok_or_else(|| Error::Config(format!("@restrict for '{key}' must be an object")))?;
			if let Some(expected) = self.resolve_rule(rule, input)? {
				return self.match_value(level, &expected, actual, input);
			}
		}
		Ok(true)
	}

	/// Walks the dotted `path` to a tree level.
	fn level(&self, path: &str) -> Result<&Map<String, Value>> {
		let mut node = &self.tree;
		let mut walked = String::new();
		for segment in path.split('.') {
			if segment.is_empty() {
				return Err(Error::BadRulePath {
					path: path.into(),
					reason: "empty segment".into(),
				});
			}
			if !walked.is_empty() {
				walked.push('.');
			}
			walked.push_str(segment);
			node = node
				.get(segment)
				.ok_or_else(|| Error::BadRulePath {
					path: path.into(),
					reason: format!("no section '{walked}'"),
				})?;
		}
		node.as_object().ok_or_else(|| Error::NotAnObject(path.into()))
	}

	fn resolve_key(
		&self,
		level: &Map<String, Value>,
		key: &str,
		input: &Value,
	) -> Result<Option<Value>> {
		match level.get(key) {
			None => Ok(None),
			Some(raw) => self.resolve_value(level, raw, input),
		}
	}

	/// Resolves a raw node value to its leaf form, or `None` when a rule
	/// node does not apply. Aliases re-resolve at the same tree level.
	fn resolve_value(
		&self,
		level: &Map<String, Value>,
		value: &Value,
		input: &Value,
	) -> Result<Option<Value>> {
		match classify(value) {
			Node::Scalar(_) | Node::Set(_) | Node::Keyword(_) | Node::Expr(_) => {
				Ok(Some(value.clone()))
			}
			Node::Alias(name) => self.resolve_key(level, name, input),
			Node::Rule(map) => self.resolve_rule(map, input),
		}
	}

	/// Evaluates a conditional rule node.
	fn resolve_rule(&self, map: &Map<String, Value>, input: &Value) -> Result<Option<Value>> {
		if let Some(cond) = map.get("@if") {
			if !self.eval_condition(map, cond, input)? {
				return Ok(None);
			}
		}

		if let Some(keyref) = map.get("@key") {
			let field = keyref
				.as_str()
				.ok_or_else(|| Error::Config(format!("@key must be a string, got {keyref}")))?;
			if !input.is_object() {
				return Err(Error::NotAnObject("input".into()));
			}
			let Some(ctx) = input.get(field) else {
				return Ok(None);
			};
			return match map.get(&value_key(ctx)) {
				None => Ok(None),
				Some(v) => self.resolve_value(map, v, input),
			};
		}

		if let Some(values) = map.get("@values") {
			return self.resolve_value(map, values, input);
		}

		Ok(None)
	}

	/// Evaluates an `@if` condition: a single-key object that is either a
	/// `&&`/`||` combinator over sub-statements or a field test.
	fn eval_condition(
		&self,
		level: &Map<String, Value>,
		cond: &Value,
		input: &Value,
	) -> Result<bool> {
		let obj = cond
			.as_object()
			.filter(|m| m.len() == 1)
			.ok_or_else(|| Error::BadStatement(cond.to_string()))?;
		let (key, stmt) = obj.iter().next().expect("len checked above");

		match key.as_str() {
			"&&" => {
				let operands = stmt
					.as_array()
					.ok_or_else(|| Error::BadCombinator("&&".into()))?;
				for sub in operands {
					if !self.eval_condition(level, sub, input)? {
						return Ok(false);
					}
				}
				Ok(true)
			}
			"||" => {
				let operands = stmt
					.as_array()
					.ok_or_else(|| Error::BadCombinator("||".into()))?;
				for sub in operands {
					if self.eval_condition(level, sub, input)? {
						return Ok(true);
					}
				}
				Ok(false)
			}
			field => {
				let actual = context_value(input, field)?;
				self.match_value(level, stmt, actual, input)
			}
		}
	}

	/// Type-dispatched match of `actual` against an expected value.
	fn match_value(
		&self,
		level: &Map<String, Value>,
		expected: &Value,
		actual: &Value,
		input: &Value,
	) -> Result<bool> {
		match classify(expected) {
			Node::Alias(name) => Err(Error::AliasInCondition(name.into())),
			Node::Scalar(v) => Ok(values_equal(v, actual)),
			Node::Set(items) => Ok(items.iter().any(|v| values_equal(v, actual))),
			Node::Keyword(keyword) => type_matches(keyword, actual),
			Node::Expr(source) => expr::eval(source, actual),
			Node::Rule(map) => match self.resolve_rule(map, input)? {
				None => Ok(false),
				Some(resolved) => self.match_value(level, &resolved, actual, input),
			},
		}
	}
}

/// Looks up a required field in the caller-supplied context.
fn context_value<'a>(input: &'a Value, field: &str) -> Result<&'a Value> {
	let obj = input
		.as_object()
		.ok_or_else(|| Error::NotAnObject("input".into()))?;
	obj.get(field)
		.ok_or_else(|| Error::MissingContextKey(field.into()))
}

/// String form of a context value used as a rule-node key.
fn value_key(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}

/// JSON equality with numeric values compared by magnitude, so `60` and
/// `60.0` agree regardless of how serde parsed them.
fn values_equal(a: &Value, b: &Value) -> bool {
	match (a.as_f64(), b.as_f64()) {
		(Some(x), Some(y)) => x == y,
		_ => a == b,
	}
}

fn type_matches(keyword: &str, actual: &Value) -> Result<bool> {
	match keyword {
		"array" => Ok(actual.is_array()),
		"string" => Ok(actual.is_string()),
		"number" => Ok(actual.is_number()),
		"boolean" => Ok(actual.is_boolean()),
		"object" => Ok(actual.is_object()),
		other => Err(Error::Config(format!("unknown type keyword <{other}>"))),
	}
}
