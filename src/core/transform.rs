// src/core/transform.rs

//! Turns parse trees into [`Value`]s, bottom-up, through per-rule callbacks.

use super::engine::{Child, Token, Tree};
use crate::models::{Fields, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("'{rule}' expected {expected} but found {found}.")]
    Shape {
        rule: String,
        expected: String,
        found: String,
    },
    #[error("Invalid {what} '{value}'.")]
    InvalidValue { what: String, value: String },
}

/// Callback for one grammar rule or terminal. It receives the already
/// transformed children (a terminal receives its default value).
pub type TransformFn = Arc<dyn Fn(Vec<Value>) -> Result<Value, TransformError> + Send + Sync>;

/// Wraps a closure as a [`TransformFn`].
pub fn callback<F>(f: F) -> TransformFn
where
    F: Fn(Vec<Value>) -> Result<Value, TransformError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Dispatches tree nodes to their callbacks.
#[derive(Clone, Default)]
pub struct Transformer {
    callbacks: HashMap<String, TransformFn>,
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.callbacks.keys().collect();
        names.sort();
        f.debug_struct("Transformer").field("callbacks", &names).finish()
    }
}

impl Transformer {
    pub fn new(callbacks: HashMap<String, TransformFn>) -> Self {
        Self { callbacks }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn has_callback(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn transform(&self, tree: &Tree) -> Result<Value, TransformError> {
        let mut values = Vec::with_capacity(tree.children.len());
        for child in &tree.children {
            values.push(match child {
                Child::Tree(subtree) => self.transform(subtree)?,
                Child::Token(token) => self.token(token)?,
                Child::Missing => Value::Missing,
            });
        }

        match self.callbacks.get(&tree.data) {
            Some(callback) => callback(values),
            None if values.len() == 1 => Ok(values.pop().unwrap_or(Value::Missing)),
            None => Ok(Value::List(values)),
        }
    }

    fn token(&self, token: &Token) -> Result<Value, TransformError> {
        let value = match token.kind.as_str() {
            "ESCAPED_STRING" => Value::Str(unescape(&token.text)),
            _ => Value::Str(token.text.clone()),
        };
        match self.callbacks.get(&token.kind) {
            Some(callback) => callback(vec![value]),
            None => Ok(value),
        }
    }
}

/// Strips the quotes of a string literal and resolves its escapes.
pub fn unescape(literal: &str) -> String {
    let inner = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(literal);

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// The inverse of [`unescape`]: quotes a value for DSL text.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

pub(crate) fn describe(value: &Value) -> String {
    match value {
        Value::Missing => "nothing".to_string(),
        Value::Str(s) => format!("'{}'", s),
        Value::List(items) => format!("a list of {} items", items.len()),
        Value::Pair(key, _) => format!("a '{}' pair", key),
        Value::Record(_) => "a record".to_string(),
        Value::Command(c) => format!("a {} command", c.key()),
    }
}

/// Positional reader over a callback's arguments.
#[derive(Debug)]
pub struct Args {
    rule: &'static str,
    values: VecDeque<Value>,
}

impl Args {
    pub fn new(rule: &'static str, values: Vec<Value>) -> Self {
        Self {
            rule,
            values: values.into(),
        }
    }

    fn shape_error(&self, expected: &str, found: Option<&Value>) -> TransformError {
        TransformError::Shape {
            rule: self.rule.to_string(),
            expected: expected.to_string(),
            found: found.map(describe).unwrap_or_else(|| "end of arguments".to_string()),
        }
    }

    /// Drops `n` leading arguments (keyword tokens).
    pub fn skip(&mut self, n: usize) -> &mut Self {
        for _ in 0..n {
            self.values.pop_front();
        }
        self
    }

    pub fn value(&mut self) -> Result<Value, TransformError> {
        self.values
            .pop_front()
            .ok_or_else(|| self.shape_error("another argument", None))
    }

    pub fn string(&mut self) -> Result<String, TransformError> {
        match self.values.pop_front() {
            Some(Value::Str(s)) => Ok(s),
            other => Err(self.shape_error("a string", other.as_ref())),
        }
    }

    /// A string that may be an absent `[optional]` placeholder.
    pub fn optional_string(&mut self) -> Result<Option<String>, TransformError> {
        match self.values.pop_front() {
            Some(Value::Missing) | None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s)),
            other => Err(self.shape_error("a string", other.as_ref())),
        }
    }

    pub fn fields(&mut self) -> Result<Fields, TransformError> {
        let value = self.value()?;
        fields_from(self.rule, value)
    }

    /// Every remaining argument, absent placeholders dropped.
    pub fn rest(&mut self) -> Vec<Value> {
        self.values.drain(..).filter(|v| !v.is_missing()).collect()
    }
}

/// Collects `key = "value"` pairs into a field map.
pub fn fields_from(rule: &str, value: Value) -> Result<Fields, TransformError> {
    let mut fields = Fields::new();
    for item in value.into_items() {
        match item {
            Value::Pair(key, value) => match *value {
                Value::Str(v) => {
                    fields.insert(key, v);
                }
                other => {
                    return Err(TransformError::Shape {
                        rule: rule.to_string(),
                        expected: "a string value".to_string(),
                        found: describe(&other),
                    });
                }
            },
            other => {
                return Err(TransformError::Shape {
                    rule: rule.to_string(),
                    expected: "key/value pairs".to_string(),
                    found: describe(&other),
                });
            }
        }
    }
    Ok(fields)
}

/// Callback for `key "=" value` rules.
pub fn pair_callback(rule: &'static str) -> TransformFn {
    callback(move |values| {
        let mut args = Args::new(rule, values);
        let key = args.string()?;
        let value = args.value()?;
        Ok(Value::Pair(key, Box::new(value)))
    })
}

/// Callback for comma-separated pair lists; always yields a list.
pub fn list_callback() -> TransformFn {
    callback(|values| Ok(Value::List(values)))
}

/// Callback for keyword terminals: the canonical upper-cased spelling.
pub fn keyword_callback() -> TransformFn {
    callback(|values| match values.into_iter().next() {
        Some(Value::Str(s)) => Ok(Value::Str(s.to_uppercase())),
        Some(other) => Ok(other),
        None => Ok(Value::Missing),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::Grammar;

    const GRAMMAR: &str = r#"
        start: "SET"i NAME assignments
        assignments: assignment ("," assignment)*
        assignment: NAME "=" ESCAPED_STRING
        NAME: /[a-z]+/
        %import common.ESCAPED_STRING
        %import common.WS
        %ignore WS
    "#;

    #[test]
    fn test_default_dispatch_unwraps_single_children() {
        let grammar = Grammar::from_text(GRAMMAR).unwrap();
        let tree = grammar.parse(r#"SET target a="x""#).unwrap();

        let value = Transformer::default().transform(&tree).unwrap();
        // start has two children: NAME and assignments (which has one child).
        assert_eq!(
            value,
            Value::List(vec![
                Value::Str("target".to_string()),
                Value::List(vec![Value::Str("a".to_string()), Value::Str("x".to_string())]),
            ])
        );
    }

    #[test]
    fn test_callbacks_build_fields() {
        let grammar = Grammar::from_text(GRAMMAR).unwrap();
        let tree = grammar.parse(r#"set target a="x", b="say \"hi\"""#).unwrap();

        let mut callbacks = HashMap::new();
        callbacks.insert("assignment".to_string(), pair_callback("assignment"));
        callbacks.insert("assignments".to_string(), list_callback());
        callbacks.insert(
            "start".to_string(),
            callback(|values| {
                let mut args = Args::new("start", values);
                let name = args.string()?;
                let fields = args.fields()?;
                let mut record = std::collections::BTreeMap::new();
                record.insert("name".to_string(), Value::Str(name));
                for (k, v) in fields {
                    record.insert(k, Value::Str(v));
                }
                Ok(Value::Record(record))
            }),
        );

        let value = Transformer::new(callbacks).transform(&tree).unwrap();
        let Value::Record(record) = value else {
            panic!("expected a record");
        };
        assert_eq!(record.get("a"), Some(&Value::Str("x".to_string())));
        assert_eq!(record.get("b"), Some(&Value::Str("say \"hi\"".to_string())));
    }

    #[test]
    fn test_args_report_shape_errors() {
        let mut args = Args::new("rule", vec![Value::List(Vec::new())]);
        let err = args.string().unwrap_err();
        assert!(matches!(err, TransformError::Shape { rule, .. } if rule == "rule"));
        assert!(args.value().is_err());
    }

    #[test]
    fn test_unescape_and_quote_are_inverse() {
        let raw = "line1\nline2 \"quoted\" back\\slash";
        assert_eq!(unescape(&quote(raw)), raw);
        assert_eq!(unescape(r#""keep \d""#), "keep \\d");
    }
}
