/*
 * value.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Dynamic value model for template evaluation.
//!
//! [`Value`] is the closed sum of everything a template expression can
//! produce. The engine consumes values only through the conversion
//! methods here, so hosts can build arbitrary environments out of the
//! constructors and `From` impls without the engine caring where the
//! data came from.

use std::fmt;
use std::rc::Rc;

use hashlink::LinkedHashMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::context::RenderContext;
use crate::html::Html;

/// Arguments to a function call: optional argument name plus value, in
/// the order written at the call site.
pub type CallArgs = Vec<(Option<String>, Value)>;

/// A callable template value.
///
/// The render context is the host effect handle: macros render their
/// bodies through it, and host functions may look up variables or emit
/// output while computing their result.
pub trait Callable {
    fn call(&self, ctx: &mut dyn RenderContext, args: CallArgs) -> Value;
}

/// A function value: a shared, dynamically-dispatched [`Callable`].
#[derive(Clone)]
pub struct Function(Rc<dyn Callable>);

impl Function {
    /// Wrap a callable as a function value.
    pub fn new(callable: impl Callable + 'static) -> Self {
        Function(Rc::new(callable))
    }

    /// Invoke the function.
    pub fn call(&self, ctx: &mut dyn RenderContext, args: CallArgs) -> Value {
        self.0.call(ctx, args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Function(..)")
    }
}

impl PartialEq for Function {
    /// Functions compare by identity, never by behavior.
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A value that can appear in template evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The absent value.
    #[default]
    Null,

    /// A boolean.
    Bool(bool),

    /// A decimal number.
    Number(Decimal),

    /// A string.
    String(String),

    /// An ordered sequence of values.
    List(Vec<Value>),

    /// A mapping from string keys to values, in insertion order.
    Object(LinkedHashMap<String, Value>),

    /// A callable.
    Function(Function),

    /// A safe-HTML fragment.
    Html(Html),
}

impl Value {
    /// Check whether this value is truthy.
    ///
    /// `Null`, `false`, `0`, `""`, `[]`, and `{}` are falsy; everything
    /// else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => !n.is_zero(),
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            Value::Function(_) => true,
            Value::Html(_) => true,
        }
    }

    /// Canonical textual rendering.
    ///
    /// Numbers render without trailing zeros; lists concatenate their
    /// elements with nothing in between; objects render as
    /// `{key: value, ...}` in insertion order; functions render empty.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.normalize().to_string(),
            Value::String(s) => s.clone(),
            Value::List(items) => items.iter().map(|v| v.to_text()).collect(),
            Value::Object(map) => {
                let fields: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.to_text()))
                    .collect();
                format!("{{{}}}", fields.join(", "))
            }
            Value::Function(_) => String::new(),
            Value::Html(h) => h.as_str().to_string(),
        }
    }

    /// Convert to a safe-HTML fragment.
    ///
    /// Html values pass through unchanged; everything else is rendered
    /// with [`Value::to_text`] and escaped.
    pub fn to_html(&self) -> Html {
        match self {
            Value::Html(h) => h.clone(),
            other => Html::escape(&other.to_text()),
        }
    }

    /// View this value as a sequence.
    ///
    /// Lists yield their items, objects their values in insertion
    /// order, strings their characters; everything else is empty.
    pub fn to_list(&self) -> Vec<Value> {
        match self {
            Value::List(items) => items.clone(),
            Value::Object(map) => map.values().cloned().collect(),
            Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
            _ => Vec::new(),
        }
    }

    /// The iteration keys paired with [`Value::to_list`].
    ///
    /// Lists and strings yield numeric indices `0..n`; objects yield
    /// their keys as strings; everything else is empty.
    pub fn iter_keys(&self) -> Vec<Value> {
        match self {
            Value::List(items) => index_keys(items.len()),
            Value::Object(map) => map.keys().map(|k| Value::String(k.clone())).collect(),
            Value::String(s) => index_keys(s.chars().count()),
            _ => Vec::new(),
        }
    }

    /// Loose indexing: list by non-negative integral number, object by
    /// the textual form of the index. Anything else is absent.
    pub fn get(&self, index: &Value) -> Option<&Value> {
        match self {
            Value::List(items) => match index {
                Value::Number(n) if n.is_integer() => {
                    n.to_usize().and_then(|i| items.get(i))
                }
                _ => None,
            },
            Value::Object(map) => map.get(&index.to_text()),
            _ => None,
        }
    }

    /// The callable projection, if this value is a function.
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }
}

fn index_keys(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| Value::Number(Decimal::from(i as u64)))
        .collect()
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(Decimal::from(n))
    }
}

impl From<Decimal> for Value {
    fn from(n: Decimal) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<LinkedHashMap<String, Value>> for Value {
    fn from(map: LinkedHashMap<String, Value>) -> Self {
        Value::Object(map)
    }
}

impl From<Html> for Value {
    fn from(h: Html) -> Self {
        Value::Html(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(entries: &[(&str, Value)]) -> Value {
        let mut map = LinkedHashMap::new();
        for (k, v) in entries {
            map.insert(k.to_string(), v.clone());
        }
        Value::Object(map)
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from(false).is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(!object(&[]).is_truthy());

        assert!(Value::from(true).is_truthy());
        assert!(Value::from(-1).is_truthy());
        assert!(Value::from("false").is_truthy());
        assert!(Value::List(vec![Value::Null]).is_truthy());
        assert!(object(&[("k", Value::Null)]).is_truthy());
        assert!(Value::Html(Html::from_raw("")).is_truthy());
    }

    #[test]
    fn test_to_text_numbers_drop_trailing_zeros() {
        let n: Decimal = "1.500".parse().unwrap();
        assert_eq!(Value::Number(n).to_text(), "1.5");
        let n: Decimal = "2.000".parse().unwrap();
        assert_eq!(Value::Number(n).to_text(), "2");
    }

    #[test]
    fn test_to_text_list_concatenates() {
        let v = Value::List(vec![Value::from(1), Value::from("x"), Value::from(2)]);
        assert_eq!(v.to_text(), "1x2");
    }

    #[test]
    fn test_to_html_escapes_non_html() {
        assert_eq!(Value::from("a<b").to_html().as_str(), "a&lt;b");
        let h = Value::Html(Html::from_raw("<b>x</b>"));
        assert_eq!(h.to_html().as_str(), "<b>x</b>");
    }

    #[test]
    fn test_iter_keys_lockstep_with_to_list() {
        let v = Value::List(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(v.iter_keys(), vec![Value::from(0), Value::from(1)]);
        assert_eq!(v.to_list(), vec![Value::from("a"), Value::from("b")]);

        let o = object(&[("x", Value::from(1)), ("y", Value::from(2))]);
        assert_eq!(o.iter_keys(), vec![Value::from("x"), Value::from("y")]);
        assert_eq!(o.to_list(), vec![Value::from(1), Value::from(2)]);

        let s = Value::from("ab");
        assert_eq!(s.iter_keys(), vec![Value::from(0), Value::from(1)]);
        assert_eq!(s.to_list(), vec![Value::from("a"), Value::from("b")]);
    }

    #[test]
    fn test_get_loose() {
        let list = Value::List(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(list.get(&Value::from(1)), Some(&Value::from("b")));
        assert_eq!(list.get(&Value::from(5)), None);
        assert_eq!(list.get(&Value::from("1")), None);

        let obj = object(&[("name", Value::from("x"))]);
        assert_eq!(obj.get(&Value::from("name")), Some(&Value::from("x")));
        assert_eq!(obj.get(&Value::from("other")), None);

        assert_eq!(Value::Null.get(&Value::from(0)), None);
    }

    #[test]
    fn test_function_equality_is_identity() {
        struct Id;
        impl Callable for Id {
            fn call(&self, _ctx: &mut dyn RenderContext, mut args: CallArgs) -> Value {
                args.pop().map(|(_, v)| v).unwrap_or(Value::Null)
            }
        }
        let f = Function::new(Id);
        let g = Function::new(Id);
        assert_eq!(f, f.clone());
        assert_ne!(f, g);
    }
}
