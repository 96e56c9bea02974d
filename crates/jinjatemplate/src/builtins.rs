/*
 * builtins.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Built-in functions installed in the root scope.
//!
//! Binary operators in template expressions desugar to calls of named
//! functions (`a + b` is `sum(a, b)`, `x ~ y` is `concat(x, y)`), so
//! the evaluator's root scope provides those names, together with
//! `raw` and a handful of convenience filters. All builtins follow the
//! engine's soft-fail discipline: arguments that do not fit yield null
//! rather than an error.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::context::RenderContext;
use crate::html::Html;
use crate::value::{CallArgs, Callable, Function, Value};

type NativeFn = fn(&[(Option<String>, Value)]) -> Value;

struct NativeFunction {
    run: NativeFn,
}

impl Callable for NativeFunction {
    fn call(&self, _ctx: &mut dyn RenderContext, args: CallArgs) -> Value {
        (self.run)(&args)
    }
}

const BUILTINS: &[(&str, NativeFn)] = &[
    ("raw", raw),
    ("sum", sum),
    ("difference", difference),
    ("product", product),
    ("ratio", ratio),
    ("int_ratio", int_ratio),
    ("modulo", modulo),
    ("concat", concat),
    ("equals", equals),
    ("nequals", nequals),
    ("greater", greater),
    ("greaterEquals", greater_equals),
    ("less", less),
    ("lessEquals", less_equals),
    ("any", any),
    ("all", all),
    ("length", length),
    ("upper", upper),
    ("lower", lower),
    ("join", join),
    ("default", default_value),
];

/// Install the built-in bindings into a scope frame.
pub(crate) fn install(scope: &mut HashMap<String, Value>) {
    for (name, run) in BUILTINS {
        scope.insert(
            (*name).to_string(),
            Value::Function(Function::new(NativeFunction { run: *run })),
        );
    }
}

/// Argument values in call-site order, names ignored.
fn values(args: &[(Option<String>, Value)]) -> Vec<&Value> {
    args.iter().map(|(_, v)| v).collect()
}

/// Numeric coercion: numbers pass through, numeric strings parse.
fn as_number(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => Some(*n),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn numbers(args: &[(Option<String>, Value)]) -> Option<Vec<Decimal>> {
    values(args).into_iter().map(as_number).collect()
}

/// Fold a list of numbers; null when any argument is non-numeric or a
/// step fails (overflow, division by zero).
fn numeric_fold(
    args: &[(Option<String>, Value)],
    fold: impl Fn(Decimal, Decimal) -> Option<Decimal>,
) -> Value {
    let ns = match numbers(args) {
        Some(ns) if !ns.is_empty() => ns,
        _ => return Value::Null,
    };
    let mut acc = ns[0];
    for n in &ns[1..] {
        match fold(acc, *n) {
            Some(next) => acc = next,
            None => return Value::Null,
        }
    }
    Value::Number(acc)
}

fn raw(args: &[(Option<String>, Value)]) -> Value {
    match values(args).first() {
        Some(Value::Html(h)) => Value::Html((*h).clone()),
        Some(v) => Value::Html(Html::from_raw(v.to_text())),
        None => Value::Html(Html::new()),
    }
}

fn sum(args: &[(Option<String>, Value)]) -> Value {
    numeric_fold(args, |a, b| a.checked_add(b))
}

fn difference(args: &[(Option<String>, Value)]) -> Value {
    numeric_fold(args, |a, b| a.checked_sub(b))
}

fn product(args: &[(Option<String>, Value)]) -> Value {
    numeric_fold(args, |a, b| a.checked_mul(b))
}

fn ratio(args: &[(Option<String>, Value)]) -> Value {
    numeric_fold(args, |a, b| a.checked_div(b))
}

/// Truncated division: the integer part of the quotient.
fn int_ratio(args: &[(Option<String>, Value)]) -> Value {
    numeric_fold(args, |a, b| a.checked_div(b).map(|q| q.trunc()))
}

fn modulo(args: &[(Option<String>, Value)]) -> Value {
    numeric_fold(args, |a, b| a.checked_rem(b))
}

fn concat(args: &[(Option<String>, Value)]) -> Value {
    let mut out = String::new();
    for v in values(args) {
        out.push_str(&v.to_text());
    }
    Value::String(out)
}

fn equals(args: &[(Option<String>, Value)]) -> Value {
    let vs = values(args);
    Value::Bool(vs.windows(2).all(|w| w[0] == w[1]))
}

fn nequals(args: &[(Option<String>, Value)]) -> Value {
    match equals(args) {
        Value::Bool(b) => Value::Bool(!b),
        other => other,
    }
}

/// Ordering used by the comparison builtins: numeric when both sides
/// coerce to numbers, textual otherwise.
fn compare(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.to_text().cmp(&b.to_text()),
    }
}

fn ordered(
    args: &[(Option<String>, Value)],
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> Value {
    let vs = values(args);
    Value::Bool(vs.windows(2).all(|w| accept(compare(w[0], w[1]))))
}

fn greater(args: &[(Option<String>, Value)]) -> Value {
    ordered(args, |o| o == std::cmp::Ordering::Greater)
}

fn greater_equals(args: &[(Option<String>, Value)]) -> Value {
    ordered(args, |o| o != std::cmp::Ordering::Less)
}

fn less(args: &[(Option<String>, Value)]) -> Value {
    ordered(args, |o| o == std::cmp::Ordering::Less)
}

fn less_equals(args: &[(Option<String>, Value)]) -> Value {
    ordered(args, |o| o != std::cmp::Ordering::Greater)
}

fn any(args: &[(Option<String>, Value)]) -> Value {
    Value::Bool(values(args).iter().any(|v| v.is_truthy()))
}

fn all(args: &[(Option<String>, Value)]) -> Value {
    Value::Bool(values(args).iter().all(|v| v.is_truthy()))
}

fn length(args: &[(Option<String>, Value)]) -> Value {
    match values(args).first() {
        Some(Value::String(s)) => Value::Number(Decimal::from(s.chars().count() as u64)),
        Some(Value::List(items)) => Value::Number(Decimal::from(items.len() as u64)),
        Some(Value::Object(map)) => Value::Number(Decimal::from(map.len() as u64)),
        _ => Value::Null,
    }
}

fn upper(args: &[(Option<String>, Value)]) -> Value {
    match values(args).first() {
        Some(v) => Value::String(v.to_text().to_uppercase()),
        None => Value::Null,
    }
}

fn lower(args: &[(Option<String>, Value)]) -> Value {
    match values(args).first() {
        Some(v) => Value::String(v.to_text().to_lowercase()),
        None => Value::Null,
    }
}

fn join(args: &[(Option<String>, Value)]) -> Value {
    let vs = values(args);
    let Some(first) = vs.first() else {
        return Value::Null;
    };
    let separator = vs.get(1).map(|v| v.to_text()).unwrap_or_default();
    let parts: Vec<String> = first.to_list().iter().map(|v| v.to_text()).collect();
    Value::String(parts.join(&separator))
}

/// The first argument, unless it is null, in which case the second.
fn default_value(args: &[(Option<String>, Value)]) -> Value {
    let vs = values(args);
    match vs.first() {
        Some(Value::Null) | None => vs.get(1).cloned().cloned().unwrap_or(Value::Null),
        Some(v) => (*v).clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(vals: &[Value]) -> Vec<(Option<String>, Value)> {
        vals.iter().map(|v| (None, v.clone())).collect()
    }

    #[test]
    fn test_sum_and_difference() {
        assert_eq!(sum(&pos(&[Value::from(2), Value::from(3)])), Value::from(5));
        assert_eq!(
            difference(&pos(&[Value::from(10), Value::from(4)])),
            Value::from(6)
        );
    }

    #[test]
    fn test_sum_coerces_numeric_strings() {
        assert_eq!(
            sum(&pos(&[Value::from("2"), Value::from(3)])),
            Value::from(5)
        );
    }

    #[test]
    fn test_sum_of_non_number_is_null() {
        assert_eq!(
            sum(&pos(&[Value::from(1), Value::from("two")])),
            Value::Null
        );
    }

    #[test]
    fn test_arithmetic_overflow_is_null() {
        let max = Value::Number(Decimal::MAX);
        assert_eq!(sum(&pos(&[max.clone(), max.clone()])), Value::Null);
        assert_eq!(
            difference(&pos(&[Value::Number(Decimal::MIN), max.clone()])),
            Value::Null
        );
        assert_eq!(product(&pos(&[max.clone(), max])), Value::Null);
    }

    #[test]
    fn test_ratio_by_zero_is_null() {
        assert_eq!(
            ratio(&pos(&[Value::from(1), Value::from(0)])),
            Value::Null
        );
    }

    #[test]
    fn test_int_ratio_truncates() {
        assert_eq!(
            int_ratio(&pos(&[Value::from(7), Value::from(2)])),
            Value::from(3)
        );
    }

    #[test]
    fn test_concat_renders_all_arguments() {
        assert_eq!(
            concat(&pos(&[Value::from("x"), Value::from(1), Value::from("y")])),
            Value::from("x1y")
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(
            greater(&pos(&[Value::from(3), Value::from(2)])),
            Value::from(true)
        );
        assert_eq!(
            less_equals(&pos(&[Value::from(2), Value::from(2)])),
            Value::from(true)
        );
        // Non-numeric sides fall back to text ordering.
        assert_eq!(
            less(&pos(&[Value::from("apple"), Value::from("banana")])),
            Value::from(true)
        );
    }

    #[test]
    fn test_raw_wraps_without_escaping() {
        match raw(&pos(&[Value::from("<b>")])) {
            Value::Html(h) => assert_eq!(h.as_str(), "<b>"),
            other => panic!("expected html, got {:?}", other),
        }
    }

    #[test]
    fn test_join() {
        let list = Value::List(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(
            join(&pos(&[list, Value::from(", ")])),
            Value::from("a, b")
        );
    }

    #[test]
    fn test_default() {
        assert_eq!(
            default_value(&pos(&[Value::Null, Value::from("fallback")])),
            Value::from("fallback")
        );
        assert_eq!(
            default_value(&pos(&[Value::from("set"), Value::from("fallback")])),
            Value::from("set")
        );
    }
}
