/*
 * evaluator.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template evaluation engine.
//!
//! The evaluator walks a [`Template`]'s statement tree, maintaining a
//! stack of scope frames over the host's variable lookup, and emits
//! HTML through the host context. Evaluation is strictly left-to-right
//! and depth-first, and it never fails: missing variables, missing
//! members, and calls of non-functions all produce null, so a render
//! always runs to completion.
//!
//! Derived templates render by overlaying block tables child-first
//! along the `extends` chain and evaluating the root ancestor's body;
//! block references then resolve against the overlay.

use std::collections::HashMap;

use hashlink::LinkedHashMap;

use crate::ast::{Expression, Macro, Statement, Template};
use crate::builtins;
use crate::context::{BufferContext, CaptureContext, RenderContext};
use crate::html::Html;
use crate::value::{CallArgs, Callable, Function, Value};

impl Template {
    /// Render this template, emitting HTML through the context.
    pub fn render(&self, ctx: &mut dyn RenderContext) {
        Evaluator::new().eval_template(self, ctx);
    }

    /// Render this template against a pure lookup function, returning
    /// the accumulated HTML.
    pub fn render_to_html<F>(&self, lookup: F) -> Html
    where
        F: FnMut(&str) -> Value,
    {
        let mut ctx = BufferContext::new(lookup);
        self.render(&mut ctx);
        ctx.into_html()
    }
}

/// One render's state: the scope stack and the effective block table.
pub(crate) struct Evaluator<'t> {
    scopes: Vec<HashMap<String, Value>>,
    blocks: HashMap<&'t str, &'t crate::ast::Block>,
}

impl<'t> Evaluator<'t> {
    /// A fresh evaluator; the root frame carries the builtins.
    pub(crate) fn new() -> Self {
        let mut root = HashMap::new();
        builtins::install(&mut root);
        Evaluator {
            scopes: vec![root],
            blocks: HashMap::new(),
        }
    }

    /// An evaluator over a captured scope stack (macro and lambda
    /// invocation).
    fn from_scopes(scopes: Vec<HashMap<String, Value>>) -> Self {
        Evaluator {
            scopes,
            blocks: HashMap::new(),
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn set_local(&mut self, name: String, value: Value) {
        if let Some(frame) = self.scopes.last_mut() {
            frame.insert(name, value);
        }
    }

    fn has_local(&self, name: &str) -> bool {
        self.scopes.last().is_some_and(|frame| frame.contains_key(name))
    }

    fn get_var(&self, name: &str) -> Option<Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|frame| frame.get(name).cloned())
    }

    /// Render a template: overlay the block tables along the `extends`
    /// chain (most-derived definition wins) and evaluate the root
    /// ancestor's body. Includes come through here as well, with their
    /// own chains; the enclosing block table is restored afterwards.
    pub(crate) fn eval_template(&mut self, template: &'t Template, ctx: &mut dyn RenderContext) {
        let saved = std::mem::take(&mut self.blocks);
        let mut current = template;
        loop {
            for (name, block) in &current.blocks {
                self.blocks.entry(name.as_str()).or_insert(block);
            }
            match &current.parent {
                Some(parent) => current = parent.as_ref(),
                None => break,
            }
        }
        if template.parent.is_some() {
            tracing::trace!(blocks = self.blocks.len(), "rendering inheritance chain");
        }
        self.eval_statement(&current.body, ctx);
        self.blocks = saved;
    }

    fn eval_statement(&mut self, stmt: &'t Statement, ctx: &mut dyn RenderContext) {
        match stmt {
            Statement::Null => {}

            Statement::Multi(stmts) => {
                for s in stmts {
                    self.eval_statement(s, ctx);
                }
            }

            Statement::Literal(html) => ctx.write_html(html.clone()),

            Statement::Interpolation(expr) => {
                let value = self.eval_expression(expr, ctx);
                ctx.write_html(value.to_html());
            }

            Statement::If(cond, then_branch, else_branch) => {
                if self.eval_expression(cond, ctx).is_truthy() {
                    self.eval_statement(then_branch, ctx);
                } else if let Some(else_branch) = else_branch {
                    self.eval_statement(else_branch, ctx);
                }
            }

            Statement::For {
                value_var,
                index_var,
                iteree,
                body,
            } => {
                let subject = self.eval_expression(iteree, ctx);
                let keys = subject.iter_keys();
                let values = subject.to_list();
                for (key, value) in keys.into_iter().zip(values) {
                    self.push_scope();
                    self.set_local(value_var.clone(), value);
                    if let Some(index_var) = index_var {
                        self.set_local(index_var.clone(), key);
                    }
                    self.eval_statement(body, ctx);
                    self.pop_scope();
                }
            }

            Statement::SetVar(name, expr) => {
                let value = self.eval_expression(expr, ctx);
                self.set_local(name.clone(), value);
            }

            Statement::DefMacro(name, definition) => {
                let function = Function::new(MacroFunction {
                    definition: definition.clone(),
                    captured: self.scopes.clone(),
                });
                self.set_local(name.clone(), Value::Function(function));
            }

            Statement::BlockRef(name) => {
                if let Some(block) = self.blocks.get(name.as_str()).copied() {
                    self.eval_statement(&block.body, ctx);
                }
            }

            Statement::Scoped(body) => {
                self.push_scope();
                self.eval_statement(body, ctx);
                self.pop_scope();
            }

            Statement::PreprocessedInclude(template) => self.eval_template(template, ctx),
        }
    }

    fn eval_expression(&mut self, expr: &Expression, ctx: &mut dyn RenderContext) -> Value {
        match expr {
            Expression::StringLit(s) => Value::String(s.clone()),
            Expression::NumberLit(n) => Value::Number(*n),
            Expression::BoolLit(b) => Value::Bool(*b),
            Expression::NullLit => Value::Null,

            Expression::Var(name) => self
                .get_var(name)
                .unwrap_or_else(|| ctx.lookup(name)),

            Expression::List(items) => Value::List(
                items
                    .iter()
                    .map(|item| self.eval_expression(item, ctx))
                    .collect(),
            ),

            Expression::Object(pairs) => {
                let mut map = LinkedHashMap::new();
                for (key_expr, value_expr) in pairs {
                    let key = self.eval_expression(key_expr, ctx).to_text();
                    let value = self.eval_expression(value_expr, ctx);
                    map.insert(key, value);
                }
                Value::Object(map)
            }

            Expression::MemberLookup(base, index) => {
                let base = self.eval_expression(base, ctx);
                let index = self.eval_expression(index, ctx);
                base.get(&index).cloned().unwrap_or(Value::Null)
            }

            Expression::Call(callee, args) => {
                let callee = self.eval_expression(callee, ctx);
                let args: CallArgs = args
                    .iter()
                    .map(|(name, arg)| (name.clone(), self.eval_expression(arg, ctx)))
                    .collect();
                match callee.as_function() {
                    Some(function) => {
                        let function = function.clone();
                        // Free variables in a function body see the
                        // call site's scope after the closure's own
                        // captures; this is what lets a macro body
                        // reach `caller`.
                        let mut bridge = ScopeBridge {
                            scopes: &self.scopes,
                            inner: ctx,
                        };
                        function.call(&mut bridge, args)
                    }
                    None => Value::Null,
                }
            }

            Expression::Lambda(params, body) => Value::Function(Function::new(LambdaFunction {
                params: params.clone(),
                body: (**body).clone(),
                captured: self.scopes.clone(),
            })),
        }
    }
}

/// A context layered over the current scope stack: lookups consult the
/// scopes before the wrapped context, writes pass straight through.
struct ScopeBridge<'a> {
    scopes: &'a Vec<HashMap<String, Value>>,
    inner: &'a mut dyn RenderContext,
}

impl RenderContext for ScopeBridge<'_> {
    fn lookup(&mut self, name: &str) -> Value {
        for frame in self.scopes.iter().rev() {
            if let Some(value) = frame.get(name) {
                return value.clone();
            }
        }
        self.inner.lookup(name)
    }

    fn write_html(&mut self, html: Html) {
        self.inner.write_html(html);
    }
}

/// A macro value: the definition plus the scope stack captured where
/// it was defined. Invocation renders the body into a capture buffer
/// and returns it as an Html value.
struct MacroFunction {
    definition: Box<Macro>,
    captured: Vec<HashMap<String, Value>>,
}

impl Callable for MacroFunction {
    fn call(&self, ctx: &mut dyn RenderContext, args: CallArgs) -> Value {
        let mut evaluator = Evaluator::from_scopes(self.captured.clone());
        evaluator.push_scope();
        bind_params(&mut evaluator, &self.definition.args, args);
        let mut capture = CaptureContext::new(ctx);
        evaluator.eval_statement(&self.definition.body, &mut capture);
        Value::Html(capture.into_html())
    }
}

/// A lambda value: parameters, body expression, captured scopes.
struct LambdaFunction {
    params: Vec<String>,
    body: Expression,
    captured: Vec<HashMap<String, Value>>,
}

impl Callable for LambdaFunction {
    fn call(&self, ctx: &mut dyn RenderContext, args: CallArgs) -> Value {
        let mut evaluator = Evaluator::from_scopes(self.captured.clone());
        evaluator.push_scope();
        bind_params(&mut evaluator, &self.params, args);
        evaluator.eval_expression(&self.body, ctx)
    }
}

/// Bind call arguments into the evaluator's innermost frame: named
/// arguments by name, then positional arguments filling the remaining
/// parameters in order. Missing parameters bind null; surplus
/// positional arguments are dropped.
fn bind_params(evaluator: &mut Evaluator, params: &[String], args: CallArgs) {
    let mut positional = Vec::new();
    for (name, value) in args {
        match name {
            Some(name) => evaluator.set_local(name, value),
            None => positional.push(value),
        }
    }
    let mut positional = positional.into_iter();
    for param in params {
        if !evaluator.has_local(param) {
            evaluator.set_local(param.clone(), positional.next().unwrap_or(Value::Null));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{MemoryResolver, NullResolver};

    fn render(source: &str) -> String {
        render_with(source, |_| Value::Null)
    }

    fn render_with(source: &str, lookup: impl FnMut(&str) -> Value) -> String {
        let template = Template::compile(source, &NullResolver).expect("template should parse");
        template.render_to_html(lookup).into_string()
    }

    fn list(items: &[i64]) -> Value {
        Value::List(items.iter().map(|n| Value::from(*n)).collect())
    }

    #[test]
    fn test_literal_text() {
        assert_eq!(render("Hello, world!"), "Hello, world!");
    }

    #[test]
    fn test_interpolation_from_lookup() {
        let out = render_with("Hello, {{ name }}!", |name| {
            if name == "name" {
                Value::from("world")
            } else {
                Value::Null
            }
        });
        assert_eq!(out, "Hello, world!");
    }

    #[test]
    fn test_interpolation_escapes() {
        let out = render_with("{{ x }}", |_| Value::from("<script>"));
        assert_eq!(out, "&lt;script&gt;");
    }

    #[test]
    fn test_raw_builtin_skips_escaping() {
        let out = render_with("{{ raw(x) }}", |_| Value::from("<b>hi</b>"));
        assert_eq!(out, "<b>hi</b>");
    }

    #[test]
    fn test_missing_variable_renders_empty() {
        assert_eq!(render("[{{ nothing }}]"), "[]");
    }

    #[test]
    fn test_if_else() {
        let out = render_with("{% if flag %}yes{% else %}no{% endif %}", |_| {
            Value::from(true)
        });
        assert_eq!(out, "yes");
        let out = render_with("{% if flag %}yes{% else %}no{% endif %}", |_| {
            Value::from(false)
        });
        assert_eq!(out, "no");
    }

    #[test]
    fn test_elif_chain() {
        let template = "{% if n > 0 %}pos{% elif n == 0 %}zero{% else %}neg{% endif %}";
        assert_eq!(render_with(template, |_| Value::from(7)), "pos");
        assert_eq!(render_with(template, |_| Value::from(0)), "zero");
        assert_eq!(render_with(template, |_| Value::from(-5)), "neg");
    }

    #[test]
    fn test_for_preserves_order() {
        let out = render_with("{% for x in xs %}[{{ x }}]{% endfor %}", |_| {
            list(&[1, 2, 3])
        });
        assert_eq!(out, "[1][2][3]");
    }

    #[test]
    fn test_indexed_for() {
        let out = render_with("{% for i, x in xs %}{{ i }}:{{ x }},{% endfor %}", |_| {
            list(&[10, 20])
        });
        assert_eq!(out, "0:10,1:20,");
    }

    #[test]
    fn test_for_over_object_binds_keys() {
        let out = render_with("{% for k, v in m %}{{ k }}={{ v }};{% endfor %}", |_| {
            let mut map = LinkedHashMap::new();
            map.insert("a".to_string(), Value::from(1));
            map.insert("b".to_string(), Value::from(2));
            Value::Object(map)
        });
        assert_eq!(out, "a=1;b=2;");
    }

    #[test]
    fn test_for_binding_does_not_leak() {
        let out = render_with("{% for x in xs %}{% endfor %}[{{ x }}]", |name| {
            if name == "xs" {
                list(&[1])
            } else {
                Value::Null
            }
        });
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_set() {
        assert_eq!(render("{% set x = 2 + 3 %}{{ x }}"), "5");
    }

    #[test]
    fn test_set_shadows_host_lookup() {
        let out = render_with("{{ x }}/{% set x = \"local\" %}{{ x }}", |_| {
            Value::from("host")
        });
        assert_eq!(out, "host/local");
    }

    #[test]
    fn test_scope_discards_bindings() {
        assert_eq!(
            render("{% scope %}{% set x = 1 %}{{ x }}{% endscope %}[{{ x }}]"),
            "1[]"
        );
    }

    #[test]
    fn test_macro_definition_and_call() {
        let out = render(
            "{% macro greet(name) %}Hi {{ name }}!{% endmacro %}{{ greet(\"Bob\") }}",
        );
        assert_eq!(out, "Hi Bob!");
    }

    #[test]
    fn test_macro_named_arguments() {
        let out = render(
            "{% macro pair(a, b) %}{{ a }}-{{ b }}{% endmacro %}{{ pair(b=2, a=1) }}",
        );
        assert_eq!(out, "1-2");
    }

    #[test]
    fn test_macro_missing_argument_is_null() {
        let out = render("{% macro show(x) %}[{{ x }}]{% endmacro %}{{ show() }}");
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_macro_output_is_not_reescaped() {
        let out = render("{% macro tag() %}<b>x</b>{% endmacro %}{{ tag() }}");
        assert_eq!(out, "<b>x</b>");
    }

    #[test]
    fn test_call_block_binds_caller() {
        let out = render(
            "{% macro wrap() %}({{ caller(5) }}){% endmacro %}\
             {% call (n) wrap() %}n={{ n }}{% endcall %}",
        );
        assert_eq!(out, "(n=5)");
    }

    #[test]
    fn test_lambda_call() {
        assert_eq!(render("{{ ((a, b) -> a + b)(2, 3) }}"), "5");
    }

    #[test]
    fn test_lambda_captures_scope() {
        assert_eq!(
            render("{% set base = 10 %}{% set f = (n) -> base + n %}{{ f(5) }}"),
            "15"
        );
    }

    #[test]
    fn test_filter_application() {
        let out = render_with("{{ xs | join(\", \") }}", |_| list(&[1, 2, 3]));
        assert_eq!(out, "1, 2, 3");
    }

    #[test]
    fn test_calling_non_function_is_null() {
        assert_eq!(render("[{{ 5(1) }}]"), "[]");
    }

    #[test]
    fn test_member_lookup_missing_is_null() {
        assert_eq!(render("[{{ {\"a\": 1}.b }}]"), "[]");
    }

    #[test]
    fn test_object_duplicate_keys_overwrite() {
        assert_eq!(render("{{ {\"k\": 1, \"k\": 2}.k }}"), "2");
    }

    #[test]
    fn test_concat_operator() {
        assert_eq!(render("{{ \"x\" ~ 1 ~ \"y\" }}"), "x1y");
    }

    #[test]
    fn test_include_renders_inline() {
        let resolver = MemoryResolver::with_sources([("footer.html", "-- {{ who }} --")]);
        let template = Template::compile("body{% include \"footer.html\" %}", &resolver).unwrap();
        let out = template
            .render_to_html(|_| Value::from("me"))
            .into_string();
        assert_eq!(out, "body-- me --");
    }

    #[test]
    fn test_inheritance_overrides_block() {
        let resolver = MemoryResolver::with_sources([(
            "base.html",
            "<title>{% block title %}default{% endblock %}</title>",
        )]);
        let template = Template::compile(
            "{% extends \"base.html\" %}{% block title %}custom{% endblock %}",
            &resolver,
        )
        .unwrap();
        let out = template.render_to_html(|_| Value::Null).into_string();
        assert_eq!(out, "<title>custom</title>");
    }

    #[test]
    fn test_inheritance_keeps_unoverridden_blocks() {
        let resolver = MemoryResolver::with_sources([(
            "base.html",
            "{% block a %}A{% endblock %}{% block b %}B{% endblock %}",
        )]);
        let template = Template::compile(
            "{% extends \"base.html\" %}{% block b %}beta{% endblock %}",
            &resolver,
        )
        .unwrap();
        let out = template.render_to_html(|_| Value::Null).into_string();
        assert_eq!(out, "Abeta");
    }

    #[test]
    fn test_two_level_inheritance() {
        let resolver = MemoryResolver::with_sources([
            ("root.html", "[{% block x %}root{% endblock %}]"),
            (
                "mid.html",
                "{% extends \"root.html\" %}{% block x %}mid{% endblock %}",
            ),
        ]);
        let template = Template::compile("{% extends \"mid.html\" %}", &resolver).unwrap();
        let out = template.render_to_html(|_| Value::Null).into_string();
        assert_eq!(out, "[mid]");
    }
}
