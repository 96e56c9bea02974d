/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template AST types.
//!
//! The parser produces a [`Template`]: a body statement, an optional
//! parent template (for `{% extends %}` inheritance), and the block
//! table captured during the parse.

use hashlink::LinkedHashMap;
use rust_decimal::Decimal;

use crate::html::Html;

/// A statement in a template body.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Statement {
    /// The empty statement. Never appears inside [`Statement::Multi`].
    #[default]
    Null,

    /// A sequence of statements, evaluated left to right.
    Multi(Vec<Statement>),

    /// Raw HTML captured verbatim from between tags.
    Literal(Html),

    /// `{{ expr }}`
    Interpolation(Expression),

    /// `{% if %}` / `{% elif %}` / `{% else %}` — elif chains desugar
    /// into nested conditionals in the else position.
    If(Expression, Box<Statement>, Option<Box<Statement>>),

    /// `{% for %}` iteration. With two loop variables the first
    /// receives the key/index and the second the value.
    For {
        value_var: String,
        index_var: Option<String>,
        iteree: Expression,
        body: Box<Statement>,
    },

    /// `{% set name = expr %}`
    SetVar(String, Expression),

    /// `{% macro name(args) %}…{% endmacro %}`
    DefMacro(String, Box<Macro>),

    /// Reference to a named block; the body lives in the template's
    /// block table.
    BlockRef(String),

    /// A body evaluated in a fresh scope that is discarded on exit.
    Scoped(Box<Statement>),

    /// An include whose target was parsed at parse time.
    PreprocessedInclude(Box<Template>),
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    StringLit(String),
    NumberLit(Decimal),
    BoolLit(bool),
    NullLit,

    /// Scope lookup by name.
    Var(String),

    List(Vec<Expression>),

    /// Object literal; keys are arbitrary expressions converted to
    /// text at evaluation time.
    Object(Vec<(Expression, Expression)>),

    /// `base[index]`; dot access `a.b` sugars to `a["b"]`.
    MemberLookup(Box<Expression>, Box<Expression>),

    /// A call with positional and named arguments in source order.
    Call(Box<Expression>, Vec<(Option<String>, Expression)>),

    /// `(a, b) -> expr`
    Lambda(Vec<String>, Box<Expression>),
}

/// A named, parameterized statement body, callable as a function.
#[derive(Debug, Clone, PartialEq)]
pub struct Macro {
    /// Parameter names, bound positionally at the call site.
    pub args: Vec<String>,
    /// The macro body.
    pub body: Statement,
}

/// A named section that a derived template can override.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// The block body.
    pub body: Statement,
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// The template body. [`Statement::Null`] for derived templates,
    /// whose content lives entirely in `blocks`.
    pub body: Statement,

    /// The parent template, when this one starts with `{% extends %}`.
    pub parent: Option<Box<Template>>,

    /// Blocks defined in this template. A name defined twice keeps the
    /// later definition.
    pub blocks: LinkedHashMap<String, Block>,
}

impl Statement {
    /// Collapse a parsed statement sequence: empty → `Null`, a single
    /// statement → itself, otherwise `Multi`. `Null` children are
    /// assumed to have been filtered by the parser.
    pub(crate) fn multi(mut stmts: Vec<Statement>) -> Statement {
        match stmts.len() {
            0 => Statement::Null,
            1 => stmts.swap_remove(0),
            _ => Statement::Multi(stmts),
        }
    }
}
