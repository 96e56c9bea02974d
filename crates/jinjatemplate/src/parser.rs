/*
 * parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template parser.
//!
//! A hand-written recursive-descent parser over the template source.
//! The cursor is copyable, so alternatives are tried by saving and
//! restoring it; backtracking is cheap and local.
//!
//! Two delimiter families mark tags within literal HTML text:
//! `{% … %}` statements (with whitespace-trimming variants `{%- … -%}`)
//! and `{# … #}` comments (`{#- … -#}`), plus `{{ … }}` interpolations.
//! A trim-open tag removes the whitespace that precedes it; a trim
//! close removes the whitespace that follows; a plain statement or
//! comment close swallows exactly one trailing newline.
//!
//! Includes and `extends` re-enter the parser through the resolver; a
//! stack of source names guards against include cycles.

use hashlink::LinkedHashMap;
use rust_decimal::Decimal;

use crate::ast::{Block, Expression, Macro, Statement, Template};
use crate::error::{TemplateError, TemplateResult};
use crate::html::Html;
use crate::resolver::{resolve_relative, SourceResolver};

/// Keywords that close an enclosing construct. A statement sequence
/// stops (without consuming) when one of these opens a tag.
const TERMINATORS: &[&str] = &[
    "elif", "else", "endif", "endfor", "endmacro", "endblock", "endcall", "endscope",
];

/// Binary operators per precedence level, lowest first. Each operator
/// desugars to a call of the named builtin. Within a level, operators
/// are matched in table order, so `//` is tried before `/`.
const BOOLEAN_OPS: &[(&str, &str)] = &[("||", "any"), ("&&", "all")];
const BOOLEAN_OP_CHARS: &str = "|&";

const COMPARATIVE_OPS: &[(&str, &str)] = &[
    ("==", "equals"),
    ("!=", "nequals"),
    (">=", "greaterEquals"),
    ("<=", "lessEquals"),
    (">", "greater"),
    ("<", "less"),
];
const COMPARATIVE_OP_CHARS: &str = "=!<>";

const ADDITIVE_OPS: &[(&str, &str)] = &[("+", "sum"), ("-", "difference"), ("~", "concat")];
const ADDITIVE_OP_CHARS: &str = "+-~";

const MULTIPLICATIVE_OPS: &[(&str, &str)] = &[
    ("//", "int_ratio"),
    ("*", "product"),
    ("/", "ratio"),
    ("%", "modulo"),
];
const MULTIPLICATIVE_OP_CHARS: &str = "*/%";

/// A position in the source. Copy semantics give save/restore
/// backtracking.
#[derive(Debug, Clone, Copy)]
struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Cursor { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn bump(&mut self, bytes: usize) {
        self.pos += bytes;
    }

    /// Consume `s` if the input starts with it.
    fn eat(&mut self, s: &str) -> bool {
        if self.starts_with(s) {
            self.bump(s.len());
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump(c.len_utf8());
            } else {
                break;
            }
        }
    }

    /// Consume at most one trailing newline (the plain-close rule).
    fn eat_one_newline(&mut self) {
        if !self.eat("\r\n") {
            self.eat("\n");
        }
    }

    /// An identifier: `[A-Za-z_][A-Za-z_0-9]*`.
    fn ident(&mut self) -> Option<String> {
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return None,
        }
        let len = self
            .rest()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .count();
        let ident = self.rest()[..len].to_string();
        self.bump(len);
        Some(ident)
    }
}

/// 1-based line and column of a byte offset.
fn line_col(src: &str, pos: usize) -> (usize, usize) {
    let before = &src[..pos];
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().unwrap_or("").chars().count() + 1;
    (line, column)
}

/// Remove trailing whitespace from the last literal of a statement
/// sequence; this is how a trim-open tag consumes the whitespace that
/// precedes it.
fn trim_trailing_literal(stmts: &mut Vec<Statement>) {
    if let Some(Statement::Literal(h)) = stmts.last_mut() {
        let trimmed = h.as_str().trim_end();
        if trimmed.is_empty() {
            stmts.pop();
        } else {
            *h = Html::from_raw(trimmed.to_string());
        }
    }
}

/// Parser state for one template source.
///
/// The block table accumulates `{% block %}` definitions seen anywhere
/// in this source; includes parse in a child `Parser` with its own
/// table.
struct Parser<'a, 'r> {
    cur: Cursor<'a>,
    source_name: Option<String>,
    resolver: &'r dyn SourceResolver,
    include_stack: Vec<String>,
    blocks: LinkedHashMap<String, Block>,
}

impl Template {
    /// Compile a template from source text.
    pub fn compile(source: &str, resolver: &dyn SourceResolver) -> TemplateResult<Template> {
        parse_source(source, None, resolver)
    }

    /// Compile a template from source text with a source name.
    ///
    /// The name tags parse errors and anchors relative include paths.
    pub fn compile_with_name(
        source: &str,
        name: &str,
        resolver: &dyn SourceResolver,
    ) -> TemplateResult<Template> {
        parse_source(source, Some(name.to_string()), resolver)
    }

    /// Load a named template through the resolver and compile it.
    pub fn compile_from_file(name: &str, resolver: &dyn SourceResolver) -> TemplateResult<Template> {
        let source = resolver
            .load(name)
            .ok_or_else(|| TemplateError::SourceNotFound {
                name: name.to_string(),
            })?;
        parse_source(&source, Some(name.to_string()), resolver)
    }
}

fn parse_source(
    source: &str,
    source_name: Option<String>,
    resolver: &dyn SourceResolver,
) -> TemplateResult<Template> {
    tracing::debug!(source = ?source_name, bytes = source.len(), "compiling template");
    let include_stack = source_name.iter().cloned().collect();
    let mut parser = Parser {
        cur: Cursor::new(source),
        source_name,
        resolver,
        include_stack,
        blocks: LinkedHashMap::new(),
    };
    parser.parse_template()
}

impl<'a> Parser<'a, '_> {
    // ---- errors ------------------------------------------------------

    fn err_at(&self, pos: usize, message: String) -> TemplateError {
        let (line, column) = line_col(self.cur.src, pos);
        TemplateError::Parse {
            message,
            source_name: self.source_name.clone(),
            line: Some(line),
            column: Some(column),
        }
    }

    fn unexpected(&self, expecting: &str) -> TemplateError {
        let token: String = self
            .cur
            .rest()
            .chars()
            .skip_while(|c| c.is_whitespace())
            .take_while(|c| !c.is_whitespace())
            .take(12)
            .collect();
        let found = if token.is_empty() {
            "end of input".to_string()
        } else {
            format!("{:?}", token)
        };
        self.err_at(
            self.cur.pos,
            format!("unexpected {}, expecting {}", found, expecting),
        )
    }

    // ---- tags --------------------------------------------------------

    /// Consume a statement tag open, applying trim-open to the
    /// preceding literal. The caller has checked that a tag starts
    /// here.
    fn open_statement_tag(&mut self, prev: &mut Vec<Statement>) {
        if self.cur.eat("{%-") {
            trim_trailing_literal(prev);
        } else {
            self.cur.eat("{%");
        }
        self.cur.skip_ws();
    }

    /// Consume a statement tag close: `-%}` also swallows following
    /// whitespace, `%}` swallows one optional newline.
    fn close_statement_tag(&mut self) -> TemplateResult<()> {
        self.cur.skip_ws();
        if self.cur.eat("-%}") {
            self.cur.skip_ws();
            Ok(())
        } else if self.cur.eat("%}") {
            self.cur.eat_one_newline();
            Ok(())
        } else {
            Err(self.unexpected("\"%}\""))
        }
    }

    /// Look ahead at a statement tag's keyword without consuming.
    /// Returns the keyword and whether the tag is a trim-open.
    fn peek_statement_keyword(&self) -> Option<(String, bool)> {
        let mut probe = self.cur;
        let trim = if probe.eat("{%-") {
            true
        } else if probe.eat("{%") {
            false
        } else {
            return None;
        };
        probe.skip_ws();
        probe.ident().map(|kw| (kw, trim))
    }

    // ---- templates ---------------------------------------------------

    fn parse_template(&mut self) -> TemplateResult<Template> {
        let save = self.cur;
        self.cur.skip_ws();
        if matches!(self.peek_statement_keyword(), Some((kw, _)) if kw == "extends") {
            return self.parse_derived_template();
        }
        self.cur = save;

        let body = self.parse_statements()?;
        if let Some((kw, _)) = self.peek_statement_keyword() {
            return Err(self.err_at(self.cur.pos, format!("unexpected \"{}\"", kw)));
        }
        Ok(Template {
            body,
            parent: None,
            blocks: std::mem::take(&mut self.blocks),
        })
    }

    /// A derived template: `{% extends "name" %}` followed only by
    /// block definitions. Its content lives in the block table; the
    /// body stays empty.
    fn parse_derived_template(&mut self) -> TemplateResult<Template> {
        let mut ignored = Vec::new();
        self.open_statement_tag(&mut ignored);
        let _ = self.cur.ident(); // "extends"
        self.cur.skip_ws();
        if !matches!(self.cur.peek(), Some('"') | Some('\'')) {
            return Err(self.unexpected("parent template name string"));
        }
        let parent_pos = self.cur.pos;
        let parent_name = self.parse_string()?;
        self.close_statement_tag()?;
        let parent = self.load_and_parse(&parent_name, parent_pos)?;

        loop {
            let save = self.cur;
            self.cur.skip_ws();
            if !matches!(self.peek_statement_keyword(), Some((kw, _)) if kw == "block") {
                self.cur = save;
                break;
            }
            self.open_statement_tag(&mut ignored);
            let _ = self.cur.ident(); // "block"
            self.parse_block_def()?;
        }

        self.cur.skip_ws();
        if !self.cur.at_end() {
            return Err(self.unexpected("\"{% block %}\" or end of input"));
        }
        Ok(Template {
            body: Statement::Null,
            parent: Some(Box::new(parent)),
            blocks: std::mem::take(&mut self.blocks),
        })
    }

    /// Resolve `name` against the current source's directory, load it,
    /// and parse it as a child template.
    fn load_and_parse(&mut self, name: &str, site_pos: usize) -> TemplateResult<Template> {
        let target = resolve_relative(self.source_name.as_deref(), name);
        tracing::trace!(name = %target, "resolving template source");
        if self.include_stack.iter().any(|n| n == &target) {
            return Err(TemplateError::RecursiveInclude { name: target });
        }
        let source =
            self.resolver
                .load(&target)
                .ok_or_else(|| TemplateError::SourceNotFound {
                    name: target.clone(),
                })?;
        let mut include_stack = self.include_stack.clone();
        include_stack.push(target.clone());
        let mut child = Parser {
            cur: Cursor::new(&source),
            source_name: Some(target.clone()),
            resolver: self.resolver,
            include_stack,
            blocks: LinkedHashMap::new(),
        };
        child.parse_template().map_err(|err| match err {
            cyclic @ TemplateError::RecursiveInclude { .. } => cyclic,
            other => self.err_at(site_pos, format!("in template \"{}\": {}", target, other)),
        })
    }

    // ---- statements --------------------------------------------------

    /// Parse statements until end of input or a terminator keyword.
    /// The terminator tag is left unconsumed, but its trim-open flag is
    /// applied to the sequence's trailing literal.
    fn parse_statements(&mut self) -> TemplateResult<Statement> {
        let mut stmts = Vec::new();
        loop {
            if self.cur.at_end() {
                break;
            }
            if let Some((kw, trim)) = self.peek_statement_keyword() {
                if TERMINATORS.contains(&kw.as_str()) {
                    if trim {
                        trim_trailing_literal(&mut stmts);
                    }
                    break;
                }
            }
            let stmt = self.parse_statement(&mut stmts)?;
            if !matches!(stmt, Statement::Null) {
                stmts.push(stmt);
            }
        }
        Ok(Statement::multi(stmts))
    }

    fn parse_statement(&mut self, prev: &mut Vec<Statement>) -> TemplateResult<Statement> {
        if self.cur.starts_with("{{") {
            self.cur.bump(2);
            self.cur.skip_ws();
            let expr = self.parse_expression()?;
            self.cur.skip_ws();
            if !self.cur.eat("}}") {
                return Err(self.unexpected("\"}}\""));
            }
            return Ok(Statement::Interpolation(expr));
        }

        if self.cur.starts_with("{#") {
            return self.parse_comment(prev);
        }

        if self.cur.starts_with("{%") {
            self.open_statement_tag(prev);
            let kw_pos = self.cur.pos;
            let Some(kw) = self.cur.ident() else {
                return Err(self.unexpected("statement keyword"));
            };
            return match kw.as_str() {
                "if" => self.parse_if(),
                "set" => self.parse_set(),
                "for" => self.parse_for(),
                "include" => self.parse_include(kw_pos),
                "macro" => self.parse_macro(),
                "block" => self.parse_block_def(),
                "call" => self.parse_call_block(),
                "scope" => self.parse_scope_block(),
                "extends" => Err(self.err_at(
                    kw_pos,
                    "\"extends\" is only allowed as the first tag of a template".to_string(),
                )),
                other => Err(self.err_at(
                    kw_pos,
                    format!("unexpected \"{}\", expecting statement keyword", other),
                )),
            };
        }

        self.parse_literal()
    }

    /// The longest run of text containing none of `{{`, `{%`, `{#`.
    fn parse_literal(&mut self) -> TemplateResult<Statement> {
        let rest = self.cur.rest();
        let mut end = rest.len();
        let mut from = 0;
        while let Some(i) = rest[from..].find('{') {
            let at = from + i;
            let after = &rest[at..];
            if after.starts_with("{{") || after.starts_with("{%") || after.starts_with("{#") {
                end = at;
                break;
            }
            from = at + 1;
        }
        if end == 0 {
            return Err(self.unexpected("statement"));
        }
        let text = rest[..end].to_string();
        self.cur.bump(end);
        Ok(Statement::Literal(Html::from_raw(text)))
    }

    /// `{# … #}` — parses to nothing.
    fn parse_comment(&mut self, prev: &mut Vec<Statement>) -> TemplateResult<Statement> {
        if self.cur.eat("{#-") {
            trim_trailing_literal(prev);
        } else {
            self.cur.eat("{#");
        }
        let rest = self.cur.rest();
        let Some(i) = rest.find("#}") else {
            return Err(self.unexpected("\"#}\""));
        };
        let trim_close = i > 0 && rest.as_bytes()[i - 1] == b'-';
        self.cur.bump(i + 2);
        if trim_close {
            self.cur.skip_ws();
        } else {
            self.cur.eat_one_newline();
        }
        Ok(Statement::Null)
    }

    /// Consume the open tag of an expected closing keyword and return
    /// which of `expected` it was.
    fn expect_end_keyword(&mut self, expected: &[&str]) -> TemplateResult<String> {
        let describe = || {
            expected
                .iter()
                .map(|k| format!("\"{}\"", k))
                .collect::<Vec<_>>()
                .join(" or ")
        };
        if !self.cur.starts_with("{%") {
            return Err(self.unexpected(&describe()));
        }
        let mut ignored = Vec::new();
        self.open_statement_tag(&mut ignored);
        let kw_pos = self.cur.pos;
        let Some(kw) = self.cur.ident() else {
            return Err(self.unexpected(&describe()));
        };
        if expected.contains(&kw.as_str()) {
            Ok(kw)
        } else {
            Err(self.err_at(
                kw_pos,
                format!("unexpected \"{}\", expecting {}", kw, describe()),
            ))
        }
    }

    /// `{% if %}` with elif/else chain; elifs desugar into nested
    /// conditionals, sharing the single `endif`.
    fn parse_if(&mut self) -> TemplateResult<Statement> {
        self.cur.skip_ws();
        let cond = self.parse_expression()?;
        self.close_statement_tag()?;
        let then_branch = self.parse_statements()?;
        let kw = self.expect_end_keyword(&["elif", "else", "endif"])?;
        let else_branch = match kw.as_str() {
            "elif" => Some(Box::new(self.parse_if()?)),
            "else" => {
                self.close_statement_tag()?;
                let body = self.parse_statements()?;
                self.expect_end_keyword(&["endif"])?;
                self.close_statement_tag()?;
                Some(Box::new(body))
            }
            _ => {
                self.close_statement_tag()?;
                None
            }
        };
        Ok(Statement::If(cond, Box::new(then_branch), else_branch))
    }

    /// `{% set name = expr %}`
    fn parse_set(&mut self) -> TemplateResult<Statement> {
        self.cur.skip_ws();
        let Some(name) = self.cur.ident() else {
            return Err(self.unexpected("identifier"));
        };
        self.cur.skip_ws();
        if !self.cur.eat("=") {
            return Err(self.unexpected("\"=\""));
        }
        self.cur.skip_ws();
        let expr = self.parse_expression()?;
        self.close_statement_tag()?;
        Ok(Statement::SetVar(name, expr))
    }

    /// `{% for <iter> in <expr> %}` or `{% for <expr> as <iter> %}`,
    /// where `<iter>` is `value` or `index, value`.
    fn parse_for(&mut self) -> TemplateResult<Statement> {
        self.cur.skip_ws();
        let save = self.cur;

        if let Some(first) = self.cur.ident() {
            self.cur.skip_ws();
            if self.cur.eat(",") {
                self.cur.skip_ws();
                if let Some(second) = self.cur.ident() {
                    self.cur.skip_ws();
                    if self.eat_keyword("in") {
                        self.cur.skip_ws();
                        let iteree = self.parse_expression()?;
                        return self.finish_for(second, Some(first), iteree);
                    }
                }
            } else if self.eat_keyword("in") {
                self.cur.skip_ws();
                let iteree = self.parse_expression()?;
                return self.finish_for(first, None, iteree);
            }
        }

        self.cur = save;
        let iteree = self.parse_expression()?;
        self.cur.skip_ws();
        if !self.eat_keyword("as") {
            return Err(self.unexpected("\"in\" or \"as\""));
        }
        self.cur.skip_ws();
        let Some(first) = self.cur.ident() else {
            return Err(self.unexpected("loop variable"));
        };
        self.cur.skip_ws();
        let (value_var, index_var) = if self.cur.eat(",") {
            self.cur.skip_ws();
            let Some(second) = self.cur.ident() else {
                return Err(self.unexpected("loop variable"));
            };
            (second, Some(first))
        } else {
            (first, None)
        };
        self.finish_for(value_var, index_var, iteree)
    }

    fn finish_for(
        &mut self,
        value_var: String,
        index_var: Option<String>,
        iteree: Expression,
    ) -> TemplateResult<Statement> {
        self.close_statement_tag()?;
        let body = self.parse_statements()?;
        self.expect_end_keyword(&["endfor"])?;
        self.close_statement_tag()?;
        Ok(Statement::For {
            value_var,
            index_var,
            iteree,
            body: Box::new(body),
        })
    }

    /// `{% include "name" %}` — resolved and parsed right here.
    fn parse_include(&mut self, site_pos: usize) -> TemplateResult<Statement> {
        self.cur.skip_ws();
        if !matches!(self.cur.peek(), Some('"') | Some('\'')) {
            return Err(self.unexpected("template name string"));
        }
        let name = self.parse_string()?;
        self.close_statement_tag()?;
        let template = self.load_and_parse(&name, site_pos)?;
        Ok(Statement::PreprocessedInclude(Box::new(template)))
    }

    /// `{% macro name(args) %}…{% endmacro [name] %}`. A trailing name
    /// after `endmacro` is accepted and ignored.
    fn parse_macro(&mut self) -> TemplateResult<Statement> {
        self.cur.skip_ws();
        let Some(name) = self.cur.ident() else {
            return Err(self.unexpected("macro name"));
        };
        self.cur.skip_ws();
        if !self.cur.eat("(") {
            return Err(self.unexpected("\"(\""));
        }
        let args = self.parse_param_list()?;
        self.close_statement_tag()?;
        let body = self.parse_statements()?;
        self.expect_end_keyword(&["endmacro"])?;
        self.cur.skip_ws();
        let _ = self.cur.ident();
        self.close_statement_tag()?;
        Ok(Statement::DefMacro(name, Box::new(Macro { args, body })))
    }

    /// `{% block name %}…{% endblock [name] %}`. Registers the block
    /// in the parse state (later definitions replace earlier) and
    /// leaves a reference at the definition site.
    fn parse_block_def(&mut self) -> TemplateResult<Statement> {
        self.cur.skip_ws();
        let Some(name) = self.cur.ident() else {
            return Err(self.unexpected("block name"));
        };
        self.close_statement_tag()?;
        let body = self.parse_statements()?;
        self.expect_end_keyword(&["endblock"])?;
        self.cur.skip_ws();
        let _ = self.cur.ident();
        self.close_statement_tag()?;
        self.blocks.insert(name.clone(), Block { body });
        Ok(Statement::BlockRef(name))
    }

    /// `{% call (optArgs) expr %}…{% endcall %}` — sugar for defining
    /// a `caller` macro over the body and interpolating the callee.
    fn parse_call_block(&mut self) -> TemplateResult<Statement> {
        self.cur.skip_ws();
        let params = self.try_param_group().unwrap_or_default();
        self.cur.skip_ws();
        let callee = self.parse_expression()?;
        self.close_statement_tag()?;
        let body = self.parse_statements()?;
        self.expect_end_keyword(&["endcall"])?;
        self.close_statement_tag()?;
        Ok(Statement::Scoped(Box::new(Statement::Multi(vec![
            Statement::DefMacro("caller".to_string(), Box::new(Macro { args: params, body })),
            Statement::Interpolation(callee),
        ]))))
    }

    /// `{% scope %}…{% endscope %}`
    fn parse_scope_block(&mut self) -> TemplateResult<Statement> {
        self.close_statement_tag()?;
        let body = self.parse_statements()?;
        self.expect_end_keyword(&["endscope"])?;
        self.close_statement_tag()?;
        Ok(Statement::Scoped(Box::new(body)))
    }

    /// A parenthesized identifier list, backtracking entirely when the
    /// parens hold anything else.
    fn try_param_group(&mut self) -> Option<Vec<String>> {
        let save = self.cur;
        if !self.cur.eat("(") {
            return None;
        }
        self.cur.skip_ws();
        let mut params = Vec::new();
        if self.cur.eat(")") {
            return Some(params);
        }
        loop {
            self.cur.skip_ws();
            match self.cur.ident() {
                Some(p) => params.push(p),
                None => {
                    self.cur = save;
                    return None;
                }
            }
            self.cur.skip_ws();
            if self.cur.eat(",") {
                continue;
            }
            if self.cur.eat(")") {
                return Some(params);
            }
            self.cur = save;
            return None;
        }
    }

    /// An identifier list after a consumed `(`, through the `)`.
    fn parse_param_list(&mut self) -> TemplateResult<Vec<String>> {
        self.cur.skip_ws();
        let mut params = Vec::new();
        if self.cur.eat(")") {
            return Ok(params);
        }
        loop {
            self.cur.skip_ws();
            let Some(p) = self.cur.ident() else {
                return Err(self.unexpected("parameter name"));
            };
            params.push(p);
            self.cur.skip_ws();
            if self.cur.eat(",") {
                continue;
            }
            if self.cur.eat(")") {
                return Ok(params);
            }
            return Err(self.unexpected("\",\" or \")\""));
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        let save = self.cur;
        match self.cur.ident() {
            Some(id) if id == kw => true,
            _ => {
                self.cur = save;
                false
            }
        }
    }

    // ---- expressions -------------------------------------------------

    fn parse_expression(&mut self) -> TemplateResult<Expression> {
        if let Some(lambda) = self.try_parse_lambda()? {
            return Ok(lambda);
        }
        self.parse_boolean()
    }

    /// `(a, b) -> expr`. Tried first; when the parens do not lead to
    /// `) ->`, falls through to the operator grammar.
    fn try_parse_lambda(&mut self) -> TemplateResult<Option<Expression>> {
        if !self.cur.starts_with("(") {
            return Ok(None);
        }
        let save = self.cur;
        self.cur.bump(1);
        self.cur.skip_ws();
        let mut params = Vec::new();
        let mut closed = self.cur.eat(")");
        while !closed {
            self.cur.skip_ws();
            let Some(p) = self.cur.ident() else {
                break;
            };
            params.push(p);
            self.cur.skip_ws();
            if self.cur.eat(",") {
                continue;
            }
            if self.cur.eat(")") {
                closed = true;
            }
            break;
        }
        if closed {
            self.cur.skip_ws();
            if self.cur.eat("->") {
                self.cur.skip_ws();
                let body = self.parse_expression()?;
                return Ok(Some(Expression::Lambda(params, Box::new(body))));
            }
        }
        self.cur = save;
        Ok(None)
    }

    /// Match one operator of a precedence level. The character after
    /// the operator must not itself be an operator character of the
    /// level, so `==` never reads as two `=` and `//` never as two `/`.
    fn match_operator(&mut self, ops: &[(&str, &'static str)], op_chars: &str) -> Option<&'static str> {
        for (op, builtin) in ops.iter().copied() {
            if self.cur.starts_with(op) {
                if let Some(c) = self.cur.rest()[op.len()..].chars().next() {
                    if op_chars.contains(c) {
                        continue;
                    }
                }
                self.cur.bump(op.len());
                return Some(builtin);
            }
        }
        None
    }

    /// Left-associative binary level: each operator becomes a call of
    /// its builtin with the operands positional.
    fn parse_binary(
        &mut self,
        ops: &[(&str, &'static str)],
        op_chars: &str,
        next: impl Fn(&mut Self) -> TemplateResult<Expression>,
    ) -> TemplateResult<Expression> {
        let mut lhs = next(self)?;
        loop {
            let save = self.cur;
            self.cur.skip_ws();
            let Some(builtin) = self.match_operator(ops, op_chars) else {
                self.cur = save;
                break;
            };
            self.cur.skip_ws();
            match next(self) {
                Ok(rhs) => {
                    lhs = Expression::Call(
                        Box::new(Expression::Var(builtin.to_string())),
                        vec![(None, lhs), (None, rhs)],
                    );
                }
                Err(_) => {
                    // Not an operand after all (e.g. `%` before `}`);
                    // leave the operator for the enclosing tag.
                    self.cur = save;
                    break;
                }
            }
        }
        Ok(lhs)
    }

    fn parse_boolean(&mut self) -> TemplateResult<Expression> {
        self.parse_binary(BOOLEAN_OPS, BOOLEAN_OP_CHARS, Self::parse_comparative)
    }

    fn parse_comparative(&mut self) -> TemplateResult<Expression> {
        self.parse_binary(COMPARATIVE_OPS, COMPARATIVE_OP_CHARS, Self::parse_additive)
    }

    fn parse_additive(&mut self) -> TemplateResult<Expression> {
        self.parse_binary(ADDITIVE_OPS, ADDITIVE_OP_CHARS, Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> TemplateResult<Expression> {
        self.parse_binary(
            MULTIPLICATIVE_OPS,
            MULTIPLICATIVE_OP_CHARS,
            Self::parse_postfix,
        )
    }

    /// An atomic expression followed by any number of postfix
    /// elements: `.field`, `[index]`, `(args)`, `| filter`.
    fn parse_postfix(&mut self) -> TemplateResult<Expression> {
        let mut expr = self.parse_atomic()?;
        loop {
            let save = self.cur;
            self.cur.skip_ws();

            if self.cur.eat(".") {
                self.cur.skip_ws();
                match self.cur.ident() {
                    Some(field) => {
                        expr = Expression::MemberLookup(
                            Box::new(expr),
                            Box::new(Expression::StringLit(field)),
                        );
                        continue;
                    }
                    None => {
                        self.cur = save;
                        break;
                    }
                }
            }

            if self.cur.eat("[") {
                self.cur.skip_ws();
                let index = self.parse_expression()?;
                self.cur.skip_ws();
                if !self.cur.eat("]") {
                    return Err(self.unexpected("\"]\""));
                }
                expr = Expression::MemberLookup(Box::new(expr), Box::new(index));
                continue;
            }

            if self.cur.eat("(") {
                let args = self.parse_call_args()?;
                expr = Expression::Call(Box::new(expr), args);
                continue;
            }

            if self.cur.starts_with("|") && !self.cur.starts_with("||") {
                self.cur.bump(1);
                self.cur.skip_ws();
                let filter = self.parse_filter_target()?;
                let mut args = vec![(None, expr)];
                self.cur.skip_ws();
                if self.cur.eat("(") {
                    args.extend(self.parse_call_args()?);
                }
                expr = Expression::Call(Box::new(filter), args);
                continue;
            }

            self.cur = save;
            break;
        }
        Ok(expr)
    }

    /// The filter expression after `|`: an atomic plus member lookups,
    /// but no call — the argument list belongs to the filter rewrite.
    fn parse_filter_target(&mut self) -> TemplateResult<Expression> {
        let mut expr = self.parse_atomic()?;
        loop {
            let save = self.cur;
            self.cur.skip_ws();
            if self.cur.eat(".") {
                self.cur.skip_ws();
                if let Some(field) = self.cur.ident() {
                    expr = Expression::MemberLookup(
                        Box::new(expr),
                        Box::new(Expression::StringLit(field)),
                    );
                    continue;
                }
                self.cur = save;
                break;
            }
            if self.cur.eat("[") {
                self.cur.skip_ws();
                let index = self.parse_expression()?;
                self.cur.skip_ws();
                if !self.cur.eat("]") {
                    return Err(self.unexpected("\"]\""));
                }
                expr = Expression::MemberLookup(Box::new(expr), Box::new(index));
                continue;
            }
            self.cur = save;
            break;
        }
        Ok(expr)
    }

    /// Call arguments after a consumed `(`, through the `)`. Named and
    /// positional arguments mix freely; source order is preserved.
    fn parse_call_args(&mut self) -> TemplateResult<Vec<(Option<String>, Expression)>> {
        self.cur.skip_ws();
        let mut args = Vec::new();
        if self.cur.eat(")") {
            return Ok(args);
        }
        loop {
            self.cur.skip_ws();
            let save = self.cur;
            let mut name = None;
            if let Some(id) = self.cur.ident() {
                self.cur.skip_ws();
                if self.cur.starts_with("=") && !self.cur.starts_with("==") {
                    self.cur.bump(1);
                    self.cur.skip_ws();
                    name = Some(id);
                } else {
                    self.cur = save;
                }
            }
            let value = self.parse_expression()?;
            args.push((name, value));
            self.cur.skip_ws();
            if self.cur.eat(",") {
                continue;
            }
            if self.cur.eat(")") {
                return Ok(args);
            }
            return Err(self.unexpected("\",\" or \")\""));
        }
    }

    fn parse_atomic(&mut self) -> TemplateResult<Expression> {
        self.cur.skip_ws();

        if self.cur.eat("(") {
            self.cur.skip_ws();
            let expr = self.parse_expression()?;
            self.cur.skip_ws();
            if !self.cur.eat(")") {
                return Err(self.unexpected("\")\""));
            }
            return Ok(expr);
        }

        if self.cur.eat("[") {
            self.cur.skip_ws();
            let mut items = Vec::new();
            if self.cur.eat("]") {
                return Ok(Expression::List(items));
            }
            loop {
                self.cur.skip_ws();
                items.push(self.parse_expression()?);
                self.cur.skip_ws();
                if self.cur.eat(",") {
                    continue;
                }
                if self.cur.eat("]") {
                    return Ok(Expression::List(items));
                }
                return Err(self.unexpected("\",\" or \"]\""));
            }
        }

        if self.cur.eat("{") {
            self.cur.skip_ws();
            let mut pairs = Vec::new();
            if self.cur.eat("}") {
                return Ok(Expression::Object(pairs));
            }
            loop {
                self.cur.skip_ws();
                let key = self.parse_expression()?;
                self.cur.skip_ws();
                if !self.cur.eat(":") {
                    return Err(self.unexpected("\":\""));
                }
                self.cur.skip_ws();
                let value = self.parse_expression()?;
                pairs.push((key, value));
                self.cur.skip_ws();
                if self.cur.eat(",") {
                    continue;
                }
                if self.cur.eat("}") {
                    return Ok(Expression::Object(pairs));
                }
                return Err(self.unexpected("\",\" or \"}\""));
            }
        }

        if matches!(self.cur.peek(), Some('"') | Some('\'')) {
            return Ok(Expression::StringLit(self.parse_string()?));
        }

        let negative = self.cur.starts_with("-")
            && self
                .cur
                .rest()
                .as_bytes()
                .get(1)
                .is_some_and(|b| b.is_ascii_digit());
        if negative || self.cur.peek().is_some_and(|c| c.is_ascii_digit()) {
            return self.parse_number();
        }

        if let Some(name) = self.cur.ident() {
            return Ok(match name.as_str() {
                "true" => Expression::BoolLit(true),
                "false" => Expression::BoolLit(false),
                "null" => Expression::NullLit,
                _ => Expression::Var(name),
            });
        }

        Err(self.unexpected("expression"))
    }

    /// A quoted string with `\n \b \v \0 \t` escapes; any other
    /// escaped character stands for itself.
    fn parse_string(&mut self) -> TemplateResult<String> {
        let Some(quote) = self.cur.peek().filter(|c| matches!(c, '"' | '\'')) else {
            return Err(self.unexpected("string literal"));
        };
        self.cur.bump(1);
        let mut out = String::new();
        loop {
            let Some(c) = self.cur.peek() else {
                return Err(self.unexpected("closing quote"));
            };
            self.cur.bump(c.len_utf8());
            if c == quote {
                return Ok(out);
            }
            if c == '\\' {
                let Some(esc) = self.cur.peek() else {
                    return Err(self.unexpected("escape character"));
                };
                self.cur.bump(esc.len_utf8());
                out.push(match esc {
                    'n' => '\n',
                    'b' => '\u{0008}',
                    'v' => '\u{000B}',
                    '0' => '\0',
                    't' => '\t',
                    other => other,
                });
            } else {
                out.push(c);
            }
        }
    }

    /// Optional `-`, then `0` or `[1-9][0-9]*`, then an optional
    /// fraction.
    fn parse_number(&mut self) -> TemplateResult<Expression> {
        let start = self.cur.pos;
        self.cur.eat("-");
        if !self.cur.eat("0") {
            if !self.cur.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(self.unexpected("digit"));
            }
            self.eat_digits();
        }
        let save = self.cur;
        if self.cur.eat(".") {
            if self.cur.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.eat_digits();
            } else {
                self.cur = save;
            }
        }
        let text = &self.cur.src[start..self.cur.pos];
        let number: Decimal = text
            .parse()
            .map_err(|_| self.err_at(start, format!("invalid numeric literal \"{}\"", text)))?;
        Ok(Expression::NumberLit(number))
    }

    fn eat_digits(&mut self) {
        while self.cur.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.cur.bump(1);
        }
    }
}
