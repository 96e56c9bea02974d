/*
 * context.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The host contract for rendering.
//!
//! A render context bundles the two callbacks the evaluator needs from
//! its host: variable lookup and HTML emission. The engine is otherwise
//! agnostic about where variables come from and where output goes — a
//! context may stream to a socket or accumulate into a buffer.

use crate::html::Html;
use crate::value::Value;

/// Host callbacks for one render.
pub trait RenderContext {
    /// Resolve a top-level variable. Unknown names conventionally
    /// return [`Value::Null`].
    fn lookup(&mut self, name: &str) -> Value;

    /// Emit an HTML fragment.
    fn write_html(&mut self, html: Html);
}

/// A context built from a pure lookup function, accumulating output
/// into a buffer.
///
/// This is the convenience most embeddings want: provide a closure
/// over your data, render, then take the buffer.
pub struct BufferContext<F> {
    lookup: F,
    buffer: Html,
}

impl<F> BufferContext<F>
where
    F: FnMut(&str) -> Value,
{
    /// Create a context around a lookup function.
    pub fn new(lookup: F) -> Self {
        Self {
            lookup,
            buffer: Html::new(),
        }
    }

    /// Consume the context, returning the accumulated output.
    pub fn into_html(self) -> Html {
        self.buffer
    }
}

impl<F> RenderContext for BufferContext<F>
where
    F: FnMut(&str) -> Value,
{
    fn lookup(&mut self, name: &str) -> Value {
        (self.lookup)(name)
    }

    fn write_html(&mut self, html: Html) {
        self.buffer.append(html);
    }
}

/// A context that captures writes while delegating lookups.
///
/// Macro invocation renders the macro body through one of these: the
/// body still sees the host's variables, but its output is returned to
/// the caller as a value instead of being emitted.
pub struct CaptureContext<'a> {
    parent: &'a mut dyn RenderContext,
    buffer: Html,
}

impl<'a> CaptureContext<'a> {
    /// Wrap a context, buffering everything written through the
    /// wrapper.
    pub fn new(parent: &'a mut dyn RenderContext) -> Self {
        Self {
            parent,
            buffer: Html::new(),
        }
    }

    /// Consume the wrapper, returning the captured output.
    pub fn into_html(self) -> Html {
        self.buffer
    }
}

impl RenderContext for CaptureContext<'_> {
    fn lookup(&mut self, name: &str) -> Value {
        self.parent.lookup(name)
    }

    fn write_html(&mut self, html: Html) {
        self.buffer.append(html);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_context_accumulates() {
        let mut ctx = BufferContext::new(|_| Value::Null);
        ctx.write_html(Html::from_raw("<p>"));
        ctx.write_html(Html::escape("x < y"));
        ctx.write_html(Html::from_raw("</p>"));
        assert_eq!(ctx.into_html().as_str(), "<p>x &lt; y</p>");
    }

    #[test]
    fn test_buffer_context_lookup() {
        let mut ctx = BufferContext::new(|name| {
            if name == "answer" {
                Value::from(42)
            } else {
                Value::Null
            }
        });
        assert_eq!(ctx.lookup("answer"), Value::from(42));
        assert_eq!(ctx.lookup("question"), Value::Null);
    }

    #[test]
    fn test_capture_context_intercepts_writes() {
        let mut outer = BufferContext::new(|_| Value::from("seen"));
        outer.write_html(Html::from_raw("before"));

        let mut capture = CaptureContext::new(&mut outer);
        capture.write_html(Html::from_raw("inner"));
        assert_eq!(capture.lookup("anything"), Value::from("seen"));
        let captured = capture.into_html();

        assert_eq!(captured.as_str(), "inner");
        assert_eq!(outer.into_html().as_str(), "before");
    }
}
