/*
 * html.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Safe-HTML fragment type.
//!
//! [`Html`] is an opaque wrapper around markup that is already safe to
//! emit. Template literals enter through [`Html::from_raw`] (templates
//! are authoritative HTML); interpolated values enter through
//! [`Html::escape`], which entity-encodes the characters that would
//! otherwise change the document structure.

use std::fmt;

/// An opaque fragment of safe HTML.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Html(String);

impl Html {
    /// Create an empty fragment.
    pub fn new() -> Self {
        Html(String::new())
    }

    /// Wrap a string as HTML without escaping.
    ///
    /// The caller asserts that `markup` is already safe to emit.
    pub fn from_raw(markup: impl Into<String>) -> Self {
        Html(markup.into())
    }

    /// Escape plain text into a safe fragment.
    ///
    /// Escapes `&`, `<`, `>`, `"`, and `'`.
    pub fn escape(text: &str) -> Self {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                _ => out.push(c),
            }
        }
        Html(out)
    }

    /// Append another fragment to this one.
    pub fn append(&mut self, other: Html) {
        self.0.push_str(&other.0);
    }

    /// The fragment's markup.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the fragment, returning its markup.
    pub fn into_string(self) -> String {
        self.0
    }

    /// Whether the fragment contains no markup.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Html {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_special_characters() {
        assert_eq!(
            Html::escape("<a href=\"x\">&'</a>").as_str(),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_escape_plain_text_unchanged() {
        assert_eq!(Html::escape("hello, world").as_str(), "hello, world");
    }

    #[test]
    fn test_from_raw_is_verbatim() {
        assert_eq!(Html::from_raw("<b>bold</b>").as_str(), "<b>bold</b>");
    }

    #[test]
    fn test_append() {
        let mut h = Html::from_raw("<p>");
        h.append(Html::escape("a < b"));
        h.append(Html::from_raw("</p>"));
        assert_eq!(h.as_str(), "<p>a &lt; b</p>");
    }
}
