/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template parsing.
//!
//! Evaluation deliberately has no error taxonomy: missing variables,
//! missing members, and calls of non-functions all resolve to null so
//! that rendering never aborts mid-document.

use thiserror::Error;

/// Errors that can occur while compiling a template.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Syntactic failure, with the source position where it occurred.
    #[error("{}", format_parse_error(.message, .source_name, .line, .column))]
    Parse {
        message: String,
        /// Name of the template source, when one was provided.
        source_name: Option<String>,
        /// 1-based line of the failure.
        line: Option<usize>,
        /// 1-based column of the failure.
        column: Option<usize>,
    },

    /// The include resolver had no source for a requested name.
    #[error("Template source not found: {name}")]
    SourceNotFound { name: String },

    /// A template includes itself, directly or through a chain.
    #[error("Recursive include detected: {name}")]
    RecursiveInclude { name: String },

    /// I/O failure while loading a template source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

fn format_parse_error(
    message: &str,
    source_name: &Option<String>,
    line: &Option<usize>,
    column: &Option<usize>,
) -> String {
    let message = message.trim_start_matches('\n');
    let location = match (line, column) {
        (Some(l), Some(c)) => format!(" at line {}, column {}", l, c),
        (Some(l), None) => format!(" at line {}", l),
        _ => String::new(),
    };
    match source_name {
        Some(name) => format!("Parse error in {}{}: {}", name, location, message),
        None => format!("Parse error{}: {}", location, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_with_location() {
        let err = TemplateError::Parse {
            message: "unexpected \"}}\", expecting expression".to_string(),
            source_name: Some("page.html".to_string()),
            line: Some(3),
            column: Some(7),
        };
        assert_eq!(
            err.to_string(),
            "Parse error in page.html at line 3, column 7: unexpected \"}}\", expecting expression"
        );
    }

    #[test]
    fn test_parse_error_display_without_location() {
        let err = TemplateError::Parse {
            message: "\nunexpected end of input".to_string(),
            source_name: None,
            line: None,
            column: None,
        };
        assert_eq!(err.to_string(), "Parse error: unexpected end of input");
    }

    #[test]
    fn test_source_not_found_message() {
        let err = TemplateError::SourceNotFound {
            name: "header.html".to_string(),
        };
        assert_eq!(err.to_string(), "Template source not found: header.html");
    }
}
