/*
 * property_tests.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Property-based tests for the engine's structural invariants:
 * literal fidelity, comment elision, operator precedence, and
 * longest-match operator scanning.
 */

use jinjatemplate::{NullResolver, Template, Value};
use proptest::prelude::*;

fn render(source: &str) -> String {
    let template = Template::compile(source, &NullResolver).expect("template should parse");
    template.render_to_html(|_| Value::Null).into_string()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Source without tag delimiters renders verbatim, whatever the
    /// context.
    #[test]
    fn prop_literal_fidelity(source in "[^{]{0,64}") {
        prop_assert_eq!(render(&source), source);
    }

    /// Comments emit nothing regardless of their contents.
    #[test]
    fn prop_comment_elision(contents in "[a-zA-Z0-9 ]{0,32}") {
        let source = ["A{# ", &contents, " #}B"].concat();
        prop_assert_eq!(render(&source), "AB");
    }

    /// Multiplication binds tighter than addition.
    #[test]
    fn prop_precedence(a in 0i64..100, b in 0i64..100, c in 0i64..100) {
        let source = [
            "{{ ",
            &a.to_string(),
            " + ",
            &b.to_string(),
            " * ",
            &c.to_string(),
            " }}",
        ]
        .concat();
        prop_assert_eq!(render(&source), (a + b * c).to_string());
    }

    /// `>=` is one operator, never `>` then `=`.
    #[test]
    fn prop_longest_match_comparison(a in 0i64..100, b in 0i64..100) {
        let source = ["{{ ", &a.to_string(), " >= ", &b.to_string(), " }}"].concat();
        prop_assert_eq!(render(&source), (a >= b).to_string());
    }

    /// `//` is integer division, never two divisions.
    #[test]
    fn prop_longest_match_int_ratio(a in 0i64..1000, b in 1i64..50) {
        let source = ["{{ ", &a.to_string(), " // ", &b.to_string(), " }}"].concat();
        prop_assert_eq!(render(&source), (a / b).to_string());
    }
}
