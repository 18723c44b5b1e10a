pub mod error;
pub mod lexer;
pub mod parser;
pub mod span;

use chumsky::Parser;

use error::{Diagnostic, Reason, WithDiagnosticInfo};
use parser::ast;
use span::Span;

/// Build a FORGE declaration list from one source file.
///
/// Always returns the declarations it could recover; the diagnostics carry
/// everything that went wrong along the way.
pub fn parse_source(source: &str, source_id: u16) -> (Vec<ast::Decl>, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();

    let (tokens, lex_errors) = lexer::lexer().parse_recovery(source);

    diagnostics.extend(
        lex_errors
            .into_iter()
            .map(|e| convert_lexer_error(source, e, source_id)),
    );

    let decls = if let Some(tokens) = tokens {
        let (decls, parse_diagnostics) = parser::parse_lr_to_ast(source_id, tokens);
        diagnostics.extend(parse_diagnostics);
        decls
    } else {
        Vec::new()
    };

    (decls, diagnostics)
}

/// Classify a lexer error by looking at the source around the error span:
/// the lexer's error type carries no message of its own.
pub(crate) fn convert_lexer_error(
    source: &str,
    e: chumsky::error::Cheap<char>,
    source_id: u16,
) -> Diagnostic {
    // Spans are in chars, not bytes, so we cannot index into the str directly.
    let found: String = source
        .chars()
        .skip(e.span().start)
        .take(e.span().end - e.span().start)
        .collect();
    let char_at = |at: usize| source.chars().nth(at);
    let prev = e.span().start.checked_sub(1).and_then(char_at);
    let prev2 = e.span().start.checked_sub(2).and_then(char_at);

    let span = Some(Span {
        start: e.span().start,
        end: e.span().end,
        source_id,
    });

    let first = found.chars().next();
    let (code, reason) = if first == Some('"') {
        ("E0102", Reason::Simple("unterminated string".to_string()))
    } else if prev == Some('\\') || (prev == Some('u') && prev2 == Some('\\')) {
        (
            "E0104",
            Reason::Simple(format!("invalid escape sequence `\\{found}`")),
        )
    } else if first.map_or(false, |c| c.is_ascii_digit()) {
        (
            "E0103",
            Reason::Simple(format!("malformed number literal `{found}`")),
        )
    } else {
        ("E0101", Reason::Unexpected { found })
    };

    Diagnostic::error(reason).with_code(code).with_span(span)
}

#[cfg(test)]
mod test {
    use super::*;

    fn codes(source: &str) -> Vec<&'static str> {
        let (_, diagnostics) = parse_source(source, 0);
        diagnostics.into_iter().filter_map(|d| d.code).collect()
    }

    #[test]
    fn lexer_error_codes() {
        assert_eq!(codes("entity User { name: string ¤ }"), vec!["E0101"]);
        // The unterminated string also swallows the closing brace, so the
        // parser reports the truncated declaration as well.
        assert!(codes(r#"app A { title: "oops }"#).contains(&"E0102"));
        assert!(codes("entity E { n: int = 99999999999999999999 }").contains(&"E0103"));
        assert_eq!(codes(r#"app A { title: "a\qb" }"#), vec!["E0104"]);
    }

    #[test]
    fn empty_source_parses_to_nothing() {
        let (decls, diagnostics) = parse_source("", 0);
        assert!(decls.is_empty());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn comments_are_discarded() {
        let (decls, diagnostics) = parse_source(
            "# a full-line comment\nentity User { email: string } # trailing\n",
            0,
        );
        assert!(diagnostics.is_empty());
        assert_eq!(decls.len(), 1);
    }
}
