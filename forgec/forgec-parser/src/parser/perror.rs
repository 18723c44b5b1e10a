use chumsky::error::{Simple, SimpleReason};
use itertools::Itertools;

use crate::error::{Diagnostic, Reason, WithDiagnosticInfo};
use crate::lexer::lr::TokenKind;
use crate::span::Span;

pub(crate) type PError = Simple<TokenKind, Span>;

pub(crate) fn convert(e: PError) -> Diagnostic {
    let mut span = e.span();

    if e.found().is_none() {
        // found end of input
        // fix for span outside of source
        if span.start > 0 && span.end > 0 {
            span.start -= 1;
            span.end -= 1;
        }
    }

    construct(e).with_span(Some(span))
}

fn construct(e: PError) -> Diagnostic {
    let label_code = match e.label() {
        Some("type") => Some("E0204"),
        Some("expression") => Some("E0205"),
        Some(label) if label.ends_with("declaration") => Some("E0207"),
        _ => None,
    };

    if let SimpleReason::Custom(message) = e.reason() {
        return Diagnostic::error_simple(message).with_code(label_code.unwrap_or("E0201"));
    }

    fn token_to_string(t: Option<TokenKind>) -> String {
        t.as_ref()
            .map(TokenKind::to_string)
            .unwrap_or_else(|| "end of input".to_string())
    }

    let expects_ident = e
        .expected()
        .any(|t| matches!(t, Some(TokenKind::Ident(name)) if name.is_empty()));

    let expects_block = e
        .expected()
        .any(|t| matches!(t, Some(TokenKind::Control('{'))));

    let expected: Vec<String> = e
        .expected()
        .cloned()
        .map(token_to_string)
        .sorted()
        .collect();

    let while_parsing = e
        .label()
        .map(|l| format!(" while parsing {l}"))
        .unwrap_or_default();

    if expected.is_empty() || expected.len() > 10 {
        let found = token_to_string(e.found().cloned());
        return Diagnostic::error_simple(format!("unexpected {found}{while_parsing}"))
            .with_code("E0201");
    }

    let code = label_code.unwrap_or(if expects_block {
        "E0206"
    } else if expects_ident {
        "E0203"
    } else {
        "E0202"
    });

    let mut expected = expected;
    let expected = match expected.len() {
        1 => expected.remove(0),
        2 => expected.join(" or "),
        _ => {
            let last = expected.pop().unwrap();
            format!("one of {} or {last}", expected.join(", "))
        }
    };

    match e.found() {
        Some(found) => Diagnostic::error(Reason::Expected {
            who: e.label().map(|x| x.to_string()),
            expected,
            found: found.to_string(),
        })
        .with_code(code),
        // We want a friendlier message than "found end of input"...
        None => Diagnostic::error_simple(format!(
            "Expected {expected}, but didn't find anything before the end."
        ))
        .with_code(code),
    }
}
