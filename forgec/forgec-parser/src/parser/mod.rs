pub mod ast;
mod decl;
mod expr;
pub(crate) mod perror;
#[cfg(test)]
mod test;
mod types;

use std::collections::HashMap;

use chumsky::prelude::*;
use chumsky::Stream;

use crate::error::{Diagnostic, Reason, WithDiagnosticInfo};
use crate::lexer::lr::{Token, TokenKind, DECL_KEYWORDS};
use crate::span::Span;
use perror::PError;

/// Build the declaration list for one source file from its token stream.
///
/// Declarations are parsed independently: the stream is split at top-level
/// keywords (tracking brace depth), so a broken declaration yields one
/// diagnostic and the following declarations still parse.
pub fn parse_lr_to_ast(source_id: u16, tokens: Vec<Token>) -> (Vec<ast::Decl>, Vec<Diagnostic>) {
    // Comments and newlines separate tokens but carry no meaning.
    let semantic_tokens: Vec<Token> = tokens
        .into_iter()
        .filter(|token| !matches!(token.kind, TokenKind::Comment(_) | TokenKind::NewLine))
        .collect();

    let mut decls = Vec::new();
    let mut diagnostics = Vec::new();

    for chunk in split_declarations(&semantic_tokens) {
        let first = &chunk[0];
        let first_span = Span {
            start: first.span.start,
            end: first.span.end,
            source_id,
        };

        match &first.kind {
            TokenKind::Keyword(kw) if kw == "imperative" || kw == "migrate" => {
                diagnostics.push(
                    Diagnostic::error_simple(format!(
                        "`{kw}` declarations are reserved and not supported"
                    ))
                    .with_code("E0207")
                    .with_span(Some(first_span)),
                );
            }
            TokenKind::Keyword(kw) if DECL_KEYWORDS.contains(&kw.as_str()) => {
                let (parsed, errors) = decl::declaration()
                    .then_ignore(end())
                    .parse_recovery(prepare_stream(chunk, source_id));

                match parsed {
                    Some(decl) => {
                        // Errors emitted by `validate`/recovery arrive here
                        // even though the declaration parsed.
                        diagnostics.extend(errors.into_iter().map(perror::convert));
                        check_duplicate_fields(&decl, &mut diagnostics);
                        decls.push(decl);
                    }
                    None => {
                        // One diagnostic per broken declaration; the next
                        // chunk resumes at the next top-level keyword.
                        if let Some(error) = errors.into_iter().next() {
                            diagnostics.push(perror::convert(error));
                        }
                    }
                }
            }
            _ => {
                diagnostics.push(
                    Diagnostic::error(Reason::Unexpected {
                        found: first.kind.to_string(),
                    })
                    .push_hint("expected a declaration such as `app`, `entity` or `view`")
                    .with_code("E0207")
                    .with_span(Some(first_span)),
                );
            }
        }
    }

    log::debug!("parse diagnostics: {diagnostics:?}");

    (decls, diagnostics)
}

/// Split a token stream into per-declaration chunks. A chunk starts at each
/// top-level keyword outside braces; leading garbage forms its own chunk.
/// A keyword right after `.`/`:`/`->` and friends is in operand position
/// (soft keywords can name fields) and never starts a chunk.
fn split_declarations(tokens: &[Token]) -> Vec<&[Token]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;

    for (i, token) in tokens.iter().enumerate() {
        match &token.kind {
            TokenKind::Control('{') => depth += 1,
            TokenKind::Control('}') => depth = depth.saturating_sub(1),
            TokenKind::Keyword(kw)
                if depth == 0
                    && i > start
                    && DECL_KEYWORDS.contains(&kw.as_str())
                    && !operand_position(&tokens[i - 1].kind) =>
            {
                chunks.push(&tokens[start..i]);
                start = i;
            }
            _ => {}
        }
    }
    if start < tokens.len() {
        chunks.push(&tokens[start..]);
    }
    chunks
}

fn operand_position(previous: &TokenKind) -> bool {
    matches!(
        previous,
        TokenKind::Control('.' | ':' | '=' | ',' | '<' | '(')
            | TokenKind::ArrowThin
            | TokenKind::Eq
            | TokenKind::Ne
            | TokenKind::Lte
            | TokenKind::Gte
    )
}

fn check_duplicate_fields(decl: &ast::Decl, diagnostics: &mut Vec<Diagnostic>) {
    let Some(entity) = decl.kind.as_entity() else {
        return;
    };

    let mut seen: HashMap<&str, Option<Span>> = HashMap::new();
    for field in &entity.fields {
        if let Some(first) = seen.get(field.name.as_str()) {
            let mut diagnostic = Diagnostic::error_simple(format!(
                "duplicate field `{}` in entity `{}`",
                field.name, entity.name
            ))
            .with_code("E0208")
            .with_span(field.span);
            if let Some(first_span) = first {
                diagnostic = diagnostic.with_related(*first_span, "first declared here");
            }
            diagnostics.push(diagnostic);
        } else {
            seen.insert(field.name.as_str(), field.span);
        }
    }
}

fn prepare_stream<'a>(
    tokens: &'a [Token],
    source_id: u16,
) -> Stream<'a, TokenKind, Span, impl Iterator<Item = (TokenKind, Span)> + 'a> {
    let end = tokens.last().map(|t| t.span.end).unwrap_or_default();
    let eoi = Span {
        start: end,
        end: end + 1,
        source_id,
    };
    Stream::from_iter(
        eoi,
        tokens.iter().map(move |t| {
            (
                t.kind.clone(),
                Span {
                    start: t.span.start,
                    end: t.span.end,
                    source_id,
                },
            )
        }),
    )
}

pub(crate) fn ident_part() -> impl Parser<TokenKind, String, Error = PError> + Clone {
    select! {
        TokenKind::Ident(ident) => ident,
        // Soft keywords: these name declaration parts but are too common as
        // field names to reserve outright.
        TokenKind::Keyword(ident) if matches!(ident.as_str(), "action" | "message" | "source") => ident,
    }
    .map_err(|e: PError| {
        PError::expected_input_found(
            e.span(),
            [Some(TokenKind::Ident("".to_string()))],
            e.found().cloned(),
        )
    })
}

pub(crate) fn keyword(kw: &'static str) -> impl Parser<TokenKind, (), Error = PError> + Clone {
    just(TokenKind::Keyword(kw.to_string())).ignored()
}

/// A contextual keyword: an identifier with a fixed spelling, eg. `inverse`.
pub(crate) fn word(w: &'static str) -> impl Parser<TokenKind, (), Error = PError> + Clone {
    just(TokenKind::Ident(w.to_string())).ignored()
}

pub(crate) fn ctrl(char: char) -> impl Parser<TokenKind, (), Error = PError> + Clone {
    just(TokenKind::Control(char)).ignored()
}
