use chumsky::Parser;
use insta::assert_debug_snapshot;

use super::lexer;
use super::lr::{Literal, TokenKind, TokenVec};

fn lex(source: &str) -> TokenVec {
    TokenVec(lexer().parse(source).unwrap())
}

#[test]
fn debug_display() {
    assert_debug_snapshot!(lex("app Demo"), @r###"
    TokenVec (
      0..3: Keyword("app"),
      4..8: Ident("Demo"),
    )
    "###);
}

#[test]
fn keywords_are_whole_words() {
    assert_debug_snapshot!(lex("input inputs"), @r###"
    TokenVec (
      0..5: Keyword("input"),
      6..12: Ident("inputs"),
    )
    "###);
}

#[test]
fn operators() {
    assert_debug_snapshot!(lex("-> == != >= <= = < >"), @r###"
    TokenVec (
      0..2: ArrowThin,
      3..5: Eq,
      6..8: Ne,
      9..11: Gte,
      12..14: Lte,
      15..16: Control('='),
      17..18: Control('<'),
      19..20: Control('>'),
    )
    "###);
}

#[test]
fn numbers() {
    assert_eq!(
        lexer().parse("42").unwrap()[0].kind,
        TokenKind::Literal(Literal::Integer(42))
    );
    assert_eq!(
        lexer().parse("1.5").unwrap()[0].kind,
        TokenKind::Literal(Literal::Float(1.5))
    );
    assert_eq!(
        lexer().parse("2e3").unwrap()[0].kind,
        TokenKind::Literal(Literal::Float(2000.0))
    );

    // An integer that does not fit i64 is malformed.
    assert!(lexer().parse("99999999999999999999").is_err());
}

#[test]
fn booleans_and_null() {
    assert_debug_snapshot!(lex("true false null"), @r###"
    TokenVec (
      0..4: Literal(Boolean(true)),
      5..10: Literal(Boolean(false)),
      11..15: Literal(Null),
    )
    "###);
}

#[test]
fn strings() {
    assert_eq!(
        lexer().parse(r#""hello""#).unwrap()[0].kind,
        TokenKind::Literal(Literal::String("hello".to_string()))
    );
    assert_eq!(
        lexer().parse(r#""a\nb\t\"c\"""#).unwrap()[0].kind,
        TokenKind::Literal(Literal::String("a\nb\t\"c\"".to_string()))
    );
    assert_eq!(
        lexer().parse(r#""A""#).unwrap()[0].kind,
        TokenKind::Literal(Literal::String("A".to_string()))
    );

    // Unterminated
    assert!(lexer().parse(r#""oops"#).is_err());
    // Invalid escape
    assert!(lexer().parse(r#""a\qb""#).is_err());
}

#[test]
fn comments() {
    assert_debug_snapshot!(lex("# a comment\napp"), @r###"
    TokenVec (
      0..11: Comment(" a comment"),
      11..12: NewLine,
      12..15: Keyword("app"),
    )
    "###);
}

#[test]
fn recovery_continues_past_bad_character() {
    let (tokens, errors) = lexer().parse_recovery("app ¤ entity");
    let tokens = tokens.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(tokens
        .iter()
        .any(|t| t.kind == TokenKind::Keyword("entity".to_string())));
}
