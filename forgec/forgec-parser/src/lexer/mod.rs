pub mod lr;
#[cfg(test)]
mod test;

use chumsky::{
    error::Cheap,
    prelude::*,
    text::{newline, Character},
};

use lr::{Literal, Token, TokenKind, KEYWORDS};

/// Lex chars to tokens until the end of the input
pub fn lexer() -> impl Parser<char, Vec<Token>, Error = Cheap<char>> {
    lex_token()
        .repeated()
        .then_ignore(ignored())
        .then_ignore(end())
}

/// Lex chars to a single token
fn lex_token() -> impl Parser<char, Token, Error = Cheap<char>> {
    let control_multi = choice((
        just("->").to(TokenKind::ArrowThin),
        just("==").to(TokenKind::Eq),
        just("!=").to(TokenKind::Ne),
        just(">=").to(TokenKind::Gte),
        just("<=").to(TokenKind::Lte),
    ));

    let control = one_of("{}()<>,:.=+-*/%").map(TokenKind::Control);

    // Keywords are an exact match of a whole identifier, so `inputs` is an
    // identifier even though `input` is a keyword.
    let ident = ident_part().map(|name| match name.as_str() {
        "true" => TokenKind::Literal(Literal::Boolean(true)),
        "false" => TokenKind::Literal(Literal::Boolean(false)),
        "null" => TokenKind::Literal(Literal::Null),
        _ if KEYWORDS.contains(&name.as_str()) => TokenKind::Keyword(name),
        _ => TokenKind::Ident(name),
    });

    let token = choice((
        newline().to(TokenKind::NewLine),
        control_multi,
        literal().map(TokenKind::Literal),
        control,
        ident,
        comment(),
    ))
    .recover_with(skip_then_retry_until([]).skip_start());

    ignored().ignore_then(token.map_with_span(|kind, span| Token { kind, span }))
}

fn ignored() -> impl Parser<char, (), Error = Cheap<char>> {
    whitespace().repeated().ignored()
}

fn whitespace() -> impl Parser<char, (), Error = Cheap<char>> {
    filter(|x: &char| x.is_inline_whitespace())
        .repeated()
        .at_least(1)
        .ignored()
}

fn comment() -> impl Parser<char, TokenKind, Error = Cheap<char>> {
    just('#').ignore_then(
        newline()
            .not()
            .repeated()
            .collect::<String>()
            .map(TokenKind::Comment),
    )
}

pub(crate) fn ident_part() -> impl Parser<char, String, Error = Cheap<char>> + Clone {
    filter(|c: &char| c.is_alphabetic() || *c == '_')
        .chain(filter(|c: &char| c.is_alphanumeric() || *c == '_').repeated())
        .collect()
}

fn literal() -> impl Parser<char, Literal, Error = Cheap<char>> {
    let exp = one_of("eE").chain(one_of("+-").or_not().chain::<char, _, _>(text::digits(10)));

    let integer = filter(|c: &char| c.is_ascii_digit() && *c != '0')
        .chain::<_, Vec<char>, _>(filter(|c: &char| c.is_ascii_digit()).repeated())
        .or(just('0').map(|c| vec![c]));

    let frac = just('.')
        .chain::<char, _, _>(filter(|c: &char| c.is_ascii_digit()))
        .chain::<char, _, _>(filter(|c: &char| c.is_ascii_digit()).repeated());

    let number = integer
        .chain::<char, _, _>(frac.or_not().flatten())
        .chain::<char, _, _>(exp.or_not().flatten())
        .try_map(|chars, span| {
            let str = chars.into_iter().collect::<String>();

            if str.contains(['.', 'e', 'E']) {
                str.parse::<f64>()
                    .map(Literal::Float)
                    .map_err(|_| Cheap::expected_input_found(span, None, None))
            } else {
                str.parse::<i64>()
                    .map(Literal::Integer)
                    .map_err(|_| Cheap::expected_input_found(span, None, None))
            }
        })
        .labelled("number");

    let string = quoted_string().map(Literal::String);

    choice((string, number))
}

fn quoted_string() -> impl Parser<char, String, Error = Cheap<char>> {
    let inner = choice((escaped_character(), none_of("\"\\\n")));

    just('"')
        .ignore_then(inner.repeated().collect::<String>())
        .then(just('"').or_not())
        .validate(|(string, closing), span, emit| {
            if closing.is_none() {
                emit(Cheap::expected_input_found(span, None, None));
            }
            string
        })
        .labelled("string")
}

fn escaped_character() -> impl Parser<char, char, Error = Cheap<char>> {
    just('\\').ignore_then(choice((
        just('\\'),
        just('"'),
        just('n').to('\n'),
        just('r').to('\r'),
        just('t').to('\t'),
        just('u').ignore_then(
            filter(|c: &char| c.is_ascii_hexdigit())
                .repeated()
                .exactly(4)
                .collect::<String>()
                .validate(|digits, span, emit| {
                    char::from_u32(u32::from_str_radix(&digits, 16).unwrap()).unwrap_or_else(|| {
                        emit(Cheap::expected_input_found(span, None, None));
                        '\u{FFFD}' // Unicode replacement character
                    })
                }),
        ),
        // Any other escape is invalid; keep lexing the string so the error
        // stays local to the escape.
        any().validate(|c, span, emit| {
            emit(Cheap::expected_input_found(span, None, None));
            c
        }),
    )))
}
