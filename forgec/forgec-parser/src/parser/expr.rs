use chumsky::prelude::*;

use super::perror::PError;
use super::{ctrl, ident_part, keyword};
use crate::lexer::lr::{Literal, TokenKind};
use crate::parser::ast::{BinOp, BinaryExpr, Expr, ExprKind, UnOp, UnaryExpr};
use crate::span::Span;

pub(crate) fn expr() -> impl Parser<TokenKind, Expr, Error = PError> + Clone {
    recursive(|expr| {
        let literal = select! { TokenKind::Literal(lit) => ExprKind::Literal(lit) };

        let ident = ident_part().map(ExprKind::Ident);

        let parenthesized = expr
            .clone()
            .delimited_by(ctrl('('), ctrl(')'))
            .recover_with(nested_delimiters(
                TokenKind::Control('('),
                TokenKind::Control(')'),
                [(TokenKind::Control('{'), TokenKind::Control('}'))],
                |_| Expr::new(ExprKind::Literal(Literal::Null)),
            ));

        let term = literal
            .or(ident)
            .map_with_span(ExprKind::into_expr)
            .or(parenthesized)
            .boxed();

        let term = postfix(term, expr);
        let term = unary(term);

        // Binary operators, loosest last
        let term = binary_op_parser(term, operator_mul());
        let term = binary_op_parser(term, operator_add());
        let term = comparison(term);
        let term = negation(term);
        let term = binary_op_parser(term, operator_and());
        binary_op_parser(term, operator_or())
    })
    .labelled("expression")
}

/// A dotted identifier path, eg. `author.orgs.members`.
pub(crate) fn path() -> impl Parser<TokenKind, Vec<String>, Error = PError> + Clone {
    ident_part().separated_by(ctrl('.')).at_least(1)
}

/// Field lookups and calls bind tighter than any operator.
fn postfix<'a, E>(
    term: E,
    expr: impl Parser<TokenKind, Expr, Error = PError> + Clone + 'a,
) -> impl Parser<TokenKind, Expr, Error = PError> + Clone + 'a
where
    E: Parser<TokenKind, Expr, Error = PError> + Clone + 'a,
{
    #[derive(Clone)]
    enum Postfix {
        Field(String),
        Call(Vec<Expr>),
    }

    term.then(
        choice((
            ctrl('.').ignore_then(ident_part()).map(Postfix::Field),
            expr.separated_by(ctrl(','))
                .delimited_by(ctrl('('), ctrl(')'))
                .map(Postfix::Call),
        ))
        .map_with_span(|op, span: Span| (op, span))
        .repeated(),
    )
    .foldl(|base, (op, op_span)| {
        let span = Span::merge_opt(base.span, Some(op_span));
        let kind = match op {
            Postfix::Field(name) => ExprKind::Path {
                base: Box::new(base),
                name,
            },
            Postfix::Call(args) => ExprKind::Call {
                callee: Box::new(base),
                args,
            },
        };
        Expr { kind, span }
    })
    .boxed()
}

fn unary<'a, E>(expr: E) -> impl Parser<TokenKind, Expr, Error = PError> + Clone + 'a
where
    E: Parser<TokenKind, Expr, Error = PError> + Clone + 'a,
{
    expr.clone()
        .or(ctrl('-')
            .map_with_span(|_, span: Span| span)
            .then(expr.map(Box::new))
            .map(|(op_span, expr)| {
                let span = Span::merge_opt(Some(op_span), expr.span);
                Expr {
                    kind: ExprKind::Unary(UnaryExpr {
                        op: UnOp::Neg,
                        expr,
                    }),
                    span,
                }
            }))
        .boxed()
}

/// Comparisons don't associate: `a < b < c` is a parse error.
fn comparison<'a, E>(term: E) -> impl Parser<TokenKind, Expr, Error = PError> + Clone + 'a
where
    E: Parser<TokenKind, Expr, Error = PError> + Clone + 'a,
{
    term.clone()
        .then(operator_compare().then(term).or_not())
        .map(|(left, rhs)| match rhs {
            None => left,
            Some((op, right)) => {
                let span = Span::merge_opt(left.span, right.span);
                Expr {
                    kind: ExprKind::Binary(BinaryExpr {
                        left: Box::new(left),
                        op,
                        right: Box::new(right),
                    }),
                    span,
                }
            }
        })
        .boxed()
}

fn negation<'a, E>(term: E) -> impl Parser<TokenKind, Expr, Error = PError> + Clone + 'a
where
    E: Parser<TokenKind, Expr, Error = PError> + Clone + 'a,
{
    keyword("not")
        .map_with_span(|_, span: Span| span)
        .repeated()
        .then(term)
        .foldr(|op_span, expr| {
            let span = Span::merge_opt(Some(op_span), expr.span);
            Expr {
                kind: ExprKind::Unary(UnaryExpr {
                    op: UnOp::Not,
                    expr: Box::new(expr),
                }),
                span,
            }
        })
        .boxed()
}

fn binary_op_parser<'a, Term, Op>(
    term: Term,
    op: Op,
) -> impl Parser<TokenKind, Expr, Error = PError> + 'a + Clone
where
    Term: Parser<TokenKind, Expr, Error = PError> + 'a + Clone,
    Op: Parser<TokenKind, BinOp, Error = PError> + 'a + Clone,
{
    let term = term.map_with_span(|e, s| (e, s)).boxed();

    term.clone()
        .then(op.then(term).repeated())
        .foldl(|left, (op, right)| {
            let span = Span {
                start: left.1.start,
                end: right.1.end,
                source_id: left.1.source_id,
            };
            let kind = ExprKind::Binary(BinaryExpr {
                left: Box::new(left.0),
                op,
                right: Box::new(right.0),
            });
            (kind.into_expr(span), span)
        })
        .map(|(e, _)| e)
        .boxed()
}

fn operator_mul() -> impl Parser<TokenKind, BinOp, Error = PError> + Clone {
    (ctrl('*').to(BinOp::Mul))
        .or(ctrl('/').to(BinOp::Div))
        .or(ctrl('%').to(BinOp::Mod))
}

fn operator_add() -> impl Parser<TokenKind, BinOp, Error = PError> + Clone {
    (ctrl('+').to(BinOp::Add)).or(ctrl('-').to(BinOp::Sub))
}

fn operator_compare() -> impl Parser<TokenKind, BinOp, Error = PError> + Clone {
    choice((
        just(TokenKind::Eq).to(BinOp::Eq),
        just(TokenKind::Ne).to(BinOp::Ne),
        just(TokenKind::Lte).to(BinOp::Lte),
        just(TokenKind::Gte).to(BinOp::Gte),
        ctrl('<').to(BinOp::Lt),
        ctrl('>').to(BinOp::Gt),
        keyword("in").to(BinOp::In),
    ))
}

fn operator_and() -> impl Parser<TokenKind, BinOp, Error = PError> + Clone {
    keyword("and").to(BinOp::And)
}

fn operator_or() -> impl Parser<TokenKind, BinOp, Error = PError> + Clone {
    keyword("or").to(BinOp::Or)
}
