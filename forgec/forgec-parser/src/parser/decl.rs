use chumsky::prelude::*;

use super::expr::{expr, path};
use super::perror::PError;
use super::types::type_expr;
use super::{ctrl, ident_part, keyword, word};
use crate::lexer::lr::{Literal, TokenKind};
use crate::parser::ast::*;
use crate::span::Span;

pub(crate) fn declaration() -> impl Parser<TokenKind, Decl, Error = PError> {
    choice((
        app_decl(),
        entity_decl(),
        relation_decl(),
        rule_decl(),
        access_decl(),
        action_decl(),
        message_decl(),
        job_decl(),
        hook_decl(),
        view_decl(),
        test_decl(),
        presence_decl(),
        ephemeral_decl(),
    ))
    .map_with_span(|kind, span| Decl {
        kind,
        span: Some(span),
    })
    .labelled("declaration")
}

/// `{ ... }` with recovery: a broken block body yields the fallback and the
/// original error, without poisoning the surrounding declaration list.
fn braces<'a, P, O, F>(parser: P, fallback: F) -> impl Parser<TokenKind, O, Error = PError> + Clone + 'a
where
    P: Parser<TokenKind, O, Error = PError> + Clone + 'a,
    F: Fn(Span) -> O + Clone + 'a,
    O: Clone + 'a,
{
    parser
        .delimited_by(ctrl('{'), ctrl('}'))
        .recover_with(nested_delimiters(
            TokenKind::Control('{'),
            TokenKind::Control('}'),
            [(TokenKind::Control('('), TokenKind::Control(')'))],
            fallback,
        ))
}

fn event_path() -> impl Parser<TokenKind, (String, String), Error = PError> + Clone {
    ident_part().then_ignore(ctrl('.')).then(ident_part())
}

/// `namespace.verb`, eg. `email.send`.
fn capability() -> impl Parser<TokenKind, String, Error = PError> + Clone {
    ident_part()
        .then_ignore(ctrl('.'))
        .then(ident_part())
        .map(|(namespace, verb)| format!("{namespace}.{verb}"))
}

fn integer() -> impl Parser<TokenKind, i64, Error = PError> + Clone {
    select! { TokenKind::Literal(Literal::Integer(i)) => i }
}

fn string_literal() -> impl Parser<TokenKind, String, Error = PError> + Clone {
    select! { TokenKind::Literal(Literal::String(s)) => s }
}

fn boolean() -> impl Parser<TokenKind, bool, Error = PError> + Clone {
    select! { TokenKind::Literal(Literal::Boolean(b)) => b }
}

fn option_value() -> impl Parser<TokenKind, OptionValue, Error = PError> + Clone {
    select! {
        TokenKind::Literal(lit) => OptionValue::Literal(lit),
        TokenKind::Ident(name) => OptionValue::Name(name),
    }
}

fn app_option() -> impl Parser<TokenKind, AppOption, Error = PError> + Clone {
    ident_part()
        .then_ignore(ctrl(':'))
        .then(option_value())
        .map_with_span(|(key, value), span| AppOption {
            key,
            value,
            span: Some(span),
        })
}

fn app_decl() -> impl Parser<TokenKind, DeclKind, Error = PError> + Clone {
    keyword("app")
        .ignore_then(ident_part())
        .then(braces(app_option().repeated(), |_| vec![]))
        .map(|(name, options)| DeclKind::App(AppDecl { name, options }))
        .labelled("app declaration")
}

fn entity_decl() -> impl Parser<TokenKind, DeclKind, Error = PError> + Clone {
    let constraint = choice((
        keyword("unique").to(Constraint::Unique),
        keyword("optional").to(Constraint::Optional),
        keyword("length").ignore_then(choice((
            just(TokenKind::Lte)
                .ignore_then(integer())
                .map(Constraint::MaxLength),
            just(TokenKind::Gte)
                .ignore_then(integer())
                .map(Constraint::MinLength),
        ))),
    ));

    let field = ident_part()
        .then_ignore(ctrl(':'))
        .then(type_expr())
        .then(constraint.repeated())
        .then(ctrl('=').ignore_then(option_value()).or_not())
        .map_with_span(|(((name, ty), constraints), default), span| Field {
            name,
            ty,
            constraints,
            default,
            span: Some(span),
        });

    keyword("entity")
        .ignore_then(ident_part())
        .then(braces(field.repeated(), |_| vec![]))
        .map(|(name, fields)| DeclKind::Entity(EntityDecl { name, fields }))
        .labelled("entity declaration")
}

fn relation_decl() -> impl Parser<TokenKind, DeclKind, Error = PError> + Clone {
    keyword("relation")
        .ignore_then(ident_part())
        .then_ignore(ctrl('.'))
        .then(ident_part())
        .then_ignore(just(TokenKind::ArrowThin))
        .then(ident_part())
        .then(word("many").or_not())
        .then(word("inverse").ignore_then(ident_part()).or_not())
        .map(|((((owner, field), target), many), inverse)| {
            DeclKind::Relation(RelationDecl {
                owner,
                field,
                target,
                many: many.is_some(),
                inverse,
            })
        })
        .labelled("relation declaration")
}

fn rule_decl() -> impl Parser<TokenKind, DeclKind, Error = PError> + Clone {
    let clause = choice((
        keyword("forbid").to(RuleAction::Forbid),
        keyword("allow").to(RuleAction::Allow),
        keyword("require").to(RuleAction::Require),
    ))
    .then(keyword("if").ignore_then(expr()).or_not())
    .then(keyword("emit").ignore_then(ident_part()).or_not())
    .map_with_span(|((action, guard), emit), span| RuleClause {
        action,
        guard,
        emit,
        span: Some(span),
    });

    keyword("rule")
        .ignore_then(event_path())
        .then(braces(clause.repeated().at_least(1), |_| vec![]))
        .map(|((entity, event), clauses)| {
            DeclKind::Rule(RuleDecl {
                entity,
                event,
                clauses,
            })
        })
        .labelled("rule declaration")
}

fn access_decl() -> impl Parser<TokenKind, DeclKind, Error = PError> + Clone {
    let clause = ident_part()
        .then_ignore(ctrl(':'))
        .then(expr())
        .map_with_span(|(op, predicate), span| AccessClause {
            op,
            predicate,
            span: Some(span),
        });

    keyword("access")
        .ignore_then(ident_part())
        .then(braces(clause.repeated(), |_| vec![]))
        .map(|(entity, clauses)| DeclKind::Access(AccessDecl { entity, clauses }))
        .labelled("access declaration")
}

fn action_decl() -> impl Parser<TokenKind, DeclKind, Error = PError> + Clone {
    #[derive(Clone)]
    enum Entry {
        Input(String),
        Effect(String),
        Body(Expr),
    }

    let entry = choice((
        keyword("input")
            .ignore_then(ctrl(':'))
            .ignore_then(ident_part())
            .map(Entry::Input),
        keyword("effect")
            .ignore_then(ctrl(':'))
            .ignore_then(capability())
            .map(Entry::Effect),
        word("body")
            .ignore_then(ctrl(':'))
            .ignore_then(expr())
            .map(Entry::Body),
    ));

    keyword("action")
        .ignore_then(ident_part())
        .then(braces(entry.repeated(), |_| vec![]))
        .map(|(name, entries)| {
            let mut action = ActionDecl {
                name,
                input: None,
                effect: None,
                body: None,
            };
            for entry in entries {
                match entry {
                    Entry::Input(input) => action.input = Some(input),
                    Entry::Effect(effect) => action.effect = Some(effect),
                    Entry::Body(body) => action.body = Some(body),
                }
            }
            DeclKind::Action(action)
        })
        .labelled("action declaration")
}

fn message_decl() -> impl Parser<TokenKind, DeclKind, Error = PError> + Clone {
    #[derive(Clone)]
    enum Entry {
        Level(String),
        Default(String),
        Template(String),
    }

    let entry = choice((
        word("level")
            .ignore_then(ctrl(':'))
            .ignore_then(ident_part())
            .map(Entry::Level),
        word("default")
            .ignore_then(ctrl(':'))
            .ignore_then(string_literal())
            .map(Entry::Default),
        word("template")
            .ignore_then(ctrl(':'))
            .ignore_then(string_literal())
            .map(Entry::Template),
    ));

    keyword("message")
        .ignore_then(ident_part().map_with_span(|name, span: Span| (name, span)))
        .then(braces(entry.repeated(), |_| vec![]))
        .map(|((name, name_span), entries)| {
            let mut message = MessageDecl {
                name,
                name_span: Some(name_span),
                level: None,
                default: None,
                template: None,
            };
            for entry in entries {
                match entry {
                    Entry::Level(level) => message.level = Some(level),
                    Entry::Default(default) => message.default = Some(default),
                    Entry::Template(template) => message.template = Some(template),
                }
            }
            DeclKind::Message(message)
        })
        .labelled("message declaration")
}

fn job_decl() -> impl Parser<TokenKind, DeclKind, Error = PError> + Clone {
    #[derive(Clone)]
    enum Entry {
        Input(String),
        Needs(NeedsClause),
        Effect(String),
        Creates(CreatesClause),
    }

    let needs = keyword("needs")
        .ignore_then(ctrl(':'))
        .ignore_then(path())
        .then(keyword("filter").ignore_then(expr()).or_not())
        .map_with_span(|(path, filter), span| NeedsClause {
            path,
            filter,
            span: Some(span),
        });

    let mapping = ident_part()
        .then_ignore(ctrl(':'))
        .then(expr())
        .map_with_span(|(field, expr), span| FieldMapping {
            field,
            expr,
            span: Some(span),
        });

    let creates = keyword("creates")
        .ignore_then(ctrl(':'))
        .ignore_then(ident_part())
        .then(braces(mapping.repeated(), |_| vec![]))
        .map_with_span(|(entity, mappings), span| CreatesClause {
            entity,
            mappings,
            span: Some(span),
        });

    let entry = choice((
        keyword("input")
            .ignore_then(ctrl(':'))
            .ignore_then(ident_part())
            .map(Entry::Input),
        needs.map(Entry::Needs),
        keyword("effect")
            .ignore_then(ctrl(':'))
            .ignore_then(capability())
            .map(Entry::Effect),
        creates.map(Entry::Creates),
    ));

    keyword("job")
        .ignore_then(ident_part())
        .then(braces(entry.repeated(), |_| vec![]))
        .map(|(name, entries)| {
            let mut job = JobDecl {
                name,
                input: None,
                needs: None,
                effect: None,
                creates: None,
            };
            for entry in entries {
                match entry {
                    Entry::Input(input) => job.input = Some(input),
                    Entry::Needs(needs) => job.needs = Some(needs),
                    Entry::Effect(effect) => job.effect = Some(effect),
                    Entry::Creates(creates) => job.creates = Some(creates),
                }
            }
            DeclKind::Job(job)
        })
        .labelled("job declaration")
}

fn hook_decl() -> impl Parser<TokenKind, DeclKind, Error = PError> + Clone {
    let enqueue = keyword("enqueue")
        .ignore_then(ident_part())
        .map_with_span(|job, span| EnqueueCmd {
            job,
            span: Some(span),
        });

    keyword("hook")
        .ignore_then(event_path())
        .then(braces(enqueue.repeated(), |_| vec![]))
        .map(|((entity, event), enqueues)| {
            DeclKind::Hook(HookDecl {
                entity,
                event,
                enqueues,
            })
        })
        .labelled("hook declaration")
}

fn view_decl() -> impl Parser<TokenKind, DeclKind, Error = PError> + Clone {
    #[derive(Clone)]
    enum Entry {
        Source(String),
        Fields(Vec<FieldPath>),
        Filter(Expr),
        Realtime(bool),
    }

    let field_path = path().map_with_span(|parts, span| FieldPath {
        parts,
        span: Some(span),
    });

    let entry = choice((
        keyword("source")
            .ignore_then(ctrl(':'))
            .ignore_then(ident_part())
            .map(Entry::Source),
        keyword("fields")
            .ignore_then(ctrl(':'))
            .ignore_then(field_path.separated_by(ctrl(',')).at_least(1))
            .map(Entry::Fields),
        keyword("filter")
            .ignore_then(ctrl(':'))
            .ignore_then(expr())
            .map(Entry::Filter),
        word("realtime")
            .ignore_then(ctrl(':'))
            .ignore_then(boolean())
            .map(Entry::Realtime),
    ));

    keyword("view")
        .ignore_then(ident_part())
        .then(braces(entry.repeated(), |_| vec![]))
        .try_map(|(name, entries), span| {
            let mut source = None;
            let mut fields = Vec::new();
            let mut filter = None;
            let mut realtime = false;
            for entry in entries {
                match entry {
                    Entry::Source(s) => source = Some(s),
                    Entry::Fields(f) => fields.extend(f),
                    Entry::Filter(f) => filter = Some(f),
                    Entry::Realtime(r) => realtime = r,
                }
            }
            let Some(source) = source else {
                return Err(PError::custom(
                    span,
                    format!("view `{name}` must declare a source"),
                ));
            };
            if fields.is_empty() {
                return Err(PError::custom(
                    span,
                    format!("view `{name}` must project at least one field"),
                ));
            }
            Ok(DeclKind::View(ViewDecl {
                name,
                source,
                fields,
                filter,
                realtime,
            }))
        })
        .labelled("view declaration")
}

fn test_decl() -> impl Parser<TokenKind, DeclKind, Error = PError> + Clone {
    #[derive(Clone)]
    enum Entry {
        Given(GivenBinding),
        When(String),
        Expect(ExpectClause),
    }

    let given = word("given")
        .ignore_then(path())
        .then_ignore(ctrl('='))
        .then(expr())
        .map_with_span(|(path, value), span| GivenBinding {
            path,
            value,
            span: Some(span),
        });

    let expect = word("expect").ignore_then(choice((
        word("accept").to(ExpectClause::Accept),
        word("reject").ignore_then(ident_part()).map(ExpectClause::Reject),
        word("emits").ignore_then(ident_part()).map(ExpectClause::Emits),
    )));

    let entry = choice((
        given.map(Entry::Given),
        word("when").ignore_then(ident_part()).map(Entry::When),
        expect.map(Entry::Expect),
    ));

    keyword("test")
        .ignore_then(event_path())
        .then(braces(entry.repeated(), |_| vec![]))
        .map(|((entity, event), entries)| {
            let mut test = TestDecl {
                entity,
                event,
                given: Vec::new(),
                when: None,
                expect: None,
            };
            for entry in entries {
                match entry {
                    Entry::Given(given) => test.given.push(given),
                    Entry::When(when) => test.when = Some(when),
                    Entry::Expect(expect) => test.expect = Some(expect),
                }
            }
            DeclKind::Test(test)
        })
        .labelled("test declaration")
}

fn presence_decl() -> impl Parser<TokenKind, DeclKind, Error = PError> + Clone {
    keyword("presence")
        .ignore_then(ident_part())
        .then(braces(app_option().repeated(), |_| vec![]))
        .map(|(name, options)| DeclKind::Presence(ChannelDecl { name, options }))
        .labelled("presence declaration")
}

fn ephemeral_decl() -> impl Parser<TokenKind, DeclKind, Error = PError> + Clone {
    keyword("ephemeral")
        .ignore_then(ident_part())
        .then(braces(app_option().repeated(), |_| vec![]))
        .map(|(name, options)| DeclKind::Ephemeral(ChannelDecl { name, options }))
        .labelled("ephemeral declaration")
}
