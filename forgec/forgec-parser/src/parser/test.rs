use chumsky::prelude::*;
use insta::assert_yaml_snapshot;

use super::ast::*;
use super::perror::{self, PError};
use crate::error::Diagnostic;
use crate::lexer::lr::TokenKind;
use crate::parse_source;

pub(crate) fn parse_with_parser<O>(
    source: &str,
    parser: impl Parser<TokenKind, O, Error = PError>,
) -> Result<O, Vec<Diagnostic>> {
    let tokens = crate::lexer::lexer().parse(source).map_err(|errors| {
        errors
            .into_iter()
            .map(|e| crate::convert_lexer_error(source, e, 0))
            .collect::<Vec<_>>()
    })?;

    let semantic_tokens: Vec<_> = tokens
        .into_iter()
        .filter(|token| !matches!(token.kind, TokenKind::Comment(_) | TokenKind::NewLine))
        .collect();

    let stream = super::prepare_stream(&semantic_tokens, 0);
    parser
        .then_ignore(end())
        .parse(stream)
        .map_err(|errors| errors.into_iter().map(perror::convert).collect())
}

fn parse_single(source: &str) -> Decl {
    let (decls, diagnostics) = parse_source(source, 0);
    assert!(diagnostics.is_empty(), "unexpected: {diagnostics:?}");
    assert_eq!(decls.len(), 1);
    decls.into_iter().next().unwrap()
}

#[test]
fn test_relation_decl() {
    assert_yaml_snapshot!(parse_single("relation Ticket.author -> User"), @r###"
    ---
    Relation:
      owner: Ticket
      field: author
      target: User
      many: false
    span: "0:0-30"
    "###);

    let decl = parse_single("relation Org.members -> User many inverse orgs");
    let relation = decl.kind.as_relation().unwrap();
    assert!(relation.many);
    assert_eq!(relation.inverse.as_deref(), Some("orgs"));
}

#[test]
fn test_app_decl() {
    let decl = parse_single(
        r#"
        app TicketFlow {
            auth: token
            database: postgres
            title: "Ticket Flow"
        }
        "#,
    );
    let app = decl.kind.as_app().unwrap();
    assert_eq!(app.name, "TicketFlow");
    assert_eq!(app.options.len(), 3);
    assert_eq!(app.options[0].key, "auth");
    assert_eq!(
        app.options[0].value,
        OptionValue::Name("token".to_string())
    );
}

#[test]
fn test_entity_decl() {
    let decl = parse_single(
        r#"
        entity Ticket {
            subject: string length <= 200
            body: string optional
            status: enum(open, triaged, closed) = open
            owner: ref(User)
            tags: list<string>
            votes: int = 0
        }
        "#,
    );
    let entity = decl.kind.as_entity().unwrap();
    assert_eq!(entity.name, "Ticket");
    assert_eq!(entity.fields.len(), 6);

    assert_eq!(entity.fields[0].constraints, vec![Constraint::MaxLength(200)]);
    assert_eq!(entity.fields[1].constraints, vec![Constraint::Optional]);
    assert_eq!(
        entity.fields[2].default,
        Some(OptionValue::Name("open".to_string()))
    );
    assert_eq!(
        entity.fields[3].ty.kind,
        TyKind::Ref("User".to_string())
    );
    assert!(matches!(entity.fields[4].ty.kind, TyKind::List(_)));
}

#[test]
fn test_rule_decl() {
    let decl = parse_single(
        r#"
        rule Ticket.update {
            forbid if status == closed and not user.is_admin emit TICKET_LOCKED
            require if source.status == open
            allow
        }
        "#,
    );
    let rule = decl.kind.as_rule().unwrap();
    assert_eq!(rule.entity, "Ticket");
    assert_eq!(rule.event, "update");
    assert_eq!(rule.clauses.len(), 3);

    let forbid = &rule.clauses[0];
    assert_eq!(forbid.action, RuleAction::Forbid);
    assert_eq!(forbid.emit.as_deref(), Some("TICKET_LOCKED"));
    let guard = forbid.guard.as_ref().unwrap();
    // `and` binds both comparisons: (status == closed) and (not user.is_admin)
    let binary = guard.kind.as_binary().unwrap();
    assert_eq!(binary.op, BinOp::And);
    assert!(matches!(
        binary.right.kind,
        ExprKind::Unary(UnaryExpr { op: UnOp::Not, .. })
    ));

    assert_eq!(rule.clauses[2].action, RuleAction::Allow);
    assert!(rule.clauses[2].guard.is_none());
}

#[test]
fn test_access_decl() {
    let decl = parse_single(
        r#"
        access Ticket {
            read: user.id == author.id or user.is_admin
            write: user.id == author.id
            delete: false
        }
        "#,
    );
    let access = decl.kind.as_access().unwrap();
    assert_eq!(access.entity, "Ticket");
    assert_eq!(access.clauses.len(), 3);
    assert_eq!(access.clauses[0].op, "read");
    assert_eq!(
        access.clauses[0].predicate.kind.as_binary().unwrap().op,
        BinOp::Or
    );
}

#[test]
fn test_view_decl() {
    let decl = parse_single(
        r#"
        view TicketList {
            source: Ticket
            fields: id, subject, author.name, status
            filter: status != closed
            realtime: true
        }
        "#,
    );
    let view = decl.kind.as_view().unwrap();
    assert_eq!(view.source, "Ticket");
    assert_eq!(view.fields.len(), 4);
    assert_eq!(view.fields[2].parts, vec!["author", "name"]);
    assert!(view.realtime);
    assert!(view.filter.is_some());

    // A view without a source is rejected.
    let (_, diagnostics) = parse_source("view Broken { fields: id }", 0);
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].code.unwrap().starts_with("E02"));
}

#[test]
fn test_job_and_hook_decl() {
    let decl = parse_single(
        r#"
        job log_activity {
            input: Ticket
            needs: author.orgs.members filter active == true
            effect: email.send
            creates: AuditLog {
                action: "ticket_created"
                description: data.subject
                entity_id: data.id
            }
        }
        "#,
    );
    let job = decl.kind.as_job().unwrap();
    assert_eq!(job.input.as_deref(), Some("Ticket"));
    let needs = job.needs.as_ref().unwrap();
    assert_eq!(needs.path, vec!["author", "orgs", "members"]);
    assert!(needs.filter.is_some());
    assert_eq!(job.effect.as_deref(), Some("email.send"));
    let creates = job.creates.as_ref().unwrap();
    assert_eq!(creates.entity, "AuditLog");
    assert_eq!(creates.mappings.len(), 3);
    assert_eq!(creates.mappings[1].field, "description");
    assert_eq!(
        creates.mappings[1].expr.as_path().unwrap(),
        vec!["data", "subject"]
    );

    let decl = parse_single("hook Ticket.after_create { enqueue log_activity }");
    let hook = decl.kind.as_hook().unwrap();
    assert_eq!(hook.event, "after_create");
    assert_eq!(hook.enqueues.len(), 1);
    assert_eq!(hook.enqueues[0].job, "log_activity");
}

#[test]
fn test_message_decl() {
    let decl = parse_single(
        r#"
        message TICKET_LOCKED {
            level: error
            default: "This ticket is locked."
        }
        "#,
    );
    let message = decl.kind.as_message().unwrap();
    assert_eq!(message.name, "TICKET_LOCKED");
    assert_eq!(message.level.as_deref(), Some("error"));
    assert_eq!(message.default.as_deref(), Some("This ticket is locked."));
    assert!(message.template.is_none());
}

#[test]
fn test_test_decl() {
    let decl = parse_single(
        r#"
        test Ticket.update {
            given status = open
            given user.is_admin = false
            when update
            expect reject TICKET_LOCKED
        }
        "#,
    );
    let test = decl.kind.as_test().unwrap();
    assert_eq!(test.given.len(), 2);
    assert_eq!(test.given[1].path, vec!["user", "is_admin"]);
    assert_eq!(test.when.as_deref(), Some("update"));
    assert_eq!(
        test.expect,
        Some(ExpectClause::Reject("TICKET_LOCKED".to_string()))
    );
}

#[test]
fn test_presence_and_ephemeral() {
    let decl = parse_single("presence TicketPresence { source: Ticket }");
    assert!(decl.kind.is_presence());

    let decl = parse_single("ephemeral Typing { channel: tickets }");
    assert!(decl.kind.is_ephemeral());
}

#[test]
fn test_reserved_declarations() {
    let (decls, diagnostics) = parse_source("imperative Thing { }", 0);
    assert!(decls.is_empty());
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code, Some("E0207"));
}

#[test]
fn test_recovery_resumes_at_next_declaration() {
    let (decls, diagnostics) = parse_source(
        r#"
        app Broken { auth token }
        entity User { email: string unique }
        "#,
        0,
    );
    // The app declaration is broken (missing colon), the entity still parses.
    assert!(!diagnostics.is_empty());
    assert!(diagnostics.iter().all(|d| {
        d.code
            .map(|c| c.starts_with("E02"))
            .unwrap_or(false)
    }));
    assert!(decls.iter().any(|d| d.kind.is_entity()));
}

#[test]
fn test_duplicate_field() {
    let (decls, diagnostics) = parse_source(
        "entity User { email: string email: string }",
        0,
    );
    assert_eq!(decls.len(), 1);
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code, Some("E0208"));
    assert_eq!(diagnostics[0].related.len(), 1);
}

#[test]
fn test_expression_precedence() {
    let expr = parse_with_parser("a or b and not c == d", super::expr::expr()).unwrap();
    // or(a, and(b, not(c == d)))
    let or = expr.kind.as_binary().unwrap();
    assert_eq!(or.op, BinOp::Or);
    let and = or.right.kind.as_binary().unwrap();
    assert_eq!(and.op, BinOp::And);
    let not = and.right.kind.as_unary().unwrap();
    assert_eq!(not.op, UnOp::Not);
    assert_eq!(not.expr.kind.as_binary().unwrap().op, BinOp::Eq);

    let expr = parse_with_parser("1 + 2 * 3", super::expr::expr()).unwrap();
    let add = expr.kind.as_binary().unwrap();
    assert_eq!(add.op, BinOp::Add);
    assert_eq!(add.right.kind.as_binary().unwrap().op, BinOp::Mul);

    let expr = parse_with_parser("user in org.members.user", super::expr::expr()).unwrap();
    assert_eq!(expr.kind.as_binary().unwrap().op, BinOp::In);

    let expr = parse_with_parser("members.any(active)", super::expr::expr()).unwrap();
    let call = expr.kind.as_call().unwrap();
    assert_eq!(call.1.len(), 1);
}
