//! Pass 2 of the analyzer: resolve references through binding frames, check
//! expression types, detect reference cycles, and surface unused-symbol
//! warnings.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use forgec_parser::error::{
    Diagnostic, Diagnostics, Reason, TextEdit, WithDiagnosticInfo,
};
use forgec_parser::lexer::lr::Literal;
use forgec_parser::parser::ast::{
    BinOp, Decl, DeclKind, Expr, ExprKind, FieldPath, OptionValue, PrimitiveType, RuleAction,
    RuleDecl, TyKind,
};
use forgec_parser::span::Span;

use super::scope::Scope;
use crate::ir::model::{AuthMode, DatabaseKind, EventKind, MessageLevel};

/// Inferred expression type.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Ty {
    Primitive(PrimitiveType),
    Enum(Vec<String>),
    /// A row of the named entity.
    Record(String),
    /// The result of following a `many` relation.
    Collection(Box<Ty>),
    Null,
    /// `user` and `param` projections, typed at request time.
    Opaque,
    /// Poisoned by an earlier diagnostic; suppresses cascades.
    Unknown,
}

impl Ty {
    fn bool() -> Ty {
        Ty::Primitive(PrimitiveType::Bool)
    }

    fn is_boolish(&self) -> bool {
        matches!(
            self,
            Ty::Primitive(PrimitiveType::Bool) | Ty::Opaque | Ty::Unknown
        )
    }

    fn is_orderable(&self) -> bool {
        matches!(
            self,
            Ty::Primitive(
                PrimitiveType::Int
                    | PrimitiveType::Float
                    | PrimitiveType::String
                    | PrimitiveType::Time
            ) | Ty::Opaque
                | Ty::Unknown
        )
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            Ty::Primitive(PrimitiveType::Int | PrimitiveType::Float) | Ty::Opaque | Ty::Unknown
        )
    }
}

impl std::fmt::Display for Ty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ty::Primitive(p) => write!(f, "{p}"),
            Ty::Enum(variants) => write!(f, "enum({})", variants.join(", ")),
            Ty::Record(entity) => write!(f, "{entity}"),
            Ty::Collection(elem) => write!(f, "collection of {elem}"),
            Ty::Null => f.write_str("null"),
            Ty::Opaque => f.write_str("request-bound value"),
            Ty::Unknown => f.write_str("unknown"),
        }
    }
}

/// An environment of binding frames threaded through expression resolution.
struct Env<'a> {
    /// Fields of this entity resolve as bare identifiers.
    entity: Option<&'a str>,
    bindings: Vec<(&'static str, Ty)>,
}

impl<'a> Env<'a> {
    fn lookup(&self, name: &str) -> Option<&Ty> {
        self.bindings
            .iter()
            .find(|(binding, _)| *binding == name)
            .map(|(_, ty)| ty)
    }
}

pub(super) fn resolve(decls: &[Decl], scope: &Scope, diagnostics: &mut Diagnostics) {
    let mut resolver = Resolver {
        scope,
        diagnostics,
        used_entities: HashSet::new(),
        used_fields: HashSet::new(),
        used_relations: HashSet::new(),
        used_actions: HashSet::new(),
        used_messages: HashSet::new(),
    };

    for decl in decls {
        resolver.resolve_decl(decl);
    }
    resolver.check_reference_cycles(decls);
    resolver.report_unused(decls);
}

struct Resolver<'a> {
    scope: &'a Scope,
    diagnostics: &'a mut Diagnostics,
    used_entities: HashSet<String>,
    used_fields: HashSet<(String, String)>,
    used_relations: HashSet<String>,
    used_actions: HashSet<String>,
    used_messages: HashSet<String>,
}

impl<'a> Resolver<'a> {
    fn resolve_decl(&mut self, decl: &Decl) {
        match &decl.kind {
            DeclKind::App(app) => self.resolve_app(app),
            DeclKind::Entity(entity) => self.resolve_entity(entity),
            DeclKind::Relation(relation) => self.resolve_relation(relation, decl.span),
            DeclKind::Rule(rule) => self.resolve_rule(rule, decl.span),
            DeclKind::Access(access) => self.resolve_access(access, decl.span),
            DeclKind::Action(action) => self.resolve_action(action, decl.span),
            DeclKind::Message(message) => self.resolve_message(message, decl.span),
            DeclKind::Job(job) => self.resolve_job(job, decl.span),
            DeclKind::Hook(hook) => self.resolve_hook(hook, decl.span),
            DeclKind::View(view) => self.resolve_view(view, decl.span),
            DeclKind::Test(test) => self.resolve_test(test, decl.span),
            // Presence and ephemeral transport is an external concern.
            DeclKind::Presence(_) | DeclKind::Ephemeral(_) => {}
        }
    }

    fn resolve_app(&mut self, app: &forgec_parser::parser::ast::AppDecl) {
        for option in &app.options {
            match option.key.as_str() {
                "auth" => {
                    let valid = matches!(&option.value, OptionValue::Name(v)
                        if AuthMode::from_str(v).is_ok());
                    if !valid {
                        self.error(
                            "E0312",
                            "`auth` must be one of token, session or none",
                            option.span,
                        );
                    }
                }
                "database" => {
                    let valid = matches!(&option.value, OptionValue::Name(v)
                        if DatabaseKind::from_str(v).is_ok());
                    if !valid {
                        self.error(
                            "E0312",
                            "`database` must be one of postgres, sqlite or memory",
                            option.span,
                        );
                    }
                }
                _ => {}
            }
        }
    }

    fn resolve_entity(&mut self, entity: &forgec_parser::parser::ast::EntityDecl) {
        for field in &entity.fields {
            self.check_field_type(&field.ty.kind, field.span);

            let has_length = field.constraints.iter().any(|c| {
                matches!(
                    c,
                    forgec_parser::parser::ast::Constraint::MaxLength(_)
                        | forgec_parser::parser::ast::Constraint::MinLength(_)
                )
            });
            if has_length && !matches!(field.ty.kind, TyKind::Primitive(PrimitiveType::String)) {
                self.error(
                    "E0312",
                    format!("`length` constraints only apply to string fields, found {}", field.ty.kind),
                    field.span,
                );
            }

            if let Some(default) = &field.default {
                self.check_field_default(&entity.name, &field.name, &field.ty.kind, default, field.span);
            }
        }
    }

    fn check_field_type(&mut self, ty: &TyKind, span: Option<Span>) {
        match ty {
            TyKind::Ref(target) => {
                if self.scope.entity(target).is_none() {
                    self.not_found("E0301", "entity", target, span);
                } else {
                    self.used_entities.insert(target.clone());
                }
            }
            TyKind::List(inner) => self.check_field_type(&inner.kind, span),
            _ => {}
        }
    }

    fn check_field_default(
        &mut self,
        entity: &str,
        field: &str,
        ty: &TyKind,
        default: &OptionValue,
        span: Option<Span>,
    ) {
        let ok = match (ty, default) {
            (TyKind::Enum(variants), OptionValue::Name(v)) => variants.contains(v),
            (TyKind::Enum(_), _) => false,
            (_, OptionValue::Name(_)) => false,
            (kind, OptionValue::Literal(lit)) => matches!(
                (kind, lit),
                (TyKind::Primitive(PrimitiveType::String), Literal::String(_))
                    | (TyKind::Primitive(PrimitiveType::Int), Literal::Integer(_))
                    | (TyKind::Primitive(PrimitiveType::Float), Literal::Float(_))
                    | (TyKind::Primitive(PrimitiveType::Float), Literal::Integer(_))
                    | (TyKind::Primitive(PrimitiveType::Bool), Literal::Boolean(_))
                    | (_, Literal::Null)
            ),
        };
        if !ok {
            self.error(
                "E0312",
                format!("default value does not match the type of `{entity}.{field}`"),
                span,
            );
        }
    }

    fn resolve_relation(
        &mut self,
        relation: &forgec_parser::parser::ast::RelationDecl,
        span: Option<Span>,
    ) {
        let owner_known = self.scope.entity(&relation.owner).is_some();
        if !owner_known {
            self.not_found("E0301", "entity", &relation.owner, span);
        }
        if self.scope.entity(&relation.target).is_none() {
            self.not_found("E0301", "entity", &relation.target, span);
        } else {
            self.used_entities.insert(relation.target.clone());
        }

        // A relation may shadow a field only if that field is the matching ref.
        if let Some(owner) = self.scope.entity(&relation.owner) {
            if let Some(field) = owner.fields.get(&relation.field) {
                let matches_ref = matches!(&field.ty.kind, TyKind::Ref(t) if *t == relation.target)
                    && !relation.many;
                if !matches_ref {
                    let mut diagnostic = Diagnostic::error_simple(format!(
                        "relation `{}.{}` conflicts with a field of the same name",
                        relation.owner, relation.field
                    ))
                    .with_code("E0310")
                    .with_span(span);
                    if let Some(field_span) = field.span {
                        diagnostic = diagnostic.with_related(field_span, "field declared here");
                    }
                    self.diagnostics.push(diagnostic);
                }
            }
        }
    }

    fn resolve_rule(&mut self, rule: &RuleDecl, span: Option<Span>) {
        if self.scope.entity(&rule.entity).is_none() {
            self.not_found("E0301", "entity", &rule.entity, span);
            return;
        }
        self.used_entities.insert(rule.entity.clone());

        if EventKind::from_str(&rule.event).is_err() {
            self.error(
                "E0401",
                format!(
                    "invalid rule event `{}`; expected create, update or delete",
                    rule.event
                ),
                span,
            );
        }

        let env = Env {
            entity: Some(&rule.entity),
            bindings: vec![
                ("user", Ty::Opaque),
                ("source", Ty::Record(rule.entity.clone())),
            ],
        };

        let mut unconditional: Option<&forgec_parser::parser::ast::RuleClause> = None;
        for clause in &rule.clauses {
            if let Some(terminal) = unconditional {
                let mut diagnostic = Diagnostic::error_simple(
                    "unreachable rule clause: an unconditional clause precedes it",
                )
                .with_code("E0403")
                .with_span(clause.span);
                if let Some(terminal_span) = terminal.span {
                    diagnostic =
                        diagnostic.with_related(terminal_span, "unconditional clause here");
                }
                self.diagnostics.push(diagnostic);
                break;
            }

            if let Some(guard) = &clause.guard {
                let ty = self.resolve_expr(guard, &env);
                self.expect_bool(&ty, "rule guard", guard.span);
            }

            if let Some(message) = &clause.emit {
                if self.scope.messages.contains_key(message) {
                    self.used_messages.insert(message.clone());
                } else {
                    self.not_found("E0305", "message", message, clause.span);
                }
                if clause.action == RuleAction::Allow {
                    self.error(
                        "E0402",
                        "`emit` is only meaningful on forbid and require clauses",
                        clause.span,
                    );
                }
            }

            if clause.guard.is_none()
                && matches!(clause.action, RuleAction::Allow | RuleAction::Forbid)
            {
                unconditional = Some(clause);
            }
        }
    }

    fn resolve_access(
        &mut self,
        access: &forgec_parser::parser::ast::AccessDecl,
        span: Option<Span>,
    ) {
        if self.scope.entity(&access.entity).is_none() {
            self.not_found("E0301", "entity", &access.entity, span);
            return;
        }
        self.used_entities.insert(access.entity.clone());

        const OPS: &[&str] = &["read", "write", "create", "update", "delete"];

        let env = Env {
            entity: Some(&access.entity),
            bindings: vec![
                ("user", Ty::Opaque),
                ("source", Ty::Record(access.entity.clone())),
            ],
        };

        for clause in &access.clauses {
            if !OPS.contains(&clause.op.as_str()) {
                self.not_found("E0501", "access operation", &clause.op, clause.span);
                continue;
            }
            let ty = self.resolve_expr(&clause.predicate, &env);
            if !ty.is_boolish() {
                self.error(
                    "E0502",
                    format!("access predicate must be boolean, found {ty}"),
                    clause.predicate.span.or(clause.span),
                );
            }
        }
    }

    fn resolve_action(
        &mut self,
        action: &forgec_parser::parser::ast::ActionDecl,
        span: Option<Span>,
    ) {
        if let Some(input) = &action.input {
            if self.scope.entity(input).is_none() {
                self.not_found("E0301", "entity", input, span);
            } else {
                self.used_entities.insert(input.clone());
            }
        }

        if let Some(body) = &action.body {
            let mut bindings = vec![("user", Ty::Opaque)];
            if let Some(input) = &action.input {
                bindings.push(("data", Ty::Record(input.clone())));
            }
            let env = Env {
                entity: action.input.as_deref(),
                bindings,
            };
            self.resolve_expr(body, &env);
        }
    }

    fn resolve_message(
        &mut self,
        message: &forgec_parser::parser::ast::MessageDecl,
        span: Option<Span>,
    ) {
        if let Some(level) = &message.level {
            if MessageLevel::from_str(level).is_err() {
                self.error(
                    "E0312",
                    format!("message level must be info, warning or error, found `{level}`"),
                    span,
                );
            }
        }

        let upper = message.name.to_uppercase();
        if message.name != upper {
            let mut edits = Vec::new();
            if let Some(name_span) = message.name_span {
                edits.push(TextEdit {
                    span: name_span,
                    new_text: upper.clone(),
                });
            }
            self.diagnostics.add_with_fix(
                "H0101",
                "message identifiers are written in UPPER_SNAKE_CASE",
                message.name_span.or(span),
                format!("rename to `{upper}`"),
                edits,
            );
        }
    }

    fn resolve_job(&mut self, job: &forgec_parser::parser::ast::JobDecl, span: Option<Span>) {
        let input_known = match &job.input {
            Some(input) => {
                if self.scope.entity(input).is_none() {
                    self.not_found("E0301", "entity", input, span);
                    false
                } else {
                    self.used_entities.insert(input.clone());
                    true
                }
            }
            None => false,
        };

        if let Some(needs) = &job.needs {
            if !input_known {
                self.error(
                    "E0313",
                    "`needs` requires an input entity to start the traversal from",
                    needs.span.or(span),
                );
            } else {
                let mut current = job.input.clone().unwrap();
                let mut valid = true;
                for step in &needs.path {
                    let Some(relation) = self.scope.relation(&current, step) else {
                        self.not_found(
                            "E0303",
                            &format!("relation of `{current}`"),
                            step,
                            needs.span,
                        );
                        valid = false;
                        break;
                    };
                    self.used_relations.insert(format!("{current}.{step}"));
                    current = relation.target.clone();
                }

                if valid {
                    if let Some(filter) = &needs.filter {
                        let env = Env {
                            entity: Some(&current),
                            bindings: vec![
                                ("data", Ty::Record(job.input.clone().unwrap())),
                            ],
                        };
                        let ty = self.resolve_expr(filter, &env);
                        self.expect_bool(&ty, "needs filter", filter.span);
                    }
                }
            }
        }

        if let Some(creates) = &job.creates {
            if self.scope.entity(&creates.entity).is_none() {
                self.not_found("E0301", "entity", &creates.entity, creates.span.or(span));
                return;
            }
            self.used_entities.insert(creates.entity.clone());

            let env = Env {
                entity: None,
                bindings: match &job.input {
                    Some(input) if input_known => {
                        vec![("data", Ty::Record(input.clone()))]
                    }
                    _ => vec![("data", Ty::Opaque)],
                },
            };

            for mapping in &creates.mappings {
                let Some(field_ty) = self.field_ty(&creates.entity, &mapping.field) else {
                    self.not_found(
                        "E0302",
                        &format!("field of `{}`", creates.entity),
                        &mapping.field,
                        mapping.span,
                    );
                    continue;
                };
                self.used_fields
                    .insert((creates.entity.clone(), mapping.field.clone()));

                // Bare enum variants are allowed where the target field is an
                // enum.
                if let Ty::Enum(variants) = &field_ty {
                    if let ExprKind::Ident(name) = &mapping.expr.kind {
                        if variants.contains(name) {
                            continue;
                        }
                    }
                }

                let ty = self.resolve_expr(&mapping.expr, &env);
                if !compatible(&ty, &field_ty) {
                    self.error(
                        "E0312",
                        format!(
                            "mapping for `{}.{}` has type {ty}, expected {field_ty}",
                            creates.entity, mapping.field
                        ),
                        mapping.span,
                    );
                }
            }
        }
    }

    fn resolve_hook(&mut self, hook: &forgec_parser::parser::ast::HookDecl, span: Option<Span>) {
        if self.scope.entity(&hook.entity).is_none() {
            self.not_found("E0301", "entity", &hook.entity, span);
            return;
        }
        self.used_entities.insert(hook.entity.clone());

        let valid_event = hook
            .event
            .strip_prefix("before_")
            .or_else(|| hook.event.strip_prefix("after_"))
            .map_or(false, |rest| EventKind::from_str(rest).is_ok());
        if !valid_event {
            self.error(
                "E0401",
                format!(
                    "invalid hook event `{}`; expected before_/after_ create, update or delete",
                    hook.event
                ),
                span,
            );
        }

        for enqueue in &hook.enqueues {
            let Some(job) = self.scope.jobs.get(&enqueue.job) else {
                self.not_found("E0306", "job", &enqueue.job, enqueue.span);
                continue;
            };
            if let Some(input) = &job.input {
                if *input != hook.entity {
                    self.error(
                        "E0312",
                        format!(
                            "job `{}` expects input `{input}`, but this hook is on `{}`",
                            enqueue.job, hook.entity
                        ),
                        enqueue.span,
                    );
                }
            }
        }
    }

    fn resolve_view(&mut self, view: &forgec_parser::parser::ast::ViewDecl, span: Option<Span>) {
        if self.scope.entity(&view.source).is_none() {
            self.not_found("E0301", "entity", &view.source, span);
            return;
        }
        self.used_entities.insert(view.source.clone());

        for field in &view.fields {
            self.resolve_view_path(&view.source, field);
        }

        if let Some(filter) = &view.filter {
            let env = Env {
                entity: Some(&view.source),
                bindings: vec![("user", Ty::Opaque), ("param", Ty::Opaque)],
            };
            let ty = self.resolve_expr(filter, &env);
            self.expect_bool(&ty, "view filter", filter.span);
        }
    }

    /// View paths walk fields and `one` relations and must end at a scalar.
    fn resolve_view_path(&mut self, source: &str, path: &FieldPath) {
        let mut current = source.to_string();
        for (i, step) in path.parts.iter().enumerate() {
            let last = i + 1 == path.parts.len();

            if let Some(ty) = self.field_ty(&current, step) {
                self.used_fields.insert((current.clone(), step.clone()));
                match ty {
                    Ty::Record(next) => {
                        self.used_relations.insert(format!("{current}.{step}"));
                        if last {
                            self.error(
                                "E0313",
                                format!("view field `{}` must end at a scalar field", path.parts.join(".")),
                                path.span,
                            );
                            return;
                        }
                        current = next;
                    }
                    _ if last => return,
                    _ => {
                        self.error(
                            "E0313",
                            format!("cannot project through scalar field `{step}`"),
                            path.span,
                        );
                        return;
                    }
                }
            } else if let Some(relation) = self.scope.relation(&current, step) {
                if relation.many {
                    self.error(
                        "E0313",
                        format!(
                            "view field `{}` traverses the `many` relation `{current}.{step}`",
                            path.parts.join(".")
                        ),
                        path.span,
                    );
                    return;
                }
                self.used_relations.insert(format!("{current}.{step}"));
                let target = relation.target.clone();
                if last {
                    self.error(
                        "E0313",
                        format!("view field `{}` must end at a scalar field", path.parts.join(".")),
                        path.span,
                    );
                    return;
                }
                current = target;
            } else {
                self.not_found("E0302", &format!("field of `{current}`"), step, path.span);
                return;
            }
        }
    }

    fn resolve_test(&mut self, test: &forgec_parser::parser::ast::TestDecl, span: Option<Span>) {
        if self.scope.entity(&test.entity).is_none() {
            self.not_found("E0301", "entity", &test.entity, span);
            return;
        }
        self.used_entities.insert(test.entity.clone());

        if EventKind::from_str(&test.event).is_err() {
            self.error(
                "E0401",
                format!(
                    "invalid test event `{}`; expected create, update or delete",
                    test.event
                ),
                span,
            );
        }

        if let Some(when) = &test.when {
            if EventKind::from_str(when).is_err() {
                if self.scope.actions.contains_key(when) {
                    self.used_actions.insert(when.clone());
                } else {
                    self.not_found("E0304", "action", when, span);
                }
            }
        }

        let env = Env {
            entity: Some(&test.entity),
            bindings: vec![("user", Ty::Opaque)],
        };
        for given in &test.given {
            let first = &given.path[0];
            let bound_ty = if first == "user" {
                Ty::Opaque
            } else if let Some(ty) = self.field_ty(&test.entity, first) {
                self.used_fields.insert((test.entity.clone(), first.clone()));
                ty
            } else {
                self.not_found(
                    "E0302",
                    &format!("field of `{}`", test.entity),
                    first,
                    given.span,
                );
                continue;
            };

            if let Ty::Enum(variants) = &bound_ty {
                if let ExprKind::Ident(name) = &given.value.kind {
                    if variants.contains(name) {
                        continue;
                    }
                }
            }
            self.resolve_expr(&given.value, &env);
        }

        match &test.expect {
            Some(
                forgec_parser::parser::ast::ExpectClause::Reject(message)
                | forgec_parser::parser::ast::ExpectClause::Emits(message),
            ) => {
                if self.scope.messages.contains_key(message) {
                    self.used_messages.insert(message.clone());
                } else {
                    self.not_found("E0305", "message", message, span);
                }
            }
            _ => {}
        }
    }

    // ---- expressions ----

    fn resolve_expr(&mut self, expr: &Expr, env: &Env) -> Ty {
        match &expr.kind {
            ExprKind::Literal(lit) => literal_ty(lit),
            ExprKind::Ident(name) => self.resolve_ident(name, env, expr.span),
            ExprKind::Path { base, name } => {
                let base_ty = self.resolve_expr(base, env);
                self.step(&base_ty, name, expr.span)
            }
            ExprKind::Call { callee, args } => self.resolve_call(callee, args, env, expr.span),
            ExprKind::Unary(unary) => {
                let ty = self.resolve_expr(&unary.expr, env);
                match unary.op {
                    forgec_parser::parser::ast::UnOp::Not => {
                        self.expect_bool(&ty, "operand of `not`", unary.expr.span);
                        Ty::bool()
                    }
                    forgec_parser::parser::ast::UnOp::Neg => {
                        if !ty.is_numeric() {
                            self.error(
                                "E0312",
                                format!("cannot negate {ty}"),
                                unary.expr.span,
                            );
                            return Ty::Unknown;
                        }
                        ty
                    }
                }
            }
            ExprKind::Binary(binary) => self.resolve_binary(binary, env, expr.span),
        }
    }

    fn resolve_ident(&mut self, name: &str, env: &Env, span: Option<Span>) -> Ty {
        if let Some(ty) = env.lookup(name) {
            return ty.clone();
        }

        if let Some(entity) = env.entity {
            if let Some(ty) = self.field_ty(entity, name) {
                self.used_fields.insert((entity.to_string(), name.to_string()));
                return ty;
            }
            if let Some(relation) = self.scope.relation(entity, name) {
                self.used_relations.insert(format!("{entity}.{name}"));
                let record = Ty::Record(relation.target.clone());
                return if relation.many {
                    Ty::Collection(Box::new(record))
                } else {
                    record
                };
            }
        }

        if self.scope.entities.contains_key(name) {
            self.used_entities.insert(name.to_string());
            return Ty::Record(name.to_string());
        }

        let namespace = match env.entity {
            Some(entity) => format!("field of `{entity}`"),
            None => "name".to_string(),
        };
        self.not_found("E0302", &namespace, name, span);
        Ty::Unknown
    }

    /// Step a dotted path one segment.
    fn step(&mut self, base: &Ty, name: &str, span: Option<Span>) -> Ty {
        match base {
            Ty::Record(entity) => {
                if let Some(ty) = self.field_ty(entity, name) {
                    self.used_fields.insert((entity.clone(), name.to_string()));
                    if matches!(ty, Ty::Record(_)) {
                        self.used_relations.insert(format!("{entity}.{name}"));
                    }
                    return ty;
                }
                if let Some(relation) = self.scope.relation(entity, name) {
                    self.used_relations.insert(format!("{entity}.{name}"));
                    let record = Ty::Record(relation.target.clone());
                    return if relation.many {
                        Ty::Collection(Box::new(record))
                    } else {
                        record
                    };
                }
                self.not_found("E0302", &format!("field of `{entity}`"), name, span);
                Ty::Unknown
            }
            Ty::Collection(elem) => {
                let inner = self.step(elem, name, span);
                match inner {
                    Ty::Unknown => Ty::Unknown,
                    Ty::Collection(_) => {
                        self.error(
                            "E0313",
                            "nested `many` traversals are not supported; use any/all/where",
                            span,
                        );
                        Ty::Unknown
                    }
                    other => Ty::Collection(Box::new(other)),
                }
            }
            Ty::Opaque => Ty::Opaque,
            Ty::Unknown => Ty::Unknown,
            other => {
                self.error("E0313", format!("cannot access `{name}` on {other}"), span);
                Ty::Unknown
            }
        }
    }

    fn resolve_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        env: &Env,
        span: Option<Span>,
    ) -> Ty {
        match &callee.kind {
            ExprKind::Ident(name) if name == "now" => {
                if !args.is_empty() {
                    self.error("E0312", "now() takes no arguments", span);
                }
                Ty::Primitive(PrimitiveType::Time)
            }
            ExprKind::Path { base, name }
                if matches!(name.as_str(), "any" | "all" | "count" | "where") =>
            {
                let base_ty = self.resolve_expr(base, env);
                let elem = match &base_ty {
                    Ty::Collection(elem) => elem.as_ref().clone(),
                    Ty::Opaque | Ty::Unknown => return Ty::Unknown,
                    other => {
                        self.error(
                            "E0313",
                            format!("`{name}` requires a `many` relation path, found {other}"),
                            span,
                        );
                        return Ty::Unknown;
                    }
                };

                match name.as_str() {
                    "count" => {
                        if !args.is_empty() {
                            self.error("E0312", "count() takes no arguments", span);
                        }
                        Ty::Primitive(PrimitiveType::Int)
                    }
                    _ => {
                        if args.len() != 1 {
                            self.error(
                                "E0312",
                                format!("`{name}` takes exactly one predicate argument"),
                                span,
                            );
                            return Ty::Unknown;
                        }
                        let elem_entity = match &elem {
                            Ty::Record(entity) => Some(entity.clone()),
                            _ => None,
                        };
                        let inner_env = Env {
                            entity: elem_entity.as_deref(),
                            bindings: env.bindings.clone(),
                        };
                        let pred_ty = self.resolve_expr(&args[0], &inner_env);
                        self.expect_bool(&pred_ty, "collection predicate", args[0].span);

                        if name == "where" {
                            Ty::Collection(Box::new(elem))
                        } else {
                            Ty::bool()
                        }
                    }
                }
            }
            _ => {
                self.error("E0313", "this expression cannot be called", span);
                Ty::Unknown
            }
        }
    }

    fn resolve_binary(
        &mut self,
        binary: &forgec_parser::parser::ast::BinaryExpr,
        env: &Env,
        span: Option<Span>,
    ) -> Ty {
        use BinOp::*;
        match binary.op {
            And | Or => {
                let left = self.resolve_expr(&binary.left, env);
                self.expect_bool(&left, "boolean operand", binary.left.span);
                let right = self.resolve_expr(&binary.right, env);
                self.expect_bool(&right, "boolean operand", binary.right.span);
                Ty::bool()
            }
            Eq | Ne => {
                // Bare enum variants compare against enum-typed expressions.
                if let Some(ty) = self.enum_comparison(&binary.left, &binary.right, env) {
                    return ty;
                }
                let left = self.resolve_expr(&binary.left, env);
                let right = self.resolve_expr(&binary.right, env);
                if !compatible(&left, &right) {
                    self.error(
                        "E0312",
                        format!("cannot compare {left} with {right}"),
                        span,
                    );
                }
                Ty::bool()
            }
            Lt | Lte | Gt | Gte => {
                let left = self.resolve_expr(&binary.left, env);
                let right = self.resolve_expr(&binary.right, env);
                if !left.is_orderable() || !right.is_orderable() || !compatible(&left, &right) {
                    self.error(
                        "E0312",
                        format!("cannot order {left} against {right}"),
                        span,
                    );
                }
                Ty::bool()
            }
            In => {
                let left = self.resolve_expr(&binary.left, env);
                let right = self.resolve_expr(&binary.right, env);
                match &right {
                    Ty::Collection(elem) => {
                        if !compatible(&left, elem) {
                            self.error(
                                "E0312",
                                format!("cannot look up {left} in a collection of {elem}"),
                                span,
                            );
                        }
                    }
                    Ty::Opaque | Ty::Unknown => {}
                    other => {
                        self.error(
                            "E0312",
                            format!("`in` requires a `many` relation path on the right, found {other}"),
                            span,
                        );
                    }
                }
                Ty::bool()
            }
            Add | Sub | Mul | Div | Mod => {
                let left = self.resolve_expr(&binary.left, env);
                let right = self.resolve_expr(&binary.right, env);
                if !left.is_numeric() || !right.is_numeric() {
                    self.error(
                        "E0312",
                        format!("arithmetic requires numbers, found {left} and {right}"),
                        span,
                    );
                    return Ty::Unknown;
                }
                if left == Ty::Primitive(PrimitiveType::Float)
                    || right == Ty::Primitive(PrimitiveType::Float)
                {
                    Ty::Primitive(PrimitiveType::Float)
                } else {
                    Ty::Primitive(PrimitiveType::Int)
                }
            }
        }
    }

    /// `status == open` where `open` is a variant of the enum on the other
    /// side. Returns Some(bool) when the comparison was handled here.
    fn enum_comparison(&mut self, left: &Expr, right: &Expr, env: &Env) -> Option<Ty> {
        if let ExprKind::Ident(variant) = &right.kind {
            if self.quiet_ty(right, env).is_none() {
                return self.check_variant_side(left, variant, right, env);
            }
        }
        if let ExprKind::Ident(variant) = &left.kind {
            if self.quiet_ty(left, env).is_none() {
                return self.check_variant_side(right, variant, left, env);
            }
        }
        None
    }

    fn check_variant_side(
        &mut self,
        value: &Expr,
        variant: &str,
        other: &Expr,
        env: &Env,
    ) -> Option<Ty> {
        let Some(Ty::Enum(variants)) = self.quiet_ty(value, env) else {
            return None;
        };
        // Resolve the enum side for real, for usage tracking.
        self.resolve_expr(value, env);
        if !variants.contains(&variant.to_string()) {
            self.error(
                "E0312",
                format!("no variant `{variant}` on {}", TyKind::Enum(variants)),
                other.span,
            );
        }
        Some(Ty::bool())
    }

    /// Resolve identifier paths without emitting diagnostics or recording
    /// usage. Returns None when the expression does not resolve.
    fn quiet_ty(&self, expr: &Expr, env: &Env) -> Option<Ty> {
        match &expr.kind {
            ExprKind::Ident(name) => {
                if let Some(ty) = env.lookup(name) {
                    return Some(ty.clone());
                }
                if let Some(entity) = env.entity {
                    if let Some(ty) = self.field_ty(entity, name) {
                        return Some(ty);
                    }
                    if let Some(relation) = self.scope.relation(entity, name) {
                        let record = Ty::Record(relation.target.clone());
                        return Some(if relation.many {
                            Ty::Collection(Box::new(record))
                        } else {
                            record
                        });
                    }
                }
                if self.scope.entities.contains_key(name) {
                    return Some(Ty::Record(name.to_string()));
                }
                None
            }
            ExprKind::Path { base, name } => {
                let base_ty = self.quiet_ty(base, env)?;
                match base_ty {
                    Ty::Record(entity) => self.field_ty(&entity, name).or_else(|| {
                        self.scope.relation(&entity, name).map(|relation| {
                            let record = Ty::Record(relation.target.clone());
                            if relation.many {
                                Ty::Collection(Box::new(record))
                            } else {
                                record
                            }
                        })
                    }),
                    Ty::Opaque => Some(Ty::Opaque),
                    _ => None,
                }
            }
            ExprKind::Literal(lit) => Some(literal_ty(lit)),
            _ => None,
        }
    }

    /// The type of a declared or implicit field, as seen by expressions.
    fn field_ty(&self, entity: &str, name: &str) -> Option<Ty> {
        if let Some(info) = self.scope.entity(entity) {
            if let Some(field) = info.fields.get(name) {
                return Some(ast_ty(&field.ty.kind));
            }
        }
        match name {
            "id" => Some(Ty::Primitive(PrimitiveType::Uuid)),
            "created_at" | "updated_at" => Some(Ty::Primitive(PrimitiveType::Time)),
            _ => None,
        }
    }

    // ---- whole-program checks ----

    /// Required (non-optional) `ref` fields must not form a cycle across
    /// entities.
    fn check_reference_cycles(&mut self, decls: &[Decl]) {
        let mut order = Vec::new();
        let mut edges: HashMap<&str, Vec<(&str, Option<Span>)>> = HashMap::new();
        for decl in decls {
            let DeclKind::Entity(entity) = &decl.kind else {
                continue;
            };
            if edges.contains_key(entity.name.as_str()) {
                continue;
            }
            order.push(entity.name.as_str());
            let mut targets = Vec::new();
            for field in &entity.fields {
                let TyKind::Ref(target) = &field.ty.kind else {
                    continue;
                };
                let optional = field
                    .constraints
                    .contains(&forgec_parser::parser::ast::Constraint::Optional);
                if !optional && *target != entity.name && self.scope.entity(target).is_some() {
                    targets.push((target.as_str(), field.span));
                }
            }
            edges.insert(entity.name.as_str(), targets);
        }

        // Depth-first with visiting marks; report the first cycle found.
        let mut state: HashMap<&str, u8> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();
        for start in &order {
            if self.visit_cycle(start, &edges, &mut state, &mut path) {
                return;
            }
        }
    }

    fn visit_cycle<'d>(
        &mut self,
        node: &'d str,
        edges: &HashMap<&'d str, Vec<(&'d str, Option<Span>)>>,
        state: &mut HashMap<&'d str, u8>,
        path: &mut Vec<&'d str>,
    ) -> bool {
        match state.get(node) {
            Some(2) => return false,
            Some(1) => {
                let cycle_start = path.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<&str> = path[cycle_start..].to_vec();
                cycle.push(node);
                let span = self.scope.entity(node).and_then(|e| e.span);
                self.error(
                    "E0314",
                    format!(
                        "circular dependency between required references: {}",
                        cycle.join(" -> ")
                    ),
                    span,
                );
                return true;
            }
            _ => {}
        }

        state.insert(node, 1);
        path.push(node);
        for (target, _) in edges.get(node).map(Vec::as_slice).unwrap_or_default() {
            if self.visit_cycle(target, edges, state, path) {
                return true;
            }
        }
        path.pop();
        state.insert(node, 2);
        false
    }

    fn report_unused(&mut self, decls: &[Decl]) {
        for decl in decls {
            match &decl.kind {
                DeclKind::Entity(entity) => {
                    if !self.used_entities.contains(&entity.name) {
                        self.diagnostics.add_warning(
                            "W0101",
                            format!("entity `{}` is never referenced", entity.name),
                            decl.span,
                        );
                    }
                    for field in &entity.fields {
                        let key = (entity.name.clone(), field.name.clone());
                        if !self.used_fields.contains(&key) {
                            self.diagnostics.add_warning(
                                "W0102",
                                format!("field `{}.{}` is never used", entity.name, field.name),
                                field.span,
                            );
                        }
                    }
                }
                DeclKind::Relation(relation) => {
                    let key = format!("{}.{}", relation.owner, relation.field);
                    if !self.used_relations.contains(&key) {
                        self.diagnostics.add_warning(
                            "W0103",
                            format!("relation `{key}` is never used"),
                            decl.span,
                        );
                    }
                }
                DeclKind::Action(action) => {
                    if !self.used_actions.contains(&action.name) {
                        self.diagnostics.add_warning(
                            "W0104",
                            format!("action `{}` is never referenced", action.name),
                            decl.span,
                        );
                    }
                }
                DeclKind::Message(message) => {
                    if !self.used_messages.contains(&message.name) {
                        self.diagnostics.add_warning(
                            "W0105",
                            format!("message `{}` is never emitted", message.name),
                            decl.span,
                        );
                    }
                }
                _ => {}
            }
        }
    }

    // ---- helpers ----

    fn expect_bool(&mut self, ty: &Ty, what: &str, span: Option<Span>) {
        if !ty.is_boolish() {
            self.error("E0312", format!("{what} must be boolean, found {ty}"), span);
        }
    }

    fn error<S: ToString>(&mut self, code: &'static str, message: S, span: Option<Span>) {
        self.diagnostics.add_error(code, message, span);
    }

    fn not_found(&mut self, code: &'static str, namespace: &str, name: &str, span: Option<Span>) {
        self.diagnostics.push(
            Diagnostic::error(Reason::NotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
            .with_code(code)
            .with_span(span),
        );
    }
}

fn literal_ty(lit: &Literal) -> Ty {
    match lit {
        Literal::Null => Ty::Null,
        Literal::Integer(_) => Ty::Primitive(PrimitiveType::Int),
        Literal::Float(_) => Ty::Primitive(PrimitiveType::Float),
        Literal::Boolean(_) => Ty::Primitive(PrimitiveType::Bool),
        Literal::String(_) => Ty::Primitive(PrimitiveType::String),
    }
}

/// The expression-level type of a declared field.
fn ast_ty(kind: &TyKind) -> Ty {
    match kind {
        TyKind::Primitive(p) => Ty::Primitive(*p),
        TyKind::Enum(variants) => Ty::Enum(variants.clone()),
        TyKind::Ref(entity) => Ty::Record(entity.clone()),
        TyKind::List(inner) => Ty::Collection(Box::new(ast_ty(&inner.kind))),
    }
}

/// Loose compatibility for comparisons and mappings; request-bound values and
/// null compare with anything.
fn compatible(a: &Ty, b: &Ty) -> bool {
    match (a, b) {
        (Ty::Opaque | Ty::Unknown | Ty::Null, _) | (_, Ty::Opaque | Ty::Unknown | Ty::Null) => {
            true
        }
        (Ty::Primitive(a), Ty::Primitive(b)) => {
            a == b
                // uuid columns accept their string form
                || matches!(
                    (a, b),
                    (PrimitiveType::Uuid, PrimitiveType::String)
                        | (PrimitiveType::String, PrimitiveType::Uuid)
                        // ints coerce into float comparisons
                        | (PrimitiveType::Int, PrimitiveType::Float)
                        | (PrimitiveType::Float, PrimitiveType::Int)
                )
        }
        (Ty::Enum(_), Ty::Enum(_)) => true,
        (Ty::Enum(_), Ty::Primitive(PrimitiveType::String))
        | (Ty::Primitive(PrimitiveType::String), Ty::Enum(_)) => true,
        (Ty::Record(a), Ty::Record(b)) => a == b,
        (Ty::Collection(a), Ty::Collection(b)) => compatible(a, b),
        _ => false,
    }
}
