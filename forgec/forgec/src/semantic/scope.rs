//! Pass 1 of the analyzer: walk top-level declarations and build the symbol
//! table, reporting duplicate definitions.

use std::collections::HashMap;

use forgec_parser::error::{Diagnostic, Diagnostics, WithDiagnosticInfo};
use forgec_parser::parser::ast::{Constraint, Decl, DeclKind, Ty, TyKind};
use forgec_parser::span::Span;

/// The symbol table, with a namespace per declaration kind.
/// Immutable once built.
#[derive(Debug, Default)]
pub struct Scope {
    pub app: Option<AppInfo>,
    pub entities: HashMap<String, EntityInfo>,
    /// Keyed by `Owner.field`; holds declared relations, the forward
    /// relations synthesized from `ref` fields, and the synthesized inverse
    /// of every forward relation.
    pub relations: HashMap<String, RelationInfo>,
    /// Relation keys in deterministic order: declared relations in source
    /// order, then `ref`-synthesized forwards, then inverses.
    pub relation_order: Vec<String>,
    pub messages: HashMap<String, MessageInfo>,
    pub actions: HashMap<String, ActionInfo>,
    pub jobs: HashMap<String, JobInfo>,
    pub views: HashMap<String, ViewInfo>,
    /// Access blocks, keyed by subject entity.
    pub access: HashMap<String, usize>,
}

#[derive(Debug)]
pub struct AppInfo {
    pub name: String,
    pub decl_index: usize,
}

#[derive(Debug)]
pub struct EntityInfo {
    pub decl_index: usize,
    pub span: Option<Span>,
    pub field_order: Vec<String>,
    pub fields: HashMap<String, FieldInfo>,
}

#[derive(Debug)]
pub struct FieldInfo {
    pub ty: Ty,
    pub optional: bool,
    pub unique: bool,
    pub span: Option<Span>,
}

#[derive(Debug)]
pub struct RelationInfo {
    pub owner: String,
    pub field: String,
    pub target: String,
    pub many: bool,
    /// Name of the paired relation field on the target entity. Filled during
    /// inverse synthesis for forward relations.
    pub inverse: Option<String>,
    /// False for relations synthesized from `ref` fields.
    pub declared: bool,
    /// True for the synthesized reverse direction of a forward relation.
    pub is_inverse: bool,
    pub span: Option<Span>,
}

#[derive(Debug)]
pub struct MessageInfo {
    pub decl_index: usize,
    pub span: Option<Span>,
}

#[derive(Debug)]
pub struct ActionInfo {
    pub decl_index: usize,
    pub input: Option<String>,
    pub span: Option<Span>,
}

#[derive(Debug)]
pub struct JobInfo {
    pub decl_index: usize,
    pub input: Option<String>,
    pub span: Option<Span>,
}

#[derive(Debug)]
pub struct ViewInfo {
    pub decl_index: usize,
    pub source: String,
    pub span: Option<Span>,
}

impl Scope {
    pub fn entity(&self, name: &str) -> Option<&EntityInfo> {
        self.entities.get(name)
    }

    pub fn relation(&self, owner: &str, field: &str) -> Option<&RelationInfo> {
        self.relations.get(&format!("{owner}.{field}"))
    }
}

pub(crate) fn build(decls: &[Decl], diagnostics: &mut Diagnostics) -> Scope {
    let mut scope = Scope::default();

    // Named declarations first, so relations can be checked against them.
    for (index, decl) in decls.iter().enumerate() {
        match &decl.kind {
            DeclKind::App(app) => {
                // Multiple apps were already reported by the merger; keep the
                // first one.
                if scope.app.is_none() {
                    scope.app = Some(AppInfo {
                        name: app.name.clone(),
                        decl_index: index,
                    });
                }
            }
            DeclKind::Entity(entity) => {
                if let Some(first) = scope.entities.get(&entity.name) {
                    report_duplicate(diagnostics, "E0308", "entity", &entity.name, decl.span, first.span);
                    continue;
                }
                let mut fields = HashMap::new();
                let mut field_order = Vec::new();
                for field in &entity.fields {
                    // Duplicates inside one entity were reported by the
                    // parser (E0208); first definition wins.
                    if fields.contains_key(&field.name) {
                        continue;
                    }
                    field_order.push(field.name.clone());
                    fields.insert(
                        field.name.clone(),
                        FieldInfo {
                            ty: field.ty.clone(),
                            optional: field.constraints.contains(&Constraint::Optional),
                            unique: field.constraints.contains(&Constraint::Unique),
                            span: field.span,
                        },
                    );
                }
                scope.entities.insert(
                    entity.name.clone(),
                    EntityInfo {
                        decl_index: index,
                        span: decl.span,
                        field_order,
                        fields,
                    },
                );
            }
            DeclKind::Message(message) => {
                if let Some(first) = scope.messages.get(&message.name) {
                    report_duplicate(diagnostics, "E0309", "message", &message.name, decl.span, first.span);
                    continue;
                }
                scope.messages.insert(
                    message.name.clone(),
                    MessageInfo {
                        decl_index: index,
                        span: decl.span,
                    },
                );
            }
            DeclKind::Action(action) => {
                if let Some(first) = scope.actions.get(&action.name) {
                    report_duplicate(diagnostics, "E0311", "action", &action.name, decl.span, first.span);
                    continue;
                }
                scope.actions.insert(
                    action.name.clone(),
                    ActionInfo {
                        decl_index: index,
                        input: action.input.clone(),
                        span: decl.span,
                    },
                );
            }
            DeclKind::Job(job) => {
                if let Some(first) = scope.jobs.get(&job.name) {
                    report_duplicate(diagnostics, "E0311", "job", &job.name, decl.span, first.span);
                    continue;
                }
                scope.jobs.insert(
                    job.name.clone(),
                    JobInfo {
                        decl_index: index,
                        input: job.input.clone(),
                        span: decl.span,
                    },
                );
            }
            DeclKind::View(view) => {
                if let Some(first) = scope.views.get(&view.name) {
                    report_duplicate(diagnostics, "E0311", "view", &view.name, decl.span, first.span);
                    continue;
                }
                scope.views.insert(
                    view.name.clone(),
                    ViewInfo {
                        decl_index: index,
                        source: view.source.clone(),
                        span: decl.span,
                    },
                );
            }
            DeclKind::Access(access) => {
                if scope.access.contains_key(&access.entity) {
                    report_duplicate(
                        diagnostics,
                        "E0311",
                        "access block for",
                        &access.entity,
                        decl.span,
                        decls[scope.access[&access.entity]].span,
                    );
                    continue;
                }
                scope.access.insert(access.entity.clone(), index);
            }
            _ => {}
        }
    }

    // Declared relations.
    for decl in decls {
        let DeclKind::Relation(relation) = &decl.kind else {
            continue;
        };
        let key = format!("{}.{}", relation.owner, relation.field);
        if let Some(first) = scope.relations.get(&key) {
            report_duplicate(diagnostics, "E0310", "relation", &key, decl.span, first.span);
            continue;
        }
        scope.relation_order.push(key.clone());
        scope.relations.insert(
            key,
            RelationInfo {
                owner: relation.owner.clone(),
                field: relation.field.clone(),
                target: relation.target.clone(),
                many: relation.many,
                inverse: relation.inverse.clone(),
                declared: true,
                is_inverse: false,
                span: decl.span,
            },
        );
    }

    // Forward relations synthesized from `ref` fields, where no declared
    // relation already covers the same owner and field.
    let mut synthesized = Vec::new();
    for decl in decls {
        let DeclKind::Entity(entity) = &decl.kind else {
            continue;
        };
        for field in &entity.fields {
            let TyKind::Ref(target) = &field.ty.kind else {
                continue;
            };
            let key = format!("{}.{}", entity.name, field.name);
            if scope.relations.contains_key(&key) {
                continue;
            }
            synthesized.push((
                key,
                RelationInfo {
                    owner: entity.name.clone(),
                    field: field.name.clone(),
                    target: target.clone(),
                    many: false,
                    inverse: None,
                    declared: false,
                    is_inverse: false,
                    span: field.span,
                },
            ));
        }
    }
    for (key, relation) in synthesized {
        scope.relation_order.push(key.clone());
        scope.relations.insert(key, relation);
    }

    synthesize_inverses(&mut scope, diagnostics);

    scope
}

/// Every forward relation gets a reverse accessor on the target: the declared
/// `inverse` name, or the (pluralized) owner name. Name collisions are
/// errors; the schema would be ambiguous.
fn synthesize_inverses(scope: &mut Scope, diagnostics: &mut Diagnostics) {
    let forwards = scope.relation_order.clone();
    for key in forwards {
        let relation = &scope.relations[&key];
        // Skip relations whose target is unknown; resolution reports E0301.
        if !scope.entities.contains_key(&relation.target) {
            continue;
        }

        let inverse_name = relation.inverse.clone().unwrap_or_else(|| {
            if relation.many {
                crate::utils::snake_case(&relation.owner)
            } else {
                crate::utils::pluralize(&crate::utils::snake_case(&relation.owner))
            }
        });
        let span = relation.span;
        let inverse_key = format!("{}.{}", relation.target, inverse_name);

        let field_conflict = scope
            .entities
            .get(&relation.target)
            .map_or(false, |target| target.fields.contains_key(&inverse_name));
        if field_conflict || scope.relations.contains_key(&inverse_key) {
            diagnostics.push(
                Diagnostic::error_simple(format!(
                    "inverse relation `{inverse_key}` of `{key}` collides with an existing name"
                ))
                .with_code("E0310")
                .with_span(span),
            );
            continue;
        }

        let relation = scope.relations.get_mut(&key).unwrap();
        relation.inverse = Some(inverse_name.clone());
        let inverse = RelationInfo {
            owner: relation.target.clone(),
            field: inverse_name,
            target: relation.owner.clone(),
            many: !relation.many,
            inverse: Some(relation.field.clone()),
            declared: false,
            is_inverse: true,
            span,
        };
        scope.relation_order.push(inverse_key.clone());
        scope.relations.insert(inverse_key, inverse);
    }
}

fn report_duplicate(
    diagnostics: &mut Diagnostics,
    code: &'static str,
    what: &str,
    name: &str,
    span: Option<Span>,
    first_span: Option<Span>,
) {
    let mut diagnostic = Diagnostic::error_simple(format!("duplicate {what} `{name}`"))
        .with_code(code)
        .with_span(span);
    if let Some(first_span) = first_span {
        diagnostic = diagnostic.with_related(first_span, "first defined here");
    }
    diagnostics.push(diagnostic);
}
