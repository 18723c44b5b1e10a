use enum_as_inner::EnumAsInner;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::lexer::lr::Literal;
use crate::parser::ast::{Constraint, Expr, Ty};
use crate::span::Span;

/// A top-level construct of a `.forge` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Decl {
    #[serde(flatten)]
    pub kind: DeclKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(
    Debug, EnumAsInner, PartialEq, Clone, Serialize, Deserialize, strum::AsRefStr, JsonSchema,
)]
pub enum DeclKind {
    App(AppDecl),
    Entity(EntityDecl),
    Relation(RelationDecl),
    Rule(RuleDecl),
    Access(AccessDecl),
    Action(ActionDecl),
    Message(MessageDecl),
    Job(JobDecl),
    Hook(HookDecl),
    View(ViewDecl),
    Test(TestDecl),
    Presence(ChannelDecl),
    Ephemeral(ChannelDecl),
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AppDecl {
    pub name: String,
    pub options: Vec<AppOption>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AppOption {
    pub key: String,
    pub value: OptionValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, EnumAsInner, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub enum OptionValue {
    /// A bare name, eg. `auth: token`.
    Name(String),
    Literal(Literal),
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EntityDecl {
    pub name: String,
    pub fields: Vec<Field>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Field {
    pub name: String,
    pub ty: Ty,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub constraints: Vec<Constraint>,
    /// `= <literal>` or `= <enum variant>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<OptionValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RelationDecl {
    pub owner: String,
    pub field: String,
    pub target: String,
    pub many: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RuleDecl {
    pub entity: String,
    pub event: String,
    pub clauses: Vec<RuleClause>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RuleClause {
    pub action: RuleAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<Expr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    JsonSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Forbid,
    Allow,
    Require,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccessDecl {
    pub entity: String,
    pub clauses: Vec<AccessClause>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccessClause {
    /// One of `read`, `write`, `create`, `update`, `delete`; validated during
    /// analysis so unknown names survive parsing with a useful span.
    pub op: String,
    pub predicate: Expr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ActionDecl {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Expr>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageDecl {
    pub name: String,
    /// Span of the identifier alone, for rename fixes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_span: Option<Span>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobDecl {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs: Option<NeedsClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creates: Option<CreatesClause>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NeedsClause {
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Expr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreatesClause {
    pub entity: String,
    pub mappings: Vec<FieldMapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FieldMapping {
    pub field: String,
    pub expr: Expr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HookDecl {
    pub entity: String,
    /// `before_create`, `after_update`, ...; validated during analysis.
    pub event: String,
    pub enqueues: Vec<EnqueueCmd>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EnqueueCmd {
    pub job: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ViewDecl {
    pub name: String,
    pub source: String,
    pub fields: Vec<FieldPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Expr>,
    #[serde(default)]
    pub realtime: bool,
}

/// A dotted projection path, eg. `author.name`.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FieldPath {
    pub parts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TestDecl {
    pub entity: String,
    pub event: String,
    pub given: Vec<GivenBinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expect: Option<ExpectClause>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GivenBinding {
    pub path: Vec<String>,
    pub value: Expr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, EnumAsInner, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub enum ExpectClause {
    Accept,
    Reject(String),
    Emits(String),
}

/// `presence` and `ephemeral` declarations; their transport lives outside the
/// compiler, so only the name and options are retained.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChannelDecl {
    pub name: String,
    pub options: Vec<AppOption>,
}

impl Decl {
    pub fn new(kind: DeclKind) -> Decl {
        Decl { kind, span: None }
    }

    /// The declared name, for the kinds that introduce one.
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            DeclKind::App(app) => Some(&app.name),
            DeclKind::Entity(entity) => Some(&entity.name),
            DeclKind::Action(action) => Some(&action.name),
            DeclKind::Message(message) => Some(&message.name),
            DeclKind::Job(job) => Some(&job.name),
            DeclKind::View(view) => Some(&view.name),
            DeclKind::Presence(channel) | DeclKind::Ephemeral(channel) => Some(&channel.name),
            DeclKind::Relation(_)
            | DeclKind::Rule(_)
            | DeclKind::Access(_)
            | DeclKind::Hook(_)
            | DeclKind::Test(_) => None,
        }
    }
}
