use std::collections::BTreeMap;

use serde::Serialize;

use forgec_parser::parser::ast::{ExpectClause, Expr, RuleAction};

/// The normalized model: the combined AST with implicit structure made
/// explicit and equivalent forms unified. Read-only once built.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Model {
    pub app: AppModel,
    pub entities: Vec<EntityModel>,
    pub relations: Vec<RelationModel>,
    pub messages: Vec<MessageModel>,
    pub rules: Vec<RuleModel>,
    pub access: Vec<AccessModel>,
    pub actions: Vec<ActionModel>,
    pub jobs: Vec<JobModel>,
    pub hooks: Vec<HookModel>,
    pub views: Vec<ViewModel>,
    pub tests: Vec<TestModel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppModel {
    pub name: String,
    pub auth: AuthMode,
    pub database: DatabaseKind,
    /// Free-form options, minus `auth` and `database`.
    pub options: BTreeMap<String, String>,
}

impl Default for AppModel {
    fn default() -> Self {
        AppModel {
            name: "app".to_string(),
            auth: AuthMode::None,
            database: DatabaseKind::Postgres,
            options: BTreeMap::new(),
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Token,
    Session,
    None,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgres,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityModel {
    pub name: String,
    pub table: String,
    pub fields: Vec<FieldModel>,
}

impl EntityModel {
    pub fn field(&self, name: &str) -> Option<&FieldModel> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldModel {
    pub name: String,
    pub column: String,
    pub ty: FieldType,
    pub nullable: bool,
    pub unique: bool,
    pub primary: bool,
    pub max_length: Option<i64>,
    pub min_length: Option<i64>,
    pub default: DefaultValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, enum_as_inner::EnumAsInner)]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Time,
    Uuid,
    Json,
    Enum { variants: Vec<String> },
    Ref { entity: String },
    List { element: Box<FieldType> },
}

impl FieldType {
    /// PostgreSQL column type.
    pub fn sql(&self) -> &'static str {
        match self {
            FieldType::String => "TEXT",
            FieldType::Int => "BIGINT",
            FieldType::Float => "DOUBLE PRECISION",
            FieldType::Bool => "BOOLEAN",
            FieldType::Time => "TIMESTAMPTZ",
            FieldType::Uuid => "UUID",
            FieldType::Json => "JSONB",
            FieldType::Enum { .. } => "TEXT",
            FieldType::Ref { .. } => "UUID",
            FieldType::List { .. } => "JSONB",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => f.write_str("string"),
            FieldType::Int => f.write_str("int"),
            FieldType::Float => f.write_str("float"),
            FieldType::Bool => f.write_str("bool"),
            FieldType::Time => f.write_str("time"),
            FieldType::Uuid => f.write_str("uuid"),
            FieldType::Json => f.write_str("json"),
            FieldType::Enum { variants } => write!(f, "enum({})", variants.join(", ")),
            FieldType::Ref { entity } => write!(f, "ref({entity})"),
            FieldType::List { element } => write!(f, "list<{element}>"),
        }
    }
}

/// Compile-time default metadata. Never rewrites user code; the runtime
/// decides what to do with it.
#[derive(Debug, Clone, PartialEq, Serialize, enum_as_inner::EnumAsInner)]
pub enum DefaultValue {
    None,
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Variant(String),
}

/// Relations appear twice: the declared (or `ref`-synthesized) forward
/// direction, and the synthesized inverse on the target.
#[derive(Debug, Clone, Serialize)]
pub struct RelationModel {
    pub owner: String,
    pub field: String,
    pub target: String,
    pub many: bool,
    /// Name of the paired relation field on the target entity.
    pub inverse: String,
    pub is_inverse: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageModel {
    pub id: String,
    pub level: MessageLevel,
    pub default: String,
    pub template: Option<String>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleModel {
    pub entity: String,
    pub event: EventKind,
    pub clauses: Vec<ClauseModel>,
}

/// One flattened rule clause. Within an event, clauses keep source order;
/// at runtime later clauses override earlier ones.
#[derive(Debug, Clone, Serialize)]
pub struct ClauseModel {
    pub action: RuleAction,
    pub guard: Option<Expr>,
    pub emit: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessModel {
    pub entity: String,
    /// All five operations, with `write` filled in for the mutating ops it
    /// covers and `false` for anything left unstated.
    pub ops: BTreeMap<String, Expr>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionModel {
    pub name: String,
    pub input: Option<String>,
    pub effect: Option<String>,
    pub body: Option<Expr>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobModel {
    pub name: String,
    pub input: Option<String>,
    pub needs: Option<NeedsModel>,
    pub effect: Option<String>,
    pub creates: Option<CreatesModel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NeedsModel {
    pub path: Vec<String>,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatesModel {
    pub entity: String,
    pub mappings: Vec<(String, Expr)>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HookTiming {
    Before,
    After,
}

#[derive(Debug, Clone, Serialize)]
pub struct HookModel {
    pub entity: String,
    pub timing: HookTiming,
    pub event: EventKind,
    pub jobs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewModel {
    pub name: String,
    pub source: String,
    pub fields: Vec<Vec<String>>,
    pub filter: Option<Expr>,
    pub realtime: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestModel {
    pub entity: String,
    pub event: EventKind,
    pub given: Vec<(Vec<String>, Expr)>,
    pub when: String,
    pub expect: Option<ExpectClause>,
}
