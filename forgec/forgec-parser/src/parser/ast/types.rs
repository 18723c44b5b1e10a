use enum_as_inner::EnumAsInner;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::span::Span;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Ty {
    #[serde(flatten)]
    pub kind: TyKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, EnumAsInner, PartialEq, Clone, Serialize, Deserialize, JsonSchema)]
pub enum TyKind {
    Primitive(PrimitiveType),

    /// `enum(a, b, c)`
    Enum(Vec<String>),

    /// `ref(Entity)`
    Ref(String),

    /// `list<T>`
    List(Box<Ty>),
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
pub enum PrimitiveType {
    String,
    Int,
    Float,
    Bool,
    Time,
    Uuid,
    Json,
}

#[derive(Debug, EnumAsInner, PartialEq, Eq, Clone, Serialize, Deserialize, JsonSchema)]
pub enum Constraint {
    Unique,
    Optional,
    /// `length <= N`
    MaxLength(i64),
    /// `length >= N`
    MinLength(i64),
}

impl Ty {
    pub fn new(kind: TyKind) -> Self {
        Ty { kind, span: None }
    }
}

impl TyKind {
    pub fn into_ty(self, span: Span) -> Ty {
        Ty {
            kind: self,
            span: Some(span),
        }
    }
}

impl std::fmt::Display for TyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TyKind::Primitive(p) => write!(f, "{p}"),
            TyKind::Enum(variants) => write!(f, "enum({})", variants.join(", ")),
            TyKind::Ref(entity) => write!(f, "ref({entity})"),
            TyKind::List(inner) => write!(f, "list<{}>", inner.kind),
        }
    }
}
