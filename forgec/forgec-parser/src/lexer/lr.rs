use enum_as_inner::EnumAsInner;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tokens(pub Vec<Token>);

#[derive(Clone, PartialEq, Serialize, Deserialize, Eq, JsonSchema)]
pub struct Token {
    pub kind: TokenKind,
    pub span: std::ops::Range<usize>,
}

/// Keywords of the surface language. `true` and `false` are listed for
/// completeness but are lexed as boolean literals.
pub const KEYWORDS: &[&str] = &[
    "app",
    "entity",
    "relation",
    "rule",
    "access",
    "action",
    "message",
    "job",
    "hook",
    "view",
    "test",
    "imperative",
    "migrate",
    "presence",
    "ephemeral",
    "source",
    "fields",
    "filter",
    "input",
    "needs",
    "effect",
    "creates",
    "enqueue",
    "forbid",
    "allow",
    "require",
    "emit",
    "if",
    "in",
    "and",
    "or",
    "not",
    "true",
    "false",
    "unique",
    "optional",
    "length",
    "enum",
    "ref",
    "list",
];

/// Keywords that may begin a top-level declaration.
pub const DECL_KEYWORDS: &[&str] = &[
    "app",
    "entity",
    "relation",
    "rule",
    "access",
    "action",
    "message",
    "job",
    "hook",
    "view",
    "test",
    "presence",
    "ephemeral",
    "imperative",
    "migrate",
];

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize, JsonSchema)]
pub enum TokenKind {
    NewLine,

    Ident(String),
    Keyword(String),
    Literal(Literal),

    /// single-char control tokens
    Control(char),

    ArrowThin, // ->
    Eq,        // ==
    Ne,        // !=
    Gte,       // >=
    Lte,       // <=

    // Aesthetics only
    Comment(String),
}

#[derive(
    Debug, EnumAsInner, PartialEq, Clone, Serialize, Deserialize, strum::AsRefStr, JsonSchema,
)]
pub enum Literal {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
}

// This is here because Literal::Float(f64) does not implement Hash, so we cannot simply derive it.
// There are reasons for that, but chumsky::Error needs Hash for the TokenKind, so it can deduplicate
// tokens in error.
// So this hack could lead to duplicated tokens in error messages. Oh no.
#[allow(clippy::derived_hash_with_manual_eq)]
impl std::hash::Hash for TokenKind {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
    }
}

impl std::cmp::Eq for TokenKind {}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Null => write!(f, "null")?,
            Literal::Integer(i) => write!(f, "{i}")?,
            Literal::Float(i) => write!(f, "{i}")?,
            Literal::String(s) => write!(f, "\"{}\"", s.escape_default())?,
            Literal::Boolean(b) => {
                f.write_str(if *b { "true" } else { "false" })?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::NewLine => write!(f, "new line"),
            TokenKind::Ident(s) => {
                if s.is_empty() {
                    // FYI this shows up in errors
                    write!(f, "an identifier")
                } else {
                    write!(f, "{s}")
                }
            }
            TokenKind::Keyword(s) => write!(f, "keyword {s}"),
            TokenKind::Literal(lit) => write!(f, "{lit}"),
            TokenKind::Control(c) => write!(f, "{c}"),

            TokenKind::ArrowThin => f.write_str("->"),
            TokenKind::Eq => f.write_str("=="),
            TokenKind::Ne => f.write_str("!="),
            TokenKind::Gte => f.write_str(">="),
            TokenKind::Lte => f.write_str("<="),

            TokenKind::Comment(s) => {
                writeln!(f, "#{s}")
            }
        }
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}..{}: {:?}", self.span.start, self.span.end, self.kind)
    }
}

pub struct TokenVec(pub Vec<Token>);

impl std::fmt::Debug for TokenVec {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "TokenVec (")?;
        for token in self.0.iter() {
            writeln!(f, "  {token:?},")?;
        }
        write!(f, ")")
    }
}
