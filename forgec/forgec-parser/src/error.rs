use std::fmt::Debug;

use serde::Serialize;

use crate::span::Span;

/// A positioned, coded, severity-tagged message emitted during compilation.
/// Used internally, exposed as forgec::DiagnosticMessage.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub span: Option<Span>,
    pub reason: Reason,
    pub hints: Vec<String>,
    /// Machine readable identifier error code eg, "E0312"
    pub code: Option<&'static str>,
    /// Secondary locations, eg. the first definition for a duplicate.
    pub related: Vec<Related>,
    /// A machine-applicable fix, when one is known.
    pub fix: Option<FixHint>,
}

/// Multiple diagnostics, collected across the whole pipeline. Append-only:
/// stages push into it and never remove or reorder.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics(pub Vec<Diagnostic>);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

#[derive(Debug, Clone)]
pub enum Reason {
    Simple(String),
    Expected {
        who: Option<String>,
        expected: String,
        found: String,
    },
    Unexpected {
        found: String,
    },
    NotFound {
        name: String,
        namespace: String,
    },
    Bug {
        details: Option<String>,
    },
}

/// A secondary location attached to a diagnostic.
#[derive(Debug, Clone, Serialize)]
pub struct Related {
    pub span: Span,
    pub message: String,
}

/// A suggested code action: a title and the text edits that apply it.
#[derive(Debug, Clone, Serialize)]
pub struct FixHint {
    pub title: String,
    pub edits: Vec<TextEdit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextEdit {
    pub span: Span,
    pub new_text: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, reason: Reason) -> Self {
        Diagnostic {
            severity,
            span: None,
            reason,
            hints: Vec::new(),
            code: None,
            related: Vec::new(),
            fix: None,
        }
    }

    pub fn error(reason: Reason) -> Self {
        Diagnostic::new(Severity::Error, reason)
    }

    pub fn error_simple<S: ToString>(reason: S) -> Self {
        Diagnostic::error(Reason::Simple(reason.to_string()))
    }

    pub fn warning<S: ToString>(reason: S) -> Self {
        Diagnostic::new(Severity::Warning, Reason::Simple(reason.to_string()))
    }

    pub fn hint<S: ToString>(reason: S) -> Self {
        Diagnostic::new(Severity::Hint, Reason::Simple(reason.to_string()))
    }

    /// Used for things that you *think* should never happen, but are not sure.
    pub fn new_assert<S: ToString>(details: S) -> Self {
        Diagnostic::error(Reason::Bug {
            details: Some(details.to_string()),
        })
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics(Vec::new())
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    pub fn extend<I: IntoIterator<Item = Diagnostic>>(&mut self, diagnostics: I) {
        self.0.extend(diagnostics);
    }

    pub fn add_error<S: ToString>(&mut self, code: &'static str, message: S, span: Option<Span>) {
        self.push(Diagnostic::error_simple(message).with_code(code).with_span(span));
    }

    pub fn add_warning<S: ToString>(&mut self, code: &'static str, message: S, span: Option<Span>) {
        self.push(Diagnostic::warning(message).with_code(code).with_span(span));
    }

    pub fn add_hint<S: ToString>(&mut self, code: &'static str, message: S, span: Option<Span>) {
        self.push(Diagnostic::hint(message).with_code(code).with_span(span));
    }

    pub fn add_with_fix<S: ToString, T: ToString>(
        &mut self,
        code: &'static str,
        message: S,
        span: Option<Span>,
        title: T,
        edits: Vec<TextEdit>,
    ) {
        self.push(
            Diagnostic::hint(message)
                .with_code(code)
                .with_span(span)
                .with_fix(FixHint {
                    title: title.to_string(),
                    edits,
                }),
        );
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reason::Simple(text) => f.write_str(text),
            Reason::Expected {
                who,
                expected,
                found,
            } => {
                if let Some(who) = who {
                    write!(f, "{who} ")?;
                }
                write!(f, "expected {expected}, but found {found}")
            }
            Reason::Unexpected { found } => write!(f, "unexpected {found}"),
            Reason::NotFound { name, namespace } => write!(f, "{namespace} `{name}` not found"),
            Reason::Bug { details } => {
                write!(f, "internal compiler error")?;
                if let Some(details) = details {
                    write!(f, "; {details}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diagnostic: Diagnostic) -> Self {
        Diagnostics(vec![diagnostic])
    }
}

// Needed for anyhow-style embedding by hosts
impl std::error::Error for Diagnostic {}

impl std::error::Error for Diagnostics {}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self, f)
    }
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self, f)
    }
}

pub trait WithDiagnosticInfo: Sized {
    fn push_hint<S: Into<String>>(self, hint: S) -> Self;

    fn with_hints<S: Into<String>, I: IntoIterator<Item = S>>(self, hints: I) -> Self;

    fn with_span(self, span: Option<Span>) -> Self;

    fn with_span_fallback(self, span: Option<Span>) -> Self;

    fn with_code(self, code: &'static str) -> Self;

    fn with_related(self, span: Span, message: impl Into<String>) -> Self;

    fn with_fix(self, fix: FixHint) -> Self;
}

impl WithDiagnosticInfo for Diagnostic {
    fn push_hint<S: Into<String>>(mut self, hint: S) -> Self {
        self.hints.push(hint.into());
        self
    }

    fn with_hints<S: Into<String>, I: IntoIterator<Item = S>>(mut self, hints: I) -> Self {
        self.hints = hints.into_iter().map(|x| x.into()).collect();
        self
    }

    fn with_span(mut self, span: Option<Span>) -> Self {
        self.span = span;
        self
    }

    fn with_span_fallback(mut self, span: Option<Span>) -> Self {
        self.span = self.span.or(span);
        self
    }

    fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    fn with_related(mut self, span: Span, message: impl Into<String>) -> Self {
        self.related.push(Related {
            span,
            message: message.into(),
        });
        self
    }

    fn with_fix(mut self, fix: FixHint) -> Self {
        self.fix = Some(fix);
        self
    }
}

impl<T, E: WithDiagnosticInfo> WithDiagnosticInfo for Result<T, E> {
    fn push_hint<S: Into<String>>(self, hint: S) -> Self {
        self.map_err(|e| e.push_hint(hint))
    }

    fn with_hints<S: Into<String>, I: IntoIterator<Item = S>>(self, hints: I) -> Self {
        self.map_err(|e| e.with_hints(hints))
    }

    fn with_span(self, span: Option<Span>) -> Self {
        self.map_err(|e| e.with_span(span))
    }

    fn with_span_fallback(self, span: Option<Span>) -> Self {
        self.map_err(|e| e.with_span_fallback(span))
    }

    fn with_code(self, code: &'static str) -> Self {
        self.map_err(|e| e.with_code(code))
    }

    fn with_related(self, span: Span, message: impl Into<String>) -> Self {
        self.map_err(|e| e.with_related(span, message))
    }

    fn with_fix(self, fix: FixHint) -> Self {
        self.map_err(|e| e.with_fix(fix))
    }
}
