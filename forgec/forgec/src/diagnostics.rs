//! User-facing diagnostics: positioned messages composed against the source
//! tree, with an ariadne-rendered display and a plain one-line form.

use std::collections::HashMap;
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::Range;
use std::path::PathBuf;

use anstream::adapter::strip_str;
use ariadne::{Cache, Config, Label, Report, ReportKind, Source};
use serde::Serialize;

use forgec_parser::error::{Diagnostic, Diagnostics, FixHint, Related, Severity};
use forgec_parser::span::Span;

use crate::{DisplayOptions, Options, SourceTree};

#[derive(Clone, Serialize)]
pub struct DiagnosticMessage {
    pub severity: Severity,
    /// Machine-readable identifier, eg. "E0312".
    pub code: Option<String>,
    /// Plain text of the diagnostic.
    pub reason: String,
    /// Suggestions for how to fix it.
    pub hints: Vec<String>,
    /// Character offsets of the origin within a source file.
    pub span: Option<Span>,
    pub path: Option<PathBuf>,
    pub related: Vec<Related>,
    pub fix: Option<FixHint>,
    /// Annotated source, containing cause and hints.
    pub display: Option<String>,
    /// Line and column of the origin within the source file.
    pub location: Option<SourceLocation>,
}

/// Location within the source file; line and column are 1-based.
#[derive(Debug, Clone, Serialize)]
pub struct SourceLocation {
    pub start: (usize, usize),
    pub end: (usize, usize),
}

impl DiagnosticMessage {
    /// `filename:line:col: severity: message [code]`
    pub fn plain(&self) -> String {
        let mut out = String::new();
        if let Some(path) = &self.path {
            out.push_str(&path.display().to_string());
            if let Some(location) = &self.location {
                out.push_str(&format!(":{}:{}", location.start.0, location.start.1));
            }
            out.push_str(": ");
        }
        out.push_str(&format!("{}: {}", self.severity, self.reason));
        if let Some(code) = &self.code {
            out.push_str(&format!(" [{code}]"));
        }
        out
    }
}

impl Display for DiagnosticMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // https://github.com/zesterer/ariadne/issues/52
        if let Some(display) = &self.display {
            let without_trailing_spaces = display
                .split('\n')
                .map(str::trim_end)
                .collect::<Vec<_>>()
                .join("\n");
            f.write_str(&without_trailing_spaces)
        } else {
            f.write_str(&self.plain())
        }
    }
}

impl Debug for DiagnosticMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self, f)
    }
}

/// Compute locations and pretty displays for the collected diagnostics, in
/// collection order.
pub(crate) fn compose(
    diagnostics: Diagnostics,
    sources: &SourceTree,
    options: &Options,
) -> Vec<DiagnosticMessage> {
    let mut cache = FileTreeCache::new(sources);

    diagnostics
        .0
        .into_iter()
        .map(|diagnostic| compose_one(diagnostic, sources, &mut cache, options))
        .collect()
}

fn compose_one(
    diagnostic: Diagnostic,
    sources: &SourceTree,
    cache: &mut FileTreeCache,
    options: &Options,
) -> DiagnosticMessage {
    let mut message = DiagnosticMessage {
        severity: diagnostic.severity,
        code: diagnostic.code.map(str::to_string),
        reason: diagnostic.reason.to_string(),
        hints: diagnostic.hints,
        span: diagnostic.span,
        path: None,
        related: diagnostic.related,
        fix: diagnostic.fix,
        display: None,
        location: None,
    };

    let Some(span) = message.span else {
        return message;
    };
    let Some(source_path) = sources.source_ids.get(&span.source_id) else {
        return message;
    };
    message.path = Some(source_path.clone());

    let Ok(source) = cache.fetch(source_path) else {
        return message;
    };
    message.location = compose_location(span, source);
    message.display = compose_display(&message, span, source_path.clone(), cache, options);

    message
}

fn compose_location(span: Span, source: &Source) -> Option<SourceLocation> {
    let start = source.get_offset_line(span.start)?;
    let end = source.get_offset_line(span.end.saturating_sub(1))?;
    Some(SourceLocation {
        start: (start.1 + 1, start.2 + 1),
        end: (end.1 + 1, end.2 + 1),
    })
}

fn compose_display(
    message: &DiagnosticMessage,
    span: Span,
    source_path: PathBuf,
    cache: &mut FileTreeCache,
    options: &Options,
) -> Option<String> {
    // Always render with color, and strip afterwards when plain output is
    // requested.
    let config = Config::default().with_color(true);

    let kind = match message.severity {
        Severity::Error => ReportKind::Error,
        Severity::Warning => ReportKind::Warning,
        Severity::Info | Severity::Hint => ReportKind::Advice,
    };

    let range = Range::from(span);
    let mut report = Report::build(kind, (source_path.clone(), range.clone()))
        .with_config(config)
        .with_label(Label::new((source_path, range)).with_message(&message.reason));

    if let Some(code) = &message.code {
        report = report.with_code(code);
    }

    for related in &message.related {
        if let Some(related_path) = cache.file_tree.source_ids.get(&related.span.source_id) {
            report = report.with_label(
                Label::new((related_path.clone(), Range::from(related.span)))
                    .with_message(&related.message),
            );
        }
    }

    // I don't know how to set multiple hints...
    if !message.hints.is_empty() {
        report.set_help(&message.hints[0]);
    }
    if message.hints.len() > 1 {
        report.set_note(&message.hints[1]);
    }
    if let Some(fix) = &message.fix {
        report.set_note(&fix.title);
    }

    let mut out = Vec::new();
    report.finish().write(cache, &mut out).ok()?;
    let rendered = String::from_utf8(out).ok()?;

    Some(match options.display {
        DisplayOptions::AnsiColor => rendered,
        DisplayOptions::Plain => strip_str(&rendered).to_string(),
    })
}

struct FileTreeCache<'a> {
    file_tree: &'a SourceTree,
    cache: HashMap<PathBuf, Source>,
}

impl<'a> FileTreeCache<'a> {
    fn new(file_tree: &'a SourceTree) -> Self {
        FileTreeCache {
            file_tree,
            cache: HashMap::new(),
        }
    }
}

impl<'a> Cache<PathBuf> for FileTreeCache<'a> {
    type Storage = String;

    fn fetch(&mut self, id: &PathBuf) -> Result<&Source, Box<dyn fmt::Debug + '_>> {
        let file_contents = match self.file_tree.sources.get(id) {
            Some(contents) => contents,
            None => return Err(Box::new(format!("Unknown file `{id:?}`"))),
        };

        Ok(self
            .cache
            .entry(id.clone())
            .or_insert_with(|| Source::from(file_contents.to_string())))
    }

    fn display<'b>(&self, id: &'b PathBuf) -> Option<Box<dyn fmt::Display + 'b>> {
        match id.as_os_str().to_str() {
            Some(s) => Some(Box::new(s)),
            None => None,
        }
    }
}
