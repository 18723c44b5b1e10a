//! # forgec
//!
//! Compiler for FORGE, a declarative language for data-backed applications.
//! A set of `.forge` files compiles into four runtime artifacts: the artifact
//! JSON consumed by the runtime host, a SQL schema + migration, a typed
//! client library, and a typed UI-binding library.
//!
//! You probably want to start with the [compile] wrapper function.
//!
//! The pipeline is a linear chain of pure stages:
//! ```ascii
//!   .forge sources
//!        │ lex + parse (per file)
//!        ▼
//!   declarations ── merge ──► one translation unit
//!        │ analyze (scope, references, types)
//!        ▼
//!      Scope
//!        │ normalize (implicit structure made explicit)
//!        ▼
//!      Model
//!        │ plan (access algebra, views, jobs, migration)
//!        ▼
//!      Plan
//!        │ emit
//!        ▼
//!   Artifacts { artifact JSON, schema SQL, client, UI bindings }
//! ```
//!
//! Diagnostics accumulate through every stage; the first stage that raises an
//! error finishes collecting what it can, and later stages are skipped.
//! Nothing in the compiler is process-global, so separate invocations may run
//! on separate threads.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub use forgec_parser::error::{
    Diagnostic, Diagnostics, FixHint, Reason, Related, Severity, TextEdit, WithDiagnosticInfo,
};
pub use forgec_parser::lexer::lr;
pub use forgec_parser::parser::ast;
pub use forgec_parser::span::Span;

pub use diagnostics::{DiagnosticMessage, SourceLocation};
pub use emit::Artifacts;
pub use ir::plan::SchemaSnapshot;

mod diagnostics;
mod emit;
pub mod ir;
mod merge;
mod normalize;
mod planner;
pub mod semantic;
mod utils;

/// Compile a source tree into the four runtime artifacts.
///
/// `output` is present iff no error-severity diagnostic was raised. The
/// compiler is a pure function of its inputs: the same sources and options
/// produce byte-identical artifacts.
pub fn compile(sources: &SourceTree, options: &Options) -> CompileResult {
    compile_inner(sources, Diagnostics::new(), options)
}

/// Read the given files and compile them as one translation unit. A file
/// that cannot be read produces `E0001` and the remaining files proceed.
pub fn compile_files<P: AsRef<Path>>(paths: &[P], options: &Options) -> CompileResult {
    let mut diagnostics = Diagnostics::new();
    let mut files = Vec::new();

    for path in paths {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => files.push((path.to_path_buf(), content)),
            Err(error) => diagnostics.push(
                Diagnostic::error_simple(format!("cannot read `{}`: {error}", path.display()))
                    .with_code("E0001"),
            ),
        }
    }

    compile_inner(&SourceTree::new(files, None), diagnostics, options)
}

/// [compile], truncated after the analyzer: diagnostics only.
pub fn check(sources: &SourceTree) -> Vec<DiagnosticMessage> {
    let mut diagnostics = Diagnostics::new();
    let decls = merge::parse_and_merge(sources, &mut diagnostics);
    if !diagnostics.has_errors() {
        semantic::analyze(&decls, &mut diagnostics);
    }
    diagnostics::compose(diagnostics, sources, &Options::default())
}

fn compile_inner(
    sources: &SourceTree,
    mut diagnostics: Diagnostics,
    options: &Options,
) -> CompileResult {
    log::debug!("compiling {} source file(s)", sources.sources.len());

    let decls = merge::parse_and_merge(sources, &mut diagnostics);

    let mut output = None;
    if !diagnostics.has_errors() {
        let scope = semantic::analyze(&decls, &mut diagnostics);
        if !diagnostics.has_errors() {
            let model = normalize::normalize(&decls, &scope);
            let plan = planner::plan(&model, options, &mut diagnostics);
            if !diagnostics.has_errors() {
                output = Some(emit::emit(&model, &plan, options));
            }
        }
    }

    CompileResult {
        output,
        diagnostics: diagnostics::compose(diagnostics, sources, options),
    }
}

/// Compilation options.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Options {
    /// Pass the emitted schema SQL through a formatter. Off by default so
    /// artifacts stay byte-stable across formatter versions.
    pub format: bool,

    /// The schema snapshot of a previously emitted artifact. When present,
    /// migration planning produces a delta instead of fresh CREATEs.
    pub previous_schema: Option<SchemaSnapshot>,

    /// Whether diagnostic displays carry ANSI colors.
    pub display: DisplayOptions,
}

impl Options {
    pub fn with_format(mut self, format: bool) -> Self {
        self.format = format;
        self
    }

    pub fn with_previous_schema(mut self, snapshot: SchemaSnapshot) -> Self {
        self.previous_schema = Some(snapshot);
        self
    }

    pub fn with_display(mut self, display: DisplayOptions) -> Self {
        self.display = display;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisplayOptions {
    /// Plain text
    #[default]
    Plain,
    /// With ANSI colors
    AnsiColor,
}

/// The result of one compile invocation: the ordered diagnostics of every
/// stage, and the artifacts iff no error was raised.
#[derive(Debug, Clone)]
pub struct CompileResult {
    pub output: Option<Artifacts>,
    pub diagnostics: Vec<DiagnosticMessage>,
}

impl CompileResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}

/// All paths are relative to the project root.
// We use `SourceTree` to represent both a single anonymous source and a
// collection of files; `source_ids` keeps [Span] lean.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceTree {
    /// Path to the root of the source tree.
    pub root: Option<PathBuf>,

    /// Mapping from file paths into their contents.
    pub sources: HashMap<PathBuf, String>,

    /// Index of source ids to paths.
    pub(crate) source_ids: HashMap<u16, PathBuf>,
}

impl SourceTree {
    pub fn single(path: PathBuf, content: String) -> Self {
        SourceTree {
            sources: [(path.clone(), content)].into(),
            source_ids: [(1, path)].into(),
            root: None,
        }
    }

    pub fn new<I>(iter: I, root: Option<PathBuf>) -> Self
    where
        I: IntoIterator<Item = (PathBuf, String)>,
    {
        let mut tree = SourceTree {
            sources: HashMap::new(),
            source_ids: HashMap::new(),
            root,
        };

        for (index, (path, content)) in iter.into_iter().enumerate() {
            tree.sources.insert(path.clone(), content);
            tree.source_ids.insert((index + 1) as u16, path);
        }
        tree
    }

    pub fn insert(&mut self, path: PathBuf, content: String) {
        let last_id = self.source_ids.keys().max().cloned().unwrap_or(0);
        self.sources.insert(path.clone(), content);
        self.source_ids.insert(last_id + 1, path);
    }

    pub fn get_path(&self, source_id: u16) -> Option<&PathBuf> {
        self.source_ids.get(&source_id)
    }
}

impl<S: ToString> From<S> for SourceTree {
    fn from(source: S) -> Self {
        SourceTree::single(PathBuf::from(""), source.to_string())
    }
}
