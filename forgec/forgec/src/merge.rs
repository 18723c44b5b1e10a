//! The file merger: parses every file of a [SourceTree] and concatenates the
//! per-file declaration lists into one translation unit.

use itertools::Itertools;

use forgec_parser::error::{Diagnostic, Diagnostics, WithDiagnosticInfo};
use forgec_parser::parser::ast::{Decl, DeclKind};

use crate::SourceTree;

/// Parse all sources and merge them, in caller-provided file order. Enforces
/// the single-`app` rule (`E0002`); everything else is a plain concatenation.
pub(crate) fn parse_and_merge(sources: &SourceTree, diagnostics: &mut Diagnostics) -> Vec<Decl> {
    let mut decls = Vec::new();

    for source_id in sources.source_ids.keys().sorted() {
        let path = &sources.source_ids[source_id];
        let Some(content) = sources.sources.get(path) else {
            continue;
        };

        log::debug!("parsing {}", path.display());
        let (file_decls, file_diagnostics) = forgec_parser::parse_source(content, *source_id);
        diagnostics.extend(file_diagnostics);
        decls.extend(file_decls);
    }

    check_single_app(&decls, diagnostics);

    decls
}

fn check_single_app(decls: &[Decl], diagnostics: &mut Diagnostics) {
    let mut first_app: Option<&Decl> = None;
    for decl in decls {
        if !matches!(decl.kind, DeclKind::App(_)) {
            continue;
        }
        match first_app {
            None => first_app = Some(decl),
            Some(first) => {
                let mut diagnostic = Diagnostic::error_simple(
                    "multiple `app` declarations in one compilation",
                )
                .with_code("E0002")
                .with_span(decl.span);
                if let Some(first_span) = first.span {
                    diagnostic = diagnostic.with_related(first_span, "first declared here");
                }
                diagnostics.push(diagnostic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_apps_rejected() {
        let sources = SourceTree::new(
            [
                ("a.forge".into(), "app A { }".to_string()),
                ("b.forge".into(), "app B { }".to_string()),
            ],
            None,
        );
        let mut diagnostics = Diagnostics::new();
        let decls = parse_and_merge(&sources, &mut diagnostics);
        assert_eq!(decls.len(), 2);
        assert!(diagnostics.has_errors());
        assert_eq!(diagnostics.0[0].code, Some("E0002"));
        assert_eq!(diagnostics.0[0].related.len(), 1);
    }

    #[test]
    fn files_merge_in_order() {
        let sources = SourceTree::new(
            [
                ("app.forge".into(), "app A { }".to_string()),
                ("entities.forge".into(), "entity User { email: string }".to_string()),
            ],
            None,
        );
        let mut diagnostics = Diagnostics::new();
        let decls = parse_and_merge(&sources, &mut diagnostics);
        assert!(!diagnostics.has_errors());
        assert_eq!(decls.len(), 2);
        assert!(decls[0].kind.is_app());
        assert!(decls[1].kind.is_entity());
    }
}
