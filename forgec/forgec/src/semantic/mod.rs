//! Semantic analysis: symbol scope construction, reference resolution and
//! type checking.

mod resolver;
pub mod scope;

use forgec_parser::error::Diagnostics;
use forgec_parser::parser::ast::Decl;

pub use scope::Scope;

/// Run both analyzer passes over the merged declaration list. The returned
/// scope is immutable; diagnostics accumulate in the shared sink.
pub fn analyze(decls: &[Decl], diagnostics: &mut Diagnostics) -> Scope {
    let scope = scope::build(decls, diagnostics);
    resolver::resolve(decls, &scope, diagnostics);
    scope
}

#[cfg(test)]
mod tests {
    use forgec_parser::error::{Diagnostics, Severity};

    use super::*;

    fn analyze_source(source: &str) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        let sources = crate::SourceTree::from(source);
        let decls = crate::merge::parse_and_merge(&sources, &mut diagnostics);
        assert!(!diagnostics.has_errors(), "parse failed: {diagnostics:?}");
        analyze(&decls, &mut diagnostics);
        diagnostics
    }

    fn error_codes(source: &str) -> Vec<&'static str> {
        analyze_source(source)
            .0
            .into_iter()
            .filter(|d| d.severity == Severity::Error)
            .filter_map(|d| d.code)
            .collect()
    }

    const BASE: &str = r#"
        entity User { email: string unique }
        entity Ticket {
            subject: string
            status: enum(open, closed)
            author: ref(User)
        }
    "#;

    fn with_base(extra: &str) -> String {
        format!("{BASE}\n{extra}")
    }

    #[test]
    fn clean_model_has_no_errors() {
        let diagnostics = analyze_source(&with_base(
            r#"
            access Ticket { read: status == open or user.id == author.id write: user.id == author.id }
            view TicketList { source: Ticket fields: id, subject, author.email }
            "#,
        ));
        assert!(!diagnostics.has_errors(), "{diagnostics:?}");
    }

    #[test]
    fn undefined_entity_in_relation() {
        assert_eq!(
            error_codes(&with_base("relation Ticket.assignee -> NonExistent")),
            vec!["E0301"]
        );
    }

    #[test]
    fn undefined_field_in_access() {
        assert_eq!(
            error_codes(&with_base("access Ticket { read: missing == 1 }")),
            vec!["E0302"]
        );
    }

    #[test]
    fn undefined_message_in_rule() {
        assert_eq!(
            error_codes(&with_base("rule Ticket.update { forbid if status == closed emit NOPE }")),
            vec!["E0305"]
        );
    }

    #[test]
    fn undefined_job_in_hook() {
        assert_eq!(
            error_codes(&with_base("hook Ticket.after_create { enqueue missing_job }")),
            vec!["E0306"]
        );
    }

    #[test]
    fn duplicate_entity() {
        assert_eq!(
            error_codes(&with_base("entity User { name: string }")),
            vec!["E0308"]
        );
    }

    #[test]
    fn duplicate_message() {
        assert_eq!(
            error_codes(
                "message M_ONE { level: error }\nmessage M_ONE { level: info }\n\
                 entity T { f: string }\nrule T.update { forbid emit M_ONE }",
            ),
            vec!["E0309"]
        );
    }

    #[test]
    fn type_mismatch_in_guard() {
        assert_eq!(
            error_codes(&with_base("rule Ticket.update { forbid if subject }")),
            vec!["E0312"]
        );
    }

    #[test]
    fn enum_comparison_resolves_variants() {
        let diagnostics = analyze_source(&with_base(
            "access Ticket { read: status == open write: false }",
        ));
        assert!(!diagnostics.has_errors());

        assert_eq!(
            error_codes(&with_base("access Ticket { read: status == reopened }")),
            vec!["E0312"]
        );
    }

    #[test]
    fn invalid_rule_event() {
        assert_eq!(
            error_codes(&with_base("rule Ticket.upsert { forbid }")),
            vec!["E0401"]
        );
    }

    #[test]
    fn emit_on_allow() {
        assert_eq!(
            error_codes(&with_base(
                "message M_OK { level: info }\nrule Ticket.update { allow if status == open emit M_OK }"
            )),
            vec!["E0402"]
        );
    }

    #[test]
    fn unreachable_clause() {
        assert_eq!(
            error_codes(&with_base(
                "rule Ticket.update { allow forbid if status == closed }"
            )),
            vec!["E0403"]
        );
    }

    #[test]
    fn unknown_access_operation() {
        assert_eq!(
            error_codes(&with_base("access Ticket { browse: true }")),
            vec!["E0501"]
        );
    }

    #[test]
    fn non_boolean_access_predicate() {
        assert_eq!(
            error_codes(&with_base("access Ticket { read: subject }")),
            vec!["E0502"]
        );
    }

    #[test]
    fn many_projection_requires_collection_operator() {
        let source = r#"
            entity Org { name: string }
            entity User { email: string }
            relation Org.members -> User many
            access Org { read: members.any(email == user.email) }
        "#;
        let diagnostics = analyze_source(source);
        assert!(!diagnostics.has_errors(), "{diagnostics:?}");

        let source = r#"
            entity Org { name: string }
            entity User { email: string }
            relation Org.members -> User many
            view Bad { source: Org fields: members.email }
        "#;
        assert_eq!(error_codes(source), vec!["E0313"]);
    }

    #[test]
    fn required_reference_cycle() {
        let source = r#"
            entity A { b: ref(B) }
            entity B { a: ref(A) }
        "#;
        assert_eq!(error_codes(source), vec!["E0314"]);

        // Optional references break the cycle.
        let source = r#"
            entity A { b: ref(B) }
            entity B { a: ref(A) optional }
        "#;
        assert!(!analyze_source(source).has_errors());
    }

    #[test]
    fn unused_warnings() {
        let diagnostics = analyze_source(
            "entity Orphan { leftover: string }\n\
             message M_NEVER { level: info }",
        );
        assert!(!diagnostics.has_errors());
        let codes: Vec<_> = diagnostics.0.iter().filter_map(|d| d.code).collect();
        assert!(codes.contains(&"W0101"));
        assert!(codes.contains(&"W0102"));
        assert!(codes.contains(&"W0105"));
    }

    #[test]
    fn message_casing_hint_has_fix() {
        let diagnostics = analyze_source(
            "entity T { f: string }\n\
             message locked { level: error }\n\
             rule T.update { forbid emit locked }",
        );
        assert!(!diagnostics.has_errors());
        let hint = diagnostics
            .0
            .iter()
            .find(|d| d.code == Some("H0101"))
            .expect("casing hint");
        let fix = hint.fix.as_ref().expect("fix hint");
        assert_eq!(fix.edits.len(), 1);
        assert_eq!(fix.edits[0].new_text, "LOCKED");
    }
}
