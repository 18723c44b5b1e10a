//! End-to-end scenarios over the public compile API.

use std::path::PathBuf;

use forgec::{check, compile, compile_files, CompileResult, Options, SchemaSnapshot, SourceTree};

fn compile_source(source: &str) -> CompileResult {
    compile(&SourceTree::from(source), &Options::default())
}

fn error_codes(result: &CompileResult) -> Vec<String> {
    result
        .diagnostics
        .iter()
        .filter(|d| d.severity == forgec::Severity::Error)
        .filter_map(|d| d.code.clone())
        .collect()
}

const HAPPY_PATH: &str = r#"
    app TestApp { auth: token database: postgres }
    entity User { email: string unique name: string }
    access User { read: true write: true }
    view UserList { source: User fields: id, email, name }
"#;

#[test]
fn happy_path() {
    let result = compile_source(HAPPY_PATH);
    assert!(!result.has_errors(), "{:?}", result.diagnostics);

    let output = result.output.expect("artifacts");
    assert!(output.artifact_json.contains("TestApp"));
    assert!(output.artifact_json.contains("UserList"));
    assert!(output.schema_sql.contains("CREATE TABLE"));
    assert!(output.schema_sql.contains("\"users\""));
    assert!(!output.client.is_empty());
    assert!(!output.ui.is_empty());
}

#[test]
fn compilation_is_deterministic() {
    let first = compile_source(HAPPY_PATH).output.unwrap();
    let second = compile_source(HAPPY_PATH).output.unwrap();
    similar_asserts::assert_eq!(first.artifact_json, second.artifact_json);
    similar_asserts::assert_eq!(first.schema_sql, second.schema_sql);
    similar_asserts::assert_eq!(first.client, second.client);
    similar_asserts::assert_eq!(first.ui, second.ui);
}

#[test]
fn syntax_error_yields_no_output() {
    // missing colon
    let result = compile_source("app TestApp { auth token }");
    assert!(result.has_errors());
    assert!(result.output.is_none());
    assert!(error_codes(&result).iter().any(|c| c.starts_with("E02")));
}

#[test]
fn unreadable_file_is_reported() {
    let result = compile_files(&["/nonexistent/file.forge"], &Options::default());
    assert!(result.has_errors());
    assert!(result.output.is_none());
    assert_eq!(error_codes(&result), vec!["E0001"]);
}

#[test]
fn multiple_files_merge_into_one_unit() {
    let sources = SourceTree::new(
        [
            (
                PathBuf::from("app.forge"),
                "app Tracker { auth: session database: postgres }".to_string(),
            ),
            (
                PathBuf::from("entities.forge"),
                "entity Project { name: string }\nentity Task { title: string project: ref(Project) }"
                    .to_string(),
            ),
            (
                PathBuf::from("access.forge"),
                "access Project { read: true write: false }\naccess Task { read: true write: true }"
                    .to_string(),
            ),
        ],
        None,
    );

    let result = compile(&sources, &Options::default());
    assert!(!result.has_errors(), "{:?}", result.diagnostics);
    let artifact = result.output.unwrap().artifact_json;
    assert!(artifact.contains("Project"));
    assert!(artifact.contains("Task"));
}

#[test]
fn unresolved_entity_is_an_error() {
    let result = compile_source(
        "entity Ticket { subject: string }\nrelation Ticket.author -> NonExistent",
    );
    assert!(result.has_errors());
    assert!(result.output.is_none());
    assert_eq!(error_codes(&result), vec!["E0301"]);
}

#[test]
fn job_with_creates_clause() {
    let result = compile_source(
        r#"
        entity Ticket { subject: string }
        entity AuditLog {
            action: string
            description: string
            entity_id: uuid
        }
        job log_activity {
            input: Ticket
            creates: AuditLog {
                action: "ticket_created"
                description: data.subject
                entity_id: data.id
            }
        }
        hook Ticket.after_create { enqueue log_activity }
        "#,
    );
    assert!(!result.has_errors(), "{:?}", result.diagnostics);

    let artifact = result.output.unwrap().artifact_json;
    assert!(artifact.contains("\"target_entity\""));
    assert!(artifact.contains("AuditLog"));
    assert!(artifact.contains("\"field_mappings\""));
    assert!(artifact.contains("entity.create"));
}

#[test]
fn single_entity_schema_shape() {
    let result = compile_source("entity Note { body: string }");
    assert!(!result.has_errors());
    let output = result.output.unwrap();

    assert_eq!(output.schema_sql.matches("CREATE TABLE").count(), 1);
    for column in ["\"id\"", "\"body\"", "\"created_at\"", "\"updated_at\""] {
        assert!(output.schema_sql.contains(column), "missing {column}");
    }
    assert!(output.artifact_json.contains("\"Note\""));
}

#[test]
fn access_compiles_to_parameterized_sql() {
    let result = compile_source(
        r#"
        entity User { email: string }
        entity Ticket { subject: string author: ref(User) }
        access Ticket {
            read: user.id == author.id or subject == "public"
            write: user.id == author.id
        }
        "#,
    );
    assert!(!result.has_errors(), "{:?}", result.diagnostics);
    let artifact = result.output.unwrap().artifact_json;

    // user becomes a $n parameter, relation traversal becomes a join
    assert!(artifact.contains("$1"));
    assert!(artifact.contains("user.id"));
    assert!(artifact.contains("\"joins\""));
    // no interpolation of the request-bound user value
    assert!(!artifact.contains("'user.id'"));
}

#[test]
fn exists_form_for_many_traversal() {
    let result = compile_source(
        r#"
        entity Org { name: string }
        entity User { email: string }
        relation Org.members -> User many
        access Org {
            read: members.any(email == user.email)
            write: user.id in members.id
        }
        "#,
    );
    assert!(!result.has_errors(), "{:?}", result.diagnostics);
    let artifact = result.output.unwrap().artifact_json;
    assert!(artifact.contains("EXISTS (SELECT 1 FROM"));
}

#[test]
fn realtime_view_registers_topic() {
    let result = compile_source(
        r#"
        entity Ticket { subject: string status: enum(open, closed) }
        view OpenTickets {
            source: Ticket
            fields: id, subject
            filter: status == open and subject != param.exclude
            realtime: true
        }
        "#,
    );
    assert!(!result.has_errors(), "{:?}", result.diagnostics);
    let artifact = result.output.unwrap().artifact_json;
    assert!(artifact.contains("realtime_topic"));
    assert!(artifact.contains("view:OpenTickets:"));
    assert!(artifact.contains("param.exclude"));
}

#[test]
fn migration_delta_against_previous_schema() {
    let v1 = compile_source("entity User { email: string }").output.unwrap();
    let artifact: serde_json::Value = serde_json::from_str(&v1.artifact_json).unwrap();
    let snapshot: SchemaSnapshot =
        serde_json::from_value(artifact["migration"]["schema"].clone()).unwrap();

    // second version adds a column and drops nothing: plain delta
    let v2 = compile(
        &SourceTree::from("entity User { email: string name: string }"),
        &Options::default().with_previous_schema(snapshot.clone()),
    )
    .output
    .unwrap();
    assert!(v2.schema_sql.contains("ADD COLUMN \"name\""));
    assert!(!v2.schema_sql.contains("CREATE TABLE"));

    let v2_artifact: serde_json::Value = serde_json::from_str(&v2.artifact_json).unwrap();
    assert_eq!(v2_artifact["migration"]["dangerous"].as_array().unwrap().len(), 0);

    // dropping the entity is dangerous
    let v3 = compile(
        &SourceTree::from("entity Account { email: string }"),
        &Options::default().with_previous_schema(snapshot),
    )
    .output
    .unwrap();
    let v3_artifact: serde_json::Value = serde_json::from_str(&v3.artifact_json).unwrap();
    let dangerous = v3_artifact["migration"]["dangerous"].as_array().unwrap();
    assert!(!dangerous.is_empty());
    assert!(dangerous[0]["statement"]
        .as_str()
        .unwrap()
        .contains("DROP TABLE"));
}

#[test]
fn unchanged_schema_produces_empty_migration() {
    let v1 = compile_source(HAPPY_PATH).output.unwrap();
    let artifact: serde_json::Value = serde_json::from_str(&v1.artifact_json).unwrap();
    let version = artifact["migration"]["version"].as_str().unwrap().to_string();
    let snapshot: SchemaSnapshot =
        serde_json::from_value(artifact["migration"]["schema"].clone()).unwrap();

    let v2 = compile(
        &SourceTree::from(HAPPY_PATH),
        &Options::default().with_previous_schema(snapshot),
    )
    .output
    .unwrap();
    let v2_artifact: serde_json::Value = serde_json::from_str(&v2.artifact_json).unwrap();
    assert_eq!(v2_artifact["migration"]["version"].as_str().unwrap(), version);
    assert_eq!(v2_artifact["migration"]["up"].as_array().unwrap().len(), 0);
}

#[test]
fn typed_client_surface() {
    let result = compile_source(
        r#"
        app Desk { auth: token database: postgres }
        entity Ticket {
            subject: string
            status: enum(open, closed)
        }
        access Ticket { read: true write: true }
        view TicketList { source: Ticket fields: id, subject, status }
        action close_ticket { input: Ticket effect: entity.update }
        message TICKET_LOCKED { level: error default: "Locked." }
        rule Ticket.update { forbid if status == closed emit TICKET_LOCKED }
        test Ticket.update { given status = closed when update expect reject TICKET_LOCKED }
        "#,
    );
    assert!(!result.has_errors(), "{:?}", result.diagnostics);
    let output = result.output.unwrap();

    assert!(output.client.contains("export interface Ticket"));
    assert!(output.client.contains("\"open\" | \"closed\""));
    assert!(output.client.contains("queryTicketList"));
    assert!(output.client.contains("Promise<TicketListRow[]>"));
    assert!(output.client.contains("closeTicket"));
    assert!(output.client.contains("export const TICKET_LOCKED = \"TICKET_LOCKED\";"));

    assert!(output.ui.contains("useTicketList"));
    assert!(output.ui.contains("useCloseTicket"));
    assert!(output.ui.contains("loading: boolean"));
}

#[test]
fn check_stops_after_analysis() {
    let diagnostics = check(&SourceTree::from(HAPPY_PATH));
    assert!(diagnostics
        .iter()
        .all(|d| d.severity != forgec::Severity::Error));

    let diagnostics = check(&SourceTree::from("access Missing { read: true }"));
    assert!(diagnostics.iter().any(|d| d.code.as_deref() == Some("E0301")));
}

#[test]
fn diagnostics_render_plain_locations() {
    let sources = SourceTree::new(
        [(
            PathBuf::from("bad.forge"),
            "relation Ticket.author -> User".to_string(),
        )],
        None,
    );
    let result = compile(&sources, &Options::default());
    assert!(result.has_errors());

    insta::assert_snapshot!(
        result.diagnostics[0].plain(),
        @"bad.forge:1:1: error: entity `Ticket` not found [E0301]"
    );

    // the composed display carries the annotated source
    let display = result.diagnostics[0].display.as_ref().unwrap();
    assert!(display.contains("bad.forge"));
}

#[test]
fn warnings_do_not_suppress_output() {
    let result = compile_source("entity Orphan { leftover: string }");
    assert!(!result.has_errors());
    assert!(result.output.is_some());
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.severity == forgec::Severity::Warning));
}

#[test]
fn reference_safety() {
    let result = compile_source(HAPPY_PATH);
    let output = result.output.unwrap();
    for artifact in [
        &output.artifact_json,
        &output.schema_sql,
        &output.client,
        &output.ui,
    ] {
        assert!(!artifact.contains("Nonexistent"));
        assert!(!artifact.contains("Ticket"));
    }
}
