//! Migration planning: snapshot the schema, hash it into a version, and
//! generate forward/reverse DDL. With a previous snapshot the plan is a
//! delta; every `DROP` and every type change is flagged as dangerous.

use itertools::Itertools;
use sha2::{Digest, Sha256};

use crate::ir::model::{EntityModel, FieldType, Model, RelationModel};
use crate::ir::plan::{
    ColumnSnapshot, DangerousChange, MigrationPlan, SchemaSnapshot, TableSnapshot,
};
use crate::utils;

pub(crate) fn plan(model: &Model, previous: Option<&SchemaSnapshot>) -> MigrationPlan {
    let snapshot = snapshot(model);
    let version = version_hash(&snapshot);

    match previous {
        Some(previous) if *previous != snapshot => {
            diff(previous, &snapshot, model, version)
        }
        Some(_) => MigrationPlan {
            version,
            ..MigrationPlan::default()
        },
        None => fresh(model, version),
    }
}

/// The database shape the model implies, also embedded in the artifact so a
/// later compile can diff against it.
pub(crate) fn snapshot(model: &Model) -> SchemaSnapshot {
    let mut schema = SchemaSnapshot::default();

    for entity in &model.entities {
        let mut table = TableSnapshot::default();
        for field in &entity.fields {
            table.columns.insert(
                field.column.clone(),
                ColumnSnapshot {
                    sql_type: field.ty.sql().to_string(),
                    nullable: field.nullable,
                    unique: field.unique,
                },
            );
        }
        for relation in relation_columns(model, &entity.name) {
            table.columns.insert(
                relation,
                ColumnSnapshot {
                    sql_type: "UUID".to_string(),
                    nullable: true,
                    unique: false,
                },
            );
        }
        schema.tables.insert(entity.table.clone(), table);
    }

    schema
}

/// Foreign-key columns an entity carries for relations that are not backed
/// by a `ref` field: declared `one` relations, and the one-side of a `many`
/// relation (which lives on the target).
fn relation_columns(model: &Model, entity: &str) -> Vec<String> {
    model
        .relations
        .iter()
        .filter(|r| !r.many && r.owner == entity)
        .filter(|r| {
            model
                .entities
                .iter()
                .find(|e| e.name == r.owner)
                .map_or(false, |e| e.field(&r.field).is_none())
        })
        .map(|r| format!("{}_id", utils::snake_case(&r.field)))
        .collect()
}

fn version_hash(snapshot: &SchemaSnapshot) -> String {
    let canonical = serde_json::to_string(snapshot).expect("schema snapshot serializes");
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{digest:x}")
}

fn fresh(model: &Model, version: String) -> MigrationPlan {
    let mut up = Vec::new();
    let mut down = Vec::new();

    for entity in &model.entities {
        up.push(create_table_sql(model, entity));
    }
    for entity in &model.entities {
        up.extend(index_sql(model, entity));
    }
    // Foreign keys go last so declaration order never forward-references a
    // missing table.
    for entity in &model.entities {
        up.extend(constraint_sql(model, entity));
    }

    // reverse operations in reverse order
    for statement in up.iter().rev() {
        if let Some(rest) = statement.strip_prefix("ALTER TABLE ") {
            let table = rest.split_whitespace().next().unwrap_or_default();
            let constraint = statement
                .split("ADD CONSTRAINT ")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .unwrap_or_default();
            down.push(format!("ALTER TABLE {table} DROP CONSTRAINT {constraint};"));
        } else if let Some(rest) = statement.strip_prefix("CREATE INDEX ") {
            let name = rest.split_whitespace().next().unwrap_or_default();
            down.push(format!("DROP INDEX {name};"));
        } else if let Some(rest) = statement.strip_prefix("CREATE TABLE ") {
            let name = rest.split_whitespace().next().unwrap_or_default();
            down.push(format!("DROP TABLE {name};"));
        }
    }

    MigrationPlan {
        version,
        up,
        down,
        dangerous: Vec::new(),
    }
}

fn create_table_sql(model: &Model, entity: &EntityModel) -> String {
    let mut columns = Vec::new();

    for field in &entity.fields {
        let mut column = format!("  \"{}\" {}", field.column, field.ty.sql());
        if field.primary {
            column.push_str(" PRIMARY KEY");
        } else {
            if !field.nullable {
                column.push_str(" NOT NULL");
            }
            if field.unique {
                column.push_str(" UNIQUE");
            }
        }
        columns.push(column);
    }

    for relation in relations_without_field(model, entity) {
        columns.push(format!(
            "  \"{}_id\" UUID",
            utils::snake_case(&relation.field)
        ));
    }

    format!(
        "CREATE TABLE \"{}\" (\n{}\n);",
        entity.table,
        columns.join(",\n")
    )
}

/// Indexes for foreign keys; `unique` fields are covered by their inline
/// UNIQUE constraint.
fn index_sql(model: &Model, entity: &EntityModel) -> Vec<String> {
    let mut statements = Vec::new();

    for field in &entity.fields {
        if matches!(field.ty, FieldType::Ref { .. }) {
            statements.push(format!(
                "CREATE INDEX \"idx_{0}_{1}\" ON \"{0}\" (\"{1}\");",
                entity.table, field.column
            ));
        }
    }
    for relation in relations_without_field(model, entity) {
        statements.push(format!(
            "CREATE INDEX \"idx_{0}_{1}_id\" ON \"{0}\" (\"{1}_id\");",
            entity.table,
            utils::snake_case(&relation.field)
        ));
    }

    statements
}

/// Foreign-key constraints, emitted after every table exists.
fn constraint_sql(model: &Model, entity: &EntityModel) -> Vec<String> {
    let mut statements = Vec::new();

    for field in &entity.fields {
        if let FieldType::Ref { entity: target } = &field.ty {
            statements.push(format!(
                "ALTER TABLE \"{0}\" ADD CONSTRAINT \"fk_{0}_{1}\" FOREIGN KEY (\"{1}\") REFERENCES \"{2}\"(\"id\");",
                entity.table,
                field.column,
                table_of(model, target)
            ));
        }
    }
    for relation in relations_without_field(model, entity) {
        statements.push(format!(
            "ALTER TABLE \"{0}\" ADD CONSTRAINT \"fk_{0}_{1}_id\" FOREIGN KEY (\"{1}_id\") REFERENCES \"{2}\"(\"id\");",
            entity.table,
            utils::snake_case(&relation.field),
            table_of(model, &relation.target)
        ));
    }

    statements
}

fn relations_without_field<'m>(
    model: &'m Model,
    entity: &'m EntityModel,
) -> impl Iterator<Item = &'m RelationModel> {
    model
        .relations
        .iter()
        .filter(move |r| !r.many && r.owner == entity.name && entity.field(&r.field).is_none())
}

fn table_of(model: &Model, entity: &str) -> String {
    model
        .entities
        .iter()
        .find(|e| e.name == entity)
        .map(|e| e.table.clone())
        .unwrap_or_else(|| utils::table_name(entity))
}

fn diff(
    previous: &SchemaSnapshot,
    current: &SchemaSnapshot,
    model: &Model,
    version: String,
) -> MigrationPlan {
    let mut steps: Vec<(String, String, Option<DangerousChange>)> = Vec::new();

    for (table, columns) in &current.tables {
        if !previous.tables.contains_key(table) {
            let statement = model
                .entities
                .iter()
                .find(|e| e.table == *table)
                .map(|e| create_table_sql(model, e))
                .unwrap_or_else(|| create_table_from_snapshot(table, columns));
            steps.push((statement, format!("DROP TABLE \"{table}\";"), None));
        }
    }

    for (table, columns) in &previous.tables {
        if !current.tables.contains_key(table) {
            let statement = format!("DROP TABLE \"{table}\";");
            let danger = DangerousChange {
                statement: statement.clone(),
                reason: format!("dropping table \"{table}\" destroys its rows"),
            };
            steps.push((
                statement,
                create_table_from_snapshot(table, columns),
                Some(danger),
            ));
        }
    }

    for (table, current_columns) in &current.tables {
        let Some(previous_columns) = previous.tables.get(table) else {
            continue;
        };

        for (column, spec) in &current_columns.columns {
            match previous_columns.columns.get(column) {
                None => {
                    steps.push((
                        format!(
                            "ALTER TABLE \"{table}\" ADD COLUMN {};",
                            column_def(column, spec)
                        ),
                        format!("ALTER TABLE \"{table}\" DROP COLUMN \"{column}\";"),
                        None,
                    ));
                }
                Some(previous_spec) => {
                    if previous_spec.sql_type != spec.sql_type {
                        let statement = format!(
                            "ALTER TABLE \"{table}\" ALTER COLUMN \"{column}\" TYPE {};",
                            spec.sql_type
                        );
                        let danger = DangerousChange {
                            statement: statement.clone(),
                            reason: format!(
                                "changing \"{table}\".\"{column}\" from {} to {} may lose data",
                                previous_spec.sql_type, spec.sql_type
                            ),
                        };
                        steps.push((
                            statement,
                            format!(
                                "ALTER TABLE \"{table}\" ALTER COLUMN \"{column}\" TYPE {};",
                                previous_spec.sql_type
                            ),
                            Some(danger),
                        ));
                    }
                    if previous_spec.nullable != spec.nullable {
                        let (statement, reverse) = if spec.nullable {
                            (
                                format!(
                                    "ALTER TABLE \"{table}\" ALTER COLUMN \"{column}\" DROP NOT NULL;"
                                ),
                                format!(
                                    "ALTER TABLE \"{table}\" ALTER COLUMN \"{column}\" SET NOT NULL;"
                                ),
                            )
                        } else {
                            (
                                format!(
                                    "ALTER TABLE \"{table}\" ALTER COLUMN \"{column}\" SET NOT NULL;"
                                ),
                                format!(
                                    "ALTER TABLE \"{table}\" ALTER COLUMN \"{column}\" DROP NOT NULL;"
                                ),
                            )
                        };
                        let danger = (!spec.nullable).then(|| DangerousChange {
                            statement: statement.clone(),
                            reason: format!(
                                "tightening \"{table}\".\"{column}\" to NOT NULL fails on existing nulls"
                            ),
                        });
                        steps.push((statement, reverse, danger));
                    }
                }
            }
        }

        for (column, previous_spec) in &previous_columns.columns {
            if !current_columns.columns.contains_key(column) {
                let statement = format!("ALTER TABLE \"{table}\" DROP COLUMN \"{column}\";");
                let danger = DangerousChange {
                    statement: statement.clone(),
                    reason: format!(
                        "dropping column \"{table}\".\"{column}\" destroys its values"
                    ),
                };
                steps.push((
                    statement,
                    format!(
                        "ALTER TABLE \"{table}\" ADD COLUMN {};",
                        column_def(column, previous_spec)
                    ),
                    Some(danger),
                ));
            }
        }
    }

    let mut plan = MigrationPlan {
        version,
        ..MigrationPlan::default()
    };
    for (up, down, danger) in steps {
        plan.up.push(up);
        plan.down.push(down);
        plan.dangerous.extend(danger);
    }
    plan.down.reverse();
    plan
}

fn column_def(column: &str, spec: &ColumnSnapshot) -> String {
    let mut def = format!("\"{column}\" {}", spec.sql_type);
    if !spec.nullable {
        def.push_str(" NOT NULL");
    }
    if spec.unique {
        def.push_str(" UNIQUE");
    }
    def
}

fn create_table_from_snapshot(table: &str, columns: &TableSnapshot) -> String {
    let defs = columns
        .columns
        .iter()
        .map(|(column, spec)| format!("  {}", column_def(column, spec)))
        .join(",\n");
    format!("CREATE TABLE \"{table}\" (\n{defs}\n);")
}
