use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The execution plan: runtime-ready structures compiled from the normalized
/// model. Read-only once built.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Plan {
    /// entity name -> operation -> WHERE-clause-ready fragment.
    pub access: BTreeMap<String, BTreeMap<String, AccessFragment>>,
    pub views: BTreeMap<String, ViewQuery>,
    pub jobs: BTreeMap<String, JobPlan>,
    pub migration: MigrationPlan,
}

/// A parameter-safe SQL fragment relative to the tuple alias `t`.
#[derive(Debug, Clone, Serialize)]
pub struct AccessFragment {
    pub where_sql: String,
    pub params: Vec<ParamSpec>,
    pub joins: Vec<JoinSpec>,
    /// Relation paths this fragment traverses, eg. `Ticket.author`.
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    /// Binding-time name, eg. `user.id` or `param.status`.
    pub name: String,
    /// 1-based position of the `$n` placeholder.
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinSpec {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    pub on: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewQuery {
    pub base_entity: String,
    pub base_table: String,
    pub columns: Vec<ColumnSpec>,
    pub joins: Vec<JoinSpec>,
    pub where_sql: Option<String>,
    pub params: Vec<ParamSpec>,
    /// Subscription topic, present iff the view is realtime.
    pub realtime_topic: Option<String>,
    /// The assembled SELECT statement.
    pub sql: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnSpec {
    /// The source path, eg. `author.name`.
    pub path: String,
    /// The output column alias, eg. `author_name`.
    pub alias: String,
    /// The FORGE type of the projected column.
    pub ty: String,
    pub sql: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobPlan {
    pub input_entity: Option<String>,
    pub capability_set: BTreeSet<String>,
    pub recipient_query: Option<RecipientQuery>,
    pub target_entity: Option<String>,
    pub field_mappings: Vec<FieldMappingPlan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipientQuery {
    pub entity: String,
    pub sql: String,
    pub params: Vec<ParamSpec>,
}

/// A `creates` mapping: the target field and the mapping expression as a
/// serializable tree over `data.*`, encoded verbatim.
#[derive(Debug, Clone, Serialize)]
pub struct FieldMappingPlan {
    pub field: String,
    pub expr: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct MigrationPlan {
    /// Content hash of the schema this migration produces.
    pub version: String,
    pub up: Vec<String>,
    pub down: Vec<String>,
    pub dangerous: Vec<DangerousChange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DangerousChange {
    pub statement: String,
    pub reason: String,
}

/// A database-shape snapshot, as recorded in a previously emitted artifact.
/// Callers pass it back through [crate::Options] to get a delta migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default, JsonSchema)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, TableSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default, JsonSchema)]
pub struct TableSnapshot {
    pub columns: BTreeMap<String, ColumnSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnSnapshot {
    pub sql_type: String,
    pub nullable: bool,
    pub unique: bool,
}
