//! The emitter: four deterministic text artifacts produced from the
//! normalized model and the plan. Never re-parses or re-analyzes; same input
//! gives byte-identical output.

mod artifact;
mod client;
mod sql;
mod ui;

use crate::ir::model::Model;
use crate::ir::plan::Plan;
use crate::Options;

/// The four compiler outputs.
#[derive(Debug, Clone)]
pub struct Artifacts {
    /// Canonical JSON description of the compiled program.
    pub artifact_json: String,
    /// PostgreSQL schema + migration statements.
    pub schema_sql: String,
    /// Typed TypeScript client library.
    pub client: String,
    /// Typed TypeScript UI-binding library.
    pub ui: String,
}

pub(crate) fn emit(model: &Model, plan: &Plan, options: &Options) -> Artifacts {
    Artifacts {
        artifact_json: artifact::emit(model, plan),
        schema_sql: sql::emit(plan, options),
        client: client::emit(model, plan),
        ui: ui::emit(model, plan),
    }
}
