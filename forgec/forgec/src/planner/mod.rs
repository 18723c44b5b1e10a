//! The planner: compiles the normalized model into runtime-ready structures.
//! Access expressions become parameterized SQL fragments, views become
//! queries with minimal join sets, jobs get capability sets and recipient
//! queries, and the schema becomes a migration plan.

mod access;
mod job;
mod migration;
mod view;

use std::collections::BTreeMap;

use forgec_parser::error::Diagnostics;

use crate::ir::model::{EntityModel, FieldModel, Model, RelationModel};
use crate::ir::plan::Plan;
use crate::Options;

pub fn plan(model: &Model, options: &Options, diagnostics: &mut Diagnostics) -> Plan {
    let index = ModelIndex::new(model);
    let mut plan = Plan::default();

    for access in &model.access {
        let mut ops = BTreeMap::new();
        for (op, predicate) in &access.ops {
            let fragment = access::compile(&index, &access.entity, predicate, diagnostics);
            ops.insert(op.clone(), fragment);
        }
        plan.access.insert(access.entity.clone(), ops);
    }

    for view in &model.views {
        let query = view::compile(&index, view, diagnostics);
        plan.views.insert(view.name.clone(), query);
    }

    for job in &model.jobs {
        let job_plan = job::compile(&index, job, diagnostics);
        plan.jobs.insert(job.name.clone(), job_plan);
    }

    plan.migration = migration::plan(model, options.previous_schema.as_ref());

    log::debug!(
        "planned {} access entities, {} views, {} jobs, {} migration statements",
        plan.access.len(),
        plan.views.len(),
        plan.jobs.len(),
        plan.migration.up.len()
    );

    plan
}

/// The schema snapshot embedded in the artifact, so a later compile can be
/// handed it back for a delta migration.
pub(crate) fn schema_snapshot(model: &Model) -> crate::ir::plan::SchemaSnapshot {
    migration::snapshot(model)
}

/// Name-keyed lookups over the normalized model, shared by the sub-planners.
pub(crate) struct ModelIndex<'a> {
    pub entities: BTreeMap<&'a str, &'a EntityModel>,
    pub relations: BTreeMap<(&'a str, &'a str), &'a RelationModel>,
}

impl<'a> ModelIndex<'a> {
    pub fn new(model: &'a Model) -> Self {
        ModelIndex {
            entities: model
                .entities
                .iter()
                .map(|entity| (entity.name.as_str(), entity))
                .collect(),
            relations: model
                .relations
                .iter()
                .map(|relation| {
                    (
                        (relation.owner.as_str(), relation.field.as_str()),
                        relation,
                    )
                })
                .collect(),
        }
    }

    pub fn entity(&self, name: &str) -> Option<&'a EntityModel> {
        self.entities.get(name).copied()
    }

    pub fn field(&self, entity: &str, name: &str) -> Option<&'a FieldModel> {
        self.entity(entity)?.fields.iter().find(|f| f.name == name)
    }

    pub fn relation(&self, owner: &str, field: &str) -> Option<&'a RelationModel> {
        self.relations.get(&(owner, field)).copied()
    }

    pub fn table(&self, entity: &str) -> String {
        self.entity(entity)
            .map(|e| e.table.clone())
            .unwrap_or_else(|| crate::utils::table_name(entity))
    }
}
