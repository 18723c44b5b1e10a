//! Job compilation: capability sets, the recipient query derived from
//! `needs`, and `creates` field mappings encoded as serializable expression
//! trees.

use std::collections::BTreeSet;

use forgec_parser::error::Diagnostics;
use itertools::Itertools;

use super::access::{Frame, FragmentBuilder};
use super::ModelIndex;
use crate::ir::model::{FieldType, JobModel, NeedsModel};
use crate::ir::plan::{FieldMappingPlan, JobPlan, RecipientQuery};
use crate::utils;

/// The closed set of effect tags the runtime knows how to authorize.
pub(crate) const CAPABILITIES: &[&str] = &[
    "email.send",
    "entity.create",
    "entity.delete",
    "entity.update",
    "file.write",
    "push.notify",
    "search.index",
    "webhook.post",
];

/// Effects in these namespaces act on a concrete row, so the job must
/// declare an input entity.
const INPUT_REQUIRED: &[&str] = &["entity", "email"];

pub(crate) fn compile(
    index: &ModelIndex,
    job: &JobModel,
    diagnostics: &mut Diagnostics,
) -> JobPlan {
    let mut capability_set = BTreeSet::new();

    match &job.effect {
        Some(effect) => {
            if CAPABILITIES.contains(&effect.as_str()) {
                capability_set.insert(effect.clone());
            } else {
                diagnostics.add_error(
                    "E0601",
                    format!("unknown capability tag `{effect}`"),
                    None,
                );
            }
            let namespace = effect.split('.').next().unwrap_or_default();
            if INPUT_REQUIRED.contains(&namespace) && job.input.is_none() {
                diagnostics.add_error(
                    "E0602",
                    format!(
                        "job `{}` has effect `{effect}` but no input entity",
                        job.name
                    ),
                    None,
                );
            }
        }
        None => {
            if job.creates.is_none() {
                diagnostics.add_error(
                    "E0603",
                    format!("job `{}` has no effect and no `creates` clause", job.name),
                    None,
                );
            }
        }
    }

    let recipient_query = match (&job.needs, &job.input) {
        (Some(needs), Some(input)) => compile_recipient(index, input, needs, diagnostics),
        _ => None,
    };

    let (target_entity, field_mappings) = match &job.creates {
        Some(creates) => {
            capability_set.insert("entity.create".to_string());
            let mappings = creates
                .mappings
                .iter()
                .map(|(field, expr)| FieldMappingPlan {
                    field: field.clone(),
                    // encoded verbatim; id/created_at/updated_at are
                    // runtime-provided
                    expr: serde_json::to_value(expr).unwrap_or(serde_json::Value::Null),
                })
                .collect();
            (Some(creates.entity.clone()), mappings)
        }
        None => (None, Vec::new()),
    };

    JobPlan {
        input_entity: job.input.clone(),
        capability_set,
        recipient_query,
        target_entity,
        field_mappings,
    }
}

/// `needs` traverses relations from the input row; every step becomes a
/// join, and the filter a WHERE clause on the final entity.
fn compile_recipient(
    index: &ModelIndex,
    input: &str,
    needs: &NeedsModel,
    diagnostics: &mut Diagnostics,
) -> Option<RecipientQuery> {
    let mut joins = Vec::new();
    let mut entity = input.to_string();
    let mut alias = "t".to_string();

    for (i, step) in needs.path.iter().enumerate() {
        let relation = index.relation(&entity, step)?;
        let next_alias = format!("r{}", i + 1);
        let table = index.table(&relation.target);

        if relation.many {
            let fk_column = format!("{}_id", utils::snake_case(&relation.inverse));
            joins.push(format!(
                "JOIN \"{table}\" AS {next_alias} ON {next_alias}.\"{fk_column}\" = {alias}.\"id\""
            ));
        } else {
            let fk_column = index
                .field(&entity, step)
                .filter(|f| matches!(f.ty, FieldType::Ref { .. }))
                .map(|f| f.column.clone())
                .unwrap_or_else(|| format!("{}_id", utils::snake_case(step)));
            joins.push(format!(
                "JOIN \"{table}\" AS {next_alias} ON {next_alias}.\"id\" = {alias}.\"{fk_column}\""
            ));
        }

        entity = relation.target.clone();
        alias = next_alias;
    }

    let mut builder = FragmentBuilder::new(
        index,
        diagnostics,
        Some(("t".to_string(), input.to_string())),
    );
    let where_sql = needs.filter.as_ref().map(|filter| {
        let frame = Frame {
            entity: &entity,
            alias: &alias,
            joins_allowed: false,
        };
        builder.compile_in_frame(filter, &frame)
    });
    let (params, _, _) = builder.into_parts();

    let mut sql = format!(
        "SELECT DISTINCT {alias}.\"id\" FROM \"{}\" AS t",
        index.table(input)
    );
    if !joins.is_empty() {
        sql.push(' ');
        sql.push_str(&joins.iter().join(" "));
    }
    if let Some(where_sql) = &where_sql {
        sql.push_str(" WHERE ");
        sql.push_str(where_sql);
    }

    Some(RecipientQuery {
        entity,
        sql,
        params,
    })
}
