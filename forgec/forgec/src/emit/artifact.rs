//! Artifact JSON: the full description of the compiled program for the
//! runtime host. Everything routes through `serde_json::Value`, whose object
//! map is a BTreeMap, so keys serialize alphabetically.

use serde_json::{json, Value};

use crate::ir::model::{DefaultValue, EntityModel, Model};
use crate::ir::plan::Plan;
use crate::planner::schema_snapshot;

pub(crate) fn emit(model: &Model, plan: &Plan) -> String {
    let artifact = json!({
        "app": {
            "name": model.app.name,
            "auth": model.app.auth,
            "database": model.app.database,
            "options": model.app.options,
        },
        "entities": model.entities.iter().map(entity_json).collect::<Vec<_>>(),
        "relations": model.relations,
        "messages": model.messages,
        "rules": model.rules,
        "access_plan": plan.access,
        "view_plan": plan.views,
        "job_plan": plan.jobs,
        "hooks": model.hooks,
        "migration": {
            "version": plan.migration.version,
            "up": plan.migration.up,
            "down": plan.migration.down,
            "dangerous": plan.migration.dangerous,
            // embedded so the next compile can diff against it
            "schema": schema_snapshot(model),
        },
    });

    let mut out = serde_json::to_string_pretty(&artifact).expect("artifact serializes");
    out.push('\n');
    out
}

fn entity_json(entity: &EntityModel) -> Value {
    let fields: Vec<Value> = entity
        .fields
        .iter()
        .map(|field| {
            let mut value = json!({
                "column": field.column,
                "name": field.name,
                "nullable": field.nullable,
                "primary": field.primary,
                "type": field.ty.to_string(),
                "unique": field.unique,
            });
            let object = value.as_object_mut().expect("field is an object");
            if let Some(default) = default_json(&field.default) {
                object.insert("default".to_string(), default);
            }
            if let Some(max) = field.max_length {
                object.insert("max_length".to_string(), json!(max));
            }
            if let Some(min) = field.min_length {
                object.insert("min_length".to_string(), json!(min));
            }
            value
        })
        .collect();

    json!({
        "fields": fields,
        "name": entity.name,
        "table": entity.table,
    })
}

fn default_json(default: &DefaultValue) -> Option<Value> {
    match default {
        DefaultValue::None => None,
        DefaultValue::Null => Some(Value::Null),
        DefaultValue::Boolean(b) => Some(json!(b)),
        DefaultValue::Integer(i) => Some(json!(i)),
        DefaultValue::Float(f) => Some(json!(f)),
        DefaultValue::String(s) => Some(json!(s)),
        DefaultValue::Variant(v) => Some(json!(v)),
    }
}
