//! Typed client library: a TypeScript surface with a record type per entity,
//! a query function per view, a call signature per action, and a constant
//! per message.

use itertools::Itertools;

use crate::ir::model::{FieldType, Model};
use crate::ir::plan::{Plan, ViewQuery};
use crate::utils;

pub(crate) fn emit(model: &Model, plan: &Plan) -> String {
    let mut out = String::new();
    out.push_str("// Generated by forgec. Do not edit.\n");

    for entity in &model.entities {
        out.push('\n');
        out.push_str(&format!("export interface {} {{\n", entity.name));
        for field in &entity.fields {
            let ty = ts_type(&field.ty);
            let ty = if field.nullable {
                format!("{ty} | null")
            } else {
                ty
            };
            out.push_str(&format!("  {}: {ty};\n", field.column));
        }
        out.push_str("}\n");
    }

    for (name, view) in &plan.views {
        out.push('\n');
        out.push_str(&view_types(name, view));
        out.push_str(&format!(
            "export declare function query{name}(params: {name}Params): Promise<{name}Row[]>;\n"
        ));
    }

    if !model.actions.is_empty() {
        out.push('\n');
        for action in &model.actions {
            let name = utils::camel_case(&action.name);
            match &action.input {
                Some(input) => out.push_str(&format!(
                    "export declare function {name}(input: {input}): Promise<void>;\n"
                )),
                None => out.push_str(&format!(
                    "export declare function {name}(): Promise<void>;\n"
                )),
            }
        }
    }

    if !model.messages.is_empty() {
        out.push('\n');
        for message in &model.messages {
            out.push_str(&format!("export const {0} = \"{0}\";\n", message.id));
        }
    }

    out
}

pub(crate) fn view_types(name: &str, view: &ViewQuery) -> String {
    let mut out = String::new();

    out.push_str(&format!("export interface {name}Params {{\n"));
    for param in &view.params {
        out.push_str(&format!("  {}: string;\n", param.name.replace('.', "_")));
    }
    out.push_str("}\n");

    out.push_str(&format!("export interface {name}Row {{\n"));
    for column in &view.columns {
        out.push_str(&format!(
            "  {}: {};\n",
            column.alias,
            ts_type_name(&column.ty)
        ));
    }
    out.push_str("}\n");

    out
}

/// FORGE type -> TypeScript type.
fn ts_type(ty: &FieldType) -> String {
    match ty {
        FieldType::String => "string".to_string(),
        FieldType::Int | FieldType::Float => "number".to_string(),
        FieldType::Bool => "boolean".to_string(),
        // ISO-8601 string
        FieldType::Time => "string".to_string(),
        FieldType::Uuid => "string".to_string(),
        FieldType::Json => "unknown".to_string(),
        FieldType::Enum { variants } => variants.iter().map(|v| format!("\"{v}\"")).join(" | "),
        FieldType::Ref { .. } => "string".to_string(),
        FieldType::List { element } => format!("{}[]", ts_type(element)),
    }
}

/// The same mapping over a rendered type name (view columns carry their
/// FORGE type as text).
pub(crate) fn ts_type_name(name: &str) -> String {
    if let Some(inner) = name.strip_prefix("enum(").and_then(|s| s.strip_suffix(')')) {
        return inner
            .split(',')
            .map(|v| format!("\"{}\"", v.trim()))
            .join(" | ");
    }
    if let Some(inner) = name.strip_prefix("list<").and_then(|s| s.strip_suffix('>')) {
        return format!("{}[]", ts_type_name(inner));
    }
    if name.starts_with("ref(") {
        return "string".to_string();
    }
    match name {
        "string" | "time" | "uuid" => "string".to_string(),
        "int" | "float" => "number".to_string(),
        "bool" => "boolean".to_string(),
        "json" => "unknown".to_string(),
        _ => "unknown".to_string(),
    }
}
