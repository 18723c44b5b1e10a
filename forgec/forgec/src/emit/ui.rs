//! Typed UI-binding library: a reactive `useX` hook per view and a mutation
//! binding per action, typed against the client library.

use itertools::Itertools;

use crate::ir::model::Model;
use crate::ir::plan::Plan;
use crate::utils;

pub(crate) fn emit(model: &Model, plan: &Plan) -> String {
    let mut out = String::new();
    out.push_str("// Generated by forgec. Do not edit.\n");

    let mut imports: Vec<String> = Vec::new();
    for name in plan.views.keys() {
        imports.push(format!("{name}Params"));
        imports.push(format!("{name}Row"));
    }
    for action in &model.actions {
        if let Some(input) = &action.input {
            if !imports.contains(input) {
                imports.push(input.clone());
            }
        }
    }
    if !imports.is_empty() {
        out.push_str(&format!(
            "import type {{ {} }} from \"./client\";\n",
            imports.iter().join(", ")
        ));
    }

    for name in plan.views.keys() {
        out.push('\n');
        out.push_str(&format!(
            "export declare function use{name}(params: {name}Params): {{\n  data: {name}Row[] | null;\n  loading: boolean;\n  error: Error | null;\n}};\n"
        ));
    }

    for action in &model.actions {
        out.push('\n');
        let hook = pascal_case(&action.name);
        let input = match &action.input {
            Some(input) => format!("input: {input}"),
            None => String::new(),
        };
        out.push_str(&format!(
            "export declare function use{hook}(): {{\n  mutate: ({input}) => Promise<void>;\n  loading: boolean;\n  error: Error | null;\n}};\n"
        ));
    }

    out
}

fn pascal_case(name: &str) -> String {
    let camel = utils::camel_case(name);
    let mut chars = camel.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => camel,
    }
}
