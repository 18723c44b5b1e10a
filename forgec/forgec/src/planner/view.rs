//! View compilation: projected field paths become a SELECT with a minimal
//! join set; the filter becomes a WHERE template over `param.*`; realtime
//! views register a subscription topic keyed by name and parameter signature.

use forgec_parser::error::Diagnostics;
use itertools::Itertools;

use super::access::{Frame, FragmentBuilder};
use super::ModelIndex;
use crate::ir::model::{FieldType, ViewModel};
use crate::ir::plan::{ColumnSpec, JoinKind, JoinSpec, ViewQuery};

pub(crate) fn compile(
    index: &ModelIndex,
    view: &ViewModel,
    diagnostics: &mut Diagnostics,
) -> ViewQuery {
    let base_table = index.table(&view.source);
    let mut builder = FragmentBuilder::new(index, diagnostics, None);
    let frame = Frame {
        entity: &view.source,
        alias: "t",
        joins_allowed: true,
    };

    let mut columns = Vec::new();
    for path in &view.fields {
        let segments: Vec<&str> = path.iter().map(String::as_str).collect();
        let Some(sql) = builder.column_sql(&segments, &frame) else {
            continue;
        };
        columns.push(ColumnSpec {
            path: path.join("."),
            alias: path.join("_"),
            ty: path_type(index, &view.source, &segments),
            sql,
        });
    }

    let where_sql = view
        .filter
        .as_ref()
        .map(|filter| builder.compile_in_frame(filter, &frame));

    let (params, joins, _) = builder.into_parts();

    let select_list = columns
        .iter()
        .map(|c| format!("{} AS \"{}\"", c.sql, c.alias))
        .join(", ");
    let mut sql = format!("SELECT {select_list} FROM \"{base_table}\" AS t");
    for join in &joins {
        sql.push(' ');
        sql.push_str(&join_sql(join));
    }
    if let Some(where_sql) = &where_sql {
        sql.push_str(" WHERE ");
        sql.push_str(where_sql);
    }

    let realtime_topic = view.realtime.then(|| {
        let signature = params.iter().map(|p| p.name.as_str()).join(",");
        format!("view:{}:{signature}", view.name)
    });

    ViewQuery {
        base_entity: view.source.clone(),
        base_table,
        columns,
        joins,
        where_sql,
        params,
        realtime_topic,
        sql,
    }
}

pub(crate) fn join_sql(join: &JoinSpec) -> String {
    let kind = match join.kind {
        JoinKind::Inner => "JOIN",
        JoinKind::Left => "LEFT JOIN",
    };
    format!("{kind} \"{}\" AS {} ON {}", join.table, join.alias, join.on)
}

/// FORGE type of the final segment, for the typed client.
fn path_type(index: &ModelIndex, source: &str, segments: &[&str]) -> String {
    let mut entity = source.to_string();
    let mut ty = FieldType::Uuid;
    for segment in segments {
        if let Some(field) = index.field(&entity, segment) {
            if let FieldType::Ref { entity: target } = &field.ty {
                entity = target.clone();
            }
            ty = field.ty.clone();
        } else if let Some(relation) = index.relation(&entity, segment) {
            entity = relation.target.clone();
            ty = FieldType::Uuid;
        }
    }
    ty.to_string()
}
