//! Schema SQL: the migration's forward statements, grouped into tables,
//! indexes and constraints with blank lines between groups.

use itertools::Itertools;

use crate::ir::plan::Plan;
use crate::Options;

pub(crate) fn emit(plan: &Plan, options: &Options) -> String {
    let mut groups: Vec<(&str, Vec<&String>)> = vec![
        ("tables", Vec::new()),
        ("indexes", Vec::new()),
        ("constraints", Vec::new()),
    ];

    for statement in &plan.migration.up {
        let group = if statement.starts_with("CREATE TABLE") {
            0
        } else if statement.starts_with("CREATE INDEX") {
            1
        } else {
            2
        };
        groups[group].1.push(statement);
    }

    let sql = groups
        .iter()
        .filter(|(_, statements)| !statements.is_empty())
        .map(|(name, statements)| format!("-- {name}\n{}", statements.iter().join("\n\n")))
        .join("\n\n");
    let sql = format!("{sql}\n");

    if options.format {
        sqlformat::format(
            &sql,
            &sqlformat::QueryParams::default(),
            &sqlformat::FormatOptions::default(),
        ) + "\n"
    } else {
        sql
    }
}
