//! Access compilation: a boolean predicate over `user`, `source`, entity
//! fields and relation paths becomes a WHERE-clause-ready SQL fragment
//! relative to the tuple alias `t`. Request-bound values become ordered `$n`
//! parameters; user data is never interpolated.

use std::collections::HashMap;

use forgec_parser::error::Diagnostics;
use forgec_parser::lexer::lr::Literal;
use forgec_parser::parser::ast::{BinOp, Expr, ExprKind, UnOp};
use forgec_parser::span::Span;

use super::ModelIndex;
use crate::ir::model::FieldType;
use crate::ir::plan::{AccessFragment, JoinKind, JoinSpec, ParamSpec};

pub(crate) fn compile(
    index: &ModelIndex,
    entity: &str,
    predicate: &Expr,
    diagnostics: &mut Diagnostics,
) -> AccessFragment {
    let mut builder = FragmentBuilder::new(index, diagnostics, None);
    let where_sql = builder.compile(predicate, entity);
    builder.into_fragment(where_sql)
}

/// Reserved binding-frame names that never resolve as entity fields.
const BINDINGS: &[&str] = &["user", "source", "data", "param"];

pub(crate) struct FragmentBuilder<'a, 'd> {
    index: &'a ModelIndex<'a>,
    diagnostics: &'d mut Diagnostics,
    /// `data.*` bound to a table alias, for recipient queries.
    data: Option<(String, String)>,
    params: Vec<ParamSpec>,
    joins: Vec<JoinSpec>,
    join_aliases: HashMap<String, String>,
    dependencies: Vec<String>,
    subqueries: usize,
}

#[derive(Clone, Copy)]
pub(crate) struct Frame<'f> {
    pub entity: &'f str,
    pub alias: &'f str,
    /// Only the top-level tuple may grow the join list; correlated subquery
    /// frames fall back to scalar subqueries.
    pub joins_allowed: bool,
}

enum Value {
    Sql(String),
    Collection(CollectionCtx),
}

/// A `many` relation traversal, ready to become an EXISTS / COUNT subquery.
struct CollectionCtx {
    entity: String,
    table: String,
    alias: String,
    /// Correlation of the subquery row to the outer row.
    link: String,
    wheres: Vec<String>,
    /// Set when a scalar was projected over the collection.
    projection: Option<String>,
}

impl<'a, 'd> FragmentBuilder<'a, 'd> {
    pub fn new(
        index: &'a ModelIndex<'a>,
        diagnostics: &'d mut Diagnostics,
        data: Option<(String, String)>,
    ) -> Self {
        FragmentBuilder {
            index,
            diagnostics,
            data,
            params: Vec::new(),
            joins: Vec::new(),
            join_aliases: HashMap::new(),
            dependencies: Vec::new(),
            subqueries: 0,
        }
    }

    pub fn compile(&mut self, predicate: &Expr, entity: &str) -> String {
        let frame = Frame {
            entity,
            alias: "t",
            joins_allowed: true,
        };
        self.expr_sql(predicate, &frame)
    }

    /// Compile with an explicit frame; used for view filters and recipient
    /// queries where the tuple alias differs.
    pub fn compile_in_frame(&mut self, predicate: &Expr, frame: &Frame) -> String {
        self.expr_sql(predicate, frame)
    }

    pub fn into_fragment(self, where_sql: String) -> AccessFragment {
        AccessFragment {
            where_sql,
            params: self.params,
            joins: self.joins,
            dependencies: self.dependencies,
        }
    }

    pub fn into_parts(self) -> (Vec<ParamSpec>, Vec<JoinSpec>, Vec<String>) {
        (self.params, self.joins, self.dependencies)
    }

    /// Resolve a projection path to column SQL; `None` for collection paths.
    pub fn column_sql(&mut self, segments: &[&str], frame: &Frame) -> Option<String> {
        match self.resolve_segments(segments, frame, None) {
            Value::Sql(sql) => Some(sql),
            Value::Collection(_) => None,
        }
    }

    fn expr_sql(&mut self, expr: &Expr, frame: &Frame) -> String {
        match &expr.kind {
            ExprKind::Literal(lit) => literal_sql(lit),
            ExprKind::Ident(_) | ExprKind::Path { .. } => {
                match self.resolve_path_expr(expr, frame) {
                    Value::Sql(sql) => sql,
                    Value::Collection(_) => {
                        self.invalid_path(
                            "a `many` relation path needs any/all/count or `in`",
                            expr.span,
                        );
                        "FALSE".to_string()
                    }
                }
            }
            ExprKind::Unary(unary) => {
                let inner = self.expr_sql(&unary.expr, frame);
                match unary.op {
                    UnOp::Not => format!("NOT ({inner})"),
                    UnOp::Neg => format!("(-{inner})"),
                }
            }
            ExprKind::Binary(binary) => self.binary_sql(binary, frame, expr.span),
            ExprKind::Call { callee, args } => self.call_sql(callee, args, frame, expr.span),
        }
    }

    fn binary_sql(
        &mut self,
        binary: &forgec_parser::parser::ast::BinaryExpr,
        frame: &Frame,
        span: Option<Span>,
    ) -> String {
        match binary.op {
            BinOp::And | BinOp::Or => {
                let op = if binary.op == BinOp::And { "AND" } else { "OR" };
                let left = self.expr_sql(&binary.left, frame);
                let right = self.expr_sql(&binary.right, frame);
                format!("({left} {op} {right})")
            }
            BinOp::In => self.in_sql(&binary.left, &binary.right, frame, span),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => {
                let op = match binary.op {
                    BinOp::Eq => "=",
                    BinOp::Ne => "<>",
                    BinOp::Lt => "<",
                    BinOp::Lte => "<=",
                    BinOp::Gt => ">",
                    _ => ">=",
                };

                // A bare identifier compared against an enum field is a
                // variant literal, not a column.
                if let Some((value, variant)) =
                    self.variant_comparison(&binary.left, &binary.right, frame)
                {
                    return format!("({value} {op} {variant})");
                }
                // the variant may also be the left operand
                if let Some((value, variant)) =
                    self.variant_comparison(&binary.right, &binary.left, frame)
                {
                    return format!("({variant} {op} {value})");
                }

                let left = self.expr_sql(&binary.left, frame);
                let right = self.expr_sql(&binary.right, frame);
                format!("({left} {op} {right})")
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                let op = match binary.op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    _ => "%",
                };
                let left = self.expr_sql(&binary.left, frame);
                let right = self.expr_sql(&binary.right, frame);
                format!("({left} {op} {right})")
            }
        }
    }

    /// If `other` is a bare variant of the enum-typed `value`, return the
    /// compiled value and the quoted variant literal.
    fn variant_comparison(
        &mut self,
        value: &Expr,
        other: &Expr,
        frame: &Frame,
    ) -> Option<(String, String)> {
        let ExprKind::Ident(name) = &other.kind else {
            return None;
        };
        if BINDINGS.contains(&name.as_str()) || self.index.field(frame.entity, name).is_some() {
            return None;
        }
        let FieldType::Enum { variants } = self.field_type_of(value, frame)? else {
            return None;
        };
        if !variants.contains(name) {
            return None;
        }
        let value_sql = self.expr_sql(value, frame);
        Some((value_sql, quote_str(name)))
    }

    fn in_sql(
        &mut self,
        left: &Expr,
        right: &Expr,
        frame: &Frame,
        span: Option<Span>,
    ) -> String {
        let left_sql = self.expr_sql(left, frame);
        match self.resolve_path_expr(right, frame) {
            Value::Collection(ctx) => {
                let target = ctx
                    .projection
                    .clone()
                    .unwrap_or_else(|| format!("{}.\"id\"", ctx.alias));
                self.exists_sql(&ctx, Some(format!("{target} = {left_sql}")), false)
            }
            Value::Sql(_) => {
                self.invalid_path("`in` requires a `many` relation path", span);
                "FALSE".to_string()
            }
        }
    }

    fn call_sql(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        frame: &Frame,
        span: Option<Span>,
    ) -> String {
        match &callee.kind {
            ExprKind::Ident(name) if name == "now" => "now()".to_string(),
            ExprKind::Path { base, name }
                if matches!(name.as_str(), "any" | "all" | "count" | "where") =>
            {
                let Some(ctx) = self.resolve_collection(base, frame) else {
                    self.invalid_path("collection operator on a non-collection path", span);
                    return "FALSE".to_string();
                };

                match (name.as_str(), args.first()) {
                    ("count", _) => {
                        let mut conditions = vec![ctx.link.clone()];
                        conditions.extend(ctx.wheres.iter().cloned());
                        format!(
                            "(SELECT COUNT(*) FROM \"{}\" AS {} WHERE {})",
                            ctx.table,
                            ctx.alias,
                            conditions.join(" AND ")
                        )
                    }
                    ("any" | "all", Some(arg)) => {
                        let inner_frame = Frame {
                            entity: ctx.entity.as_str(),
                            alias: ctx.alias.as_str(),
                            joins_allowed: false,
                        };
                        let predicate = self.expr_sql(arg, &inner_frame);
                        if name == "any" {
                            self.exists_sql(&ctx, Some(predicate), false)
                        } else {
                            // all(p) <=> not exists a row violating p
                            self.exists_sql(&ctx, Some(format!("NOT ({predicate})")), true)
                        }
                    }
                    // a trailing bare `where` produces no boolean
                    _ => {
                        self.invalid_path(
                            "`where` must be followed by any, all or count",
                            span,
                        );
                        "FALSE".to_string()
                    }
                }
            }
            _ => {
                self.invalid_path("this expression cannot be compiled to SQL", span);
                "FALSE".to_string()
            }
        }
    }

    fn resolve_collection(&mut self, expr: &Expr, frame: &Frame) -> Option<CollectionCtx> {
        if let ExprKind::Call { callee, args } = &expr.kind {
            if let ExprKind::Path { base, name } = &callee.kind {
                if name == "where" {
                    let mut ctx = self.resolve_collection(base, frame)?;
                    let arg = args.first()?;
                    let inner_frame = Frame {
                        entity: ctx.entity.as_str(),
                        alias: ctx.alias.as_str(),
                        joins_allowed: false,
                    };
                    let predicate = self.expr_sql(arg, &inner_frame);
                    ctx.wheres.push(predicate);
                    return Some(ctx);
                }
            }
            return None;
        }

        match self.resolve_path_expr(expr, frame) {
            Value::Collection(ctx) => Some(ctx),
            Value::Sql(_) => None,
        }
    }

    fn exists_sql(&self, ctx: &CollectionCtx, extra: Option<String>, negate: bool) -> String {
        let mut conditions = vec![ctx.link.clone()];
        conditions.extend(ctx.wheres.iter().cloned());
        conditions.extend(extra);
        let exists = format!(
            "EXISTS (SELECT 1 FROM \"{}\" AS {} WHERE {})",
            ctx.table,
            ctx.alias,
            conditions.join(" AND ")
        );
        if negate {
            format!("NOT {exists}")
        } else {
            exists
        }
    }

    fn resolve_path_expr(&mut self, expr: &Expr, frame: &Frame) -> Value {
        let Some(segments) = expr.as_path() else {
            self.invalid_path("unsupported path expression", expr.span);
            return Value::Sql("NULL".to_string());
        };
        self.resolve_segments(&segments, frame, expr.span)
    }

    fn resolve_segments(&mut self, segments: &[&str], frame: &Frame, span: Option<Span>) -> Value {
        // Binding frames win over fields, matching the analyzer's resolution
        // order.
        match segments[0] {
            "user" | "param" => {
                let name = if segments.len() == 1 && segments[0] == "user" {
                    "user.id".to_string()
                } else {
                    segments.join(".")
                };
                return Value::Sql(self.param(name));
            }
            "source" => {
                if segments.len() == 1 {
                    return Value::Sql(format!("{}.\"id\"", frame.alias));
                }
                return self.walk(
                    frame.entity.to_string(),
                    frame.alias.to_string(),
                    &segments[1..],
                    frame,
                    span,
                );
            }
            "data" => {
                return match self.data.clone() {
                    Some((alias, entity)) => {
                        if segments.len() == 1 {
                            Value::Sql(format!("{alias}.\"id\""))
                        } else {
                            self.walk(entity, alias, &segments[1..], frame, span)
                        }
                    }
                    // Outside recipient queries `data.*` binds at run time.
                    None => Value::Sql(self.param(segments.join("."))),
                };
            }
            _ => {}
        }

        self.walk(
            frame.entity.to_string(),
            frame.alias.to_string(),
            segments,
            frame,
            span,
        )
    }

    fn walk(
        &mut self,
        mut entity: String,
        mut alias: String,
        segments: &[&str],
        frame: &Frame,
        span: Option<Span>,
    ) -> Value {
        let mut path_key = String::new();

        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            if !path_key.is_empty() {
                path_key.push('.');
            }
            path_key.push_str(segment);

            if let Some(field) = self.index.field(&entity, segment) {
                match &field.ty {
                    FieldType::Ref { entity: target } => {
                        if last {
                            // the fk value itself
                            return Value::Sql(format!("{alias}.\"{}\"", field.column));
                        }
                        self.dependencies.push(format!("{entity}.{segment}"));
                        let target = target.clone();
                        let nullable = field.nullable;
                        let column = field.column.clone();
                        match self.join_step(
                            &path_key, &alias, &target, &column, nullable, frame,
                            segments, i, span,
                        ) {
                            StepResult::Stepped(next_alias) => {
                                entity = target;
                                alias = next_alias;
                            }
                            StepResult::Value(value) => return value,
                        }
                    }
                    _ => {
                        if !last {
                            self.invalid_path(
                                &format!("cannot project through scalar `{segment}`"),
                                span,
                            );
                            return Value::Sql("NULL".to_string());
                        }
                        return Value::Sql(format!("{alias}.\"{}\"", field.column));
                    }
                }
            } else if let Some(relation) = self.index.relation(&entity, segment) {
                self.dependencies.push(format!("{entity}.{segment}"));
                if relation.many {
                    let target_entity = relation.target.clone();
                    let table = self.index.table(&target_entity);
                    let sub_alias = self.next_subquery_alias();
                    let fk_column = format!("{}_id", crate::utils::snake_case(&relation.inverse));
                    let link = format!("{sub_alias}.\"{fk_column}\" = {alias}.\"id\"");

                    // An optional trailing segment projects a scalar over the
                    // collection.
                    let projection = match segments.len() - i {
                        1 => None,
                        2 => {
                            let proj = segments[i + 1];
                            match self.index.field(&target_entity, proj) {
                                Some(field) => Some(format!("{sub_alias}.\"{}\"", field.column)),
                                None => {
                                    self.invalid_path(
                                        &format!("no field `{proj}` on `{target_entity}`"),
                                        span,
                                    );
                                    None
                                }
                            }
                        }
                        _ => {
                            self.invalid_path(
                                "nested `many` traversals cannot be compiled",
                                span,
                            );
                            None
                        }
                    };

                    return Value::Collection(CollectionCtx {
                        entity: target_entity,
                        table,
                        alias: sub_alias,
                        link,
                        wheres: Vec::new(),
                        projection,
                    });
                }

                let fk_column = format!("{}_id", crate::utils::snake_case(segment));
                if last {
                    return Value::Sql(format!("{alias}.\"{fk_column}\""));
                }
                let target = relation.target.clone();
                match self.join_step(
                    &path_key, &alias, &target, &fk_column, false, frame, segments, i, span,
                ) {
                    StepResult::Stepped(next_alias) => {
                        entity = target;
                        alias = next_alias;
                    }
                    StepResult::Value(value) => return value,
                }
            } else {
                self.invalid_path(&format!("no field `{segment}` on `{entity}`"), span);
                return Value::Sql("NULL".to_string());
            }
        }

        // A path ending on a record row; compare by primary key.
        Value::Sql(format!("{alias}.\"id\""))
    }

    /// Follow a `one` step: a JOIN at the top level, a correlated scalar
    /// subquery inside EXISTS frames.
    #[allow(clippy::too_many_arguments)]
    fn join_step(
        &mut self,
        path_key: &str,
        alias: &str,
        target: &str,
        fk_column: &str,
        nullable: bool,
        frame: &Frame,
        segments: &[&str],
        i: usize,
        span: Option<Span>,
    ) -> StepResult {
        let table = self.index.table(target);

        if frame.joins_allowed {
            let join_alias = match self.join_aliases.get(path_key) {
                Some(existing) => existing.clone(),
                None => {
                    let join_alias = format!("j{}", self.join_aliases.len() + 1);
                    self.joins.push(JoinSpec {
                        kind: if nullable {
                            JoinKind::Left
                        } else {
                            JoinKind::Inner
                        },
                        table,
                        alias: join_alias.clone(),
                        on: format!("{join_alias}.\"id\" = {alias}.\"{fk_column}\""),
                    });
                    self.join_aliases
                        .insert(path_key.to_string(), join_alias.clone());
                    join_alias
                }
            };
            return StepResult::Stepped(join_alias);
        }

        // One more scalar segment can be fetched without growing the join
        // list; anything deeper is not worth a correlated chain.
        if segments.len() - i == 2 {
            let projection = segments[i + 1];
            if let Some(field) = self.index.field(target, projection) {
                return StepResult::Value(Value::Sql(format!(
                    "(SELECT x.\"{}\" FROM \"{}\" AS x WHERE x.\"id\" = {alias}.\"{fk_column}\")",
                    field.column, table
                )));
            }
        }
        self.invalid_path("this path is too deep for a correlated predicate", span);
        StepResult::Value(Value::Sql("NULL".to_string()))
    }

    fn field_type_of(&self, expr: &Expr, frame: &Frame) -> Option<FieldType> {
        let segments = expr.as_path()?;
        let mut entity = frame.entity.to_string();
        let mut start = 0;
        match segments[0] {
            "source" => start = 1,
            "data" => {
                let (_, data_entity) = self.data.as_ref()?;
                entity = data_entity.clone();
                start = 1;
            }
            "user" | "param" => return None,
            _ => {}
        }

        let mut ty = None;
        for segment in &segments[start..] {
            if let Some(field) = self.index.field(&entity, segment) {
                if let FieldType::Ref { entity: target } = &field.ty {
                    entity = target.clone();
                }
                ty = Some(field.ty.clone());
            } else if let Some(relation) = self.index.relation(&entity, segment) {
                entity = relation.target.clone();
                ty = None;
            } else {
                return None;
            }
        }
        ty
    }

    fn param(&mut self, name: String) -> String {
        if let Some(existing) = self.params.iter().find(|p| p.name == name) {
            return format!("${}", existing.index);
        }
        let index = self.params.len() + 1;
        self.params.push(ParamSpec { name, index });
        format!("${index}")
    }

    fn next_subquery_alias(&mut self) -> String {
        self.subqueries += 1;
        format!("s{}", self.subqueries)
    }

    fn invalid_path(&mut self, message: &str, span: Option<Span>) {
        self.diagnostics.add_error("E0313", message, span);
    }
}

enum StepResult {
    Stepped(String),
    Value(Value),
}

fn literal_sql(lit: &Literal) -> String {
    match lit {
        Literal::Null => "NULL".to_string(),
        Literal::Integer(i) => i.to_string(),
        Literal::Float(f) => f.to_string(),
        Literal::Boolean(true) => "TRUE".to_string(),
        Literal::Boolean(false) => "FALSE".to_string(),
        Literal::String(s) => quote_str(s),
    }
}

fn quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
