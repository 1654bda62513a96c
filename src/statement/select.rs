//! SELECT: join, project, group, filter, window, order, page.

use crate::composition::{Composition, FieldMap};
use crate::error::EngineError;
use crate::expr::{EvalContext, Expr, ExprFlags};
use crate::group_by::{self, GroupBy, GroupTerm};
use crate::join::{BoundTable, Clause, JoinEngine};
use crate::model::Cell;
use crate::order_by::{self, OrderTerm};
use crate::window::{self, WindowDef};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FieldPlan {
    pub name: String,
    pub expr: Expr,
}

#[derive(Debug)]
pub struct SelectPlan {
    /// FROM tables first, then synthesized reference joins.
    pub tables: Vec<BoundTable>,
    pub filter: Option<Clause>,
    pub fields: Vec<FieldPlan>,
    pub group_by: Vec<GroupTerm>,
    pub with_rollup: bool,
    pub having: Option<Clause>,
    pub order_by: Vec<OrderTerm>,
    pub distinct: bool,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl SelectPlan {
    /// Plain `SELECT fields FROM tables` with no other clauses.
    pub fn projection(tables: Vec<BoundTable>, fields: Vec<FieldPlan>) -> Self {
        Self {
            tables,
            filter: None,
            fields,
            group_by: Vec::new(),
            with_rollup: false,
            having: None,
            order_by: Vec::new(),
            distinct: false,
            offset: 0,
            limit: None,
        }
    }

    fn aggregates(&self) -> bool {
        let uses = |e: &Expr| e.flags().contains(ExprFlags::AGGREGATE);
        self.fields.iter().any(|f| uses(&f.expr))
            || self.having.as_ref().is_some_and(|h| uses(&h.expr))
            || self.order_by.iter().any(|t| uses(&t.expr))
    }

    fn windows(&self) -> Vec<Arc<WindowDef>> {
        let mut defs = Vec::new();
        for field in &self.fields {
            field.expr.collect_windows(&mut defs);
        }
        for term in &self.order_by {
            term.expr.collect_windows(&mut defs);
        }
        defs
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Stage {
    Plain,
    Aggregate,
    Window,
}

impl Stage {
    fn owns(self, flags: ExprFlags) -> bool {
        match self {
            Stage::Plain => !flags.intersects(ExprFlags::AGGREGATE | ExprFlags::WINDOW),
            Stage::Aggregate => {
                flags.contains(ExprFlags::AGGREGATE) && !flags.contains(ExprFlags::WINDOW)
            }
            Stage::Window => flags.contains(ExprFlags::WINDOW),
        }
    }
}

/// Evaluates the fields owned by `stage` into each row's `$`. Fields owned by
/// later stages get a NULL placeholder so `$` keeps the select-list order.
fn project(
    mut rows: Vec<Composition>,
    fields: &[FieldPlan],
    stage: Stage,
    params: &[Cell],
) -> Result<Vec<Composition>, EngineError> {
    for row in rows.iter_mut() {
        for field in fields {
            let value = if stage.owns(field.expr.flags()) {
                field
                    .expr
                    .eval(&EvalContext::new(row, params))
                    .map_err(|e| e.in_clause(&field.name))?
            } else if stage == Stage::Plain {
                Cell::Null
            } else {
                continue;
            };
            row.fields.set(&field.name, value);
        }
    }
    Ok(rows)
}

fn filter(
    rows: Vec<Composition>,
    clause: &Clause,
    params: &[Cell],
) -> Result<Vec<Composition>, EngineError> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        if clause.matches(&row, params)? {
            out.push(row);
        }
    }
    Ok(out)
}

pub async fn run(plan: &SelectPlan, params: &[Cell]) -> Result<Vec<FieldMap>, EngineError> {
    let rows = if plan.tables.is_empty() {
        let row = Composition::new(0);
        match &plan.filter {
            Some(clause) => filter(vec![row], clause, params)?,
            None => vec![row],
        }
    } else {
        let mut engine = JoinEngine::open(&plan.tables, plan.filter.as_ref(), params).await?;
        engine.fetch_all()?
    };
    debug!(rows = rows.len(), "select joined");

    let mut rows = project(rows, &plan.fields, Stage::Plain, params)?;

    if !plan.group_by.is_empty() || plan.aggregates() {
        rows = if plan.group_by.is_empty() {
            let template: FieldMap = plan
                .fields
                .iter()
                .map(|f| (f.name.clone(), Cell::Null))
                .collect();
            vec![group_by::implicit(rows, plan.tables.len(), &template)]
        } else {
            GroupBy {
                by: &plan.group_by,
                with_rollup: plan.with_rollup,
                params,
            }
            .eval(rows)?
        };
        rows = project(rows, &plan.fields, Stage::Aggregate, params)?;
        debug!(groups = rows.len(), rollup = plan.with_rollup, "select grouped");
    }

    if let Some(having) = &plan.having {
        rows = filter(rows, having, params)?;
    }

    let windows = plan.windows();
    if !windows.is_empty() {
        for def in &windows {
            rows = window::eval(rows, def, params)?;
        }
        rows = project(rows, &plan.fields, Stage::Window, params)?;
    }

    rows = order_by::eval(rows, &plan.order_by, params)?;

    let mut out: Vec<FieldMap> = rows.into_iter().map(|r| r.fields).collect();
    if plan.distinct {
        let mut seen = HashSet::new();
        out.retain(|fields| seen.insert(fields.values().cloned().collect::<Vec<_>>()));
    }

    let out = out
        .into_iter()
        .skip(plan.offset)
        .take(plan.limit.unwrap_or(usize::MAX))
        .collect();
    Ok(out)
}
