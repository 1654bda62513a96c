//! UPDATE over one or more joined tables, written back through the cursors.

use super::{Affected, Output};
use crate::error::EngineError;
use crate::expr::{EvalContext, Expr};
use crate::join::{BoundTable, Clause, JoinEngine};
use crate::model::Cell;
use crate::store::{coerce_cell, row_id};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Assignment {
    pub slot: usize,
    pub column: usize,
    pub expr: Expr,
    pub text: String,
}

#[derive(Debug)]
pub struct UpdatePlan {
    pub tables: Vec<BoundTable>,
    pub filter: Option<Clause>,
    pub assignments: Vec<Assignment>,
}

pub async fn run(plan: &UpdatePlan, params: &[Cell]) -> Result<Output, EngineError> {
    let mut engine = JoinEngine::open(&plan.tables, plan.filter.as_ref(), params).await?;
    let width = plan.tables.len();
    let mut touched: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); width];
    let mut ids: Vec<Vec<Cell>> = vec![Vec::new(); width];

    while let Some(comp) = engine.fetch()? {
        // A row matched by several compositions is updated once, on its first match.
        let fresh: Vec<bool> = (0..width)
            .map(|slot| {
                comp.positions[slot].is_some_and(|position| !touched[slot].contains(&position))
            })
            .collect();
        // Every right-hand side reads the row as it was before this round.
        let ctx = EvalContext::new(&comp, params);
        let mut values = Vec::with_capacity(plan.assignments.len());
        for a in plan.assignments.iter().filter(|a| fresh[a.slot]) {
            let def = &plan.tables[a.slot].def.columns[a.column];
            let value = a
                .expr
                .eval(&ctx)
                .and_then(|v| coerce_cell(v, def.ty))
                .map_err(|e| e.in_clause(&a.text))?;
            if value.is_null() && !def.nullable {
                return Err(EngineError::Invalid(format!("Column '{}' cannot be null", def.name)));
            }
            values.push(value);
        }

        for (a, value) in plan.assignments.iter().filter(|a| fresh[a.slot]).zip(values) {
            let Some(handle) = comp.field_handle(a.slot, a.column) else {
                continue;
            };
            engine.write(handle, value);
            if touched[a.slot].insert(handle.position) {
                if let Some(row) = comp.slots[a.slot].as_ref() {
                    ids[a.slot].push(row_id(&plan.tables[a.slot].def, handle.position, row));
                }
            }
        }
    }

    let synced = engine.sync_cursors(&plan.tables).await?;
    debug!(synced, "update synced");

    let targets: BTreeSet<usize> = plan.assignments.iter().map(|a| a.slot).collect();
    let mut out = BTreeMap::new();
    for slot in targets {
        let table = &plan.tables[slot];
        out.insert(
            table.alias.clone(),
            Affected::from_ids(
                table.def.primary_key.is_some(),
                std::mem::take(&mut ids[slot]),
            ),
        );
    }
    Ok(Output::Mutation(out))
}
