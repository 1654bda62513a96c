//! INSERT ... VALUES / INSERT ... SELECT with IGNORE and ON DUPLICATE KEY UPDATE.

use super::select::{self, SelectPlan};
use super::{Affected, Output};
use crate::composition::Composition;
use crate::error::EngineError;
use crate::expr::{EvalContext, Expr};
use crate::model::{Cell, Row};
use crate::store::{coerce_cell, normalize_row, DuplicateAction, DuplicateHandler, TableStore, Written};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub enum InsertSource {
    Values(Vec<Vec<Expr>>),
    Select(Box<SelectPlan>),
}

/// `col = expr` of an ON DUPLICATE KEY UPDATE list.
#[derive(Debug, Clone)]
pub struct SetColumn {
    pub column: usize,
    pub expr: Expr,
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum OnDuplicate {
    Error,
    Ignore,
    /// `REPLACE INTO`: the incoming row overwrites the colliding one.
    Replace,
    Update(Vec<SetColumn>),
}

pub struct InsertPlan {
    pub table: Arc<dyn TableStore>,
    pub name: String,
    /// Schema indexes the source values are written to, in source order.
    pub columns: Vec<usize>,
    pub source: InsertSource,
    pub on_duplicate: OnDuplicate,
}

impl fmt::Debug for InsertPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsertPlan")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .field("source", &self.source)
            .field("on_duplicate", &self.on_duplicate)
            .finish()
    }
}

async fn source_rows(plan: &InsertPlan, params: &[Cell]) -> Result<Vec<Vec<Cell>>, EngineError> {
    match &plan.source {
        InsertSource::Values(rows) => {
            let empty = Composition::new(0);
            let ctx = EvalContext::new(&empty, params);
            rows.iter()
                .map(|row| row.iter().map(|e| e.eval(&ctx)).collect())
                .collect()
        }
        InsertSource::Select(query) => Ok(select::run(query, params)
            .await?
            .into_iter()
            .map(|fields| fields.values().cloned().collect())
            .collect()),
    }
}

/// Rewrites the existing row with the assignments, applied in order so later
/// ones see earlier results.
fn merge(
    plan: &InsertPlan,
    sets: &[SetColumn],
    existing: &Row,
    incoming: &Row,
    params: &[Cell],
) -> Result<Row, EngineError> {
    let schema = plan.table.schema();
    let mut comp = Composition::new(1);
    comp.slots[0] = Some(existing.clone());
    for set in sets {
        let ctx = EvalContext::new(&comp, params).with_incoming(incoming);
        let value = set.expr.eval(&ctx).map_err(|e| e.in_clause(&set.text))?;
        let def = &schema.columns[set.column];
        let value = coerce_cell(value, def.ty).map_err(|e| e.in_clause(&set.text))?;
        if value.is_null() && !def.nullable {
            return Err(EngineError::Invalid(format!("Column '{}' cannot be null", def.name)));
        }
        if let Some(Some(row)) = comp.slots.get_mut(0) {
            row.values[set.column] = value;
        }
    }
    comp.slots
        .pop()
        .flatten()
        .ok_or_else(|| EngineError::Invalid("duplicate row vanished".into()))
}

pub async fn run(plan: &InsertPlan, params: &[Cell]) -> Result<Output, EngineError> {
    let schema = plan.table.schema();
    let rows = source_rows(plan, params)
        .await?
        .into_iter()
        .map(|values| normalize_row(schema, &plan.columns, values))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(table = %plan.name, rows = rows.len(), "insert normalized");

    let ignore = |_: &Row, _: &Row| -> Result<DuplicateAction, EngineError> {
        Ok(DuplicateAction::Ignore)
    };
    let replace = |_: &Row, incoming: &Row| -> Result<DuplicateAction, EngineError> {
        Ok(DuplicateAction::Replace(incoming.clone()))
    };
    let sets: &[SetColumn] = match &plan.on_duplicate {
        OnDuplicate::Update(sets) => sets,
        _ => &[],
    };
    let update = |existing: &Row, incoming: &Row| -> Result<DuplicateAction, EngineError> {
        merge(plan, sets, existing, incoming, params).map(DuplicateAction::Replace)
    };
    let handler: Option<&DuplicateHandler<'_>> = match &plan.on_duplicate {
        OnDuplicate::Error => None,
        OnDuplicate::Ignore => Some(&ignore),
        OnDuplicate::Replace => Some(&replace),
        OnDuplicate::Update(_) => Some(&update),
    };

    let written = plan.table.add_all(rows, handler).await?;
    let ids: Vec<Cell> = written
        .into_iter()
        .filter_map(|w| match w {
            Written::Added(id) | Written::Updated(id) => Some(id),
            Written::Skipped => None,
        })
        .collect();

    let mut out = BTreeMap::new();
    out.insert(
        plan.name.clone(),
        Affected::from_ids(schema.primary_key.is_some(), ids),
    );
    Ok(Output::Mutation(out))
}
