//! DELETE over one or more joined tables, batched per target.

use super::{Affected, Output};
use crate::error::EngineError;
use crate::join::{BoundTable, Clause, JoinEngine};
use crate::model::Cell;
use crate::store::row_id;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

#[derive(Debug)]
pub struct DeletePlan {
    pub tables: Vec<BoundTable>,
    pub filter: Option<Clause>,
    /// Slots whose rows are removed.
    pub targets: Vec<usize>,
}

pub async fn run(plan: &DeletePlan, params: &[Cell]) -> Result<Output, EngineError> {
    let mut engine = JoinEngine::open(&plan.tables, plan.filter.as_ref(), params).await?;
    let mut seen: Vec<HashSet<Cell>> = vec![HashSet::new(); plan.tables.len()];
    let mut ids: Vec<Vec<Cell>> = vec![Vec::new(); plan.tables.len()];

    while let Some(comp) = engine.fetch()? {
        for &slot in &plan.targets {
            let (Some(row), Some(position)) = (&comp.slots[slot], comp.positions[slot]) else {
                continue;
            };
            let id = row_id(&plan.tables[slot].def, position, row);
            if seen[slot].insert(id.clone()) {
                ids[slot].push(id);
            }
        }
    }

    let mut out = BTreeMap::new();
    for &slot in &plan.targets {
        let table = &plan.tables[slot];
        let store = table.store().ok_or_else(|| {
            EngineError::NotSupported(format!(
                "The target table {} of the DELETE is not updatable",
                table.alias
            ))
        })?;
        let pending = std::mem::take(&mut ids[slot]);
        let removed = if pending.is_empty() {
            pending
        } else {
            store.delete_all(pending).await?
        };
        debug!(table = %table.alias, removed = removed.len(), "delete applied");
        out.insert(
            table.alias.clone(),
            Affected::from_ids(table.def.primary_key.is_some(), removed),
        );
    }
    Ok(Output::Mutation(out))
}
