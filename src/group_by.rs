//! Drill-down grouping with optional rollup summaries.

use crate::composition::{Aggr, Composition, FieldMap};
use crate::error::EngineError;
use crate::expr::{ColumnBinding, ColumnRef, EvalContext, Expr};
use crate::model::Cell;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct GroupTerm {
    pub expr: Expr,
    /// Unqualified name matched against `$` keys and GROUPING arguments.
    pub name: String,
    /// Table cell the term reads, nulled on rollup rows.
    pub source: Option<(usize, usize)>,
}

impl GroupTerm {
    pub fn new(expr: Expr, name: impl Into<String>) -> Self {
        let source = table_cell(&expr);
        Self {
            expr,
            name: name.into(),
            source,
        }
    }
}

pub fn table_cell(expr: &Expr) -> Option<(usize, usize)> {
    match expr {
        Expr::Column(ColumnRef {
            binding: ColumnBinding::Table { slot, column },
            ..
        }) => Some((*slot, *column)),
        _ => None,
    }
}

/// Groups indices by key, buckets in first-seen order.
pub fn partition(keys: &[Cell]) -> Vec<Vec<usize>> {
    let mut slots: HashMap<&Cell, usize> = HashMap::new();
    let mut buckets: Vec<Vec<usize>> = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        match slots.get(key) {
            Some(&slot) => buckets[slot].push(i),
            None => {
                slots.insert(key, buckets.len());
                buckets.push(vec![i]);
            }
        }
    }
    buckets
}

/// Splits `rows` by the value of `expr`, preserving first-seen bucket order.
pub fn split(
    rows: Vec<Composition>,
    expr: &Expr,
    params: &[Cell],
) -> Result<Vec<Vec<Composition>>, EngineError> {
    let keys = rows
        .iter()
        .map(|r| expr.eval(&EvalContext::new(r, params)))
        .collect::<Result<Vec<_>, _>>()?;
    let buckets = partition(&keys);
    let mut slots: Vec<Option<Composition>> = rows.into_iter().map(Some).collect();
    Ok(buckets
        .into_iter()
        .map(|members| {
            members
                .into_iter()
                .filter_map(|i| slots[i].take())
                .collect()
        })
        .collect())
}

pub struct GroupBy<'a> {
    pub by: &'a [GroupTerm],
    pub with_rollup: bool,
    pub params: &'a [Cell],
}

impl GroupBy<'_> {
    pub fn eval(&self, rows: Vec<Composition>) -> Result<Vec<Composition>, EngineError> {
        let mut out = Vec::new();
        self.drill(rows, self.by, &mut out)?;
        Ok(out)
    }

    fn drill(
        &self,
        rows: Vec<Composition>,
        by: &[GroupTerm],
        out: &mut Vec<Composition>,
    ) -> Result<(), EngineError> {
        if rows.is_empty() {
            return Ok(());
        }
        let Some((head, rest)) = by.split_first() else {
            out.push(summarize(rows, &[], false));
            return Ok(());
        };

        let level = self.with_rollup.then(|| rows.clone());
        for bucket in split(rows, &head.expr, self.params)? {
            self.drill(bucket, rest, out)?;
        }
        if let Some(all) = level {
            out.push(summarize(all, by, true));
        }
        Ok(())
    }
}

fn summarize(rows: Vec<Composition>, remaining: &[GroupTerm], is_rollup: bool) -> Composition {
    let mut summary = rows
        .first()
        .cloned()
        .unwrap_or_else(|| Composition::new(0));
    summary.windows.clear();
    let by: Vec<String> = remaining.iter().map(|t| t.name.clone()).collect();
    if is_rollup {
        for name in &by {
            if summary.fields.contains(name) {
                summary.fields.set(name, Cell::Null);
            }
        }
        // Mixed expressions such as CONCAT(k, COUNT(*)) read k from the slot.
        for (slot, column) in remaining.iter().filter_map(|t| t.source) {
            if let Some(cell) = summary
                .slots
                .get_mut(slot)
                .and_then(Option::as_mut)
                .and_then(|row| row.values.get_mut(column))
            {
                *cell = Cell::Null;
            }
        }
    }
    summary.aggr = Some(Arc::new(Aggr {
        rows,
        by,
        is_rollup,
    }));
    summary
}

/// Single group used when aggregates appear without GROUP BY. Empty input
/// still yields one row, shaped by `template`.
pub fn implicit(rows: Vec<Composition>, width: usize, template: &FieldMap) -> Composition {
    if rows.is_empty() {
        let mut empty = Composition::new(width);
        empty.fields = template.clone();
        empty.aggr = Some(Arc::new(Aggr {
            rows,
            by: Vec::new(),
            is_rollup: false,
        }));
        return empty;
    }
    summarize(rows, &[], false)
}
