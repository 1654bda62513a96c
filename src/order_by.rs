//! Multi-key stable ordering by partition-then-sort-keys.

use crate::composition::Composition;
use crate::error::EngineError;
use crate::expr::{EvalContext, Expr};
use crate::model::Cell;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct OrderTerm {
    pub expr: Expr,
    pub asc: bool,
}

impl OrderTerm {
    pub fn stringify(&self, params: &[Cell]) -> String {
        if self.asc {
            self.expr.stringify(params)
        } else {
            format!("{} DESC", self.expr.stringify(params))
        }
    }
}

/// Evaluates every term per row; the result is indexed `[row][term]`.
pub fn eval_keys(
    rows: &[Composition],
    terms: &[OrderTerm],
    params: &[Cell],
) -> Result<Vec<Vec<Cell>>, EngineError> {
    rows.iter()
        .map(|row| {
            let ctx = EvalContext::new(row, params);
            terms.iter().map(|t| t.expr.eval(&ctx)).collect()
        })
        .collect()
}

/// Row order for `keys` (`[row][term]`). Rows are bucketed by the first term
/// in first-seen order, buckets are stably sorted, and each bucket is ordered
/// by the remaining terms.
pub fn sort_indices(keys: &[Vec<Cell>], asc: &[bool]) -> Vec<usize> {
    let all: Vec<usize> = (0..keys.len()).collect();
    order_within(keys, asc, 0, all)
}

fn order_within(keys: &[Vec<Cell>], asc: &[bool], term: usize, rows: Vec<usize>) -> Vec<usize> {
    if term >= asc.len() || rows.len() < 2 {
        return rows;
    }

    let mut slots: HashMap<&Cell, usize> = HashMap::new();
    let mut buckets: Vec<(&Cell, Vec<usize>)> = Vec::new();
    for idx in rows {
        let key = &keys[idx][term];
        match slots.get(key) {
            Some(&slot) => buckets[slot].1.push(idx),
            None => {
                slots.insert(key, buckets.len());
                buckets.push((key, vec![idx]));
            }
        }
    }

    let ascending = asc[term];
    buckets.sort_by(|(a, _), (b, _)| {
        let ord = a.cmp_for_order(b);
        if ascending {
            ord
        } else {
            ord.reverse()
        }
    });

    buckets
        .into_iter()
        .flat_map(|(_, members)| order_within(keys, asc, term + 1, members))
        .collect()
}

pub fn eval(
    rows: Vec<Composition>,
    terms: &[OrderTerm],
    params: &[Cell],
) -> Result<Vec<Composition>, EngineError> {
    if terms.is_empty() || rows.len() < 2 {
        return Ok(rows);
    }
    let keys = eval_keys(&rows, terms, params)?;
    let asc: Vec<bool> = terms.iter().map(|t| t.asc).collect();
    let order = sort_indices(&keys, &asc);

    let mut slots: Vec<Option<Composition>> = rows.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots.get_mut(i).and_then(Option::take))
        .collect())
}
