//! Aggregate functions evaluated over a group's rows or a window frame.

use crate::composition::Composition;
use crate::error::EngineError;
use crate::expr::{join, EvalContext, Expr};
use crate::model::Cell;
use crate::order_by::{self, OrderTerm};
use crate::window::WindowDef;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    GroupConcat,
    GroupConcatWs,
    AnyValue,
    First,
    Last,
}

impl AggregateFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        let f = match name.to_ascii_uppercase().as_str() {
            "COUNT" => AggregateFunc::Count,
            "SUM" => AggregateFunc::Sum,
            "AVG" => AggregateFunc::Avg,
            "MIN" => AggregateFunc::Min,
            "MAX" => AggregateFunc::Max,
            "GROUP_CONCAT" => AggregateFunc::GroupConcat,
            "GROUP_CONCAT_WS" => AggregateFunc::GroupConcatWs,
            "ANY_VALUE" => AggregateFunc::AnyValue,
            "FIRST" => AggregateFunc::First,
            "LAST" => AggregateFunc::Last,
            _ => return None,
        };
        Some(f)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
            AggregateFunc::GroupConcat => "GROUP_CONCAT",
            AggregateFunc::GroupConcatWs => "GROUP_CONCAT_WS",
            AggregateFunc::AnyValue => "ANY_VALUE",
            AggregateFunc::First => "FIRST",
            AggregateFunc::Last => "LAST",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregateCall {
    pub func: AggregateFunc,
    pub distinct: bool,
    /// `COUNT(*)`.
    pub star: bool,
    pub args: Vec<Expr>,
    pub separator: String,
    pub order_by: Vec<OrderTerm>,
    /// Set when the aggregate runs over a window instead of a group.
    pub over: Option<Arc<WindowDef>>,
}

impl AggregateCall {
    pub fn new(func: AggregateFunc, args: Vec<Expr>) -> Self {
        Self {
            func,
            distinct: false,
            star: false,
            args,
            separator: ",".to_string(),
            order_by: Vec::new(),
            over: None,
        }
    }

    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<Cell, EngineError> {
        match &self.over {
            Some(def) => {
                let stamp = ctx.comp.windows.get(&def.key).ok_or_else(|| {
                    EngineError::Invalid(format!("window {} was not evaluated", def.key))
                })?;
                let end = stamp.last_peer();
                let frame = stamp.partition.get(..=end).unwrap_or(&[]);
                self.over_rows(frame, ctx.params)
            }
            None => {
                let aggr = ctx.comp.aggr.as_ref().ok_or_else(|| {
                    EngineError::Invalid(format!(
                        "Invalid use of group function {}",
                        self.func.name()
                    ))
                })?;
                self.over_rows(&aggr.rows, ctx.params)
            }
        }
    }

    pub fn over_rows(&self, rows: &[Composition], params: &[Cell]) -> Result<Cell, EngineError> {
        if self.star {
            return Ok(Cell::Int(rows.len() as i64));
        }

        let order: Vec<usize> = if self.order_by.is_empty() {
            (0..rows.len()).collect()
        } else {
            let keys = order_by::eval_keys(rows, &self.order_by, params)?;
            let asc: Vec<bool> = self.order_by.iter().map(|t| t.asc).collect();
            order_by::sort_indices(&keys, &asc)
        };

        let mut values = Vec::with_capacity(rows.len());
        for i in order {
            let ctx = EvalContext::new(&rows[i], params);
            let tuple = self
                .args
                .iter()
                .map(|a| a.eval(&ctx))
                .collect::<Result<Vec<_>, _>>()?;
            values.push(tuple);
        }

        match self.func {
            AggregateFunc::First => {
                return Ok(values.first().map(|t| first_of(t)).unwrap_or(Cell::Null))
            }
            AggregateFunc::Last => {
                return Ok(values.last().map(|t| first_of(t)).unwrap_or(Cell::Null))
            }
            _ => {}
        }

        let values = column(values, self.distinct)?;
        apply(self.func, values, &self.separator)
    }

    pub fn stringify(&self, params: &[Cell]) -> String {
        let mut s = format!("{}(", self.func.name());
        if self.distinct {
            s.push_str("DISTINCT ");
        }
        if self.star {
            s.push('*');
        } else {
            if self.func == AggregateFunc::GroupConcatWs {
                s.push_str(&format!("'{}', ", self.separator));
            }
            s.push_str(&join(&self.args, params));
        }
        if !self.order_by.is_empty() {
            let terms: Vec<String> = self.order_by.iter().map(|t| t.stringify(params)).collect();
            s.push_str(&format!(" ORDER BY {}", terms.join(", ")));
        }
        if self.func == AggregateFunc::GroupConcat && self.separator != "," {
            s.push_str(&format!(" SEPARATOR '{}'", self.separator));
        }
        s.push(')');
        if let Some(def) = &self.over {
            s.push_str(&format!(" OVER ({})", def.key));
        }
        s
    }
}

fn first_of(tuple: &[Cell]) -> Cell {
    tuple.first().cloned().unwrap_or(Cell::Null)
}

/// Per-row argument values with nulls dropped and, for DISTINCT, duplicates
/// removed. A tuple with any null element is dropped as a whole.
pub fn column(values: Vec<Vec<Cell>>, distinct: bool) -> Result<Vec<Vec<Cell>>, EngineError> {
    let width = values.first().map(Vec::len).unwrap_or(0);
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(values.len());
    for tuple in values {
        if tuple.len() != width {
            return Err(EngineError::Invalid("aggregate column list not even".into()));
        }
        if tuple.iter().any(Cell::is_null) {
            continue;
        }
        if distinct && !seen.insert(tuple.clone()) {
            continue;
        }
        out.push(tuple);
    }
    Ok(out)
}

pub fn apply(
    func: AggregateFunc,
    values: Vec<Vec<Cell>>,
    separator: &str,
) -> Result<Cell, EngineError> {
    let mut firsts = values.iter().map(|t| first_of(t));
    match func {
        AggregateFunc::Count => Ok(Cell::Int(values.len() as i64)),
        AggregateFunc::Sum => sum(firsts),
        AggregateFunc::Avg => {
            let n = values.len();
            if n == 0 {
                return Ok(Cell::Null);
            }
            Ok(sum(firsts)?.div_count(n).unwrap_or(Cell::Null))
        }
        AggregateFunc::Min => Ok(firsts
            .reduce(|a, b| if b.cmp_for_order(&a).is_lt() { b } else { a })
            .unwrap_or(Cell::Null)),
        AggregateFunc::Max => Ok(firsts
            .reduce(|a, b| if b.cmp_for_order(&a).is_gt() { b } else { a })
            .unwrap_or(Cell::Null)),
        AggregateFunc::GroupConcat | AggregateFunc::GroupConcatWs => {
            if values.is_empty() {
                return Ok(Cell::Null);
            }
            let parts: Vec<String> = values
                .iter()
                .map(|t| t.iter().map(Cell::to_display_string).collect::<String>())
                .collect();
            Ok(Cell::Text(parts.join(separator)))
        }
        AggregateFunc::AnyValue | AggregateFunc::First => Ok(firsts.next().unwrap_or(Cell::Null)),
        AggregateFunc::Last => Ok(firsts.last().unwrap_or(Cell::Null)),
    }
}

fn sum(values: impl Iterator<Item = Cell>) -> Result<Cell, EngineError> {
    let mut total: Option<Cell> = None;
    for v in values {
        let Some(n) = v.to_number() else { continue };
        total = Some(match total {
            None => n,
            Some(t) => t
                .add(&n)
                .ok_or_else(|| EngineError::Invalid("BIGINT value is out of range in SUM".into()))?,
        });
    }
    Ok(total.unwrap_or(Cell::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(vals: &[Cell]) -> Vec<Vec<Cell>> {
        vals.iter().map(|v| vec![v.clone()]).collect()
    }

    #[test]
    fn column_drops_nulls_and_dedups() {
        let vals = single(&[Cell::Int(1), Cell::Null, Cell::Int(1), Cell::Int(2)]);
        assert_eq!(column(vals.clone(), false).expect("column").len(), 3);
        assert_eq!(column(vals, true).expect("column").len(), 2);
    }

    #[test]
    fn column_drops_tuples_with_null_and_rejects_ragged() {
        let vals = vec![
            vec![Cell::Int(1), Cell::Null],
            vec![Cell::Int(2), Cell::Int(3)],
        ];
        assert_eq!(column(vals, false).expect("column"), vec![vec![Cell::Int(2), Cell::Int(3)]]);

        let ragged = vec![vec![Cell::Int(1)], vec![Cell::Int(2), Cell::Int(3)]];
        let err = column(ragged, false).expect_err("ragged");
        assert!(err.to_string().contains("aggregate column list not even"));
    }

    #[test]
    fn numeric_aggregates() {
        let vals = single(&[Cell::Int(2), Cell::Int(4), Cell::Float(0.5)]);
        assert_eq!(apply(AggregateFunc::Sum, vals.clone(), ",").expect("sum"), Cell::Float(6.5));
        assert_eq!(apply(AggregateFunc::Min, vals.clone(), ",").expect("min"), Cell::Float(0.5));
        assert_eq!(apply(AggregateFunc::Max, vals.clone(), ",").expect("max"), Cell::Int(4));
        assert_eq!(apply(AggregateFunc::Count, vals, ",").expect("count"), Cell::Int(3));
        assert_eq!(apply(AggregateFunc::Avg, Vec::new(), ",").expect("avg"), Cell::Null);
        assert_eq!(apply(AggregateFunc::Count, Vec::new(), ",").expect("count"), Cell::Int(0));
    }

    #[test]
    fn group_concat_uses_separator() {
        let vals = single(&["a".into(), "b".into()]);
        assert_eq!(
            apply(AggregateFunc::GroupConcat, vals, "|").expect("concat"),
            Cell::from("a|b")
        );
    }
}
