//! `OVER (...)` windows: partition, order, and stamp each row with its
//! ordered partition.

use crate::composition::{Composition, WindowStamp};
use crate::error::EngineError;
use crate::expr::{join, EvalContext, Expr};
use crate::group_by;
use crate::model::Cell;
use crate::order_by::{self, OrderTerm};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct WindowDef {
    /// Stringified identity; equal definitions share one evaluation.
    pub key: String,
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderTerm>,
}

impl WindowDef {
    pub fn new(partition_by: Vec<Expr>, order_by: Vec<OrderTerm>, params: &[Cell]) -> Self {
        let mut parts = Vec::new();
        if !partition_by.is_empty() {
            parts.push(format!("PARTITION BY {}", join(&partition_by, params)));
        }
        if !order_by.is_empty() {
            let terms: Vec<String> = order_by.iter().map(|t| t.stringify(params)).collect();
            parts.push(format!("ORDER BY {}", terms.join(", ")));
        }
        Self {
            key: parts.join(" "),
            partition_by,
            order_by,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFunc {
    RowNumber,
    Rank,
    DenseRank,
    Lag,
    Lead,
    FirstValue,
    LastValue,
}

impl WindowFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        let f = match name.to_ascii_uppercase().as_str() {
            "ROW_NUMBER" => WindowFunc::RowNumber,
            "RANK" => WindowFunc::Rank,
            "DENSE_RANK" => WindowFunc::DenseRank,
            "LAG" => WindowFunc::Lag,
            "LEAD" => WindowFunc::Lead,
            "FIRST_VALUE" => WindowFunc::FirstValue,
            "LAST_VALUE" => WindowFunc::LastValue,
            _ => return None,
        };
        Some(f)
    }

    pub fn name(&self) -> &'static str {
        match self {
            WindowFunc::RowNumber => "ROW_NUMBER",
            WindowFunc::Rank => "RANK",
            WindowFunc::DenseRank => "DENSE_RANK",
            WindowFunc::Lag => "LAG",
            WindowFunc::Lead => "LEAD",
            WindowFunc::FirstValue => "FIRST_VALUE",
            WindowFunc::LastValue => "LAST_VALUE",
        }
    }

    pub fn check_arity(&self, count: usize) -> Result<(), EngineError> {
        let ok = match self {
            WindowFunc::RowNumber | WindowFunc::Rank | WindowFunc::DenseRank => count == 0,
            WindowFunc::Lag | WindowFunc::Lead => (1..=3).contains(&count),
            WindowFunc::FirstValue | WindowFunc::LastValue => count == 1,
        };
        if ok {
            Ok(())
        } else {
            Err(EngineError::Invalid(format!(
                "Incorrect parameter count in the call to native function '{}'",
                self.name()
            )))
        }
    }
}

#[derive(Debug, Clone)]
pub struct WindowCall {
    pub func: WindowFunc,
    pub args: Vec<Expr>,
    pub window: Arc<WindowDef>,
}

impl WindowCall {
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<Cell, EngineError> {
        let stamp = ctx.comp.windows.get(&self.window.key).ok_or_else(|| {
            EngineError::Invalid(format!("window {} was not evaluated", self.window.key))
        })?;
        let idx = stamp.index;
        let keys = &stamp.order_keys;
        let at = |i: usize, arg: &Expr| -> Result<Cell, EngineError> {
            match stamp.partition.get(i) {
                Some(row) => arg.eval(&EvalContext::new(row, ctx.params)),
                None => Ok(Cell::Null),
            }
        };

        match self.func {
            WindowFunc::RowNumber => Ok(Cell::Int(idx as i64 + 1)),
            WindowFunc::Rank => {
                let mut first = idx;
                while first > 0 && keys[first - 1] == keys[idx] {
                    first -= 1;
                }
                Ok(Cell::Int(first as i64 + 1))
            }
            WindowFunc::DenseRank => {
                let changes = (1..=idx).filter(|&i| keys[i] != keys[i - 1]).count();
                Ok(Cell::Int(changes as i64 + 1))
            }
            WindowFunc::Lag | WindowFunc::Lead => {
                let offset = match self.args.get(1) {
                    Some(e) => e.eval(ctx)?.as_i64().unwrap_or(1),
                    None => 1,
                };
                let target = if self.func == WindowFunc::Lag {
                    (idx as i64).checked_sub(offset)
                } else {
                    (idx as i64).checked_add(offset)
                };
                match target {
                    Some(t) if t >= 0 && (t as usize) < stamp.partition.len() => {
                        at(t as usize, &self.args[0])
                    }
                    _ => match self.args.get(2) {
                        Some(default) => default.eval(ctx),
                        None => Ok(Cell::Null),
                    },
                }
            }
            WindowFunc::FirstValue => at(0, &self.args[0]),
            WindowFunc::LastValue => at(stamp.last_peer(), &self.args[0]),
        }
    }

    pub fn stringify(&self, params: &[Cell]) -> String {
        format!(
            "{}({}) OVER ({})",
            self.func.name(),
            join(&self.args, params),
            self.window.key
        )
    }
}

fn leaves(keys: &[Vec<Cell>], level: usize, members: Vec<usize>, out: &mut Vec<Vec<usize>>) {
    let depth = keys.first().map(Vec::len).unwrap_or(0);
    if level >= depth {
        out.push(members);
        return;
    }
    let column: Vec<Cell> = members.iter().map(|&i| keys[i][level].clone()).collect();
    for bucket in group_by::partition(&column) {
        let next = bucket.into_iter().map(|j| members[j]).collect();
        leaves(keys, level + 1, next, out);
    }
}

/// Stamps every row with its ordered partition under `def.key`. Row order is
/// left unchanged.
pub fn eval(
    mut rows: Vec<Composition>,
    def: &WindowDef,
    params: &[Cell],
) -> Result<Vec<Composition>, EngineError> {
    if rows.is_empty() {
        return Ok(rows);
    }
    let partition_keys = rows
        .iter()
        .map(|r| {
            let ctx = EvalContext::new(r, params);
            def.partition_by
                .iter()
                .map(|e| e.eval(&ctx))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;
    let order_keys = order_by::eval_keys(&rows, &def.order_by, params)?;
    let asc: Vec<bool> = def.order_by.iter().map(|t| t.asc).collect();

    let mut groups = Vec::new();
    leaves(&partition_keys, 0, (0..rows.len()).collect(), &mut groups);

    let mut stamps: Vec<Option<WindowStamp>> = vec![None; rows.len()];
    for members in groups {
        let local_keys: Vec<Vec<Cell>> = members.iter().map(|&i| order_keys[i].clone()).collect();
        let order = order_by::sort_indices(&local_keys, &asc);
        let ordered: Vec<usize> = order.iter().map(|&j| members[j]).collect();

        let partition = Arc::new(ordered.iter().map(|&i| rows[i].clone()).collect::<Vec<_>>());
        let keys = Arc::new(order.iter().map(|&j| local_keys[j].clone()).collect::<Vec<_>>());
        for (index, &row) in ordered.iter().enumerate() {
            stamps[row] = Some(WindowStamp {
                partition: partition.clone(),
                order_keys: keys.clone(),
                index,
            });
        }
    }

    for (row, stamp) in rows.iter_mut().zip(stamps) {
        if let Some(stamp) = stamp {
            row.windows.insert(def.key.clone(), stamp);
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateCall, AggregateFunc};
    use crate::model::Row;

    fn rows(data: &[(&str, i64)]) -> Vec<Composition> {
        data.iter()
            .map(|(g, v)| {
                let mut c = Composition::new(1);
                c.slots[0] = Some(Row::new(vec![Cell::from(*g), Cell::Int(*v)]));
                c
            })
            .collect()
    }

    fn def(ordered: bool) -> Arc<WindowDef> {
        let order = if ordered {
            vec![OrderTerm {
                expr: Expr::column("v", 0, 1),
                asc: true,
            }]
        } else {
            Vec::new()
        };
        Arc::new(WindowDef::new(vec![Expr::column("g", 0, 0)], order, &[]))
    }

    fn run(expr: &Expr, def: &WindowDef, data: &[(&str, i64)]) -> Vec<Cell> {
        let stamped = eval(rows(data), def, &[]).expect("window");
        stamped
            .iter()
            .map(|r| expr.eval(&EvalContext::new(r, &[])).expect("eval"))
            .collect()
    }

    #[test]
    fn ranking_functions() {
        let d = def(true);
        let data = [("a", 3), ("a", 1), ("b", 5), ("a", 3), ("a", 7)];
        let call = |func| {
            Expr::Window(Box::new(WindowCall {
                func,
                args: Vec::new(),
                window: d.clone(),
            }))
        };
        assert_eq!(
            run(&call(WindowFunc::RowNumber), &d, &data),
            vec![Cell::Int(2), Cell::Int(1), Cell::Int(1), Cell::Int(3), Cell::Int(4)]
        );
        assert_eq!(
            run(&call(WindowFunc::Rank), &d, &data),
            vec![Cell::Int(2), Cell::Int(1), Cell::Int(1), Cell::Int(2), Cell::Int(4)]
        );
        assert_eq!(
            run(&call(WindowFunc::DenseRank), &d, &data),
            vec![Cell::Int(2), Cell::Int(1), Cell::Int(1), Cell::Int(2), Cell::Int(3)]
        );
    }

    #[test]
    fn running_sum_includes_peers() {
        let d = def(true);
        let mut call = AggregateCall::new(AggregateFunc::Sum, vec![Expr::column("v", 0, 1)]);
        call.over = Some(d.clone());
        let expr = Expr::Aggregate(Box::new(call));
        let data = [("a", 3), ("a", 1), ("a", 3), ("b", 2)];
        assert_eq!(
            run(&expr, &d, &data),
            vec![Cell::Int(7), Cell::Int(1), Cell::Int(7), Cell::Int(2)]
        );
    }

    #[test]
    fn unordered_window_spans_partition() {
        let d = def(false);
        let mut call = AggregateCall::new(AggregateFunc::Sum, vec![Expr::column("v", 0, 1)]);
        call.over = Some(d.clone());
        let expr = Expr::Aggregate(Box::new(call));
        let data = [("a", 3), ("b", 1), ("a", 4)];
        assert_eq!(
            run(&expr, &d, &data),
            vec![Cell::Int(7), Cell::Int(1), Cell::Int(7)]
        );
    }

    #[test]
    fn lag_and_lead() {
        let d = def(true);
        let lag = Expr::Window(Box::new(WindowCall {
            func: WindowFunc::Lag,
            args: vec![Expr::column("v", 0, 1)],
            window: d.clone(),
        }));
        let lead = Expr::Window(Box::new(WindowCall {
            func: WindowFunc::Lead,
            args: vec![
                Expr::column("v", 0, 1),
                Expr::Literal(Cell::Int(1)),
                Expr::Literal(Cell::Int(-1)),
            ],
            window: d.clone(),
        }));
        let data = [("a", 2), ("a", 1), ("a", 3)];
        assert_eq!(run(&lag, &d, &data), vec![Cell::Int(1), Cell::Null, Cell::Int(2)]);
        assert_eq!(run(&lead, &d, &data), vec![Cell::Int(3), Cell::Int(2), Cell::Int(-1)]);
    }
}
