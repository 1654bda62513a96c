//! The cursor-driven nested-loop join.
//!
//! One main cursor and N join cursors are advanced like an odometer: the
//! last join moves fastest and each wrap carries into the cursor before it.
//! Every round evaluates the current row of each join member against the
//! main row and the rows accepted earlier in the same round, so the full
//! cross product is never materialized.

use crate::composition::{Composition, FieldHandle};
use crate::cursor::{Cursor, Flags};
use crate::error::EngineError;
use crate::expr::{EvalContext, Expr};
use crate::model::{Cell, Row, TableDef};
use crate::statement::select::{self, SelectPlan};
use crate::store::TableStore;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

/// An expression together with the clause text used in error messages.
#[derive(Debug, Clone)]
pub struct Clause {
    pub expr: Expr,
    pub text: String,
}

impl Clause {
    pub fn new(expr: Expr, text: impl Into<String>) -> Self {
        Self {
            expr,
            text: text.into(),
        }
    }

    pub fn matches(&self, comp: &Composition, params: &[Cell]) -> Result<bool, EngineError> {
        self.expr
            .matches(&EvalContext::new(comp, params))
            .map_err(|e| e.in_clause(self.text.clone()))
    }
}

/// `USING` column pair: `slot`.`left` must equal this table's `right`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsingPair {
    pub slot: usize,
    pub left: usize,
    pub right: usize,
}

#[derive(Debug, Clone)]
pub enum JoinCondition {
    None,
    On(Clause),
    Using(Vec<UsingPair>),
}

#[derive(Debug, Clone)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub condition: JoinCondition,
}

impl JoinClause {
    pub fn cross() -> Self {
        Self {
            kind: JoinKind::Inner,
            condition: JoinCondition::None,
        }
    }
}

pub type RowsFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<Option<Row>>, EngineError>> + Send + 'a>>;

pub enum TableSource {
    Store(Arc<dyn TableStore>),
    /// Sub-select in FROM, including the sub-selects synthesized for arrow
    /// references. Rows follow the owning `BoundTable`'s column order.
    Derived(Box<SelectPlan>),
}

impl std::fmt::Debug for TableSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableSource::Store(store) => write!(f, "Store({})", store.schema().name),
            TableSource::Derived(plan) => f.debug_tuple("Derived").field(plan).finish(),
        }
    }
}

/// A table as bound into one statement: alias, schema, row source and the
/// join descriptor (`None` for the main table).
#[derive(Debug)]
pub struct BoundTable {
    pub alias: String,
    pub def: TableDef,
    pub source: TableSource,
    pub join: Option<JoinClause>,
}

impl BoundTable {
    pub fn store(&self) -> Option<&Arc<dyn TableStore>> {
        match &self.source {
            TableSource::Store(store) => Some(store),
            TableSource::Derived(_) => None,
        }
    }

    pub fn materialize<'a>(&'a self, params: &'a [Cell]) -> RowsFuture<'a> {
        Box::pin(async move {
            match &self.source {
                TableSource::Store(store) => store.scan().await,
                TableSource::Derived(plan) => {
                    let rows = select::run(plan, params).await?;
                    Ok(rows
                        .into_iter()
                        .map(|fields| {
                            let values = self
                                .def
                                .columns
                                .iter()
                                .map(|c| fields.get(&c.name).cloned().unwrap_or(Cell::Null))
                                .collect();
                            Some(Row::new(values))
                        })
                        .collect())
                }
            }
        })
    }
}

struct Member {
    kind: JoinKind,
    condition: JoinCondition,
    /// Join-table positions matched by any main row, for RIGHT joins.
    matched: Flags,
}

impl Member {
    fn accepts(
        &self,
        comp: &Composition,
        slot: usize,
        params: &[Cell],
    ) -> Result<bool, EngineError> {
        if self.kind == JoinKind::Full {
            return Ok(true);
        }
        match &self.condition {
            JoinCondition::None => Ok(true),
            JoinCondition::Using(pairs) => Ok(pairs.iter().all(|p| {
                comp.value(slot, p.right).sql_eq(&comp.value(p.slot, p.left)) == Some(true)
            })),
            JoinCondition::On(clause) => clause.matches(comp, params),
        }
    }
}

pub struct JoinEngine {
    cursors: Vec<Cursor>,
    members: Vec<Member>,
    filter: Option<Clause>,
    params: Vec<Cell>,
    eof: bool,
    dirty: Vec<BTreeSet<usize>>,
}

impl JoinEngine {
    /// Materializes every table and positions all cursors on their first row.
    pub async fn open(
        tables: &[BoundTable],
        filter: Option<&Clause>,
        params: &[Cell],
    ) -> Result<Self, EngineError> {
        let mut cursors = Vec::with_capacity(tables.len());
        for table in tables {
            cursors.push(Cursor::new(table.materialize(params).await?));
        }
        debug!(
            tables = ?tables.iter().map(|t| t.alias.as_str()).collect::<Vec<_>>(),
            rows = ?cursors.iter().map(Cursor::len).collect::<Vec<_>>(),
            "join opened"
        );
        let joins = tables.iter().skip(1).map(|t| t.join.clone()).collect();
        Ok(Self::from_cursors(cursors, joins, filter.cloned(), params.to_vec()))
    }

    /// `joins[i]` describes cursor `i + 1`; cursor 0 is the main table.
    pub fn from_cursors(
        cursors: Vec<Cursor>,
        joins: Vec<Option<JoinClause>>,
        filter: Option<Clause>,
        params: Vec<Cell>,
    ) -> Self {
        let members = joins
            .into_iter()
            .map(|j| {
                let j = j.unwrap_or_else(JoinClause::cross);
                Member {
                    kind: j.kind,
                    condition: j.condition,
                    matched: Flags::default(),
                }
            })
            .collect();
        let dirty = vec![BTreeSet::new(); cursors.len()];
        let eof = cursors.is_empty();
        Self {
            cursors,
            members,
            filter,
            params,
            eof,
            dirty,
        }
    }

    pub fn width(&self) -> usize {
        self.cursors.len()
    }

    pub fn cursors(&self) -> &[Cursor] {
        &self.cursors
    }

    /// Runs once the main cursor wraps, i.e. when the join is exhausted.
    pub fn on_finish(&mut self, cb: impl FnMut() + Send + 'static) {
        if let Some(main) = self.cursors.first_mut() {
            main.on_finish(cb);
        }
    }

    /// Next composition passing the join predicates and WHERE.
    pub fn fetch(&mut self) -> Result<Option<Composition>, EngineError> {
        while !self.eof {
            let round = self.round();
            self.advance();
            let Some(comp) = round? else { continue };
            if let Some(filter) = &self.filter {
                if !filter.matches(&comp, &self.params)? {
                    continue;
                }
            }
            return Ok(Some(comp));
        }
        Ok(None)
    }

    pub fn fetch_all(&mut self) -> Result<Vec<Composition>, EngineError> {
        let mut out = Vec::new();
        while let Some(comp) = self.fetch()? {
            out.push(comp);
        }
        Ok(out)
    }

    /// Index of the combination of positions of cursors `0..slot`.
    fn combo_index(&self, slot: usize) -> usize {
        self.cursors[..slot].iter().fold(0usize, |acc, c| {
            acc.wrapping_mul(c.len().max(1)).wrapping_add(c.position())
        })
    }

    fn left_side_at_end(&self, slot: usize) -> bool {
        self.cursors[..slot].iter().all(Cursor::at_end)
    }

    fn round(&mut self) -> Result<Option<Composition>, EngineError> {
        let width = self.cursors.len();
        let mut comp = Composition::new(width);
        let mut ok = match self.cursors[0].fetch() {
            Some(row) => {
                comp.slots[0] = Some(row.clone());
                comp.positions[0] = Some(self.cursors[0].position());
                true
            }
            None => false,
        };

        for slot in 1..width {
            let pos = self.cursors[slot].position();
            let row = self.cursors[slot].fetch().cloned();
            let left_key = self.combo_index(slot);
            let kind = self.members[slot - 1].kind;

            let mut accepted = false;
            if ok {
                if let Some(row) = &row {
                    comp.slots[slot] = Some(row.clone());
                    comp.positions[slot] = Some(pos);
                    accepted = self.members[slot - 1].accepts(&comp, slot, &self.params)?;
                    if !accepted {
                        comp.slots[slot] = None;
                        comp.positions[slot] = None;
                    }
                }
            }
            if accepted {
                self.cursors[slot].flag(left_key);
                self.members[slot - 1].matched.set(pos);
                continue;
            }

            if ok
                && kind == JoinKind::Left
                && self.cursors[slot].at_end()
                && !self.cursors[slot].is_flagged(left_key)
            {
                continue;
            }

            if kind == JoinKind::Right
                && row.is_some()
                && self.left_side_at_end(slot)
                && !self.members[slot - 1].matched.get(pos)
            {
                for earlier in 0..slot {
                    comp.slots[earlier] = None;
                    comp.positions[earlier] = None;
                }
                comp.slots[slot] = row;
                comp.positions[slot] = Some(pos);
                ok = true;
                continue;
            }

            ok = false;
        }

        if ok {
            trace!(positions = ?comp.positions, "join round accepted");
        }
        Ok(ok.then_some(comp))
    }

    fn advance(&mut self) {
        let mut slot = self.cursors.len() - 1;
        while self.cursors[slot].advance() {
            if slot == 0 {
                self.eof = true;
                return;
            }
            slot -= 1;
        }
    }

    /// Writes through a handle onto the live cursor row. Returns whether the
    /// value changed.
    pub fn write(&mut self, handle: FieldHandle, value: Cell) -> bool {
        let changed = handle.set(&mut self.cursors, value);
        if changed {
            if let Some(dirty) = self.dirty.get_mut(handle.slot) {
                dirty.insert(handle.position);
            }
        }
        changed
    }

    /// Pushes every row changed through `write` back to its table's store.
    pub async fn sync_cursors(&mut self, tables: &[BoundTable]) -> Result<usize, EngineError> {
        let mut synced = 0;
        for (slot, positions) in self.dirty.iter_mut().enumerate() {
            if positions.is_empty() {
                continue;
            }
            let table = tables
                .get(slot)
                .ok_or_else(|| EngineError::Invalid(format!("no table bound to slot {slot}")))?;
            let store = table.store().ok_or_else(|| {
                EngineError::NotSupported(format!(
                    "The target table {} of the UPDATE is not updatable",
                    table.alias
                ))
            })?;
            let changes: Vec<(usize, Row)> = std::mem::take(positions)
                .into_iter()
                .filter_map(|p| self.cursors[slot].row(p).map(|r| (p, r.clone())))
                .collect();
            synced += changes.len();
            store.sync(changes).await?;
        }
        Ok(synced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinaryOp;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn cursor(keys: &[i64]) -> Cursor {
        Cursor::new(keys.iter().map(|k| Some(Row::new(vec![Cell::Int(*k)]))).collect())
    }

    fn on_equal(kind: JoinKind) -> Option<JoinClause> {
        let expr = Expr::binary(Expr::column("a.k", 0, 0), BinaryOp::Eq, Expr::column("b.k", 1, 0));
        Some(JoinClause {
            kind,
            condition: JoinCondition::On(Clause::new(expr, "ON a.k = b.k")),
        })
    }

    fn pairs(kind: JoinKind, a: &[i64], b: &[i64]) -> Vec<(Cell, Cell)> {
        let mut engine =
            JoinEngine::from_cursors(vec![cursor(a), cursor(b)], vec![on_equal(kind)], None, vec![]);
        engine
            .fetch_all()
            .expect("join")
            .iter()
            .map(|c| (c.value(0, 0), c.value(1, 0)))
            .collect()
    }

    #[test]
    fn inner_join_keeps_matches_only() {
        let out = pairs(JoinKind::Inner, &[1, 2, 3], &[2, 3, 3, 4]);
        assert_eq!(
            out,
            vec![
                (Cell::Int(2), Cell::Int(2)),
                (Cell::Int(3), Cell::Int(3)),
                (Cell::Int(3), Cell::Int(3)),
            ]
        );
    }

    #[test]
    fn left_join_covers_every_main_row() {
        let out = pairs(JoinKind::Left, &[1, 2, 3], &[2, 4]);
        assert_eq!(
            out,
            vec![
                (Cell::Int(1), Cell::Null),
                (Cell::Int(2), Cell::Int(2)),
                (Cell::Int(3), Cell::Null),
            ]
        );
        let empty_right = pairs(JoinKind::Left, &[1, 2], &[]);
        assert_eq!(empty_right.len(), 2);
    }

    #[test]
    fn right_join_covers_every_join_row() {
        let out = pairs(JoinKind::Right, &[1, 2], &[2, 5, 6]);
        assert_eq!(
            out,
            vec![
                (Cell::Int(2), Cell::Int(2)),
                (Cell::Null, Cell::Int(5)),
                (Cell::Null, Cell::Int(6)),
            ]
        );
        let empty_main = pairs(JoinKind::Right, &[], &[7, 8]);
        assert_eq!(empty_main, vec![(Cell::Null, Cell::Int(7)), (Cell::Null, Cell::Int(8))]);
    }

    #[test]
    fn full_join_is_the_cross_product() {
        assert_eq!(pairs(JoinKind::Full, &[1, 2, 3], &[1, 9]).len(), 6);
        assert_eq!(pairs(JoinKind::Full, &[1, 2], &[]).len(), 0);
    }

    #[test]
    fn using_compares_earlier_slot() {
        let using = Some(JoinClause {
            kind: JoinKind::Inner,
            condition: JoinCondition::Using(vec![UsingPair {
                slot: 0,
                left: 0,
                right: 0,
            }]),
        });
        let mut engine =
            JoinEngine::from_cursors(vec![cursor(&[1, 2]), cursor(&[2, 2])], vec![using], None, vec![]);
        assert_eq!(engine.fetch_all().expect("join").len(), 2);
    }

    #[test]
    fn three_way_left_join_keeps_unmatched_combinations() {
        let second = Some(JoinClause {
            kind: JoinKind::Left,
            condition: JoinCondition::On(Clause::new(
                Expr::binary(Expr::column("b.k", 1, 0), BinaryOp::Eq, Expr::column("c.k", 2, 0)),
                "ON b.k = c.k",
            )),
        });
        let mut engine = JoinEngine::from_cursors(
            vec![cursor(&[1, 2]), cursor(&[1, 2]), cursor(&[2])],
            vec![on_equal(JoinKind::Inner), second],
            None,
            vec![],
        );
        let out: Vec<Vec<Cell>> = engine
            .fetch_all()
            .expect("join")
            .iter()
            .map(|c| (0..3).map(|s| c.value(s, 0)).collect())
            .collect();
        assert_eq!(
            out,
            vec![
                vec![Cell::Int(1), Cell::Int(1), Cell::Null],
                vec![Cell::Int(2), Cell::Int(2), Cell::Int(2)],
            ]
        );
    }

    #[test]
    fn where_errors_carry_clause_text() {
        let bad = Clause::new(
            Expr::binary(Expr::Literal(Cell::Int(i64::MAX)), BinaryOp::Plus, Expr::Literal(Cell::Int(1))),
            "WHERE x",
        );
        let mut engine = JoinEngine::from_cursors(vec![cursor(&[1])], vec![], Some(bad), vec![]);
        let err = engine.fetch().expect_err("overflow");
        assert!(err.to_string().starts_with("WHERE x:"));
    }

    #[test]
    fn finish_callback_fires_at_end() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let mut engine =
            JoinEngine::from_cursors(vec![cursor(&[1, 2]), cursor(&[3])], vec![None], None, vec![]);
        engine.on_finish(move || flag.store(true, Ordering::SeqCst));
        assert_eq!(engine.fetch_all().expect("join").len(), 2);
        assert!(done.load(Ordering::SeqCst));
        assert!(engine.fetch().expect("eof").is_none());
    }

    #[test]
    fn writes_mark_rows_dirty() {
        let mut engine = JoinEngine::from_cursors(vec![cursor(&[1, 2])], vec![], None, vec![]);
        let comp = engine.fetch().expect("fetch").expect("row");
        let handle = comp.field_handle(0, 0).expect("handle");
        assert!(engine.write(handle, Cell::Int(10)));
        assert!(!engine.write(handle, Cell::Int(10)));
        assert_eq!(engine.cursors()[0].row(0), Some(&Row::new(vec![Cell::Int(10)])));
    }
}
