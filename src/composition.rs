//! Row compositions: one accepted join combination plus its `$` field namespace.

use crate::cursor::Cursor;
use crate::model::{Cell, Row};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Ordered output namespace (`$`): projected field name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: Vec<(String, Cell)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Cell> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Overwrites an existing key in place, otherwise appends.
    pub fn set(&mut self, name: &str, value: Cell) {
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some((_, v)) => *v = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Cell> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl<S: Into<String>, C: Into<Cell>> FromIterator<(S, C)> for FieldMap {
    fn from_iter<T: IntoIterator<Item = (S, C)>>(iter: T) -> Self {
        let mut out = FieldMap::new();
        for (k, v) in iter {
            out.set(&k.into(), v.into());
        }
        out
    }
}

/// Group summary attached to rows synthesized by GROUP BY.
#[derive(Debug, Clone)]
pub struct Aggr {
    pub rows: Vec<Composition>,
    /// Unqualified names of the grouping columns not applied to this row.
    pub by: Vec<String>,
    pub is_rollup: bool,
}

/// The ordered partition a row belongs to for one window definition.
#[derive(Debug, Clone)]
pub struct WindowStamp {
    pub partition: Arc<Vec<Composition>>,
    pub order_keys: Arc<Vec<Vec<Cell>>>,
    pub index: usize,
}

impl WindowStamp {
    /// Last index sharing the current row's ORDER BY keys.
    pub fn last_peer(&self) -> usize {
        if self.order_keys.is_empty() {
            return self.partition.len().saturating_sub(1);
        }
        let current = &self.order_keys[self.index];
        let mut last = self.index;
        while last + 1 < self.order_keys.len() && &self.order_keys[last + 1] == current {
            last += 1;
        }
        last
    }
}

#[derive(Debug, Clone)]
pub struct Composition {
    /// One entry per bound table; `None` is the empty side of an outer join.
    pub slots: Vec<Option<Row>>,
    pub positions: Vec<Option<usize>>,
    pub fields: FieldMap,
    pub aggr: Option<Arc<Aggr>>,
    pub windows: BTreeMap<String, WindowStamp>,
}

impl Composition {
    pub fn new(width: usize) -> Self {
        Self {
            slots: vec![None; width],
            positions: vec![None; width],
            fields: FieldMap::new(),
            aggr: None,
            windows: BTreeMap::new(),
        }
    }

    pub fn value(&self, slot: usize, column: usize) -> Cell {
        self.slots
            .get(slot)
            .and_then(|r| r.as_ref())
            .map(|r| r.get(column).clone())
            .unwrap_or(Cell::Null)
    }

    pub fn is_rollup(&self) -> bool {
        self.aggr.as_ref().is_some_and(|a| a.is_rollup)
    }

    /// Read-write handle onto the live table row behind a slot.
    pub fn field_handle(&self, slot: usize, column: usize) -> Option<FieldHandle> {
        let position = (*self.positions.get(slot)?)?;
        self.slots.get(slot)?.as_ref()?;
        Some(FieldHandle {
            slot,
            position,
            column,
        })
    }
}

/// Points at one column of one materialized table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldHandle {
    pub slot: usize,
    pub position: usize,
    pub column: usize,
}

impl FieldHandle {
    pub fn get(&self, cursors: &[Cursor]) -> Cell {
        cursors
            .get(self.slot)
            .and_then(|c| c.row(self.position))
            .map(|r| r.get(self.column).clone())
            .unwrap_or(Cell::Null)
    }

    /// Returns whether the stored value changed.
    pub fn set(&self, cursors: &mut [Cursor], value: Cell) -> bool {
        let Some(row) = cursors
            .get_mut(self.slot)
            .and_then(|c| c.row_mut(self.position))
        else {
            return false;
        };
        match row.values.get_mut(self.column) {
            Some(cell) if *cell != value => {
                *cell = value;
                true
            }
            _ => false,
        }
    }
}
