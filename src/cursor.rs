//! Positional, wraparound-aware iteration over a materialized row list.

use crate::model::Row;

type FinishCallback = Box<dyn FnMut() + Send>;

/// Growable matched-set keyed by a row position.
#[derive(Debug, Default, Clone)]
pub struct Flags {
    bits: Vec<bool>,
}

impl Flags {
    pub fn set(&mut self, index: usize) {
        if index >= self.bits.len() {
            self.bits.resize(index + 1, false);
        }
        self.bits[index] = true;
    }

    pub fn get(&self, index: usize) -> bool {
        self.bits.get(index).copied().unwrap_or(false)
    }
}

pub struct Cursor {
    rows: Vec<Option<Row>>,
    position: usize,
    flags: Flags,
    on_finish: Vec<FinishCallback>,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("len", &self.rows.len())
            .field("position", &self.position)
            .finish()
    }
}

impl Cursor {
    pub fn new(rows: Vec<Option<Row>>) -> Self {
        Self {
            rows,
            position: 0,
            flags: Flags::default(),
            on_finish: Vec::new(),
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True when the current position is the last one (or there are no rows).
    pub fn at_end(&self) -> bool {
        self.rows.is_empty() || self.position + 1 == self.rows.len()
    }

    /// Row at the current position; `None` for an empty cursor or a deleted row.
    pub fn fetch(&self) -> Option<&Row> {
        self.rows.get(self.position).and_then(|r| r.as_ref())
    }

    pub fn row(&self, position: usize) -> Option<&Row> {
        self.rows.get(position).and_then(|r| r.as_ref())
    }

    pub fn row_mut(&mut self, position: usize) -> Option<&mut Row> {
        self.rows.get_mut(position).and_then(|r| r.as_mut())
    }

    /// Moves one step forward. At the last position this fires the on-finish
    /// callbacks, rewinds to 0 and returns `true`.
    pub fn advance(&mut self) -> bool {
        if self.at_end() {
            for cb in self.on_finish.iter_mut() {
                cb();
            }
            self.position = 0;
            return true;
        }
        self.position += 1;
        false
    }

    pub fn on_finish(&mut self, cb: impl FnMut() + Send + 'static) {
        self.on_finish.push(Box::new(cb));
    }

    pub fn flag(&mut self, index: usize) {
        self.flags.set(index);
    }

    pub fn is_flagged(&self, index: usize) -> bool {
        self.flags.get(index)
    }

    pub fn into_rows(self) -> Vec<Option<Row>> {
        self.rows
    }
}
