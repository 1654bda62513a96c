//! Row stores behind the engine: the async `TableStore` seam, pre-write row
//! normalization and the duplicate-key check shared by the backends.

mod keyed;
mod memory;

pub use self::keyed::KeyedStore;
pub use self::memory::MemoryStore;

use crate::error::EngineError;
use crate::model::{Cell, Row, SqlType, TableDef};
use async_trait::async_trait;

/// What to do with an incoming row that collides with an existing one.
#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateAction {
    Reject,
    Ignore,
    /// Rewrite the existing row with this value.
    Replace(Row),
}

/// Called with `(existing, incoming)` for every colliding row.
pub type DuplicateHandler<'a> =
    dyn Fn(&Row, &Row) -> Result<DuplicateAction, EngineError> + Send + Sync + 'a;

/// Outcome of one row passed to `add_all`. Carries the row id: the primary
/// key value, or the row position for keyless tables.
#[derive(Debug, Clone, PartialEq)]
pub enum Written {
    Added(Cell),
    Updated(Cell),
    Skipped,
}

#[async_trait]
pub trait TableStore: Send + Sync {
    fn schema(&self) -> &TableDef;

    /// Materializes every row; deleted rows of keyless tables are holes.
    async fn scan(&self) -> Result<Vec<Option<Row>>, EngineError>;

    /// Inserts normalized rows one at a time, so each duplicate check sees
    /// the rows written before it.
    async fn add_all(
        &self,
        rows: Vec<Row>,
        on_duplicate: Option<&DuplicateHandler<'_>>,
    ) -> Result<Vec<Written>, EngineError>;

    /// Inserts or overwrites rows by primary key. Returns the row ids.
    async fn put_all(&self, rows: Vec<Row>) -> Result<Vec<Cell>, EngineError>;

    /// Removes rows by id. Returns the ids that existed.
    async fn delete_all(&self, ids: Vec<Cell>) -> Result<Vec<Cell>, EngineError>;

    /// Writes back rows changed in place. `changes` pairs a scan position with
    /// the new row value.
    async fn sync(&self, changes: Vec<(usize, Row)>) -> Result<(), EngineError>;
}

/// Id of a scanned row: its primary key, or its scan position.
pub fn row_id(schema: &TableDef, position: usize, row: &Row) -> Cell {
    match schema.primary_key_index() {
        Some(pk) => row.get(pk).clone(),
        None => Cell::Int(position as i64),
    }
}

/// Builds a full row from `values` supplied for `columns` (indexes into the
/// schema). Missing columns take their default or NULL; every value is
/// coerced to its column type. A NULL primary key is left for an
/// auto-increment table to fill.
pub fn normalize_row(
    schema: &TableDef,
    columns: &[usize],
    values: Vec<Cell>,
) -> Result<Row, EngineError> {
    if columns.len() != values.len() {
        return Err(EngineError::Invalid(format!(
            "Column count doesn't match value count for table {}",
            schema.name
        )));
    }
    let mut out: Vec<Option<Cell>> = vec![None; schema.columns.len()];
    for (&idx, value) in columns.iter().zip(values) {
        let slot = out.get_mut(idx).ok_or_else(|| {
            EngineError::UnknownColumn(format!("{}.#{idx}", schema.name))
        })?;
        *slot = Some(value);
    }

    let pk = schema.primary_key_index();
    let mut row = Vec::with_capacity(schema.columns.len());
    for (idx, (def, value)) in schema.columns.iter().zip(out).enumerate() {
        let value = match value {
            Some(v) => v,
            None => def.default.clone().unwrap_or(Cell::Null),
        };
        let value = coerce_cell(value, def.ty)?;
        if value.is_null() && !def.nullable {
            let generated = schema.auto_increment && pk == Some(idx);
            if !generated {
                return Err(EngineError::Invalid(format!(
                    "Column '{}' cannot be null",
                    def.name
                )));
            }
        }
        row.push(value);
    }
    Ok(Row::new(row))
}

pub fn coerce_cell(cell: Cell, target: SqlType) -> Result<Cell, EngineError> {
    match (target, &cell) {
        (_, Cell::Null) => Ok(cell),
        (SqlType::Int, Cell::Float(f)) if f.fract() == 0.0 => Ok(Cell::Int(*f as i64)),
        (SqlType::Int, Cell::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map(Cell::Int)
            .map_err(|_| EngineError::Invalid(format!("Incorrect integer value: '{s}'"))),
        (SqlType::Float, Cell::Int(i)) => Ok(Cell::Float(*i as f64)),
        (SqlType::Float, Cell::Text(s)) => {
            let f = s
                .trim()
                .parse::<f64>()
                .map_err(|_| EngineError::Invalid(format!("Invalid float: {s}")))?;
            Ok(Cell::Float(f))
        }
        (SqlType::Text, Cell::Int(_) | Cell::Float(_)) => Ok(Cell::Text(cell.to_display_string())),
        (SqlType::Date, Cell::Text(s)) => {
            let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
                .ok_or_else(|| EngineError::Invalid("calendar epoch out of range".into()))?;
            match chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
                Ok(date) => Ok(Cell::Date((date - epoch).num_days())),
                Err(_) => Err(EngineError::Invalid(format!(
                    "Invalid date format: {s} (expected YYYY-MM-DD)"
                ))),
            }
        }
        (SqlType::DateTime, Cell::Text(s)) => {
            match chrono::NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S") {
                Ok(dt) => Ok(Cell::DateTime(dt.and_utc().timestamp_millis())),
                Err(_) => Err(EngineError::Invalid(format!("Invalid datetime format: {s}"))),
            }
        }
        (SqlType::DateTime, Cell::Date(days)) => Ok(Cell::DateTime(days.saturating_mul(86_400_000))),
        _ => Ok(cell),
    }
}

/// Position of the first live row colliding with `candidate` on the primary
/// key or on any unique key. Keys containing a NULL never collide.
pub(crate) fn find_duplicate<'r>(
    schema: &TableDef,
    rows: impl Iterator<Item = (usize, &'r Row)>,
    candidate: &Row,
) -> Option<usize> {
    let mut keys: Vec<Vec<usize>> = Vec::new();
    if let Some(pk) = schema.primary_key_index() {
        keys.push(vec![pk]);
    }
    for unique in &schema.unique_keys {
        let cols: Option<Vec<usize>> = unique.iter().map(|c| schema.column_index(c)).collect();
        if let Some(cols) = cols {
            keys.push(cols);
        }
    }
    let keys: Vec<Vec<usize>> = keys
        .into_iter()
        .filter(|cols| cols.iter().all(|&c| !candidate.get(c).is_null()))
        .collect();
    if keys.is_empty() {
        return None;
    }

    for (pos, row) in rows {
        let hit = keys
            .iter()
            .any(|cols| cols.iter().all(|&c| row.get(c) == candidate.get(c)));
        if hit {
            return Some(pos);
        }
    }
    None
}

pub(crate) fn duplicate_error(schema: &TableDef, row: &Row) -> EngineError {
    let key = match schema.primary_key_index() {
        Some(pk) => row.get(pk).to_display_string(),
        None => row
            .values
            .iter()
            .map(Cell::to_display_string)
            .collect::<Vec<_>>()
            .join("-"),
    };
    EngineError::DuplicateKey {
        table: schema.name.clone(),
        key,
    }
}
