use super::{
    duplicate_error, find_duplicate, row_id, DuplicateAction, DuplicateHandler, TableStore,
    Written,
};
use crate::error::EngineError;
use crate::model::{Cell, Row, TableDef};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

#[derive(Debug, Default)]
struct Table {
    /// Deleted rows stay as holes so positional ids remain stable.
    rows: Vec<Option<Row>>,
    next_auto_inc: i64,
}

/// Process-local table. Keyless tables address rows by position.
#[derive(Debug)]
pub struct MemoryStore {
    schema: TableDef,
    table: RwLock<Table>,
}

impl MemoryStore {
    pub fn new(schema: TableDef) -> Self {
        Self {
            schema,
            table: RwLock::new(Table {
                rows: Vec::new(),
                next_auto_inc: 1,
            }),
        }
    }

    pub fn with_rows(schema: TableDef, rows: Vec<Row>) -> Self {
        let store = Self::new(schema);
        {
            let mut table = store.table.write();
            for row in rows {
                store.bump_auto_increment(&mut table, &row);
                table.rows.push(Some(row));
            }
        }
        store
    }

    fn bump_auto_increment(&self, table: &mut Table, row: &Row) {
        if let Some(pk) = self.schema.primary_key_index() {
            if let Cell::Int(id) = row.get(pk) {
                table.next_auto_inc = table.next_auto_inc.max(id.saturating_add(1));
            }
        }
    }

    fn position_of(&self, table: &Table, id: &Cell) -> Option<usize> {
        match self.schema.primary_key_index() {
            Some(pk) => table
                .rows
                .iter()
                .position(|r| r.as_ref().is_some_and(|r| r.get(pk) == id)),
            None => {
                let pos = usize::try_from(id.as_i64()?).ok()?;
                table.rows.get(pos)?.as_ref().map(|_| pos)
            }
        }
    }

    fn add_one(
        &self,
        table: &mut Table,
        mut row: Row,
        on_duplicate: Option<&DuplicateHandler<'_>>,
    ) -> Result<Written, EngineError> {
        if let Some(pk) = self.schema.primary_key_index() {
            if row.get(pk).is_null() {
                if !self.schema.auto_increment {
                    return Err(EngineError::Invalid(format!(
                        "Field '{}' doesn't have a default value",
                        self.schema.columns[pk].name
                    )));
                }
                row.values[pk] = Cell::Int(table.next_auto_inc);
            }
        }

        let live = table
            .rows
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|r| (i, r)));
        if let Some(pos) = find_duplicate(&self.schema, live, &row) {
            let Some(existing) = table.rows[pos].as_ref() else {
                return Err(duplicate_error(&self.schema, &row));
            };
            let action = match on_duplicate {
                Some(handler) => handler(existing, &row)?,
                None => DuplicateAction::Reject,
            };
            return match action {
                DuplicateAction::Reject => Err(duplicate_error(&self.schema, &row)),
                DuplicateAction::Ignore => Ok(Written::Skipped),
                DuplicateAction::Replace(updated) => {
                    let id = row_id(&self.schema, pos, &updated);
                    self.bump_auto_increment(table, &updated);
                    table.rows[pos] = Some(updated);
                    Ok(Written::Updated(id))
                }
            };
        }

        self.bump_auto_increment(table, &row);
        let id = row_id(&self.schema, table.rows.len(), &row);
        table.rows.push(Some(row));
        Ok(Written::Added(id))
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    fn schema(&self) -> &TableDef {
        &self.schema
    }

    async fn scan(&self) -> Result<Vec<Option<Row>>, EngineError> {
        Ok(self.table.read().rows.clone())
    }

    async fn add_all(
        &self,
        rows: Vec<Row>,
        on_duplicate: Option<&DuplicateHandler<'_>>,
    ) -> Result<Vec<Written>, EngineError> {
        let mut table = self.table.write();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.add_one(&mut table, row, on_duplicate)?);
        }
        trace!(table = %self.schema.name, rows = out.len(), "memory add_all");
        Ok(out)
    }

    async fn put_all(&self, rows: Vec<Row>) -> Result<Vec<Cell>, EngineError> {
        let mut table = self.table.write();
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let id = match self.schema.primary_key_index() {
                Some(pk) => row.get(pk).clone(),
                None => Cell::Int(table.rows.len() as i64),
            };
            self.bump_auto_increment(&mut table, &row);
            match self.position_of(&table, &id) {
                Some(pos) if self.schema.primary_key.is_some() => table.rows[pos] = Some(row),
                _ => table.rows.push(Some(row)),
            }
            ids.push(id);
        }
        Ok(ids)
    }

    async fn delete_all(&self, ids: Vec<Cell>) -> Result<Vec<Cell>, EngineError> {
        let mut table = self.table.write();
        let mut removed = Vec::new();
        for id in ids {
            if let Some(pos) = self.position_of(&table, &id) {
                table.rows[pos] = None;
                removed.push(id);
            }
        }
        Ok(removed)
    }

    async fn sync(&self, changes: Vec<(usize, Row)>) -> Result<(), EngineError> {
        let mut table = self.table.write();
        for (pos, row) in changes {
            match table.rows.get_mut(pos) {
                Some(slot) if slot.is_some() => *slot = Some(row),
                _ => {
                    return Err(EngineError::Invalid(format!(
                        "row {pos} of {} vanished during update",
                        self.schema.name
                    )))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDef, SqlType};

    fn keyed() -> MemoryStore {
        let def = TableDef::new("t")
            .column(ColumnDef::new("id", SqlType::Int))
            .column(ColumnDef::new("v", SqlType::Text))
            .primary_key("id")
            .auto_increment();
        MemoryStore::new(def)
    }

    fn row(id: impl Into<Cell>, v: &str) -> Row {
        Row::new(vec![id.into(), Cell::from(v)])
    }

    #[tokio::test]
    async fn auto_increment_continues_after_explicit_keys() {
        let store = keyed();
        let written = store
            .add_all(vec![row(Cell::Null, "a"), row(10, "b"), row(Cell::Null, "c")], None)
            .await
            .expect("add");
        assert_eq!(
            written,
            vec![
                Written::Added(Cell::Int(1)),
                Written::Added(Cell::Int(10)),
                Written::Added(Cell::Int(11)),
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_handling() {
        let store = keyed();
        store.add_all(vec![row(1, "a")], None).await.expect("add");

        let err = store.add_all(vec![row(1, "b")], None).await.expect_err("dup");
        assert!(err.is_duplicate_key());

        let ignore = |_: &Row, _: &Row| -> Result<DuplicateAction, EngineError> {
            Ok(DuplicateAction::Ignore)
        };
        let written = store.add_all(vec![row(1, "b")], Some(&ignore)).await.expect("ignore");
        assert_eq!(written, vec![Written::Skipped]);

        let replace = |old: &Row, new: &Row| -> Result<DuplicateAction, EngineError> {
            let mut merged = old.clone();
            let text = format!(
                "{}{}",
                old.get(1).to_display_string(),
                new.get(1).to_display_string()
            );
            merged.values[1] = Cell::from(text);
            Ok(DuplicateAction::Replace(merged))
        };
        let written = store.add_all(vec![row(1, "z")], Some(&replace)).await.expect("replace");
        assert_eq!(written, vec![Written::Updated(Cell::Int(1))]);
        let rows = store.scan().await.expect("scan");
        assert_eq!(rows, vec![Some(row(1, "az"))]);
    }

    #[tokio::test]
    async fn put_all_upserts_by_key() {
        let store = keyed();
        store.add_all(vec![row(1, "a")], None).await.expect("add");
        let ids = store
            .put_all(vec![row(1, "b"), row(2, "c")])
            .await
            .expect("put");
        assert_eq!(ids, vec![Cell::Int(1), Cell::Int(2)]);
        let rows = store.scan().await.expect("scan");
        assert_eq!(rows, vec![Some(row(1, "b")), Some(row(2, "c"))]);
    }

    #[tokio::test]
    async fn keyless_delete_leaves_holes() {
        let def = TableDef::new("log").column(ColumnDef::new("msg", SqlType::Text));
        let store = MemoryStore::with_rows(
            def,
            vec![Row::new(vec!["a".into()]), Row::new(vec!["b".into()])],
        );
        let removed = store
            .delete_all(vec![Cell::Int(0), Cell::Int(5)])
            .await
            .expect("delete");
        assert_eq!(removed, vec![Cell::Int(0)]);
        let rows = store.scan().await.expect("scan");
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_none());

        store
            .sync(vec![(1, Row::new(vec!["c".into()]))])
            .await
            .expect("sync");
        assert!(store.sync(vec![(0, Row::new(vec!["x".into()]))]).await.is_err());
    }
}
