use super::{
    duplicate_error, find_duplicate, DuplicateAction, DuplicateHandler, TableStore, Written,
};
use crate::error::EngineError;
use crate::model::{Cell, Row, SqlType, TableDef};
use async_trait::async_trait;
use sled::Batch;
use tracing::debug;

/// Table persisted in a sled database. Rows live in the shared `data` tree
/// under `r\0<table>\0<pk>`; schemas live in `catalog`.
#[derive(Clone)]
pub struct KeyedStore {
    db: sled::Db,
    catalog: sled::Tree,
    data: sled::Tree,
    schema: TableDef,
    pk: usize,
}

impl std::fmt::Debug for KeyedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedStore")
            .field("table", &self.schema.name)
            .finish()
    }
}

impl KeyedStore {
    /// Persists `schema` and returns a handle to the new, empty table.
    pub fn create(db: &sled::Db, schema: TableDef) -> Result<Self, EngineError> {
        let store = Self::handle(db, schema)?;
        let key = Self::table_key(&store.schema.name);
        if store.catalog.get(&key)?.is_some() {
            return Err(EngineError::Invalid(format!(
                "table already exists: {}",
                store.schema.name
            )));
        }
        store.catalog.insert(key, bincode::serialize(&store.schema)?)?;
        store.catalog.flush()?;
        Ok(store)
    }

    /// Handles for every table stored in `db`.
    pub fn open_all(db: &sled::Db) -> Result<Vec<Self>, EngineError> {
        let catalog = db.open_tree("catalog")?;
        let mut out = Vec::new();
        for item in catalog.scan_prefix(b"t\0") {
            let (_k, v) = item?;
            let schema: TableDef = bincode::deserialize(&v)?;
            out.push(Self::handle(db, schema)?);
        }
        debug!(tables = out.len(), "opened keyed tables");
        Ok(out)
    }

    fn handle(db: &sled::Db, schema: TableDef) -> Result<Self, EngineError> {
        let pk = schema
            .primary_key_index()
            .filter(|&i| schema.columns[i].ty == SqlType::Int)
            .ok_or_else(|| {
                EngineError::NotSupported(format!(
                    "keyed table {} needs an INT primary key",
                    schema.name
                ))
            })?;
        Ok(Self {
            db: db.clone(),
            catalog: db.open_tree("catalog")?,
            data: db.open_tree("data")?,
            schema,
            pk,
        })
    }

    fn table_key(table: &str) -> Vec<u8> {
        let mut k = Vec::new();
        k.extend_from_slice(b"t\0");
        k.extend_from_slice(table.to_ascii_lowercase().as_bytes());
        k
    }

    fn row_prefix(table: &str) -> Vec<u8> {
        let mut k = Vec::new();
        k.extend_from_slice(b"r\0");
        k.extend_from_slice(table.to_ascii_lowercase().as_bytes());
        k.push(0);
        k
    }

    fn row_key(table: &str, pk: i64) -> Vec<u8> {
        let mut k = Self::row_prefix(table);
        k.extend_from_slice(&pk.to_be_bytes());
        k
    }

    fn auto_inc_key(table: &str) -> Vec<u8> {
        let mut k = Vec::new();
        k.extend_from_slice(b"ai\0");
        k.extend_from_slice(table.to_ascii_lowercase().as_bytes());
        k
    }

    fn parse_pk_from_row_key(key: &[u8]) -> Result<i64, EngineError> {
        if key.len() < 8 {
            return Err(EngineError::Invalid("corrupt row key".into()));
        }
        let pk_bytes: [u8; 8] = key[key.len() - 8..]
            .try_into()
            .map_err(|_| EngineError::Invalid("corrupt row key".into()))?;
        Ok(i64::from_be_bytes(pk_bytes))
    }

    fn decode_counter(bytes: Option<&[u8]>) -> Option<i64> {
        let raw: [u8; 8] = bytes?.try_into().ok()?;
        Some(i64::from_be_bytes(raw))
    }

    fn allocate_auto_increment(&self) -> Result<i64, EngineError> {
        let next = self
            .catalog
            .update_and_fetch(Self::auto_inc_key(&self.schema.name), |old| {
                let cur = Self::decode_counter(old).unwrap_or(1);
                Some(cur.saturating_add(1).to_be_bytes().to_vec())
            })?
            .ok_or_else(|| EngineError::Invalid("auto_increment update failed".into()))?;
        let allocated = Self::decode_counter(Some(next.as_ref()))
            .ok_or_else(|| EngineError::Invalid("corrupt auto_increment value".into()))?
            .saturating_sub(1);
        if allocated <= 0 {
            return Err(EngineError::Invalid("auto_increment exhausted".into()));
        }
        Ok(allocated)
    }

    fn bump_auto_increment_next(&self, next: i64) -> Result<(), EngineError> {
        if next <= 0 {
            return Ok(());
        }
        self.catalog
            .update_and_fetch(Self::auto_inc_key(&self.schema.name), |old| {
                let cur = Self::decode_counter(old).unwrap_or(1);
                Some(cur.max(next).to_be_bytes().to_vec())
            })?;
        Ok(())
    }

    fn scan_rows(&self) -> Result<Vec<(i64, Row)>, EngineError> {
        let mut out = Vec::new();
        for item in self.data.scan_prefix(Self::row_prefix(&self.schema.name)) {
            let (k, v) = item?;
            let pk = Self::parse_pk_from_row_key(&k)?;
            let row: Row = bincode::deserialize(&v)?;
            out.push((pk, row));
        }
        out.sort_by_key(|(pk, _)| *pk);
        Ok(out)
    }

    fn get_row(&self, pk: i64) -> Result<Option<Row>, EngineError> {
        Ok(self
            .data
            .get(Self::row_key(&self.schema.name, pk))?
            .map(|v| bincode::deserialize(&v))
            .transpose()?)
    }

    fn pk_of(&self, row: &Row) -> Result<i64, EngineError> {
        row.get(self.pk).as_i64().ok_or_else(|| {
            EngineError::Invalid(format!(
                "PRIMARY KEY of {} must be an INT",
                self.schema.name
            ))
        })
    }

    fn put_row(&self, pk: i64, row: &Row) -> Result<(), EngineError> {
        self.data
            .insert(Self::row_key(&self.schema.name, pk), bincode::serialize(row)?)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), EngineError> {
        self.data.flush()?;
        self.catalog.flush()?;
        self.db.flush()?;
        Ok(())
    }

    fn collision(&self, pk: i64, row: &Row) -> Result<Option<Row>, EngineError> {
        if let Some(existing) = self.get_row(pk)? {
            return Ok(Some(existing));
        }
        if self.schema.unique_keys.is_empty() {
            return Ok(None);
        }
        let rows = self.scan_rows()?;
        let hit = find_duplicate(
            &self.schema,
            rows.iter().enumerate().map(|(i, (_, r))| (i, r)),
            row,
        );
        Ok(hit.and_then(|i| rows.into_iter().nth(i)).map(|(_, r)| r))
    }

    fn add_one(
        &self,
        mut row: Row,
        on_duplicate: Option<&DuplicateHandler<'_>>,
    ) -> Result<Written, EngineError> {
        let pk = match row.get(self.pk) {
            Cell::Null if self.schema.auto_increment => {
                let pk = self.allocate_auto_increment()?;
                row.values[self.pk] = Cell::Int(pk);
                pk
            }
            Cell::Null => {
                return Err(EngineError::Invalid(format!(
                    "Field '{}' doesn't have a default value",
                    self.schema.columns[self.pk].name
                )))
            }
            _ => {
                let pk = self.pk_of(&row)?;
                if self.schema.auto_increment {
                    self.bump_auto_increment_next(pk.saturating_add(1))?;
                }
                pk
            }
        };

        let Some(existing) = self.collision(pk, &row)? else {
            self.put_row(pk, &row)?;
            return Ok(Written::Added(Cell::Int(pk)));
        };
        let action = match on_duplicate {
            Some(handler) => handler(&existing, &row)?,
            None => DuplicateAction::Reject,
        };
        match action {
            DuplicateAction::Reject => Err(duplicate_error(&self.schema, &row)),
            DuplicateAction::Ignore => Ok(Written::Skipped),
            DuplicateAction::Replace(updated) => {
                let old_pk = self.pk_of(&existing)?;
                let new_pk = self.pk_of(&updated)?;
                if old_pk != new_pk {
                    self.data.remove(Self::row_key(&self.schema.name, old_pk))?;
                }
                self.put_row(new_pk, &updated)?;
                Ok(Written::Updated(Cell::Int(new_pk)))
            }
        }
    }
}

#[async_trait]
impl TableStore for KeyedStore {
    fn schema(&self) -> &TableDef {
        &self.schema
    }

    async fn scan(&self) -> Result<Vec<Option<Row>>, EngineError> {
        Ok(self.scan_rows()?.into_iter().map(|(_, r)| Some(r)).collect())
    }

    async fn add_all(
        &self,
        rows: Vec<Row>,
        on_duplicate: Option<&DuplicateHandler<'_>>,
    ) -> Result<Vec<Written>, EngineError> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match self.add_one(row, on_duplicate) {
                Ok(w) => out.push(w),
                Err(e) => {
                    self.flush()?;
                    return Err(e);
                }
            }
        }
        self.flush()?;
        Ok(out)
    }

    async fn put_all(&self, rows: Vec<Row>) -> Result<Vec<Cell>, EngineError> {
        let mut batch = Batch::default();
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let pk = self.pk_of(row)?;
            batch.insert(Self::row_key(&self.schema.name, pk), bincode::serialize(row)?);
            ids.push(Cell::Int(pk));
        }
        self.data.apply_batch(batch)?;
        self.flush()?;
        Ok(ids)
    }

    async fn delete_all(&self, ids: Vec<Cell>) -> Result<Vec<Cell>, EngineError> {
        let mut batch = Batch::default();
        let mut removed = Vec::new();
        for id in ids {
            let Some(pk) = id.as_i64() else { continue };
            let key = Self::row_key(&self.schema.name, pk);
            if self.data.contains_key(&key)? {
                batch.remove(key);
                removed.push(Cell::Int(pk));
            }
        }
        self.data.apply_batch(batch)?;
        self.flush()?;
        Ok(removed)
    }

    async fn sync(&self, changes: Vec<(usize, Row)>) -> Result<(), EngineError> {
        let mut batch = Batch::default();
        for (_, row) in &changes {
            let pk = self.pk_of(row)?;
            batch.insert(Self::row_key(&self.schema.name, pk), bincode::serialize(row)?);
        }
        self.data.apply_batch(batch)?;
        self.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ColumnDef;

    fn def() -> TableDef {
        TableDef::new("Items")
            .column(ColumnDef::new("id", SqlType::Int))
            .column(ColumnDef::new("name", SqlType::Text))
            .primary_key("id")
            .unique(&["name"])
            .auto_increment()
    }

    fn row(id: impl Into<Cell>, name: &str) -> Row {
        Row::new(vec![id.into(), Cell::from(name)])
    }

    #[tokio::test]
    async fn rows_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let db = sled::open(dir.path()).expect("open");
            let store = KeyedStore::create(&db, def()).expect("create");
            let written = store
                .add_all(vec![row(Cell::Null, "a"), row(5, "b"), row(Cell::Null, "c")], None)
                .await
                .expect("add");
            assert_eq!(
                written,
                vec![
                    Written::Added(Cell::Int(1)),
                    Written::Added(Cell::Int(5)),
                    Written::Added(Cell::Int(6)),
                ]
            );
            assert!(KeyedStore::create(&db, def()).is_err());
        }

        let db = sled::open(dir.path()).expect("reopen");
        let stores = KeyedStore::open_all(&db).expect("open_all");
        assert_eq!(stores.len(), 1);
        let rows = stores[0].scan().await.expect("scan");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], Some(row(6, "c")));
    }

    #[tokio::test]
    async fn unique_key_collision_and_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = sled::open(dir.path()).expect("open");
        let store = KeyedStore::create(&db, def()).expect("create");
        store.add_all(vec![row(1, "a")], None).await.expect("add");

        let err = store.add_all(vec![row(2, "a")], None).await.expect_err("dup");
        assert!(err.is_duplicate_key());

        let removed = store
            .delete_all(vec![Cell::Int(1), Cell::Int(9)])
            .await
            .expect("delete");
        assert_eq!(removed, vec![Cell::Int(1)]);
        assert!(store.scan().await.expect("scan").is_empty());
    }

    #[test]
    fn keyless_tables_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = sled::open(dir.path()).expect("open");
        let def = TableDef::new("log").column(ColumnDef::new("msg", SqlType::Text));
        assert!(KeyedStore::create(&db, def).is_err());
    }
}
