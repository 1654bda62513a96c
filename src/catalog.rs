//! Table registry and the statement entry point.

use crate::error::EngineError;
use crate::model::{Cell, TableDef};
use crate::reference::SchemaLookup;
use crate::sql;
use crate::statement::{self, Output};
use crate::store::{KeyedStore, MemoryStore, TableStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Snapshot of the registered stores, keyed by lowercase table name.
#[derive(Clone, Default)]
pub struct Tables {
    stores: HashMap<String, Arc<dyn TableStore>>,
}

impl Tables {
    pub fn get(&self, name: &str) -> Result<Arc<dyn TableStore>, EngineError> {
        self.stores
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| EngineError::UnknownTable(name.to_string()))
    }

    pub fn insert(&mut self, store: Arc<dyn TableStore>) -> Result<(), EngineError> {
        let key = store.schema().name.to_ascii_lowercase();
        if self.stores.contains_key(&key) {
            return Err(EngineError::Invalid(format!(
                "Table '{}' already exists",
                store.schema().name
            )));
        }
        self.stores.insert(key, store);
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.values().map(|s| s.schema().name.clone()).collect();
        names.sort();
        names
    }
}

impl SchemaLookup for Tables {
    fn lookup(&self, table: &str) -> Option<&TableDef> {
        self.stores
            .get(&table.to_ascii_lowercase())
            .map(|s| s.schema())
    }
}

pub struct Database {
    tables: RwLock<Tables>,
    keyed: Option<sled::Db>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// In-memory database; tables are created as `MemoryStore`s.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            keyed: None,
        }
    }

    /// Opens (or creates) a sled database and registers every table stored in it.
    pub fn open_keyed(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let db = sled::open(path)?;
        let mut tables = Tables::default();
        for store in KeyedStore::open_all(&db)? {
            tables.insert(Arc::new(store))?;
        }
        info!(tables = ?tables.names(), "keyed store opened");
        Ok(Self {
            tables: RwLock::new(tables),
            keyed: Some(db),
        })
    }

    pub fn create_table(&self, def: TableDef) -> Result<(), EngineError> {
        if self.tables.read().lookup(&def.name).is_some() {
            return Err(EngineError::Invalid(format!("Table '{}' already exists", def.name)));
        }
        let store: Arc<dyn TableStore> = match &self.keyed {
            Some(db) => Arc::new(KeyedStore::create(db, def)?),
            None => Arc::new(MemoryStore::new(def)),
        };
        self.register(store)
    }

    pub fn register(&self, store: Arc<dyn TableStore>) -> Result<(), EngineError> {
        debug!(table = %store.schema().name, "table registered");
        self.tables.write().insert(store)
    }

    pub fn table(&self, name: &str) -> Result<Arc<dyn TableStore>, EngineError> {
        self.tables.read().get(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().names()
    }

    pub async fn execute(&self, sql: &str) -> Result<Output, EngineError> {
        self.execute_with(sql, &[]).await
    }

    /// Runs exactly one statement; `?` placeholders read `params` in order.
    pub async fn execute_with(&self, sql: &str, params: &[Cell]) -> Result<Output, EngineError> {
        let mut statements = sql::parse(sql)?;
        if statements.len() != 1 {
            return Err(EngineError::Invalid(format!(
                "expected exactly one statement, found {}",
                statements.len()
            )));
        }
        let parsed = statements.remove(0);
        let tables = self.tables.read().clone();
        let plan = sql::bind(&parsed, &tables)?;
        statement::execute(&plan, params).await
    }

    /// Runs every statement of a script in order, stopping at the first error.
    pub async fn execute_script(&self, sql: &str) -> Result<Vec<Output>, EngineError> {
        let mut out = Vec::new();
        for parsed in sql::parse(sql)? {
            let tables = self.tables.read().clone();
            let plan = sql::bind(&parsed, &tables)?;
            out.push(statement::execute(&plan, &[]).await?);
        }
        Ok(out)
    }
}
