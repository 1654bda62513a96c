//! A small SQL query engine over pluggable table stores.
//!
//! Statements are parsed with `sqlparser`, bound against the registered
//! schemas and evaluated by a cursor-based join engine. Foreign keys can be
//! followed inline with arrow references (`parent->age`,
//! `id<-child->name`), which bind to synthesized LEFT JOINs.

pub mod aggregate;
pub mod catalog;
pub mod composition;
pub mod cursor;
pub mod error;
pub mod expr;
pub mod functions;
pub mod group_by;
pub mod join;
pub mod model;
pub mod order_by;
pub mod reference;
pub mod sql;
pub mod statement;
pub mod store;
pub mod window;

pub use crate::catalog::{Database, Tables};
pub use crate::composition::FieldMap;
pub use crate::error::EngineError;
pub use crate::model::{Cell, ColumnDef, Row, SqlType, TableDef};
pub use crate::statement::{Affected, Output};
pub use crate::store::{KeyedStore, MemoryStore, TableStore};
