//! Bound statements and their evaluators.

pub mod delete;
pub mod insert;
pub mod select;
pub mod update;

use crate::composition::FieldMap;
use crate::error::EngineError;
use crate::model::Cell;
use std::collections::BTreeMap;
use tracing::debug;

pub use self::delete::DeletePlan;
pub use self::insert::InsertPlan;
pub use self::select::SelectPlan;
pub use self::update::UpdatePlan;

#[derive(Debug)]
pub enum Statement {
    Select(SelectPlan),
    Insert(InsertPlan),
    Update(UpdatePlan),
    Delete(DeletePlan),
}

impl Statement {
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Select(_) => "SELECT",
            Statement::Insert(_) => "INSERT",
            Statement::Update(_) => "UPDATE",
            Statement::Delete(_) => "DELETE",
        }
    }
}

/// Rows touched in one table: their ids when the table has a primary key,
/// otherwise only how many.
#[derive(Debug, Clone, PartialEq)]
pub enum Affected {
    Keys(Vec<Cell>),
    Count(u64),
}

impl Affected {
    pub(crate) fn from_ids(has_key: bool, ids: Vec<Cell>) -> Self {
        if has_key {
            Affected::Keys(ids)
        } else {
            Affected::Count(ids.len() as u64)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Affected::Keys(keys) => keys.len(),
            Affected::Count(n) => *n as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Affected::Keys(keys) => {
                serde_json::Value::Array(keys.iter().map(Cell::to_json).collect())
            }
            Affected::Count(n) => serde_json::Value::from(*n),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Rows(Vec<FieldMap>),
    /// Keyed by table alias (or table name for INSERT).
    Mutation(BTreeMap<String, Affected>),
}

impl Output {
    pub fn rows(&self) -> Option<&[FieldMap]> {
        match self {
            Output::Rows(rows) => Some(rows),
            Output::Mutation(_) => None,
        }
    }

    pub fn affected(&self, table: &str) -> Option<&Affected> {
        match self {
            Output::Mutation(map) => map
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(table))
                .map(|(_, v)| v),
            Output::Rows(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Output::Rows(rows) => {
                serde_json::Value::Array(rows.iter().map(FieldMap::to_json).collect())
            }
            Output::Mutation(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

pub async fn execute(stmt: &Statement, params: &[Cell]) -> Result<Output, EngineError> {
    debug!(kind = stmt.kind(), params = params.len(), "executing statement");
    match stmt {
        Statement::Select(plan) => Ok(Output::Rows(select::run(plan, params).await?)),
        Statement::Insert(plan) => insert::run(plan, params).await,
        Statement::Update(plan) => update::run(plan, params).await,
        Statement::Delete(plan) => delete::run(plan, params).await,
    }
}
