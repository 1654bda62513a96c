use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Ambiguous column: {0}")]
    AmbiguousColumn(String),

    #[error("Undefined foreign key: {0}")]
    UndefinedForeignKey(String),

    #[error("Implied table not defined: {0}")]
    ImpliedTableNotDefined(String),

    #[error("Duplicate entry {key} for table {table}")]
    DuplicateKey { table: String, key: String },

    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("{clause}: {source}")]
    Clause {
        clause: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Wraps a failure raised while evaluating a clause, prefixing the clause text.
    pub fn in_clause(self, clause: impl Into<String>) -> Self {
        EngineError::Clause {
            clause: clause.into(),
            source: Box::new(self),
        }
    }

    pub fn is_duplicate_key(&self) -> bool {
        match self {
            EngineError::DuplicateKey { .. } => true,
            EngineError::Clause { source, .. } => source.is_duplicate_key(),
            _ => false,
        }
    }
}
