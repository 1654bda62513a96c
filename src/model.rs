use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SqlType {
    Int,
    Float,
    Text,
    Date,
    DateTime,
}

/// Target of a foreign key column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: SqlType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<Cell>,
    #[serde(default)]
    pub references: Option<ForeignKey>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
            default: None,
            references: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: Cell) -> Self {
        self.default = Some(value);
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub unique_keys: Vec<Vec<String>>,
    #[serde(default)]
    pub auto_increment: bool,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            unique_keys: Vec::new(),
            auto_increment: false,
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique_keys
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_def(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_key_index(&self) -> Option<usize> {
        self.primary_key
            .as_deref()
            .and_then(|pk| self.column_index(pk))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Date(i64),     // Days since epoch
    DateTime(i64), // Millis since epoch
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Cell::Null, Cell::Null) => true,
            (Cell::Int(a), Cell::Int(b)) => a == b,
            (Cell::Float(a), Cell::Float(b)) => a.to_bits() == b.to_bits(),
            (Cell::Text(a), Cell::Text(b)) => a == b,
            (Cell::Date(a), Cell::Date(b)) => a == b,
            (Cell::DateTime(a), Cell::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Cell {}

impl std::hash::Hash for Cell {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Cell::Null => 0.hash(state),
            Cell::Int(i) => {
                1.hash(state);
                i.hash(state);
            }
            Cell::Float(f) => {
                2.hash(state);
                // Hash bytes for f64 to implement Hash
                f.to_be_bytes().hash(state);
            }
            Cell::Text(s) => {
                3.hash(state);
                s.hash(state);
            }
            Cell::Date(d) => {
                4.hash(state);
                d.hash(state);
            }
            Cell::DateTime(dt) => {
                5.hash(state);
                dt.hash(state);
            }
        }
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Cell::Int(i64::from(v))
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Int(i64::from(v))
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Cell::Null)
    }
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn add(&self, other: &Cell) -> Option<Cell> {
        match (self, other) {
            (Cell::Int(a), Cell::Int(b)) => a.checked_add(*b).map(Cell::Int),
            (Cell::Float(a), Cell::Float(b)) => Some(Cell::Float(a + b)),
            (Cell::Int(a), Cell::Float(b)) => Some(Cell::Float(*a as f64 + b)),
            (Cell::Float(a), Cell::Int(b)) => Some(Cell::Float(a + *b as f64)),
            _ => None,
        }
    }

    pub fn div_count(&self, count: usize) -> Option<Cell> {
        match self {
            Cell::Int(i) => Some(Cell::Float(*i as f64 / count as f64)),
            Cell::Float(f) => Some(Cell::Float(*f / count as f64)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(i) => Some(*i),
            Cell::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Cell::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Float(f) => Some(*f),
            Cell::Int(i) => Some(*i as f64),
            Cell::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Numeric view used by arithmetic; text that does not parse is 0 like MySQL.
    pub fn to_number(&self) -> Option<Cell> {
        match self {
            Cell::Null => None,
            Cell::Int(_) | Cell::Float(_) => Some(self.clone()),
            Cell::Text(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    Some(Cell::Int(i))
                } else {
                    Some(Cell::Float(s.parse::<f64>().unwrap_or(0.0)))
                }
            }
            Cell::Date(d) => Some(Cell::Int(*d)),
            Cell::DateTime(ms) => Some(Cell::Int(*ms)),
        }
    }

    /// SQL truthiness; `None` is UNKNOWN.
    pub fn truthy(&self) -> Option<bool> {
        match self {
            Cell::Null => None,
            Cell::Int(i) => Some(*i != 0),
            Cell::Float(f) => Some(*f != 0.0),
            Cell::Text(s) => Some(s.trim().parse::<f64>().map(|f| f != 0.0).unwrap_or(false)),
            Cell::Date(_) | Cell::DateTime(_) => Some(true),
        }
    }

    /// Ordering used by ORDER BY, MIN/MAX and comparisons; NULL sorts first.
    pub fn cmp_for_order(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Int(a_val), Cell::Int(b_val)) => a_val.cmp(b_val),
            (Cell::Float(a_val), Cell::Float(b_val)) => {
                a_val.partial_cmp(b_val).unwrap_or(Ordering::Equal)
            }
            (Cell::Int(_), Cell::Float(_)) | (Cell::Float(_), Cell::Int(_)) => {
                let (Some(a_num), Some(b_num)) = (self.as_f64(), other.as_f64()) else {
                    return Ordering::Equal;
                };
                a_num.partial_cmp(&b_num).unwrap_or(Ordering::Equal)
            }
            (Cell::Text(a_val), Cell::Text(b_val)) => a_val.cmp(b_val),
            (Cell::Date(a_val), Cell::Date(b_val)) => a_val.cmp(b_val),
            (Cell::DateTime(a_val), Cell::DateTime(b_val)) => a_val.cmp(b_val),
            (Cell::Null, Cell::Null) => Ordering::Equal,
            (Cell::Null, _) => Ordering::Less,
            (_, Cell::Null) => Ordering::Greater,
            (Cell::Int(_) | Cell::Float(_), Cell::Text(_))
            | (Cell::Text(_), Cell::Int(_) | Cell::Float(_)) => {
                // Numeric text compares as a number.
                match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                    _ => self.to_display_string().cmp(&other.to_display_string()),
                }
            }
            _ => self.to_display_string().cmp(&other.to_display_string()),
        }
    }

    /// SQL `=`: `None` when either side is NULL.
    pub fn sql_eq(&self, other: &Cell) -> Option<bool> {
        if self.is_null() || other.is_null() {
            return None;
        }
        Some(self.cmp_for_order(other) == Ordering::Equal)
    }

    pub fn to_display_string(&self) -> String {
        match self {
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => f.to_string(),
            Cell::Text(s) => s.clone(),
            Cell::Date(days) => {
                use chrono::TimeZone;
                let secs = days.saturating_mul(86_400);
                match chrono::Utc.timestamp_opt(secs, 0).single() {
                    Some(dt) => dt.format("%Y-%m-%d").to_string(),
                    None => secs.to_string(),
                }
            }
            Cell::DateTime(millis) => {
                use chrono::TimeZone;
                match chrono::Utc.timestamp_millis_opt(*millis).single() {
                    Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
                    None => millis.to_string(),
                }
            }
            Cell::Null => "NULL".into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Null => serde_json::Value::Null,
            Cell::Int(i) => serde_json::Value::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Cell::Text(s) => serde_json::Value::String(s.clone()),
            Cell::Date(_) | Cell::DateTime(_) => {
                serde_json::Value::String(self.to_display_string())
            }
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Cell {
        match value {
            serde_json::Value::Null => Cell::Null,
            serde_json::Value::Bool(b) => Cell::from(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
            },
            serde_json::Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Values aligned to TableDef.columns.
    pub values: Vec<Cell>,
}

impl Row {
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }

    pub fn get(&self, idx: usize) -> &Cell {
        self.values.get(idx).unwrap_or(&Cell::Null)
    }
}
