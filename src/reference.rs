//! Arrow references: `fk->col` and `key<-table->col` column shorthand that
//! stands for a LEFT JOIN along a foreign key.

use crate::error::EngineError;
use crate::model::TableDef;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arrow {
    Out,
    In,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Name(String),
    Arrow(Arrow),
}

/// Schema source used while resolving references.
pub trait SchemaLookup {
    fn lookup(&self, table: &str) -> Option<&TableDef>;
}

impl SchemaLookup for HashMap<String, TableDef> {
    fn lookup(&self, table: &str) -> Option<&TableDef> {
        self.get(&table.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSide {
    pub table: String,
    pub acting_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTarget {
    pub table: String,
    pub acting_key: String,
    /// Column (or further arrow path) read from the joined table.
    pub select: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    pub a: JoinSide,
    pub b: JoinTarget,
}

impl JoinSpec {
    /// Alias of the synthesized join; references sharing a traversal share it.
    pub fn identity(&self, a_alias: &str) -> String {
        format!(
            "$ref:{}.{}:{}.{}",
            a_alias.to_ascii_lowercase(),
            self.a.acting_key.to_ascii_lowercase(),
            self.b.table.to_ascii_lowercase(),
            self.b.acting_key.to_ascii_lowercase()
        )
    }

    /// `(a.table, a.key, b.table, b.key)` of the join equality.
    pub fn predicate(&self) -> (&str, &str, &str, &str) {
        (
            &self.a.table,
            &self.a.acting_key,
            &self.b.table,
            &self.b.acting_key,
        )
    }
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut out = Vec::new();
    let mut name = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        let arrow = match (ch, chars.peek()) {
            ('-' | '~', Some('>')) => Some(Arrow::Out),
            ('<', Some('-' | '~')) => Some(Arrow::In),
            _ => None,
        };
        match arrow {
            Some(a) => {
                chars.next();
                if !name.is_empty() {
                    out.push(Token::Name(std::mem::take(&mut name)));
                }
                out.push(Token::Arrow(a));
            }
            None => name.push(ch),
        }
    }
    if !name.is_empty() {
        out.push(Token::Name(name));
    }
    out
}

fn render(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| match t {
            Token::Name(n) => n.as_str(),
            Token::Arrow(Arrow::Out) => "->",
            Token::Arrow(Arrow::In) => "<-",
        })
        .collect()
}

pub fn is_reference(text: &str) -> bool {
    tokenize(text).iter().any(|t| matches!(t, Token::Arrow(_)))
}

/// A `<-` before the first `->` makes the whole path incoming.
pub fn is_incoming(text: &str) -> bool {
    tokenize(text)
        .iter()
        .find_map(|t| match t {
            Token::Arrow(a) => Some(*a == Arrow::In),
            Token::Name(_) => None,
        })
        .unwrap_or(false)
}

pub fn is_outgoing(text: &str) -> bool {
    is_reference(text) && !is_incoming(text)
}

/// Token-wise direction flip: token order reversed and every arrow turned round.
pub fn reverse(text: &str) -> String {
    let flipped: Vec<Token> = tokenize(text)
        .into_iter()
        .rev()
        .map(|t| match t {
            Token::Arrow(Arrow::Out) => Token::Arrow(Arrow::In),
            Token::Arrow(Arrow::In) => Token::Arrow(Arrow::Out),
            name => name,
        })
        .collect();
    render(&flipped)
}

/// Splits an optional `alias.` qualifier off the first path segment.
pub fn split_qualifier(text: &str) -> (Option<&str>, &str) {
    let first_arrow = text
        .find("->")
        .into_iter()
        .chain(text.find("<-"))
        .chain(text.find("~>"))
        .chain(text.find("<~"))
        .min()
        .unwrap_or(text.len());
    match text[..first_arrow].rfind('.') {
        Some(dot) => (Some(&text[..dot]), &text[dot + 1..]),
        None => (None, text),
    }
}

fn invalid(text: &str) -> EngineError {
    EngineError::Invalid(format!("malformed reference: {text}"))
}

/// Resolves one path step against `base` (the table the path is read from).
///
/// With no base an incoming reference derives it from the foreign key named
/// by the acting key.
pub fn resolve(
    base: Option<&TableDef>,
    reference: &str,
    schemas: &dyn SchemaLookup,
) -> Result<JoinSpec, EngineError> {
    let tokens = tokenize(reference);
    let (Some(Token::Name(key)), Some(Token::Arrow(first))) = (tokens.first(), tokens.get(1))
    else {
        return Err(invalid(reference));
    };
    let key = key.trim();

    match first {
        Arrow::In => {
            let Some(Token::Name(table)) = tokens.get(2) else {
                return Err(invalid(reference));
            };
            let b = schemas
                .lookup(table.trim())
                .ok_or_else(|| EngineError::ImpliedTableNotDefined(table.trim().to_string()))?;
            let select = match tokens.get(3) {
                Some(Token::Arrow(Arrow::Out)) => render(&tokens[4..]),
                // `k<-b<-c->x` continues from b along whatever c references.
                Some(Token::Arrow(Arrow::In)) => {
                    format!("{}{}", nested_key(b, tokens.get(4), schemas)?, render(&tokens[3..]))
                }
                _ => return Err(invalid(reference)),
            };
            if select.is_empty() || select.ends_with("->") || select.ends_with("<-") {
                return Err(invalid(reference));
            }
            let (a_table, a_key, b_key) = incoming_link(base, key, b, schemas)?;
            Ok(JoinSpec {
                a: JoinSide {
                    table: a_table,
                    acting_key: a_key,
                },
                b: JoinTarget {
                    table: b.name.clone(),
                    acting_key: b_key,
                    select,
                },
            })
        }
        Arrow::Out => {
            let a = base.ok_or_else(|| EngineError::UndefinedForeignKey(key.to_string()))?;
            let select = render(&tokens[2..]);
            if select.is_empty() {
                return Err(invalid(reference));
            }
            let fk = a
                .column_def(key)
                .and_then(|c| c.references.clone())
                .ok_or_else(|| EngineError::UndefinedForeignKey(format!("{}.{key}", a.name)))?;
            let b = schemas
                .lookup(&fk.table)
                .ok_or_else(|| EngineError::UndefinedForeignKey(format!("{}.{key}", a.name)))?;
            Ok(JoinSpec {
                a: JoinSide {
                    table: a.name.clone(),
                    acting_key: key.to_string(),
                },
                b: JoinTarget {
                    table: b.name.clone(),
                    acting_key: fk.column,
                    select,
                },
            })
        }
    }
}

/// Finds how `b` points back at the base of an incoming step.
///
/// `key` is either a foreign key column of `b` or the column of the base that
/// some column of `b` references. Returns `(base table, base key, b key)`.
fn incoming_link(
    base: Option<&TableDef>,
    key: &str,
    b: &TableDef,
    schemas: &dyn SchemaLookup,
) -> Result<(String, String, String), EngineError> {
    if let Some(fk) = b.column_def(key).and_then(|c| c.references.clone()) {
        match base {
            None => {
                let a = schemas
                    .lookup(&fk.table)
                    .ok_or_else(|| EngineError::ImpliedTableNotDefined(fk.table.clone()))?;
                return Ok((a.name.clone(), fk.column, key.to_string()));
            }
            Some(a) if a.name.eq_ignore_ascii_case(&fk.table) => {
                return Ok((a.name.clone(), fk.column, key.to_string()));
            }
            Some(_) => {}
        }
    }

    if let Some(a) = base {
        if a.column_def(key).is_none() {
            return Err(EngineError::UndefinedForeignKey(format!(
                "{}.{key} does not reference {}",
                b.name, a.name
            )));
        }
    }
    let pointing: Vec<_> = b
        .columns
        .iter()
        .filter_map(|c| c.references.as_ref().map(|fk| (c, fk)))
        .filter(|(_, fk)| fk.column.eq_ignore_ascii_case(key))
        .filter(|(_, fk)| base.map_or(true, |a| a.name.eq_ignore_ascii_case(&fk.table)))
        .collect();
    match pointing.as_slice() {
        [] => Err(EngineError::UndefinedForeignKey(format!("{}.{key}", b.name))),
        [(column, fk)] => {
            let a_table = match base {
                Some(a) => a.name.clone(),
                None => schemas
                    .lookup(&fk.table)
                    .map(|a| a.name.clone())
                    .ok_or_else(|| EngineError::ImpliedTableNotDefined(fk.table.clone()))?,
            };
            Ok((a_table, key.to_string(), column.name.clone()))
        }
        _ => Err(EngineError::AmbiguousColumn(format!(
            "{} has several columns referencing {key}",
            b.name
        ))),
    }
}

/// The column of `b` that the next table of a chained incoming path points at.
fn nested_key(
    b: &TableDef,
    next: Option<&Token>,
    schemas: &dyn SchemaLookup,
) -> Result<String, EngineError> {
    let Some(Token::Name(next)) = next else {
        return Err(EngineError::Invalid(format!(
            "malformed reference after {}",
            b.name
        )));
    };
    let c = schemas
        .lookup(next.trim())
        .ok_or_else(|| EngineError::ImpliedTableNotDefined(next.trim().to_string()))?;
    c.columns
        .iter()
        .filter_map(|col| col.references.as_ref())
        .find(|fk| fk.table.eq_ignore_ascii_case(&b.name))
        .map(|fk| fk.column.clone())
        .or_else(|| b.primary_key.clone())
        .ok_or_else(|| EngineError::UndefinedForeignKey(format!("{}<-{}", b.name, c.name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDef, SqlType};

    fn schemas() -> HashMap<String, TableDef> {
        let t1 = TableDef::new("table1")
            .column(ColumnDef::new("id", SqlType::Int))
            .column(ColumnDef::new("age", SqlType::Int))
            .primary_key("id");
        let t2 = TableDef::new("table2")
            .column(ColumnDef::new("id", SqlType::Int))
            .column(ColumnDef::new("parent", SqlType::Int).references("table1", "id"))
            .column(ColumnDef::new("age", SqlType::Int))
            .primary_key("id");
        [("table1".to_string(), t1), ("table2".to_string(), t2)]
            .into_iter()
            .collect()
    }

    #[test]
    fn direction_detection() {
        assert!(is_reference("parent->id"));
        assert!(is_reference("parent~>id"));
        assert!(!is_reference("age"));
        assert!(is_outgoing("parent->id"));
        assert!(is_incoming("parent<-table2->age"));
        assert!(is_incoming("parent<~table2->age"));
        assert!(!is_incoming("a->b<-c->d"));
    }

    #[test]
    fn reverse_flips_tokens() {
        assert_eq!(reverse("parent->id"), "id<-parent");
        assert_eq!(reverse("x<-t->y"), "y<-t->x");
        assert_eq!(reverse(&reverse("a->b->c")), "a->b->c");
    }

    #[test]
    fn outgoing_and_incoming_swap_sides() {
        let s = schemas();
        let out = resolve(s.lookup("table2"), "parent->age", &s).expect("outgoing");
        let inc = resolve(s.lookup("table1"), "parent<-table2->age", &s).expect("incoming");

        assert_eq!(out.a.table, inc.b.table);
        assert_eq!(out.b.table, inc.a.table);
        let (at, ak, bt, bk) = out.predicate();
        let (it, ik, jt, jk) = inc.predicate();
        assert_eq!((at, ak, bt, bk), (jt, jk, it, ik));
    }

    #[test]
    fn incoming_derives_base_from_foreign_key() {
        let s = schemas();
        let spec = resolve(None, "parent<-table2->id", &s).expect("derived base");
        assert_eq!(spec.a.table, "table1");
        assert_eq!(spec.a.acting_key, "id");
        assert_eq!(spec.b.select, "id");
    }

    #[test]
    fn incoming_from_the_referenced_key() {
        let s = schemas();
        let spec = resolve(s.lookup("table1"), "id<-table2->age", &s).expect("incoming");
        assert_eq!((spec.a.table.as_str(), spec.a.acting_key.as_str()), ("table1", "id"));
        assert_eq!((spec.b.table.as_str(), spec.b.acting_key.as_str()), ("table2", "parent"));
        assert_eq!(spec.b.select, "age");

        let derived = resolve(None, "id<-table2->age", &s).expect("derived base");
        assert_eq!(derived.a.table, "table1");
        assert_eq!(derived.b.acting_key, "parent");
    }

    #[test]
    fn chained_incoming_steps() {
        let mut s = schemas();
        let t3 = TableDef::new("table3")
            .column(ColumnDef::new("id", SqlType::Int))
            .column(ColumnDef::new("owner", SqlType::Int).references("table2", "id"))
            .column(ColumnDef::new("note", SqlType::Text))
            .primary_key("id");
        s.insert("table3".to_string(), t3);

        let spec = resolve(s.lookup("table1"), "id<-table2<-table3->note", &s).expect("chain");
        assert_eq!(spec.b.table, "table2");
        assert_eq!(spec.b.acting_key, "parent");
        assert_eq!(spec.b.select, "id<-table3->note");

        let inner = resolve(s.lookup("table2"), &spec.b.select, &s).expect("inner step");
        assert_eq!((inner.a.table.as_str(), inner.a.acting_key.as_str()), ("table2", "id"));
        assert_eq!((inner.b.table.as_str(), inner.b.acting_key.as_str()), ("table3", "owner"));
        assert_eq!(inner.b.select, "note");
    }

    #[test]
    fn nested_select_is_kept_as_path() {
        let s = schemas();
        let spec = resolve(s.lookup("table2"), "parent->id->x", &s).expect("nested");
        assert_eq!(spec.b.select, "id->x");
    }

    #[test]
    fn resolution_failures() {
        let s = schemas();
        assert!(matches!(
            resolve(s.lookup("table1"), "age->id", &s),
            Err(EngineError::UndefinedForeignKey(_))
        ));
        assert!(matches!(
            resolve(s.lookup("table1"), "id<-nope->id", &s),
            Err(EngineError::ImpliedTableNotDefined(_))
        ));
    }

    #[test]
    fn qualifier_split() {
        assert_eq!(split_qualifier("t2.parent->id"), (Some("t2"), "parent->id"));
        assert_eq!(split_qualifier("parent->a.b"), (None, "parent->a.b"));
    }
}
