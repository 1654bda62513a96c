//! SQL front end: a lexical rewrite pre-pass, `sqlparser` parsing and binding
//! of the parsed AST into executable statement plans.

use crate::aggregate::{AggregateCall, AggregateFunc};
use crate::catalog::Tables;
use crate::composition::Composition;
use crate::error::EngineError;
use crate::expr::{BinaryOp, ColumnBinding, ColumnRef, EvalContext, Expr, ExprFlags, UnaryOp};
use crate::functions::ScalarFunction;
use crate::group_by::{table_cell, GroupTerm};
use crate::join::{BoundTable, Clause, JoinClause, JoinCondition, JoinKind, TableSource, UsingPair};
use crate::model::{Cell, ColumnDef, SqlType, TableDef};
use crate::order_by::OrderTerm;
use crate::reference;
use crate::statement::delete::DeletePlan;
use crate::statement::insert::{InsertPlan, InsertSource, OnDuplicate, SetColumn};
use crate::statement::select::{FieldPlan, SelectPlan};
use crate::statement::update::{Assignment, UpdatePlan};
use crate::statement::Statement;
use regex::Regex;
use sqlparser::ast::{self, Ident, ObjectName, ObjectNamePart, SetExpr, TableFactor};
use sqlparser::dialect::{GenericDialect, MySqlDialect};
use sqlparser::parser::Parser;
use std::sync::{Arc, OnceLock};
use tracing::debug;

// ---------------------------------------------------------------------------
// Rewrite pre-pass
// ---------------------------------------------------------------------------

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Index just past the quoted section opening at `start`.
fn quoted_end(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && quote != '`' {
            i += 2;
            continue;
        }
        if c == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// An arrow (`->`, `<-`, `~>`, `<~`) at `i` directly followed by a name.
fn arrow_at(chars: &[char], i: usize) -> bool {
    let arrow = matches!(
        (chars.get(i), chars.get(i + 1)),
        (Some('-'), Some('>')) | (Some('<'), Some('-')) | (Some('~'), Some('>')) | (Some('<'), Some('~'))
    );
    arrow && chars.get(i + 2).is_some_and(|&c| is_ident_start(c))
}

/// A name with optional `.` segments, starting at `i`.
fn scan_name(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() {
        if is_ident_char(chars[i]) {
            i += 1;
        } else if chars[i] == '.' && chars.get(i + 1).is_some_and(|&c| is_ident_start(c)) {
            i += 1;
        } else {
            break;
        }
    }
    i
}

/// Quotes arrow references as identifiers and numbers bare `?` placeholders.
/// String literals and comments are copied untouched.
fn quote_references(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len() + 16);
    let mut params = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let end = match c {
            '\'' | '"' | '`' => quoted_end(&chars, i),
            '-' if next == Some('-') => line_end(&chars, i),
            '#' => line_end(&chars, i),
            '/' if next == Some('*') => block_end(&chars, i),
            '?' => {
                out.push('?');
                if !next.is_some_and(|n| n.is_ascii_digit()) {
                    params += 1;
                    out.push_str(&params.to_string());
                }
                i += 1;
                continue;
            }
            c if c.is_ascii_digit() => {
                let mut j = i;
                while j < chars.len() && (is_ident_char(chars[j]) || chars[j] == '.') {
                    j += 1;
                }
                j
            }
            c if is_ident_start(c) => {
                let mut j = scan_name(&chars, i);
                let mut arrows = 0;
                while arrow_at(&chars, j) {
                    j = scan_name(&chars, j + 2);
                    arrows += 1;
                }
                if arrows > 0 {
                    out.push('`');
                    out.extend(&chars[i..j]);
                    out.push('`');
                    i = j;
                    continue;
                }
                j
            }
            _ => i + 1,
        };
        out.extend(&chars[i..end]);
        i = end;
    }
    out
}

fn line_end(chars: &[char], start: usize) -> usize {
    chars[start..]
        .iter()
        .position(|&c| c == '\n')
        .map(|p| start + p)
        .unwrap_or(chars.len())
}

fn block_end(chars: &[char], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return i + 2;
        }
        i += 1;
    }
    chars.len()
}

/// Splits on commas outside parentheses and quotes.
fn split_top_level(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\'' | '"' | '`' => {
                i = quoted_end(&chars, i);
                continue;
            }
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(chars[start..i].iter().collect::<String>().trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(chars[start..].iter().collect::<String>().trim().to_string());
    parts
}

/// `UPDATE a, b SET ...` becomes `UPDATE a CROSS JOIN b SET ...`.
fn join_update_targets(sql: &str) -> String {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = RE.get_or_init(|| Regex::new(r"(?is)^\s*UPDATE\s+(.*?)\s+SET\s").ok()) else {
        return sql.to_string();
    };
    let Some(list) = re.captures(sql).and_then(|c| c.get(1)) else {
        return sql.to_string();
    };
    let targets = split_top_level(list.as_str());
    if targets.len() < 2 {
        return sql.to_string();
    }
    format!(
        "{}{}{}",
        &sql[..list.start()],
        targets.join(" CROSS JOIN "),
        &sql[list.end()..]
    )
}

pub fn rewrite(sql: &str) -> String {
    join_update_targets(&quote_references(sql))
}

/// Parses after the rewrite pre-pass. The generic dialect is tried first; the
/// MySQL dialect covers the statements only it accepts (`DELETE t1 FROM ...`).
pub fn parse(sql: &str) -> Result<Vec<ast::Statement>, EngineError> {
    let text = rewrite(sql);
    debug!(sql = %text, "parsing");
    match Parser::parse_sql(&GenericDialect {}, &text) {
        Ok(statements) => Ok(statements),
        Err(generic) => Parser::parse_sql(&MySqlDialect {}, &text)
            .map_err(|_| EngineError::Parse(generic.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

fn get_ident_name(part: &ObjectNamePart) -> String {
    match part {
        ObjectNamePart::Identifier(i) => i.value.clone(),
        _ => "".to_string(),
    }
}

fn object_name_to_parts(name: &ObjectName) -> Result<(Option<String>, String), EngineError> {
    match name.0.len() {
        1 => Ok((None, get_ident_name(&name.0[0]))),
        2 => Ok((Some(get_ident_name(&name.0[0])), get_ident_name(&name.0[1]))),
        _ => Err(EngineError::NotSupported(
            "object name with more than 2 parts is not supported".into(),
        )),
    }
}

fn parse_sql_number_literal(n: &str) -> Result<Cell, EngineError> {
    let is_float = n.contains('.') || n.contains('e') || n.contains('E');
    if is_float {
        let v = n
            .parse::<f64>()
            .map_err(|_| EngineError::Invalid(format!("Invalid number literal: {n}")))?;
        Ok(Cell::Float(v))
    } else {
        let v = n
            .parse::<i64>()
            .map_err(|_| EngineError::Invalid(format!("Invalid integer literal: {n}")))?;
        Ok(Cell::Int(v))
    }
}

fn like_escape_char(escape_char: Option<&ast::Value>) -> Result<char, EngineError> {
    let Some(v) = escape_char else {
        return Ok('\\');
    };

    let s = match v {
        ast::Value::SingleQuotedString(s) => s.as_str(),
        ast::Value::DoubleQuotedString(s) => s.as_str(),
        _ => {
            return Err(EngineError::NotSupported(
                "ESCAPE value must be a quoted string".into(),
            ))
        }
    };

    let mut chars = s.chars();
    let Some(ch) = chars.next() else {
        return Err(EngineError::Invalid("ESCAPE string cannot be empty".into()));
    };
    if chars.next().is_some() {
        return Err(EngineError::Invalid(
            "ESCAPE string must be a single character".into(),
        ));
    }
    Ok(ch)
}

fn literal(value: &ast::Value) -> Result<Expr, EngineError> {
    let cell = match value {
        ast::Value::Number(n, _) => parse_sql_number_literal(n)?,
        ast::Value::SingleQuotedString(s) | ast::Value::DoubleQuotedString(s) => {
            Cell::Text(s.clone())
        }
        ast::Value::Boolean(b) => Cell::from(*b),
        ast::Value::Null => Cell::Null,
        ast::Value::Placeholder(p) => {
            let n = p
                .get(1..)
                .and_then(|digits| digits.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| EngineError::NotSupported(format!("placeholder {p}")))?;
            return Ok(Expr::Param(n - 1));
        }
        other => {
            return Err(EngineError::NotSupported(format!(
                "Value type not supported: {other}"
            )))
        }
    };
    Ok(Expr::Literal(cell))
}

/// Text of an AST node with the quoting added by the pre-pass removed.
fn display(node: &impl std::fmt::Display) -> String {
    node.to_string().replace('`', "")
}

/// Output name of an unaliased select item.
fn field_name(expr: &ast::Expr) -> String {
    match expr {
        ast::Expr::Identifier(ident) => ident.value.clone(),
        ast::Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|p| p.value.clone())
            .unwrap_or_default(),
        other => display(other),
    }
}

/// Unqualified name of a GROUPING argument.
fn grouping_name(expr: &ast::Expr) -> String {
    match expr {
        ast::Expr::Nested(inner) => grouping_name(inner),
        other => field_name(other),
    }
}

fn eval_nonneg_usize(expr: &Expr, what: &str) -> Result<usize, EngineError> {
    let empty = Composition::new(0);
    let v = expr
        .eval(&EvalContext::new(&empty, &[]))?
        .as_i64()
        .ok_or_else(|| EngineError::Invalid(format!("{what} must be an integer")))?;
    if v < 0 {
        return Err(EngineError::Invalid(format!("{what} cannot be negative")));
    }
    usize::try_from(v).map_err(|_| EngineError::Invalid(format!("{what} is too large")))
}

fn binary_op(op: &ast::BinaryOperator) -> Result<BinaryOp, EngineError> {
    use ast::BinaryOperator as B;
    let op = match op {
        B::And => BinaryOp::And,
        B::Or => BinaryOp::Or,
        B::Xor => BinaryOp::Xor,
        B::Eq => BinaryOp::Eq,
        B::Spaceship => BinaryOp::NullSafeEq,
        B::NotEq => BinaryOp::NotEq,
        B::Lt => BinaryOp::Lt,
        B::LtEq => BinaryOp::LtEq,
        B::Gt => BinaryOp::Gt,
        B::GtEq => BinaryOp::GtEq,
        B::Plus => BinaryOp::Plus,
        B::Minus => BinaryOp::Minus,
        B::Multiply => BinaryOp::Multiply,
        B::Divide => BinaryOp::Divide,
        B::MyIntegerDivide => BinaryOp::IntDiv,
        B::Modulo => BinaryOp::Modulo,
        other => {
            return Err(EngineError::NotSupported(format!(
                "Operator not supported: {other}"
            )))
        }
    };
    Ok(op)
}

fn named_window(
    windows: &[ast::NamedWindowDefinition],
    name: &str,
    depth: usize,
) -> Result<ast::WindowSpec, EngineError> {
    if depth > 16 {
        return Err(EngineError::Invalid(format!(
            "Window '{name}' has a circular dependency"
        )));
    }
    let def = windows
        .iter()
        .find(|w| w.0.value.eq_ignore_ascii_case(name))
        .ok_or_else(|| EngineError::Invalid(format!("Window name '{name}' is not defined")))?;
    match &def.1 {
        ast::NamedWindowExpr::NamedWindow(other) => named_window(windows, &other.value, depth + 1),
        ast::NamedWindowExpr::WindowSpec(spec) => inherit(windows, spec.clone(), depth + 1),
    }
}

/// Fills the partition and order of a window that names a base window from
/// that base; attributes given locally win.
fn inherit(
    windows: &[ast::NamedWindowDefinition],
    mut spec: ast::WindowSpec,
    depth: usize,
) -> Result<ast::WindowSpec, EngineError> {
    if let Some(base) = spec.window_name.take() {
        let inherited = named_window(windows, &base.value, depth)?;
        if spec.partition_by.is_empty() {
            spec.partition_by = inherited.partition_by;
        }
        if spec.order_by.is_empty() {
            spec.order_by = inherited.order_by;
        }
    }
    Ok(spec)
}

struct Slot {
    alias: String,
    def: TableDef,
    source: TableSource,
    join: Option<JoinClause>,
}

/// A LEFT JOIN synthesized from arrow references sharing one traversal.
struct PendingRef {
    identity: String,
    base: usize,
    base_key: usize,
    table: String,
    key: String,
    /// `key` first, then every selected column once.
    columns: Vec<String>,
}

#[derive(Default)]
struct Scope {
    slots: Vec<Slot>,
    refs: Vec<PendingRef>,
    /// Columns merged by USING / NATURAL; unqualified uses are not ambiguous.
    using: Vec<String>,
    fields: Vec<FieldPlan>,
    /// Select aliases resolve before columns (GROUP BY, HAVING, ORDER BY).
    allow_fields: bool,
    allow_refs: bool,
    windows: Vec<ast::NamedWindowDefinition>,
    /// Set while binding ON DUPLICATE KEY UPDATE: the schema `VALUES(col)` reads.
    incoming: Option<TableDef>,
}

impl Scope {
    fn new() -> Self {
        Self {
            allow_refs: true,
            ..Self::default()
        }
    }

    fn push(&mut self, slot: Slot) -> Result<(), EngineError> {
        if self.slot_of(&slot.alias).is_some() {
            return Err(EngineError::Invalid(format!(
                "Not unique table/alias: '{}'",
                slot.alias
            )));
        }
        self.slots.push(slot);
        Ok(())
    }

    fn slot_of(&self, alias: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.alias.eq_ignore_ascii_case(alias))
    }

    fn field(&self, name: &str) -> Option<&FieldPlan> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

pub struct Binder<'c> {
    tables: &'c Tables,
}

/// Lowers one parsed statement into an executable plan. All schema lookups
/// happen here, before any row is read.
pub fn bind(stmt: &ast::Statement, tables: &Tables) -> Result<Statement, EngineError> {
    let mut binder = Binder { tables };
    let plan = match stmt {
        ast::Statement::Query(q) => Statement::Select(binder.query(q)?),
        ast::Statement::Insert(insert) => Statement::Insert(binder.insert(insert)?),
        ast::Statement::Update(update) => Statement::Update(binder.update(update)?),
        ast::Statement::Delete(delete) => Statement::Delete(binder.delete(delete)?),
        other => {
            return Err(EngineError::NotSupported(format!(
                "Statement not supported: {}",
                display(other)
            )))
        }
    };
    debug!(kind = plan.kind(), "bound");
    Ok(plan)
}

impl Binder<'_> {
    // -- tables -------------------------------------------------------------

    fn factor(&mut self, factor: &TableFactor) -> Result<Slot, EngineError> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let (_db, table) = object_name_to_parts(name)?;
                let store = self.tables.get(&table)?;
                let def = store.schema().clone();
                let alias = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| def.name.clone());
                Ok(Slot {
                    alias,
                    def,
                    source: TableSource::Store(store),
                    join: None,
                })
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                let alias = alias.as_ref().map(|a| a.name.value.clone()).ok_or_else(|| {
                    EngineError::Invalid("Every derived table must have its own alias".into())
                })?;
                let plan = self.query(subquery)?;
                let def = plan.fields.iter().fold(TableDef::new(&alias), |def, f| {
                    def.column(ColumnDef::new(f.name.clone(), SqlType::Text))
                });
                Ok(Slot {
                    alias,
                    def,
                    source: TableSource::Derived(Box::new(plan)),
                    join: None,
                })
            }
            other => Err(EngineError::NotSupported(format!(
                "Table factor not supported: {}",
                display(other)
            ))),
        }
    }

    fn from(&mut self, scope: &mut Scope, from: &[ast::TableWithJoins]) -> Result<(), EngineError> {
        for item in from {
            let mut slot = self.factor(&item.relation)?;
            if !scope.slots.is_empty() {
                slot.join = Some(JoinClause::cross());
            }
            scope.push(slot)?;
            for join in &item.joins {
                self.join(scope, join)?;
            }
        }
        Ok(())
    }

    fn join(&mut self, scope: &mut Scope, join: &ast::Join) -> Result<(), EngineError> {
        use ast::JoinOperator as J;
        let (kind, constraint) = match &join.join_operator {
            J::Join(c) | J::Inner(c) | J::CrossJoin(c) | J::StraightJoin(c) => (JoinKind::Inner, c),
            J::Left(c) | J::LeftOuter(c) => (JoinKind::Left, c),
            J::Right(c) | J::RightOuter(c) => (JoinKind::Right, c),
            J::FullOuter(c) => (JoinKind::Full, c),
            other => {
                return Err(EngineError::NotSupported(format!(
                    "Join operator not supported: {other:?}"
                )))
            }
        };
        let slot = self.factor(&join.relation)?;
        scope.push(slot)?;
        let index = scope.slots.len() - 1;

        let condition = match constraint {
            ast::JoinConstraint::On(e) => {
                scope.allow_refs = false;
                let bound = self.expr(scope, e);
                scope.allow_refs = true;
                let bound = bound?;
                let text = format!("ON {}", bound.stringify(&[]));
                JoinCondition::On(Clause::new(bound, text))
            }
            ast::JoinConstraint::Using(names) => {
                let columns = names
                    .iter()
                    .map(|n| n.0.last().map(get_ident_name).unwrap_or_default())
                    .collect::<Vec<_>>();
                JoinCondition::Using(self.using_pairs(scope, index, &columns, true)?)
            }
            ast::JoinConstraint::Natural => {
                let columns: Vec<String> = scope.slots[index]
                    .def
                    .columns
                    .iter()
                    .map(|c| c.name.clone())
                    .collect();
                JoinCondition::Using(self.using_pairs(scope, index, &columns, false)?)
            }
            ast::JoinConstraint::None => JoinCondition::None,
        };
        scope.slots[index].join = Some(JoinClause { kind, condition });
        Ok(())
    }

    /// Pairs each column of the joined table with the earliest earlier table
    /// having it. With `strict`, a column missing on either side fails.
    fn using_pairs(
        &self,
        scope: &mut Scope,
        index: usize,
        columns: &[String],
        strict: bool,
    ) -> Result<Vec<UsingPair>, EngineError> {
        let mut pairs = Vec::new();
        for name in columns {
            let right = scope.slots[index].def.column_index(name);
            let left = scope.slots[..index]
                .iter()
                .enumerate()
                .find_map(|(slot, s)| s.def.column_index(name).map(|c| (slot, c)));
            match (right, left) {
                (Some(right), Some((slot, left))) => {
                    pairs.push(UsingPair { slot, left, right });
                    scope.using.push(name.to_ascii_lowercase());
                }
                _ if strict => {
                    return Err(EngineError::UnknownColumn(format!(
                        "{name} in from clause"
                    )))
                }
                _ => {}
            }
        }
        Ok(pairs)
    }

    /// FROM tables followed by the synthesized reference joins.
    fn finish(&mut self, scope: Scope) -> Result<Vec<BoundTable>, EngineError> {
        let Scope { slots, refs, .. } = scope;
        let first_ref = slots.len();
        let mut tables: Vec<BoundTable> = slots
            .into_iter()
            .map(|s| BoundTable {
                alias: s.alias,
                def: s.def,
                source: s.source,
                join: s.join,
            })
            .collect();

        for (i, pending) in refs.into_iter().enumerate() {
            let slot = first_ref + i;
            let (plan, def) = self.reference_plan(&pending)?;
            let base = &tables[pending.base];
            let left = Expr::column(
                format!("{}.{}", base.alias, base.def.columns[pending.base_key].name),
                pending.base,
                pending.base_key,
            );
            let right = Expr::column(format!("{}.{}", def.name, pending.key), slot, 0);
            let on = Expr::binary(left, BinaryOp::Eq, right);
            let text = format!("ON {}", on.stringify(&[]));
            debug!(join = %pending.identity, columns = ?pending.columns, "reference join synthesized");
            tables.push(BoundTable {
                alias: pending.identity,
                def,
                source: TableSource::Derived(Box::new(plan)),
                join: Some(JoinClause {
                    kind: JoinKind::Left,
                    condition: JoinCondition::On(Clause::new(on, text)),
                }),
            });
        }
        Ok(tables)
    }

    /// `SELECT key, columns... FROM table`, itself bound so nested paths in
    /// the selected columns synthesize their own joins.
    fn reference_plan(&mut self, pending: &PendingRef) -> Result<(SelectPlan, TableDef), EngineError> {
        let store = self.tables.get(&pending.table)?;
        let target = store.schema().clone();
        let mut scope = Scope::new();
        scope.push(Slot {
            alias: target.name.clone(),
            def: target.clone(),
            source: TableSource::Store(store),
            join: None,
        })?;

        let mut def = TableDef::new(&pending.identity);
        let mut fields = Vec::with_capacity(pending.columns.len());
        for name in &pending.columns {
            let expr = self.column(&mut scope, None, name, name)?;
            let ty = target.column_def(name).map(|c| c.ty).unwrap_or(SqlType::Text);
            def = def.column(ColumnDef::new(name.clone(), ty));
            fields.push(FieldPlan {
                name: name.clone(),
                expr,
            });
        }
        let tables = self.finish(scope)?;
        Ok((SelectPlan::projection(tables, fields), def))
    }

    // -- columns ------------------------------------------------------------

    fn column(
        &mut self,
        scope: &mut Scope,
        qualifier: Option<&str>,
        name: &str,
        written: &str,
    ) -> Result<Expr, EngineError> {
        if reference::is_reference(name) {
            return self.reference(scope, qualifier, name, written);
        }
        if qualifier.is_none() && scope.allow_fields {
            if let Some(field) = scope.field(name) {
                return Ok(Expr::field(field.name.clone()));
            }
        }

        if let Some(q) = qualifier {
            let slot = scope
                .slot_of(q)
                .ok_or_else(|| EngineError::UnknownTable(q.to_string()))?;
            let column = scope.slots[slot]
                .def
                .column_index(name)
                .ok_or_else(|| EngineError::UnknownColumn(format!("{q}.{name}")))?;
            return Ok(Expr::column(written, slot, column));
        }

        let hits: Vec<(usize, usize)> = scope
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| s.def.column_index(name).map(|c| (slot, c)))
            .collect();
        let merged = scope.using.iter().any(|u| u.eq_ignore_ascii_case(name));
        match hits.as_slice() {
            [(slot, column)] => Ok(Expr::column(written, *slot, *column)),
            [(slot, column), ..] if merged => Ok(Expr::column(written, *slot, *column)),
            [] => Err(EngineError::UnknownColumn(name.to_string())),
            _ => Err(EngineError::AmbiguousColumn(name.to_string())),
        }
    }

    fn reference(
        &mut self,
        scope: &mut Scope,
        qualifier: Option<&str>,
        path: &str,
        written: &str,
    ) -> Result<Expr, EngineError> {
        if !scope.allow_refs {
            return Err(EngineError::NotSupported(format!(
                "arrow reference {written} is not allowed in a join condition"
            )));
        }
        let base = match qualifier {
            Some(q) => scope
                .slot_of(q)
                .ok_or_else(|| EngineError::UnknownTable(q.to_string()))?,
            None => self.reference_base(scope, path)?,
        };
        let spec = reference::resolve(Some(&scope.slots[base].def), path, self.tables)?;
        let identity = spec.identity(&scope.slots[base].alias);

        let index = match scope.refs.iter().position(|r| r.identity == identity) {
            Some(index) => index,
            None => {
                let base_key = scope.slots[base]
                    .def
                    .column_index(&spec.a.acting_key)
                    .ok_or_else(|| {
                        EngineError::UnknownColumn(format!(
                            "{}.{}",
                            scope.slots[base].alias, spec.a.acting_key
                        ))
                    })?;
                scope.refs.push(PendingRef {
                    identity,
                    base,
                    base_key,
                    table: spec.b.table.clone(),
                    key: spec.b.acting_key.clone(),
                    columns: vec![spec.b.acting_key.clone()],
                });
                scope.refs.len() - 1
            }
        };

        let pending = &mut scope.refs[index];
        let column = match pending
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(&spec.b.select))
        {
            Some(column) => column,
            None => {
                pending.columns.push(spec.b.select.clone());
                pending.columns.len() - 1
            }
        };
        Ok(Expr::column(written, scope.slots.len() + index, column))
    }

    /// The one FROM table an unqualified reference can start from.
    fn reference_base(&self, scope: &Scope, path: &str) -> Result<usize, EngineError> {
        let mut first_error = None;
        let mut candidates = Vec::new();
        for (slot, s) in scope.slots.iter().enumerate() {
            match reference::resolve(Some(&s.def), path, self.tables) {
                Ok(_) => candidates.push(slot),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match candidates.as_slice() {
            [slot] => Ok(*slot),
            [] if scope.slots.len() == 1 => Err(first_error
                .unwrap_or_else(|| EngineError::UndefinedForeignKey(path.to_string()))),
            [] => Err(EngineError::UndefinedForeignKey(path.to_string())),
            _ => Err(EngineError::AmbiguousColumn(path.to_string())),
        }
    }

    fn identifier(&mut self, scope: &mut Scope, ident: &Ident) -> Result<Expr, EngineError> {
        let written = ident.value.as_str();
        let result = if reference::is_reference(written) {
            let (qualifier, path) = reference::split_qualifier(written);
            self.column(scope, qualifier, path, written)
        } else {
            self.column(scope, None, written, written)
        };
        match result {
            // "text" is a string in MySQL but an identifier in the generic dialect.
            Err(EngineError::UnknownColumn(_)) if ident.quote_style == Some('"') => {
                Ok(Expr::Literal(Cell::Text(ident.value.clone())))
            }
            other => other,
        }
    }

    fn compound(&mut self, scope: &mut Scope, parts: &[Ident]) -> Result<Expr, EngineError> {
        let written = parts
            .iter()
            .map(|p| p.value.as_str())
            .collect::<Vec<_>>()
            .join(".");
        match parts {
            [qualifier, name] => self.column(scope, Some(&qualifier.value), &name.value, &written),
            [_db, qualifier, name] => {
                self.column(scope, Some(&qualifier.value), &name.value, &written)
            }
            _ => Err(EngineError::NotSupported(format!(
                "identifier not supported: {written}"
            ))),
        }
    }

    // -- expressions --------------------------------------------------------

    fn expr(&mut self, scope: &mut Scope, e: &ast::Expr) -> Result<Expr, EngineError> {
        match e {
            ast::Expr::Identifier(ident) => self.identifier(scope, ident),
            ast::Expr::CompoundIdentifier(parts) => self.compound(scope, parts),
            ast::Expr::Value(v) => literal(&v.value),
            ast::Expr::Nested(inner) => self.expr(scope, inner),
            ast::Expr::UnaryOp { op, expr } => {
                let op = match op {
                    ast::UnaryOperator::Not => UnaryOp::Not,
                    ast::UnaryOperator::Minus => UnaryOp::Minus,
                    ast::UnaryOperator::Plus => UnaryOp::Plus,
                    other => {
                        return Err(EngineError::NotSupported(format!(
                            "Unary operator not supported: {other}"
                        )))
                    }
                };
                Ok(Expr::Unary {
                    op,
                    expr: Box::new(self.expr(scope, expr)?),
                })
            }
            ast::Expr::BinaryOp { left, op, right } => {
                let op = binary_op(op)?;
                let left = self.expr(scope, left)?;
                let right = self.expr(scope, right)?;
                Ok(Expr::binary(left, op, right))
            }
            ast::Expr::IsNull(inner) | ast::Expr::IsNotNull(inner) => Ok(Expr::IsNull {
                expr: Box::new(self.expr(scope, inner)?),
                negated: matches!(e, ast::Expr::IsNotNull(_)),
            }),
            ast::Expr::InList {
                expr,
                list,
                negated,
            } => {
                if list.is_empty() {
                    return Err(EngineError::Invalid("IN (...) list cannot be empty".into()));
                }
                Ok(Expr::InList {
                    expr: Box::new(self.expr(scope, expr)?),
                    list: list
                        .iter()
                        .map(|item| self.expr(scope, item))
                        .collect::<Result<_, _>>()?,
                    negated: *negated,
                })
            }
            ast::Expr::Between {
                expr,
                negated,
                low,
                high,
            } => Ok(Expr::Between {
                expr: Box::new(self.expr(scope, expr)?),
                low: Box::new(self.expr(scope, low)?),
                high: Box::new(self.expr(scope, high)?),
                negated: *negated,
            }),
            ast::Expr::Like {
                negated,
                any,
                expr,
                pattern,
                escape_char,
            }
            | ast::Expr::ILike {
                negated,
                any,
                expr,
                pattern,
                escape_char,
            } => {
                if *any {
                    return Err(EngineError::NotSupported(
                        "LIKE ANY(...) is not supported".into(),
                    ));
                }
                Ok(Expr::Like {
                    expr: Box::new(self.expr(scope, expr)?),
                    pattern: Box::new(self.expr(scope, pattern)?),
                    escape: like_escape_char(escape_char.as_ref())?,
                    negated: *negated,
                    case_insensitive: matches!(e, ast::Expr::ILike { .. }),
                })
            }
            ast::Expr::Case {
                operand,
                conditions,
                else_result,
                ..
            } => {
                let operand = match operand {
                    Some(o) => Some(Box::new(self.expr(scope, o)?)),
                    None => None,
                };
                let mut branches = Vec::with_capacity(conditions.len());
                for when in conditions {
                    let condition = self.expr(scope, &when.condition)?;
                    let result = self.expr(scope, &when.result)?;
                    branches.push((condition, result));
                }
                let otherwise = match else_result {
                    Some(e) => Some(Box::new(self.expr(scope, e)?)),
                    None => None,
                };
                Ok(Expr::Case {
                    operand,
                    branches,
                    otherwise,
                })
            }
            ast::Expr::Function(f) => self.function(scope, f),
            other => Err(EngineError::NotSupported(format!(
                "Expression not supported: {}",
                display(other)
            ))),
        }
    }

    fn function(&mut self, scope: &mut Scope, f: &ast::Function) -> Result<Expr, EngineError> {
        let name = f.name.to_string().replace('`', "");
        let list = match &f.args {
            ast::FunctionArguments::List(list) => Some(list),
            ast::FunctionArguments::None => None,
            ast::FunctionArguments::Subquery(_) => {
                return Err(EngineError::NotSupported(format!(
                    "subquery argument to {name}"
                )))
            }
        };

        let mut star = false;
        let mut args: Vec<&ast::Expr> = Vec::new();
        let mut order_by: &[ast::OrderByExpr] = &[];
        let mut separator = None;
        let distinct = list.is_some_and(|l| {
            matches!(l.duplicate_treatment, Some(ast::DuplicateTreatment::Distinct))
        });
        if let Some(list) = list {
            for arg in &list.args {
                match arg {
                    ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) => args.push(e),
                    ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard) => star = true,
                    other => {
                        return Err(EngineError::NotSupported(format!(
                            "argument {other} to {name}"
                        )))
                    }
                }
            }
            for clause in &list.clauses {
                match clause {
                    ast::FunctionArgumentClause::OrderBy(terms) => order_by = terms,
                    ast::FunctionArgumentClause::Separator(v) => separator = Some(v),
                    other => {
                        return Err(EngineError::NotSupported(format!(
                            "clause {other:?} in {name}"
                        )))
                    }
                }
            }
        }

        let upper = name.to_ascii_uppercase();
        if upper == "VALUES" {
            return self.values_call(scope, &args);
        }
        if upper == "GROUPING" {
            if args.is_empty() {
                return Err(EngineError::Invalid("GROUPING needs at least one argument".into()));
            }
            return Ok(Expr::Grouping(args.iter().map(|a| grouping_name(a)).collect()));
        }

        if let Some(func) = crate::window::WindowFunc::from_name(&name) {
            let over = f
                .over
                .as_ref()
                .ok_or_else(|| EngineError::Invalid(format!("{name} requires an OVER clause")))?;
            func.check_arity(args.len())?;
            let window = self.window(scope, over)?;
            let args = args
                .iter()
                .map(|a| self.expr(scope, a))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Expr::Window(Box::new(crate::window::WindowCall {
                func,
                args,
                window,
            })));
        }

        if let Some(func) = AggregateFunc::from_name(&name) {
            return self.aggregate(scope, f, func, star, distinct, &args, order_by, separator);
        }

        if f.over.is_some() {
            return Err(EngineError::Invalid(format!("{name} is not a window function")));
        }
        let func = ScalarFunction::from_name(&name)
            .ok_or_else(|| EngineError::NotSupported(format!("FUNCTION {name} does not exist")))?;
        if star {
            return Err(EngineError::Invalid(format!("{name}(*) is not valid")));
        }
        func.check_arity(args.len())?;
        let args = args
            .iter()
            .map(|a| self.expr(scope, a))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Expr::Function { func, args })
    }

    #[allow(clippy::too_many_arguments)]
    fn aggregate(
        &mut self,
        scope: &mut Scope,
        f: &ast::Function,
        func: AggregateFunc,
        star: bool,
        distinct: bool,
        args: &[&ast::Expr],
        order_by: &[ast::OrderByExpr],
        separator: Option<&ast::Value>,
    ) -> Result<Expr, EngineError> {
        let arity_ok = match func {
            AggregateFunc::Count => star || !args.is_empty(),
            AggregateFunc::GroupConcat => !args.is_empty(),
            AggregateFunc::GroupConcatWs => args.len() >= 2,
            _ => args.len() == 1,
        };
        if !arity_ok || (star && func != AggregateFunc::Count) {
            return Err(EngineError::Invalid(format!(
                "Incorrect parameter count in the call to native function '{}'",
                func.name()
            )));
        }

        let mut args = args;
        let mut sep = ",".to_string();
        if func == AggregateFunc::GroupConcatWs {
            match args.first() {
                Some(ast::Expr::Value(v)) => match &v.value {
                    ast::Value::SingleQuotedString(s) | ast::Value::DoubleQuotedString(s) => {
                        sep = s.clone()
                    }
                    _ => {
                        return Err(EngineError::Invalid(
                            "GROUP_CONCAT_WS separator must be a string".into(),
                        ))
                    }
                },
                _ => {
                    return Err(EngineError::Invalid(
                        "GROUP_CONCAT_WS separator must be a string".into(),
                    ))
                }
            }
            args = &args[1..];
        }
        if let Some(v) = separator {
            match v {
                ast::Value::SingleQuotedString(s) | ast::Value::DoubleQuotedString(s) => {
                    sep = s.clone()
                }
                other => {
                    return Err(EngineError::Invalid(format!("SEPARATOR {other} is not a string")))
                }
            }
        }

        let bound = args
            .iter()
            .map(|a| self.expr(scope, a))
            .collect::<Result<Vec<_>, _>>()?;
        if bound
            .iter()
            .any(|a| a.flags().intersects(ExprFlags::AGGREGATE | ExprFlags::WINDOW))
        {
            return Err(EngineError::Invalid("Invalid use of group function".into()));
        }

        let mut call = AggregateCall::new(func, bound);
        call.star = star;
        call.distinct = distinct;
        call.separator = sep;
        call.order_by = self.order_terms(scope, order_by, false)?;
        if let Some(over) = &f.over {
            call.over = Some(self.window(scope, over)?);
        }
        Ok(Expr::Aggregate(Box::new(call)))
    }

    fn values_call(&mut self, scope: &mut Scope, args: &[&ast::Expr]) -> Result<Expr, EngineError> {
        let Some(def) = scope.incoming.as_ref() else {
            return Err(EngineError::Invalid(
                "VALUES() is only valid in ON DUPLICATE KEY UPDATE".into(),
            ));
        };
        let name = match args {
            [ast::Expr::Identifier(i)] => i.value.clone(),
            [ast::Expr::CompoundIdentifier(parts)] => {
                parts.last().map(|p| p.value.clone()).unwrap_or_default()
            }
            _ => return Err(EngineError::Invalid("VALUES() takes one column".into())),
        };
        let column = def
            .column_index(&name)
            .ok_or_else(|| EngineError::UnknownColumn(name.clone()))?;
        Ok(Expr::Values { column, name })
    }

    fn window(
        &mut self,
        scope: &mut Scope,
        over: &ast::WindowType,
    ) -> Result<Arc<crate::window::WindowDef>, EngineError> {
        let spec = match over {
            ast::WindowType::WindowSpec(spec) => inherit(&scope.windows, spec.clone(), 0)?,
            ast::WindowType::NamedWindow(name) => named_window(&scope.windows, &name.value, 0)?,
        };
        let partition_by = spec
            .partition_by
            .iter()
            .map(|e| self.expr(scope, e))
            .collect::<Result<Vec<_>, _>>()?;
        let order_by = self.order_terms(scope, &spec.order_by, false)?;
        Ok(Arc::new(crate::window::WindowDef::new(
            partition_by,
            order_by,
            &[],
        )))
    }

    /// Binds a GROUP BY / ORDER BY item; integer literals are 1-based
    /// positions in the select list when `ordinals` is set.
    fn positional(
        &mut self,
        scope: &mut Scope,
        e: &ast::Expr,
        ordinals: bool,
    ) -> Result<Expr, EngineError> {
        if ordinals {
            if let ast::Expr::Value(v) = e {
                if let ast::Value::Number(n, _) = &v.value {
                    if let Ok(position) = n.parse::<usize>() {
                        return position
                            .checked_sub(1)
                            .and_then(|i| scope.fields.get(i))
                            .map(|f| Expr::field(f.name.clone()))
                            .ok_or_else(|| {
                                EngineError::UnknownColumn(format!("'{position}' in order clause"))
                            });
                    }
                }
            }
        }
        self.expr(scope, e)
    }

    fn order_terms(
        &mut self,
        scope: &mut Scope,
        terms: &[ast::OrderByExpr],
        ordinals: bool,
    ) -> Result<Vec<OrderTerm>, EngineError> {
        terms
            .iter()
            .map(|t| {
                Ok(OrderTerm {
                    expr: self.positional(scope, &t.expr, ordinals)?,
                    asc: t.options.asc.unwrap_or(true),
                })
            })
            .collect()
    }

    fn clause(
        &mut self,
        scope: &mut Scope,
        keyword: &str,
        e: &ast::Expr,
        forbidden: ExprFlags,
    ) -> Result<Clause, EngineError> {
        let expr = self.expr(scope, e)?;
        if expr.flags().intersects(forbidden) {
            return Err(EngineError::Invalid(format!(
                "Invalid use of group function in {keyword}"
            )));
        }
        let text = format!("{keyword} {}", expr.stringify(&[]));
        Ok(Clause::new(expr, text))
    }

    // -- SELECT -------------------------------------------------------------

    fn projection(
        &mut self,
        scope: &mut Scope,
        items: &[ast::SelectItem],
    ) -> Result<Vec<FieldPlan>, EngineError> {
        let mut fields = Vec::new();
        for item in items {
            match item {
                ast::SelectItem::Wildcard(_) => {
                    if scope.slots.is_empty() {
                        return Err(EngineError::Invalid("No tables used".into()));
                    }
                    for (slot, s) in scope.slots.iter().enumerate() {
                        for (column, c) in s.def.columns.iter().enumerate() {
                            fields.push(FieldPlan {
                                name: c.name.clone(),
                                expr: Expr::column(format!("{}.{}", s.alias, c.name), slot, column),
                            });
                        }
                    }
                }
                ast::SelectItem::QualifiedWildcard(kind, _) => {
                    let ast::SelectItemQualifiedWildcardKind::ObjectName(obj_name) = kind else {
                        return Err(EngineError::NotSupported(
                            "Wildcard on expression is not supported".into(),
                        ));
                    };
                    let (_db, qualifier) = object_name_to_parts(obj_name)?;
                    let slot = scope
                        .slot_of(&qualifier)
                        .ok_or_else(|| EngineError::UnknownTable(qualifier.clone()))?;
                    let s = &scope.slots[slot];
                    for (column, c) in s.def.columns.iter().enumerate() {
                        fields.push(FieldPlan {
                            name: c.name.clone(),
                            expr: Expr::column(format!("{}.{}", s.alias, c.name), slot, column),
                        });
                    }
                }
                ast::SelectItem::UnnamedExpr(e) => {
                    let expr = self.expr(scope, e)?;
                    fields.push(FieldPlan {
                        name: field_name(e),
                        expr,
                    });
                }
                ast::SelectItem::ExprWithAlias { expr, alias } => {
                    let bound = self.expr(scope, expr)?;
                    fields.push(FieldPlan {
                        name: alias.value.clone(),
                        expr: bound,
                    });
                }
            }
        }
        Ok(fields)
    }

    fn group_terms(
        &mut self,
        scope: &mut Scope,
        exprs: &[ast::Expr],
    ) -> Result<Vec<GroupTerm>, EngineError> {
        let mut terms = Vec::with_capacity(exprs.len());
        for e in exprs {
            let expr = self.positional(scope, e, true)?;
            let name = match &expr {
                Expr::Column(c) => match &c.binding {
                    ColumnBinding::Field(name) => {
                        let grouped_aggregate = scope.field(name).is_some_and(|f| {
                            f.expr
                                .flags()
                                .intersects(ExprFlags::AGGREGATE | ExprFlags::WINDOW)
                        });
                        if grouped_aggregate {
                            return Err(EngineError::Invalid(format!("Can't group on '{name}'")));
                        }
                        name.clone()
                    }
                    ColumnBinding::Table { .. } => {
                        let text = expr.stringify(&[]);
                        scope
                            .fields
                            .iter()
                            .find(|f| f.expr.stringify(&[]) == text)
                            .map(|f| f.name.clone())
                            .unwrap_or_else(|| c.unqualified().to_string())
                    }
                },
                other if other.flags().intersects(ExprFlags::AGGREGATE | ExprFlags::WINDOW) => {
                    return Err(EngineError::Invalid(format!(
                        "Can't group on '{}'",
                        other.stringify(&[])
                    )))
                }
                other => other.stringify(&[]),
            };
            let source = match &expr {
                Expr::Column(ColumnRef {
                    binding: ColumnBinding::Field(name),
                    ..
                }) => scope.field(name).and_then(|f| table_cell(&f.expr)),
                other => table_cell(other),
            };
            terms.push(GroupTerm { expr, name, source });
        }
        Ok(terms)
    }

    fn limits(&mut self, q: &ast::Query) -> Result<(usize, Option<usize>), EngineError> {
        let mut scope = Scope::new();
        let mut bound = |binder: &mut Self, e: &ast::Expr, what: &str| -> Result<usize, EngineError> {
            let expr = binder.expr(&mut scope, e)?;
            eval_nonneg_usize(&expr, what)
        };
        let mut offset = 0usize;
        let mut limit = None::<usize>;
        if let Some(limit_clause) = &q.limit_clause {
            match limit_clause {
                ast::LimitClause::LimitOffset {
                    limit: lim,
                    offset: off,
                    ..
                } => {
                    if let Some(lim_expr) = lim {
                        limit = Some(bound(self, lim_expr, "LIMIT")?);
                    }
                    if let Some(off) = off {
                        offset = bound(self, &off.value, "OFFSET")?;
                    }
                }
                ast::LimitClause::OffsetCommaLimit {
                    offset: off,
                    limit: lim,
                } => {
                    offset = bound(self, off, "OFFSET")?;
                    limit = Some(bound(self, lim, "LIMIT")?);
                }
            }
        }
        Ok((offset, limit))
    }

    pub fn query(&mut self, q: &ast::Query) -> Result<SelectPlan, EngineError> {
        if q.with.is_some() {
            return Err(EngineError::NotSupported("WITH is not supported".into()));
        }
        let select = match q.body.as_ref() {
            SetExpr::Select(select) => select,
            SetExpr::Query(inner) if q.order_by.is_none() && q.limit_clause.is_none() => {
                return self.query(inner)
            }
            other => {
                return Err(EngineError::NotSupported(format!(
                    "Query body not supported: {}",
                    display(other)
                )))
            }
        };

        let mut scope = Scope::new();
        scope.windows = select.named_window.clone();
        self.from(&mut scope, &select.from)?;

        let fields = self.projection(&mut scope, &select.projection)?;
        scope.fields = fields.clone();

        let filter = match &select.selection {
            Some(e) => Some(self.clause(
                &mut scope,
                "WHERE",
                e,
                ExprFlags::AGGREGATE | ExprFlags::WINDOW,
            )?),
            None => None,
        };

        scope.allow_fields = true;
        let (group_exprs, mut with_rollup): (Vec<ast::Expr>, bool) = match &select.group_by {
            ast::GroupByExpr::Expressions(exprs, modifiers) => {
                let mut rollup = false;
                for m in modifiers {
                    match m {
                        ast::GroupByWithModifier::Rollup => rollup = true,
                        other => {
                            return Err(EngineError::NotSupported(format!(
                                "GROUP BY modifier not supported: {other:?}"
                            )))
                        }
                    }
                }
                (exprs.clone(), rollup)
            }
            ast::GroupByExpr::All(_) => {
                return Err(EngineError::NotSupported("GROUP BY ALL is not supported".into()))
            }
        };
        // `GROUP BY ROLLUP(a, b)` spelling.
        let group_exprs = match group_exprs.as_slice() {
            [ast::Expr::Rollup(sets)] => {
                with_rollup = true;
                sets.iter().flatten().cloned().collect()
            }
            _ => group_exprs,
        };
        let group_by = self.group_terms(&mut scope, &group_exprs)?;

        let having = match &select.having {
            Some(e) => Some(self.clause(&mut scope, "HAVING", e, ExprFlags::WINDOW)?),
            None => None,
        };

        let order_by = match &q.order_by {
            Some(order) => match &order.kind {
                ast::OrderByKind::Expressions(terms) => self.order_terms(&mut scope, terms, true)?,
                _ => return Err(EngineError::NotSupported("ORDER BY ALL is not supported".into())),
            },
            None => Vec::new(),
        };

        let distinct = match &select.distinct {
            Some(ast::Distinct::On(_)) => {
                return Err(EngineError::NotSupported("DISTINCT ON is not supported".into()))
            }
            Some(ast::Distinct::Distinct) => true,
            _ => false,
        };
        let (offset, limit) = self.limits(q)?;

        let tables = self.finish(scope)?;
        Ok(SelectPlan {
            tables,
            filter,
            fields,
            group_by,
            with_rollup,
            having,
            order_by,
            distinct,
            offset,
            limit,
        })
    }

    // -- INSERT -------------------------------------------------------------

    fn insert(&mut self, insert: &ast::Insert) -> Result<InsertPlan, EngineError> {
        let table_name = match &insert.table {
            ast::TableObject::TableName(name) => name,
            _ => {
                return Err(EngineError::NotSupported(
                    "Complex table insert not supported".into(),
                ))
            }
        };
        let (_db, name) = object_name_to_parts(table_name)?;
        let store = self.tables.get(&name)?;
        let def = store.schema().clone();

        let columns = if insert.columns.is_empty() {
            (0..def.columns.len()).collect()
        } else {
            insert
                .columns
                .iter()
                .map(|c| {
                    def.column_index(&c.value).ok_or_else(|| {
                        EngineError::UnknownColumn(format!("{}.{}", def.name, c.value))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        let Some(src) = &insert.source else {
            return Err(EngineError::Parse("INSERT missing source".into()));
        };
        let source = match src.body.as_ref() {
            SetExpr::Values(values) => {
                let mut scope = Scope::new();
                let rows = values
                    .rows
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|e| self.expr(&mut scope, e))
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                InsertSource::Values(rows)
            }
            _ => InsertSource::Select(Box::new(self.query(src)?)),
        };

        let on_duplicate = match &insert.on {
            Some(ast::OnInsert::DuplicateKeyUpdate(assignments)) => {
                let mut scope = Scope::new();
                scope.push(Slot {
                    alias: def.name.clone(),
                    def: def.clone(),
                    source: TableSource::Store(store.clone()),
                    join: None,
                })?;
                scope.allow_refs = false;
                scope.incoming = Some(def.clone());
                let mut sets = Vec::with_capacity(assignments.len());
                for a in assignments {
                    let (_slot, column, target) = self.assignment_target(&scope, &a.target)?;
                    let expr = self.expr(&mut scope, &a.value)?;
                    let text = format!("{target} = {}", expr.stringify(&[]));
                    sets.push(SetColumn { column, expr, text });
                }
                OnDuplicate::Update(sets)
            }
            Some(_) => {
                return Err(EngineError::NotSupported(
                    "only ON DUPLICATE KEY UPDATE is supported".into(),
                ))
            }
            None if insert.replace_into => OnDuplicate::Replace,
            None if insert.ignore => OnDuplicate::Ignore,
            None => OnDuplicate::Error,
        };

        Ok(InsertPlan {
            table: store,
            name: def.name.clone(),
            columns,
            source,
            on_duplicate,
        })
    }

    /// Resolves an assignment target to `(slot, column, written name)`.
    fn assignment_target(
        &self,
        scope: &Scope,
        target: &ast::AssignmentTarget,
    ) -> Result<(usize, usize, String), EngineError> {
        let name = match target {
            ast::AssignmentTarget::ColumnName(name) => name,
            ast::AssignmentTarget::Tuple(_) => {
                return Err(EngineError::NotSupported(
                    "tuple assignment is not supported".into(),
                ))
            }
        };
        let (qualifier, column) = object_name_to_parts(name)?;
        let written = match &qualifier {
            Some(q) => format!("{q}.{column}"),
            None => column.clone(),
        };
        let hits: Vec<(usize, usize)> = match &qualifier {
            Some(q) => {
                let slot = scope
                    .slot_of(q)
                    .ok_or_else(|| EngineError::UnknownTable(q.clone()))?;
                scope.slots[slot]
                    .def
                    .column_index(&column)
                    .map(|c| vec![(slot, c)])
                    .unwrap_or_default()
            }
            None => scope
                .slots
                .iter()
                .enumerate()
                .filter_map(|(slot, s)| s.def.column_index(&column).map(|c| (slot, c)))
                .collect(),
        };
        match hits.as_slice() {
            [(slot, c)] => Ok((*slot, *c, written)),
            [] => Err(EngineError::UnknownColumn(written)),
            _ => Err(EngineError::AmbiguousColumn(written)),
        }
    }

    // -- UPDATE -------------------------------------------------------------

    fn update(&mut self, update: &ast::Update) -> Result<UpdatePlan, EngineError> {
        if update.returning.is_some() || update.or.is_some() || update.limit.is_some() {
            return Err(EngineError::NotSupported(
                "UPDATE with RETURNING/OR/LIMIT is not supported".into(),
            ));
        }
        let mut scope = Scope::new();
        self.from(&mut scope, std::slice::from_ref(&update.table))?;
        if let Some(from) = &update.from {
            let extra = match from {
                ast::UpdateTableFromKind::BeforeSet(t) | ast::UpdateTableFromKind::AfterSet(t) => t,
            };
            self.from(&mut scope, extra)?;
        }

        let mut assignments = Vec::with_capacity(update.assignments.len());
        for a in &update.assignments {
            let (slot, column, target) = self.assignment_target(&scope, &a.target)?;
            let s = &scope.slots[slot];
            if matches!(s.source, TableSource::Derived(_)) {
                return Err(EngineError::NotSupported(format!(
                    "The target table {} of the UPDATE is not updatable",
                    s.alias
                )));
            }
            if s.def.primary_key_index() == Some(column) {
                return Err(EngineError::NotSupported(
                    "Updating PRIMARY KEY is not supported".into(),
                ));
            }
            let expr = self.expr(&mut scope, &a.value)?;
            if expr.flags().intersects(ExprFlags::AGGREGATE | ExprFlags::WINDOW) {
                return Err(EngineError::Invalid("Invalid use of group function".into()));
            }
            let text = format!("{target} = {}", expr.stringify(&[]));
            assignments.push(Assignment {
                slot,
                column,
                expr,
                text,
            });
        }

        let filter = match &update.selection {
            Some(e) => Some(self.clause(
                &mut scope,
                "WHERE",
                e,
                ExprFlags::AGGREGATE | ExprFlags::WINDOW,
            )?),
            None => None,
        };
        let tables = self.finish(scope)?;
        Ok(UpdatePlan {
            tables,
            filter,
            assignments,
        })
    }

    // -- DELETE -------------------------------------------------------------

    fn delete(&mut self, delete: &ast::Delete) -> Result<DeletePlan, EngineError> {
        if delete.returning.is_some() || !delete.order_by.is_empty() || delete.limit.is_some() {
            return Err(EngineError::NotSupported(
                "DELETE with RETURNING/ORDER BY/LIMIT is not supported".into(),
            ));
        }
        let from = match &delete.from {
            ast::FromTable::WithFromKeyword(t) | ast::FromTable::WithoutKeyword(t) => t,
        };

        let mut scope = Scope::new();
        let target_names: Vec<String> = match &delete.using {
            // DELETE FROM t1, t2 USING <tables> WHERE ...
            Some(using) => {
                self.from(&mut scope, using)?;
                from.iter()
                    .map(|t| match &t.relation {
                        TableFactor::Table { name, .. } => object_name_to_parts(name).map(|p| p.1),
                        other => Err(EngineError::NotSupported(format!(
                            "DELETE target not supported: {}",
                            display(other)
                        ))),
                    })
                    .collect::<Result<_, _>>()?
            }
            // DELETE t1, t2 FROM <tables> WHERE ...
            None if !delete.tables.is_empty() => {
                self.from(&mut scope, from)?;
                delete
                    .tables
                    .iter()
                    .map(|n| object_name_to_parts(n).map(|p| p.1))
                    .collect::<Result<_, _>>()?
            }
            None => {
                if from.len() != 1 || !from[0].joins.is_empty() {
                    return Err(EngineError::Invalid(
                        "multi-table DELETE needs its target tables listed".into(),
                    ));
                }
                self.from(&mut scope, from)?;
                vec![scope.slots[0].alias.clone()]
            }
        };

        let mut targets = Vec::with_capacity(target_names.len());
        for name in &target_names {
            let slot = scope.slot_of(name).ok_or_else(|| {
                EngineError::UnknownTable(format!("{name} in MULTI DELETE"))
            })?;
            if !targets.contains(&slot) {
                targets.push(slot);
            }
        }

        let filter = match &delete.selection {
            Some(e) => Some(self.clause(
                &mut scope,
                "WHERE",
                e,
                ExprFlags::AGGREGATE | ExprFlags::WINDOW,
            )?),
            None => None,
        };
        let tables = self.finish(scope)?;
        Ok(DeletePlan {
            tables,
            filter,
            targets,
        })
    }
}
