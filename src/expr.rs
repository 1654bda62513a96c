//! Bound expressions: a closed tree evaluated against a row composition.

use crate::aggregate::AggregateCall;
use crate::composition::Composition;
use crate::error::EngineError;
use crate::functions::ScalarFunction;
use crate::model::{Cell, Row};
use crate::window::{WindowCall, WindowDef};
use bitflags::bitflags;
use std::cmp::Ordering;
use std::sync::Arc;

bitflags! {
    /// What an expression tree reads or calls.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExprFlags: u8 {
        const COLUMN    = 1 << 0;
        const PARAM     = 1 << 1;
        const AGGREGATE = 1 << 2;
        const WINDOW    = 1 << 3;
    }
}

#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub comp: &'a Composition,
    pub params: &'a [Cell],
    /// Row being inserted, read by `VALUES(col)` in ON DUPLICATE KEY UPDATE.
    pub incoming: Option<&'a Row>,
}

impl<'a> EvalContext<'a> {
    pub fn new(comp: &'a Composition, params: &'a [Cell]) -> Self {
        Self {
            comp,
            params,
            incoming: None,
        }
    }

    pub fn with_incoming(mut self, row: &'a Row) -> Self {
        self.incoming = Some(row);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnBinding {
    /// Column `column` of the table bound to `slot`.
    Table { slot: usize, column: usize },
    /// A projected `$` field, e.g. an alias used in ORDER BY or HAVING.
    Field(String),
}

#[derive(Debug, Clone)]
pub struct ColumnRef {
    /// Text as written, used for naming and stringify.
    pub name: String,
    pub binding: ColumnBinding,
}

impl ColumnRef {
    pub fn read(&self, comp: &Composition) -> Cell {
        match &self.binding {
            ColumnBinding::Table { slot, column } => comp.value(*slot, *column),
            ColumnBinding::Field(name) => comp.fields.get(name).cloned().unwrap_or(Cell::Null),
        }
    }

    /// Unqualified column name, used to match GROUP BY and GROUPING names.
    pub fn unqualified(&self) -> &str {
        let (_, rest) = crate::reference::split_qualifier(&self.name);
        if crate::reference::is_reference(rest) {
            &self.name
        } else {
            self.name.rsplit('.').next().unwrap_or(&self.name)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Xor,
    Eq,
    NullSafeEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    IntDiv,
    Modulo,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Xor => "XOR",
            BinaryOp::Eq => "=",
            BinaryOp::NullSafeEq => "<=>",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::IntDiv => "DIV",
            BinaryOp::Modulo => "%",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Cell),
    Column(ColumnRef),
    /// Positional `?` parameter (0-based).
    Param(usize),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        escape: char,
        negated: bool,
        case_insensitive: bool,
    },
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    Function {
        func: ScalarFunction,
        args: Vec<Expr>,
    },
    Aggregate(Box<AggregateCall>),
    Window(Box<WindowCall>),
    /// `GROUPING(cols...)` with the unqualified argument names.
    Grouping(Vec<String>),
    /// `VALUES(col)`: column index into the incoming row.
    Values { column: usize, name: String },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TriBool {
    True,
    False,
    Unknown,
}

impl TriBool {
    fn from_cell(c: &Cell) -> TriBool {
        match c.truthy() {
            Some(true) => TriBool::True,
            Some(false) => TriBool::False,
            None => TriBool::Unknown,
        }
    }

    fn from_bool(b: bool) -> TriBool {
        if b {
            TriBool::True
        } else {
            TriBool::False
        }
    }

    fn and(self, other: TriBool) -> TriBool {
        match (self, other) {
            (TriBool::False, _) | (_, TriBool::False) => TriBool::False,
            (TriBool::True, b) => b,
            (TriBool::Unknown, _) => TriBool::Unknown,
        }
    }

    fn or(self, other: TriBool) -> TriBool {
        match (self, other) {
            (TriBool::True, _) | (_, TriBool::True) => TriBool::True,
            (TriBool::False, b) => b,
            (TriBool::Unknown, _) => TriBool::Unknown,
        }
    }

    fn xor(self, other: TriBool) -> TriBool {
        match (self, other) {
            (TriBool::Unknown, _) | (_, TriBool::Unknown) => TriBool::Unknown,
            (a, b) => TriBool::from_bool(a != b),
        }
    }

    fn not(self) -> TriBool {
        match self {
            TriBool::True => TriBool::False,
            TriBool::False => TriBool::True,
            TriBool::Unknown => TriBool::Unknown,
        }
    }

    fn into_cell(self) -> Cell {
        match self {
            TriBool::True => Cell::Int(1),
            TriBool::False => Cell::Int(0),
            TriBool::Unknown => Cell::Null,
        }
    }
}

impl Expr {
    pub fn column(name: impl Into<String>, slot: usize, column: usize) -> Expr {
        Expr::Column(ColumnRef {
            name: name.into(),
            binding: ColumnBinding::Table { slot, column },
        })
    }

    pub fn field(name: impl Into<String>) -> Expr {
        let name = name.into();
        Expr::Column(ColumnRef {
            binding: ColumnBinding::Field(name.clone()),
            name,
        })
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Evaluates as a filter: only TRUE passes.
    pub fn matches(&self, ctx: &EvalContext<'_>) -> Result<bool, EngineError> {
        Ok(self.eval(ctx)?.truthy() == Some(true))
    }

    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<Cell, EngineError> {
        match self {
            Expr::Literal(c) => Ok(c.clone()),
            Expr::Column(c) => Ok(c.read(ctx.comp)),
            Expr::Param(i) => ctx.params.get(*i).cloned().ok_or_else(|| {
                EngineError::Invalid(format!("No value bound for parameter {}", i + 1))
            }),
            Expr::Unary { op, expr } => {
                let v = expr.eval(ctx)?;
                match op {
                    UnaryOp::Not => Ok(TriBool::from_cell(&v).not().into_cell()),
                    UnaryOp::Plus => Ok(v),
                    UnaryOp::Minus => Ok(match v.to_number() {
                        None => Cell::Null,
                        Some(Cell::Int(i)) => Cell::Int(i.checked_neg().ok_or_else(out_of_range)?),
                        Some(Cell::Float(f)) => Cell::Float(-f),
                        Some(other) => other,
                    }),
                }
            }
            Expr::Binary { left, op, right } => {
                let l = left.eval(ctx)?;
                let r = right.eval(ctx)?;
                eval_binary(*op, &l, &r)
            }
            Expr::IsNull { expr, negated } => {
                let v = expr.eval(ctx)?;
                Ok(Cell::from(v.is_null() != *negated))
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let needle = expr.eval(ctx)?;
                if needle.is_null() {
                    return Ok(Cell::Null);
                }
                let mut has_null = false;
                for item in list {
                    let v = item.eval(ctx)?;
                    if v.is_null() {
                        has_null = true;
                        continue;
                    }
                    if needle.cmp_for_order(&v) == Ordering::Equal {
                        return Ok(Cell::from(!*negated));
                    }
                }
                let base = if has_null {
                    TriBool::Unknown
                } else {
                    TriBool::False
                };
                Ok(if *negated { base.not() } else { base }.into_cell())
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let v = expr.eval(ctx)?;
                let lo = low.eval(ctx)?;
                let hi = high.eval(ctx)?;
                if v.is_null() || lo.is_null() || hi.is_null() {
                    return Ok(Cell::Null);
                }
                let inside = v.cmp_for_order(&lo) != Ordering::Less
                    && v.cmp_for_order(&hi) != Ordering::Greater;
                Ok(Cell::from(inside != *negated))
            }
            Expr::Like {
                expr,
                pattern,
                escape,
                negated,
                case_insensitive,
            } => {
                let v = expr.eval(ctx)?;
                let pat = pattern.eval(ctx)?;
                if v.is_null() || pat.is_null() {
                    return Ok(Cell::Null);
                }
                let (text, pat) = if *case_insensitive {
                    (
                        v.to_display_string().to_lowercase(),
                        pat.to_display_string().to_lowercase(),
                    )
                } else {
                    (v.to_display_string(), pat.to_display_string())
                };
                Ok(Cell::from(sql_like_matches(&text, &pat, *escape) != *negated))
            }
            Expr::Case {
                operand,
                branches,
                otherwise,
            } => {
                let subject = match operand {
                    Some(o) => Some(o.eval(ctx)?),
                    None => None,
                };
                for (when, then) in branches {
                    let w = when.eval(ctx)?;
                    let hit = match &subject {
                        Some(s) => s.sql_eq(&w) == Some(true),
                        None => w.truthy() == Some(true),
                    };
                    if hit {
                        return then.eval(ctx);
                    }
                }
                match otherwise {
                    Some(e) => e.eval(ctx),
                    None => Ok(Cell::Null),
                }
            }
            Expr::Function { func, args } => {
                let values = args
                    .iter()
                    .map(|a| a.eval(ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                func.call(values)
            }
            Expr::Aggregate(call) => call.eval(ctx),
            Expr::Window(call) => call.eval(ctx),
            Expr::Grouping(names) => {
                let Some(aggr) = ctx.comp.aggr.as_ref().filter(|a| a.is_rollup) else {
                    return Ok(Cell::Int(0));
                };
                let hit = names
                    .iter()
                    .position(|n| aggr.by.iter().any(|b| b.eq_ignore_ascii_case(n)));
                Ok(Cell::Int(hit.map(|i| i as i64 + 1).unwrap_or(0)))
            }
            Expr::Values { column, name } => match ctx.incoming {
                Some(row) => Ok(row.get(*column).clone()),
                None => Err(EngineError::Invalid(format!(
                    "VALUES({name}) is only valid in ON DUPLICATE KEY UPDATE"
                ))),
            },
        }
    }

    fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_)
            | Expr::Column(_)
            | Expr::Param(_)
            | Expr::Grouping(_)
            | Expr::Values { .. } => Vec::new(),
            Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => vec![expr.as_ref()],
            Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::InList { expr, list, .. } => {
                let mut out = vec![expr.as_ref()];
                out.extend(list.iter());
                out
            }
            Expr::Between {
                expr, low, high, ..
            } => vec![expr.as_ref(), low.as_ref(), high.as_ref()],
            Expr::Like { expr, pattern, .. } => vec![expr.as_ref(), pattern.as_ref()],
            Expr::Case {
                operand,
                branches,
                otherwise,
            } => {
                let mut out: Vec<&Expr> = operand.iter().map(|b| b.as_ref()).collect();
                for (w, t) in branches {
                    out.push(w);
                    out.push(t);
                }
                out.extend(otherwise.iter().map(|b| b.as_ref()));
                out
            }
            Expr::Function { args, .. } => args.iter().collect(),
            Expr::Aggregate(call) => {
                let mut out: Vec<&Expr> = call.args.iter().collect();
                out.extend(call.order_by.iter().map(|t| &t.expr));
                out
            }
            Expr::Window(call) => call.args.iter().collect(),
        }
    }

    pub fn flags(&self) -> ExprFlags {
        let own = match self {
            Expr::Column(_) => ExprFlags::COLUMN,
            Expr::Param(_) => ExprFlags::PARAM,
            Expr::Grouping(_) => ExprFlags::AGGREGATE,
            Expr::Aggregate(call) if call.over.is_some() => ExprFlags::WINDOW,
            Expr::Aggregate(_) => ExprFlags::AGGREGATE,
            Expr::Window(_) => ExprFlags::WINDOW,
            _ => ExprFlags::empty(),
        };
        self.children()
            .into_iter()
            .fold(own, |acc, child| acc | child.flags())
    }

    /// Window definitions used anywhere in the tree, deduplicated by key.
    pub fn collect_windows(&self, out: &mut Vec<Arc<WindowDef>>) {
        let def = match self {
            Expr::Aggregate(call) => call.over.as_ref(),
            Expr::Window(call) => Some(&call.window),
            _ => None,
        };
        if let Some(def) = def {
            if !out.iter().any(|d| d.key == def.key) {
                out.push(def.clone());
            }
        }
        for child in self.children() {
            child.collect_windows(out);
        }
    }

    pub fn stringify(&self, params: &[Cell]) -> String {
        match self {
            Expr::Literal(c) => literal_sql(c),
            Expr::Column(c) => c.name.clone(),
            Expr::Param(i) => params
                .get(*i)
                .map(literal_sql)
                .unwrap_or_else(|| "?".to_string()),
            Expr::Unary { op, expr } => match op {
                UnaryOp::Not => format!("NOT {}", expr.stringify(params)),
                UnaryOp::Minus => format!("-{}", expr.stringify(params)),
                UnaryOp::Plus => format!("+{}", expr.stringify(params)),
            },
            Expr::Binary { left, op, right } => format!(
                "{} {} {}",
                left.stringify(params),
                op.symbol(),
                right.stringify(params)
            ),
            Expr::IsNull { expr, negated } => format!(
                "{} IS {}NULL",
                expr.stringify(params),
                if *negated { "NOT " } else { "" }
            ),
            Expr::InList {
                expr,
                list,
                negated,
            } => format!(
                "{} {}IN ({})",
                expr.stringify(params),
                if *negated { "NOT " } else { "" },
                join(list, params)
            ),
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => format!(
                "{} {}BETWEEN {} AND {}",
                expr.stringify(params),
                if *negated { "NOT " } else { "" },
                low.stringify(params),
                high.stringify(params)
            ),
            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
                ..
            } => format!(
                "{} {}{} {}",
                expr.stringify(params),
                if *negated { "NOT " } else { "" },
                if *case_insensitive { "ILIKE" } else { "LIKE" },
                pattern.stringify(params)
            ),
            Expr::Case {
                operand,
                branches,
                otherwise,
            } => {
                let mut s = String::from("CASE");
                if let Some(o) = operand {
                    s.push(' ');
                    s.push_str(&o.stringify(params));
                }
                for (w, t) in branches {
                    s.push_str(&format!(
                        " WHEN {} THEN {}",
                        w.stringify(params),
                        t.stringify(params)
                    ));
                }
                if let Some(e) = otherwise {
                    s.push_str(&format!(" ELSE {}", e.stringify(params)));
                }
                s.push_str(" END");
                s
            }
            Expr::Function { func, args } => format!("{}({})", func.name(), join(args, params)),
            Expr::Aggregate(call) => call.stringify(params),
            Expr::Window(call) => call.stringify(params),
            Expr::Grouping(names) => format!("GROUPING({})", names.join(", ")),
            Expr::Values { name, .. } => format!("VALUES({name})"),
        }
    }
}

pub(crate) fn join(exprs: &[Expr], params: &[Cell]) -> String {
    exprs
        .iter()
        .map(|e| e.stringify(params))
        .collect::<Vec<_>>()
        .join(", ")
}

fn literal_sql(c: &Cell) -> String {
    match c {
        Cell::Null => "NULL".to_string(),
        Cell::Int(_) | Cell::Float(_) => c.to_display_string(),
        other => format!("'{}'", other.to_display_string().replace('\'', "''")),
    }
}

fn out_of_range() -> EngineError {
    EngineError::Invalid("BIGINT value is out of range".into())
}

pub fn eval_binary(op: BinaryOp, l: &Cell, r: &Cell) -> Result<Cell, EngineError> {
    match op {
        BinaryOp::And => Ok(TriBool::from_cell(l).and(TriBool::from_cell(r)).into_cell()),
        BinaryOp::Or => Ok(TriBool::from_cell(l).or(TriBool::from_cell(r)).into_cell()),
        BinaryOp::Xor => Ok(TriBool::from_cell(l).xor(TriBool::from_cell(r)).into_cell()),
        BinaryOp::NullSafeEq => Ok(Cell::from(match (l.is_null(), r.is_null()) {
            (true, true) => true,
            (false, false) => l.cmp_for_order(r) == Ordering::Equal,
            _ => false,
        })),
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::LtEq
        | BinaryOp::Gt
        | BinaryOp::GtEq => {
            if l.is_null() || r.is_null() {
                return Ok(Cell::Null);
            }
            let cmp = l.cmp_for_order(r);
            let ok = match op {
                BinaryOp::Eq => cmp == Ordering::Equal,
                BinaryOp::NotEq => cmp != Ordering::Equal,
                BinaryOp::Lt => cmp == Ordering::Less,
                BinaryOp::LtEq => cmp != Ordering::Greater,
                BinaryOp::Gt => cmp == Ordering::Greater,
                _ => cmp != Ordering::Less,
            };
            Ok(Cell::from(ok))
        }
        BinaryOp::Plus
        | BinaryOp::Minus
        | BinaryOp::Multiply
        | BinaryOp::Divide
        | BinaryOp::IntDiv
        | BinaryOp::Modulo => arithmetic(op, l, r),
    }
}

fn arithmetic(op: BinaryOp, l: &Cell, r: &Cell) -> Result<Cell, EngineError> {
    let (Some(a), Some(b)) = (l.to_number(), r.to_number()) else {
        return Ok(Cell::Null);
    };
    if let (Cell::Int(x), Cell::Int(y)) = (&a, &b) {
        let (x, y) = (*x, *y);
        return match op {
            BinaryOp::Plus => x.checked_add(y).map(Cell::Int).ok_or_else(out_of_range),
            BinaryOp::Minus => x.checked_sub(y).map(Cell::Int).ok_or_else(out_of_range),
            BinaryOp::Multiply => x.checked_mul(y).map(Cell::Int).ok_or_else(out_of_range),
            BinaryOp::Divide if y == 0 => Ok(Cell::Null),
            BinaryOp::Divide => Ok(Cell::Float(x as f64 / y as f64)),
            BinaryOp::IntDiv | BinaryOp::Modulo if y == 0 => Ok(Cell::Null),
            BinaryOp::IntDiv => x.checked_div(y).map(Cell::Int).ok_or_else(out_of_range),
            _ => x.checked_rem(y).map(Cell::Int).ok_or_else(out_of_range),
        };
    }
    let x = a.as_f64().unwrap_or(0.0);
    let y = b.as_f64().unwrap_or(0.0);
    Ok(match op {
        BinaryOp::Plus => Cell::Float(x + y),
        BinaryOp::Minus => Cell::Float(x - y),
        BinaryOp::Multiply => Cell::Float(x * y),
        _ if y == 0.0 => Cell::Null,
        BinaryOp::Divide => Cell::Float(x / y),
        BinaryOp::IntDiv => Cell::Int((x / y).trunc() as i64),
        _ => Cell::Float(x % y),
    })
}

pub fn sql_like_matches(text: &str, pattern: &str, escape: char) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();

    let mut ti = 0usize;
    let mut pi = 0usize;

    let mut star_pi: Option<usize> = None;
    let mut star_ti = 0usize;

    while ti < t.len() {
        if pi < p.len() {
            let pc = p[pi];
            if pc == '%' {
                star_pi = Some(pi);
                pi += 1;
                while pi < p.len() && p[pi] == '%' {
                    pi += 1;
                }
                star_ti = ti;
                continue;
            }

            if pc == escape {
                if pi + 1 < p.len() {
                    if p[pi + 1] == t[ti] {
                        pi += 2;
                        ti += 1;
                        continue;
                    }
                } else if pc == t[ti] {
                    pi += 1;
                    ti += 1;
                    continue;
                }
            } else if pc == '_' || pc == t[ti] {
                pi += 1;
                ti += 1;
                continue;
            }
        }

        if let Some(star_pos) = star_pi {
            star_ti += 1;
            ti = star_ti;
            pi = star_pos + 1;
            continue;
        }

        return false;
    }

    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }

    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(e: &Expr) -> Cell {
        let comp = Composition::new(0);
        e.eval(&EvalContext::new(&comp, &[])).expect("eval")
    }

    fn lit(c: impl Into<Cell>) -> Expr {
        Expr::Literal(c.into())
    }

    #[test]
    fn three_valued_logic() {
        let unknown = Expr::binary(lit(Cell::Null), BinaryOp::Eq, lit(1));
        assert_eq!(eval(&unknown), Cell::Null);
        let and_false = Expr::binary(unknown.clone(), BinaryOp::And, lit(0));
        assert_eq!(eval(&and_false), Cell::Int(0));
        let or_true = Expr::binary(unknown, BinaryOp::Or, lit(1));
        assert_eq!(eval(&or_true), Cell::Int(1));
    }

    #[test]
    fn arithmetic_rules() {
        assert_eq!(eval(&Expr::binary(lit(7), BinaryOp::Divide, lit(2))), Cell::Float(3.5));
        assert_eq!(eval(&Expr::binary(lit(7), BinaryOp::IntDiv, lit(2))), Cell::Int(3));
        assert_eq!(eval(&Expr::binary(lit(7), BinaryOp::Divide, lit(0))), Cell::Null);
        assert_eq!(eval(&Expr::binary(lit("3"), BinaryOp::Plus, lit(4))), Cell::Int(7));
        let comp = Composition::new(0);
        let overflow = Expr::binary(lit(i64::MAX), BinaryOp::Plus, lit(1));
        assert!(overflow.eval(&EvalContext::new(&comp, &[])).is_err());
    }

    #[test]
    fn in_list_with_null_is_unknown() {
        let e = Expr::InList {
            expr: Box::new(lit(3)),
            list: vec![lit(1), lit(Cell::Null)],
            negated: false,
        };
        assert_eq!(eval(&e), Cell::Null);
    }

    #[test]
    fn like_patterns() {
        assert!(sql_like_matches("hello", "h%o", '\\'));
        assert!(sql_like_matches("hello", "h_llo", '\\'));
        assert!(!sql_like_matches("hello", "h_lo", '\\'));
        assert!(sql_like_matches("50%", "50\\%", '\\'));
    }

    #[test]
    fn params_and_stringify() {
        let e = Expr::binary(Expr::column("t.age", 0, 1), BinaryOp::Lt, Expr::Param(0));
        assert_eq!(e.stringify(&[Cell::Int(60)]), "t.age < 60");
        assert_eq!(e.stringify(&[]), "t.age < ?");
        assert!(e.flags().contains(ExprFlags::COLUMN | ExprFlags::PARAM));
        assert!(!e.flags().intersects(ExprFlags::AGGREGATE | ExprFlags::WINDOW));
    }

    #[test]
    fn case_forms() {
        let simple = Expr::Case {
            operand: Some(Box::new(lit(2))),
            branches: vec![(lit(1), lit("one")), (lit(2), lit("two"))],
            otherwise: None,
        };
        assert_eq!(eval(&simple), Cell::from("two"));
        let searched = Expr::Case {
            operand: None,
            branches: vec![(lit(0), lit("no"))],
            otherwise: Some(Box::new(lit("else"))),
        };
        assert_eq!(eval(&searched), Cell::from("else"));
    }
}
