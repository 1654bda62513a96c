//! Scalar built-ins available to field, WHERE and assignment expressions.

use crate::error::EngineError;
use crate::model::Cell;
use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunction {
    Concat,
    ConcatWs,
    Coalesce,
    IsNull,
    IfNull,
    If,
    FindInSet,
    Upper,
    Lower,
    Length,
    Abs,
    Round,
    JsonExtract,
    JsonObject,
    JsonArray,
    JsonMerge,
}

impl ScalarFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        let f = match name.to_ascii_uppercase().as_str() {
            "CONCAT" => ScalarFunction::Concat,
            "CONCAT_WS" => ScalarFunction::ConcatWs,
            "COALESCE" => ScalarFunction::Coalesce,
            "ISNULL" => ScalarFunction::IsNull,
            "IFNULL" => ScalarFunction::IfNull,
            "IF" => ScalarFunction::If,
            "FIND_IN_SET" => ScalarFunction::FindInSet,
            "UPPER" | "UCASE" => ScalarFunction::Upper,
            "LOWER" | "LCASE" => ScalarFunction::Lower,
            "LENGTH" => ScalarFunction::Length,
            "ABS" => ScalarFunction::Abs,
            "ROUND" => ScalarFunction::Round,
            "JSON_EXTRACT" => ScalarFunction::JsonExtract,
            "JSON_OBJECT" => ScalarFunction::JsonObject,
            "JSON_ARRAY" => ScalarFunction::JsonArray,
            "JSON_MERGE" | "JSON_MERGE_PRESERVE" => ScalarFunction::JsonMerge,
            _ => return None,
        };
        Some(f)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarFunction::Concat => "CONCAT",
            ScalarFunction::ConcatWs => "CONCAT_WS",
            ScalarFunction::Coalesce => "COALESCE",
            ScalarFunction::IsNull => "ISNULL",
            ScalarFunction::IfNull => "IFNULL",
            ScalarFunction::If => "IF",
            ScalarFunction::FindInSet => "FIND_IN_SET",
            ScalarFunction::Upper => "UPPER",
            ScalarFunction::Lower => "LOWER",
            ScalarFunction::Length => "LENGTH",
            ScalarFunction::Abs => "ABS",
            ScalarFunction::Round => "ROUND",
            ScalarFunction::JsonExtract => "JSON_EXTRACT",
            ScalarFunction::JsonObject => "JSON_OBJECT",
            ScalarFunction::JsonArray => "JSON_ARRAY",
            ScalarFunction::JsonMerge => "JSON_MERGE",
        }
    }

    /// Accepted argument counts as `(min, max)`.
    fn arity(&self) -> (usize, Option<usize>) {
        match self {
            ScalarFunction::Concat | ScalarFunction::Coalesce => (1, None),
            ScalarFunction::ConcatWs => (2, None),
            ScalarFunction::IsNull
            | ScalarFunction::Upper
            | ScalarFunction::Lower
            | ScalarFunction::Length
            | ScalarFunction::Abs => (1, Some(1)),
            ScalarFunction::IfNull | ScalarFunction::FindInSet => (2, Some(2)),
            ScalarFunction::If => (3, Some(3)),
            ScalarFunction::Round => (1, Some(2)),
            ScalarFunction::JsonExtract => (2, None),
            ScalarFunction::JsonObject | ScalarFunction::JsonArray => (0, None),
            ScalarFunction::JsonMerge => (2, None),
        }
    }

    pub fn check_arity(&self, count: usize) -> Result<(), EngineError> {
        let (min, max) = self.arity();
        let ok = count >= min && max.map_or(true, |m| count <= m);
        let pairs_ok = *self != ScalarFunction::JsonObject || count % 2 == 0;
        if ok && pairs_ok {
            Ok(())
        } else {
            Err(EngineError::Invalid(format!(
                "Incorrect parameter count in the call to native function '{}'",
                self.name()
            )))
        }
    }

    pub fn call(&self, args: Vec<Cell>) -> Result<Cell, EngineError> {
        self.check_arity(args.len())?;
        match self {
            ScalarFunction::Concat => {
                if args.iter().any(Cell::is_null) {
                    return Ok(Cell::Null);
                }
                Ok(Cell::Text(
                    args.iter().map(Cell::to_display_string).collect::<String>(),
                ))
            }
            ScalarFunction::ConcatWs => {
                let mut it = args.into_iter();
                let sep = match it.next() {
                    Some(Cell::Null) | None => return Ok(Cell::Null),
                    Some(s) => s.to_display_string(),
                };
                let parts: Vec<String> = it
                    .filter(|c| !c.is_null())
                    .map(|c| c.to_display_string())
                    .collect();
                Ok(Cell::Text(parts.join(&sep)))
            }
            ScalarFunction::Coalesce => Ok(args
                .into_iter()
                .find(|c| !c.is_null())
                .unwrap_or(Cell::Null)),
            ScalarFunction::IsNull => Ok(Cell::from(args[0].is_null())),
            ScalarFunction::IfNull => {
                let mut it = args.into_iter();
                match (it.next(), it.next()) {
                    (Some(Cell::Null), Some(alt)) => Ok(alt),
                    (Some(v), _) => Ok(v),
                    _ => Ok(Cell::Null),
                }
            }
            ScalarFunction::If => {
                let mut it = args.into_iter();
                let cond = it.next().unwrap_or(Cell::Null);
                let then = it.next().unwrap_or(Cell::Null);
                let otherwise = it.next().unwrap_or(Cell::Null);
                Ok(if cond.truthy() == Some(true) {
                    then
                } else {
                    otherwise
                })
            }
            ScalarFunction::FindInSet => {
                if args[0].is_null() || args[1].is_null() {
                    return Ok(Cell::Null);
                }
                let needle = args[0].to_display_string();
                let list = args[1].to_display_string();
                if needle.contains(',') || list.is_empty() {
                    return Ok(Cell::Int(0));
                }
                let pos = list
                    .split(',')
                    .position(|item| item == needle)
                    .map(|i| i as i64 + 1)
                    .unwrap_or(0);
                Ok(Cell::Int(pos))
            }
            ScalarFunction::Upper => Ok(map_text(&args[0], |s| s.to_uppercase())),
            ScalarFunction::Lower => Ok(map_text(&args[0], |s| s.to_lowercase())),
            ScalarFunction::Length => Ok(match &args[0] {
                Cell::Null => Cell::Null,
                c => Cell::Int(c.to_display_string().len() as i64),
            }),
            ScalarFunction::Abs => Ok(match args[0].to_number() {
                None => Cell::Null,
                Some(Cell::Int(i)) => Cell::Int(i.saturating_abs()),
                Some(Cell::Float(f)) => Cell::Float(f.abs()),
                Some(other) => other,
            }),
            ScalarFunction::Round => {
                let digits = match args.get(1) {
                    Some(Cell::Null) => return Ok(Cell::Null),
                    Some(d) => d.as_i64().unwrap_or(0),
                    None => 0,
                };
                Ok(round(&args[0], digits))
            }
            ScalarFunction::JsonExtract => json_extract(&args),
            ScalarFunction::JsonObject => {
                let mut map = serde_json::Map::new();
                for pair in args.chunks(2) {
                    let key = match &pair[0] {
                        Cell::Null => {
                            return Err(EngineError::Invalid(
                                "JSON documents may not contain NULL member names".into(),
                            ))
                        }
                        k => k.to_display_string(),
                    };
                    map.insert(key, pair[1].to_json());
                }
                Ok(Cell::Text(Json::Object(map).to_string()))
            }
            ScalarFunction::JsonArray => Ok(Cell::Text(
                Json::Array(args.iter().map(Cell::to_json).collect()).to_string(),
            )),
            ScalarFunction::JsonMerge => {
                let mut docs = Vec::with_capacity(args.len());
                for a in &args {
                    match a {
                        Cell::Null => return Ok(Cell::Null),
                        c => docs.push(parse_doc(c)?),
                    }
                }
                let merged = docs
                    .into_iter()
                    .reduce(merge_preserve)
                    .unwrap_or(Json::Null);
                Ok(Cell::Text(merged.to_string()))
            }
        }
    }
}

fn map_text(cell: &Cell, f: impl Fn(&str) -> String) -> Cell {
    match cell {
        Cell::Null => Cell::Null,
        c => Cell::Text(f(&c.to_display_string())),
    }
}

fn round(value: &Cell, digits: i64) -> Cell {
    match value.to_number() {
        None => Cell::Null,
        Some(Cell::Int(i)) if digits >= 0 => Cell::Int(i),
        Some(n) => {
            let f = n.as_f64().unwrap_or(0.0);
            let scale = 10f64.powi(digits.clamp(-30, 30) as i32);
            let r = (f * scale).round() / scale;
            match n {
                Cell::Int(_) => Cell::Int(r as i64),
                _ => Cell::Float(r),
            }
        }
    }
}

fn parse_doc(cell: &Cell) -> Result<Json, EngineError> {
    match cell {
        Cell::Text(s) => serde_json::from_str(s).map_err(|e| {
            EngineError::Invalid(format!("Invalid JSON text: {e}"))
        }),
        other => Ok(other.to_json()),
    }
}

#[derive(Debug, PartialEq)]
enum PathLeg {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Result<Vec<PathLeg>, EngineError> {
    let bad = || EngineError::Invalid(format!("Invalid JSON path expression: {path}"));
    let rest = path.trim().strip_prefix('$').ok_or_else(bad)?;
    let mut legs = Vec::new();
    let mut chars = rest.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '.' => {
                let mut key = String::new();
                if chars.peek() == Some(&'"') {
                    chars.next();
                    for c in chars.by_ref() {
                        if c == '"' {
                            break;
                        }
                        key.push(c);
                    }
                } else {
                    while let Some(&c) = chars.peek() {
                        if c == '.' || c == '[' {
                            break;
                        }
                        key.push(c);
                        chars.next();
                    }
                }
                if key.is_empty() {
                    return Err(bad());
                }
                legs.push(PathLeg::Key(key));
            }
            '[' => {
                let mut digits = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    digits.push(c);
                }
                let idx = digits.trim().parse::<usize>().map_err(|_| bad())?;
                legs.push(PathLeg::Index(idx));
            }
            c if c.is_whitespace() => {}
            _ => return Err(bad()),
        }
    }
    Ok(legs)
}

fn walk<'a>(doc: &'a Json, legs: &[PathLeg]) -> Option<&'a Json> {
    legs.iter().try_fold(doc, |node, leg| match leg {
        PathLeg::Key(k) => node.get(k.as_str()),
        PathLeg::Index(i) => match node {
            Json::Array(items) => items.get(*i),
            // A scalar behaves as a one-element array.
            other if *i == 0 => Some(other),
            _ => None,
        },
    })
}

fn json_extract(args: &[Cell]) -> Result<Cell, EngineError> {
    if args.iter().any(Cell::is_null) {
        return Ok(Cell::Null);
    }
    let doc = parse_doc(&args[0])?;
    let mut found = Vec::new();
    for path in &args[1..] {
        let legs = parse_path(&path.to_display_string())?;
        if let Some(v) = walk(&doc, &legs) {
            found.push(v.clone());
        }
    }
    Ok(match (args.len(), found.len()) {
        (_, 0) => Cell::Null,
        (2, _) => match found.pop() {
            Some(v @ (Json::Object(_) | Json::Array(_))) => Cell::Text(v.to_string()),
            Some(v) => Cell::from_json(&v),
            None => Cell::Null,
        },
        _ => Cell::Text(Json::Array(found).to_string()),
    })
}

fn merge_preserve(left: Json, right: Json) -> Json {
    match (left, right) {
        (Json::Object(mut a), Json::Object(b)) => {
            for (k, v) in b {
                let merged = match a.remove(&k) {
                    Some(existing) => merge_preserve(existing, v),
                    None => v,
                };
                a.insert(k, merged);
            }
            Json::Object(a)
        }
        (Json::Array(mut a), Json::Array(b)) => {
            a.extend(b);
            Json::Array(a)
        }
        (Json::Array(mut a), other) => {
            a.push(other);
            Json::Array(a)
        }
        (other, Json::Array(b)) => {
            let mut a = vec![other];
            a.extend(b);
            Json::Array(a)
        }
        (a, b) => Json::Array(vec![a, b]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(f: ScalarFunction, args: Vec<Cell>) -> Cell {
        f.call(args).expect("call")
    }

    #[test]
    fn concat_family() {
        assert_eq!(
            call(ScalarFunction::Concat, vec!["a".into(), Cell::Int(1)]),
            Cell::from("a1")
        );
        assert_eq!(
            call(ScalarFunction::Concat, vec!["a".into(), Cell::Null]),
            Cell::Null
        );
        assert_eq!(
            call(
                ScalarFunction::ConcatWs,
                vec!["-".into(), "a".into(), Cell::Null, "b".into()]
            ),
            Cell::from("a-b")
        );
    }

    #[test]
    fn coalesce_and_find_in_set() {
        assert_eq!(
            call(ScalarFunction::Coalesce, vec![Cell::Null, Cell::Int(4), Cell::Int(5)]),
            Cell::Int(4)
        );
        assert_eq!(
            call(ScalarFunction::FindInSet, vec!["b".into(), "a,b,c".into()]),
            Cell::Int(2)
        );
        assert_eq!(
            call(ScalarFunction::FindInSet, vec!["z".into(), "a,b,c".into()]),
            Cell::Int(0)
        );
        assert_eq!(call(ScalarFunction::IsNull, vec![Cell::Null]), Cell::Int(1));
    }

    #[test]
    fn json_functions() {
        let doc = Cell::from(r#"{"a":{"b":[10,20]},"s":"x"}"#);
        assert_eq!(
            call(ScalarFunction::JsonExtract, vec![doc.clone(), "$.a.b[1]".into()]),
            Cell::Int(20)
        );
        assert_eq!(
            call(ScalarFunction::JsonExtract, vec![doc.clone(), "$.s".into()]),
            Cell::from("x")
        );
        assert_eq!(
            call(ScalarFunction::JsonExtract, vec![doc, "$.missing".into()]),
            Cell::Null
        );
        assert_eq!(
            call(ScalarFunction::JsonObject, vec!["k".into(), Cell::Int(1)]),
            Cell::from(r#"{"k":1}"#)
        );
        assert_eq!(
            call(
                ScalarFunction::JsonMerge,
                vec![r#"{"a":1}"#.into(), r#"{"a":2,"b":3}"#.into()]
            ),
            Cell::from(r#"{"a":[1,2],"b":3}"#)
        );
    }

    #[test]
    fn arity_is_checked() {
        assert!(ScalarFunction::If.call(vec![Cell::Int(1)]).is_err());
        assert!(ScalarFunction::JsonObject.call(vec!["k".into()]).is_err());
    }

    #[test]
    fn rounding() {
        assert_eq!(
            call(ScalarFunction::Round, vec![Cell::Float(2.346), Cell::Int(2)]),
            Cell::Float(2.35)
        );
        assert_eq!(call(ScalarFunction::Round, vec![Cell::Float(2.5)]), Cell::Float(3.0));
    }
}
