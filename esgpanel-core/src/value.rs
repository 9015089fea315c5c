//! Cell values.
//!
//! Provider responses mix numbers, strings and nulls in the same column. A
//! cell is an `Option<Value>`: `None` is the one and only representation of a
//! missing observation. Empty strings and non-finite numbers are normalised
//! to `None` on the way in so downstream code never has to special-case them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single non-missing cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

/// A possibly-missing cell.
pub type Cell = Option<Value>;

impl Value {
    /// Convert a JSON cell from a provider response.
    pub fn from_json(raw: &serde_json::Value) -> Cell {
        match raw {
            serde_json::Value::Null => None,
            serde_json::Value::Number(n) => n.as_f64().and_then(Self::number),
            serde_json::Value::String(s) => Self::text(s),
            serde_json::Value::Bool(b) => Some(Value::Text(b.to_string())),
            other => Some(Value::Text(other.to_string())),
        }
    }

    /// A finite number, or missing.
    pub fn number(n: f64) -> Cell {
        n.is_finite().then_some(Value::Number(n))
    }

    /// A non-blank string, or missing.
    pub fn text(s: &str) -> Cell {
        if s.trim().is_empty() {
            None
        } else {
            Some(Value::Text(s.to_string()))
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// Render a cell for flat-file output. Missing cells are empty strings.
pub fn render_cell(cell: &Cell) -> String {
    cell.as_ref().map(ToString::to_string).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_null_and_blank_strings_are_missing() {
        assert_eq!(Value::from_json(&json!(null)), None);
        assert_eq!(Value::from_json(&json!("")), None);
        assert_eq!(Value::from_json(&json!("   ")), None);
    }

    #[test]
    fn json_numbers_and_strings_are_kept() {
        assert_eq!(Value::from_json(&json!(4.5)), Some(Value::Number(4.5)));
        assert_eq!(Value::from_json(&json!(3)), Some(Value::Number(3.0)));
        assert_eq!(
            Value::from_json(&json!("Technology")),
            Some(Value::Text("Technology".into()))
        );
        assert_eq!(
            Value::from_json(&json!(true)),
            Some(Value::Text("true".into()))
        );
    }

    #[test]
    fn non_finite_numbers_are_missing() {
        assert_eq!(Value::number(f64::NAN), None);
        assert_eq!(Value::number(f64::INFINITY), None);
    }

    #[test]
    fn rendering_is_compact() {
        assert_eq!(render_cell(&Some(Value::Number(5.0))), "5");
        assert_eq!(render_cell(&Some(Value::Number(1.25))), "1.25");
        assert_eq!(render_cell(&Some(Value::Text("x".into()))), "x");
        assert_eq!(render_cell(&None), "");
    }
}
