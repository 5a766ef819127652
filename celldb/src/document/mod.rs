// Cell values - the dynamic payload stored per (row, property)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Derived values of computed columns: property id -> row id -> value
pub type ColumnValues = BTreeMap<String, BTreeMap<String, CellValue>>;

/// The value of one property for one row.
///
/// Stored cells and computed values share this type. On the wire a cell is a plain
/// JSON scalar or an array of strings (multiSelect option ids, relation row ids).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    List(Vec<String>),
    #[default]
    Null,
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        CellValue::Text(s.into())
    }

    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CellValue::List(items.into_iter().map(Into::into).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Null, the empty string and the empty list all count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(s) => s.is_empty(),
            CellValue::List(items) => items.is_empty(),
            CellValue::Number(_) | CellValue::Bool(_) => false,
        }
    }

    /// Loose numeric coercion: null and "" become 0, unparseable text becomes NaN.
    pub fn to_number(&self) -> f64 {
        match self {
            CellValue::Null => 0.0,
            CellValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            CellValue::Number(n) => *n,
            CellValue::Text(s) => parse_number(s),
            CellValue::List(items) => parse_number(&items.join(",")),
        }
    }

    /// Strict numeric view used by aggregations: only numbers and numeric text qualify.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) if n.is_finite() => Some(*n),
            CellValue::Text(s) if !s.trim().is_empty() => {
                let n = parse_number(s);
                n.is_finite().then_some(n)
            }
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            CellValue::Null => false,
            CellValue::Bool(b) => *b,
            CellValue::Number(n) => *n != 0.0 && !n.is_nan(),
            CellValue::Text(s) => !s.is_empty(),
            CellValue::List(items) => !items.is_empty(),
        }
    }

    /// String form used for display, string comparison and concatenation.
    pub fn to_display_string(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Bool(b) => b.to_string(),
            CellValue::List(items) => items.join(", "),
        }
    }

    /// Sequences collapse to their ", "-joined string; everything else is unchanged.
    pub fn flatten(&self) -> CellValue {
        match self {
            CellValue::List(items) => CellValue::Text(items.join(", ")),
            other => other.clone(),
        }
    }

    /// Row or option ids held by the cell. A bare string is a single id.
    pub fn as_id_list(&self) -> Vec<String> {
        match self {
            CellValue::List(items) => items.clone(),
            CellValue::Text(s) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Stable serialized form, used where values must be compared for identity.
    pub fn serialized(&self) -> String {
        serde_json::Value::from(self.clone()).to_string()
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl From<serde_json::Value> for CellValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Null,
            serde_json::Value::Bool(b) => CellValue::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map(CellValue::Number).unwrap_or_default(),
            serde_json::Value::String(s) => CellValue::Text(s),
            serde_json::Value::Array(items) => CellValue::List(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        serde_json::Value::Null => None,
                        serde_json::Value::String(s) => Some(s),
                        other => Some(other.to_string()),
                    })
                    .collect(),
            ),
            obj @ serde_json::Value::Object(_) => CellValue::Text(obj.to_string()),
        }
    }
}

impl From<CellValue> for serde_json::Value {
    fn from(value: CellValue) -> Self {
        match value {
            CellValue::Null => serde_json::Value::Null,
            CellValue::Bool(b) => serde_json::Value::Bool(b),
            CellValue::Text(s) => serde_json::Value::String(s),
            CellValue::List(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::String).collect())
            }
            CellValue::Number(n) => {
                if is_whole(n) {
                    serde_json::Value::from(n as i64)
                } else {
                    serde_json::Number::from_f64(n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
        }
    }
}

fn is_whole(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15
}

/// Render a number the way users type it: `10` rather than `10.0`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let s = if n > 0.0 { "Infinity" } else { "-Infinity" };
        s.to_string()
    } else if is_whole(n) {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Parse user text as a number. Blank text is 0, anything unparseable is NaN.
pub fn parse_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    // Rust accepts "inf" and "nan" spellings that users never mean as numbers
    if trimmed
        .chars()
        .any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
    {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}
