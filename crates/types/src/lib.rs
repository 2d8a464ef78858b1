use std::fmt;

/// Declared column types supported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SqlType {
    #[serde(rename = "INTEGER")]
    Integer,
    #[serde(rename = "TEXT")]
    Text,
}

impl SqlType {
    /// Parse a declared type name as it appears in DDL (`INTEGER`, `TEXT`).
    pub fn from_declared(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" => Some(Self::Integer),
            "TEXT" => Some(Self::Text),
            _ => None,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Text => write!(f, "TEXT"),
        }
    }
}

/// Dynamic cell type carried in records, VM registers, and result rows.
///
/// `Blob` holds raw byte strings such as encoded records; it never appears
/// in a stored column, only in transit through the register file.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Int(i64),
    Text(String),
    Blob(Vec<u8>),
    Null,
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Render the cell for a result row. `None` preserves SQL NULL.
    pub fn to_result_cell(&self) -> Option<String> {
        match self {
            Value::Int(v) => Some(v.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Blob(b) => Some(format!("x'{}'", hex_lower(b))),
            Value::Null => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn declared_type_names_parse() {
        assert_eq!(SqlType::from_declared("INTEGER"), Some(SqlType::Integer));
        assert_eq!(SqlType::from_declared("int"), Some(SqlType::Integer));
        assert_eq!(SqlType::from_declared("Text"), Some(SqlType::Text));
        assert_eq!(SqlType::from_declared("BLOB"), None);
    }

    #[test]
    fn result_cells_preserve_null() {
        assert_eq!(Value::Int(42).to_result_cell(), Some("42".into()));
        assert_eq!(Value::Text("ada".into()).to_result_cell(), Some("ada".into()));
        assert_eq!(Value::Null.to_result_cell(), None);
    }

    #[test]
    fn accessors_are_type_strict() {
        assert_eq!(Value::Int(1).as_int(), Some(1));
        assert_eq!(Value::Text("1".into()).as_int(), None);
        assert_eq!(Value::Int(1).as_text(), None);
        assert!(Value::Null.is_null());
        assert!(!Value::Int(0).is_null());
    }

    #[test]
    fn serde_round_trip_stability() {
        let vals = vec![
            Value::Int(-42),
            Value::Text("Ada".into()),
            Value::Blob(vec![0xde, 0xad]),
            Value::Null,
        ];

        let json = serde_json::to_string(&vals).unwrap();
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();

        assert_eq!(vals, back);
    }

    proptest! {
        #[test]
        fn int_cells_render_as_decimal(v in any::<i64>()) {
            prop_assert_eq!(Value::Int(v).to_result_cell(), Some(v.to_string()));
        }

        #[test]
        fn text_cells_render_verbatim(s in ".*") {
            prop_assert_eq!(Value::Text(s.clone()).to_result_cell(), Some(s));
        }
    }
}
