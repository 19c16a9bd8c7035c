//! Nested record flattening.

use serde_json::{Map, Value};

/// Joins parent and child keys in flattened column names.
pub const SEPARATOR: &str = "__";

/// A single-level mapping of column path to scalar value.
pub type FlatRecord = Map<String, Value>;

/// Flattens nested objects depth first, joining keys with [`SEPARATOR`].
///
/// Arrays are rendered as their compact JSON text instead of being expanded.
/// Empty nested objects contribute no columns. Column order follows the
/// record's own key order.
pub fn flatten(record: &Map<String, Value>) -> FlatRecord {
    let mut out = FlatRecord::new();
    flatten_into(&mut out, None, record);
    out
}

fn flatten_into(out: &mut FlatRecord, parent: Option<&str>, record: &Map<String, Value>) {
    for (key, value) in record {
        let column = match parent {
            Some(parent) => format!("{parent}{SEPARATOR}{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) => flatten_into(out, Some(&column), nested),
            Value::Array(_) => {
                out.insert(column, Value::String(value.to_string()));
            }
            scalar => {
                out.insert(column, scalar.clone());
            }
        }
    }
}
