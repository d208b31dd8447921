//! Raw submitted field values.
//!
//! The engine only ever reads these. Submission and import collaborators
//! write them through the store.

use crate::types::FieldId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// All field values of one facility for one month, keyed by field id.
pub type FieldValues = HashMap<FieldId, FieldValue>;

/// A single typed datum as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Structured(serde_json::Value),
}

impl FieldValue {
    /// Numeric view of the value. Booleans count as 1/0 and numeric text is
    /// parsed; structured values have no numeric meaning.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) if n.is_finite() => Some(*n),
            FieldValue::Number(_) => None,
            FieldValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            FieldValue::Structured(_) => None,
        }
    }

    /// Whether the value signals "present / yes" for condition checks.
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Number(n) => *n > 0.0,
            FieldValue::Boolean(b) => *b,
            FieldValue::Text(s) => {
                let s = s.trim().to_ascii_lowercase();
                match s.parse::<f64>() {
                    Ok(n) => n > 0.0,
                    Err(_) => !s.is_empty() && !matches!(s.as_str(), "no" | "false" | "n"),
                }
            }
            FieldValue::Structured(v) => match v {
                serde_json::Value::Null => false,
                serde_json::Value::Array(a) => !a.is_empty(),
                serde_json::Value::Object(o) => !o.is_empty(),
                _ => true,
            },
        }
    }
}
