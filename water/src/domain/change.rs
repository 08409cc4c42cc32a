//! Validated change records
//!
//! A [`Change`] is produced by an upstream validator and handed to the
//! coordinator exactly once. Nothing in this crate mutates it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::id::generate_id;

/// Outcome category assigned by the upstream validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationCategory {
    Approved,
    Corrected,
    #[default]
    Rejected,
}

impl ValidationCategory {
    /// Whether a change with this category may be propagated
    pub fn is_propagatable(&self) -> bool {
        matches!(self, Self::Approved | Self::Corrected)
    }
}

/// Validator verdict attached to a change
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    #[serde(rename = "validation_category", default)]
    pub category: ValidationCategory,

    /// Anything else the validator reported, carried through untouched
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ValidationResult {
    pub fn approved() -> Self {
        Self {
            category: ValidationCategory::Approved,
            details: Map::new(),
        }
    }
}

/// A validated modification to one component's contract
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Change {
    pub change_id: String,
    pub origin_id: String,
    pub payload: Value,
    #[serde(default)]
    pub validation_result: ValidationResult,
}

impl Change {
    /// Create a change, taking the id from `payload.update_id` when present
    pub fn new(origin_id: impl Into<String>, payload: Value, validation_result: ValidationResult) -> Self {
        let origin_id = origin_id.into();
        let change_id = payload
            .get("update_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| generate_id("update"));
        debug!(%origin_id, %change_id, "Change::new: called");
        Self {
            change_id,
            origin_id,
            payload,
            validation_result,
        }
    }

    /// Elements the payload declares as changed
    ///
    /// Reads `ordered_components[].name`, `features[].id` and `functionalities[].id`.
    pub fn changed_elements(&self) -> Vec<ChangedElement> {
        let mut elements = Vec::new();
        let sources = [
            ("ordered_components", "name", ElementKind::Component),
            ("features", "id", ElementKind::Feature),
            ("functionalities", "id", ElementKind::Functionality),
        ];
        for (field, name_key, kind) in sources {
            let Some(items) = self.payload.get(field).and_then(Value::as_array) else {
                continue;
            };
            for item in items {
                let name = item.get(name_key).and_then(Value::as_str).unwrap_or("unknown");
                let interface = item.get("interface").and_then(Value::as_bool).unwrap_or(false);
                elements.push(ChangedElement {
                    kind,
                    name: name.to_string(),
                    interface,
                });
            }
        }
        elements
    }

    /// Whether the change alters any interface contract
    pub fn touches_interface(&self) -> bool {
        let declared = ["interfaces", "interface_changes"]
            .iter()
            .any(|key| self.payload.get(*key).is_some_and(is_present));
        declared || self.changed_elements().iter().any(|e| e.interface)
    }

    /// Whether the payload carries a field with a non-empty value
    pub fn has_field(&self, key: &str) -> bool {
        self.payload.get(key).is_some_and(is_present)
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::String(s) => !s.is_empty(),
        Value::Number(_) => true,
    }
}

/// Kind of element named in a change payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Component,
    Feature,
    Functionality,
}

/// One element a change declares as modified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedElement {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub name: String,
    #[serde(default)]
    pub interface: bool,
}
