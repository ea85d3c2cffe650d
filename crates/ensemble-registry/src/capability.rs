use serde::{Deserialize, Serialize};

/// A named operation an agent type declares it can perform.
///
/// The `name` doubles as the task type accepted by the execution engine.
/// Schemas are JSON fragments; only their `required` key lists are enforced
/// at the orchestration boundary, the rest is documentation for agent
/// implementations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapability {
    /// Capability name, used as the task type.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Declared input contract.
    pub input_schema: Option<serde_json::Value>,
    /// Declared output contract.
    pub output_schema: Option<serde_json::Value>,
}

impl AgentCapability {
    /// Creates a capability with the given name and description.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: None,
            output_schema: None,
        }
    }

    /// Declares the input contract.
    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Declares the output contract.
    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Field names the input payload must contain, per the input schema.
    pub fn required_fields(&self) -> Vec<&str> {
        self.input_schema
            .as_ref()
            .and_then(|s| s.get("required"))
            .and_then(|r| r.as_array())
            .map(|fields| fields.iter().filter_map(|f| f.as_str()).collect())
            .unwrap_or_default()
    }
}
