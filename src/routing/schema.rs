//! Structured output schema for execution plans
//!
//! The planner asks the model for exactly this JSON shape. The schema is
//! generated with `schemars` and attached as a JSON-schema response format
//! on providers that support it.

use crate::routing::handler_kind::HandlerKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Raw plan as returned by the planner model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionPlanOutput {
    /// Ordered handler names, e.g. `["Retrieval", "Image"]`
    pub execution_order: Vec<String>,

    /// Short justification (for observability only)
    #[serde(default)]
    pub reasoning: String,
}

impl ExecutionPlanOutput {
    /// Validate that the plan has at least one step
    pub fn validate(&self) -> Result<(), String> {
        if self.execution_order.is_empty() {
            return Err("execution_order must contain at least one handler".to_string());
        }
        Ok(())
    }

    /// Normalize raw names into handler kinds
    pub fn handler_kinds(&self) -> Vec<HandlerKind> {
        self.execution_order
            .iter()
            .map(|name| HandlerKind::normalize(name))
            .collect()
    }

    /// Generate the JSON schema for this structure
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(ExecutionPlanOutput);
        serde_json::to_value(schema).unwrap_or_default()
    }
}
