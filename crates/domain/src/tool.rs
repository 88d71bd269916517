use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool invocation requested by the model (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// Tool definition exposed to the model adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
    /// If present, this tool is a yielding tool: the reasoning loop emits
    /// `tool_yield` instead of executing immediately and suspends until a
    /// `tool_input` matching this schema is injected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yield_schema: Option<Value>,
}

impl ToolDefinition {
    pub fn yields(&self) -> bool {
        self.yield_schema.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_yielding_tool_has_no_yield_schema() {
        let def = ToolDefinition {
            name: "add".into(),
            description: "add two numbers".into(),
            parameters: serde_json::json!({"type": "object"}),
            yield_schema: None,
        };
        assert!(!def.yields());
    }

    #[test]
    fn yielding_tool_reports_yields() {
        let def = ToolDefinition {
            name: "approve".into(),
            description: "ask a human to approve".into(),
            parameters: serde_json::json!({"type": "object"}),
            yield_schema: Some(serde_json::json!({"type": "object", "properties": {"approved": {"type": "boolean"}}})),
        };
        assert!(def.yields());
    }
}
