//! Per-tool token measurement.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::tokens::TokenEstimator;

/// Description tokens above which a tool counts as having a long description.
pub const LONG_DESCRIPTION_TOKENS: usize = 50;

/// One tool as advertised by a service in its `tools/list` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Opaque parameter schema. Only its serialized size matters.
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

/// Token measurements for one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAudit {
    pub name: String,
    pub description: String,
    #[serde(rename = "description_tokens")]
    pub desc_tokens: usize,
    pub schema_tokens: usize,
    pub total_tokens: usize,
    #[serde(rename = "has_long_description")]
    pub has_long_desc: bool,
}

impl ToolAudit {
    /// Build from already-measured token counts, keeping the total and the
    /// long-description flag consistent with them.
    pub fn from_counts(
        name: impl Into<String>,
        description: impl Into<String>,
        desc_tokens: usize,
        schema_tokens: usize,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            desc_tokens,
            schema_tokens,
            total_tokens: desc_tokens + schema_tokens,
            has_long_desc: desc_tokens > LONG_DESCRIPTION_TOKENS,
        }
    }
}

/// Measure a tool: its description (empty when absent) and its schema
/// serialized as compact JSON. Object keys serialize in sorted order, so the
/// same schema content always yields the same count.
pub fn analyze(tool: &ToolDefinition, estimator: &TokenEstimator) -> ToolAudit {
    let description = tool.description.clone().unwrap_or_default();
    let schema_json = tool.input_schema.to_string();
    let desc_tokens = estimator.estimate(&description);
    let schema_tokens = estimator.estimate(&schema_json);
    ToolAudit::from_counts(tool.name.clone(), description, desc_tokens, schema_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, description: Option<&str>, schema: Value) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: description.map(str::to_string),
            input_schema: schema,
        }
    }

    #[test]
    fn test_small_tool() {
        // 10-character description, schema serializing to 8 characters
        let t = tool("echo", Some("0123456789"), json!({"ab": 1}));
        assert_eq!(t.input_schema.to_string().chars().count(), 8);
        let audit = analyze(&t, &TokenEstimator::new());
        assert_eq!(audit.desc_tokens, 2);
        assert_eq!(audit.schema_tokens, 2);
        assert_eq!(audit.total_tokens, 4);
        assert!(!audit.has_long_desc);
    }

    #[test]
    fn test_missing_description_is_empty() {
        let audit = analyze(&tool("t", None, json!({})), &TokenEstimator::new());
        assert_eq!(audit.description, "");
        assert_eq!(audit.desc_tokens, 0);
        assert_eq!(audit.total_tokens, audit.schema_tokens);
    }

    #[test]
    fn test_long_description_boundary() {
        let estimator = TokenEstimator::new();
        let at_threshold = analyze(&tool("a", Some(&"x".repeat(200)), json!({})), &estimator);
        assert_eq!(at_threshold.desc_tokens, 50);
        assert!(!at_threshold.has_long_desc);

        let above = analyze(&tool("b", Some(&"x".repeat(204)), json!({})), &estimator);
        assert_eq!(above.desc_tokens, 51);
        assert!(above.has_long_desc);
    }

    #[test]
    fn test_schema_key_order_does_not_matter() {
        let estimator = TokenEstimator::new();
        let a: Value = serde_json::from_str(r#"{"type":"object","properties":{"q":{"type":"string"}}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"properties":{"q":{"type":"string"}},"type":"object"}"#).unwrap();
        assert_eq!(
            analyze(&tool("a", None, a), &estimator),
            analyze(&tool("a", None, b), &estimator)
        );
    }

    #[test]
    fn test_total_is_sum() {
        let estimator = TokenEstimator::new();
        let t = tool(
            "search",
            Some("Search places by name within a bounding box and return the closest matches."),
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Free text"},
                    "limit": {"type": "integer", "minimum": 1}
                },
                "required": ["query"]
            }),
        );
        let audit = analyze(&t, &estimator);
        assert_eq!(audit.total_tokens, audit.desc_tokens + audit.schema_tokens);
    }

    #[test]
    fn test_missing_schema_deserializes_as_null() {
        let t: ToolDefinition = serde_json::from_str(r#"{"name":"bare"}"#).unwrap();
        assert_eq!(t.input_schema, Value::Null);
        assert_eq!(analyze(&t, &TokenEstimator::new()).schema_tokens, 1);
    }

    #[test]
    fn test_audit_serialized_field_names() {
        let audit = ToolAudit::from_counts("t", "d", 3, 4);
        let value = serde_json::to_value(&audit).unwrap();
        assert_eq!(value["description_tokens"], 3);
        assert_eq!(value["schema_tokens"], 4);
        assert_eq!(value["total_tokens"], 7);
        assert_eq!(value["has_long_description"], false);
    }
}
