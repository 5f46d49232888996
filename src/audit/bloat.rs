//! Threshold-based bloat detection over a service's analyzed tools.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::audit::analyzer::ToolAudit;

/// Description tokens above which a tool is flagged `verbose_description`.
pub const VERBOSE_DESCRIPTION_TOKENS: usize = 100;

/// Schema tokens above which a tool is flagged `large_schema`.
pub const LARGE_SCHEMA_TOKENS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BloatKind {
    VerboseDescription,
    LargeSchema,
}

impl BloatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BloatKind::VerboseDescription => "verbose_description",
            BloatKind::LargeSchema => "large_schema",
        }
    }

    /// Heading form, e.g. "Verbose Description".
    pub fn title(&self) -> &'static str {
        match self {
            BloatKind::VerboseDescription => "Verbose Description",
            BloatKind::LargeSchema => "Large Schema",
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            BloatKind::VerboseDescription => {
                "Consider breaking into sections or using more concise language"
            }
            BloatKind::LargeSchema => "Consider simplifying parameter structure or descriptions",
        }
    }
}

impl fmt::Display for BloatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One flagged tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloatIssue {
    #[serde(rename = "type")]
    pub kind: BloatKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    pub tokens: usize,
    pub suggestion: String,
}

impl BloatIssue {
    fn new(kind: BloatKind, tool: &str, tokens: usize) -> Self {
        let description = match kind {
            BloatKind::VerboseDescription => {
                format!("Tool '{}' has very long description ({} tokens)", tool, tokens)
            }
            BloatKind::LargeSchema => {
                format!("Tool '{}' has large input schema ({} tokens)", tool, tokens)
            }
        };
        Self {
            kind,
            description,
            tool_name: tool.to_string(),
            tokens,
            suggestion: kind.suggestion().to_string(),
        }
    }
}

/// Scan tools in order. A tool contributes a description issue, a schema
/// issue, both (description first), or neither.
pub fn detect(tools: &[ToolAudit]) -> Vec<BloatIssue> {
    let mut issues = Vec::new();
    for tool in tools {
        if tool.desc_tokens > VERBOSE_DESCRIPTION_TOKENS {
            issues.push(BloatIssue::new(
                BloatKind::VerboseDescription,
                &tool.name,
                tool.desc_tokens,
            ));
        }
        if tool.schema_tokens > LARGE_SCHEMA_TOKENS {
            issues.push(BloatIssue::new(
                BloatKind::LargeSchema,
                &tool.name,
                tool.schema_tokens,
            ));
        }
    }
    issues
}
