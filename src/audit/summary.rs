//! Per-service summaries and cross-service totals.

use serde::{Deserialize, Serialize};

use crate::audit::analyzer::{ToolAudit, ToolDefinition, analyze};
use crate::audit::bloat::{BloatIssue, detect};
use crate::audit::tokens::TokenEstimator;
use crate::config::Language;
use crate::error::AuditError;

/// Aggregate figures over one service's tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub tool_count: usize,
    pub avg_tokens_per_tool: usize,
    pub max_tokens_per_tool: usize,
    /// Smallest nonzero per-tool total; 0 when there is none.
    pub min_tokens_per_tool: usize,
    #[serde(rename = "long_description_tools")]
    pub long_desc_tools: usize,
}

/// Summarize a service's tools. Tools measured at zero tokens do not take
/// part in the minimum.
pub fn summarize(tools: &[ToolAudit]) -> ServiceSummary {
    let tool_count = tools.len();
    let total: usize = tools.iter().map(|t| t.total_tokens).sum();
    let max_tokens_per_tool = tools.iter().map(|t| t.total_tokens).max().unwrap_or(0);
    let min_tokens_per_tool = tools
        .iter()
        .map(|t| t.total_tokens)
        .filter(|&tokens| tokens > 0)
        .min()
        .unwrap_or(0);
    let long_desc_tools = tools.iter().filter(|t| t.has_long_desc).count();
    let avg_tokens_per_tool = if tool_count > 0 { total / tool_count } else { 0 };

    ServiceSummary {
        tool_count,
        avg_tokens_per_tool,
        max_tokens_per_tool,
        min_tokens_per_tool,
        long_desc_tools,
    }
}

/// Full audit of one successfully listed service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAudit {
    pub name: String,
    pub language: Language,
    /// In the order the service returned them.
    pub tools: Vec<ToolAudit>,
    pub total_tokens: usize,
    pub summary: ServiceSummary,
    #[serde(rename = "bloat_issues")]
    pub bloat: Vec<BloatIssue>,
}

impl ServiceAudit {
    /// Analyze every tool, then summarize and detect bloat.
    pub fn build(
        name: impl Into<String>,
        language: Language,
        tools: &[ToolDefinition],
        estimator: &TokenEstimator,
    ) -> Self {
        let tools: Vec<ToolAudit> = tools.iter().map(|t| analyze(t, estimator)).collect();
        Self::from_tool_audits(name, language, tools)
    }

    pub fn from_tool_audits(
        name: impl Into<String>,
        language: Language,
        tools: Vec<ToolAudit>,
    ) -> Self {
        let total_tokens = tools.iter().map(|t| t.total_tokens).sum();
        let summary = summarize(&tools);
        let bloat = detect(&tools);
        Self {
            name: name.into(),
            language,
            tools,
            total_tokens,
            summary,
            bloat,
        }
    }

    pub fn bloat_tokens(&self) -> usize {
        self.bloat.iter().map(|issue| issue.tokens).sum()
    }
}

/// Figures across every successfully audited service.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditTotals {
    pub services: usize,
    pub tools: usize,
    pub total_tokens: usize,
    pub bloat_issues: usize,
    pub bloat_tokens: usize,
}

impl AuditTotals {
    /// Average tokens per tool across all services, `None` with no tools.
    pub fn avg_tokens_per_tool(&self) -> Option<usize> {
        (self.tools > 0).then(|| self.total_tokens / self.tools)
    }

    /// Bloat tokens as a percentage of all tokens, `None` when there are no tokens.
    pub fn bloat_percentage(&self) -> Option<f64> {
        (self.total_tokens > 0)
            .then(|| self.bloat_tokens as f64 / self.total_tokens as f64 * 100.0)
    }
}

/// Sum per-service totals. Failed services never reach this point.
pub fn aggregate(audits: &[ServiceAudit]) -> AuditTotals {
    audits.iter().fold(AuditTotals::default(), |mut totals, audit| {
        totals.services += 1;
        totals.tools += audit.summary.tool_count;
        totals.total_tokens += audit.total_tokens;
        totals.bloat_issues += audit.bloat.len();
        totals.bloat_tokens += audit.bloat_tokens();
        totals
    })
}

/// A service whose audit did not produce a `ServiceAudit`.
#[derive(Debug)]
pub struct ServiceFailure {
    pub name: String,
    pub language: Language,
    pub error: AuditError,
}

/// Append-only fold of audit outcomes. Completion order does not matter.
#[derive(Debug, Default)]
pub struct AuditCollection {
    pub audits: Vec<ServiceAudit>,
    pub failures: Vec<ServiceFailure>,
}

impl AuditCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &str, language: &Language, outcome: crate::Result<ServiceAudit>) {
        match outcome {
            Ok(audit) => self.audits.push(audit),
            Err(error) => self.failures.push(ServiceFailure {
                name: name.to_string(),
                language: language.clone(),
                error,
            }),
        }
    }

    pub fn totals(&self) -> AuditTotals {
        aggregate(&self.audits)
    }
}
