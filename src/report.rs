//! Report rendering: the JSON artifact, the Markdown report, and the short
//! console summary. Rendering only; callers decide where the text goes.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use chrono::{DateTime, Local};

use crate::audit::{AuditTotals, BloatIssue, BloatKind, ServiceAudit, ToolAudit, aggregate};
use crate::error::AuditError;

/// Worst offenders listed per bloat kind.
const TOP_ISSUES_PER_KIND: usize = 5;

/// Tools listed in the "heaviest tools" section.
const TOP_TOOLS: usize = 10;

/// Bloat tokens above which the report adds a high-priority block.
const HIGH_PRIORITY_BLOAT_TOKENS: usize = 500;

/// Pretty-printed JSON array of service audits.
pub fn render_json(audits: &[ServiceAudit]) -> crate::Result<String> {
    serde_json::to_string_pretty(audits).map_err(|e| AuditError::Report(e.to_string()))
}

/// Write the JSON report to `path`, replacing any existing file.
pub async fn write_json_report(path: &Path, audits: &[ServiceAudit]) -> crate::Result<()> {
    let json = render_json(audits)?;
    write_artifact(path, json).await
}

/// Write the Markdown report to `path`, replacing any existing file.
pub async fn write_markdown_report(
    path: &Path,
    audits: &[ServiceAudit],
    generated_at: DateTime<Local>,
) -> crate::Result<()> {
    write_artifact(path, render_markdown(audits, generated_at)).await
}

async fn write_artifact(path: &Path, content: String) -> crate::Result<()> {
    tokio::fs::write(path, content)
        .await
        .map_err(|e| AuditError::Report(format!("failed to write {}: {}", path.display(), e)))?;
    tracing::debug!(path = %path.display(), "report written");
    Ok(())
}

/// Human-readable Markdown report.
pub fn render_markdown(audits: &[ServiceAudit], generated_at: DateTime<Local>) -> String {
    let totals = aggregate(audits);
    let mut out = String::with_capacity(4096);

    let _ = writeln!(out, "# Tool Surface Token Audit Report\n");
    let _ = writeln!(
        out,
        "Generated on: {}\n",
        generated_at.format("%Y-%m-%d %H:%M:%S")
    );

    write_executive_summary(&mut out, &totals);
    write_server_breakdown(&mut out, audits);
    write_bloat_issues(&mut out, audits, &totals);
    write_heaviest_tools(&mut out, audits);
    write_recommendations(&mut out, &totals);

    out
}

fn write_executive_summary(out: &mut String, totals: &AuditTotals) {
    let _ = writeln!(out, "## Executive Summary\n");
    let _ = writeln!(
        out,
        "**This audit connects directly to each server as a client and measures the tool definitions it actually advertises.**\n"
    );
    let _ = writeln!(out, "- **Total Servers Audited**: {}", totals.services);
    let _ = writeln!(out, "- **Total Tools**: {}", totals.tools);
    let _ = writeln!(out, "- **Total Token Usage**: ~{} tokens", totals.total_tokens);
    if let Some(avg) = totals.avg_tokens_per_tool() {
        let _ = writeln!(out, "- **Average Tokens per Tool**: ~{} tokens", avg);
    }
    out.push('\n');
}

fn write_server_breakdown(out: &mut String, audits: &[ServiceAudit]) {
    let mut sorted: Vec<&ServiceAudit> = audits.iter().collect();
    sorted.sort_by_key(|audit| Reverse(audit.total_tokens));

    let _ = writeln!(out, "## Server Breakdown\n");
    for (i, audit) in sorted.iter().enumerate() {
        let _ = writeln!(out, "### {}. {} ({})", i + 1, audit.name, audit.language);
        let _ = writeln!(out, "- **Total Tokens**: {}", audit.total_tokens);
        let _ = writeln!(out, "- **Tools**: {}", audit.summary.tool_count);
        if audit.summary.tool_count > 0 {
            let _ = writeln!(
                out,
                "- **Avg Tokens/Tool**: {}",
                audit.summary.avg_tokens_per_tool
            );
            let _ = writeln!(
                out,
                "- **Token Range**: {} - {}",
                audit.summary.min_tokens_per_tool, audit.summary.max_tokens_per_tool
            );
        }
        let _ = writeln!(
            out,
            "- **Long Descriptions**: {} tools (>50 tokens)\n",
            audit.summary.long_desc_tools
        );
    }
}

fn write_bloat_issues(out: &mut String, audits: &[ServiceAudit], totals: &AuditTotals) {
    let _ = writeln!(out, "## Bloat Issues\n");

    if totals.bloat_tokens == 0 {
        let _ = writeln!(out, "No significant bloat issues detected!\n");
        return;
    }

    let _ = writeln!(
        out,
        "**Total Potential Optimization**: ~{} tokens ({:.1}% of total)\n",
        totals.bloat_tokens,
        totals.bloat_percentage().unwrap_or(0.0)
    );

    let mut by_kind: BTreeMap<BloatKind, Vec<&BloatIssue>> = BTreeMap::new();
    for issue in audits.iter().flat_map(|audit| audit.bloat.iter()) {
        by_kind.entry(issue.kind).or_default().push(issue);
    }

    for (kind, mut issues) in by_kind {
        let _ = writeln!(out, "### {} ({} issues)", kind.title(), issues.len());
        issues.sort_by_key(|issue| Reverse(issue.tokens));
        for issue in issues.iter().take(TOP_ISSUES_PER_KIND) {
            let _ = writeln!(
                out,
                "- **{}** - {} ({} tokens)",
                issue.tool_name, issue.description, issue.tokens
            );
            let _ = writeln!(out, "  *Suggestion*: {}", issue.suggestion);
        }
        if issues.len() > TOP_ISSUES_PER_KIND {
            let _ = writeln!(
                out,
                "  ... and {} more",
                issues.len() - TOP_ISSUES_PER_KIND
            );
        }
        out.push('\n');
    }
}

fn write_heaviest_tools(out: &mut String, audits: &[ServiceAudit]) {
    let mut all: Vec<(&str, &ToolAudit)> = audits
        .iter()
        .flat_map(|audit| audit.tools.iter().map(move |tool| (audit.name.as_str(), tool)))
        .collect();
    all.sort_by_key(|(_, tool)| Reverse(tool.total_tokens));

    let _ = writeln!(out, "## Heaviest Tools\n");
    for (i, (server, tool)) in all.iter().take(TOP_TOOLS).enumerate() {
        let _ = writeln!(
            out,
            "{}. **{}** ({}): {} tokens",
            i + 1,
            tool.name,
            server,
            tool.total_tokens
        );
        let _ = writeln!(out, "   - Description: {} tokens", tool.desc_tokens);
        let _ = writeln!(out, "   - Schema: {} tokens\n", tool.schema_tokens);
    }
}

fn write_recommendations(out: &mut String, totals: &AuditTotals) {
    let _ = writeln!(out, "## Optimization Recommendations\n");

    if totals.bloat_tokens > HIGH_PRIORITY_BLOAT_TOKENS {
        let _ = writeln!(out, "### High Priority");
        let _ = writeln!(
            out,
            "- **Immediate action recommended** - significant token usage detected"
        );
        let _ = writeln!(out, "- Focus on tools with >100 token descriptions");
        let _ = writeln!(out, "- Consider simplifying complex parameter schemas\n");
    }

    let _ = writeln!(out, "### General Recommendations");
    let _ = writeln!(
        out,
        "- **Tool Descriptions**: Keep under 50 tokens when possible"
    );
    let _ = writeln!(
        out,
        "- **Parameter Schemas**: Simplify complex nested structures"
    );
    let _ = writeln!(
        out,
        "- **Parameter Descriptions**: Use concise, clear language"
    );
    let _ = writeln!(out, "- **Tool Count**: Evaluate if all tools are necessary\n");

    let _ = writeln!(out, "### Methodology Notes");
    let _ = writeln!(
        out,
        "- **Measured as a client**: tool definitions come from each server's own `tools/list` response"
    );
    let _ = writeln!(
        out,
        "- **Token estimates**: ~4 characters per token, a deterministic approximation"
    );
}

/// Closing lines printed to the console after a run.
pub fn console_summary(totals: &AuditTotals) -> String {
    let rule = "=".repeat(60);
    let mut out = String::new();
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "TOOL SURFACE AUDIT SUMMARY");
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(
        out,
        "Total tokens across {} servers: ~{} tokens",
        totals.services, totals.total_tokens
    );
    if totals.bloat_tokens > 0 {
        let _ = writeln!(
            out,
            "Potential optimization: ~{} tokens ({:.1}%)",
            totals.bloat_tokens,
            totals.bloat_percentage().unwrap_or(0.0)
        );
    }
    let _ = write!(out, "{}", rule);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Language;
    use chrono::TimeZone;

    fn tool(name: &str, desc: usize, schema: usize) -> ToolAudit {
        ToolAudit::from_counts(name, "", desc, schema)
    }

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 14, 9, 30, 0).unwrap()
    }

    fn sample() -> Vec<ServiceAudit> {
        vec![
            ServiceAudit::from_tool_audits("small", Language::Go, vec![tool("ping", 2, 2)]),
            ServiceAudit::from_tool_audits(
                "big",
                Language::Python,
                vec![tool("describe", 150, 20), tool("query", 10, 450)],
            ),
        ]
    }

    #[test]
    fn test_json_round_trips_field_names() {
        let json = render_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[1]["name"], "big");
        assert_eq!(value[1]["bloat_issues"][0]["type"], "verbose_description");
        assert_eq!(value[1]["tools"][1]["schema_tokens"], 450);
    }

    #[test]
    fn test_markdown_orders_servers_by_tokens() {
        let md = render_markdown(&sample(), fixed_time());
        assert!(md.contains("Generated on: 2026-10-14 09:30:00"));
        let big = md.find("### 1. big (Python)").expect("big ranked first");
        let small = md.find("### 2. small (Go)").expect("small ranked second");
        assert!(big < small);
        assert!(md.contains("- **Total Tools**: 3"));
    }

    #[test]
    fn test_markdown_bloat_section() {
        let md = render_markdown(&sample(), fixed_time());
        assert!(md.contains("### Verbose Description (1 issues)"));
        assert!(md.contains("### Large Schema (1 issues)"));
        assert!(md.contains("**Total Potential Optimization**: ~600 tokens"));
        assert!(md.contains("### High Priority"));
    }

    #[test]
    fn test_markdown_without_bloat() {
        let audits = vec![ServiceAudit::from_tool_audits(
            "tidy",
            Language::Go,
            vec![tool("a", 5, 5)],
        )];
        let md = render_markdown(&audits, fixed_time());
        assert!(md.contains("No significant bloat issues detected!"));
        assert!(!md.contains("### High Priority"));
    }

    #[test]
    fn test_markdown_truncates_issue_lists() {
        let tools: Vec<ToolAudit> = (0..7).map(|i| tool(&format!("t{}", i), 0, 201 + i)).collect();
        let audits = vec![ServiceAudit::from_tool_audits("wide", Language::Go, tools)];
        let md = render_markdown(&audits, fixed_time());
        assert!(md.contains("### Large Schema (7 issues)"));
        assert!(md.contains("... and 2 more"));
        // Worst offender first
        let t6 = md.find("- **t6**").unwrap();
        let t5 = md.find("- **t5**").unwrap();
        assert!(t6 < t5);
        assert!(!md.contains("- **t0**"));
    }

    #[test]
    fn test_heaviest_tools_capped_at_ten() {
        let tools: Vec<ToolAudit> = (0..12).map(|i| tool(&format!("t{}", i), i, 0)).collect();
        let audits = vec![ServiceAudit::from_tool_audits("many", Language::Go, tools)];
        let md = render_markdown(&audits, fixed_time());
        assert!(md.contains("1. **t11** (many): 11 tokens"));
        assert!(md.contains("10. **t2** (many): 2 tokens"));
        assert!(!md.contains("**t1** (many)"));
    }

    #[tokio::test]
    async fn test_write_reports() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("report.json");
        let md_path = dir.path().join("report.md");

        write_json_report(&json_path, &sample()).await.unwrap();
        write_markdown_report(&md_path, &sample(), fixed_time())
            .await
            .unwrap();

        let json = std::fs::read_to_string(&json_path).unwrap();
        let parsed: Vec<ServiceAudit> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sample());
        let md = std::fs::read_to_string(&md_path).unwrap();
        assert!(md.starts_with("# Tool Surface Token Audit Report"));
    }

    #[tokio::test]
    async fn test_write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent").join("report.json");
        let result = write_json_report(&path, &sample()).await;
        assert!(matches!(result, Err(AuditError::Report(_))));
    }

    #[test]
    fn test_console_summary() {
        let totals = aggregate(&sample());
        let text = console_summary(&totals);
        assert!(text.contains("Total tokens across 2 servers: ~634 tokens"));
        assert!(text.contains("Potential optimization: ~600 tokens"));
    }
}
