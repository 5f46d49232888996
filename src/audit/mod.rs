//! Deterministic audit logic: token estimates per tool, bloat thresholds, and
//! per-service and cross-service aggregation. Nothing here does I/O.

pub mod analyzer;
pub mod bloat;
pub mod summary;
pub mod tokens;

pub use analyzer::{LONG_DESCRIPTION_TOKENS, ToolAudit, ToolDefinition, analyze};
pub use bloat::{BloatIssue, BloatKind, LARGE_SCHEMA_TOKENS, VERBOSE_DESCRIPTION_TOKENS, detect};
pub use summary::{
    AuditCollection, AuditTotals, ServiceAudit, ServiceFailure, ServiceSummary, aggregate,
    summarize,
};
pub use tokens::TokenEstimator;
