//! Toolscope: token-footprint auditor for stdio JSON-RPC tool services.
//! Launches each configured service as a child process, speaks the
//! initialize / tools/list handshake as a client, measures every advertised
//! tool definition, flags bloat, and renders JSON and Markdown reports.

pub mod audit;
pub mod auditor;
pub mod client;
pub mod config;
pub mod error;
pub mod report;

pub use audit::{
    AuditCollection, AuditTotals, BloatIssue, BloatKind, ServiceAudit, ServiceFailure,
    ServiceSummary, TokenEstimator, ToolAudit, ToolDefinition,
};
pub use auditor::Auditor;
pub use client::{ProcessHarness, ReadPolicy, Session, SessionPhase};
pub use config::{
    AuditConfig, Language, ReadConfig, ServerConfig, ServiceDescriptor, TimingProfile,
    parse_env_ref, resolve_env_vars,
};
pub use error::{AuditError, Result};
