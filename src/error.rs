//! Error types for toolscope audit operations.
//!
//! Every variant past config validation is scoped to one service: the auditor
//! records it against that service and carries on with the rest.

use std::time::Duration;

use thiserror::Error;

use crate::client::session::SessionPhase;

/// Main error type for toolscope operations
#[derive(Error, Debug)]
pub enum AuditError {
    /// Duplicate service name found in config
    #[error("duplicate service name: {0}")]
    DuplicateService(String),

    /// Invalid configuration for a named service
    #[error("invalid config for service '{0}': {1}")]
    InvalidConfig(String, String),

    /// Working directory or executable unusable
    #[error("failed to start service '{0}': {1}")]
    Start(String, String),

    /// Process exited during warm-up, before any protocol traffic
    #[error("service '{0}' exited early ({1})")]
    ExitedEarly(String, String),

    /// `initialize` could not be sent or its response could not be read
    #[error("initialize failed for service '{0}': {1}")]
    Handshake(String, String),

    /// `tools/list` could not be sent or its response could not be read
    #[error("failed to read tools/list response from service '{0}': {1}")]
    Read(String, String),

    /// The service answered with an explicit error payload
    #[error("tools/list error from service '{0}': {1}")]
    Protocol(String, String),

    /// The result payload is not a tool list
    #[error("failed to parse tools list from service '{0}': {1}")]
    Decode(String, String),

    /// Session deadline elapsed before the exchange completed
    #[error("timeout after {1:?} waiting for service '{0}' (last phase: {2})")]
    Timeout(String, Duration, SessionPhase),

    /// The audit run was cancelled while this service was in flight
    #[error("audit of service '{0}' cancelled")]
    Cancelled(String),

    /// Writing an output artifact failed
    #[error("report error: {0}")]
    Report(String),
}

impl AuditError {
    /// Name of the service this error belongs to, if any.
    pub fn service(&self) -> Option<&str> {
        match self {
            AuditError::DuplicateService(s)
            | AuditError::InvalidConfig(s, _)
            | AuditError::Start(s, _)
            | AuditError::ExitedEarly(s, _)
            | AuditError::Handshake(s, _)
            | AuditError::Read(s, _)
            | AuditError::Protocol(s, _)
            | AuditError::Decode(s, _)
            | AuditError::Timeout(s, _, _)
            | AuditError::Cancelled(s) => Some(s),
            AuditError::Report(_) => None,
        }
    }
}

/// Result type alias for toolscope operations
pub type Result<T> = std::result::Result<T, AuditError>;
