//! One bounded audit session: start the service, warm up, `initialize`, then
//! `tools/list`, all raced against a wall-clock deadline.
//!
//! Phase transitions: NotStarted → Started → Initialized → ToolsListed, or
//! Failed from any phase. The exchange runs in a spawned task; the driver
//! races it against the deadline and the run's cancellation token, and
//! reclaims the process whichever branch wins.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::audit::analyzer::ToolDefinition;
use crate::client::diagnostics::{SharedDiagnostics, shared_buffer, start_diagnostic_drain};
use crate::client::harness::{ManagedProcess, ProcessHarness};
use crate::client::protocol::{
    JsonRpcRequest, JsonRpcResponse, ProtocolClient, ReadError, ReadPolicy, ResponsePayload,
};
use crate::config::ServiceDescriptor;
use crate::error::AuditError;

/// Protocol version announced in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name announced in `initialize`.
pub const CLIENT_NAME: &str = "toolscope";

/// How long an early exit waits for the last stderr lines.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Where a session is in its exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NotStarted,
    Started,
    Initialized,
    ToolsListed,
    Failed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::NotStarted => "not_started",
            SessionPhase::Started => "started",
            SessionPhase::Initialized => "initialized",
            SessionPhase::ToolsListed => "tools_listed",
            SessionPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    /// A `null` list (a nil slice from Go servers) means no tools.
    #[serde(default)]
    tools: Option<Vec<ToolDefinition>>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

/// `initialize` parameters: protocol version, no capabilities, client identity.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// A single audit session for one service.
pub struct Session {
    descriptor: ServiceDescriptor,
    policy: ReadPolicy,
    cancel: CancellationToken,
    phase_tx: Arc<watch::Sender<SessionPhase>>,
}

impl Session {
    pub fn new(descriptor: ServiceDescriptor, policy: ReadPolicy) -> Self {
        let (phase_tx, _) = watch::channel(SessionPhase::NotStarted);
        Self {
            descriptor,
            policy,
            cancel: CancellationToken::new(),
            phase_tx: Arc::new(phase_tx),
        }
    }

    /// Abort the session (with `AuditError::Cancelled`) when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        *self.phase_tx.borrow()
    }

    /// Watch phase transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase_tx.subscribe()
    }

    fn set_phase(&self, phase: SessionPhase) {
        tracing::debug!(server = %self.descriptor.name, phase = %phase, "session phase");
        self.phase_tx.send_replace(phase);
    }

    /// Run the session to completion, returning the advertised tools in
    /// server order.
    ///
    /// The process is shut down on every path once started, including when
    /// the deadline or cancellation wins the race.
    pub async fn run(&self) -> crate::Result<Vec<ToolDefinition>> {
        let started_at = Instant::now();

        let mut process = match ProcessHarness::start(&self.descriptor) {
            Ok(process) => process,
            Err(e) => {
                self.set_phase(SessionPhase::Failed);
                return Err(e);
            }
        };
        self.set_phase(SessionPhase::Started);

        let deadline = started_at + self.descriptor.timing.timeout;
        let outcome = self.drive(&mut process, deadline).await;
        process.shutdown().await;

        match &outcome {
            Ok(_) => self.set_phase(SessionPhase::ToolsListed),
            Err(_) => self.set_phase(SessionPhase::Failed),
        }
        outcome
    }

    async fn drive(
        &self,
        process: &mut ManagedProcess,
        deadline: Instant,
    ) -> crate::Result<Vec<ToolDefinition>> {
        let name = self.descriptor.name.clone();
        let pipes = process.take_pipes().ok_or_else(|| {
            AuditError::Start(name.clone(), "service pipes already taken".to_string())
        })?;

        // Drained from the start so warm-up crashes can quote stderr
        let diagnostics = shared_buffer();
        let drain_cancel = CancellationToken::new();
        let mut drain = start_diagnostic_drain(
            pipes.diagnostics,
            name.clone(),
            diagnostics.clone(),
            drain_cancel.clone(),
        );

        let expired = tokio::time::sleep_until(deadline.into());
        tokio::pin!(expired);

        let warmed = tokio::select! {
            warmed = process.warm_up(self.descriptor.timing.warmup) => warmed,
            _ = &mut expired => Err(self.timed_out()),
            _ = self.cancel.cancelled() => Err(AuditError::Cancelled(name.clone())),
        };
        if let Err(e) = warmed {
            let e = match e {
                AuditError::ExitedEarly(name, detail) => {
                    // The process is gone, so stderr reaches end-of-stream shortly
                    let _ = tokio::time::timeout(EXIT_DRAIN_GRACE, &mut drain).await;
                    let detail = match diagnostics.lock().await.context() {
                        Some(context) => format!("{}; stderr: {}", detail, context),
                        None => detail,
                    };
                    AuditError::ExitedEarly(name, detail)
                }
                other => other,
            };
            drain_cancel.cancel();
            return Err(e);
        }

        let mut task = tokio::spawn(exchange(
            name.clone(),
            pipes.responses,
            pipes.requests,
            self.policy,
            diagnostics,
            self.phase_tx.clone(),
        ));

        let outcome = tokio::select! {
            joined = &mut task => match joined {
                Ok(result) => result,
                Err(e) => Err(AuditError::Read(name.clone(), format!("exchange task failed: {}", e))),
            },
            _ = &mut expired => {
                task.abort();
                let _ = task.await;
                Err(self.timed_out())
            }
            _ = self.cancel.cancelled() => {
                task.abort();
                let _ = task.await;
                Err(AuditError::Cancelled(name.clone()))
            }
        };

        drain_cancel.cancel();
        outcome
    }

    fn timed_out(&self) -> AuditError {
        AuditError::Timeout(
            self.descriptor.name.clone(),
            self.descriptor.timing.timeout,
            self.phase(),
        )
    }
}

/// The two-step exchange over already-open streams.
///
/// `initialize` strictly precedes `tools/list`: the second request is only
/// sent once the first response has been read.
pub async fn exchange<R, W>(
    name: String,
    responses: R,
    requests: W,
    policy: ReadPolicy,
    diagnostics: SharedDiagnostics,
    phase: Arc<watch::Sender<SessionPhase>>,
) -> crate::Result<Vec<ToolDefinition>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut client = ProtocolClient::new(name.clone(), responses, requests, policy);

    let init = client.request("initialize", Some(initialize_params()));
    client.send(&init).await.map_err(|e| {
        AuditError::Handshake(name.clone(), format!("failed to send initialize: {}", e))
    })?;
    let response = match client.receive().await {
        Ok(response) => response,
        Err(e) => {
            return Err(AuditError::Handshake(
                name.clone(),
                with_diagnostics(e, &diagnostics).await,
            ));
        }
    };
    check_response(&name, &init, &response);
    // Only the arrival of the initialize response matters, not its content
    if let ResponsePayload::Error(err) = &response.payload {
        tracing::warn!(server = %name, code = err.code, message = %err.message, "initialize answered with an error payload");
    }
    tracing::debug!(server = %name, phase = %SessionPhase::Initialized, "session phase");
    phase.send_replace(SessionPhase::Initialized);

    let list = client.request("tools/list", None);
    client.send(&list).await.map_err(|e| {
        AuditError::Read(name.clone(), format!("failed to send tools/list: {}", e))
    })?;
    let response = match client.receive().await {
        Ok(response) => response,
        Err(e) => {
            return Err(AuditError::Read(
                name.clone(),
                with_diagnostics(e, &diagnostics).await,
            ));
        }
    };
    check_response(&name, &list, &response);

    let result = response
        .into_result()
        .map_err(|err| AuditError::Protocol(name.clone(), err.message))?;
    if result.is_null() {
        return Ok(Vec::new());
    }
    let listed: ListToolsResult = serde_json::from_value(result)
        .map_err(|e| AuditError::Decode(name.clone(), e.to_string()))?;
    if listed.next_cursor.is_some() {
        tracing::warn!(server = %name, "server paginates tools/list; only the first page is audited");
    }
    Ok(listed.tools.unwrap_or_default())
}

fn check_response(name: &str, request: &JsonRpcRequest, response: &JsonRpcResponse) {
    if !response.answers(request.id) {
        tracing::warn!(
            server = %name,
            method = %request.method,
            expected = request.id,
            got = ?response.id,
            "response id does not match request id"
        );
    }
}

/// Read error text, followed by captured stderr when there is any.
async fn with_diagnostics(err: ReadError, diagnostics: &SharedDiagnostics) -> String {
    match diagnostics.lock().await.context() {
        Some(context) => format!("{}; stderr: {}", err, context),
        None => err.to_string(),
    }
}
