//! Protocol client side of an audit: the child-process harness, the
//! newline-delimited JSON-RPC client, stderr capture, and the bounded session
//! that ties them together.
//!
//! Each session owns its process and pipes exclusively. Nothing here is shared
//! between concurrently running sessions.

pub mod diagnostics;
pub mod harness;
pub mod protocol;
pub mod session;

pub use diagnostics::DiagnosticBuffer;
pub use harness::{ManagedProcess, ProcessHarness, ServicePipes};
pub use protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ProtocolClient, ReadError, ReadPolicy,
    ResponsePayload,
};
pub use session::{Session, SessionPhase};
