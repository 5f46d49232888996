//! Newline-delimited JSON-RPC client over a pair of byte streams.
//!
//! Requests are written one per line. Responses are read line by line with a
//! bounded retry budget: lines that are not JSON, and JSON that is not a
//! response (server notifications, stray objects), are skipped. Bytes after
//! the first response stay buffered for the next `receive`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// JSON-RPC envelope version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Characters of raw stream data quoted in a `NoValidMessage` error.
const PREVIEW_CHARS: usize = 200;

/// Bounded retry budget for reading one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPolicy {
    /// Empty attempts tolerated before giving up.
    pub attempts: u32,
    /// How long one attempt waits for a complete line.
    pub attempt_window: Duration,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            attempt_window: Duration::from_secs(5),
            backoff: Duration::from_millis(500),
        }
    }
}

/// Failure to obtain a response from the response stream.
#[derive(Error, Debug)]
pub enum ReadError {
    /// The stream produced no bytes at all within the retry budget
    #[error("no data received after {attempts} attempts")]
    NoData { attempts: u32 },

    /// Bytes arrived but none of them formed a response
    #[error("no valid JSON response found in data: {preview}")]
    NoValidMessage { preview: String },

    /// The pipe itself failed
    #[error("pipe read error: {0}")]
    Io(#[from] std::io::Error),
}

/// An outgoing request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Error payload of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Missing fields default, so a sparse payload still reads as an error.
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A response carries exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    Result(Value),
    Error(JsonRpcError),
}

/// A decoded response line.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcResponse {
    pub id: Option<Value>,
    pub payload: ResponsePayload,
}

impl JsonRpcResponse {
    /// True when the response id is the integer `id`.
    pub fn answers(&self, id: u64) -> bool {
        self.id.as_ref().and_then(Value::as_u64) == Some(id)
    }

    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.payload {
            ResponsePayload::Result(value) => Ok(value),
            ResponsePayload::Error(error) => Err(error),
        }
    }
}

/// Loose shape used to classify an incoming line.
#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// What one line of the response stream turned out to be.
#[derive(Debug, PartialEq)]
pub enum LineKind {
    Blank,
    Response(JsonRpcResponse),
    /// Server notification or server-initiated request, by method name
    Notification(String),
    /// JSON that is not a protocol message
    Stray,
    NotJson,
}

/// Classify one line of the response stream.
pub fn classify_line(line: &str) -> LineKind {
    let line = line.trim();
    if line.is_empty() {
        return LineKind::Blank;
    }
    let raw: RawMessage = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(_) => return LineKind::NotJson,
    };
    if let Some(method) = raw.method {
        return LineKind::Notification(method);
    }
    let payload = match (raw.error, raw.result) {
        (Some(error), _) => ResponsePayload::Error(error),
        (None, Some(result)) => ResponsePayload::Result(result),
        (None, None) if raw.id.is_some() => ResponsePayload::Result(Value::Null),
        (None, None) => return LineKind::Stray,
    };
    LineKind::Response(JsonRpcResponse {
        id: raw.id,
        payload,
    })
}

/// JSON-RPC client over a response reader and a request writer.
pub struct ProtocolClient<R, W> {
    server: String,
    reader: BufReader<R>,
    writer: W,
    policy: ReadPolicy,
    next_id: u64,
    /// Bytes of a line not yet terminated by a newline.
    pending: Vec<u8>,
}

impl<R, W> ProtocolClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(server: impl Into<String>, reader: R, writer: W, policy: ReadPolicy) -> Self {
        Self {
            server: server.into(),
            reader: BufReader::new(reader),
            writer,
            policy,
            next_id: 1,
            pending: Vec::new(),
        }
    }

    /// Build a request with the next identifier.
    pub fn request(&mut self, method: &str, params: Option<Value>) -> JsonRpcRequest {
        let id = self.next_id;
        self.next_id += 1;
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.to_string(),
            params,
        }
    }

    /// Serialize `request` onto one line and flush it.
    pub async fn send(&mut self, request: &JsonRpcRequest) -> std::io::Result<()> {
        let mut data = serde_json::to_vec(request).map_err(std::io::Error::other)?;
        data.push(b'\n');
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;
        tracing::debug!(
            server = %self.server,
            id = request.id,
            method = %request.method,
            "request sent"
        );
        Ok(())
    }

    /// Read until the first response line, within the retry budget.
    ///
    /// An attempt is one `attempt_window` that yields no complete line (a
    /// read timeout or end-of-stream). Partial lines survive across attempts.
    pub async fn receive(&mut self) -> Result<JsonRpcResponse, ReadError> {
        let mut empty_attempts: u32 = 0;
        let mut seen_bytes = false;
        let mut skipped = String::new();

        loop {
            let read = tokio::time::timeout(
                self.policy.attempt_window,
                self.reader.read_until(b'\n', &mut self.pending),
            )
            .await;

            match read {
                Ok(Ok(0)) => {
                    // End of stream. An unterminated final line still counts.
                    if !self.pending.is_empty() {
                        seen_bytes = true;
                        if let Some(response) = self.take_line(&mut skipped) {
                            return Ok(response);
                        }
                    }
                }
                Ok(Ok(_)) => {
                    seen_bytes = true;
                    if self.pending.ends_with(b"\n") {
                        if let Some(response) = self.take_line(&mut skipped) {
                            return Ok(response);
                        }
                    }
                    continue;
                }
                Ok(Err(e)) => return Err(ReadError::Io(e)),
                Err(_elapsed) => {
                    seen_bytes |= !self.pending.is_empty();
                }
            }

            empty_attempts += 1;
            if empty_attempts >= self.policy.attempts {
                if !seen_bytes {
                    return Err(ReadError::NoData {
                        attempts: empty_attempts,
                    });
                }
                skipped.push_str(&String::from_utf8_lossy(&self.pending));
                return Err(ReadError::NoValidMessage {
                    preview: skipped.chars().take(PREVIEW_CHARS).collect(),
                });
            }

            tracing::debug!(
                server = %self.server,
                attempt = empty_attempts,
                "no response yet, backing off"
            );
            tokio::time::sleep(self.policy.backoff).await;
        }
    }

    /// Consume the pending line. Returns the response it holds, if any;
    /// otherwise records the skipped text.
    fn take_line(&mut self, skipped: &mut String) -> Option<JsonRpcResponse> {
        let bytes = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&bytes);
        match classify_line(&line) {
            LineKind::Response(response) => Some(response),
            LineKind::Blank => None,
            LineKind::Notification(method) => {
                tracing::debug!(server = %self.server, method = %method, "skipping server notification");
                None
            }
            LineKind::Stray | LineKind::NotJson => {
                tracing::debug!(server = %self.server, line = %line.trim(), "discarding non-response stdout line");
                if skipped.chars().count() < PREVIEW_CHARS {
                    skipped.push_str(&line);
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn fast_policy() -> ReadPolicy {
        ReadPolicy {
            attempts: 3,
            attempt_window: Duration::from_millis(30),
            backoff: Duration::from_millis(5),
        }
    }

    /// Client plus the far ends: (write responses here, read requests here).
    fn client() -> (
        ProtocolClient<DuplexStream, DuplexStream>,
        DuplexStream,
        DuplexStream,
    ) {
        let (responses_in, responses_out) = tokio::io::duplex(64 * 1024);
        let (requests_in, requests_out) = tokio::io::duplex(64 * 1024);
        let client = ProtocolClient::new("svc", responses_out, requests_in, fast_policy());
        (client, responses_in, requests_out)
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(classify_line("   "), LineKind::Blank);
        assert_eq!(classify_line("Server listening on stdio"), LineKind::NotJson);
        assert_eq!(classify_line("{\"x\":1}"), LineKind::Stray);
        assert_eq!(
            classify_line(r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#),
            LineKind::Notification("notifications/message".to_string())
        );
        assert_eq!(
            classify_line(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#),
            LineKind::Response(JsonRpcResponse {
                id: Some(json!(1)),
                payload: ResponsePayload::Result(json!({"ok": true})),
            })
        );
    }

    #[test]
    fn test_error_payload_takes_precedence() {
        let kind = classify_line(
            r#"{"jsonrpc":"2.0","id":2,"result":{},"error":{"code":-32601,"message":"Method not found"}}"#,
        );
        let LineKind::Response(response) = kind else {
            panic!("expected a response");
        };
        let err = response.into_result().unwrap_err();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "Method not found");
    }

    #[test]
    fn test_error_payload_without_message() {
        let kind = classify_line(r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601}}"#);
        let LineKind::Response(response) = kind else {
            panic!("expected a response");
        };
        let err = response.into_result().unwrap_err();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "");
    }

    #[test]
    fn test_null_result_is_a_response() {
        let kind = classify_line(r#"{"jsonrpc":"2.0","id":1,"result":null}"#);
        assert!(matches!(
            kind,
            LineKind::Response(JsonRpcResponse { payload: ResponsePayload::Result(Value::Null), .. })
        ));
    }

    #[tokio::test]
    async fn test_send_writes_one_line_with_monotonic_ids() {
        let (mut client, _responses, mut requests) = client();
        let first = client.request("initialize", Some(json!({"capabilities": {}})));
        let second = client.request("tools/list", None);
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        client.send(&first).await.unwrap();
        client.send(&second).await.unwrap();
        drop(client);

        let mut written = String::new();
        requests.read_to_string(&mut written).await.unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(written.ends_with('\n'));

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["jsonrpc"], "2.0");
        assert_eq!(first["method"], "initialize");
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["id"], 2);
        assert!(second.get("params").is_none(), "absent params are omitted");
    }

    #[tokio::test]
    async fn test_receive_skips_noise_and_keeps_remainder() {
        let (mut client, mut responses, _requests) = client();
        responses
            .write_all(
                b"INFO booting\n\n{\"x\":1}\n{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"tools\":[]}}\n",
            )
            .await
            .unwrap();

        let first = client.receive().await.unwrap();
        assert!(first.answers(1));
        let second = client.receive().await.unwrap();
        assert!(second.answers(2));
        assert_eq!(second.into_result().unwrap(), json!({"tools": []}));
    }

    #[tokio::test]
    async fn test_receive_skips_notifications() {
        let (mut client, mut responses, _requests) = client();
        responses
            .write_all(
                b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{\"level\":\"info\"}}\n{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n",
            )
            .await
            .unwrap();
        let response = client.receive().await.unwrap();
        assert!(response.answers(1));
    }

    #[tokio::test]
    async fn test_receive_joins_line_split_across_attempts() {
        let (mut client, mut responses, _requests) = client();
        let writer = tokio::spawn(async move {
            responses.write_all(b"{\"jsonrpc\":\"2.0\",").await.unwrap();
            tokio::time::sleep(Duration::from_millis(45)).await;
            responses.write_all(b"\"id\":1,\"result\":{}}\n").await.unwrap();
            responses
        });
        let response = client.receive().await.unwrap();
        assert!(response.answers(1));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_receive_no_data_after_attempts() {
        let (mut client, _responses, _requests) = client();
        let started = std::time::Instant::now();
        let err = client.receive().await.unwrap_err();
        assert!(matches!(err, ReadError::NoData { attempts: 3 }), "got {:?}", err);
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_receive_no_data_on_closed_stream() {
        let (mut client, responses, _requests) = client();
        drop(responses);
        let err = client.receive().await.unwrap_err();
        assert!(matches!(err, ReadError::NoData { .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_receive_only_junk_is_no_valid_message() {
        let (mut client, mut responses, _requests) = client();
        responses.write_all(b"panic: config missing\n").await.unwrap();
        let err = client.receive().await.unwrap_err();
        assert!(
            matches!(err, ReadError::NoValidMessage { ref preview } if preview.contains("panic: config missing")),
            "got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_receive_accepts_unterminated_final_line() {
        let (mut client, mut responses, _requests) = client();
        responses
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}")
            .await
            .unwrap();
        drop(responses);
        let response = client.receive().await.unwrap();
        assert!(response.answers(1));
    }
}
