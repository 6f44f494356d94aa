//! JSON-RPC 2.0 messages framed with `Content-Length` headers.

use super::error::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single message body.
const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// JSON-RPC 2.0 request or notification (notifications carry no id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn request(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::from(id)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Collapses the response into the result value or a `Remote` error.
    pub fn into_result(self) -> Result<Value, TransportError> {
        match self.error {
            Some(err) => Err(TransportError::Remote {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A decoded message from the sidecar.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Answer to one of our requests.
    Response(JsonRpcResponse),
    /// Out-of-band notification.
    Notification { method: String, params: Value },
    /// Request initiated by the sidecar (progress tokens, capability
    /// registration). Acknowledged with a null result.
    Request { id: Value, method: String },
}

impl Incoming {
    pub fn parse(body: &[u8]) -> Result<Self, TransportError> {
        let value: Value = serde_json::from_slice(body).map_err(|e| TransportError::Protocol {
            message: format!("invalid JSON: {}", e),
        })?;

        let method = value
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        let id = value.get("id").filter(|id| !id.is_null()).cloned();

        match (method, id) {
            (Some(method), Some(id)) => Ok(Incoming::Request { id, method }),
            (Some(method), None) => Ok(Incoming::Notification {
                method,
                params: value.get("params").cloned().unwrap_or(Value::Null),
            }),
            (None, Some(_)) => serde_json::from_value(value)
                .map(Incoming::Response)
                .map_err(|e| TransportError::Protocol {
                    message: format!("invalid response: {}", e),
                }),
            (None, None) => Err(TransportError::Protocol {
                message: "message has neither method nor id".to_string(),
            }),
        }
    }
}

/// Writes one framed message and flushes.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message).map_err(|e| TransportError::Protocol {
        message: format!("failed to encode message: {}", e),
    })?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one framed message body. Returns `Ok(None)` on a clean EOF
/// between messages.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            if saw_header {
                return Err(TransportError::Closed);
            }
            return Ok(None);
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if !saw_header {
                continue;
            }
            break;
        }
        saw_header = true;

        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let parsed =
                    value
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| TransportError::Protocol {
                            message: format!("bad Content-Length: {}", value.trim()),
                        })?;
                content_length = Some(parsed);
            }
        }
    }

    let length = content_length.ok_or_else(|| TransportError::Protocol {
        message: "missing Content-Length header".to_string(),
    })?;
    if length > MAX_MESSAGE_BYTES {
        return Err(TransportError::Protocol {
            message: format!("message of {} bytes exceeds limit", length),
        });
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Closed
        } else {
            TransportError::from(e)
        }
    })?;
    Ok(Some(body))
}

#[cfg(test)]
#[path = "tests/framing_tests.rs"]
mod tests;
