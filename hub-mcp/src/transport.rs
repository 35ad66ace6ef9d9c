//! Newline-delimited JSON-RPC transport.
//!
//! Each line on the input is one JSON-RPC message; each response is written as
//! one line. Requests are handled concurrently, and a single writer task owns
//! the output so responses never interleave. Log output must go elsewhere
//! (stderr) when this runs over stdio.

use crate::server::McpServer;
use crate::types::{McpError, McpRequest, McpResponse, RequestId};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Responses buffered between handlers and the writer.
const RESPONSE_BUFFER: usize = 64;

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Reading or writing the stream failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A response could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The writer stopped before every response was written.
    #[error("Channel closed")]
    ChannelClosed,
}

/// Parse one input line into a request, or the error response it deserves.
fn parse_line(line: &str) -> Result<McpRequest, McpResponse> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| McpResponse::error(RequestId::Null, McpError::parse_error().with_data(e.to_string().into())))?;

    serde_json::from_value(value.clone()).map_err(|e| {
        let id = value
            .get("id")
            .and_then(|id| serde_json::from_value(id.clone()).ok())
            .unwrap_or(RequestId::Null);
        McpResponse::error(id, McpError::invalid_request().with_data(e.to_string().into()))
    })
}

/// Serve `server` over stdin and stdout until stdin closes.
pub async fn serve_stdio(server: Arc<McpServer>) -> Result<(), TransportError> {
    serve(server, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve `server` over an arbitrary byte stream pair until `reader` hits EOF.
///
/// Returns once every in-flight request has been answered.
pub async fn serve<R, W>(server: Arc<McpServer>, reader: R, writer: W) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<McpResponse>(RESPONSE_BUFFER);
    let writer_task = tokio::spawn(write_responses(rx, writer));

    let mut lines = BufReader::new(reader).lines();
    info!("MCP transport ready");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request = match parse_line(line) {
            Ok(request) => request,
            Err(response) => {
                warn!("Rejected malformed message");
                if tx.send(response).await.is_err() {
                    return Err(TransportError::ChannelClosed);
                }
                continue;
            }
        };

        debug!(method = %request.method, notification = request.is_notification(), "Received message");

        let server = server.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(response) = server.handle_request(request).await {
                if tx.send(response).await.is_err() {
                    warn!("Response dropped: writer has stopped");
                }
            }
        });
    }

    info!("Input closed, draining in-flight requests");
    drop(tx);

    match writer_task.await {
        Ok(result) => result,
        Err(_) => Err(TransportError::ChannelClosed),
    }
}

async fn write_responses<W>(mut rx: mpsc::Receiver<McpResponse>, writer: W) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);

    while let Some(response) = rx.recv().await {
        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        writer.write_all(&payload).await?;
        writer.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::io::{duplex, AsyncReadExt};

    async fn exchange(input: &str) -> Vec<Value> {
        let server = Arc::new(McpServer::hub());
        let (mut client_in, server_in) = duplex(4096);
        let (server_out, mut client_out) = duplex(4096);

        let serving = tokio::spawn(serve(server, server_in, server_out));
        client_in.write_all(input.as_bytes()).await.unwrap();
        drop(client_in);
        serving.await.unwrap().unwrap();

        let mut output = String::new();
        client_out.read_to_string(&mut output).await.unwrap();
        output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_parse_line() {
        assert!(parse_line(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).is_ok());

        let parse_error = parse_line("{not json").unwrap_err();
        assert_eq!(parse_error.error.as_ref().map(|e| e.code), Some(McpError::PARSE_ERROR));
        assert_eq!(parse_error.id, RequestId::Null);

        let invalid = parse_line(r#"{"jsonrpc":"2.0","id":"x"}"#).unwrap_err();
        assert_eq!(invalid.error.as_ref().map(|e| e.code), Some(McpError::INVALID_REQUEST));
        assert_eq!(invalid.id, RequestId::String("x".to_string()));
    }

    #[tokio::test]
    async fn test_serve_answers_requests_and_skips_notifications() {
        let responses = exchange(concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        ))
        .await;

        assert_eq!(responses.len(), 2);
        let ids: Vec<&Value> = responses.iter().map(|r| &r["id"]).collect();
        assert!(ids.contains(&&Value::from(1)));
        assert!(ids.contains(&&Value::from(2)));
    }

    #[tokio::test]
    async fn test_serve_reports_parse_errors_and_continues() {
        let responses = exchange("garbage\n{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"ping\"}\n").await;

        assert_eq!(responses.len(), 2);
        let parse_error = responses
            .iter()
            .find(|r| r["id"].is_null())
            .expect("parse error response");
        assert_eq!(parse_error["error"]["code"], McpError::PARSE_ERROR);
        assert!(responses.iter().any(|r| r["id"] == 7 && r.get("result").is_some()));
    }
}
