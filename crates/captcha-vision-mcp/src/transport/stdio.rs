//! Stdio transport: reads JSON-RPC from stdin, writes to stdout.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::protocol::ProtocolHandler;
use crate::types::{McpError, McpResult, RequestId};

use super::framing::{self, LineFramer};

const WRITE_QUEUE_DEPTH: usize = 64;

/// Stdio transport for desktop MCP clients.
pub struct StdioTransport {
    handler: Arc<ProtocolHandler>,
    max_frame_bytes: usize,
}

impl StdioTransport {
    pub fn new(handler: ProtocolHandler, max_frame_bytes: usize) -> Self {
        Self {
            handler: Arc::new(handler),
            max_frame_bytes,
        }
    }

    pub fn handler(&self) -> &ProtocolHandler {
        &self.handler
    }

    /// Run the transport loop, reading from stdin and writing to stdout.
    pub async fn run(&self) -> McpResult<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one connection over any byte stream pair.
    ///
    /// Tool calls run concurrently; every response goes through a single
    /// writer task so lines never interleave. The connection closes at end
    /// of input, on an oversized frame, or when the output goes away.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> McpResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut framer = LineFramer::new(BufReader::new(reader), self.max_frame_bytes);
        let (tx, rx) = mpsc::channel::<String>(WRITE_QUEUE_DEPTH);
        let writer_task = tokio::spawn(write_loop(writer, rx));
        let mut tasks = JoinSet::new();

        tracing::info!("Stdio transport started");

        let outcome = loop {
            tokio::select! {
                line = framer.next_line() => match line {
                    Ok(Some(bytes)) => {
                        if !self.on_line(bytes, &tx, &mut tasks).await {
                            tracing::info!("Output closed, shutting down");
                            break Ok(());
                        }
                    }
                    Ok(None) => {
                        tracing::info!("EOF on stdin, shutting down");
                        break Ok(());
                    }
                    Err(e @ McpError::ContentTooLarge { .. }) => {
                        tracing::warn!("Unrecoverable framing error: {e}");
                        break Ok(());
                    }
                    Err(e) => {
                        tracing::error!("Read failed: {e}");
                        break Err(e);
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!("Tool call task panicked: {e}");
                        }
                    }
                }
            }
        };

        self.handler.close();
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        drop(tx);

        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Writer stopped: {e}"),
            Err(e) => tracing::error!("Writer task failed: {e}"),
        }

        outcome
    }

    /// Handle one input line. Returns `false` once the writer is gone.
    async fn on_line(
        &self,
        bytes: Vec<u8>,
        tx: &mpsc::Sender<String>,
        tasks: &mut JoinSet<()>,
    ) -> bool {
        let line = match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Frame is not valid UTF-8: {e}");
                let err = McpError::ParseError("Invalid UTF-8 in message".to_string());
                return send(tx, &self.handler.error_response(&err, RequestId::Null)).await;
            }
        };

        if line.trim().is_empty() {
            return true;
        }

        let msg = match framing::parse_message(&line) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Malformed frame: {e}");
                let response = self.handler.error_response(&e, framing::recover_id(&line));
                return send(tx, &response).await;
            }
        };

        if self.handler.runs_concurrently(&msg) {
            let handler = self.handler.clone();
            let tx = tx.clone();
            tasks.spawn(async move {
                if let Some(response) = handler.handle_message(msg).await {
                    send(&tx, &response).await;
                }
            });
            return true;
        }

        match self.handler.handle_message(msg).await {
            Some(response) => send(tx, &response).await,
            None => true,
        }
    }
}

async fn send(tx: &mpsc::Sender<String>, value: &serde_json::Value) -> bool {
    match framing::frame_message(value) {
        Ok(framed) => tx.send(framed).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to frame response: {e}");
            true
        }
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<String>) -> McpResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(framed) = rx.recv().await {
        writer
            .write_all(framed.as_bytes())
            .await
            .map_err(McpError::Io)?;
        writer.flush().await.map_err(McpError::Io)?;
    }
    Ok(())
}
