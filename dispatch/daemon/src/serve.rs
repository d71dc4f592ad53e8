//! Stdio Server
//!
//! Reads newline-delimited JSON completion requests and writes one JSON reply
//! per request. Each request is served on its own task, so replies arrive in
//! completion order; callers correlate them through the optional `id` field.
//!
//! ```text
//!   stdin ──lines──▶ parse ──spawn──▶ Router::complete ──┐
//!                                                         │ mpsc
//!   stdout ◀──────────────── writer (this task) ◀────────┘
//! ```
//!
//! Request line: a `CompletionRequest` object plus an optional `id`.
//! Reply line: the `CompletionResponse` fields, or `{"error", "message"}`.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use dispatch_core::{CompletionRequest, CompletionResponse, Router};

/// Replies buffered between handler tasks and the writer
const REPLY_CAPACITY: usize = 256;

#[derive(Debug, Deserialize)]
struct RequestLine {
    #[serde(default)]
    id: Option<Value>,
    #[serde(flatten)]
    request: CompletionRequest,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Reply {
    Completed {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        #[serde(flatten)]
        response: CompletionResponse,
    },
    Failed {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        error: &'static str,
        message: String,
    },
}

/// Totals reported when the input closes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServeStats {
    /// Request lines accepted
    pub received: u64,
    /// Replies that carried an error
    pub failed: u64,
}

/// Serve requests from `input` until it closes or `shutdown` resolves
///
/// In-flight requests are always answered before returning.
pub async fn serve<R, W, S>(
    router: Arc<Router>,
    input: R,
    output: &mut W,
    shutdown: S,
) -> Result<ServeStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = input.lines();
    let (reply_tx, mut reply_rx) = mpsc::channel::<Reply>(REPLY_CAPACITY);
    let mut reply_tx = Some(reply_tx);
    let mut stats = ServeStats::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            () = &mut shutdown, if reply_tx.is_some() => {
                info!("Shutdown requested, finishing in-flight requests");
                reply_tx = None;
            }
            reply = reply_rx.recv() => {
                let Some(reply) = reply else { break };
                if matches!(reply, Reply::Failed { .. }) {
                    stats.failed += 1;
                }
                write_reply(output, &reply).await?;
            }
            line = lines.next_line(), if reply_tx.is_some() => {
                let Some(line) = line.context("Failed to read request line")? else {
                    debug!("Input closed");
                    reply_tx = None;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }
                stats.received += 1;
                if let Some(tx) = &reply_tx {
                    dispatch_line(&router, &line, tx.clone());
                }
            }
        }
    }

    output.flush().await.context("Failed to flush output")?;
    Ok(stats)
}

fn dispatch_line(router: &Arc<Router>, line: &str, tx: mpsc::Sender<Reply>) {
    let parsed: RequestLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "Rejecting malformed request line");
            let reply = Reply::Failed {
                id: None,
                error: "parse_error",
                message: e.to_string(),
            };
            tokio::spawn(async move {
                send_reply(&tx, reply).await;
            });
            return;
        }
    };

    let router = Arc::clone(router);
    tokio::spawn(async move {
        let RequestLine { id, request } = parsed;
        let reply = match router.complete(request).await {
            Ok(response) => Reply::Completed { id, response },
            Err(e) => Reply::Failed {
                id,
                error: e.kind(),
                message: e.to_string(),
            },
        };
        send_reply(&tx, reply).await;
    });
}

/// Queue a reply for the writer; false if the writer has already stopped
async fn send_reply(tx: &mpsc::Sender<Reply>, reply: Reply) -> bool {
    let sent = tx.send(reply).await.is_ok();
    if !sent {
        debug!("Reply dropped, writer has stopped");
    }
    sent
}

async fn write_reply<W: AsyncWrite + Unpin>(output: &mut W, reply: &Reply) -> Result<()> {
    let mut encoded = serde_json::to_vec(reply).context("Failed to encode reply")?;
    encoded.push(b'\n');
    output
        .write_all(&encoded)
        .await
        .context("Failed to write reply")
}
