//! Per-connection line framing, timeouts, and the response writer.
//!
//! Each accepted socket is one tokio task. Lines are independent artifacts,
//! processed in arrival order under a per-request deadline; every line gets
//! exactly one newline-terminated canonical-JSON response. The connection
//! stays open across PING frames and half-closes after anything else, idle
//! expiry included. A connection idling between lines also watches the
//! server's shutdown signal and closes at once when `stop()` is called;
//! only a request already mid-pipeline runs on into the drain interval.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::debug;

use btps_core::artifact::ControlAction;
use btps_core::{BtpsError, BtpsResponse, ServerArtifact};
use btps_crypto::to_canonical_json;

use crate::config::ServerConfig;
use crate::context::ResponseCtx;
use crate::pipeline::Pipeline;

pub(crate) async fn serve_connection<S>(
    stream: S,
    remote_addr: SocketAddr,
    pipeline: Arc<Pipeline>,
    config: ServerConfig,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half).take(config.max_line_bytes as u64);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            // Idle sockets close the moment the server stops; a sender that
            // went away entirely means the same thing.
            _ = shutdown.wait_for(|stop| *stop) => {
                debug!(%remote_addr, "closing idle connection on shutdown");
                break;
            }
            read = tokio::time::timeout(config.socket_timeout, reader.read_line(&mut line)) => read,
        };
        match read {
            Err(_) => {
                let timeout_ms = config.socket_timeout.as_millis() as u64;
                let response =
                    BtpsResponse::error(None, &BtpsError::SocketTimeout(timeout_ms));
                let _ = write_response(&mut write_half, &response).await;
                pipeline.middleware().notify_response_sent(&response).await;
                debug!(%remote_addr, "connection idled out");
                break;
            }
            Ok(Err(e)) => {
                debug!(%remote_addr, error = %e, "socket read failed");
                break;
            }
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {
                // Each full read resets the line budget for the next frame.
                reader.set_limit(config.max_line_bytes as u64);
                if !line.ends_with('\n') && line.len() >= config.max_line_bytes {
                    let err = BtpsError::Validation(format!(
                        "request line exceeds {} bytes",
                        config.max_line_bytes
                    ));
                    let response = BtpsResponse::error(None, &err);
                    let _ = write_response(&mut write_half, &response).await;
                    pipeline.middleware().notify_response_sent(&response).await;
                    break;
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let res_ctx = ResponseCtx::new();
                let artifact = match tokio::time::timeout(
                    config.request_deadline,
                    pipeline.process_line(trimmed, Some(remote_addr.ip()), &res_ctx),
                )
                .await
                {
                    Ok(artifact) => artifact,
                    Err(_) => {
                        let deadline_ms = config.request_deadline.as_millis() as u64;
                        let response = BtpsResponse::error(
                            res_ctx.req_id(),
                            &BtpsError::SocketTimeout(deadline_ms),
                        );
                        let _ = write_response(&mut write_half, &response).await;
                        pipeline.middleware().notify_response_sent(&response).await;
                        break;
                    }
                };

                let response = res_ctx.take_response().unwrap_or_else(|| {
                    BtpsResponse::error(
                        res_ctx.req_id(),
                        &BtpsError::Unknown("no response produced".into()),
                    )
                });
                if write_response(&mut write_half, &response).await.is_err() {
                    debug!(%remote_addr, "peer closed before the response was written");
                    break;
                }
                pipeline.middleware().notify_response_sent(&response).await;

                if keep_alive(artifact.as_deref()) {
                    continue;
                }
                let _ = write_half.shutdown().await;
                break;
            }
        }
    }
    debug!(%remote_addr, "connection closed");
}

/// Only PING keeps the connection open; everything else ends with the
/// response and a half-close.
fn keep_alive(artifact: Option<&ServerArtifact>) -> bool {
    matches!(
        artifact,
        Some(ServerArtifact::Control(c)) if c.action == ControlAction::Ping
    )
}

pub(crate) async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &BtpsResponse,
) -> std::io::Result<()> {
    let value = serde_json::to_value(response).unwrap_or_default();
    let mut frame = to_canonical_json(&value);
    frame.push('\n');
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await
}
