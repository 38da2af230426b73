//! Unix-socket JSON-lines server.
//!
//! One request per line, one response per line. Connections are handled
//! on their own tasks; a malformed line gets an `invalid_request` error
//! envelope instead of dropping the connection.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use crate::protocol::{Dispatcher, ErrorResponse, Request, Response};

/// Binds `socket_path` and serves until `shutdown` flips to `true`.
///
/// A stale socket file from a previous run is removed before binding; the
/// store's exclusive lock already guarantees single-instance operation.
///
/// # Errors
///
/// Returns an I/O error if the socket cannot be bound.
pub async fn serve(
    socket_path: &Path,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    tracing::info!(socket = %socket_path.display(), "protocol server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let dispatcher = Arc::clone(&dispatcher);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(error) = handle_connection(stream, dispatcher, shutdown).await {
                                tracing::debug!(%error, "connection closed with error");
                            }
                        });
                    },
                    Err(error) => tracing::warn!(%error, "accept failed"),
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("protocol server stopping");
                    return Ok(());
                }
            },
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
                continue;
            },
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatcher.handle(request).await,
            Err(error) => Response::Error(ErrorResponse::new(
                "invalid_request",
                format!("malformed request: {error}"),
            )),
        };
        let mut payload = serde_json::to_vec(&response).unwrap_or_else(|error| {
            tracing::error!(%error, "response serialization failed");
            br#"{"success":false,"error":"unavailable","message":"internal error"}"#.to_vec()
        });
        payload.push(b'\n');
        write_half.write_all(&payload).await?;
    }
}
