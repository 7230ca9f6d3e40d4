//! Serving loops: one LSP session at a time, over stdio or a unix socket.
//!
//! Replies from the session and publishes from the diagnostics worker both
//! go through a single writer task, so frames never interleave on the
//! wire.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};

use crate::codec::{FrameReader, FrameWriter};
use crate::protocol;
use crate::session::{Outcome, Session};
use crate::store::AnnotationStore;

const OUTBOUND_CAPACITY: usize = 64;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent `exit`; the server should stop.
    Exit,
    /// The connection went away; the server may accept another client.
    Disconnected,
}

/// Run one full session over the given byte streams.
pub async fn run_session<R, W>(
    reader: R,
    writer: W,
    store: Arc<Mutex<AnnotationStore>>,
) -> SessionEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let writer_task = tokio::spawn(async move {
        let mut writer = FrameWriter::new(writer);
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = writer.write_frame(&frame).await {
                tracing::warn!("write error: {e:#}");
                break;
            }
        }
    });

    let (mut session, worker) = Session::new(store, outbound_tx.clone());
    let cancel = session.cancel_token();
    let worker_task = tokio::spawn(worker.run());

    let mut reader = FrameReader::new(reader);
    let end = loop {
        let frame = match reader.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!("client closed the connection");
                break SessionEnd::Disconnected;
            }
            Err(e) => {
                tracing::warn!("transport error, dropping session: {e:#}");
                break SessionEnd::Disconnected;
            }
        };
        let Some(msg) = protocol::parse_incoming(&frame) else {
            tracing::debug!("ignoring unclassifiable JSON-RPC frame");
            continue;
        };
        match session.handle(msg).await {
            Outcome::Continue => {}
            Outcome::Exit => break SessionEnd::Exit,
        }
    };

    // Wind down: stop the worker, then let the writer drain and close.
    cancel.cancel();
    drop(session);
    drop(outbound_tx);
    let _ = worker_task.await;
    let _ = writer_task.await;

    end
}

/// Serve a single session on stdin/stdout for the life of the process.
pub async fn serve_stdio(store: Arc<Mutex<AnnotationStore>>) -> Result<()> {
    tracing::info!("serving LSP on stdio");
    let end = run_session(tokio::io::stdin(), tokio::io::stdout(), store).await;
    tracing::info!(?end, "stdio session finished");
    Ok(())
}

/// Serve sessions on a unix domain socket, one connection at a time, until
/// a client requests `exit`.
#[cfg(unix)]
pub async fn serve_socket(
    path: &std::path::Path,
    store: Arc<Mutex<AnnotationStore>>,
) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("could not remove socket: {}", path.display()));
        }
    }
    let listener = tokio::net::UnixListener::bind(path)
        .with_context(|| format!("could not listen on socket: {}", path.display()))?;
    tracing::info!(path = %path.display(), "listening for a connection");

    loop {
        let (stream, _addr) = listener
            .accept()
            .await
            .context("could not accept a connection")?;
        tracing::info!("client connected");
        let (reader, writer) = stream.into_split();
        match run_session(reader, writer, store.clone()).await {
            SessionEnd::Exit => break,
            SessionEnd::Disconnected => {
                tracing::info!("waiting for the next connection");
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn serve_socket(
    path: &std::path::Path,
    _store: Arc<Mutex<AnnotationStore>>,
) -> Result<()> {
    anyhow::bail!(
        "socket mode is only supported on unix (requested socket: {})",
        path.display()
    )
}
