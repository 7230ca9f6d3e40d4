//! Background publisher of annotation diagnostics.
//!
//! A single worker drains a bounded queue of refresh requests and turns
//! each into a `textDocument/publishDiagnostics` notification carrying one
//! hint per stored annotation. The worker stays quiet until the client has
//! sent `initialized` and dies when the session's cancel token fires.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::protocol;
use crate::store::AnnotationStore;
use crate::workspace::{self, WorkspaceFolder};

/// Queue depth for refresh requests. The handler can enqueue while a drain
/// is in progress, so this needs some headroom; the sole producer blocks
/// when it fills up.
pub const QUEUE_CAPACITY: usize = 10;

/// One request to republish diagnostics for a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMsg {
    pub uri: String,
    /// Publish even an empty set, so the client clears stale hints.
    pub force: bool,
}

/// The diagnostics consumer. Built by [`crate::session::Session::new`] and
/// driven on its own task.
pub struct DiagnosticsWorker {
    pub(crate) store: Arc<Mutex<AnnotationStore>>,
    pub(crate) folders: Arc<RwLock<Vec<WorkspaceFolder>>>,
    pub(crate) queue: mpsc::Receiver<DiagnosticMsg>,
    pub(crate) outbound: mpsc::Sender<serde_json::Value>,
    pub(crate) initialized: oneshot::Receiver<()>,
    pub(crate) cancel: CancellationToken,
}

impl DiagnosticsWorker {
    pub async fn run(mut self) {
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            gate = &mut self.initialized => {
                if gate.is_err() {
                    // Session went away before initialized.
                    return;
                }
            }
        }
        tracing::debug!("diagnostics worker up and running");

        loop {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = self.queue.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            if let Err(e) = self.publish(&msg).await {
                tracing::warn!(uri = %msg.uri, "could not publish diagnostics: {e:#}");
            }
        }
        tracing::debug!("diagnostics worker exiting");
    }

    async fn publish(&self, msg: &DiagnosticMsg) -> Result<()> {
        let (ws, rpath) = {
            let folders = self.folders.read().await;
            workspace::find_workspace(&folders, &msg.uri)?
        };
        let anns = self.store.lock().await.list(&ws, &rpath)?;
        if anns.is_empty() && !msg.force {
            tracing::debug!(uri = %msg.uri, "nothing to publish");
            return Ok(());
        }

        let diags = anns
            .iter()
            .map(|a| protocol::diagnostic(a.line, &a.content))
            .collect();
        tracing::debug!(uri = %msg.uri, count = anns.len(), "publishing diagnostics");
        self.outbound
            .send(protocol::publish_diagnostics(&msg.uri, diags))
            .await
            .map_err(|_| anyhow!("outbound channel closed"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        store: Arc<Mutex<AnnotationStore>>,
        queue_tx: mpsc::Sender<DiagnosticMsg>,
        outbound_rx: mpsc::Receiver<serde_json::Value>,
        init_tx: oneshot::Sender<()>,
        cancel: CancellationToken,
        worker: tokio::task::JoinHandle<()>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Mutex::new(
            AnnotationStore::open_in_memory().expect("open store"),
        ));
        let folders = Arc::new(RwLock::new(vec![WorkspaceFolder {
            uri: "file:///ws".to_string(),
            name: "ws".to_string(),
        }]));
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        let (init_tx, init_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let worker = DiagnosticsWorker {
            store: store.clone(),
            folders,
            queue: queue_rx,
            outbound: outbound_tx,
            initialized: init_rx,
            cancel: cancel.clone(),
        };
        let worker = tokio::spawn(worker.run());

        Fixture {
            store,
            queue_tx,
            outbound_rx,
            init_tx,
            cancel,
            worker,
        }
    }

    #[tokio::test]
    async fn publishes_one_diagnostic_per_annotation() {
        let f = fixture();
        {
            let mut store = f.store.lock().await;
            store.insert_or_update("ws", "/f.txt", 3, "first").unwrap();
            store.insert_or_update("ws", "/f.txt", 8, "second").unwrap();
        }
        f.init_tx.send(()).unwrap();

        f.queue_tx
            .send(DiagnosticMsg {
                uri: "file:///ws/f.txt".to_string(),
                force: false,
            })
            .await
            .unwrap();

        let mut rx = f.outbound_rx;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["method"], "textDocument/publishDiagnostics");
        assert_eq!(frame["params"]["uri"], "file:///ws/f.txt");
        let diags = frame["params"]["diagnostics"].as_array().unwrap();
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0]["message"], "first");
        assert_eq!(diags[0]["range"]["start"]["line"], 3);
        assert_eq!(diags[1]["message"], "second");
    }

    #[tokio::test]
    async fn empty_set_is_skipped_unless_forced() {
        let f = fixture();
        f.init_tx.send(()).unwrap();

        f.queue_tx
            .send(DiagnosticMsg {
                uri: "file:///ws/f.txt".to_string(),
                force: false,
            })
            .await
            .unwrap();
        f.queue_tx
            .send(DiagnosticMsg {
                uri: "file:///ws/f.txt".to_string(),
                force: true,
            })
            .await
            .unwrap();

        // Only the forced refresh produces a frame, and it is empty.
        let mut rx = f.outbound_rx;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["params"]["diagnostics"], serde_json::json!([]));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn waits_for_initialized_gate() {
        let f = fixture();
        f.queue_tx
            .send(DiagnosticMsg {
                uri: "file:///ws/f.txt".to_string(),
                force: true,
            })
            .await
            .unwrap();

        let mut rx = f.outbound_rx;
        assert!(rx.try_recv().is_err());

        f.init_tx.send(()).unwrap();
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn bad_uri_does_not_kill_the_worker() {
        let f = fixture();
        f.init_tx.send(()).unwrap();

        f.queue_tx
            .send(DiagnosticMsg {
                uri: "not-a-uri".to_string(),
                force: true,
            })
            .await
            .unwrap();
        f.queue_tx
            .send(DiagnosticMsg {
                uri: "file:///ws/f.txt".to_string(),
                force: true,
            })
            .await
            .unwrap();

        // The bad message is logged and skipped; the next one still lands.
        let mut rx = f.outbound_rx;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["params"]["uri"], "file:///ws/f.txt");
    }

    #[tokio::test]
    async fn cancel_stops_the_worker() {
        let f = fixture();
        f.cancel.cancel();
        f.worker.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_gate_stops_the_worker() {
        let f = fixture();
        drop(f.init_tx);
        f.worker.await.unwrap();
    }
}
