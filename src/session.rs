//! Per-connection LSP protocol state machine.
//!
//! One `Session` serves exactly one client. It tracks the lifecycle flags
//! (`initialize` → `initialized` → `shutdown` → `exit`), owns the
//! workspace folder list, writes replies into the shared outbound channel
//! and feeds the diagnostics queue. Request failures become JSON-RPC error
//! replies; the session itself stays alive until `exit` or disconnect.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::diagnostics::{self, DiagnosticMsg, DiagnosticsWorker};
use crate::protocol::{
    self, ClientInfo, DidChangeParams, DidOpenParams, DidSaveParams, Incoming, InitializeParams,
    PccGetParams, PccSetParams,
};
use crate::shift::{self, EditOutcome, LineRange};
use crate::store::{AnnotationStore, StoreError};
use crate::workspace::{self, NotAFileUri, WorkspaceFolder};

/// What the message loop should do after a handled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// The client sent `exit`; close the connection.
    Exit,
}

/// A failed request, carrying its JSON-RPC error code.
#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("server not initialized")]
    NotInitialized,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RequestError {
    fn code(&self) -> i64 {
        match self {
            Self::InvalidRequest(_) => protocol::INVALID_REQUEST,
            Self::MethodNotFound(_) => protocol::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => protocol::INVALID_PARAMS,
            Self::NotInitialized => protocol::SERVER_NOT_INITIALIZED,
            Self::Internal(_) => protocol::INTERNAL_ERROR,
        }
    }
}

impl From<StoreError> for RequestError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Usage(msg) => Self::InvalidParams(msg),
            other => Self::Internal(other.into()),
        }
    }
}

impl From<NotAFileUri> for RequestError {
    fn from(e: NotAFileUri) -> Self {
        Self::InvalidParams(e.to_string())
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, RequestError> {
    serde_json::from_value(params).map_err(|e| RequestError::InvalidParams(e.to_string()))
}

pub struct Session {
    store: Arc<Mutex<AnnotationStore>>,
    /// Mutated only by `initialize`; read by handlers and the worker.
    folders: Arc<RwLock<Vec<WorkspaceFolder>>>,
    outbound: mpsc::Sender<Value>,
    diagnostics: mpsc::Sender<DiagnosticMsg>,
    /// Fired once on `initialized`, releasing the diagnostics worker.
    initialized_gate: Option<oneshot::Sender<()>>,
    cancel: CancellationToken,

    client_info: Option<ClientInfo>,
    got_initialize: bool,
    got_initialized: bool,
    got_shutdown: bool,
}

impl Session {
    /// Build a session plus its diagnostics worker. The caller spawns the
    /// worker; both halves share the store, the folder list and the cancel
    /// token.
    pub fn new(
        store: Arc<Mutex<AnnotationStore>>,
        outbound: mpsc::Sender<Value>,
    ) -> (Self, DiagnosticsWorker) {
        let folders = Arc::new(RwLock::new(Vec::new()));
        let (diag_tx, diag_rx) = mpsc::channel(diagnostics::QUEUE_CAPACITY);
        let (gate_tx, gate_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let worker = DiagnosticsWorker {
            store: store.clone(),
            folders: folders.clone(),
            queue: diag_rx,
            outbound: outbound.clone(),
            initialized: gate_rx,
            cancel: cancel.clone(),
        };
        let session = Self {
            store,
            folders,
            outbound,
            diagnostics: diag_tx,
            initialized_gate: Some(gate_tx),
            cancel,
            client_info: None,
            got_initialize: false,
            got_initialized: false,
            got_shutdown: false,
        };
        (session, worker)
    }

    /// Token cancelled on `shutdown` (and by the transport on disconnect).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Dispatch one incoming message, writing any reply to the outbound
    /// channel.
    pub async fn handle(&mut self, msg: Incoming) -> Outcome {
        match msg {
            Incoming::Request { id, method, params } => {
                tracing::info!(method = %method, "request");
                let frame = match self.handle_request(&method, params).await {
                    Ok(result) => protocol::response(&id, result),
                    Err(e) => {
                        tracing::warn!(method = %method, "request failed: {e}");
                        protocol::error_response(&id, e.code(), &e.to_string())
                    }
                };
                if self.outbound.send(frame).await.is_err() {
                    tracing::warn!("outbound channel closed, dropping reply");
                }
                Outcome::Continue
            }
            Incoming::Notification { method, params } => {
                tracing::info!(method = %method, "notification");
                self.handle_notification(&method, params).await
            }
        }
    }

    async fn handle_request(&mut self, method: &str, params: Value) -> Result<Value, RequestError> {
        if self.got_shutdown {
            return Err(RequestError::InvalidRequest(
                "server is shutting down".to_string(),
            ));
        }
        match method {
            "initialize" => self.on_initialize(params).await,
            "shutdown" => self.on_shutdown(),
            protocol::PCC_GET => {
                self.ensure_initialized()?;
                self.on_pcc_get(params).await
            }
            protocol::PCC_SET => {
                self.ensure_initialized()?;
                self.on_pcc_set(params).await
            }
            other => Err(RequestError::MethodNotFound(other.to_string())),
        }
    }

    async fn handle_notification(&mut self, method: &str, params: Value) -> Outcome {
        match method {
            "initialized" => self.on_initialized(),
            "exit" => {
                if !self.got_shutdown {
                    tracing::warn!("exiting without shutdown");
                }
                return Outcome::Exit;
            }
            "textDocument/didOpen" => self.on_did_open(params).await,
            "textDocument/didChange" => self.on_did_change(params).await,
            "textDocument/didSave" => match parse_params::<DidSaveParams>(params) {
                Ok(p) => tracing::debug!(uri = %p.text_document.uri, "didSave (ignored)"),
                Err(e) => tracing::warn!("bad didSave params: {e}"),
            },
            "$/cancelRequest" => {
                // Operations are not preemptible; acknowledged by log only.
                tracing::info!(params = %params, "cancel requested");
            }
            other => {
                tracing::debug!(method = other, "ignoring unknown notification");
            }
        }
        Outcome::Continue
    }

    fn ensure_initialized(&self) -> Result<(), RequestError> {
        if self.got_initialize {
            Ok(())
        } else {
            Err(RequestError::NotInitialized)
        }
    }

    async fn on_initialize(&mut self, params: Value) -> Result<Value, RequestError> {
        let p: InitializeParams = parse_params(params)?;
        if let Some(info) = &p.client_info {
            tracing::info!(
                client = %info.name,
                version = info.version.as_deref().unwrap_or("?"),
                "initialize"
            );
        }
        self.client_info = p.client_info;
        {
            let mut folders = self.folders.write().await;
            workspace::merge_folders(&mut folders, p.workspace_folders.unwrap_or_default());
            workspace::resolve_names(&mut folders);
            tracing::debug!(count = folders.len(), "workspace folders resolved");
        }
        self.got_initialize = true;
        Ok(protocol::initialize_result())
    }

    fn on_initialized(&mut self) {
        if !self.got_initialize {
            tracing::error!("got initialized without initialize");
            return;
        }
        self.got_initialized = true;
        if let Some(gate) = self.initialized_gate.take() {
            let _ = gate.send(());
        }
    }

    fn on_shutdown(&mut self) -> Result<Value, RequestError> {
        tracing::info!("shutdown requested");
        self.cancel.cancel();
        self.client_info = None;
        self.got_initialize = false;
        self.got_initialized = false;
        self.got_shutdown = true;
        Ok(Value::Null)
    }

    async fn on_did_open(&mut self, params: Value) {
        if !self.got_initialize {
            tracing::warn!("didOpen before initialize, ignoring");
            return;
        }
        match parse_params::<DidOpenParams>(params) {
            Ok(p) => self.enqueue_refresh(p.text_document.uri, false).await,
            Err(e) => tracing::warn!("bad didOpen params: {e}"),
        }
    }

    async fn on_did_change(&mut self, params: Value) {
        if !self.got_initialize {
            tracing::warn!("didChange before initialize, ignoring");
            return;
        }
        let p: DidChangeParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("bad didChange params: {e}");
                return;
            }
        };
        let uri = p.text_document.uri;
        let (ws, rpath) = match self.resolve(&uri).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!("didChange: {e}");
                return;
            }
        };

        let mut changed = false;
        for change in &p.content_changes {
            let Some(range) = change.range else {
                tracing::warn!(uri = %uri, "content change without a range, skipping");
                continue;
            };
            let lr = LineRange::new(range.start.line, range.end.line);
            let applied = {
                let mut store = self.store.lock().await;
                shift::apply_edit(&mut store, &ws, &rpath, lr, &change.text)
            };
            match applied {
                Ok(EditOutcome::Shifted) => changed = true,
                Ok(EditOutcome::Unchanged) => {}
                Err(e) => tracing::warn!(uri = %uri, "could not shift annotations: {e}"),
            }
        }
        if changed {
            self.enqueue_refresh(uri, false).await;
        }
    }

    async fn on_pcc_get(&mut self, params: Value) -> Result<Value, RequestError> {
        let p: PccGetParams = parse_params(params)?;
        let (ws, rpath) = self.resolve(&p.file).await?;
        let content = self.store.lock().await.get(&ws, &rpath, p.line)?;
        let lines: Vec<&str> = content.split('\n').collect();
        Ok(json!({ "content": lines }))
    }

    async fn on_pcc_set(&mut self, params: Value) -> Result<Value, RequestError> {
        let p: PccSetParams = parse_params(params)?;
        let (ws, rpath) = self.resolve(&p.file).await?;
        let content = p.content.join("\n");
        // Empty content clears the annotation; the refresh is forced so
        // the client drops the stale hint.
        let force = content.is_empty();
        {
            let mut store = self.store.lock().await;
            if force {
                store.delete(&ws, &rpath, p.line)?;
            } else {
                store.insert_or_update(&ws, &rpath, p.line, &content)?;
            }
        }
        self.enqueue_refresh(p.file, force).await;
        Ok(json!({}))
    }

    async fn resolve(&self, uri: &str) -> Result<(String, String), NotAFileUri> {
        let folders = self.folders.read().await;
        workspace::find_workspace(&folders, uri)
    }

    async fn enqueue_refresh(&self, uri: String, force: bool) {
        if self
            .diagnostics
            .send(DiagnosticMsg { uri, force })
            .await
            .is_err()
        {
            tracing::debug!("diagnostics queue closed, dropping refresh");
        }
    }
}
