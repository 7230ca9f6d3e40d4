//! JSON-RPC and LSP wire types.
//!
//! Incoming frames are classified into requests and notifications and
//! their params deserialized into the typed structs below; outgoing frames
//! are built with `json!`. Only the methods this server handles get typed
//! params — everything else stays a raw [`serde_json::Value`].

use serde::Deserialize;
use serde_json::{Value, json};

use crate::workspace::WorkspaceFolder;

pub const JSONRPC_VERSION: &str = "2.0";

// JSON-RPC error codes.
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// LSP-reserved: request received before `initialize`.
pub const SERVER_NOT_INITIALIZED: i64 = -32002;

/// Custom method: read the annotation at a file/line.
pub const PCC_GET: &str = "$/pcc/get";
/// Custom method: write (or clear) the annotation at a file/line.
pub const PCC_SET: &str = "$/pcc/set";

pub const DIAGNOSTIC_SOURCE: &str = "private comments";
const SEVERITY_HINT: u32 = 4;

/// One classified incoming frame.
#[derive(Debug)]
pub enum Incoming {
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
}

/// Classify a JSON-RPC frame.
///
/// Frames with both an `id` and a `method` are requests; `method` alone is
/// a notification. Anything else (stray responses, garbage) yields `None`.
pub fn parse_incoming(frame: &Value) -> Option<Incoming> {
    let method = frame.get("method")?.as_str()?.to_string();
    let params = frame.get("params").cloned().unwrap_or(Value::Null);
    match frame.get("id") {
        Some(id) => Some(Incoming::Request {
            id: id.clone(),
            method,
            params,
        }),
        None => Some(Incoming::Notification { method, params }),
    }
}

pub fn response(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result })
}

pub fn error_response(id: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": { "code": code, "message": message }
    })
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "method": method, "params": params })
}

// ── Typed params for the handled methods ────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
    /// May be absent or `null` for single-rooted clients.
    #[serde(default)]
    pub workspace_folders: Option<Vec<WorkspaceFolder>>,
}

#[derive(Debug, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidOpenParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidChangeParams {
    pub text_document: TextDocumentIdentifier,
    pub content_changes: Vec<ContentChange>,
}

#[derive(Debug, Deserialize)]
pub struct ContentChange {
    /// Absent when the client sends a full-document change.
    #[serde(default)]
    pub range: Option<Range>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidSaveParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Position {
    pub line: u32,
    #[serde(default)]
    pub character: u32,
}

#[derive(Debug, Deserialize)]
pub struct PccGetParams {
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Deserialize)]
pub struct PccSetParams {
    pub file: String,
    pub line: u32,
    pub content: Vec<String>,
}

// ── Outgoing payload builders ───────────────────────────────────────────

/// The `initialize` reply: server info plus capabilities.
pub fn initialize_result() -> Value {
    json!({
        "serverInfo": {
            "name": "pcc",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {
            "textDocumentSync": {
                "openClose": true,
                // 2 = Incremental
                "change": 2,
                "save": {},
            },
            "codeLensProvider": {
                "resolveProvider": false,
            },
            "workspace": {
                "fileOperations": {
                    "didCreate": { "filters": [ { "pattern": { "glob": "*" } } ] },
                    "didRename": { "filters": [ { "pattern": { "glob": "*" } } ] },
                    "didDelete": { "filters": [ { "pattern": { "glob": "*" } } ] },
                },
            },
        },
    })
}

/// A single one-line hint diagnostic carrying an annotation.
pub fn diagnostic(line: u32, message: &str) -> Value {
    json!({
        "range": {
            "start": { "line": line, "character": 0 },
            "end": { "line": line + 1, "character": 0 },
        },
        "severity": SEVERITY_HINT,
        "source": DIAGNOSTIC_SOURCE,
        "message": message,
    })
}

pub fn publish_diagnostics(uri: &str, diagnostics: Vec<Value>) -> Value {
    notification(
        "textDocument/publishDiagnostics",
        json!({ "uri": uri, "diagnostics": diagnostics }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_request() {
        let frame = json!({ "jsonrpc": "2.0", "id": 3, "method": "shutdown" });
        match parse_incoming(&frame) {
            Some(Incoming::Request { id, method, params }) => {
                assert_eq!(id, json!(3));
                assert_eq!(method, "shutdown");
                assert_eq!(params, Value::Null);
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn classifies_notification() {
        let frame = json!({ "jsonrpc": "2.0", "method": "exit" });
        assert!(matches!(
            parse_incoming(&frame),
            Some(Incoming::Notification { .. })
        ));
    }

    #[test]
    fn rejects_frames_without_method() {
        assert!(parse_incoming(&json!({ "jsonrpc": "2.0", "id": 1, "result": {} })).is_none());
        assert!(parse_incoming(&json!("just a string")).is_none());
    }

    #[test]
    fn initialize_params_tolerate_missing_fields() {
        let p: InitializeParams = serde_json::from_value(json!({})).unwrap();
        assert!(p.client_info.is_none());
        assert!(p.workspace_folders.is_none());

        let p: InitializeParams = serde_json::from_value(json!({
            "clientInfo": { "name": "nvim", "version": "0.10" },
            "workspaceFolders": [ { "uri": "file:///ws", "name": "ws" } ],
        }))
        .unwrap();
        assert_eq!(p.client_info.unwrap().name, "nvim");
        assert_eq!(p.workspace_folders.unwrap()[0].uri, "file:///ws");
    }

    #[test]
    fn did_change_params_deserialize() {
        let p: DidChangeParams = serde_json::from_value(json!({
            "textDocument": { "uri": "file:///ws/f.txt", "version": 7 },
            "contentChanges": [ {
                "range": {
                    "start": { "line": 4, "character": 0 },
                    "end": { "line": 6, "character": 2 },
                },
                "text": "replacement",
            } ],
        }))
        .unwrap();
        assert_eq!(p.text_document.uri, "file:///ws/f.txt");
        let range = p.content_changes[0].range.unwrap();
        assert_eq!(range.start.line, 4);
        assert_eq!(range.end.line, 6);
        assert_eq!(range.end.character, 2);
    }

    #[test]
    fn full_document_change_has_no_range() {
        let p: DidChangeParams = serde_json::from_value(json!({
            "textDocument": { "uri": "file:///ws/f.txt" },
            "contentChanges": [ { "text": "whole file" } ],
        }))
        .unwrap();
        assert!(p.content_changes[0].range.is_none());
    }

    #[test]
    fn pcc_set_params_deserialize() {
        let p: PccSetParams = serde_json::from_value(json!({
            "file": "file:///ws/f.txt",
            "line": 12,
            "content": ["a", "b"],
        }))
        .unwrap();
        assert_eq!(p.line, 12);
        assert_eq!(p.content, vec!["a", "b"]);
    }

    #[test]
    fn capabilities_shape() {
        let result = initialize_result();
        assert_eq!(result["serverInfo"]["name"], "pcc");
        let caps = &result["capabilities"];
        assert_eq!(caps["textDocumentSync"]["openClose"], true);
        assert_eq!(caps["textDocumentSync"]["change"], 2);
        assert!(caps["textDocumentSync"]["save"].is_object());
        assert_eq!(caps["codeLensProvider"]["resolveProvider"], false);
        for op in ["didCreate", "didRename", "didDelete"] {
            assert_eq!(
                caps["workspace"]["fileOperations"][op]["filters"][0]["pattern"]["glob"],
                "*"
            );
        }
    }

    #[test]
    fn diagnostic_occupies_one_line() {
        let d = diagnostic(41, "note to self");
        assert_eq!(d["range"]["start"]["line"], 41);
        assert_eq!(d["range"]["start"]["character"], 0);
        assert_eq!(d["range"]["end"]["line"], 42);
        assert_eq!(d["range"]["end"]["character"], 0);
        assert_eq!(d["severity"], 4);
        assert_eq!(d["source"], "private comments");
        assert_eq!(d["message"], "note to self");
    }

    #[test]
    fn publish_wraps_notification() {
        let frame = publish_diagnostics("file:///ws/f.txt", vec![]);
        assert_eq!(frame["jsonrpc"], "2.0");
        assert_eq!(frame["method"], "textDocument/publishDiagnostics");
        assert_eq!(frame["params"]["uri"], "file:///ws/f.txt");
        assert_eq!(frame["params"]["diagnostics"], json!([]));
        assert!(frame.get("id").is_none());
    }

    #[test]
    fn error_response_shape() {
        let frame = error_response(&json!(9), METHOD_NOT_FOUND, "method not found: $/nope");
        assert_eq!(frame["id"], 9);
        assert_eq!(frame["error"]["code"], -32601);
        assert!(frame.get("result").is_none());
    }
}
