//! pcc — LSP server for per-line private code annotations.
//!
//! Speaks LSP over stdio by default, or over a unix domain socket with
//! `--socket-file`. Annotations live in a SQLite file given by `--db`, or
//! in memory when the flag is left at its default.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use pcc::server;
use pcc::store::AnnotationStore;

/// Sentinel `--db` value selecting an in-memory store.
const DEFAULT_DB: &str = ":memory:";
/// Sentinel `--socket-file` value selecting stdio transport.
const DEFAULT_SOCKET: &str = ":stdstream:";

fn init_tracing() {
    // Logs go to stderr: stdout may be the LSP transport and must stay
    // clean.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let matches = Command::new("pcc")
        .version(env!("CARGO_PKG_VERSION"))
        .about("LSP server for private per-line code annotations")
        .arg(
            Arg::new("db")
                .long("db")
                .default_value(DEFAULT_DB)
                .help("The file name for the private comments; the default keeps them in memory"),
        )
        .arg(
            Arg::new("socket-file")
                .long("socket-file")
                .default_value(DEFAULT_SOCKET)
                .help("The socket to use for communication; the default serves on stdin/stdout"),
        )
        .get_matches();

    let db = matches.get_one::<String>("db").expect("db has a default");
    let socket = matches
        .get_one::<String>("socket-file")
        .expect("socket-file has a default");

    let store = if db == DEFAULT_DB {
        tracing::info!("using an in-memory annotation store");
        AnnotationStore::open_in_memory().context("could not open in-memory store")?
    } else {
        tracing::info!(db, "opening annotation store");
        AnnotationStore::open(Path::new(db))
            .with_context(|| format!("could not open annotation store: {db}"))?
    };
    let store = Arc::new(Mutex::new(store));

    if socket == DEFAULT_SOCKET {
        server::serve_stdio(store).await?;
    } else {
        server::serve_socket(Path::new(socket), store).await?;
    }

    tracing::info!("exiting");
    Ok(())
}
