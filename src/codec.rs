//! `Content-Length` framing for JSON-RPC over a byte stream.
//!
//! Every LSP frame is `Content-Length: N\r\n` (plus optional further
//! headers) followed by a blank line and exactly `N` bytes of JSON.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body; anything larger is a protocol error.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Reads framed JSON-RPC messages from an async byte stream.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Read one frame. `Ok(None)` means the peer closed the stream between
    /// frames; EOF anywhere inside a frame is an error.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(len) = self.read_content_length().await? else {
            return Ok(None);
        };
        if len > MAX_FRAME_BYTES {
            bail!("frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit");
        }

        let mut body = vec![0u8; len];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;
        let value = serde_json::from_slice(&body).context("decoding frame body")?;
        Ok(Some(value))
    }

    /// Consume the header block. Header names are matched
    /// case-insensitively and unknown headers are skipped.
    async fn read_content_length(&mut self) -> Result<Option<usize>> {
        let mut content_length = None;
        let mut line = String::new();
        let mut in_headers = false;
        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading header line")?;
            if n == 0 {
                // A clean close may only happen before the first header
                // byte of a frame.
                if in_headers {
                    bail!("connection closed mid-headers");
                }
                return Ok(None);
            }
            in_headers = true;

            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':')
                && name.trim().eq_ignore_ascii_case("content-length")
            {
                content_length = Some(
                    value
                        .trim()
                        .parse::<usize>()
                        .with_context(|| format!("bad Content-Length value: {value:?}"))?,
                );
            }
        }
        match content_length {
            Some(len) => Ok(Some(len)),
            None => bail!("header block without Content-Length"),
        }
    }
}

/// Writes framed JSON-RPC messages to an async byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, frame: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(frame).context("encoding frame body")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.writer
            .write_all(&body)
            .await
            .context("writing frame body")?;
        self.writer.flush().await.context("flushing frame")?;
        Ok(())
    }
}
