//! Bus protocol
//!
//! Defines the topics exchanged between coordinator and workers and the framing
//! used to carry them over a TCP connection. Envelopes are serialized with
//! MessagePack (rmp-serde); payloads inside the envelope are UTF-8 text whose
//! shape depends on the topic (see `codec`).
//!
//! # Message Flow
//!
//! ```text
//! Coordinator                          Worker
//!     |                                   |
//!     |<------ ANNOUNCE-ENDPOINT ---------|
//!     |                                   |
//!     |-------- START-TASK(label) ------->|
//!     |<------- RESULT(label,mag) --------|
//!     |                                   |
//!     |-------- ECHO-REQUEST(ep) -------->|
//!     |<------- ECHO-REPLY(ep) -----------|
//!     |                                   |
//!     |-------- STOP -------------------->|
//! ```
//!
//! # Message Framing
//!
//! Each envelope is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: envelope length][N bytes: MessagePack envelope]
//! ```

use super::Endpoint;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest envelope accepted from a peer
///
/// Every payload on this bus is a short text string; anything bigger is a
/// corrupted or foreign stream.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Message topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    /// Worker → Coordinator: decimal port the worker listens on
    AnnounceEndpoint,
    /// Coordinator → Worker: decimal task label
    StartTask,
    /// Worker → Coordinator: `"<label>,<magnitude>"`
    Result,
    /// Coordinator → Worker: arbitrary string to echo back
    EchoRequest,
    /// Worker → Coordinator: the echo-request payload, verbatim
    EchoReply,
    /// Coordinator → Worker: empty payload, graceful shutdown
    Stop,
}

impl Topic {
    /// Wire name of the topic
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::AnnounceEndpoint => "announce-endpoint",
            Topic::StartTask => "start-task",
            Topic::Result => "result",
            Topic::EchoRequest => "echo-request",
            Topic::EchoReply => "echo-reply",
            Topic::Stop => "stop",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message on the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Topic selecting the receiver's handler
    pub topic: Topic,

    /// Listening endpoint of the sender
    ///
    /// The coordinator uses this to identify which slot produced a result.
    pub reply_to: Endpoint,

    /// Topic-specific payload (UTF-8 text, possibly empty)
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(topic: Topic, reply_to: Endpoint, payload: Vec<u8>) -> Self {
        Self {
            topic,
            reply_to,
            payload,
        }
    }
}

/// Serialize an envelope to a length-prefixed frame
pub fn serialize_envelope(envelope: &Envelope) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec(envelope).context("Failed to serialize envelope")?;

    if body.len() > MAX_FRAME_LEN {
        anyhow::bail!("Envelope too large: {} bytes (max {})", body.len(), MAX_FRAME_LEN);
    }

    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
    framed.extend_from_slice(&body);

    Ok(framed)
}

/// Deserialize an envelope from a buffer holding at least one frame
///
/// Returns (envelope, bytes_consumed) where bytes_consumed includes the length prefix.
pub fn deserialize_envelope(buf: &[u8]) -> Result<(Envelope, usize)> {
    if buf.len() < 4 {
        anyhow::bail!("Buffer too small for frame length (need 4 bytes, got {})", buf.len());
    }

    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if buf.len() < 4 + len {
        anyhow::bail!("Incomplete frame (need {} bytes, got {})", 4 + len, buf.len());
    }

    let envelope = decode_envelope(&buf[4..4 + len])?;
    Ok((envelope, 4 + len))
}

/// Decode an envelope body (without length prefix)
pub fn decode_envelope(body: &[u8]) -> Result<Envelope> {
    rmp_serde::from_slice(body).context("Failed to deserialize envelope")
}

/// Read one frame body from a stream
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Failed to read frame length"),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("Frame too large: {} bytes (max {})", len, MAX_FRAME_LEN);
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .context("Failed to read frame body")?;

    Ok(Some(body))
}

/// Write one envelope to a stream and flush it
pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let framed = serialize_envelope(envelope)?;

    writer
        .write_all(&framed)
        .await
        .context("Failed to write envelope")?;
    writer.flush().await.context("Failed to flush stream")?;

    Ok(())
}
