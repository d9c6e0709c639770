//! Bus transports
//!
//! [`Transport`] is the sending half of the bus: a fire-and-forget
//! `send(endpoint, topic, payload)`. [`TcpTransport`] implements it with a single
//! writer task that keeps one connection per destination, which gives in-order
//! delivery per sender/receiver pair.
//!
//! [`BusListener`] is the receiving half. It accepts any number of connections
//! and funnels every decoded envelope into one channel, so the owner handles
//! inbound messages strictly one at a time.

use super::protocol::{decode_envelope, read_frame, serialize_envelope};
use super::{Endpoint, Envelope, Topic};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

/// How long the writer waits for a peer to accept a connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Sending half of the bus
///
/// `send` must not block and has no return value: delivery is best-effort and a
/// lost message is indistinguishable from a slow peer.
pub trait Transport: Send + Sync {
    fn send(&self, to: Endpoint, topic: Topic, payload: Vec<u8>);
}

struct Outgoing {
    to: Endpoint,
    envelope: Envelope,
}

/// TCP transport stamped with the sender's own listening endpoint
pub struct TcpTransport {
    reply_to: Endpoint,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl TcpTransport {
    /// Start the writer task
    ///
    /// Must be called from within a tokio runtime. The task exits once the
    /// transport is dropped and its queue is drained.
    pub fn spawn(reply_to: Endpoint) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(rx));
        Self { reply_to, tx }
    }
}

impl Transport for TcpTransport {
    fn send(&self, to: Endpoint, topic: Topic, payload: Vec<u8>) {
        let envelope = Envelope::new(topic, self.reply_to, payload);
        if self.tx.send(Outgoing { to, envelope }).is_err() {
            warn!(%to, %topic, "Transport writer has stopped; message dropped");
        }
    }
}

async fn writer_loop(mut rx: mpsc::UnboundedReceiver<Outgoing>) {
    let mut connections: HashMap<Endpoint, TcpStream> = HashMap::new();

    while let Some(out) = rx.recv().await {
        let frame = match serialize_envelope(&out.envelope) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(to = %out.to, topic = %out.envelope.topic, "Failed to encode message: {:#}", e);
                continue;
            }
        };

        match deliver(&mut connections, out.to, &frame).await {
            Ok(()) => debug!(to = %out.to, topic = %out.envelope.topic, "Sent"),
            Err(e) => warn!(to = %out.to, topic = %out.envelope.topic, "Message lost: {:#}", e),
        }
    }
}

/// Write a frame to `to`, reconnecting once if a cached connection has gone bad
async fn deliver(
    connections: &mut HashMap<Endpoint, TcpStream>,
    to: Endpoint,
    frame: &[u8],
) -> Result<()> {
    for attempt in 0..2 {
        if !connections.contains_key(&to) {
            let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(to.socket_addr()))
                .await
                .with_context(|| format!("Timed out connecting to {}", to))?
                .with_context(|| format!("Failed to connect to {}", to))?;
            stream.set_nodelay(true).ok();
            connections.insert(to, stream);
        }

        let Some(stream) = connections.get_mut(&to) else {
            continue;
        };

        let written = match stream.write_all(frame).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => return Ok(()),
            Err(e) => {
                connections.remove(&to);
                if attempt == 1 {
                    return Err(e).with_context(|| format!("Failed to write to {}", to));
                }
            }
        }
    }

    anyhow::bail!("Failed to deliver to {}", to)
}

/// Receiving half of the bus
///
/// Dropping the listener closes the listening socket and every accepted
/// connection.
pub struct BusListener {
    endpoint: Endpoint,
    inbound: mpsc::UnboundedReceiver<Envelope>,
    accept_task: JoinHandle<()>,
}

impl BusListener {
    /// Bind a loopback port (0 picks a free ephemeral port)
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
            .await
            .with_context(|| format!("Failed to bind bus endpoint on port {}", port))?;

        let local = listener
            .local_addr()
            .context("Failed to read bound bus address")?;
        let endpoint = Endpoint::new(local.port());

        let (tx, inbound) = mpsc::unbounded_channel();
        let accept_task = tokio::spawn(accept_loop(listener, tx));

        debug!(%endpoint, "Bus endpoint bound");

        Ok(Self {
            endpoint,
            inbound,
            accept_task,
        })
    }

    /// Endpoint peers use to reach this listener
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Next inbound envelope, in arrival order
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inbound.recv().await
    }
}

impl Drop for BusListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::UnboundedSender<Envelope>) {
    // Aborting this task drops the set, which aborts every connection reader
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Accepted bus connection");
                    connections.spawn(read_connection(stream, peer, tx.clone()));
                }
                Err(e) => {
                    warn!("Failed to accept bus connection: {}", e);
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn read_connection(mut stream: TcpStream, peer: SocketAddr, tx: mpsc::UnboundedSender<Envelope>) {
    loop {
        match read_frame(&mut stream).await {
            Ok(Some(body)) => match decode_envelope(&body) {
                Ok(envelope) => {
                    if tx.send(envelope).is_err() {
                        break;
                    }
                }
                // The frame boundary is intact, so only this message is lost
                Err(e) => warn!(%peer, "Dropping undecodable frame: {:#}", e),
            },
            Ok(None) => {
                debug!(%peer, "Bus connection closed");
                break;
            }
            Err(e) => {
                warn!(%peer, "Bus connection failed: {:#}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::codec;

    async fn recv_within(listener: &mut BusListener) -> Envelope {
        tokio::time::timeout(Duration::from_secs(5), listener.recv())
            .await
            .expect("timed out waiting for envelope")
            .expect("listener closed")
    }

    #[tokio::test]
    async fn test_send_and_receive_in_order() {
        let mut receiver = BusListener::bind(0).await.unwrap();
        let sender = BusListener::bind(0).await.unwrap();
        let transport = TcpTransport::spawn(sender.endpoint());

        for label in 0..20u64 {
            transport.send(receiver.endpoint(), Topic::StartTask, codec::encode_label(label));
        }

        for label in 0..20u64 {
            let envelope = recv_within(&mut receiver).await;
            assert_eq!(envelope.topic, Topic::StartTask);
            assert_eq!(envelope.reply_to, sender.endpoint());
            assert_eq!(codec::decode_label(&envelope.payload).unwrap(), label);
        }
    }

    #[tokio::test]
    async fn test_many_senders_one_listener() {
        let mut receiver = BusListener::bind(0).await.unwrap();
        let a = TcpTransport::spawn(Endpoint::new(40001));
        let b = TcpTransport::spawn(Endpoint::new(40002));

        a.send(receiver.endpoint(), Topic::EchoReply, codec::encode_echo("a"));
        b.send(receiver.endpoint(), Topic::EchoReply, codec::encode_echo("b"));

        let mut from = vec![
            recv_within(&mut receiver).await.reply_to.port(),
            recv_within(&mut receiver).await.reply_to.port(),
        ];
        from.sort();
        assert_eq!(from, vec![40001, 40002]);
    }

    #[tokio::test]
    async fn test_send_to_dead_endpoint_is_silent() {
        let dead = {
            let listener = BusListener::bind(0).await.unwrap();
            listener.endpoint()
        };
        let mut alive = BusListener::bind(0).await.unwrap();
        let transport = TcpTransport::spawn(Endpoint::new(40003));

        transport.send(dead, Topic::Stop, Vec::new());
        transport.send(alive.endpoint(), Topic::Stop, Vec::new());

        // The lost message does not stall delivery to other peers
        let envelope = recv_within(&mut alive).await;
        assert_eq!(envelope.topic, Topic::Stop);
    }
}
