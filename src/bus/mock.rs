//! Recording transport for testing
//!
//! Captures every message instead of putting it on the wire, so coordinator and
//! worker handlers can be driven synchronously and their output inspected.
//!
//! # Example
//!
//! ```
//! use svcpool::bus::{Endpoint, Topic, Transport};
//! use svcpool::bus::mock::RecordingTransport;
//!
//! let transport = RecordingTransport::new();
//! transport.send(Endpoint::new(4000), Topic::StartTask, b"0".to_vec());
//!
//! assert_eq!(transport.count(Topic::StartTask), 1);
//! assert_eq!(transport.payloads_to(Endpoint::new(4000), Topic::StartTask), vec!["0"]);
//! ```

use super::{Endpoint, Topic, Transport};
use std::sync::{Arc, Mutex, PoisonError};

/// One captured message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: Endpoint,
    pub topic: Topic,
    pub payload: Vec<u8>,
}

impl SentMessage {
    /// Payload as text (lossy)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Transport that records messages; clones share the same log
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drain the log
    pub fn take(&self) -> Vec<SentMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of messages sent on `topic`
    pub fn count(&self, topic: Topic) -> usize {
        self.sent().iter().filter(|m| m.topic == topic).count()
    }

    /// Text payloads sent to `to` on `topic`, in send order
    pub fn payloads_to(&self, to: Endpoint, topic: Topic) -> Vec<String> {
        self.sent()
            .iter()
            .filter(|m| m.to == to && m.topic == topic)
            .map(SentMessage::text)
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, to: Endpoint, topic: Topic, payload: Vec<u8>) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMessage { to, topic, payload });
    }
}
