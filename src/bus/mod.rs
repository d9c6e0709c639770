//! Message bus between the coordinator and its workers
//!
//! The bus is a fire-and-forget publish/subscribe transport between named
//! endpoints. Every endpoint is a TCP port on the loopback interface; workers are
//! always local peers of the coordinator.
//!
//! # Modules
//!
//! - `protocol`: topics, the envelope, and length-prefixed framing
//! - `codec`: fixed-shape payload encoders/decoders, one pair per topic
//! - `dispatch`: explicit topic → handler tables
//! - `transport`: the `Transport` trait, the TCP implementation, and `BusListener`
//! - `mock`: a recording transport for tests
//!
//! # Delivery Guarantees
//!
//! - `send` never blocks and never reports failure to the caller
//! - Messages from one sender to one receiver arrive in send order
//! - Messages arriving at one listener are handed to its owner one at a time

pub mod codec;
pub mod dispatch;
pub mod mock;
pub mod protocol;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

pub use dispatch::DispatchTable;
pub use protocol::{Envelope, Topic};
pub use transport::{BusListener, TcpTransport, Transport};

/// Address of a bus endpoint
///
/// Endpoints are loopback TCP ports. On the wire (announce payloads, echo
/// payloads) an endpoint is written as its decimal port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint(u16);

impl Endpoint {
    /// Create an endpoint for a loopback port
    pub const fn new(port: u16) -> Self {
        Self(port)
    }

    /// Port number
    pub fn port(&self) -> u16 {
        self.0
    }

    /// Socket address to connect to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.0))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let port: u16 = s
            .parse()
            .map_err(|e| format!("invalid endpoint {:?}: {}", s, e))?;
        if port == 0 {
            return Err("endpoint port must be non-zero".to_string());
        }
        Ok(Self(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse() {
        let ep: Endpoint = "3002".parse().unwrap();
        assert_eq!(ep.port(), 3002);
        assert_eq!(ep.to_string(), "3002");
        assert_eq!(ep.socket_addr().to_string(), "127.0.0.1:3002");
    }

    #[test]
    fn test_endpoint_rejects_garbage() {
        assert!("".parse::<Endpoint>().is_err());
        assert!("0".parse::<Endpoint>().is_err());
        assert!("70000".parse::<Endpoint>().is_err());
        assert!(" 3002".parse::<Endpoint>().is_err());
        assert!("localhost".parse::<Endpoint>().is_err());
    }
}
