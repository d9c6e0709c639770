//! Per-topic payload codecs
//!
//! Each topic has exactly one payload shape. Decoders reject anything that does
//! not match it with [`PoolError::MalformedMessage`]; nothing is trimmed or
//! coerced.

use super::{Endpoint, Topic};
use crate::error::{PoolError, PoolResult};

fn text(topic: Topic, payload: &[u8]) -> PoolResult<&str> {
    std::str::from_utf8(payload).map_err(|e| PoolError::malformed(topic, format!("invalid UTF-8: {}", e)))
}

fn decimal(topic: Topic, field: &str, s: &str) -> PoolResult<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PoolError::malformed(topic, format!("{} {:?} is not a decimal number", field, s)));
    }
    s.parse()
        .map_err(|e| PoolError::malformed(topic, format!("{} {:?}: {}", field, s, e)))
}

/// `announce-endpoint` payload
pub fn encode_endpoint(endpoint: Endpoint) -> Vec<u8> {
    endpoint.to_string().into_bytes()
}

pub fn decode_endpoint(payload: &[u8]) -> PoolResult<Endpoint> {
    let topic = Topic::AnnounceEndpoint;
    text(topic, payload)?
        .parse()
        .map_err(|reason: String| PoolError::malformed(topic, reason))
}

/// `start-task` payload
pub fn encode_label(label: u64) -> Vec<u8> {
    label.to_string().into_bytes()
}

pub fn decode_label(payload: &[u8]) -> PoolResult<u64> {
    let topic = Topic::StartTask;
    decimal(topic, "label", text(topic, payload)?)
}

/// `result` payload: `"<label>,<magnitude>"`
pub fn encode_result(label: u64, magnitude: u64) -> Vec<u8> {
    format!("{},{}", label, magnitude).into_bytes()
}

pub fn decode_result(payload: &[u8]) -> PoolResult<(u64, u64)> {
    let topic = Topic::Result;
    let s = text(topic, payload)?;

    let (label, magnitude) = s
        .split_once(',')
        .ok_or_else(|| PoolError::malformed(topic, format!("expected \"<label>,<magnitude>\", got {:?}", s)))?;

    Ok((
        decimal(topic, "label", label)?,
        decimal(topic, "magnitude", magnitude)?,
    ))
}

/// `echo-request` / `echo-reply` payload: any UTF-8 string
pub fn encode_echo(payload: &str) -> Vec<u8> {
    payload.as_bytes().to_vec()
}

pub fn decode_echo(topic: Topic, payload: &[u8]) -> PoolResult<String> {
    Ok(text(topic, payload)?.to_string())
}

/// `stop` payload must be empty
pub fn decode_stop(payload: &[u8]) -> PoolResult<()> {
    if !payload.is_empty() {
        return Err(PoolError::malformed(
            Topic::Stop,
            format!("expected empty payload, got {} bytes", payload.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_malformed(result: PoolResult<impl std::fmt::Debug>, expected: Topic) -> bool {
        matches!(result, Err(PoolError::MalformedMessage { topic, .. }) if topic == expected)
    }

    #[test]
    fn test_result_payload() {
        assert_eq!(encode_result(3, 7919), b"3,7919".to_vec());
        assert_eq!(decode_result(b"3,7919").unwrap(), (3, 7919));
        assert_eq!(decode_result(b"0,0").unwrap(), (0, 0));
    }

    #[test]
    fn test_result_shape_mismatch() {
        assert!(is_malformed(decode_result(b"37919"), Topic::Result));
        assert!(is_malformed(decode_result(b"3,"), Topic::Result));
        assert!(is_malformed(decode_result(b",5"), Topic::Result));
        assert!(is_malformed(decode_result(b"3,5,7"), Topic::Result));
        assert!(is_malformed(decode_result(b"3, 5"), Topic::Result));
        assert!(is_malformed(decode_result(b"-3,5"), Topic::Result));
        assert!(is_malformed(decode_result(&[0xff, b',', b'1']), Topic::Result));
    }

    #[test]
    fn test_label_payload() {
        assert_eq!(decode_label(&encode_label(42)).unwrap(), 42);
        assert!(is_malformed(decode_label(b""), Topic::StartTask));
        assert!(is_malformed(decode_label(b"4.2"), Topic::StartTask));
        assert!(is_malformed(decode_label(b"99999999999999999999999"), Topic::StartTask));
    }

    #[test]
    fn test_endpoint_payload() {
        let ep = Endpoint::new(41234);
        assert_eq!(decode_endpoint(&encode_endpoint(ep)).unwrap(), ep);
        assert!(is_malformed(decode_endpoint(b"41234\n"), Topic::AnnounceEndpoint));
        assert!(is_malformed(decode_endpoint(b"0"), Topic::AnnounceEndpoint));
    }

    #[test]
    fn test_echo_is_verbatim() {
        let payload = " anything, even spaces ";
        assert_eq!(decode_echo(Topic::EchoReply, &encode_echo(payload)).unwrap(), payload);
        assert!(is_malformed(decode_echo(Topic::EchoRequest, &[0xc3]), Topic::EchoRequest));
    }

    #[test]
    fn test_stop_must_be_empty() {
        assert!(decode_stop(b"").is_ok());
        assert!(is_malformed(decode_stop(b"now"), Topic::Stop));
    }
}
