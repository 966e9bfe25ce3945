//! Length-prefixed CBOR framing for envelopes crossing a window boundary.
//!
//! Wire format: `[4-byte big-endian length][CBOR payload]`

use std::io::Cursor;

use crate::error::{XpostError, XpostResult};
use crate::messages::Envelope;

/// Frames larger than this are rejected instead of buffered.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encode a serializable value into a length-prefixed CBOR frame.
pub fn frame_encode<T: serde::Serialize>(value: &T) -> XpostResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)?;

    if payload.len() > MAX_FRAME_LEN {
        return Err(XpostError::Codec(format!(
            "frame of {} bytes exceeds limit of {MAX_FRAME_LEN}",
            payload.len()
        )));
    }

    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend(payload);
    Ok(frame)
}

/// Decode a CBOR payload (without length prefix) into a typed value.
pub fn cbor_decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> XpostResult<T> {
    let value: T = ciborium::from_reader(Cursor::new(data))?;
    Ok(value)
}

/// Decode exactly one complete frame holding an envelope.
pub fn decode_envelope(frame: &[u8]) -> XpostResult<Envelope> {
    let mut decoder = FrameDecoder::new();
    let mut envelopes = decoder.feed::<Envelope>(frame)?;
    if envelopes.len() != 1 || decoder.pending() != 0 {
        return Err(XpostError::Codec(format!(
            "expected a single envelope frame, got {} message(s) and {} trailing byte(s)",
            envelopes.len(),
            decoder.pending()
        )));
    }
    Ok(envelopes.remove(0))
}

/// Streaming frame decoder: accumulates bytes and yields complete messages.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed bytes into the decoder and return all complete CBOR-decoded messages.
    pub fn feed<T: serde::de::DeserializeOwned>(&mut self, data: &[u8]) -> XpostResult<Vec<T>> {
        self.buffer.extend_from_slice(data);
        let mut messages = Vec::new();

        while self.buffer.len() >= 4 {
            let len = u32::from_be_bytes([
                self.buffer[0],
                self.buffer[1],
                self.buffer[2],
                self.buffer[3],
            ]) as usize;

            if len > MAX_FRAME_LEN {
                self.buffer.clear();
                return Err(XpostError::Codec(format!(
                    "declared frame length {len} exceeds limit of {MAX_FRAME_LEN}"
                )));
            }
            if self.buffer.len() < 4 + len {
                break;
            }

            let msg: T = cbor_decode(&self.buffer[4..4 + len])?;
            messages.push(msg);
            self.buffer.drain(..4 + len);
        }

        Ok(messages)
    }

    /// Number of bytes remaining in the internal buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_survives_framing() {
        let env = Envelope::request(
            "https://parent.com",
            "getUser",
            json!({"id": 7, "tags": ["a", "b"]}),
            false,
        );
        let frame = frame_encode(&env).unwrap();
        let decoded = decode_envelope(&frame).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn incremental_feed() {
        let env = Envelope::request("https://a.com", "ping", json!(null), true);
        let frame = frame_encode(&env).unwrap();
        let mut decoder = FrameDecoder::new();

        for i in 0..frame.len() - 1 {
            let decoded: Vec<Envelope> = decoder.feed(&frame[i..i + 1]).unwrap();
            assert!(decoded.is_empty());
        }
        let decoded: Vec<Envelope> = decoder.feed(&frame[frame.len() - 1..]).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut decoder = FrameDecoder::new();
        let bogus = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        assert!(decoder.feed::<Envelope>(&bogus).is_err());
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn trailing_bytes_fail_single_envelope_decode() {
        let env = Envelope::request("https://a.com", "ping", json!(null), false);
        let mut frame = frame_encode(&env).unwrap();
        frame.extend_from_slice(&[0, 0]);
        assert!(decode_envelope(&frame).is_err());
    }
}
