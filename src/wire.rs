//! Benchmark datagram format.
//!
//! Every probe message is a fixed-size record: a header carrying a
//! message-kind/source-id pair, a sequence number and the send timestamp,
//! followed by a telemetry-sized body. Both sides know the exact length, so
//! any received datagram of a different length is a protocol violation, not
//! a partial read to be retried.
//!
//! Fields are encoded explicitly in little-endian; nothing on the wire
//! depends on host struct layout.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Message-kind identifier for latency probe datagrams.
pub const PROBE_KIND: u32 = 0x4C50;

/// Header length in bytes: kind + source + seq + sec + usec.
pub const HEADER_LEN: usize = 4 + 4 + 4 + 8 + 4;

/// Fixed body length, sized like a realtime telemetry block.
pub const MSG_BODY_LEN: usize = 912;

/// Total fixed datagram length.
pub const MSG_LEN: usize = HEADER_LEN + MSG_BODY_LEN;

/// Wire format violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Received datagram length does not match the fixed message length.
    #[error("datagram length {got} does not match expected message length {expected}")]
    Length {
        /// Observed datagram length.
        got: usize,
        /// The fixed length both sides agreed on.
        expected: usize,
    },
    /// Buffer too short to contain a header.
    #[error("buffer too short for message header: {0} bytes")]
    Truncated(usize),
}

/// Wall-clock send/receive timestamp: seconds + microseconds since the
/// Unix epoch. Carried on the wire and compared across hosts, so it is
/// wall time, not a monotonic reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub sec: i64,
    /// Microsecond fraction, in `[0, 1_000_000)`.
    pub usec: u32,
}

impl Timestamp {
    /// Captures the current wall-clock time.
    ///
    /// A clock before the epoch saturates to zero.
    #[must_use]
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Self {
                sec: d.as_secs() as i64,
                usec: d.subsec_micros(),
            },
            Err(_) => Self { sec: 0, usec: 0 },
        }
    }

    /// Signed elapsed microseconds from `earlier` to `self`.
    ///
    /// Negative when the clocks disagree; the benchmark measures, it does
    /// not enforce ordering.
    #[must_use]
    pub fn micros_since(&self, earlier: Timestamp) -> i64 {
        (self.sec - earlier.sec) * 1_000_000 + (i64::from(self.usec) - i64::from(earlier.usec))
    }
}

/// Decoded probe header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeHeader {
    /// Message-kind identifier (see [`PROBE_KIND`]).
    pub kind: u32,
    /// Sender application id.
    pub source: u32,
    /// 1-based sequence number assigned by the emitter.
    pub seq: u32,
    /// Send timestamp.
    pub sent: Timestamp,
}

impl ProbeHeader {
    /// Encodes the header into the first [`HEADER_LEN`] bytes of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`HEADER_LEN`]; callers always pass
    /// a full fixed-size message buffer.
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.kind.to_le_bytes());
        buf[4..8].copy_from_slice(&self.source.to_le_bytes());
        buf[8..12].copy_from_slice(&self.seq.to_le_bytes());
        buf[12..20].copy_from_slice(&self.sent.sec.to_le_bytes());
        buf[20..24].copy_from_slice(&self.sent.usec.to_le_bytes());
    }

    /// Decodes a header from the front of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] if `buf` is shorter than
    /// [`HEADER_LEN`].
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated(buf.len()));
        }
        let kind = u32::from_le_bytes(buf[0..4].try_into().expect("slice length checked"));
        let source = u32::from_le_bytes(buf[4..8].try_into().expect("slice length checked"));
        let seq = u32::from_le_bytes(buf[8..12].try_into().expect("slice length checked"));
        let sec = i64::from_le_bytes(buf[12..20].try_into().expect("slice length checked"));
        let usec = u32::from_le_bytes(buf[20..24].try_into().expect("slice length checked"));
        Ok(Self {
            kind,
            source,
            seq,
            sent: Timestamp { sec, usec },
        })
    }
}

/// Builds a complete probe datagram for the given sequence number.
///
/// The body is zero padding; only the header carries information.
#[must_use]
pub fn encode_probe(source: u32, seq: u32, sent: Timestamp) -> [u8; MSG_LEN] {
    let mut buf = [0u8; MSG_LEN];
    let header = ProbeHeader {
        kind: PROBE_KIND,
        source,
        seq,
        sent,
    };
    header.encode_into(&mut buf);
    buf
}

/// Validates the fixed datagram length.
///
/// # Errors
///
/// Returns [`ProtocolError::Length`] if `got` differs from [`MSG_LEN`].
pub fn check_length(got: usize) -> Result<(), ProtocolError> {
    if got == MSG_LEN {
        Ok(())
    } else {
        Err(ProtocolError::Length {
            got,
            expected: MSG_LEN,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let sent = Timestamp {
            sec: 1_700_000_123,
            usec: 456_789,
        };
        let buf = encode_probe(7, 42, sent);
        assert_eq!(buf.len(), MSG_LEN);

        let header = ProbeHeader::decode(&buf).expect("decode");
        assert_eq!(header.kind, PROBE_KIND);
        assert_eq!(header.source, 7);
        assert_eq!(header.seq, 42);
        assert_eq!(header.sent, sent);
    }

    #[test]
    fn decode_rejects_truncated_buffer() {
        let buf = [0u8; HEADER_LEN - 1];
        assert_eq!(
            ProbeHeader::decode(&buf),
            Err(ProtocolError::Truncated(HEADER_LEN - 1))
        );
    }

    #[test]
    fn length_gate() {
        assert!(check_length(MSG_LEN).is_ok());
        assert_eq!(
            check_length(12),
            Err(ProtocolError::Length {
                got: 12,
                expected: MSG_LEN
            })
        );
    }

    #[test]
    fn micros_since_is_signed() {
        let early = Timestamp {
            sec: 100,
            usec: 999_000,
        };
        let late = Timestamp {
            sec: 101,
            usec: 1_000,
        };
        assert_eq!(late.micros_since(early), 2_000);
        assert_eq!(early.micros_since(late), -2_000);
    }
}
